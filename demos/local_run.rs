//! Single-host demo: a coordinator and a two-process worker pool,
//! co-launched via [`corral::LocalDriver`], computing `arg * const_arg`
//! for a handful of arguments.
//!
//! Run with `cargo run --example local_run`. Since `LocalDriver` spawns
//! worker-children by re-executing the current binary with a
//! `--worker-child <index>` flag, this file itself has to answer to that
//! flag the same way `corral-worker` does.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use corral::{Coordinator, JobError, LocalDriver, LocalDriverConfig, WorkerConfig, WorkerController};

const MULTIPLIER: i64 = 3;
const PORT: u16 = 42988;

fn double_job(arg: &i64, const_arg: &i64) -> std::result::Result<i64, JobError> {
    arg.checked_mul(*const_arg)
        .ok_or_else(|| JobError::new("OverflowError", format!("{arg} * {const_arg} overflows i64")))
}

fn main() -> Result<()> {
    let worker_child_index = parse_worker_child_flag();
    let authkey_file = authkey_file_path();

    if let Some(index) = worker_child_index {
        corral::logging::init(&format!("worker[{index}]"));
        let worker_config = WorkerConfig {
            host: "127.0.0.1".to_string(),
            port: PORT,
            authkey_file,
            nproc: 2,
            njobs: -1,
            retry: corral::wire::RetryConfig::default(),
            job_q_timeout: Duration::from_secs(2),
            result_q_timeout: Duration::from_secs(10),
            fname_dump: None,
            niceness: None,
            counters_path: std::env::var_os("CORRAL_COUNTERS_PATH").map(PathBuf::from),
        };
        let controller: WorkerController<i64, i64, i64> = WorkerController::new(worker_config, double_job);
        return controller.run_child(index).context("worker-child loop");
    }

    corral::logging::init("local-driver");
    ensure_authkey_file(&authkey_file)?;

    let const_arg = bincode::serialize(&MULTIPLIER).context("encoding constant argument")?;
    let mut coordinator = Coordinator::new(Some(const_arg), Duration::from_millis(500));
    coordinator.on_new_result(|arg_bytes, result_bytes| {
        let arg: i64 = bincode::deserialize(arg_bytes).unwrap_or_default();
        let result: i64 = bincode::deserialize(result_bytes).unwrap_or_default();
        log::info!("{arg} -> {result}");
    });
    for n in 1..=20i64 {
        coordinator.insert(bincode::serialize(&n)?)?;
    }

    let worker_config = WorkerConfig {
        host: "127.0.0.1".to_string(),
        port: PORT,
        authkey_file: authkey_file.clone(),
        nproc: 2,
        njobs: -1,
        retry: corral::wire::RetryConfig::default(),
        job_q_timeout: Duration::from_secs(2),
        result_q_timeout: Duration::from_secs(10),
        fname_dump: None,
        niceness: None,
        counters_path: None,
    };
    let driver_config = LocalDriverConfig {
        port: PORT,
        authkey_file,
        worker: worker_config,
        startup_delay: Duration::from_millis(200),
        shutdown_timeout: Duration::from_secs(5),
    };
    let driver = LocalDriver::new(coordinator, driver_config);
    let accounting = driver.run::<i64, i64, i64>(double_job)?;
    println!("done: {accounting:?}");
    Ok(())
}

fn parse_worker_child_flag() -> Option<usize> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--worker-child" {
            return args.next().and_then(|v| v.parse().ok());
        }
    }
    None
}

fn authkey_file_path() -> PathBuf {
    std::env::temp_dir().join("corral-local-run-authkey")
}

fn ensure_authkey_file(path: &PathBuf) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    use rand::RngCore;
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    std::fs::write(path, key)?;
    Ok(())
}

