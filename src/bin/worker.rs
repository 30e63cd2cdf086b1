//! `corral-worker`: start a `WorkerController` pointed at a running
//! coordinator, or — when invoked with the internal `--worker-child
//! <index>` flag — run a single worker-child loop. The controller
//! re-execs this same binary in child mode, so both roles live in one
//! executable.
//!
//! The demo job function here doubles an `i64` argument against a
//! constant multiplier, matching the reference example wired up in
//! `demos/local_run.rs`. A real deployment links `corral` as a library
//! and supplies its own argument/result/job-function types instead of
//! using this binary directly.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use corral::config::{CliOverrides, ResolvedConfig};
use corral::{JobError, WorkerConfig, WorkerController};

/// Start a corral worker pool, or (internally) one worker-child.
#[derive(Parser, Debug)]
#[command(name = "corral-worker", version, about)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    server: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    authkey_file: Option<PathBuf>,

    /// Number of worker-child processes. `0` means one per core; a
    /// negative value means `cores + n`, floored at 1.
    #[arg(long)]
    nproc: Option<i64>,

    /// Completions per child before it exits; unset or `<= 0` is
    /// unbounded.
    #[arg(long)]
    njobs: Option<i64>,

    /// Directory to write emergency dump/traceback files to.
    #[arg(long)]
    fname_dump: Option<PathBuf>,

    /// Internal flag: run as worker-child `index` instead of spawning a
    /// pool. Set by the controller when it re-execs itself.
    #[arg(long, hide = true)]
    worker_child: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let prefix = match args.worker_child {
        Some(i) => format!("worker[{i}]"),
        None => "worker-controller".to_string(),
    };
    corral::logging::init(&prefix);

    let cli = CliOverrides {
        server: args.server.clone(),
        port: args.port,
        authkey_file: args.authkey_file.clone(),
        nproc: args.nproc,
        njobs: args.njobs,
        fname_dump: args.fname_dump.clone(),
        ..CliOverrides::default()
    };
    let config = ResolvedConfig::load(cli, args.config.as_deref()).context("loading configuration")?;

    // A re-exec'd worker-child never sees the controller's `--server`/
    // `--port`/`--njobs`/`--nice` flags on its own argv (only
    // `--worker-child <index>`, see `WorkerController::run_controller_with`),
    // so for child mode the controller's env vars take priority over
    // whatever `config` resolved to from the child's own (empty) CLI/file
    // layers. The authkey file and counters path are already env-only.
    let worker_config = WorkerConfig {
        host: env_string("CORRAL_SERVER").unwrap_or(config.server),
        port: env_parsed("CORRAL_PORT").unwrap_or(config.port),
        authkey_file: child_authkey_file(&config.authkey_file),
        nproc: config.nproc,
        njobs: env_parsed("CORRAL_NJOBS").unwrap_or(config.njobs),
        retry: config.retry,
        job_q_timeout: config.job_q_timeout,
        result_q_timeout: config.result_q_timeout,
        fname_dump: config.fname_dump,
        niceness: env_parsed("CORRAL_NICE").or(config.niceness),
        counters_path: counters_path_from_env(),
    };

    let controller: WorkerController<i64, i64, i64> = WorkerController::new(worker_config, double_job);

    match args.worker_child {
        Some(index) => controller.run_child(index).context("worker-child loop"),
        None => controller.run_controller().context("worker controller"),
    }
}

/// The demo job function: multiply the argument by the coordinator's
/// constant, failing on overflow so the fail-path is exercised too.
fn double_job(arg: &i64, const_arg: &i64) -> std::result::Result<i64, JobError> {
    arg.checked_mul(*const_arg)
        .ok_or_else(|| JobError::new("OverflowError", format!("{arg} * {const_arg} overflows i64")))
}

fn child_authkey_file(configured: &std::path::Path) -> PathBuf {
    std::env::var_os("CORRAL_AUTHKEY_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| configured.to_path_buf())
}

fn counters_path_from_env() -> Option<PathBuf> {
    std::env::var_os("CORRAL_COUNTERS_PATH").map(PathBuf::from)
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
