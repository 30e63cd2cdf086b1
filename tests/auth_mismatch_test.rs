// Integration test for scenario 4: a coordinator and a worker with
// mismatching authkeys. The worker's call must fail fast with `Auth`
// (no retry spin) and the coordinator must be left completely
// unaffected, shutting down cleanly with every argument still pending.
//
// Spawns the real `corral-coordinator`/`corral-worker` binaries built
// alongside this test; skips gracefully if they aren't present.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

fn binary_path(name: &str) -> PathBuf {
    let mut path = std::env::current_exe().expect("current_exe");
    path.pop();
    path.pop();
    path.push(name);
    path
}

fn binaries_exist() -> bool {
    binary_path("corral-coordinator").exists() && binary_path("corral-worker").exists()
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    // SAFETY: `pid` is a live child we spawned and still hold a handle to.
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

fn wait_with_timeout(child: &mut std::process::Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {
                if start.elapsed() > timeout {
                    return None;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return None,
        }
    }
}

#[test]
#[cfg(unix)]
fn mismatched_authkey_fails_fast_and_leaves_coordinator_clean() {
    if !binaries_exist() {
        eprintln!("Skipping test: corral-coordinator/corral-worker binaries not found next to the test binary.");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let coordinator_key = dir.path().join("coordinator.key");
    let worker_key = dir.path().join("worker.key");
    let args_file = dir.path().join("args.ndjson");
    let snapshot_out = dir.path().join("snapshot.bin");

    std::fs::write(&coordinator_key, b"the-real-key-0123456789abcdef01").unwrap();
    std::fs::write(&worker_key, b"a-different-key-fedcba9876543210").unwrap();

    let mut f = std::fs::File::create(&args_file).unwrap();
    for n in 1..6 {
        writeln!(f, "{n}").unwrap();
    }
    drop(f);

    let port = 43_971u16;
    let mut coordinator = Command::new(binary_path("corral-coordinator"))
        .arg("--server").arg("127.0.0.1")
        .arg("--port").arg(port.to_string())
        .arg("--authkey-file").arg(&coordinator_key)
        .arg("--args-file").arg(&args_file)
        .arg("--snapshot-out").arg(&snapshot_out)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn corral-coordinator");

    std::thread::sleep(Duration::from_millis(300));

    let started = Instant::now();
    let mut worker = Command::new(binary_path("corral-worker"))
        .arg("--server").arg("127.0.0.1")
        .arg("--port").arg(port.to_string())
        .arg("--authkey-file").arg(&worker_key)
        .arg("--nproc").arg("1")
        .arg("--njobs").arg("1")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn corral-worker");

    let worker_status = wait_with_timeout(&mut worker, Duration::from_secs(10));
    assert!(worker_status.is_some(), "worker did not exit — auth failure should fail fast, not hang retrying");
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "worker took too long to fail on a mismatched authkey: {:?}", started.elapsed()
    );

    send_sigterm(coordinator.id());
    let coordinator_status = wait_with_timeout(&mut coordinator, Duration::from_secs(5));
    assert!(coordinator_status.is_some(), "coordinator did not exit cleanly after SIGTERM");

    let snapshot = corral::Snapshot::static_load(&snapshot_out).expect("snapshot should load");
    assert_eq!(snapshot.num_succeeded, 0, "no argument should have been processed");
    assert_eq!(snapshot.pending_ids().len(), 5, "every argument is still pending; the coordinator was unaffected");
}
