// Integration test for scenario 2 in the coordinator's testable
// properties: a coordinator serving with no worker attached, killed by
// SIGTERM mid-run, must snapshot cleanly with every inserted argument
// still `pending`.
//
// Spawns the real `corral-coordinator` binary built alongside this test
// (`cargo test` builds `[[bin]]` targets in the same profile). Skips
// gracefully if the binary isn't present for some reason rather than
// failing the suite.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

fn binary_path(name: &str) -> PathBuf {
    let mut path = std::env::current_exe().expect("current_exe");
    path.pop(); // this test binary
    path.pop(); // deps
    path.push(name);
    path
}

fn binary_exists(name: &str) -> bool {
    binary_path(name).exists()
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
fn sigterm_during_serving_snapshots_all_pending_args() {
    if !binary_exists("corral-coordinator") {
        eprintln!("Skipping test: corral-coordinator binary not found next to the test binary.");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let authkey_file = dir.path().join("authkey");
    let args_file = dir.path().join("args.ndjson");
    let snapshot_out = dir.path().join("snapshot.bin");

    let mut f = std::fs::File::create(&args_file).unwrap();
    for n in 1..15 {
        writeln!(f, "{n}").unwrap();
    }
    drop(f);

    let mut child = Command::new(binary_path("corral-coordinator"))
        .arg("--server").arg("127.0.0.1")
        .arg("--port").arg("0")
        .arg("--authkey-file").arg(&authkey_file)
        .arg("--args-file").arg(&args_file)
        .arg("--snapshot-out").arg(&snapshot_out)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn corral-coordinator");

    std::thread::sleep(Duration::from_millis(500));
    send_sigterm(child.id());

    let status = wait_with_timeout(&mut child, Duration::from_secs(5));
    assert!(status.is_some(), "coordinator did not exit within timeout after SIGTERM");

    let snapshot = corral::Snapshot::static_load(&snapshot_out).expect("snapshot should load");
    assert_eq!(snapshot.num_succeeded, 0);
    let pending = snapshot.pending_ids();
    assert_eq!(pending.len(), 14, "all 14 inserted args should still be pending");
}
