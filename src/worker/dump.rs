//! Emergency dump and traceback files.
//!
//! A worker-child that is interrupted while holding arguments it cannot
//! re-queue over the wire (the coordinator itself is gone, not just
//! slow) falls back to writing them to a local file instead of losing
//! them. A worker-child whose job function raises instead writes a
//! traceback file so the failure is diagnosable without re-running.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::Result;

/// Build `<dir>/<ISO8601>_pid_<PID>`, the emergency dump filename for
/// arguments a worker-child could not hand back to the coordinator.
#[must_use]
pub fn emergency_dump_path(dir: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
    dir.join(format!("{stamp}_pid_{}", std::process::id()))
}

/// Write `arg_blobs` (raw bincode-encoded arguments) to an emergency dump
/// file, one length-prefixed entry per argument, so they can be recovered
/// and re-submitted by hand.
pub fn write_emergency_dump(dir: &Path, arg_blobs: &[Vec<u8>]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = emergency_dump_path(dir);
    let mut file = File::create(&path)?;
    for blob in arg_blobs {
        let len = u32::try_from(blob.len()).unwrap_or(u32::MAX);
        file.write_all(&len.to_be_bytes())?;
        file.write_all(blob)?;
    }
    Ok(path)
}

/// Build `<dir>/traceback_err_<KIND>_<YYYY_MM_DD_hh_mm_ss>_<PID>.trb`.
#[must_use]
pub fn traceback_path(dir: &Path, error_kind: &str) -> PathBuf {
    let stamp = Local::now().format("%Y_%m_%d_%H_%M_%S");
    dir.join(format!("traceback_err_{error_kind}_{stamp}_{}.trb", std::process::id()))
}

/// Write a traceback file describing a job-function failure.
pub fn write_traceback(dir: &Path, error_kind: &str, message: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = traceback_path(dir, error_kind);
    let mut file = File::create(&path)?;
    file.write_all(message.as_bytes())?;
    Ok(path)
}
