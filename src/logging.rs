//! Shared `env_logger` initialization for both binaries.
//!
//! Every log line is tagged with a short process prefix (`coordinator`,
//! or `worker[3]` for worker-child index 3) so multi-process output
//! interleaved on one terminal or log file stays attributable.

use std::io::Write;

/// Initialize logging with `prefix` prepended to every line. Safe to
/// call once per process; a second call is a no-op (the underlying
/// `env_logger::try_init` simply reports already-initialized).
pub fn init(prefix: &str) {
    let prefix = prefix.to_string();
    let _ = env_logger::Builder::from_default_env()
        .format(move |buf, record| {
            writeln!(buf, "[{prefix}] {} {}: {}", buf.timestamp_millis(), record.level(), record.args())
        })
        .try_init();
}
