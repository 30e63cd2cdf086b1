//! Crate-wide default constants.
//!
//! Centralizes magic numbers so the defaults quoted in documentation and
//! CLI `--help` output stay in one place.

use std::time::Duration;

// ============================================================================
// Wire / reconnect defaults
// ============================================================================

/// Default number of times a `WireProxy` call retries connect+invoke before
/// giving up with `ConnectionError`.
pub const DEFAULT_RECONNECT_TRIES: u32 = 3;

/// Default back-off between reconnect attempts.
pub const DEFAULT_RECONNECT_WAIT: Duration = Duration::from_secs(2);

/// Default per-attempt timeout for the reachability probe.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Default number of reachability-probe attempts before `HostUnreachable`.
pub const DEFAULT_PING_RETRY: u32 = 3;

/// Default TCP connect timeout, independent of the reachability probe.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Coordinator defaults
// ============================================================================

/// Default coordinator listening port.
pub const DEFAULT_PORT: u16 = 42524;

/// Default poll interval for the coordinator's main loop between
/// `result_q` drains; also the cadence of progress-line updates.
pub const DEFAULT_MSG_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Worker defaults
// ============================================================================

/// Default timeout a worker-child blocks on `job_q.get` before treating the
/// queue as drained and exiting quietly.
pub const DEFAULT_JOB_Q_TIMEOUT: Duration = Duration::from_secs(2);

/// Default timeout for a worker-child's `result_q.put`/`fail_q.put` calls.
pub const DEFAULT_RESULT_Q_TIMEOUT: Duration = Duration::from_secs(10);

/// `njobs <= 0` means unbounded completions per worker-child; internally
/// represented as this sentinel.
pub const UNBOUNDED_NJOBS: i64 = -1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_defaults_are_reasonable() {
        assert!(DEFAULT_RECONNECT_TRIES >= 1);
        assert!(DEFAULT_RECONNECT_WAIT >= Duration::from_millis(100));
        assert!(DEFAULT_PING_RETRY >= 1);
    }
}
