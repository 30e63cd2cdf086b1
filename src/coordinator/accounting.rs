//! Shutdown accounting block.
//!
//! Printed once, via `log::info!`, when the coordinator's main loop
//! exits — matching the crate's existing convention of structured status
//! lines rather than bare `println!` for anything other than a
//! user-facing CLI result.

/// A snapshot of the counters the coordinator logs at shutdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accounting {
    pub inserted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub queued: u64,
    pub unqueried: u64,
}

impl Accounting {
    /// `inserted - marked - |fail_q|`, the invariant the main loop holds
    /// above zero until every argument has a terminal outcome.
    #[must_use]
    pub fn outstanding(&self) -> i64 {
        i64::try_from(self.inserted).unwrap_or(i64::MAX)
            - i64::try_from(self.succeeded).unwrap_or(i64::MAX)
            - i64::try_from(self.failed).unwrap_or(i64::MAX)
    }

    /// Log the block the distilled spec calls "print accounting".
    pub fn log(&self) {
        log::info!(
            "inserted={} succeeded={} failed={} queued={} unqueried={}",
            self.inserted,
            self.succeeded,
            self.failed,
            self.queued,
            self.unqueried
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outstanding_reaches_zero_when_every_argument_has_a_terminal_outcome() {
        let acc = Accounting { inserted: 10, succeeded: 7, failed: 3, queued: 0, unqueried: 0 };
        assert_eq!(acc.outstanding(), 0);
    }
}
