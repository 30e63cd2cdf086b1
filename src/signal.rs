//! Process-wide shutdown-signal plumbing shared by the coordinator and
//! worker binaries.
//!
//! `SIGINT`/`SIGTERM` both map to "begin shutdown" everywhere in this
//! crate (§5): the signal flips an `AtomicBool` rather than doing any
//! real work from inside the handler itself, and each component's own
//! main loop observes the flag at its next poll.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;

/// Install a process-wide `SIGINT`/`SIGTERM` handler that sets the
/// returned flag. Safe to call once per process; a second call is a
/// (harmless) no-op on most platforms since `ctrlc` itself guards against
/// double registration of `SIGINT`, and `signal_hook` iterators are
/// additive.
pub fn install_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let for_ctrlc = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        for_ctrlc.store(true, Ordering::SeqCst);
    })
    .map_err(|e| crate::error::CorralError::Unexpected(format!("failed to install SIGINT handler: {e}")))?;

    #[cfg(unix)]
    {
        let for_term = Arc::clone(&flag);
        let mut signals = signal_hook::iterator::Signals::new([signal_hook::consts::SIGTERM])
            .map_err(|e| crate::error::CorralError::Unexpected(format!("failed to install SIGTERM handler: {e}")))?;
        std::thread::spawn(move || {
            for _ in signals.forever() {
                for_term.store(true, Ordering::SeqCst);
            }
        });
    }

    Ok(flag)
}
