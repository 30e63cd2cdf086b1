//! Signal handling for both the worker controller and its children.
//!
//! A worker-child catches `SIGINT`/`SIGTERM` by flipping an
//! `AtomicBool`, finishes re-queuing whatever argument it currently
//! holds, and exits — it never tries to do real work from inside a
//! signal handler. The controller, when attached to a real terminal,
//! offers an interactive choice between quitting (children finish
//! re-queuing on their own) and printing the coordinator it's talking to
//! and continuing to wait; when not attached to a terminal (piped,
//! backgrounded, under a test harness) it always quits, since there's
//! nobody to answer the prompt.

use std::io::{self, BufRead, Write};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::Result;

/// How the controller should respond to a `SIGINT` while waiting on its
/// worker-child tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Let children re-queue their held argument and exit on their own.
    Quit,
    /// Print the coordinator this controller is talking to and keep
    /// waiting — the signal is consumed, not a shutdown request.
    ShowIdentity,
}

/// Install a process-wide `SIGINT`/`SIGTERM` handler that sets the
/// returned flag. See [`crate::signal::install_shutdown_flag`]; the
/// worker controller and its children share the coordinator's own
/// installer rather than a separate implementation.
pub fn install_shutdown_flag() -> Result<Arc<AtomicBool>> {
    crate::signal::install_shutdown_flag()
}

/// Ask the operator, if there's a terminal to ask on, whether to (q)uit —
/// letting children re-queue and exit — or (i) print the coordinator this
/// controller is talking to. Returns `Quit` without prompting when stdin
/// isn't a TTY, since there's nobody to answer.
#[must_use]
pub fn prompt_shutdown_mode() -> ShutdownMode {
    if !atty::is(atty::Stream::Stdin) {
        return ShutdownMode::Quit;
    }
    eprint!("\nSIGINT received — (q)uit or (i) show server identity? [q] ");
    io::stderr().flush().ok();
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return ShutdownMode::Quit;
    }
    match line.trim() {
        "i" | "I" => ShutdownMode::ShowIdentity,
        _ => ShutdownMode::Quit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_without_a_tty_is_quit() {
        // The test harness's stdin is never a real TTY.
        assert_eq!(prompt_shutdown_mode(), ShutdownMode::Quit);
    }
}
