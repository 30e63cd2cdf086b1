//! Crate-wide error taxonomy.
//!
//! One `thiserror`-derived enum covers every failure mode described in the
//! container, queue, and wire layers. Call sites outside the library
//! (the two binaries) wrap these in `anyhow::Context` for human messages.

use std::fmt;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, CorralError>;

/// Every typed failure mode a `corral` component can surface.
#[derive(thiserror::Error, Debug)]
pub enum CorralError {
    /// A `put` found the id already in `marked`.
    #[error("argument already marked: {0}")]
    AlreadyMarked(ArgIdDisplay),

    /// A `put` for a fresh id collided with one already inserted.
    #[error("duplicate argument id: {0}")]
    Duplicate(ArgIdDisplay),

    /// A `mark` was attempted on an id that isn't `gotten`.
    #[error("argument not gotten: {0}")]
    NotGotten(ArgIdDisplay),

    /// A `mark` was attempted twice on the same id. Non-fatal; callers log
    /// and continue rather than propagate this as a hard error.
    #[error("remark of already-marked argument: {0}")]
    Remark(ArgIdDisplay),

    /// `get`/`pop` found nothing available before the timeout elapsed.
    #[error("empty")]
    Empty,

    /// The container or queue has been closed.
    #[error("closed")]
    Closed,

    /// The HMAC challenge/response handshake failed.
    #[error("authentication failed")]
    Auth,

    /// The reachability probe exhausted its retries.
    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    /// The peer actively refused the connection (server process absent).
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The connect/invoke retry budget (`reconnect_tries`) was exhausted.
    #[error("connection error after retries: {0}")]
    ConnectionError(String),

    /// The remote service object named in a request frame doesn't exist.
    #[error("remote key error: {0}")]
    RemoteKey(String),

    /// The remote call's arguments didn't deserialize as the target expected.
    #[error("remote value error: {0}")]
    RemoteValue(String),

    /// Any other error the remote side reported.
    #[error("remote error: {0}")]
    RemoteOther(String),

    /// A spill-store directory is already owned by another open container.
    #[error("spill directory already open: {0}")]
    SpillAlreadyOpen(std::path::PathBuf),

    /// Wraps `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wraps a `bincode` (de)serialization failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),

    /// Wraps a `sled` storage failure.
    #[error("spill store error: {0}")]
    Sled(#[from] sled::Error),

    /// A condition that should be structurally impossible.
    #[error("unexpected: {0}")]
    Unexpected(String),
}

/// A small `Display` wrapper so `ArgId` (a raw 32-byte digest) shows as a
/// short hex prefix in error messages instead of a multi-line debug dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgIdDisplay(pub crate::argument::ArgId);

impl fmt::Display for ArgIdDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 .0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "…")
    }
}
