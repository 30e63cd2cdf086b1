//! The RPC envelope exchanged once a connection has passed the
//! [`super::auth`] handshake.
//!
//! Every call a worker makes is one `Request` frame answered by exactly
//! one `Response` frame; there is no pipelining, mirroring the
//! synchronous one-call-at-a-time style of the connection the spec
//! describes. A fresh TCP connection (and a fresh handshake) is used per
//! logical session rather than multiplexed, matching the teacher's
//! connection-per-attempt broker pattern.

use serde::{Deserialize, Serialize};

/// The four remote objects a worker can address. Fixed rather than an
/// open string so a typo in `method` surfaces as a compile error instead
/// of a runtime `RemoteKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceTarget {
    /// The coordinator's `ArgsContainer`.
    JobQ,
    /// The coordinator's success `result_q`.
    ResultQ,
    /// The coordinator's failure `fail_q`.
    FailQ,
    /// The coordinator's read-only constant argument.
    ConstArg,
}

/// The method invoked on a [`ServiceTarget`]. Which variants are valid
/// depends on the target; the coordinator's service dispatcher rejects
/// mismatches with `RemoteKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// `job_q.get(block, timeout)`.
    Get,
    /// `job_q.put(arg)` — used by a worker re-queuing on a caught signal.
    Put,
    /// `result_q.put((arg, result))` / `fail_q.put((arg, error_kind))`.
    PutResult,
    /// `const_arg.get()` — takes no payload.
    GetConst,
}

/// One RPC request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub target: ServiceTarget,
    pub method: Method,
    /// Whether a blocking `Get` should wait; ignored by other methods.
    pub block: bool,
    /// Timeout, in milliseconds, for a blocking call.
    pub timeout_ms: u64,
    /// The bincode-encoded method arguments (empty for `GetConst`).
    pub payload: Vec<u8>,
}

/// The coordinator's typed view of why a request failed, carried in a
/// `Response::Err` so the worker can map it back to a [`crate::error::CorralError`]
/// variant without string-matching the `Display` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    Empty,
    Closed,
    AlreadyMarked,
    NotGotten,
    Remark,
    RemoteKey,
    RemoteValue,
    Other,
}

/// One RPC response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Success, carrying the bincode-encoded return value (empty for
    /// methods that return nothing, such as `Put`).
    Ok(Vec<u8>),
    /// Failure, with a classified kind plus a human-readable detail
    /// string for logs.
    Err(RemoteErrorKind, String),
}

impl Request {
    /// Encode a `Get` request against `target`.
    #[must_use]
    pub fn get(target: ServiceTarget, block: bool, timeout: std::time::Duration) -> Self {
        Self {
            target,
            method: Method::Get,
            block,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            payload: Vec::new(),
        }
    }

    /// Encode a `Put`/`PutResult` request carrying `payload`.
    #[must_use]
    pub fn put(target: ServiceTarget, method: Method, payload: Vec<u8>, timeout: std::time::Duration) -> Self {
        Self {
            target,
            method,
            block: true,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            payload,
        }
    }

    /// Encode a `GetConst` request.
    #[must_use]
    pub fn get_const() -> Self {
        Self {
            target: ServiceTarget::ConstArg,
            method: Method::GetConst,
            block: false,
            timeout_ms: 0,
            payload: Vec::new(),
        }
    }

    /// The requested timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

impl From<&crate::error::CorralError> for RemoteErrorKind {
    fn from(err: &crate::error::CorralError) -> Self {
        use crate::error::CorralError as E;
        match err {
            E::Empty => Self::Empty,
            E::Closed => Self::Closed,
            E::AlreadyMarked(_) => Self::AlreadyMarked,
            E::NotGotten(_) => Self::NotGotten,
            E::Remark(_) => Self::Remark,
            _ => Self::Other,
        }
    }
}

impl From<RemoteErrorKind> for crate::error::CorralError {
    fn from(kind: RemoteErrorKind) -> Self {
        use crate::error::CorralError as E;
        match kind {
            RemoteErrorKind::Empty => E::Empty,
            RemoteErrorKind::Closed => E::Closed,
            RemoteErrorKind::AlreadyMarked => {
                E::RemoteOther("argument already marked on coordinator".into())
            }
            RemoteErrorKind::NotGotten => {
                E::RemoteOther("argument not gotten on coordinator".into())
            }
            RemoteErrorKind::Remark => {
                E::RemoteOther("argument already marked on coordinator (remark)".into())
            }
            RemoteErrorKind::RemoteKey => E::RemoteKey("unknown remote target/method".into()),
            RemoteErrorKind::RemoteValue => {
                E::RemoteValue("arguments did not decode as expected".into())
            }
            RemoteErrorKind::Other => E::RemoteOther("remote error".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn request_round_trips_through_bincode() {
        let req = Request::put(
            ServiceTarget::ResultQ,
            Method::PutResult,
            vec![1, 2, 3],
            Duration::from_secs(5),
        );
        let bytes = bincode::serialize(&req).unwrap();
        let decoded: Request = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.timeout_ms, 5000);
        assert_eq!(decoded.payload, vec![1, 2, 3]);
    }

    #[test]
    fn response_err_round_trips() {
        let resp = Response::Err(RemoteErrorKind::Empty, "nothing pending".into());
        let bytes = bincode::serialize(&resp).unwrap();
        let decoded: Response = bincode::deserialize(&bytes).unwrap();
        assert!(matches!(decoded, Response::Err(RemoteErrorKind::Empty, _)));
    }
}
