//! Dispatch of an authenticated [`Request`] frame against a
//! [`super::Coordinator`]'s shared state.
//!
//! The coordinator never deserializes an argument, result, or constant
//! into a concrete Rust type — every value crosses the wire as an opaque
//! `Vec<u8>` blob that only the worker's `TypedProxy` (and the user's own
//! code) knows how to interpret. This is what lets one coordinator binary
//! serve any argument/result type without being generic over either.

use crate::coordinator::Coordinator;
use crate::error::CorralError;
use crate::wire::protocol::{Method, RemoteErrorKind, Request, Response, ServiceTarget};

/// Handle one request, producing the response frame to send back.
///
/// Never returns `Err` itself — every failure mode the coordinator can
/// hit while servicing a request is representable as a `Response::Err`,
/// so a single malformed or mistimed request never tears down the
/// connection thread without a reply.
pub fn dispatch(coordinator: &Coordinator, request: &Request) -> Response {
    match (request.target, request.method) {
        (ServiceTarget::JobQ, Method::Get) => {
            match coordinator.jobs.get(request.block, request.timeout()) {
                Ok((_id, bytes)) => Response::Ok(bytes),
                Err(e) => to_response_err(&e),
            }
        }
        (ServiceTarget::JobQ, Method::Put) => {
            match coordinator.jobs.put(&request.payload) {
                Ok(()) => Response::Ok(Vec::new()),
                Err(e) => to_response_err(&e),
            }
        }
        (ServiceTarget::ResultQ, Method::PutResult) => {
            match bincode::deserialize::<(Vec<u8>, Vec<u8>)>(&request.payload) {
                Ok((arg_bytes, result_bytes)) => {
                    match coordinator.offer_result(arg_bytes, result_bytes, request.timeout()) {
                        Ok(()) => Response::Ok(Vec::new()),
                        Err(e) => to_response_err(&e),
                    }
                }
                Err(_) => Response::Err(
                    RemoteErrorKind::RemoteValue,
                    "expected (argument, result) payload".into(),
                ),
            }
        }
        (ServiceTarget::FailQ, Method::PutResult) => {
            match bincode::deserialize::<(Vec<u8>, String, String)>(&request.payload) {
                Ok((arg_bytes, error_kind, hostname)) => {
                    match coordinator.offer_failure(arg_bytes, error_kind, hostname, request.timeout())
                    {
                        Ok(()) => Response::Ok(Vec::new()),
                        Err(e) => to_response_err(&e),
                    }
                }
                Err(_) => Response::Err(
                    RemoteErrorKind::RemoteValue,
                    "expected (argument, error_kind, hostname) payload".into(),
                ),
            }
        }
        (ServiceTarget::ConstArg, Method::GetConst) => match coordinator.const_arg_bytes() {
            Some(bytes) => Response::Ok(bytes),
            None => Response::Err(RemoteErrorKind::Empty, "no constant argument configured".into()),
        },
        _ => Response::Err(
            RemoteErrorKind::RemoteKey,
            format!("{:?}/{:?} is not a valid target/method pair", request.target, request.method),
        ),
    }
}

fn to_response_err(err: &CorralError) -> Response {
    let kind = RemoteErrorKind::from(err);
    Response::Err(kind, err.to_string())
}
