//! The coordinator/worker wire protocol: framing, authentication, the
//! request/response envelope, and the worker-side client.
//!
//! A coordinator listens on a plain TCP socket. Each inbound connection
//! is authenticated once (see [`auth`]) and then serves exactly one
//! request/response pair per accepted connection — there is no
//! connection pooling on the coordinator side, matching the
//! connection-per-call style the worker's [`proxy::WireProxy`] drives.

pub mod auth;
pub mod framing;
pub mod protocol;
pub mod proxy;

pub use proxy::{RetryConfig, TypedProxy, WireProxy};
