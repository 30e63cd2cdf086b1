//! `corral`: a distributed job-dispatch framework.
//!
//! One [`coordinator::Coordinator`] holds a queue of work arguments
//! ([`argument`], [`container`]) and a map of results; many remote
//! [`worker::WorkerController`] processes pull arguments over an
//! authenticated TCP connection ([`wire`]), execute a user-supplied
//! function, and push results back through a [`queue::ClosableQueue`].
//! [`local_driver`] co-launches both halves on one host; [`snapshot`]
//! persists and restores a coordinator's state across restarts.

pub mod argument;
pub mod config;
pub mod constants;
pub mod container;
pub mod coordinator;
pub mod error;
pub mod local_driver;
pub mod logging;
pub mod queue;
pub mod signal;
pub mod snapshot;
pub mod wire;
pub mod worker;

pub use argument::ArgId;
pub use container::ArgsContainer;
pub use coordinator::Coordinator;
pub use error::{CorralError, Result};
pub use local_driver::{LocalDriver, LocalDriverConfig};
pub use queue::ClosableQueue;
pub use snapshot::Snapshot;
pub use worker::{JobError, JobFn, WorkerConfig, WorkerController};
