//! `LocalDriver` — co-launches a [`Coordinator`] (on a background thread)
//! and a [`WorkerController`] (as a child-process tree) against
//! `localhost`, for single-host use without a separately started
//! coordinator.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::coordinator::Coordinator;
use crate::error::{CorralError, Result};
use crate::worker::{JobFn, WorkerConfig, WorkerController};

/// Parameters for a single-host coordinator+worker run.
pub struct LocalDriverConfig {
    pub port: u16,
    pub authkey_file: PathBuf,
    pub worker: WorkerConfig,
    /// How long to wait after binding the listener before spawning
    /// worker-children, giving the accept loop time to come up.
    pub startup_delay: Duration,
    /// How long stragglers in the worker tree get to exit on their own
    /// once the coordinator's main loop has finished, before the driver
    /// force-kills them.
    pub shutdown_timeout: Duration,
}

/// Runs a `Coordinator` and a `WorkerController` in the same process
/// tree, talking to each other over `127.0.0.1`.
pub struct LocalDriver {
    coordinator: Arc<Coordinator>,
    shutdown: Arc<AtomicBool>,
    config: LocalDriverConfig,
}

impl LocalDriver {
    /// Build a driver around an already-constructed [`Coordinator`]
    /// (callers populate it with arguments before calling [`Self::run`]).
    #[must_use]
    pub fn new(coordinator: Coordinator, config: LocalDriverConfig) -> Self {
        Self { coordinator: Arc::new(coordinator), shutdown: Arc::new(AtomicBool::new(false)), config }
    }

    /// Bind the listener, start the coordinator's accept loop and main
    /// loop on background threads, then spawn and wait for the worker
    /// tree. Blocks until both the workers finish and the coordinator's
    /// outstanding-argument invariant is satisfied.
    pub fn run<A, R, C>(&self, job_fn: impl JobFn<A, R, C> + 'static) -> Result<crate::coordinator::accounting::Accounting>
    where
        A: Serialize + DeserializeOwned + Send + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
        C: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", self.config.port)).map_err(CorralError::Io)?;
        let authkey = crate::worker::read_authkey_file(&self.config.authkey_file)?;

        let serve_listener = listener.try_clone().map_err(CorralError::Io)?;
        let serve_coordinator = Arc::clone(&self.coordinator);
        let serve_shutdown = Arc::clone(&self.shutdown);
        let serve_authkey = Arc::new(authkey);
        let accept_handle = std::thread::spawn(move || {
            if let Err(e) = serve_coordinator.serve(serve_listener, serve_authkey, &serve_shutdown) {
                log::error!("coordinator accept loop error: {e}");
            }
        });

        let run_coordinator = Arc::clone(&self.coordinator);
        let run_shutdown = Arc::clone(&self.shutdown);
        let run_handle = std::thread::spawn(move || run_coordinator.run(&run_shutdown));

        std::thread::sleep(self.config.startup_delay);

        // The worker tree runs concurrently with the coordinator's main
        // loop, draining naturally as children exhaust the job queue.
        // `self.shutdown` is only raised below, once the coordinator's own
        // exit invariant is satisfied, to bound how long stragglers get
        // before being force-killed.
        let controller = Arc::new(WorkerController::<A, R, C>::new(self.config.worker.clone(), job_fn));
        let worker_controller = Arc::clone(&controller);
        let worker_shutdown = Arc::clone(&self.shutdown);
        let shutdown_timeout = self.config.shutdown_timeout;
        let controller_handle = std::thread::spawn(move || {
            worker_controller.run_controller_with(&worker_shutdown, Some(shutdown_timeout))
        });

        let accounting = run_handle
            .join()
            .map_err(|_| CorralError::Unexpected("coordinator main loop thread panicked".into()))??;

        self.shutdown.store(true, Ordering::SeqCst);
        controller_handle
            .join()
            .map_err(|_| CorralError::Unexpected("worker controller thread panicked".into()))??;

        self.coordinator.close();
        accept_handle
            .join()
            .map_err(|_| CorralError::Unexpected("coordinator accept thread panicked".into()))?;

        Ok(accounting)
    }
}
