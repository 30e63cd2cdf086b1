//! `WorkerController` — a multi-process local worker pool that fetches
//! arguments from a remote [`crate::coordinator::Coordinator`], executes
//! a user-supplied function, and pushes results or failures back.
//!
//! Each of the `nproc` children is a genuine OS process: the controller
//! re-execs `std::env::current_exe()` with a `--worker-child <index>`
//! flag rather than forking, since Rust (unlike the source this crate's
//! design was distilled from) has no portable `fork()`-after-threads
//! story. Re-exec also gives each child isolation from another child's
//! panic, without the controller needing `catch_unwind` gymnastics of
//! its own.

pub mod dump;
pub mod shared_counters;
pub mod signals;

use std::io::Read;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CorralError, Result};
use crate::wire::{RetryConfig, TypedProxy, WireProxy};
use shared_counters::SharedCounters;
use signals::ShutdownMode;

/// A job function's reported failure: an error kind tag (used for the
/// `fail_q` record and traceback filename) plus a human-readable detail.
#[derive(Debug, Clone)]
pub struct JobError {
    pub kind: String,
    pub message: String,
}

impl JobError {
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }
}

/// The user's per-argument computation, optionally observing a pair of
/// shared progress counters (`count`, `max_count`) it may update as it
/// works through a long-running argument.
///
/// This is the explicit capability §9's design notes call for in place of
/// sniffing a Python function's parameter names: a plain
/// `Fn(&A, &C) -> Result<R, JobError>` closure is a `JobFn` directly (the
/// counters are simply never touched — "wrapped to ignore them"); a
/// closure that wants to report progress implements the four-argument
/// form via the [`WithCounters`] wrapper instead of name-sniffing.
pub trait JobFn<A, R, C>: Send + Sync {
    fn call(
        &self,
        arg: &A,
        const_arg: &C,
        counter: &AtomicU64,
        max_counter: &AtomicU64,
    ) -> std::result::Result<R, JobError>;
}

impl<A, R, C, F> JobFn<A, R, C> for F
where
    F: Fn(&A, &C) -> std::result::Result<R, JobError> + Send + Sync,
{
    fn call(
        &self,
        arg: &A,
        const_arg: &C,
        _counter: &AtomicU64,
        _max_counter: &AtomicU64,
    ) -> std::result::Result<R, JobError> {
        self(arg, const_arg)
    }
}

/// Wraps a closure that accepts the shared progress counters directly:
/// `Fn(&A, &C, &AtomicU64, &AtomicU64) -> Result<R, JobError>`. Use this
/// when the job function itself wants to report fine-grained progress
/// (e.g. sub-steps within one argument) rather than leaving `count` to
/// the controller's own per-job bookkeeping.
pub struct WithCounters<F>(pub F);

impl<A, R, C, F> JobFn<A, R, C> for WithCounters<F>
where
    F: Fn(&A, &C, &AtomicU64, &AtomicU64) -> std::result::Result<R, JobError> + Send + Sync,
{
    fn call(
        &self,
        arg: &A,
        const_arg: &C,
        counter: &AtomicU64,
        max_counter: &AtomicU64,
    ) -> std::result::Result<R, JobError> {
        (self.0)(arg, const_arg, counter, max_counter)
    }
}

/// Connection, process-pool, and bookkeeping parameters for a worker run.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub host: String,
    pub port: u16,
    /// Path to the file holding the shared HMAC key. Passed to child
    /// processes via `CORRAL_AUTHKEY_FILE` rather than inline, so the
    /// key never shows up in a process listing.
    pub authkey_file: PathBuf,
    /// `> 0`: exactly that many children. `0`: one per available core.
    /// `< 0`: `available_parallelism() + nproc`, floored at 1.
    pub nproc: i64,
    /// `<= 0`: unbounded completions per child.
    pub njobs: i64,
    pub retry: RetryConfig,
    pub job_q_timeout: Duration,
    pub result_q_timeout: Duration,
    pub fname_dump: Option<PathBuf>,
    pub niceness: Option<i32>,
    pub counters_path: Option<PathBuf>,
}

impl WorkerConfig {
    fn load_authkey(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(&self.authkey_file)?)
    }

    /// Resolve [`Self::nproc`] against the machine's available
    /// parallelism, per the sum-type selector above.
    #[must_use]
    pub fn resolved_nproc(&self) -> usize {
        let available = std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1) as i64;
        match self.nproc {
            n if n > 0 => n as usize,
            0 => available.max(1) as usize,
            n => (available + n).max(1) as usize,
        }
    }
}

/// The controller (parent process) side of a worker pool, generic over
/// the argument (`A`), result (`R`), and constant-argument (`C`) types
/// the job function operates on.
pub struct WorkerController<A, R, C> {
    config: WorkerConfig,
    job_fn: Arc<dyn JobFn<A, R, C>>,
}

impl<A, R, C> WorkerController<A, R, C>
where
    A: Serialize + DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    C: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(config: WorkerConfig, job_fn: impl JobFn<A, R, C> + 'static) -> Self {
        Self { config, job_fn: Arc::new(job_fn) }
    }

    /// Spawn `resolved_nproc()` worker-child processes, wait for them, and
    /// honor `SIGINT`/`SIGTERM` with an interactive quit/show-identity
    /// prompt (see [`signals::prompt_shutdown_mode`]).
    pub fn run_controller(&self) -> Result<()> {
        let none = AtomicBool::new(false);
        self.run_controller_with(&none, None)
    }

    /// As [`Self::run_controller`], but the wait loop also exits once
    /// `external_shutdown` is observed true — used by
    /// [`crate::LocalDriver`] to tear the worker tree down once the
    /// coordinator's own main loop has finished, without going through an
    /// OS signal. If the children are still alive `force_kill_after`
    /// after `external_shutdown` was raised, they're force-killed rather
    /// than waited on indefinitely.
    pub fn run_controller_with(&self, external_shutdown: &AtomicBool, force_kill_after: Option<Duration>) -> Result<()> {
        let nproc = self.config.resolved_nproc();
        let shutdown = signals::install_shutdown_flag()?;

        let counters_path = self
            .config
            .counters_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("corral-counters-{}", std::process::id())));
        let counters = SharedCounters::create(&counters_path, nproc)?;
        for i in 0..nproc {
            counters.reset(i, 0);
        }

        let current_exe = std::env::current_exe()?;
        let mut children = Vec::with_capacity(nproc);
        for i in 0..nproc {
            let mut cmd = Command::new(&current_exe);
            cmd.arg("--worker-child").arg(i.to_string());
            cmd.env("CORRAL_SERVER", &self.config.host);
            cmd.env("CORRAL_PORT", self.config.port.to_string());
            cmd.env("CORRAL_AUTHKEY_FILE", &self.config.authkey_file);
            cmd.env("CORRAL_NJOBS", self.config.njobs.to_string());
            cmd.env("CORRAL_COUNTERS_PATH", &counters_path);
            cmd.env("CORRAL_WORKER_INDEX", i.to_string());
            if let Some(nice) = self.config.niceness {
                cmd.env("CORRAL_NICE", nice.to_string());
            }
            children.push(cmd.spawn()?);
        }
        log::info!("spawned {nproc} worker-child processes");

        let mut external_since: Option<Instant> = None;
        loop {
            let all_exited = children
                .iter_mut()
                .all(|c| matches!(c.try_wait(), Ok(Some(_))));
            if all_exited {
                break;
            }
            if shutdown.load(Ordering::SeqCst) {
                match prompt_once(&shutdown) {
                    ShutdownMode::Quit => {
                        // Children notice the same signal themselves, finish
                        // re-queuing their held argument, and exit; nothing
                        // further to do here but keep waiting for them.
                    }
                    ShutdownMode::ShowIdentity => {
                        log::info!(
                            "worker-child tree is talking to coordinator at {}:{}",
                            self.config.host, self.config.port
                        );
                        // The signal was just a query, not a shutdown request.
                        shutdown.store(false, Ordering::SeqCst);
                    }
                }
            }
            if external_shutdown.load(Ordering::SeqCst) {
                let since = *external_since.get_or_insert_with(Instant::now);
                if let Some(limit) = force_kill_after {
                    if since.elapsed() >= limit {
                        log::warn!("worker-child tree still alive {limit:?} after shutdown; force-killing");
                        for child in &mut children {
                            let _ = child.kill();
                        }
                        break;
                    }
                }
            }
            std::thread::sleep(Duration::from_millis(200));
        }
        for child in &mut children {
            let _ = child.wait();
        }
        let _ = std::fs::remove_file(&counters_path);
        Ok(())
    }

    /// Run as worker-child `index`: connect, fetch, execute, report,
    /// until the job queue drains, `njobs` is reached, or a shutdown
    /// signal arrives between a `get` and its matching `call`.
    pub fn run_child(&self, index: usize) -> Result<()> {
        lower_niceness(self.config.niceness);
        let shutdown = signals::install_shutdown_flag()?;

        let authkey = self.config.load_authkey()?;
        let proxy = WireProxy::connect_to(&self.config.host, self.config.port, authkey, self.config.retry)?;
        let typed: TypedProxy<A, R, C> = TypedProxy::new(proxy);
        let const_arg = typed.const_arg_get()?;
        let hostname = current_hostname();

        let counters = match &self.config.counters_path {
            Some(path) => match SharedCounters::open_writable(path, index + 1) {
                Ok(c) => Some(c),
                Err(e) => {
                    log::warn!("worker-child {index}: failed to map shared counters at {}: {e}", path.display());
                    None
                }
            },
            None => None,
        };
        let local_counter = AtomicU64::new(0);
        let local_max_counter = AtomicU64::new(0);
        let (counter, max_counter) = match &counters {
            Some(c) => c.slot_refs(index),
            None => (&local_counter, &local_max_counter),
        };

        let budget = if self.config.njobs <= 0 { None } else { Some(self.config.njobs as u64) };
        let mut completed = 0u64;

        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            if let Some(limit) = budget {
                if completed >= limit {
                    break;
                }
            }

            let arg = match typed.job_q_get(true, self.config.job_q_timeout) {
                Ok(arg) => arg,
                Err(CorralError::Empty | CorralError::Closed) => break,
                Err(e) => {
                    log::warn!("worker-child {index}: job_q.get failed: {e}");
                    std::thread::sleep(self.config.retry.reconnect_wait);
                    continue;
                }
            };

            if shutdown.load(Ordering::SeqCst) {
                if let Err(e) = typed.job_q_put(&arg) {
                    log::error!("worker-child {index}: failed to re-queue on shutdown: {e}");
                }
                break;
            }

            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.job_fn.call(&arg, &const_arg, counter, max_counter)
            }));

            match outcome {
                Ok(Ok(result)) => {
                    match typed.result_q_put(&arg, &result, self.config.result_q_timeout) {
                        Ok(()) => completed += 1,
                        Err(e) => {
                            // The coordinator itself is unreachable, not just
                            // this one call; there is nowhere left to report
                            // the result, so it is dumped locally and the
                            // child exits rather than silently dropping it.
                            log::error!(
                                "worker-child {index}: result_q.put failed ({e}); emergency-dumping (arg, result) and exiting"
                            );
                            let dir = self.config.fname_dump.clone().unwrap_or_else(std::env::temp_dir);
                            match bincode::serialize(&(&arg, &result)) {
                                Ok(blob) => {
                                    if let Err(dump_err) = dump::write_emergency_dump(&dir, &[blob]) {
                                        log::error!("worker-child {index}: emergency dump also failed: {dump_err}");
                                    }
                                }
                                Err(enc_err) => {
                                    log::error!("worker-child {index}: could not encode emergency dump: {enc_err}");
                                }
                            }
                            return Ok(());
                        }
                    }
                }
                Ok(Err(job_err)) => {
                    if let Some(dir) = &self.config.fname_dump {
                        if let Err(e) = dump::write_traceback(dir, &job_err.kind, &job_err.message) {
                            log::warn!("worker-child {index}: failed to write traceback: {e}");
                        }
                    }
                    if let Err(e) = typed.fail_q_put(&arg, &job_err.kind, &hostname, self.config.result_q_timeout) {
                        log::error!("worker-child {index}: fail_q.put failed: {e}");
                    }
                }
                Err(panic_payload) => {
                    let message = panic_message(&panic_payload);
                    if let Some(dir) = &self.config.fname_dump {
                        if let Err(e) = dump::write_traceback(dir, "Panic", &message) {
                            log::warn!("worker-child {index}: failed to write traceback: {e}");
                        }
                    }
                    if let Err(e) = typed.fail_q_put(&arg, "Panic", &hostname, self.config.result_q_timeout) {
                        log::error!("worker-child {index}: fail_q.put failed: {e}");
                    }
                }
            }
        }
        Ok(())
    }
}

fn prompt_once(shutdown: &std::sync::atomic::AtomicBool) -> ShutdownMode {
    // Only ask once per signal; a second SIGINT while waiting on the
    // prompt is handled naturally since `shutdown` is already latched.
    shutdown.store(true, Ordering::SeqCst);
    signals::prompt_shutdown_mode()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker job panicked with a non-string payload".to_string()
    }
}

fn current_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(unix)]
fn lower_niceness(niceness: Option<i32>) {
    if let Some(n) = niceness {
        // SAFETY: `setpriority` with `PRIO_PROCESS` and pid 0 only ever
        // affects the calling process's own scheduling priority.
        unsafe {
            libc::setpriority(libc::PRIO_PROCESS, 0, n);
        }
    }
}

#[cfg(not(unix))]
fn lower_niceness(_niceness: Option<i32>) {}

/// Read an authkey passed via the `CORRAL_AUTHKEY_FILE` environment
/// variable, as a worker-child started by [`WorkerController::run_controller`]
/// would.
pub fn authkey_file_from_env() -> Result<PathBuf> {
    std::env::var_os("CORRAL_AUTHKEY_FILE")
        .map(PathBuf::from)
        .ok_or_else(|| CorralError::Unexpected("CORRAL_AUTHKEY_FILE not set".into()))
}

/// Read the full contents of `path` as a byte string (used for the
/// authkey file both the controller and `corral-coordinator` read).
pub fn read_authkey_file(path: &std::path::Path) -> Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}
