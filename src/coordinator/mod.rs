//! `Coordinator` — owns the shared `ArgsContainer`/`ClosableQueue`
//! trio, serves them over the wire, drives the accounting main loop, and
//! snapshots on shutdown.
//!
//! The coordinator is deliberately untyped: every argument, result, and
//! constant crosses its boundary as an opaque `Vec<u8>` blob (see
//! [`service`]). This is what lets one `corral-coordinator` binary serve
//! any user argument/result type without the coordinator itself being
//! generic, matching the "OUT OF SCOPE: the user's computation function"
//! boundary.

pub mod accounting;
pub mod service;

use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

use crate::argument::ArgId;
use crate::container::ArgsContainer;
use crate::error::{CorralError, Result};
use crate::queue::ClosableQueue;
use crate::snapshot::{FailureRecord, ResultRecord, Snapshot, SNAPSHOT_VERSION};
use crate::wire::auth;
use crate::wire::framing::{read_frame, write_frame};
use crate::wire::protocol::Request;

use accounting::Accounting;

const DEFAULT_RESULT_Q_CAPACITY: usize = 1024;
const DEFAULT_MAX_CONNECTIONS: usize = 64;

type NewResultHook = Box<dyn FnMut(&[u8], &[u8]) + Send>;
type FinalResultHook = Box<dyn FnMut(&[(Vec<u8>, Vec<u8>)]) + Send>;

#[derive(Default)]
struct Hooks {
    on_new_result: Option<NewResultHook>,
    on_final_result: Option<FinalResultHook>,
}

struct FailureEntry {
    id: ArgId,
    arg_bytes: Vec<u8>,
    error_kind: String,
    hostname: String,
}

/// Bounds the number of connection-handler threads running at once. RPCs
/// are short-lived request/response pairs, so a small cap is enough to
/// avoid an unbounded thread per inbound connection without pulling in a
/// thread-pool crate.
struct ConnectionLimiter {
    state: Mutex<usize>,
    available: Condvar,
    max: usize,
}

impl ConnectionLimiter {
    fn new(max: usize) -> Self {
        Self { state: Mutex::new(0), available: Condvar::new(), max }
    }

    fn acquire(&self) {
        let mut active = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while *active >= self.max {
            active = self.available.wait(active).unwrap_or_else(|e| e.into_inner());
        }
        *active += 1;
    }

    fn release(&self) {
        let mut active = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *active -= 1;
        drop(active);
        self.available.notify_one();
    }
}

/// The coordinator's shared state, servable over the wire and drivable
/// through its accounting main loop.
pub struct Coordinator {
    jobs: Arc<ArgsContainer<Vec<u8>>>,
    result_q: Arc<ClosableQueue<(Vec<u8>, Vec<u8>)>>,
    fail_q: Arc<ClosableQueue<(Vec<u8>, String, String)>>,
    const_arg: Option<Vec<u8>>,
    num_succeeded: AtomicU64,
    num_failed: AtomicU64,
    final_result: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
    failures: Mutex<Vec<FailureEntry>>,
    shutting_down: AtomicBool,
    msg_interval: Duration,
    hooks: Mutex<Hooks>,
    limiter: ConnectionLimiter,
}

impl Coordinator {
    /// Build a coordinator backed purely by memory.
    #[must_use]
    pub fn new(const_arg: Option<Vec<u8>>, msg_interval: Duration) -> Self {
        Self::with_jobs(ArgsContainer::in_memory(), const_arg, msg_interval)
    }

    /// Build a coordinator whose job queue spills to `dir`.
    pub fn with_spill_dir(dir: &Path, const_arg: Option<Vec<u8>>, msg_interval: Duration) -> Result<Self> {
        Ok(Self::with_jobs(ArgsContainer::with_spill_dir(dir)?, const_arg, msg_interval))
    }

    /// Rebuild a coordinator from a previously written [`Snapshot`],
    /// re-deriving `pending` per §9's restore rule and restoring
    /// accounting counters (`num_succeeded`/`failures`) directly from the
    /// snapshot rather than recomputing them.
    pub fn restore(snapshot: &Snapshot, spill_dir: Option<&Path>, const_arg: Option<Vec<u8>>, msg_interval: Duration) -> Result<Self> {
        let jobs = ArgsContainer::restore_from_snapshot(snapshot, spill_dir)?;
        let coordinator = Self::with_jobs(jobs, const_arg, msg_interval);
        coordinator.num_succeeded.store(snapshot.num_succeeded, Ordering::SeqCst);
        let mut failures = coordinator.failures.lock().unwrap_or_else(|e| e.into_inner());
        for f in &snapshot.failures {
            failures.push(FailureEntry {
                id: f.id,
                arg_bytes: f.argument.clone(),
                error_kind: f.error_kind.clone(),
                hostname: f.hostname.clone(),
            });
        }
        drop(failures);
        *coordinator.final_result.lock().unwrap_or_else(|e| e.into_inner()) = snapshot
            .final_result
            .iter()
            .map(|r| (r.argument.clone(), r.result.clone()))
            .collect();
        Ok(coordinator)
    }

    fn with_jobs(jobs: ArgsContainer<Vec<u8>>, const_arg: Option<Vec<u8>>, msg_interval: Duration) -> Self {
        Self {
            jobs: Arc::new(jobs),
            result_q: Arc::new(ClosableQueue::new(DEFAULT_RESULT_Q_CAPACITY)),
            fail_q: Arc::new(ClosableQueue::new(DEFAULT_RESULT_Q_CAPACITY)),
            const_arg,
            num_succeeded: AtomicU64::new(0),
            num_failed: AtomicU64::new(0),
            final_result: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            msg_interval,
            hooks: Mutex::new(Hooks::default()),
            limiter: ConnectionLimiter::new(DEFAULT_MAX_CONNECTIONS),
        }
    }

    /// Register a callback invoked (on the main loop's thread) for every
    /// successful result as it is drained from `result_q`. Default: none.
    pub fn on_new_result<F>(&mut self, hook: F)
    where
        F: FnMut(&[u8], &[u8]) + Send + 'static,
    {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner()).on_new_result = Some(Box::new(hook));
    }

    /// Register a callback invoked once, at shutdown, with the full
    /// `final_result` set. Default: none (the accounting block is always
    /// logged regardless of whether this hook is set).
    pub fn on_final_result<F>(&mut self, hook: F)
    where
        F: FnMut(&[(Vec<u8>, Vec<u8>)]) + Send + 'static,
    {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner()).on_final_result = Some(Box::new(hook));
    }

    /// Insert one raw argument blob.
    pub fn insert(&self, arg_bytes: Vec<u8>) -> Result<()> {
        self.jobs.put(&arg_bytes)
    }

    pub(crate) fn offer_result(&self, arg_bytes: Vec<u8>, result_bytes: Vec<u8>, timeout: Duration) -> Result<()> {
        self.result_q.put((arg_bytes, result_bytes), timeout)
    }

    pub(crate) fn offer_failure(&self, arg_bytes: Vec<u8>, error_kind: String, hostname: String, timeout: Duration) -> Result<()> {
        self.fail_q.put((arg_bytes, error_kind, hostname), timeout)
    }

    pub(crate) fn const_arg_bytes(&self) -> Option<Vec<u8>> {
        self.const_arg.clone()
    }

    /// Current accounting snapshot.
    #[must_use]
    pub fn accounting(&self) -> Accounting {
        Accounting {
            inserted: u64::try_from(self.jobs.num_inserted()).unwrap_or(u64::MAX),
            succeeded: self.num_succeeded.load(Ordering::SeqCst),
            failed: self.num_failed.load(Ordering::SeqCst),
            queued: u64::try_from(self.jobs.qsize()).unwrap_or(u64::MAX),
            unqueried: u64::try_from(self.jobs.gotten_items().len()).unwrap_or(u64::MAX),
        }
    }

    /// Accept connections on `listener`, authenticating each with
    /// `authkey` and dispatching its single request/response pair, until
    /// `shutdown` is observed true and `listener` is dropped by the
    /// caller. Runs on the calling thread; callers typically run this on
    /// a dedicated accept thread alongside [`Self::run`] on the main one.
    pub fn serve(self: &Arc<Self>, listener: TcpListener, authkey: Arc<Vec<u8>>, shutdown: &AtomicBool) -> Result<()> {
        listener.set_nonblocking(true)?;
        while !shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    self.limiter.acquire();
                    let coordinator = Arc::clone(self);
                    let authkey = Arc::clone(&authkey);
                    std::thread::spawn(move || {
                        // Guarantees the permit is released even if a malformed
                        // frame or a bincode panic unwinds out of the handler,
                        // not just on its ordinary return path.
                        let _release_guard = scopeguard::guard(Arc::clone(&coordinator), |c| c.limiter.release());
                        if let Err(e) = handle_connection(&coordinator, stream, &authkey) {
                            log::warn!("connection handler error: {e}");
                        }
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(CorralError::Io(e)),
            }
        }
        Ok(())
    }

    /// Drain `result_q`/`fail_q` and update accounting until the
    /// outstanding invariant (`inserted - succeeded - failed <= 0`) holds
    /// — per §4.D, "exit when the invariant reaches zero" on its own, with
    /// `shutdown` only marking the point after which late results are
    /// dropped rather than appended to `final_result` — then log the
    /// final accounting block and return it.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<Accounting> {
        loop {
            match self.result_q.get(self.msg_interval) {
                Ok((arg_bytes, result_bytes)) => match self.jobs.mark(&arg_bytes) {
                    Ok(()) => {
                        self.num_succeeded.fetch_add(1, Ordering::SeqCst);
                        if !self.shutting_down.load(Ordering::SeqCst) {
                            let mut hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
                            if let Some(cb) = hooks.on_new_result.as_mut() {
                                cb(&arg_bytes, &result_bytes);
                            }
                            drop(hooks);
                            self.final_result
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .push((arg_bytes, result_bytes));
                        }
                    }
                    // A duplicate/late result for an id already `marked` (e.g. a
                    // retried `result_q_put` whose earlier OK reply was lost, or
                    // a success racing a fail_q-driven mark) is a warning, not a
                    // fatal condition — the id's outcome is already accounted
                    // for, so this result is simply dropped.
                    Err(e @ (CorralError::Remark(_) | CorralError::NotGotten(_))) => {
                        log::warn!("ignoring result for {e}");
                    }
                    Err(e) => return Err(e),
                },
                Err(CorralError::Empty) => {}
                Err(CorralError::Closed) => break,
                Err(e) => return Err(e),
            }

            loop {
                match self.fail_q.get(Duration::ZERO) {
                    Ok((arg_bytes, error_kind, hostname)) => {
                        let id = ArgId::of(&arg_bytes)?;
                        match self.jobs.mark_id(id) {
                            Ok(()) => {
                                self.num_failed.fetch_add(1, Ordering::SeqCst);
                                self.failures
                                    .lock()
                                    .unwrap_or_else(|e| e.into_inner())
                                    .push(FailureEntry { id, arg_bytes, error_kind, hostname });
                            }
                            Err(e @ (CorralError::Remark(_) | CorralError::NotGotten(_))) => {
                                log::warn!("ignoring failure for {e}");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    Err(CorralError::Empty | CorralError::Closed) => break,
                    Err(e) => return Err(e),
                }
            }

            if shutdown.load(Ordering::Relaxed) {
                self.shutting_down.store(true, Ordering::SeqCst);
            }
            if self.accounting().outstanding() <= 0 {
                break;
            }
        }

        self.shutting_down.store(true, Ordering::SeqCst);
        let final_acc = self.accounting();
        final_acc.log();
        let mut hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cb) = hooks.on_final_result.as_mut() {
            cb(&self.final_result.lock().unwrap_or_else(|e| e.into_inner()));
        }
        Ok(final_acc)
    }

    /// Build a [`Snapshot`] of the coordinator's current state.
    pub fn export_snapshot(&self) -> Result<Snapshot> {
        let (argument_order, argument_store, marked) = self.jobs.export_for_snapshot()?;
        let final_result = self
            .final_result
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(arg, result)| ResultRecord {
                id: ArgId::of_bytes(&bincode::serialize(arg).unwrap_or_default()),
                argument: arg.clone(),
                result: result.clone(),
            })
            .collect();
        let failures = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|f| FailureRecord {
                id: f.id,
                argument: f.arg_bytes.clone(),
                error_kind: f.error_kind.clone(),
                hostname: f.hostname.clone(),
            })
            .collect();
        Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            num_inserted: u64::try_from(self.jobs.num_inserted()).unwrap_or(u64::MAX),
            num_succeeded: self.num_succeeded.load(Ordering::SeqCst),
            final_result,
            argument_order,
            argument_store,
            failures,
            marked,
        })
    }

    /// Write the current snapshot to `path`.
    pub fn write_snapshot(&self, path: &Path) -> Result<()> {
        self.export_snapshot()?.write_to_file(path)
    }

    /// Close the job queue and both result/failure queues, waking any
    /// blocked `get`/`put` callers with `Closed`. Idempotent.
    pub fn close(&self) {
        self.jobs.close();
        self.result_q.close();
        self.fail_q.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_limiter_permit_is_released_even_if_the_handler_panics() {
        let limiter = Arc::new(ConnectionLimiter::new(1));
        let guarded = Arc::clone(&limiter);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            guarded.acquire();
            let _release_guard = scopeguard::guard(Arc::clone(&guarded), |l| l.release());
            panic!("simulated handler panic");
        }));
        assert!(result.is_err());
        // The guard ran despite the panic, so a fresh acquire doesn't block.
        limiter.acquire();
        limiter.release();
    }

    /// §4.D: "exit when the invariant reaches zero" is unconditional —
    /// a coordinator that never receives a shutdown signal must still
    /// return once every inserted argument has a terminal outcome.
    #[test]
    fn run_terminates_once_the_outstanding_invariant_is_zero_without_any_shutdown_signal() {
        let coordinator = Coordinator::new(None, Duration::from_millis(20));
        for n in 0..5i32 {
            coordinator.insert(bincode::serialize(&n).unwrap()).unwrap();
        }
        for _ in 0..5 {
            let (_id, arg_bytes) = coordinator.jobs.get(false, Duration::ZERO).unwrap();
            coordinator.offer_result(arg_bytes, bincode::serialize(&"ok").unwrap(), Duration::from_secs(1)).unwrap();
        }

        let never_shuts_down = AtomicBool::new(false);
        let accounting = coordinator.run(&never_shuts_down).expect("run should terminate on its own");
        assert_eq!(accounting.succeeded, 5);
        assert_eq!(accounting.outstanding(), 0);
    }

    /// §4.A/§7: a `Remark` (or `NotGotten`) on an already-marked id is a
    /// non-fatal warning, not a reason to abort the main loop. A second,
    /// still-outstanding argument keeps the exit invariant above zero until
    /// after the duplicate has been drained, so the test actually exercises
    /// the Remark path instead of the loop exiting before reaching it.
    #[test]
    fn duplicate_result_for_an_already_marked_id_is_ignored_not_fatal() {
        let coordinator = Coordinator::new(None, Duration::from_millis(20));
        let arg_a = bincode::serialize(&7i32).unwrap();
        let arg_b = bincode::serialize(&8i32).unwrap();
        coordinator.insert(arg_a.clone()).unwrap();
        coordinator.insert(arg_b.clone()).unwrap();
        coordinator.jobs.get(false, Duration::ZERO).unwrap();
        coordinator.jobs.get(false, Duration::ZERO).unwrap();

        // Simulate a retried result_q_put for `arg_a`: the same (arg,
        // result) pair is offered twice before the main loop drains either.
        coordinator.offer_result(arg_a.clone(), bincode::serialize(&"ok").unwrap(), Duration::from_secs(1)).unwrap();
        coordinator.offer_result(arg_a, bincode::serialize(&"ok").unwrap(), Duration::from_secs(1)).unwrap();
        coordinator.offer_result(arg_b, bincode::serialize(&"ok").unwrap(), Duration::from_secs(1)).unwrap();

        let never_shuts_down = AtomicBool::new(false);
        let accounting = coordinator.run(&never_shuts_down).expect("a duplicate result must not abort the loop");
        assert_eq!(accounting.succeeded, 2, "only the first mark of each id should count");
        assert_eq!(coordinator.final_result.lock().unwrap().len(), 2);
    }
}

fn handle_connection(coordinator: &Arc<Coordinator>, mut stream: TcpStream, authkey: &[u8]) -> Result<()> {
    stream.set_nodelay(true).ok();
    auth::respond(&mut stream, authkey)?;
    let request_bytes = read_frame(&mut stream)?;
    let request: Request = bincode::deserialize(&request_bytes)?;
    let response = service::dispatch(coordinator, &request);
    let response_bytes = bincode::serialize(&response)?;
    write_frame(&mut stream, &response_bytes)?;
    Ok(())
}
