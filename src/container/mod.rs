//! `ArgsContainer` — an identity-preserving queue of arguments with
//! `pending`/`gotten`/`marked` states, optional disk spill, and safe
//! concurrent access from the coordinator's connection-handler threads.
//!
//! See the crate's top-level docs for the state machine; this module only
//! implements it.

pub mod spill;

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};

use crate::argument::ArgId;
use crate::error::{CorralError, Result};
use crate::snapshot::Snapshot;
use spill::{MemorySpillStore, SledSpillStore, SpillStore};

struct Inner {
    order: Vec<ArgId>,
    pending: VecDeque<ArgId>,
    pending_set: HashSet<ArgId>,
    gotten: HashSet<ArgId>,
    marked: HashSet<ArgId>,
    store: Box<dyn SpillStore>,
    closed: bool,
}

/// An identity-preserving, FIFO, optionally disk-spilled argument queue.
///
/// Generic over the argument type `A`, which must be `Serialize` +
/// `DeserializeOwned` so the container can hand values to its
/// [`spill::SpillStore`] without knowing anything about `A` beyond that.
pub struct ArgsContainer<A> {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    spill_dir: Option<PathBuf>,
    _marker: std::marker::PhantomData<fn() -> A>,
}

impl<A> ArgsContainer<A>
where
    A: Serialize + DeserializeOwned,
{
    /// Create a container backed purely by memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_store(Box::new(MemorySpillStore::new()), None)
    }

    /// Create a container whose `id -> argument` map is spilled to disk at
    /// `dir`. Fails if another container already has `dir` open.
    pub fn with_spill_dir(dir: &Path) -> Result<Self> {
        let store = SledSpillStore::open(dir)?;
        Ok(Self::with_store(Box::new(store), Some(dir.to_path_buf())))
    }

    fn with_store(store: Box<dyn SpillStore>, spill_dir: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                order: Vec::new(),
                pending: VecDeque::new(),
                pending_set: HashSet::new(),
                gotten: HashSet::new(),
                marked: HashSet::new(),
                store,
                closed: false,
            }),
            not_empty: Condvar::new(),
            spill_dir,
            _marker: std::marker::PhantomData,
        }
    }

    /// Insert `arg`.
    ///
    /// - A fresh id transitions `∅ → pending`.
    /// - A `gotten` id transitions back to `pending` (a worker died holding
    ///   it and it must be re-offered).
    /// - A `pending` id is a no-op.
    /// - A `marked` id is rejected with `AlreadyMarked`.
    pub fn put(&self, arg: &A) -> Result<()> {
        let bytes = bincode::serialize(arg)?;
        let id = ArgId::of_bytes(&bytes);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return Err(CorralError::Closed);
        }
        if inner.marked.contains(&id) {
            return Err(CorralError::AlreadyMarked(crate::error::ArgIdDisplay(id)));
        }
        if inner.gotten.remove(&id) {
            inner.pending.push_back(id);
            inner.pending_set.insert(id);
        } else if !inner.pending_set.contains(&id) {
            inner.order.push(id);
            inner.pending.push_back(id);
            inner.pending_set.insert(id);
            inner.store.put(&id, &bytes)?;
        }
        // else: already pending, no-op.
        drop(inner);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Pop the oldest pending id, move it to `gotten`, and return it with
    /// its decoded argument. Blocks up to `timeout` when `block` is true
    /// and nothing is pending; otherwise returns `Empty` immediately.
    pub fn get(&self, block: bool, timeout: Duration) -> Result<(ArgId, A)> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if inner.closed {
                return Err(CorralError::Closed);
            }
            if let Some(id) = inner.pending.pop_front() {
                inner.pending_set.remove(&id);
                inner.gotten.insert(id);
                let bytes = inner
                    .store
                    .get(&id)?
                    .ok_or_else(|| CorralError::Unexpected("id missing from store".into()))?;
                drop(inner);
                let arg = bincode::deserialize(&bytes)?;
                return Ok((id, arg));
            }
            if !block {
                return Err(CorralError::Empty);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CorralError::Empty);
            }
            let (guard, result) = self
                .not_empty
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
            if result.timed_out() && inner.pending.is_empty() && !inner.closed {
                return Err(CorralError::Empty);
            }
        }
    }

    /// Acknowledge `arg` as finished. Requires the id to currently be
    /// `gotten`. Marking an already-`marked` id is a non-fatal `Remark`
    /// warning, not a state change.
    pub fn mark(&self, arg: &A) -> Result<()> {
        let id = ArgId::of(arg)?;
        self.mark_id(id)
    }

    /// As [`Self::mark`], but for callers (the fail-queue accounting step)
    /// that already know the id and don't want to re-serialize.
    pub fn mark_id(&self, id: ArgId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.marked.contains(&id) {
            return Err(CorralError::Remark(crate::error::ArgIdDisplay(id)));
        }
        if !inner.gotten.remove(&id) {
            return Err(CorralError::NotGotten(crate::error::ArgIdDisplay(id)));
        }
        inner.marked.insert(id);
        Ok(())
    }

    /// Number of pending (not yet handed out) arguments.
    #[must_use]
    pub fn qsize(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).pending.len()
    }

    /// Ids currently `gotten` (handed out, unacknowledged).
    #[must_use]
    pub fn gotten_items(&self) -> Vec<ArgId> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .gotten
            .iter()
            .copied()
            .collect()
    }

    /// Ids currently `marked` (terminal).
    #[must_use]
    pub fn marked_items(&self) -> Vec<ArgId> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .marked
            .iter()
            .copied()
            .collect()
    }

    /// Every inserted id not yet marked (i.e. `pending ∪ gotten`).
    #[must_use]
    pub fn unmarked_items(&self) -> Vec<ArgId> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .iter()
            .copied()
            .filter(|id| !inner.marked.contains(id))
            .collect()
    }

    /// Total ids ever inserted.
    #[must_use]
    pub fn num_inserted(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).order.len()
    }

    /// Idempotently close the container. Subsequent `put`/`get` fail with
    /// `Closed`; blocked `get` callers wake immediately.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
    }

    /// Close, then remove the spill directory, if any.
    pub fn clear(&self) -> Result<()> {
        self.close();
        if let Some(dir) = &self.spill_dir {
            // Swap the live store out for an empty one so the sled database
            // (and its lockfile) are released before the directory is
            // removed out from under them.
            let old_store = {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::replace(&mut inner.store, Box::new(MemorySpillStore::new()))
            };
            old_store.close()?;
            spill::remove_spill_dir(dir)?;
        }
        Ok(())
    }

    /// Serialize `(argument_order, argument_store, marked)` into a
    /// `Snapshot`'s corresponding fields. The caller (the `Coordinator`)
    /// supplies the remaining snapshot fields (`num_inserted`,
    /// `num_succeeded`, `final_result`, `failures`).
    pub fn export_for_snapshot(&self) -> Result<(Vec<ArgId>, Vec<(ArgId, Vec<u8>)>, Vec<ArgId>)> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut store_entries = Vec::with_capacity(inner.order.len());
        for id in &inner.order {
            if let Some(bytes) = inner.store.get(id)? {
                store_entries.push((*id, bytes));
            }
        }
        Ok((
            inner.order.clone(),
            store_entries,
            inner.marked.iter().copied().collect(),
        ))
    }

    /// Rebuild a fresh container from a loaded `Snapshot`, re-deriving
    /// `pending = inserted \ marked \ failed` per the spec's restore rule.
    /// All previously `gotten` ids are folded back into `pending` since no
    /// worker can still be holding them once the coordinator has restarted.
    pub fn restore_from_snapshot(snapshot: &Snapshot, spill_dir: Option<&Path>) -> Result<Self> {
        let container = match spill_dir {
            Some(dir) => Self::with_spill_dir(dir)?,
            None => Self::in_memory(),
        };
        let failed: HashSet<ArgId> = snapshot.failures.iter().map(|f| f.id).collect();
        let marked: HashSet<ArgId> = snapshot.marked.iter().copied().chain(failed.iter().copied()).collect();

        let mut inner = container.inner.lock().unwrap_or_else(|e| e.into_inner());
        for (id, bytes) in &snapshot.argument_store {
            inner.store.put(id, bytes)?;
        }
        inner.order = snapshot.argument_order.clone();
        for id in &inner.order {
            if marked.contains(id) {
                inner.marked.insert(*id);
            } else {
                inner.pending.push_back(*id);
                inner.pending_set.insert(*id);
            }
        }
        drop(inner);
        Ok(container)
    }
}
