//! Shared progress counters: `count`/`max_count` per worker-child slot,
//! held in a `libc::mmap`'d, file-backed region so the controller process
//! can read live progress without any IPC beyond the mapping itself.
//!
//! This is the literal "atomic integers in shared memory" the original
//! design calls for, built directly on `libc` (already a dependency)
//! rather than pulling in a dedicated shared-memory crate.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::atomic::AtomicU64;

use crate::error::{CorralError, Result};

/// One child's progress: jobs completed so far, and its `njobs` budget
/// (`u64::MAX` standing in for "unbounded").
#[repr(C)]
struct Slot {
    count: AtomicU64,
    max_count: AtomicU64,
}

/// A `MAP_SHARED` region of `nproc` [`Slot`]s, backed by a regular file so
/// it can be opened by the controller (read-only) and each child
/// (read-write to its own slot) independently.
pub struct SharedCounters {
    ptr: *mut Slot,
    nproc: usize,
}

// SAFETY: each slot is only ever written by the one child that owns it and
// read by the controller; `AtomicU64` gives us the needed synchronization
// at the byte level, and the mapping outlives every thread that holds one.
unsafe impl Send for SharedCounters {}
unsafe impl Sync for SharedCounters {}

impl SharedCounters {
    /// Create (or truncate) the backing file at `path`, sized for `nproc`
    /// slots, and map it `MAP_SHARED` read-write.
    pub fn create(path: &Path, nproc: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path)?;
        let len = std::mem::size_of::<Slot>() * nproc.max(1);
        file.set_len(len as u64)?;
        let ptr = map_file(&file, len, true)?;
        // zero-initialize; `AtomicU64::new(0)` has the same bit pattern as
        // a zeroed region, so writing raw zero bytes is equivalent.
        Ok(Self { ptr: ptr.cast(), nproc })
    }

    /// Open an existing counters file read-only, for the controller to
    /// poll progress without being able to corrupt a child's slot.
    pub fn open_readonly(path: &Path, nproc: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let len = std::mem::size_of::<Slot>() * nproc.max(1);
        let ptr = map_file(&file, len, false)?;
        Ok(Self { ptr: ptr.cast(), nproc })
    }

    /// Open an existing counters file read-write, for a worker-child that
    /// needs to update its own slot (via [`Self::increment`]/
    /// [`Self::slot_refs`]). A read-only mapping would fault on the first
    /// write.
    pub fn open_writable(path: &Path, nproc: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = std::mem::size_of::<Slot>() * nproc.max(1);
        let ptr = map_file(&file, len, true)?;
        Ok(Self { ptr: ptr.cast(), nproc })
    }

    /// Reset slot `index`'s counters to `(0, max_count)`.
    pub fn reset(&self, index: usize, max_count: u64) {
        let slot = self.slot(index);
        slot.count.store(0, std::sync::atomic::Ordering::SeqCst);
        slot.max_count.store(max_count, std::sync::atomic::Ordering::SeqCst);
    }

    /// Increment slot `index`'s completed-job count by one.
    pub fn increment(&self, index: usize) {
        self.slot(index).count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    /// Read slot `index`'s `(count, max_count)` pair.
    #[must_use]
    pub fn read(&self, index: usize) -> (u64, u64) {
        let slot = self.slot(index);
        (
            slot.count.load(std::sync::atomic::Ordering::SeqCst),
            slot.max_count.load(std::sync::atomic::Ordering::SeqCst),
        )
    }

    /// Sum of `count` across every mapped slot.
    #[must_use]
    pub fn total(&self) -> u64 {
        (0..self.nproc).map(|i| self.read(i).0).sum()
    }

    /// Borrow slot `index`'s `(count, max_count)` atomics directly, for a
    /// job function that wants to update its own progress in place rather
    /// than go through [`Self::reset`]/[`Self::increment`].
    #[must_use]
    pub fn slot_refs(&self, index: usize) -> (&AtomicU64, &AtomicU64) {
        let slot = self.slot(index);
        (&slot.count, &slot.max_count)
    }

    fn slot(&self, index: usize) -> &Slot {
        assert!(index < self.nproc, "slot index out of range");
        // SAFETY: `ptr` was mapped for `nproc` contiguous slots at
        // construction and is never unmapped before `self` is dropped.
        unsafe { &*self.ptr.add(index) }
    }
}

impl Drop for SharedCounters {
    fn drop(&mut self) {
        let len = std::mem::size_of::<Slot>() * self.nproc.max(1);
        // SAFETY: `ptr`/`len` match the mapping created in `create`/`open_readonly`.
        unsafe {
            libc::munmap(self.ptr.cast(), len);
        }
    }
}

fn map_file(file: &std::fs::File, len: usize, writable: bool) -> Result<*mut libc::c_void> {
    let prot = if writable { libc::PROT_READ | libc::PROT_WRITE } else { libc::PROT_READ };
    // SAFETY: `fd` is a valid, open file descriptor sized to at least
    // `len` bytes by the caller; the returned pointer is checked against
    // `MAP_FAILED` before use.
    let ptr = unsafe {
        libc::mmap(std::ptr::null_mut(), len, prot, libc::MAP_SHARED, file.as_raw_fd(), 0)
    };
    if ptr == libc::MAP_FAILED {
        return Err(CorralError::Io(io::Error::last_os_error()));
    }
    Ok(ptr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_are_visible_through_a_second_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters");
        let writer = SharedCounters::create(&path, 4).unwrap();
        writer.reset(2, 10);
        writer.increment(2);
        writer.increment(2);

        let reader = SharedCounters::open_readonly(&path, 4).unwrap();
        assert_eq!(reader.read(2), (2, 10));
        assert_eq!(reader.total(), 2);
    }

    #[test]
    fn slot_refs_let_a_child_update_its_own_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters");
        let _creator = SharedCounters::create(&path, 2).unwrap();

        let child = SharedCounters::open_writable(&path, 2).unwrap();
        let (count, max_count) = child.slot_refs(1);
        max_count.store(5, std::sync::atomic::Ordering::SeqCst);
        count.fetch_add(3, std::sync::atomic::Ordering::SeqCst);

        let reader = SharedCounters::open_readonly(&path, 2).unwrap();
        assert_eq!(reader.read(1), (3, 5));
    }
}
