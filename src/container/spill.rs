//! The external persistent key-value store an `ArgsContainer` spills to.
//!
//! `SpillStore` is the trait boundary the distilled spec treats as an
//! external collaborator (get/put/delete/iter/close). Two implementations
//! are provided: an in-memory one (the default, and what tests use) and a
//! `sled`-backed one for containers configured with a spill directory.

use std::path::{Path, PathBuf};
use std::collections::HashMap;

use crate::argument::ArgId;
use crate::error::{CorralError, Result};

/// External key-value store backing `ArgsContainer`'s `id -> argument`
/// map. Implementors own their own durability story; `ArgsContainer` only
/// calls this trait's methods and never assumes a particular backend.
pub trait SpillStore: Send {
    /// Fetch the encoded argument for `id`, if present.
    fn get(&self, id: &ArgId) -> Result<Option<Vec<u8>>>;

    /// Persist `bytes` under `id`, overwriting any existing value.
    fn put(&mut self, id: &ArgId, bytes: &[u8]) -> Result<()>;

    /// Remove the entry for `id`, if present.
    fn delete(&mut self, id: &ArgId) -> Result<()>;

    /// All ids currently stored, in arbitrary order.
    fn iter(&self) -> Result<Vec<ArgId>>;

    /// Flush and release any underlying resources (files, locks).
    fn close(self: Box<Self>) -> Result<()>;
}

/// An in-memory `SpillStore`. Used when the container has no configured
/// spill directory, and throughout the test suite.
#[derive(Debug, Default)]
pub struct MemorySpillStore {
    map: HashMap<ArgId, Vec<u8>>,
}

impl MemorySpillStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpillStore for MemorySpillStore {
    fn get(&self, id: &ArgId) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(id).cloned())
    }

    fn put(&mut self, id: &ArgId, bytes: &[u8]) -> Result<()> {
        self.map.insert(*id, bytes.to_vec());
        Ok(())
    }

    fn delete(&mut self, id: &ArgId) -> Result<()> {
        self.map.remove(id);
        Ok(())
    }

    fn iter(&self) -> Result<Vec<ArgId>> {
        Ok(self.map.keys().copied().collect())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// A `sled`-backed `SpillStore`, used when the container is configured
/// with a spill directory.
///
/// Only one `SpillStore` may own a given directory at a time: `open`
/// writes a lockfile (`.corral-lock`) inside the directory and fails with
/// `SpillAlreadyOpen` if one already exists, matching the single-owner
/// policy in §5 of the spec. The lockfile is removed on `close`.
pub struct SledSpillStore {
    db: sled::Db,
    lock_path: PathBuf,
}

impl SledSpillStore {
    /// Open (creating if necessary) the spill store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns `SpillAlreadyOpen` if `dir` already has an active lockfile,
    /// or any I/O / `sled` error encountered while opening.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let lock_path = dir.join(".corral-lock");
        if lock_path.exists() {
            return Err(CorralError::SpillAlreadyOpen(dir.to_path_buf()));
        }
        std::fs::write(&lock_path, std::process::id().to_string())?;

        let db = sled::open(dir.join("spill.sled"))?;
        Ok(Self { db, lock_path })
    }
}

impl SpillStore for SledSpillStore {
    fn get(&self, id: &ArgId) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(id.0)?.map(|ivec| ivec.to_vec()))
    }

    fn put(&mut self, id: &ArgId, bytes: &[u8]) -> Result<()> {
        self.db.insert(id.0, bytes)?;
        self.db.flush()?;
        Ok(())
    }

    fn delete(&mut self, id: &ArgId) -> Result<()> {
        self.db.remove(id.0)?;
        Ok(())
    }

    fn iter(&self) -> Result<Vec<ArgId>> {
        let mut ids = Vec::new();
        for item in self.db.iter() {
            let (key, _) = item?;
            if key.len() == 32 {
                let mut buf = [0u8; 32];
                buf.copy_from_slice(&key);
                ids.push(ArgId(buf));
            }
        }
        Ok(ids)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.db.flush()?;
        drop(self.db);
        let _ = std::fs::remove_file(&self.lock_path);
        Ok(())
    }
}

/// Remove an entire spill directory and its contents. Called by
/// `ArgsContainer::clear`.
pub fn remove_spill_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let mut store = MemorySpillStore::new();
        let id = ArgId::of(&42u32).unwrap();
        assert!(store.get(&id).unwrap().is_none());
        store.put(&id, b"hello").unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap(), b"hello");
        assert_eq!(store.iter().unwrap(), vec![id]);
        store.delete(&id).unwrap();
        assert!(store.get(&id).unwrap().is_none());
    }

    #[test]
    fn sled_store_rejects_second_open() {
        let dir = tempfile::tempdir().unwrap();
        let _first = SledSpillStore::open(dir.path()).unwrap();
        let second = SledSpillStore::open(dir.path());
        assert!(matches!(second, Err(CorralError::SpillAlreadyOpen(_))));
    }

    #[test]
    fn sled_store_round_trips_and_unlocks_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledSpillStore::open(dir.path()).unwrap();
        let id = ArgId::of(&"argument").unwrap();
        let mut store: Box<dyn SpillStore> = Box::new(store);
        store.put(&id, b"payload").unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap(), b"payload");
        store.close().unwrap();

        // Directory should be reusable once closed.
        let _reopened = SledSpillStore::open(dir.path()).unwrap();
    }
}
