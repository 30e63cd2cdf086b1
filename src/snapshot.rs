//! Coordinator snapshot file: the on-disk format written on shutdown and
//! read back either by a resuming `Coordinator` or by a standalone static
//! loader that needs no running process at all.
//!
//! Records are written in the exact order given in the spec:
//! `num_inserted`, `num_succeeded`, `final_result`, argument index
//! (insertion-ordered id list), argument store (`id -> value` blobs),
//! drained `fail_q` contents.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::argument::ArgId;
use crate::error::Result;

/// Current on-disk snapshot format version. Bumped whenever the record
/// layout changes; `static_load` rejects a mismatched version rather than
/// guessing.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One `(argument, error_kind, hostname)` failure record, as drained from
/// `fail_q` at shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Id of the failed argument.
    pub id: ArgId,
    /// The argument's encoded bytes.
    pub argument: Vec<u8>,
    /// The error kind tag reported by the worker.
    pub error_kind: String,
    /// Hostname of the worker that reported the failure.
    pub hostname: String,
}

/// One `(argument, result)` record in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Id of the completed argument.
    pub id: ArgId,
    /// The argument's encoded bytes.
    pub argument: Vec<u8>,
    /// The encoded result value.
    pub result: Vec<u8>,
}

/// The full coordinator snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version; see [`SNAPSHOT_VERSION`].
    pub version: u32,
    /// Total arguments ever inserted.
    pub num_inserted: u64,
    /// Total arguments that completed successfully.
    pub num_succeeded: u64,
    /// Results in arrival order.
    pub final_result: Vec<ResultRecord>,
    /// Every inserted id, in original insertion order.
    pub argument_order: Vec<ArgId>,
    /// Every inserted argument's encoded bytes, keyed by id.
    pub argument_store: Vec<(ArgId, Vec<u8>)>,
    /// Drained `fail_q` contents at the moment of shutdown.
    pub failures: Vec<FailureRecord>,
    /// Ids explicitly marked as successfully returned (subset of
    /// `argument_order`, disjoint from the failure ids).
    pub marked: Vec<ArgId>,
}

impl Snapshot {
    /// Write this snapshot to `writer` using the canonical binary format.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = BufWriter::new(writer);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Write this snapshot to the file at `path`, creating or truncating it.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        self.write_to(file)
    }

    /// Read a snapshot from `reader`, rejecting a mismatched
    /// [`SNAPSHOT_VERSION`] rather than trusting a layout this version of
    /// the code doesn't actually know how to read.
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut reader = BufReader::new(reader);
        let snapshot: Self = bincode::deserialize_from(&mut reader)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(crate::error::CorralError::Unexpected(format!(
                "snapshot version {} unsupported, expected {SNAPSHOT_VERSION}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    /// The static loader: read a snapshot directly from a file path, with
    /// no running coordinator involved. This is what a resuming process,
    /// or a test asserting on a prior run's state, calls.
    pub fn static_load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_from(file)
    }

    /// Re-derive `pending = inserted \ marked \ failed`, per the spec's
    /// restore rule: any id not explicitly marked and not recorded as a
    /// failure is still outstanding and must be re-offered.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<ArgId> {
        let marked: std::collections::HashSet<ArgId> = self.marked.iter().copied().collect();
        let failed: std::collections::HashSet<ArgId> =
            self.failures.iter().map(|f| f.id).collect();
        self.argument_order
            .iter()
            .copied()
            .filter(|id| !marked.contains(id) && !failed.contains(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        let a = ArgId::of(&1u32).unwrap();
        let b = ArgId::of(&2u32).unwrap();
        let c = ArgId::of(&3u32).unwrap();
        Snapshot {
            version: SNAPSHOT_VERSION,
            num_inserted: 3,
            num_succeeded: 1,
            final_result: vec![ResultRecord {
                id: a,
                argument: bincode::serialize(&1u32).unwrap(),
                result: bincode::serialize(&"ok").unwrap(),
            }],
            argument_order: vec![a, b, c],
            argument_store: vec![
                (a, bincode::serialize(&1u32).unwrap()),
                (b, bincode::serialize(&2u32).unwrap()),
                (c, bincode::serialize(&3u32).unwrap()),
            ],
            failures: vec![FailureRecord {
                id: c,
                argument: bincode::serialize(&3u32).unwrap(),
                error_kind: "ValueError".into(),
                hostname: "worker-1".into(),
            }],
            marked: vec![a],
        }
    }

    #[test]
    fn pending_excludes_marked_and_failed() {
        let snap = sample();
        let pending = snap.pending_ids();
        assert_eq!(pending, vec![snap.argument_order[1]]);
    }

    #[test]
    fn mismatched_version_is_rejected() {
        let mut snap = sample();
        snap.version = SNAPSHOT_VERSION + 1;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");
        snap.write_to_file(&path).unwrap();
        let err = Snapshot::static_load(&path).unwrap_err();
        assert!(matches!(err, crate::error::CorralError::Unexpected(_)));
    }

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");
        let snap = sample();
        snap.write_to_file(&path).unwrap();
        let loaded = Snapshot::static_load(&path).unwrap();
        assert_eq!(loaded.num_inserted, snap.num_inserted);
        assert_eq!(loaded.final_result.len(), snap.final_result.len());
        assert_eq!(loaded.pending_ids(), snap.pending_ids());
    }
}
