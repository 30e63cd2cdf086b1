//! Argument identity.
//!
//! An argument's identity is the SHA-256 digest of its canonical binary
//! footprint. "Canonical" here means: serialize with `bincode`, whose
//! output for a fixed `Serialize` implementation is a pure function of the
//! value (field order follows the struct's declaration order, not an
//! iteration order over a hash map), so the same logical value always
//! produces the same bytes and therefore the same id.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::Result;

/// A stable, content-addressed identifier for an argument.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArgId(pub [u8; 32]);

impl ArgId {
    /// Compute the id of `value` by hashing its canonical binary footprint.
    pub fn of<T: Serialize>(value: &T) -> Result<Self> {
        let bytes = bincode::serialize(value)?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Compute the id directly from an already-encoded footprint. Used by
    /// the wire layer, which re-derives ids from frame payloads without
    /// re-serializing the caller's type.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// The full digest as a lowercase hex string, used for filenames
    /// (emergency dumps, traceback files reference the argument's owning
    /// job indirectly via timestamp/pid, not the id itself, but tests and
    /// logs benefit from a stable textual form).
    #[must_use]
    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ArgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArgId({}…)", &self.to_hex()[..12])
    }
}

impl fmt::Display for ArgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Pair {
        a: u32,
        b: String,
    }

    #[test]
    fn same_value_same_id() {
        let x = Pair { a: 1, b: "hi".into() };
        let y = Pair { a: 1, b: "hi".into() };
        assert_eq!(ArgId::of(&x).unwrap(), ArgId::of(&y).unwrap());
    }

    #[test]
    fn different_value_different_id() {
        let x = Pair { a: 1, b: "hi".into() };
        let y = Pair { a: 2, b: "hi".into() };
        assert_ne!(ArgId::of(&x).unwrap(), ArgId::of(&y).unwrap());
    }

    #[test]
    fn hex_round_trips_length() {
        let id = ArgId::of(&42u32).unwrap();
        assert_eq!(id.to_hex().len(), 64);
    }
}
