//! Durable storage for encoded state records.
//!
//! A store keeps opaque record bytes keyed by id under independent
//! namespaces. It knows nothing about document or batch semantics; the
//! [`StateManager`](crate::manager::StateManager) encodes records with
//! [`codec`](crate::codec) and hands the bytes over.

mod file;
mod memory;

pub use file::{FileStore, StoreConfig};
pub use memory::MemoryStore;

use crate::error::{Result, StateError};
use std::fmt;

/// Independent key spaces of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    Documents,
    Batches,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Documents, Namespace::Batches];

    /// Directory name used by file-backed stores.
    pub fn dir_name(self) -> &'static str {
        match self {
            Namespace::Documents => "documents",
            Namespace::Batches => "batches",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Lazily produced record ids, in no particular order.
pub type RecordIds<'a> = Box<dyn Iterator<Item = Result<String>> + 'a>;

/// Key-addressed record storage.
pub trait RecordStore: Send + Sync {
    /// Write a record so that readers see either the old or the new bytes,
    /// never a partial write.
    fn put(&self, namespace: Namespace, id: &str, bytes: &[u8]) -> Result<()>;

    /// Read a record; `None` when there is none.
    fn get(&self, namespace: Namespace, id: &str) -> Result<Option<Vec<u8>>>;

    /// Remove a record, returning whether it existed.
    fn delete(&self, namespace: Namespace, id: &str) -> Result<bool>;

    /// Ids of every record currently in `namespace`.
    fn list(&self, namespace: Namespace) -> Result<RecordIds<'_>>;

    /// Bytes used by `namespace`.
    fn size(&self, namespace: Namespace) -> Result<u64>;

    /// Bytes used by every namespace.
    fn total_size(&self) -> Result<u64> {
        Namespace::ALL
            .iter()
            .try_fold(0u64, |acc, ns| Ok(acc + self.size(*ns)?))
    }
}

/// Reject ids that could escape their namespace or collide with temp files.
pub(crate) fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\', '\0'])
        && !id.contains("..");
    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("doc_20250101_120000_abcd1234").is_ok());
        assert!(validate_id("report-v2.final").is_ok());

        for bad in ["", ".hidden", "../escape", "a/b", "a\\b", "a..b"] {
            assert!(
                matches!(validate_id(bad), Err(StateError::InvalidId(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }
}
