//! In-memory record store.

use super::{validate_id, Namespace, RecordIds, RecordStore};
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Record store that keeps everything in memory. Nothing survives a drop.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<(Namespace, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn put(&self, namespace: Namespace, id: &str, bytes: &[u8]) -> Result<()> {
        validate_id(id)?;
        self.records
            .write()
            .insert((namespace, id.to_string()), bytes.to_vec());
        Ok(())
    }

    fn get(&self, namespace: Namespace, id: &str) -> Result<Option<Vec<u8>>> {
        validate_id(id)?;
        Ok(self.records.read().get(&(namespace, id.to_string())).cloned())
    }

    fn delete(&self, namespace: Namespace, id: &str) -> Result<bool> {
        validate_id(id)?;
        Ok(self
            .records
            .write()
            .remove(&(namespace, id.to_string()))
            .is_some())
    }

    fn list(&self, namespace: Namespace) -> Result<RecordIds<'_>> {
        let ids: Vec<String> = self
            .records
            .read()
            .keys()
            .filter(|(ns, _)| *ns == namespace)
            .map(|(_, id)| id.clone())
            .collect();
        Ok(Box::new(ids.into_iter().map(Ok)))
    }

    fn size(&self, namespace: Namespace) -> Result<u64> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|((ns, _), _)| *ns == namespace)
            .map(|(_, bytes)| bytes.len() as u64)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_contract() {
        let store = MemoryStore::new();

        store.put(Namespace::Documents, "a", b"12345").unwrap();
        store.put(Namespace::Batches, "a", b"1").unwrap();

        assert_eq!(store.size(Namespace::Documents).unwrap(), 5);
        assert_eq!(store.total_size().unwrap(), 6);
        assert_eq!(store.list(Namespace::Batches).unwrap().count(), 1);

        assert!(store.delete(Namespace::Documents, "a").unwrap());
        assert!(!store.delete(Namespace::Documents, "a").unwrap());
        assert!(store.get(Namespace::Batches, "a").unwrap().is_some());
    }
}
