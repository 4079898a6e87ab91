//! In-memory store for tests and ephemeral runs
//!
//! Thread-safe via `RwLock`. Not durable: data lost on restart. Saves can be
//! made to fail on demand, to exercise the callers' error paths.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use super::{Collection, DurableStore, StorageError};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<Collection, Vec<u8>>>,
    failing_saves: Mutex<HashMap<Collection, usize>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` saves of `collection` with an I/O error,
    /// leaving its content as it was
    pub fn fail_next_saves(&self, collection: Collection, count: usize) {
        if let Ok(mut failing) = self.failing_saves.lock() {
            failing.insert(collection, count);
        }
    }

    fn take_failure(&self, collection: Collection) -> bool {
        let Ok(mut failing) = self.failing_saves.lock() else {
            return false;
        };
        match failing.get_mut(&collection) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl DurableStore for InMemoryStore {
    fn load_bytes(&self, collection: Collection) -> Result<Option<Vec<u8>>, StorageError> {
        let map = self
            .collections
            .read()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(map.get(&collection).cloned())
    }

    fn save_bytes(&self, collection: Collection, bytes: &[u8]) -> Result<(), StorageError> {
        if self.take_failure(collection) {
            return Err(StorageError::Io(format!("write to '{}' failed", collection)));
        }

        let mut map = self
            .collections
            .write()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        map.insert(collection, bytes.to_vec());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trait_object() {
        let store: Box<dyn DurableStore> = Box::new(InMemoryStore::new());
        assert_eq!(store.backend_name(), "InMemory");
        store.save_bytes(Collection::PendingSync, b"[]").unwrap();
        assert_eq!(
            store.load_bytes(Collection::PendingSync).unwrap().as_deref(),
            Some(&b"[]"[..])
        );
        assert!(store.load_bytes(Collection::Observations).unwrap().is_none());
    }

    #[test]
    fn test_failed_save_keeps_previous_content() {
        let store = InMemoryStore::new();
        store.save_bytes(Collection::ActiveRoute, b"[1]").unwrap();

        store.fail_next_saves(Collection::ActiveRoute, 1);
        assert!(store.save_bytes(Collection::ActiveRoute, b"[2]").is_err());
        assert_eq!(
            store.load_bytes(Collection::ActiveRoute).unwrap().as_deref(),
            Some(&b"[1]"[..])
        );

        store.save_bytes(Collection::ActiveRoute, b"[3]").unwrap();
        assert_eq!(
            store.load_bytes(Collection::ActiveRoute).unwrap().as_deref(),
            Some(&b"[3]"[..])
        );
    }
}
