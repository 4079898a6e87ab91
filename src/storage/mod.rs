//! Local Durable Store
//!
//! Whole-collection persistence shared by the capture queue and the route
//! engine. Callers always read-modify-write an entire collection; there is no
//! per-record lookup or merge.
//!
//! ## Backends
//!
//! - [`SledStore`]: one sled key per collection (default)
//! - [`FileStore`]: one JSON file per collection, temp-file + rename
//! - [`InMemoryStore`]: non-durable, for tests and ephemeral runs
//!
//! Every backend must replace a collection atomically: after a crash the
//! collection holds either the old or the new content, never a mix.

mod file;
mod memory;
mod sled_store;
pub mod lockfile;

pub use file::FileStore;
pub use lockfile::ProcessLock;
pub use memory::InMemoryStore;
pub use sled_store::SledStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{StorageBackend, StorageConfig};

/// The fixed set of persisted collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Observation history, newest first
    Observations,
    /// Pending-sync queue, oldest first
    PendingSync,
    /// The driver's active route (zero or one element)
    ActiveRoute,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Observations,
        Collection::PendingSync,
        Collection::ActiveRoute,
    ];

    /// Storage key / file stem
    pub const fn key(self) -> &'static str {
        match self {
            Collection::Observations => "observations",
            Collection::PendingSync => "pending_sync",
            Collection::ActiveRoute => "active_route",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("collection '{collection}' is corrupt: {detail}")]
    Corrupt {
        collection: Collection,
        detail: String,
    },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// Trait for pluggable durable backends
///
/// Implementations must be thread-safe (Send + Sync): both engines share one
/// store and touch disjoint collections.
pub trait DurableStore: Send + Sync {
    /// Raw bytes of a collection, or `None` if it was never written.
    fn load_bytes(&self, collection: Collection) -> Result<Option<Vec<u8>>, StorageError>;

    /// Atomically replace a collection's bytes.
    fn save_bytes(&self, collection: Collection, bytes: &[u8]) -> Result<(), StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Shared reference to a store
pub type SharedStore = Arc<dyn DurableStore>;

/// Load a collection, surfacing decode failures as [`StorageError::Corrupt`].
pub fn load_collection_strict<T: DeserializeOwned>(
    store: &dyn DurableStore,
    collection: Collection,
) -> Result<Vec<T>, StorageError> {
    let Some(bytes) = store.load_bytes(collection)? else {
        return Ok(Vec::new());
    };
    serde_json::from_slice::<Vec<T>>(&bytes).map_err(|e| StorageError::Corrupt {
        collection,
        detail: e.to_string(),
    })
}

/// Load a collection, degrading a corrupt one to empty.
///
/// Losing an undecodable cache is preferred over failing startup; the anomaly
/// is logged. I/O failures still propagate.
pub fn load_collection<T: DeserializeOwned>(
    store: &dyn DurableStore,
    collection: Collection,
) -> Result<Vec<T>, StorageError> {
    match load_collection_strict(store, collection) {
        Ok(records) => {
            debug!(
                collection = collection.key(),
                records = records.len(),
                backend = store.backend_name(),
                "Collection loaded"
            );
            Ok(records)
        }
        Err(StorageError::Corrupt { collection, detail }) => {
            warn!(
                collection = collection.key(),
                backend = store.backend_name(),
                error = %detail,
                "Corrupt collection on load, starting empty"
            );
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Serialize and atomically replace a whole collection.
pub fn save_collection<T: Serialize>(
    store: &dyn DurableStore,
    collection: Collection,
    records: &[T],
) -> Result<(), StorageError> {
    let bytes =
        serde_json::to_vec(records).map_err(|e| StorageError::Serialization(e.to_string()))?;
    store.save_bytes(collection, &bytes)?;
    debug!(
        collection = collection.key(),
        records = records.len(),
        size_bytes = bytes.len(),
        "Collection saved"
    );
    Ok(())
}

/// Open the backend named in the storage config.
pub fn open_store(config: &StorageConfig) -> Result<SharedStore, StorageError> {
    let store: SharedStore = match config.backend {
        StorageBackend::Sled => Arc::new(SledStore::open(config.data_dir.join("store"))?),
        StorageBackend::File => Arc::new(FileStore::open(config.data_dir.join("collections"))?),
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
    };
    tracing::info!(
        backend = store.backend_name(),
        data_dir = %config.data_dir.display(),
        "Durable store opened"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    }

    #[test]
    fn test_missing_collection_is_empty() {
        let store = InMemoryStore::new();
        let items: Vec<Item> = load_collection(&store, Collection::Observations).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_round_trip_preserves_optional_absence() {
        let store = InMemoryStore::new();
        let items = vec![
            Item { id: 1, note: None },
            Item { id: 2, note: Some("fragile".to_string()) },
        ];
        save_collection(&store, Collection::PendingSync, &items).unwrap();

        let raw = store.load_bytes(Collection::PendingSync).unwrap().unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert_eq!(text.matches("note").count(), 1);

        let back: Vec<Item> = load_collection(&store, Collection::PendingSync).unwrap();
        assert_eq!(back, items);
    }

    #[test]
    fn test_corrupt_collection_degrades_to_empty() {
        let store = InMemoryStore::new();
        store
            .save_bytes(Collection::Observations, b"{not json")
            .unwrap();

        let strict = load_collection_strict::<Item>(&store, Collection::Observations);
        assert!(matches!(
            strict,
            Err(StorageError::Corrupt { collection: Collection::Observations, .. })
        ));

        let lenient: Vec<Item> = load_collection(&store, Collection::Observations).unwrap();
        assert!(lenient.is_empty());
    }

    #[test]
    fn test_collections_are_disjoint() {
        let store = InMemoryStore::new();
        save_collection(&store, Collection::Observations, &[Item { id: 7, note: None }]).unwrap();
        let other: Vec<Item> = load_collection(&store, Collection::ActiveRoute).unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_open_store_by_backend() {
        let dir = tempfile::tempdir().unwrap();
        for backend in [StorageBackend::Sled, StorageBackend::File, StorageBackend::Memory] {
            let config = StorageConfig {
                data_dir: dir.path().join(backend.to_string()),
                backend,
            };
            let store = open_store(&config).unwrap();
            save_collection(&*store, Collection::ActiveRoute, &[Item { id: 1, note: None }])
                .unwrap();
            let back: Vec<Item> = load_collection(&*store, Collection::ActiveRoute).unwrap();
            assert_eq!(back.len(), 1);
        }
    }
}
