//! Sled-backed store: one key per collection

use std::path::Path;
use std::sync::Arc;

use super::{Collection, DurableStore, StorageError};

/// Collections stored as single sled values.
///
/// A single-key insert is atomic in sled, and every save is flushed before
/// returning, so a confirmed save survives a crash.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
}

impl SledStore {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        tracing::info!("Sled store opened at {:?}", path_ref);
        Ok(Self { db: Arc::new(db) })
    }
}

impl DurableStore for SledStore {
    fn load_bytes(&self, collection: Collection) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(collection.key())?.map(|value| value.to_vec()))
    }

    fn save_bytes(&self, collection: Collection, bytes: &[u8]) -> Result<(), StorageError> {
        self.db.insert(collection.key(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}
