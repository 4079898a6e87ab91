//! JSON-file store: one file per collection, replaced via temp file + rename

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{Collection, DurableStore, StorageError};

/// Directory of `<collection>.json` files.
///
/// A write goes to `<collection>.json.tmp`, is fsynced, then renamed over the
/// live file, so a crash leaves either the old or the new content.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create or open a store at the given directory.
    ///
    /// Leftover temp files from an interrupted write are removed; the live
    /// file they were meant to replace is still intact.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let store = Self { dir };
        for collection in Collection::ALL {
            let tmp = store.tmp_path(collection);
            if tmp.exists() {
                warn!(path = %tmp.display(), "Removing interrupted write");
                fs::remove_file(&tmp)?;
            }
        }

        info!(dir = %store.dir.display(), "File store opened");
        Ok(store)
    }

    fn live_path(&self, collection: Collection) -> PathBuf {
        self.dir.join(format!("{}.json", collection.key()))
    }

    fn tmp_path(&self, collection: Collection) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", collection.key()))
    }
}

impl DurableStore for FileStore {
    fn load_bytes(&self, collection: Collection) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.live_path(collection);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(format!("{}: {}", path.display(), e))),
        }
    }

    fn save_bytes(&self, collection: Collection, bytes: &[u8]) -> Result<(), StorageError> {
        let live = self.live_path(collection);
        let tmp = self.tmp_path(collection);

        let written = File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &live));

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp); // clean up on failure
            return Err(StorageError::Io(format!("{}: {}", live.display(), e)));
        }

        // Persist the rename itself.
        #[cfg(unix)]
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!(path = %live.display(), size_bytes = bytes.len(), "Collection file replaced");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "File"
    }
}
