//! Data-directory process lock
//!
//! Only one engine process may write a data directory at a time; two
//! processes doing whole-collection read-modify-write on the same store would
//! silently overwrite each other's changes.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Lock file holding the owning process ID.
///
/// Released on drop.
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".paket-field.lock";

    /// Acquire the lock for `data_dir`, creating the directory if needed.
    ///
    /// Fails if a live engine process already holds it; a lock left behind by
    /// a dead process is replaced.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let lock_path = data_dir.join(Self::LOCK_FILE_NAME);

        if lock_path.exists() {
            match Self::holder(&lock_path) {
                Ok(Some(pid)) => {
                    bail!(
                        "Data directory {:?} is in use by another paket-field process (PID: {})\n\
                         If no such process is running, remove the stale lock file:\n\
                         rm {:?}",
                        data_dir,
                        pid,
                        lock_path
                    );
                }
                Ok(None) => {
                    tracing::info!(path = %lock_path.display(), "Removing stale lock file");
                    fs::remove_file(&lock_path).context("Failed to remove stale lock file")?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable lock file, replacing it");
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let pid = std::process::id();
        let mut file = File::create(&lock_path)
            .with_context(|| format!("Failed to create lock file: {:?}", lock_path))?;
        writeln!(file, "{}", pid).context("Failed to write PID to lock file")?;

        tracing::debug!(pid, path = %lock_path.display(), "Acquired data directory lock");

        Ok(Self {
            lock_path,
            owned: true,
        })
    }

    /// PID of the live process holding the lock, or `None` if the holder is gone.
    fn holder(lock_path: &Path) -> Result<Option<u32>> {
        let contents = fs::read_to_string(lock_path).context("Failed to read lock file")?;
        let pid: u32 = contents
            .trim()
            .parse()
            .context("Failed to parse PID from lock file")?;

        if Self::is_engine_process(pid) {
            Ok(Some(pid))
        } else {
            Ok(None)
        }
    }

    #[cfg(unix)]
    fn is_engine_process(pid: u32) -> bool {
        match fs::read_to_string(format!("/proc/{}/cmdline", pid)) {
            Ok(cmdline) => cmdline.contains("paket-field") || cmdline.contains("paket_field"),
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    fn is_engine_process(_pid: u32) -> bool {
        // No cheap liveness check; assume the holder is alive.
        true
    }

    /// Release the lock (called automatically on drop)
    pub fn release(&mut self) {
        if self.owned {
            if let Err(e) = fs::remove_file(&self.lock_path) {
                tracing::warn!(error = %e, "Failed to remove lock file");
            }
            self.owned = false;
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}
