//! Locking for storage mutations
//!
//! Two layers keep concurrent invocations from interleaving:
//!
//! - [`StorageLock`]: an exclusive advisory lock on `<storage>/LOCK`, held by
//!   one process (or one open handle) at a time and released on drop
//! - [`EventLocks`]: in-process mutexes keyed by event id

use crate::error::Result;
use dashmap::DashMap;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Name of the lock file inside the storage directory
pub const LOCK_FILE: &str = "LOCK";

/// Exclusive storage lock backed by `<storage>/LOCK`
#[derive(Debug)]
pub struct StorageLock {
    file: File,
    path: PathBuf,
}

impl StorageLock {
    fn open(storage: &Path) -> Result<(File, PathBuf)> {
        fs::create_dir_all(storage)?;
        let path = storage.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok((file, path))
    }

    /// Acquire the lock, waiting for other holders to release it
    pub fn acquire(storage: &Path) -> Result<Self> {
        let (file, path) = Self::open(storage)?;
        file.lock_exclusive()?;
        trace!("Acquired storage lock {:?}", path);
        Ok(Self { file, path })
    }

}

impl Drop for StorageLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            trace!("Failed to release storage lock {:?}: {}", self.path, e);
        }
    }
}

/// Per-event mutual exclusion within one process
#[derive(Debug, Default)]
pub struct EventLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EventLocks {
    /// Run `f` while holding the lock for `event_id`
    pub fn with_lock<T>(&self, event_id: &str, f: impl FnOnce() -> T) -> T {
        // Clone out of the map so no shard guard is held while waiting
        let lock = self.locks.entry(event_id.to_string()).or_default().clone();
        let _guard = lock.lock();
        f()
    }

    /// Drop the mutex of an event that no longer exists
    pub fn forget(&self, event_id: &str) {
        self.locks.remove(event_id);
    }
}
