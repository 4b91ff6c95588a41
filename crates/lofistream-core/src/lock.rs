//! Cross-process lock coordination for the buffer store.
//!
//! The producer and consumer run as independent processes and share nothing
//! but the store directory, so every ledger read-modify-write cycle (status
//! included) happens under one OS advisory lock. Advisory locks are released
//! by the kernel when the holding process dies, which is what makes a
//! crashed holder harmless: there is no application-level token to orphan.

use crate::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Name of the lock file inside the store directory.
pub const LOCK_FILENAME: &str = ".buffer.lock";

/// Named exclusive lock over a buffer store directory.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Create a lock handle for the store at `dir`.
    ///
    /// The lock file itself is created lazily on first acquisition.
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(LOCK_FILENAME),
        }
    }

    fn open_lock_file(&self) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;
        Ok(file)
    }

    /// Acquire the lock, blocking until the other process releases it.
    ///
    /// The returned guard releases on drop, so every exit path, including
    /// panics, unlocks. Callers needing a deadline should use
    /// [`StoreLock::try_acquire`] in their own retry loop.
    pub fn acquire(&self) -> Result<StoreLockGuard> {
        let file = self.open_lock_file()?;
        file.lock_exclusive()?;
        Ok(StoreLockGuard { file })
    }

    /// Try to acquire the lock without blocking.
    ///
    /// Returns `Ok(None)` when the lock is held elsewhere.
    pub fn try_acquire(&self) -> Result<Option<StoreLockGuard>> {
        let file = self.open_lock_file()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(StoreLockGuard { file })),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// RAII guard for an acquired store lock.
///
/// Holding the guard is holding the lock; dropping it unlocks.
#[derive(Debug)]
pub struct StoreLockGuard {
    file: File,
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        // Unlock errors are unreportable from drop; the OS releases the
        // lock when the file handle closes regardless.
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
