//! Per-overlay build lock.
//!
//! Builds of the same overlay package share one workspace, and workspace
//! creation is destructive, so same-key builds must queue. Each build holds
//! an exclusive `flock` on `<cache>/locks/<overlay package>.lock` for its
//! whole run; builds of different overlay packages never contend.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{OverlayError, Result};

/// RAII guard: the lock is released when the file handle drops.
#[derive(Debug)]
pub struct BuildLock {
    _file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Block until the lock for `key` is held.
    pub fn acquire(locks_dir: &Path, key: &str) -> Result<Self> {
        let (file, path) = open_lock_file(locks_dir, key)?;
        debug!(lock = %path.display(), "waiting for build lock");
        file.lock_exclusive()
            .map_err(|e| OverlayError::write(&path, e))?;
        Ok(Self { _file: file, path })
    }

    /// Take the lock for `key` only if no other build holds it.
    ///
    /// `Ok(None)` means another build holds it; other lock failures are errors.
    pub fn try_acquire(locks_dir: &Path, key: &str) -> Result<Option<Self>> {
        let (file, path) = open_lock_file(locks_dir, key)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file, path })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(OverlayError::write(&path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(locks_dir: &Path, key: &str) -> Result<(File, PathBuf)> {
    fs::create_dir_all(locks_dir).map_err(|e| OverlayError::write(locks_dir, e))?;
    let path = locks_dir.join(format!("{key}.lock"));

    // Lock files are never unlinked: removing a held lock file would let a
    // second build lock a fresh inode at the same path.
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| OverlayError::write(&path, e))?;
    Ok((file, path))
}
