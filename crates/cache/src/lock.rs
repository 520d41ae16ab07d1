// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build Lock & Marker Protocol (§4.4): at-most-one concurrent build
//! per `state_id`, and a durable way for readers to distinguish a
//! completed state from a half-built one after an ungraceful
//! termination. Also backs the process-wide eviction lock (§4.5),
//! which uses the same exclusive-create/retry protocol with a
//! stale-lock threshold instead of a marker.

use prepcache_core::{CacheError, CancelToken};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Poll interval between failed acquisition attempts (§5 "lock retries
/// poll every 50 ms").
pub const RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum AcquireOutcome {
    /// The caller holds the lock and must run the build body, then
    /// call [`LockGuard::complete`] or [`LockGuard::abort`].
    Acquired(LockGuard),
    /// Another process already completed the build; the stale lock
    /// (if any) has been removed.
    AlreadyBuilt,
}

/// Held while a build is in progress. Must be resolved via
/// [`complete`](Self::complete) (success — writes the marker) or
/// [`abort`](Self::abort) (failure — no marker, lock simply released).
/// If dropped without either, the lock file is best-effort removed
/// synchronously so a panic doesn't wedge the fingerprint forever; the
/// absence of a marker means the next reader rebuilds from scratch.
#[derive(Debug)]
pub struct LockGuard {
    lock_path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Build succeeded: write the completion marker atomically (temp
    /// file + rename), then release the lock.
    pub async fn complete(mut self, marker_path: &Path) -> Result<(), CacheError> {
        write_marker(marker_path).await?;
        let _ = tokio::fs::remove_file(&self.lock_path).await;
        self.released = true;
        Ok(())
    }

    /// Build failed or was cancelled: release the lock without a
    /// marker.
    pub async fn abort(mut self) {
        let _ = tokio::fs::remove_file(&self.lock_path).await;
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

/// Acquire the build lock at `lock_path`, treating `marker_path`'s
/// presence as "already built" (§4.4 steps 1-5).
pub async fn acquire(lock_path: PathBuf, marker_path: &Path, cancel: &CancelToken) -> Result<AcquireOutcome, CacheError> {
    loop {
        prepcache_core::cancel::check(cancel)?;

        match create_exclusive(&lock_path).await {
            Ok(()) => return Ok(AcquireOutcome::Acquired(LockGuard { lock_path, released: false })),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if tokio::fs::try_exists(marker_path).await.unwrap_or(false) {
                    let _ = tokio::fs::remove_file(&lock_path).await;
                    return Ok(AcquireOutcome::AlreadyBuilt);
                }
                if !is_regular_file(&lock_path).await {
                    return Err(CacheError::internal(format!(
                        "build lock path is not a regular file: {}",
                        lock_path.display()
                    )));
                }
                wait_or_cancel(cancel).await?;
            }
            Err(e) if is_windows_busy(&e, &lock_path).await => {
                wait_or_cancel(cancel).await?;
            }
            Err(e) => {
                return Err(CacheError::internal(format!(
                    "failed to acquire build lock at {}: {e}",
                    lock_path.display()
                )))
            }
        }
    }
}

/// Remove a lock file older than `max_age` regardless of content,
/// used by the eviction lock's stale-lock sweep (§4.5: "stale locks
/// older than 5 min are removed").
pub async fn remove_if_stale(lock_path: &Path, max_age: Duration) -> std::io::Result<bool> {
    let meta = match tokio::fs::metadata(lock_path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let age = meta.modified()?.elapsed().unwrap_or(Duration::ZERO);
    if age >= max_age {
        tokio::fs::remove_file(lock_path).await?;
        Ok(true)
    } else {
        Ok(false)
    }
}

async fn wait_or_cancel(cancel: &CancelToken) -> Result<(), CacheError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CacheError::cancelled()),
        _ = tokio::time::sleep(RETRY_INTERVAL) => Ok(()),
    }
}

async fn create_exclusive(path: &Path) -> std::io::Result<()> {
    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    opts.open(path).await.map(|_| ())
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn is_windows_busy(e: &std::io::Error, lock_path: &Path) -> bool {
    e.kind() == ErrorKind::PermissionDenied && is_regular_file(lock_path).await
}

/// Writes `marker_path` atomically via a sibling temp file + rename.
async fn write_marker(marker_path: &Path) -> Result<(), CacheError> {
    let tmp_path = marker_path.with_extension("ok.tmp");
    if let Some(parent) = marker_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CacheError::internal(format!("failed to create marker parent dir: {e}")))?;
    }
    tokio::fs::write(&tmp_path, b"")
        .await
        .map_err(|e| CacheError::internal(format!("failed to write marker temp file: {e}")))?;
    tokio::fs::rename(&tmp_path, marker_path)
        .await
        .map_err(|e| CacheError::internal(format!("failed to rename marker into place: {e}")))
}
