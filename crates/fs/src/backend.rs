// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The FS Backend trait (§4.2): clone/snapshot/remove semantics that are
//! polymorphic over copy, reflink, and subvolume variants. Behavior
//! differences live in each variant's implementation, never in callers.

use crate::capabilities::Capabilities;
use crate::error::FsError;
use async_trait::async_trait;
use prepcache_core::CancelToken;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

/// The path the database should be started against after `clone()`.
/// Equals `dest` for copy/reflink backends; differs for `subvolume`,
/// where it's the mount point of the writable clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDir(pub PathBuf);

impl AsRef<Path> for MountDir {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

type CleanupFuture = Pin<Box<dyn Future<Output = Result<(), FsError>> + Send>>;
type CleanupFn = Box<dyn FnOnce() -> CleanupFuture + Send>;

/// A writable clone plus its idempotent cleanup. Cleanup releases any
/// backend-specific resources (e.g. unmounting a subvolume); calling it
/// twice must be safe, since both the success and failure exit paths of
/// `state_execute` (§4.6 steps 9-11) run it under a deferred-resume
/// pattern.
pub struct CloneHandle {
    pub mount_dir: MountDir,
    cleanup: parking_lot::Mutex<Option<CleanupFn>>,
    done: AtomicBool,
}

impl CloneHandle {
    pub fn new<F, Fut>(mount_dir: MountDir, cleanup: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), FsError>> + Send + 'static,
    {
        let boxed: CleanupFn = Box::new(move || Box::pin(cleanup()));
        Self { mount_dir, cleanup: parking_lot::Mutex::new(Some(boxed)), done: AtomicBool::new(false) }
    }

    /// Idempotent cleanup: second and later calls are a no-op success.
    pub async fn cleanup(&self) -> Result<(), FsError> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(cleanup) = self.cleanup.lock().take() else {
            return Ok(());
        };
        cleanup().await
    }
}

/// Polymorphic filesystem operations over the directory layout in §3.
#[async_trait]
pub trait FsBackend: Send + Sync {
    fn kind(&self) -> prepcache_core::FsBackendKind;

    fn capabilities(&self) -> Capabilities;

    /// Create `base_dir` (the initialized empty database) if it doesn't
    /// exist. Idempotent: a second call after success is a no-op.
    async fn ensure_base(&self, base_dir: &Path, cancel: &CancelToken) -> Result<(), FsError>;

    /// Create the parent `states/` directory for a given image (and, for
    /// `subvolume`, the `.build` sidecar) if it doesn't exist. Idempotent.
    async fn ensure_states_dir(&self, states_dir: &Path, cancel: &CancelToken) -> Result<(), FsError>;

    /// Produce a writable clone of `src` at `dest`, returning the path to
    /// start the database against plus an idempotent cleanup.
    async fn clone(&self, src: &Path, dest: &Path, cancel: &CancelToken) -> Result<CloneHandle, FsError>;

    /// Create an immutable point-in-time view of `src` at `dest`. After
    /// success, reading `dest` yields exactly the bytes of `src` at call
    /// time, independent of subsequent writes to `src`.
    async fn snapshot(&self, src: &Path, dest: &Path, cancel: &CancelToken) -> Result<(), FsError>;

    /// Remove `path` (recursively for a directory). Succeeds if `path`
    /// does not exist.
    async fn remove_path(&self, path: &Path, cancel: &CancelToken) -> Result<(), FsError>;
}
