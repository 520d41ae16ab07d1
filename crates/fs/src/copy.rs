// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `copy` backend: full-tree copy for clone/snapshot; `remove_path` is a
//! recursive delete (§4.2).

use crate::backend::{CloneHandle, FsBackend, MountDir};
use crate::capabilities::Capabilities;
use crate::error::FsError;
use async_trait::async_trait;
use prepcache_core::{CancelToken, FsBackendKind};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyBackend;

#[async_trait]
impl FsBackend for CopyBackend {
    fn kind(&self) -> FsBackendKind {
        FsBackendKind::Copy
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { requires_stop_before_snapshot: true, clones_are_writable: true, can_stream_snapshot: false }
    }

    async fn ensure_base(&self, base_dir: &Path, cancel: &CancelToken) -> Result<(), FsError> {
        prepcache_core::cancel::check(cancel).map_err(|_| FsError::Cancelled)?;
        tokio::fs::create_dir_all(base_dir).await.map_err(|e| FsError::io(base_dir, e))
    }

    async fn ensure_states_dir(&self, states_dir: &Path, cancel: &CancelToken) -> Result<(), FsError> {
        prepcache_core::cancel::check(cancel).map_err(|_| FsError::Cancelled)?;
        tokio::fs::create_dir_all(states_dir).await.map_err(|e| FsError::io(states_dir, e))
    }

    async fn clone(&self, src: &Path, dest: &Path, cancel: &CancelToken) -> Result<CloneHandle, FsError> {
        copy_tree(src, dest, cancel).await?;
        let dest = dest.to_path_buf();
        Ok(CloneHandle::new(MountDir(dest.clone()), move || async move {
            let cancel = CancelToken::new();
            remove_tree(&dest, &cancel).await
        }))
    }

    async fn snapshot(&self, src: &Path, dest: &Path, cancel: &CancelToken) -> Result<(), FsError> {
        copy_tree(src, dest, cancel).await
    }

    async fn remove_path(&self, path: &Path, cancel: &CancelToken) -> Result<(), FsError> {
        remove_tree(path, cancel).await
    }
}

async fn copy_tree(src: &Path, dest: &Path, cancel: &CancelToken) -> Result<(), FsError> {
    prepcache_core::cancel::check(cancel).map_err(|_| FsError::Cancelled)?;
    tokio::fs::create_dir_all(dest).await.map_err(|e| FsError::io(dest, e))?;

    let mut stack: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        prepcache_core::cancel::check(cancel).map_err(|_| FsError::Cancelled)?;
        let mut entries = tokio::fs::read_dir(&from).await.map_err(|e| FsError::io(&from, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| FsError::io(&from, e))? {
            let file_type = entry.file_type().await.map_err(|e| FsError::io(entry.path(), e))?;
            let from_path = entry.path();
            let to_path = to.join(entry.file_name());
            if file_type.is_dir() {
                tokio::fs::create_dir_all(&to_path).await.map_err(|e| FsError::io(&to_path, e))?;
                stack.push((from_path, to_path));
            } else if file_type.is_symlink() {
                let link_target = tokio::fs::read_link(&from_path).await.map_err(|e| FsError::io(&from_path, e))?;
                #[cfg(unix)]
                tokio::fs::symlink(&link_target, &to_path).await.map_err(|e| FsError::io(&to_path, e))?;
                #[cfg(not(unix))]
                let _ = link_target;
            } else {
                tokio::fs::copy(&from_path, &to_path).await.map_err(|e| FsError::io(&to_path, e))?;
            }
        }
    }
    Ok(())
}

async fn remove_tree(path: &Path, cancel: &CancelToken) -> Result<(), FsError> {
    prepcache_core::cancel::check(cancel).map_err(|_| FsError::Cancelled)?;
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            // `path` may be a regular file rather than a directory.
            match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(e2) if e2.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(_) => Err(FsError::io(path, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancelToken {
        CancelToken::new()
    }

    #[tokio::test]
    async fn snapshot_then_clone_then_read_reproduces_bytes() {
        let backend = CopyBackend;
        let cancel = token();
        let root = tempfile::tempdir().expect("tempdir");
        let src = root.path().join("src");
        tokio::fs::create_dir_all(&src).await.expect("mkdir src");
        tokio::fs::write(src.join("a.txt"), b"hello").await.expect("write a");

        let snap = root.path().join("snap");
        backend.snapshot(&src, &snap, &cancel).await.expect("snapshot");

        // Mutate the source after snapshotting.
        tokio::fs::write(src.join("a.txt"), b"mutated").await.expect("mutate src");

        let clone_dest = root.path().join("clone");
        let handle = backend.clone(&snap, &clone_dest, &cancel).await.expect("clone");
        let contents = tokio::fs::read(handle.mount_dir.0.join("a.txt")).await.expect("read clone");
        assert_eq!(contents, b"hello");
        handle.cleanup().await.expect("cleanup");
    }

    #[tokio::test]
    async fn remove_path_on_missing_path_is_ok() {
        let backend = CopyBackend;
        let cancel = token();
        let missing = Path::new("/tmp/prepcache-definitely-does-not-exist-xyz");
        backend.remove_path(missing, &cancel).await.expect("missing remove is ok");
        backend.remove_path(missing, &cancel).await.expect("second remove is also ok");
    }

    #[tokio::test]
    async fn ensure_base_is_idempotent() {
        let backend = CopyBackend;
        let cancel = token();
        let root = tempfile::tempdir().expect("tempdir");
        let base = root.path().join("base");
        backend.ensure_base(&base, &cancel).await.expect("first ensure_base");
        backend.ensure_base(&base, &cancel).await.expect("second ensure_base is a no-op");
    }

    #[tokio::test]
    async fn clone_cleanup_is_idempotent() {
        let backend = CopyBackend;
        let cancel = token();
        let root = tempfile::tempdir().expect("tempdir");
        let src = root.path().join("src");
        tokio::fs::create_dir_all(&src).await.expect("mkdir src");
        let dest = root.path().join("dest");
        let handle = backend.clone(&src, &dest, &cancel).await.expect("clone");
        let mount_dir = handle.mount_dir.0.clone();
        handle.cleanup().await.expect("first cleanup");
        assert!(!mount_dir.exists());
    }
}
