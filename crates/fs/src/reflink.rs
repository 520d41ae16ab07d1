// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `reflink` backend: copy-on-write clone/snapshot via `reflink_copy`,
//! falling back to a plain byte copy per file when the filesystem or
//! the pair of paths doesn't support reflinking (§4.2, §9).

use crate::backend::{CloneHandle, FsBackend, MountDir};
use crate::capabilities::Capabilities;
use crate::error::FsError;
use async_trait::async_trait;
use prepcache_core::{CancelToken, FsBackendKind};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReflinkBackend;

#[async_trait]
impl FsBackend for ReflinkBackend {
    fn kind(&self) -> FsBackendKind {
        FsBackendKind::Reflink
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
        reflink_tree(src, dest, cancel).await?;
        let dest = dest.to_path_buf();
        Ok(CloneHandle::new(MountDir(dest.clone()), move || async move {
            let cancel = CancelToken::new();
            remove_tree(&dest, &cancel).await
        }))
    }

    async fn snapshot(&self, src: &Path, dest: &Path, cancel: &CancelToken) -> Result<(), FsError> {
        reflink_tree(src, dest, cancel).await
    }

    async fn remove_path(&self, path: &Path, cancel: &CancelToken) -> Result<(), FsError> {
        remove_tree(path, cancel).await
    }
}

/// Walks `src`, recreating directories and reflinking (or copying, on
/// fallback) each regular file into `dest`. A reflink failure on one
/// file doesn't poison the whole tree — every file falls back to a
/// plain copy independently, since some filesystems reflink some
/// inode pairs and not others (e.g. across subvolumes).
async fn reflink_tree(src: &Path, dest: &Path, cancel: &CancelToken) -> Result<(), FsError> {
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
                reflink_or_copy(&from_path, &to_path).await?;
            }
        }
    }
    Ok(())
}

async fn reflink_or_copy(from: &Path, to: &Path) -> Result<(), FsError> {
    let from = from.to_path_buf();
    let to = to.to_path_buf();
    tokio::task::spawn_blocking(move || match reflink_copy::reflink(&from, &to) {
        Ok(()) => Ok(()),
        Err(_) => std::fs::copy(&from, &to).map(|_| ()).map_err(|e| FsError::io(&to, e)),
    })
    .await
    .map_err(|e| FsError::Other(e.to_string()))?
}

async fn remove_tree(path: &Path, cancel: &CancelToken) -> Result<(), FsError> {
    prepcache_core::cancel::check(cancel).map_err(|_| FsError::Cancelled)?;
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e2) if e2.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(_) => Err(FsError::io(path, e)),
        },
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
        let backend = ReflinkBackend;
        let cancel = token();
        let root = tempfile::tempdir().expect("tempdir");
        let src = root.path().join("src");
        tokio::fs::create_dir_all(&src).await.expect("mkdir src");
        tokio::fs::write(src.join("a.txt"), b"hello").await.expect("write a");

        let snap = root.path().join("snap");
        backend.snapshot(&src, &snap, &cancel).await.expect("snapshot");

        tokio::fs::write(src.join("a.txt"), b"mutated").await.expect("mutate src");

        let clone_dest = root.path().join("clone");
        let handle = backend.clone(&snap, &clone_dest, &cancel).await.expect("clone");
        let contents = tokio::fs::read(handle.mount_dir.0.join("a.txt")).await.expect("read clone");
        assert_eq!(contents, b"hello");
        handle.cleanup().await.expect("cleanup");
    }

    #[tokio::test]
    async fn falls_back_to_plain_copy_on_symlinked_tree() {
        let backend = ReflinkBackend;
        let cancel = token();
        let root = tempfile::tempdir().expect("tempdir");
        let src = root.path().join("src");
        tokio::fs::create_dir_all(&src).await.expect("mkdir src");
        tokio::fs::write(src.join("a.txt"), b"data").await.expect("write a");
        #[cfg(unix)]
        tokio::fs::symlink("a.txt", src.join("link.txt")).await.expect("symlink");

        let dest = root.path().join("dest");
        backend.snapshot(&src, &dest, &cancel).await.expect("snapshot with fallback");
        let contents = tokio::fs::read(dest.join("a.txt")).await.expect("read dest");
        assert_eq!(contents, b"data");
    }
}
