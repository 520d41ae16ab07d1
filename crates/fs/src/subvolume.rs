// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `subvolume` backend: btrfs subvolumes for clone/snapshot, driven
//! through the `btrfs` CLI (§4.2). States are read-only subvolumes;
//! clones are writable snapshots of a state. Because a state
//! subvolume can't be mutated after creation, the build lock and
//! completion marker for this backend live in the `.build` sidecar
//! directory next to `states/` rather than inside the state directory
//! itself (§3, §4.4).

use crate::backend::{CloneHandle, FsBackend, MountDir};
use crate::capabilities::Capabilities;
use crate::error::FsError;
use async_trait::async_trait;
use prepcache_core::subprocess::{run_with_timeout, FS_TOOL_TIMEOUT};
use prepcache_core::{CancelToken, FsBackendKind};
use std::path::Path;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, Default)]
pub struct SubvolumeBackend;

#[async_trait]
impl FsBackend for SubvolumeBackend {
    fn kind(&self) -> FsBackendKind {
        FsBackendKind::Subvolume
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { requires_stop_before_snapshot: true, clones_are_writable: true, can_stream_snapshot: true }
    }

    /// Creates `base_dir` as a subvolume rather than a plain directory.
    /// Rejects a pre-existing `base_dir` that isn't one of ours, per
    /// §9's "reject with a typed error at ensure_base time" guidance —
    /// mutating a stranger's directory as though it were a subvolume
    /// would silently corrupt whatever it actually is.
    async fn ensure_base(&self, base_dir: &Path, cancel: &CancelToken) -> Result<(), FsError> {
        if base_dir.exists() {
            return if is_subvolume(base_dir, cancel).await? {
                Ok(())
            } else {
                Err(FsError::NotASubvolume(base_dir.to_path_buf()))
            };
        }
        let parent = base_dir.parent().ok_or_else(|| FsError::Other("base_dir has no parent".into()))?;
        tokio::fs::create_dir_all(parent).await.map_err(|e| FsError::io(parent, e))?;
        btrfs(&["subvolume", "create", &path_str(base_dir)], cancel).await
    }

    /// Creates the parent `states/` directory as a plain directory (it
    /// only ever holds subvolumes as children, never files itself) plus
    /// the `.build` sidecar.
    async fn ensure_states_dir(&self, states_dir: &Path, cancel: &CancelToken) -> Result<(), FsError> {
        prepcache_core::cancel::check(cancel).map_err(|_| FsError::Cancelled)?;
        tokio::fs::create_dir_all(states_dir).await.map_err(|e| FsError::io(states_dir, e))?;
        let sidecar = states_dir.join(".build");
        tokio::fs::create_dir_all(&sidecar).await.map_err(|e| FsError::io(&sidecar, e))
    }

    /// Snapshots `src` (a read-only state subvolume) writably into
    /// `dest`, the job's runtime directory.
    async fn clone(&self, src: &Path, dest: &Path, cancel: &CancelToken) -> Result<CloneHandle, FsError> {
        if !is_subvolume(src, cancel).await? {
            return Err(FsError::NotASubvolume(src.to_path_buf()));
        }
        ensure_parent(dest).await?;
        btrfs(&["subvolume", "snapshot", &path_str(src), &path_str(dest)], cancel).await?;
        let dest = dest.to_path_buf();
        Ok(CloneHandle::new(MountDir(dest.clone()), move || async move {
            let cancel = CancelToken::new();
            delete_subvolume(&dest, &cancel).await
        }))
    }

    /// Snapshots `src` read-only into `dest`. `src` must already be a
    /// subvolume (the job's runtime clone, or `base_dir`); `dest`
    /// becomes the immutable state directory.
    async fn snapshot(&self, src: &Path, dest: &Path, cancel: &CancelToken) -> Result<(), FsError> {
        if !is_subvolume(src, cancel).await? {
            return Err(FsError::NotASubvolume(src.to_path_buf()));
        }
        ensure_parent(dest).await?;
        btrfs(&["subvolume", "snapshot", "-r", &path_str(src), &path_str(dest)], cancel).await
    }

    async fn remove_path(&self, path: &Path, cancel: &CancelToken) -> Result<(), FsError> {
        if !path.exists() {
            return Ok(());
        }
        if is_subvolume(path, cancel).await? {
            delete_subvolume(path, cancel).await
        } else {
            match tokio::fs::remove_dir_all(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(FsError::io(path, e)),
            }
        }
    }
}

async fn ensure_parent(path: &Path) -> Result<(), FsError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| FsError::io(parent, e))?;
    }
    Ok(())
}

async fn delete_subvolume(path: &Path, cancel: &CancelToken) -> Result<(), FsError> {
    if !path.exists() {
        return Ok(());
    }
    btrfs(&["subvolume", "delete", &path_str(path)], cancel).await
}

/// `btrfs subvolume show` exits non-zero on a path that isn't a
/// subvolume; that's the cheapest reliable check without parsing
/// `statfs` magic numbers ourselves.
async fn is_subvolume(path: &Path, cancel: &CancelToken) -> Result<bool, FsError> {
    if !path.exists() {
        return Ok(false);
    }
    let mut cmd = Command::new("btrfs");
    cmd.args(["subvolume", "show", &path_str(path)]);
    let output = run_with_timeout(cmd, FS_TOOL_TIMEOUT, "btrfs subvolume show", cancel)
        .await
        .map_err(FsError::Other)?;
    Ok(output.status.success())
}

async fn btrfs(args: &[&str], cancel: &CancelToken) -> Result<(), FsError> {
    let mut cmd = Command::new("btrfs");
    cmd.args(args);
    let description = format!("btrfs {}", args.join(" "));
    let output = run_with_timeout(cmd, FS_TOOL_TIMEOUT, &description, cancel).await.map_err(FsError::Other)?;
    if output.status.success() {
        Ok(())
    } else {
        Err(FsError::Other(format!("{description} failed: {}", String::from_utf8_lossy(&output.stderr))))
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
