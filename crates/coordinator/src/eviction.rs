// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wires the Capacity Manager's [`EvictionBackend`] seam (§4.5) to a
//! concrete `FsBackend` + `StateStore` + directory [`Layout`] — the
//! three things `prepcache-cache` deliberately doesn't know about, so
//! it can be unit tested without a real filesystem.

use async_trait::async_trait;
use prepcache_cache::{EvictionBackend, FsUsage};
use prepcache_core::{CancelToken, StateId};
use prepcache_fs::{FsBackend, Layout};
use prepcache_store::{ListStatesFilter, StateStore};
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Concrete [`EvictionBackend`] for a real deployment: deletes a
/// state's on-disk directory via the configured FS Backend, sums
/// `size_bytes` (measuring on demand when a row lacks one) for cache
/// usage, and reads filesystem totals via `statvfs`.
pub struct CoordinatorEvictionBackend {
    fs_backend: Arc<dyn FsBackend>,
    state_store: Arc<dyn StateStore>,
    layout: Layout,
}

impl CoordinatorEvictionBackend {
    pub fn new(fs_backend: Arc<dyn FsBackend>, state_store: Arc<dyn StateStore>, layout: Layout) -> Self {
        Self { fs_backend, state_store, layout }
    }
}

#[async_trait]
impl EvictionBackend for CoordinatorEvictionBackend {
    async fn remove_state_dir(&self, id: StateId) -> io::Result<()> {
        let Some(state) = self.state_store.get_state(id) else {
            return Ok(());
        };
        let dir = self.layout.state_dir(&state.image_id, id);
        let cancel = CancelToken::new();
        self.fs_backend
            .remove_path(&dir, &cancel)
            .await
            .map_err(|e| io::Error::other(e.to_string()))
    }

    async fn measure_fs(&self) -> io::Result<FsUsage> {
        statvfs_usage(self.layout.root())
    }

    async fn measure_cache_usage(&self) -> io::Result<u64> {
        let states = self.state_store.list_states(&ListStatesFilter::default());
        let mut total = 0u64;
        for state in states {
            if let Some(size) = state.size_bytes {
                total += size;
            } else {
                let dir = self.layout.state_dir(&state.image_id, state.state_id);
                total += prepcache_fs::measure_dir_size(&dir).await.unwrap_or(0);
            }
        }
        Ok(total)
    }
}

#[cfg(unix)]
fn statvfs_usage(path: &Path) -> io::Result<FsUsage> {
    let root = existing_ancestor(path);
    let stat = nix::sys::statvfs::statvfs(&root).map_err(|e| io::Error::other(e.to_string()))?;
    let block_size = stat.fragment_size().max(1) as u64;
    let total = stat.blocks() as u64 * block_size;
    let free = stat.blocks_available() as u64 * block_size;
    Ok(FsUsage { total, free })
}

#[cfg(not(unix))]
fn statvfs_usage(_path: &Path) -> io::Result<FsUsage> {
    Ok(FsUsage { total: u64::MAX, free: u64::MAX })
}

/// `statvfs` requires an existing path; the cache root may not have
/// been created yet on a fresh deployment, so walk up to the nearest
/// ancestor that exists.
#[cfg(unix)]
fn existing_ancestor(path: &Path) -> std::path::PathBuf {
    let mut candidate = path.to_path_buf();
    loop {
        if candidate.exists() {
            return candidate;
        }
        if !candidate.pop() {
            return std::path::PathBuf::from("/");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prepcache_core::{PrepareKind, State};
    use prepcache_fs::CopyBackend;
    use prepcache_store::InMemoryStateStore;

    #[tokio::test]
    async fn measure_cache_usage_sums_known_sizes_without_touching_disk() {
        let root = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(root.path());
        let store = Arc::new(InMemoryStateStore::new());
        let a = State::builder().prepare_kind(PrepareKind::Sql).size_bytes(100u64).build();
        let b = State::builder().prepare_kind(PrepareKind::Sql).size_bytes(250u64).build();
        store.create_state(a).expect("insert a");
        store.create_state(b).expect("insert b");

        let backend = CoordinatorEvictionBackend::new(Arc::new(CopyBackend), store, layout);
        let usage = backend.measure_cache_usage().await.expect("measure");
        assert_eq!(usage, 350);
    }

    #[tokio::test]
    async fn remove_state_dir_on_unknown_id_is_a_no_op() {
        let root = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(root.path());
        let store = Arc::new(InMemoryStateStore::new());
        let backend = CoordinatorEvictionBackend::new(Arc::new(CopyBackend), store, layout);
        backend.remove_state_dir(StateId::new()).await.expect("no-op for unknown id");
    }
}
