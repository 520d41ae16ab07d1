// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Directory layout contract exposed by the FS Backend (§3):
//!
//! ```text
//! <root>/engines/<engine>/<version>/base/            # initialized empty database
//! <root>/engines/<engine>/<version>/states/<id>/      # immutable snapshot
//! <root>/engines/<engine>/<version>/states/.build/    # btrfs-mode lock+marker sidecar
//! <root>/jobs/<job_id>/runtime                        # writable clone, transient
//! <root>/.evict.lock                                  # process-wide eviction lock
//! ```

use prepcache_core::image::engine_version;
use prepcache_core::{FsBackendKind, StateId};
use std::path::{Path, PathBuf};

/// Resolves the on-disk paths for a given root, derived from an
/// `image_id` via the sanitizing engine/version parser.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn engine_dir(&self, image_id: &str) -> PathBuf {
        let (engine, version) = engine_version(image_id);
        self.root.join("engines").join(engine).join(version)
    }

    pub fn base_dir(&self, image_id: &str) -> PathBuf {
        self.engine_dir(image_id).join("base")
    }

    pub fn states_dir(&self, image_id: &str) -> PathBuf {
        self.engine_dir(image_id).join("states")
    }

    pub fn state_dir(&self, image_id: &str, id: StateId) -> PathBuf {
        self.states_dir(image_id).join(id.as_str())
    }

    /// The btrfs-mode lock+marker sidecar directory, used instead of
    /// mutating the (future, read-only) subvolume directly.
    pub fn build_sidecar_dir(&self, image_id: &str) -> PathBuf {
        self.states_dir(image_id).join(".build")
    }

    pub fn job_runtime_dir(&self, job_id: &str) -> PathBuf {
        self.root.join("jobs").join(job_id).join("runtime")
    }

    pub fn evict_lock_path(&self) -> PathBuf {
        self.root.join(".evict.lock")
    }

    /// Build lock path for a state's build, dependent on the FS Backend
    /// variant (§4.4): inside the state directory for copy/reflink, since
    /// the directory is ours to mutate freely before the snapshot; in the
    /// `.build` sidecar for subvolume, since a subvolume can't be touched
    /// after creation and the state directory itself doesn't exist yet
    /// while the build is in progress.
    pub fn lock_path(&self, image_id: &str, id: StateId, backend: FsBackendKind) -> PathBuf {
        match backend {
            FsBackendKind::Subvolume => self.build_sidecar_dir(image_id).join(format!("{}.lock", id.as_str())),
            FsBackendKind::Copy | FsBackendKind::Reflink => self.state_dir(image_id, id).join(".build.lock"),
        }
    }

    /// Completion marker path, paired with [`Layout::lock_path`] (§4.4).
    pub fn marker_path(&self, image_id: &str, id: StateId, backend: FsBackendKind) -> PathBuf {
        match backend {
            FsBackendKind::Subvolume => self.build_sidecar_dir(image_id).join(format!("{}.ok", id.as_str())),
            FsBackendKind::Copy | FsBackendKind::Reflink => self.state_dir(image_id, id).join(".build.ok"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_engine_and_version_subdirectories() {
        let layout = Layout::new("/var/lib/prepcache");
        assert_eq!(
            layout.base_dir("postgres:16.2"),
            Path::new("/var/lib/prepcache/engines/postgres/16.2/base")
        );
    }

    #[test]
    fn state_dir_is_keyed_by_state_id() {
        let layout = Layout::new("/root");
        let id = StateId::new();
        let dir = layout.state_dir("pg:16", id);
        assert_eq!(dir.file_name().and_then(|n| n.to_str()), Some(id.as_str()));
    }

    #[test]
    fn copy_and_reflink_lock_marker_live_inside_the_state_dir() {
        let layout = Layout::new("/root");
        let id = StateId::new();
        for backend in [FsBackendKind::Copy, FsBackendKind::Reflink] {
            assert_eq!(layout.lock_path("pg:16", id, backend), layout.state_dir("pg:16", id).join(".build.lock"));
            assert_eq!(layout.marker_path("pg:16", id, backend), layout.state_dir("pg:16", id).join(".build.ok"));
        }
    }

    #[test]
    fn subvolume_lock_marker_live_in_the_sidecar_dir_keyed_by_id() {
        let layout = Layout::new("/root");
        let id = StateId::new();
        let lock = layout.lock_path("pg:16", id, FsBackendKind::Subvolume);
        let marker = layout.marker_path("pg:16", id, FsBackendKind::Subvolume);
        assert_eq!(lock, layout.build_sidecar_dir("pg:16").join(format!("{}.lock", id.as_str())));
        assert_eq!(marker, layout.build_sidecar_dir("pg:16").join(format!("{}.ok", id.as_str())));
    }
}
