// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! prepcache-fs: the FS Backend abstraction (§4.2) — directory layout,
//! capabilities, and the three backend variants (copy, reflink,
//! subvolume) behind a single `FsBackend` trait.

pub mod backend;
pub mod capabilities;
pub mod copy;
pub mod error;
pub mod layout;
pub mod reflink;
pub mod size;
pub mod subvolume;

pub use backend::{CloneHandle, FsBackend, MountDir};
pub use capabilities::Capabilities;
pub use copy::CopyBackend;
pub use error::FsError;
pub use layout::Layout;
pub use reflink::ReflinkBackend;
pub use size::measure_dir_size;
pub use subvolume::SubvolumeBackend;

use prepcache_core::FsBackendKind;
use std::sync::Arc;

/// Constructs the configured backend implementation for a given kind.
pub fn backend_for(kind: FsBackendKind) -> Arc<dyn FsBackend> {
    match kind {
        FsBackendKind::Copy => Arc::new(CopyBackend),
        FsBackendKind::Reflink => Arc::new(ReflinkBackend),
        FsBackendKind::Subvolume => Arc::new(SubvolumeBackend),
    }
}
