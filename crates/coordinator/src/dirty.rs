// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dirty-state detection (§4.4): before trusting a cached state, the
//! coordinator checks that the database-specific dirty sentinel is
//! absent, an "initialized" marker is present, and the build's
//! completion marker is present. Any failure means the state is
//! unreachable to readers — it gets removed and rebuilt (§4.4, §7).
//!
//! Sentinel/marker filenames are Postgres's (the only engine family
//! in scope, §1); a second engine family would key these by
//! `engine_version` instead of hard-coding one pair.

use std::path::Path;

/// A process-lock file left behind by an unclean Postgres shutdown.
/// Its presence in a state directory marks the state unusable.
pub const DIRTY_SENTINEL_FILENAME: &str = "postmaster.pid";

/// Written by `initdb` once a data directory is fully initialized.
/// Its absence means the directory is a partial / in-progress build,
/// even if a completion marker is somehow present.
pub const INITIALIZED_MARKER_FILENAME: &str = "PG_VERSION";

pub async fn dirty_sentinel_present(state_dir: &Path) -> bool {
    tokio::fs::try_exists(state_dir.join(DIRTY_SENTINEL_FILENAME)).await.unwrap_or(false)
}

pub async fn initialized_marker_present(state_dir: &Path) -> bool {
    tokio::fs::try_exists(state_dir.join(INITIALIZED_MARKER_FILENAME)).await.unwrap_or(false)
}

/// True if `state_dir` + `marker_path` together represent a usable,
/// clean state (§4.4, §8 invariant 3: "marker present AND row present
/// AND dirty-sentinel absent"). The row half of that predicate is the
/// caller's responsibility — this only checks the filesystem side.
pub async fn is_clean(state_dir: &Path, marker_path: &Path) -> bool {
    if !tokio::fs::try_exists(marker_path).await.unwrap_or(false) {
        return false;
    }
    if dirty_sentinel_present(state_dir).await {
        return false;
    }
    initialized_marker_present(state_dir).await
}
