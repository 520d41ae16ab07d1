// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracks the runtime + writable clone backing each live [`Instance`]
//! (§3: "An Instance exclusively owns its runtime clone directory for
//! its lifetime; on teardown it releases the clone via the backend's
//! cleanup hook"). Neither a `RuntimeHandle` nor a `CloneHandle` is
//! serializable, so this lives only in-process, the same shape as
//! [`crate::registry::JobRunnerRegistry`] for running jobs.

use parking_lot::Mutex;
use prepcache_core::InstanceId;
use prepcache_fs::CloneHandle;
use std::collections::HashMap;

use prepcache_adapters::RuntimeHandle;

struct ActiveInstance {
    runtime: RuntimeHandle,
    clone: CloneHandle,
}

/// In-process registry of live instances' runtime + clone handles, for
/// eventual teardown. Holding no entry for an `instance_id` is not an
/// error — it just means there's nothing left to tear down (already
/// stopped, or never tracked in this process, e.g. after a restart).
#[derive(Default)]
pub struct InstanceRuntimes {
    inner: Mutex<HashMap<InstanceId, ActiveInstance>>,
}

impl InstanceRuntimes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, instance_id: InstanceId, runtime: RuntimeHandle, clone: CloneHandle) {
        self.inner.lock().insert(instance_id, ActiveInstance { runtime, clone });
    }

    /// Remove and return the tracked runtime + clone, if any, so the
    /// caller can stop/clean them up outside the lock.
    pub fn take(&self, instance_id: InstanceId) -> Option<(RuntimeHandle, CloneHandle)> {
        self.inner.lock().remove(&instance_id).map(|entry| (entry.runtime, entry.clone))
    }
}
