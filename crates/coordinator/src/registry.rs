// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job runner registry (§5, §9 "Job registry lifetime"): maps a
//! running job to its cancellation handle and event notifier. A
//! registration cannot outlive the job's terminal status transition —
//! the driving task holds a [`RegistrationGuard`] for exactly as long as
//! it takes the job from `running` to `succeeded`/`failed`, and the
//! guard's `Drop` removes the entry unconditionally. Callers that ask
//! for a cancel handle (e.g. an external cancel-job request) only ever
//! see a clone that stops mattering once the entry is gone; they never
//! keep the job alive.

use parking_lot::Mutex;
use prepcache_core::{CancelToken, JobId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::events::JobEvents;

/// What's registered for one in-flight job.
pub struct JobRunnerEntry {
    pub cancel: CancelToken,
    pub events: Arc<JobEvents>,
}

type Map = HashMap<JobId, Arc<JobRunnerEntry>>;

#[derive(Clone, Default)]
pub struct JobRunnerRegistry {
    inner: Arc<Mutex<Map>>,
}

impl JobRunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job_id` as running, returning the shared entry and a
    /// guard that unregisters it on drop. Call this exactly once per
    /// job, immediately before driving its task loop.
    pub fn register(&self, job_id: JobId) -> (Arc<JobRunnerEntry>, RegistrationGuard) {
        let entry = Arc::new(JobRunnerEntry { cancel: CancelToken::new(), events: Arc::new(JobEvents::new()) });
        self.inner.lock().insert(job_id, entry.clone());
        (entry, RegistrationGuard { inner: self.inner.clone(), job_id })
    }

    /// The event notifier for a running job, or `None` if it isn't
    /// registered (not started yet, or already terminal).
    pub fn events(&self, job_id: JobId) -> Option<Arc<JobEvents>> {
        self.inner.lock().get(&job_id).map(|e| e.events.clone())
    }

    /// A cancellation handle for a running job, or `None` if it isn't
    /// registered. A caller cancelling a handle whose job has already
    /// finished (and been deregistered) simply has nothing left to
    /// cancel — there is no way to reach a stale entry through this map.
    pub fn cancel_handle(&self, job_id: JobId) -> Option<CancelToken> {
        self.inner.lock().get(&job_id).map(|e| e.cancel.clone())
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        self.inner.lock().contains_key(&job_id)
    }
}

pub struct RegistrationGuard {
    inner: Arc<Mutex<Map>>,
    job_id: JobId,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.inner.lock().remove(&self.job_id);
    }
}
