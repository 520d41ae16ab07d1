// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The opaque `MetaStore` (§1, §3): persistence for `Job`/`Task` rows
//! and each job's append-only event sequence. Kept separate from
//! [`crate::StateStore`] because it has no eviction-relevant queries —
//! the Capacity Manager never looks at a job.
//!
//! Events are stored as opaque JSON payloads rather than a
//! `prepcache-wire` type directly, so this crate doesn't need to depend
//! on the wire DTOs; the coordinator (which depends on both) is
//! responsible for (de)serializing an event body around `append_event`
//! / `list_events_since`.

use crate::StoreError;
use parking_lot::Mutex;
use prepcache_core::{Job, JobId, Task, TaskId};
use std::collections::HashMap;

/// One stored event: its assigned index, timestamp, and opaque body.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub index: u64,
    pub ts: String,
    pub payload: serde_json::Value,
}

/// The typed Job/Task/event persistence surface (§3, §4.6).
pub trait JobStore: Send + Sync {
    fn create_job(&self, job: Job) -> Result<(), StoreError>;
    fn get_job(&self, id: JobId) -> Option<Job>;
    /// Replace a job row wholesale after a local mutation (`Job::start`,
    /// `succeed`, `fail`, ...). Fails if the row doesn't exist.
    fn save_job(&self, job: Job) -> Result<(), StoreError>;
    /// Jobs in `queued` or `running` (§4.6 "Recovery on restart").
    fn list_nonterminal_jobs(&self) -> Vec<Job>;

    fn create_task(&self, task: Task) -> Result<(), StoreError>;
    fn get_task(&self, id: TaskId) -> Option<Task>;
    fn save_task(&self, task: Task) -> Result<(), StoreError>;
    /// Tasks for a job, ordered by `position`.
    fn list_tasks(&self, job_id: JobId) -> Vec<Task>;

    /// Append one event, returning its assigned index (monotonic per
    /// job, starting at 0).
    fn append_event(&self, job_id: JobId, ts: String, payload: serde_json::Value) -> u64;
    /// Events with `index >= since`, in index order.
    fn list_events_since(&self, job_id: JobId, since: u64) -> Vec<RawEvent>;
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    tasks: HashMap<TaskId, Task>,
    task_order: HashMap<JobId, Vec<TaskId>>,
    events: HashMap<JobId, Vec<RawEvent>>,
}

/// In-process `JobStore`: a single mutex guarding every map, the same
/// transactional shape as [`crate::InMemoryStateStore`].
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn create_job(&self, job: Job) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.jobs.contains_key(&job.job_id) {
            return Err(StoreError::JobAlreadyExists(job.job_id.to_string()));
        }
        inner.jobs.insert(job.job_id, job);
        Ok(())
    }

    fn get_job(&self, id: JobId) -> Option<Job> {
        self.inner.lock().jobs.get(&id).cloned()
    }

    fn save_job(&self, job: Job) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.jobs.contains_key(&job.job_id) {
            return Err(StoreError::Unavailable(format!("no such job: {}", job.job_id)));
        }
        inner.jobs.insert(job.job_id, job);
        Ok(())
    }

    fn list_nonterminal_jobs(&self) -> Vec<Job> {
        self.inner.lock().jobs.values().filter(|j| !j.status.is_terminal()).cloned().collect()
    }

    fn create_task(&self, task: Task) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.tasks.contains_key(&task.task_id) {
            return Err(StoreError::TaskAlreadyExists(task.task_id.to_string()));
        }
        inner.task_order.entry(task.job_id).or_default().push(task.task_id);
        inner.tasks.insert(task.task_id, task);
        Ok(())
    }

    fn get_task(&self, id: TaskId) -> Option<Task> {
        self.inner.lock().tasks.get(&id).cloned()
    }

    fn save_task(&self, task: Task) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.tasks.contains_key(&task.task_id) {
            return Err(StoreError::Unavailable(format!("no such task: {}", task.task_id)));
        }
        inner.tasks.insert(task.task_id, task);
        Ok(())
    }

    fn list_tasks(&self, job_id: JobId) -> Vec<Task> {
        let inner = self.inner.lock();
        let mut tasks: Vec<Task> = inner
            .task_order
            .get(&job_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.tasks.get(id).cloned())
            .collect();
        tasks.sort_by_key(|t| t.position);
        tasks
    }

    fn append_event(&self, job_id: JobId, ts: String, payload: serde_json::Value) -> u64 {
        let mut inner = self.inner.lock();
        let log = inner.events.entry(job_id).or_default();
        let index = log.len() as u64;
        log.push(RawEvent { index, ts, payload });
        index
    }

    fn list_events_since(&self, job_id: JobId, since: u64) -> Vec<RawEvent> {
        self.inner
            .lock()
            .events
            .get(&job_id)
            .map(|log| log.iter().filter(|e| e.index >= since).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prepcache_core::TaskKind;

    #[test]
    fn create_job_rejects_duplicates() {
        let store = InMemoryJobStore::new();
        let job = Job::builder().build();
        store.create_job(job.clone()).expect("first insert");
        let err = store.create_job(job).expect_err("duplicate rejected");
        assert!(matches!(err, StoreError::JobAlreadyExists(_)));
    }

    #[test]
    fn save_job_persists_status_transitions() {
        let store = InMemoryJobStore::new();
        let mut job = Job::builder().build();
        store.create_job(job.clone()).expect("insert");
        job.start();
        store.save_job(job.clone()).expect("save");
        assert_eq!(store.get_job(job.job_id).expect("job").status, prepcache_core::JobStatus::Running);
    }

    #[test]
    fn list_nonterminal_jobs_excludes_succeeded_and_failed() {
        let store = InMemoryJobStore::new();
        let queued = Job::builder().build();
        let succeeded = Job::builder().status(prepcache_core::JobStatus::Succeeded).build();
        store.create_job(queued.clone()).expect("insert queued");
        store.create_job(succeeded).expect("insert succeeded");
        let nonterminal = store.list_nonterminal_jobs();
        assert_eq!(nonterminal.len(), 1);
        assert_eq!(nonterminal[0].job_id, queued.job_id);
    }

    #[test]
    fn list_tasks_is_ordered_by_position() {
        let store = InMemoryJobStore::new();
        let job_id = JobId::new();
        let second = Task::builder().job_id(job_id).position(1).kind(TaskKind::PrepareInstance).build();
        let first = Task::builder().job_id(job_id).position(0).kind(TaskKind::Plan).build();
        store.create_task(second.clone()).expect("insert second");
        store.create_task(first.clone()).expect("insert first");
        let tasks = store.list_tasks(job_id);
        assert_eq!(tasks.iter().map(|t| t.task_id).collect::<Vec<_>>(), vec![first.task_id, second.task_id]);
    }

    #[test]
    fn events_are_indexed_monotonically_and_filterable_since() {
        let store = InMemoryJobStore::new();
        let job_id = JobId::new();
        store.append_event(job_id, "t0".into(), serde_json::json!({"type": "status"}));
        store.append_event(job_id, "t1".into(), serde_json::json!({"type": "log"}));
        let all = store.list_events_since(job_id, 0);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].index, 0);
        assert_eq!(all[1].index, 1);

        let since_one = store.list_events_since(job_id, 1);
        assert_eq!(since_one.len(), 1);
        assert_eq!(since_one[0].ts, "t1");
    }
}
