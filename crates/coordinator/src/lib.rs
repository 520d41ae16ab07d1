// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! prepcache-coordinator: the Job Coordinator (§4.6, Component F) — the
//! only component that knows about jobs and tasks. Drives the
//! Fingerprinter, Build Lock, Capacity Manager, State Store, FS Backend
//! and adapter traits from the other crates to turn a `Submit` request
//! into a running database instance.

pub mod adapter_error;
pub mod digest;
pub mod dirty;
mod drive;
mod execute;
pub mod events;
pub mod eviction;
pub mod instances;
pub mod normalize;
pub mod plan;
pub mod registry;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use prepcache_adapters::{Dbms, MigrateRunner, PathMapper, Runner, Runtime};
use prepcache_core::{
    CacheError, CancelToken, CapacitySettings, Clock, ErrorCode, InstanceId, Job, JobId, State, SystemClock,
};
use prepcache_fs::{FsBackend, FsError, Layout};
use prepcache_store::{JobStore, StateStore};
use prepcache_wire::{Event, EventBody, StatusResponse};

use crate::eviction::CoordinatorEvictionBackend;
use crate::events::JobEvents;
use crate::instances::InstanceRuntimes;
use crate::registry::JobRunnerRegistry;

/// Everything the coordinator needs wired in before it can drive a
/// job: the two stores, the FS Backend, the directory layout, where
/// (if anywhere) to reload capacity settings from, and the adapter
/// trait objects (§6).
pub struct CoordinatorDeps<C: Clock> {
    pub state_store: Arc<dyn StateStore>,
    pub job_store: Arc<dyn JobStore>,
    pub fs_backend: Arc<dyn FsBackend>,
    pub layout: Layout,
    /// Reloaded at the start of every capacity enforcement cycle (§1
    /// "not cached for process lifetime"); `None` falls back to
    /// `default_capacity` for the life of the process.
    pub config_path: Option<PathBuf>,
    pub default_capacity: CapacitySettings,
    pub path_mapper: Arc<dyn PathMapper>,
    pub runtime: Arc<dyn Runtime>,
    pub dbms: Arc<dyn Dbms>,
    pub sql_runner: Arc<dyn Runner>,
    pub migrate_runner: Arc<dyn MigrateRunner>,
    pub clock: C,
}

/// The Job Coordinator (§4.6): the top-level orchestrator that turns a
/// `Submit` request into a fingerprinted, built, and handed-out
/// database instance. Cheap to clone — every field is either an `Arc`
/// or small `Copy`/cheap-`Clone` data, so a clone can be moved into a
/// spawned task driving one job.
#[derive(Clone)]
pub struct Coordinator<C: Clock + 'static = SystemClock> {
    state_store: Arc<dyn StateStore>,
    job_store: Arc<dyn JobStore>,
    fs_backend: Arc<dyn FsBackend>,
    eviction_backend: Arc<dyn prepcache_cache::EvictionBackend>,
    layout: Layout,
    config_path: Option<PathBuf>,
    default_capacity: CapacitySettings,
    path_mapper: Arc<dyn PathMapper>,
    runtime: Arc<dyn Runtime>,
    dbms: Arc<dyn Dbms>,
    sql_runner: Arc<dyn Runner>,
    migrate_runner: Arc<dyn MigrateRunner>,
    clock: C,
    registry: JobRunnerRegistry,
    instances: Arc<InstanceRuntimes>,
}

impl<C: Clock + 'static> Coordinator<C> {
    pub fn new(deps: CoordinatorDeps<C>) -> Self {
        let eviction_backend: Arc<dyn prepcache_cache::EvictionBackend> = Arc::new(CoordinatorEvictionBackend::new(
            deps.fs_backend.clone(),
            deps.state_store.clone(),
            deps.layout.clone(),
        ));
        Self {
            state_store: deps.state_store,
            job_store: deps.job_store,
            fs_backend: deps.fs_backend,
            eviction_backend,
            layout: deps.layout,
            config_path: deps.config_path,
            default_capacity: deps.default_capacity,
            path_mapper: deps.path_mapper,
            runtime: deps.runtime,
            dbms: deps.dbms,
            sql_runner: deps.sql_runner,
            migrate_runner: deps.migrate_runner,
            clock: deps.clock,
            registry: JobRunnerRegistry::new(),
            instances: Arc::new(InstanceRuntimes::new()),
        }
    }

    /// Submits a request: validates and normalizes it, persists the
    /// job and its initially-known tasks, and spawns the driver task
    /// that actually runs them (§4.6, §6 "Response on submit").
    pub async fn submit(&self, request: prepcache_wire::SubmitRequest) -> Result<prepcache_wire::SubmitResponse, CacheError>
    where
        C: Send + Sync,
    {
        let normalized = normalize::normalize(&request, self.path_mapper.as_ref())?;
        let now = self.clock.now_rfc3339();
        let job_id = JobId::new();
        let prepare_kind = match request.prepare_kind {
            prepcache_wire::SubmitKind::Sql => prepcache_core::PrepareKind::Sql,
            prepcache_wire::SubmitKind::Migrate => prepcache_core::PrepareKind::Migrate,
        };
        let serialized_request =
            serde_json::to_string(&request).map_err(|e| CacheError::internal(format!("failed to serialize request: {e}")))?;

        let job = Job {
            job_id,
            prepare_kind,
            image_id: request.image_id.clone(),
            plan_only: normalized.plan_only,
            prepare_args_normalized: normalized.display_args(),
            status: prepcache_core::JobStatus::Queued,
            created_at: now,
            finished_at: None,
            result: None,
            error: None,
            serialized_request,
        };
        self.job_store.create_job(job).map_err(|e| CacheError::internal(e.to_string()))?;

        for (i, kind) in plan::initial_task_kinds(prepare_kind).into_iter().enumerate() {
            let task = prepcache_core::Task {
                task_id: prepcache_core::TaskId::new(),
                job_id,
                position: i as u32,
                kind,
                status: prepcache_core::TaskStatus::Queued,
                input: None,
                task_hash: None,
                output_state_id: None,
                cached: false,
            };
            self.job_store.create_task(task).map_err(|e| CacheError::internal(e.to_string()))?;
        }

        let coordinator = self.clone();
        tokio::spawn(async move {
            if let Err(err) = coordinator.run_job(job_id).await {
                tracing::warn!(job_id = %job_id, error = %err, "job driver exited without reaching a terminal status");
            }
        });

        Ok(prepcache_wire::SubmitResponse::queued(job_id.to_string()))
    }

    /// The job record plus its task list (§6 "Status endpoint").
    pub fn status(&self, job_id: JobId) -> Option<StatusResponse> {
        let job = self.job_store.get_job(job_id)?;
        let tasks = self.job_store.list_tasks(job_id);
        Some(StatusResponse { job, tasks })
    }

    /// Events with `index >= since`, decoded back into their typed
    /// bodies (§6 "Events endpoint").
    pub fn events_since(&self, job_id: JobId, since: u64) -> Result<Vec<Event>, CacheError> {
        self.job_store
            .list_events_since(job_id, since)
            .into_iter()
            .map(|raw| {
                let body: EventBody =
                    serde_json::from_value(raw.payload).map_err(|e| CacheError::internal(format!("corrupt event payload: {e}")))?;
                Ok(Event { index: raw.index, ts: raw.ts, body })
            })
            .collect()
    }

    /// Waits for at least one event past `since` if the job is still
    /// running, then returns whatever is available — the long-poll
    /// shape of the events endpoint (§6, §9 "Event subscription").
    pub async fn wait_for_events(
        &self,
        job_id: JobId,
        since: u64,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<Event>, CacheError> {
        if let Some(events) = self.registry.events(job_id) {
            events.wait_for_more(since, timeout, cancel).await?;
        }
        self.events_since(job_id, since)
    }

    /// Requests cancellation of a running job. Returns `false` if the
    /// job isn't currently registered (not started, or already
    /// terminal) — there is nothing left to cancel in that case.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.registry.cancel_handle(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        self.registry.is_running(job_id)
    }

    /// Tears down a live instance: stops its runtime, releases its
    /// writable clone, decrements the backing state's ref count, and
    /// deletes the instance row. A no-op if the instance isn't tracked
    /// in this process (already stopped, or never tracked after a
    /// restart — §9 "Job registry lifetime" applies the same way to
    /// instances).
    pub async fn stop_instance(&self, instance_id: InstanceId, cancel: &CancelToken) -> Result<(), CacheError> {
        let Some((runtime_handle, clone)) = self.instances.take(instance_id) else {
            return Ok(());
        };
        let stop_result = self.runtime.stop(&runtime_handle, cancel).await;
        let cleanup_result = clone.cleanup().await;

        if let Some(instance) = self.state_store.get_instance(instance_id) {
            let now = self.clock.now_rfc3339();
            self.state_store.decref_state(instance.state_id, &now);
            let _ = self.state_store.delete_instance(instance_id);
        }

        stop_result.map_err(|e| adapter_error::classify_adapter_error(e, "prepare_step"))?;
        cleanup_result.map_err(|e| self.fs_err(e, "prepare_step"))?;
        Ok(())
    }

    /// Recovery on restart (§4.6 "Recovery on restart"): every
    /// nonterminal job's `running` tasks are reconciled (a
    /// `state_execute` task is promoted to `succeeded` if its output
    /// state still exists, else demoted back to `queued`; any other
    /// `running` task is simply demoted to `queued`), then the job is
    /// re-driven. Re-driving always re-enters `drive_job`'s main loop,
    /// which finds the first non-succeeded task fresh from the store —
    /// there is no separate "resume" code path.
    pub async fn recover(&self) -> Result<(), CacheError>
    where
        C: Send + Sync,
    {
        for job in self.job_store.list_nonterminal_jobs() {
            for mut task in self.job_store.list_tasks(job.job_id) {
                if task.status != prepcache_core::TaskStatus::Running {
                    continue;
                }
                task.status = match task.kind {
                    prepcache_core::TaskKind::StateExecute => {
                        let still_present =
                            task.output_state_id.map(|id| self.state_store.get_state(id).is_some()).unwrap_or(false);
                        if still_present {
                            prepcache_core::TaskStatus::Succeeded
                        } else {
                            prepcache_core::TaskStatus::Queued
                        }
                    }
                    _ => prepcache_core::TaskStatus::Queued,
                };
                self.job_store.save_task(task).map_err(|e| CacheError::internal(e.to_string()))?;
            }

            let coordinator = self.clone();
            let job_id = job.job_id;
            tokio::spawn(async move {
                if let Err(err) = coordinator.run_job(job_id).await {
                    tracing::warn!(job_id = %job_id, error = %err, "recovered job driver exited without reaching a terminal status");
                }
            });
        }
        Ok(())
    }

    /// Reloads capacity settings from `config_path` if one is
    /// configured (§1: settings are reloaded at the start of every
    /// enforcement cycle, never cached for the process lifetime).
    async fn load_capacity_settings(&self) -> Result<CapacitySettings, String> {
        match &self.config_path {
            Some(path) => {
                let text = tokio::fs::read_to_string(path).await.map_err(|e| e.to_string())?;
                let settings = prepcache_core::Settings::from_toml(&text).map_err(|e| e.to_string())?;
                Ok(settings.capacity)
            }
            None => Ok(self.default_capacity.clone()),
        }
    }

    async fn ensure_capacity(&self, protected: &HashSet<prepcache_core::StateId>, phase: &str, cancel: &CancelToken) -> Result<(), CacheError> {
        let settings = self.load_capacity_settings().await;
        let evict_lock_path = self.layout.evict_lock_path();
        prepcache_cache::ensure_capacity(
            self.state_store.as_ref(),
            self.eviction_backend.as_ref(),
            move || settings.clone(),
            &evict_lock_path,
            protected,
            phase,
            cancel,
        )
        .await
    }

    async fn is_state_clean(&self, state: &State) -> bool {
        let state_dir = self.layout.state_dir(&state.image_id, state.state_id);
        let marker_path = self.layout.marker_path(&state.image_id, state.state_id, self.fs_backend.kind());
        dirty::is_clean(&state_dir, &marker_path).await
    }

    /// Reconciles a dirty state row (§4.4: marker/row present but the
    /// directory shows signs of an interrupted build): removes the
    /// directory via the backend and deletes the row. Idempotent
    /// regardless of which side a crash lands between.
    async fn invalidate_state(&self, state: &State, cancel: &CancelToken) -> Result<(), CacheError> {
        let state_dir = self.layout.state_dir(&state.image_id, state.state_id);
        self.fs_backend.remove_path(&state_dir, cancel).await.map_err(|e| self.fs_err(e, "prepare_step"))?;
        self.state_store.delete_state(state.state_id).map_err(|e| CacheError::internal(e.to_string()))?;
        Ok(())
    }

    fn fs_err(&self, err: FsError, phase: &str) -> CacheError {
        fs_error_to_cache(err, phase)
    }

    fn emit(&self, job_id: JobId, events: &JobEvents, body: EventBody) -> Result<(), CacheError> {
        let ts = self.clock.now_rfc3339();
        let payload = serde_json::to_value(&body).map_err(|e| CacheError::internal(format!("failed to encode event: {e}")))?;
        self.job_store.append_event(job_id, ts, payload);
        events.bump();
        Ok(())
    }
}

fn fs_error_to_cache(err: FsError, phase: &str) -> CacheError {
    if matches!(err, FsError::Cancelled) {
        return CacheError::cancelled();
    }
    if err.looks_like_no_space() {
        return CacheError::new(ErrorCode::CacheLimitTooSmall, format!("{phase} ran out of disk space"))
            .with_details(json!({ "phase": phase, "source": err.to_string() }));
    }
    CacheError::internal(format!("{phase} failed: {err}")).with_details(json!({ "phase": phase }))
}

pub(crate) const DEFAULT_DB_USER: &str = "postgres";
pub(crate) const DEFAULT_DB_NAME: &str = "postgres";

pub(crate) fn engine_version_string(image_id: &str) -> String {
    let (engine, version) = prepcache_core::image::engine_version(image_id);
    format!("{engine}:{version}")
}
