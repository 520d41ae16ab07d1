// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job driver loop (§4.6): takes a job from `queued`/recovering
//! through its task plan to `succeeded` or `failed`. This is the one
//! place that ties the Fingerprinter, Build Lock, Capacity Manager,
//! State Store, and FS Backend (via [`crate::execute`]) into the
//! top-level job/task state machine described in §4.6 and §5.
//!
//! Every call into this module re-reads its task list fresh from the
//! store rather than threading state through the async call stack —
//! that's what makes recovery (§4.6 "Recovery on restart") just another
//! entry into the same loop instead of a separate code path.

use prepcache_core::{cancel, CacheError, CancelToken, Clock, Job, JobId, JobResult, PrepareKind, StateId, Task, TaskKind, TaskStatus};
use prepcache_wire::EventBody;

use crate::execute::PreparationStep;
use crate::normalize::{self, NormalizedRequest};
use crate::Coordinator;

/// What driving a job's plan to completion produced: either a handed-out
/// instance, or — for a `plan_only` request (§6) — nothing, because the
/// plan stopped once it was fully resolved.
enum DriveOutcome {
    Completed(JobResult),
    PlannedOnly,
}

impl<C: Clock + 'static> Coordinator<C> {
    /// Drives `job_id` from wherever its task list currently stands
    /// through to a terminal job status. Registers the job in the
    /// runner registry for the duration (§9 "Job registry lifetime") so
    /// `cancel()`/`events_since()` callers can reach it, and
    /// unregisters unconditionally on the way out.
    pub(crate) async fn run_job(&self, job_id: JobId) -> Result<(), CacheError> {
        let Some(mut job) = self.job_store.get_job(job_id) else {
            return Err(CacheError::internal(format!("job {job_id} not found")));
        };
        if job.status.is_terminal() {
            return Ok(());
        }

        let (entry, _guard) = self.registry.register(job_id);
        let cancel = entry.cancel.clone();
        let events = entry.events.clone();

        job.start();
        self.job_store.save_job(job.clone()).map_err(|e| CacheError::internal(e.to_string()))?;
        self.emit(job_id, &events, EventBody::Status { status: job.status })?;

        let outcome = self.drive_loop(&job, &cancel, &events).await;

        let now = self.clock.now_rfc3339();
        match outcome {
            Ok(DriveOutcome::Completed(result)) => {
                job.succeed(result.clone(), now);
                self.emit(job_id, &events, EventBody::Result { result })?;
            }
            Ok(DriveOutcome::PlannedOnly) => {
                job.succeed_planned(now);
            }
            Err(err) => {
                job.fail(err.clone(), now);
                self.emit(job_id, &events, EventBody::Error { error: err })?;
            }
        }
        self.job_store.save_job(job.clone()).map_err(|e| CacheError::internal(e.to_string()))?;
        self.emit(job_id, &events, EventBody::Status { status: job.status })?;
        Ok(())
    }

    /// Runs every task in `job`'s plan, in position order, growing the
    /// plan as `migrate`'s dry-plan task discovers its changesets
    /// (§4.6 "Plan"). Returns once the plan is exhausted: with the
    /// handed-out instance's result, or — for `plan_only` — as soon as
    /// every known task has a resolved output.
    async fn drive_loop(&self, job: &Job, cancel: &CancelToken, events: &crate::events::JobEvents) -> Result<DriveOutcome, CacheError> {
        let request: prepcache_wire::SubmitRequest = serde_json::from_str(&job.serialized_request)
            .map_err(|e| CacheError::internal(format!("corrupt serialized request: {e}")))?;
        let normalized = normalize::normalize(&request, self.path_mapper.as_ref())?;
        let engine_version = crate::engine_version_string(&normalized.image_id);

        // The state produced by the most recently completed
        // `state_execute` task; the next one's input is the image on
        // the first iteration, or this state thereafter (chained
        // preparation, §3 `parent_state_id`).
        let mut last_state_id: Option<StateId> = None;

        loop {
            cancel::check(cancel)?;
            let tasks = self.job_store.list_tasks(job.job_id);
            let Some(mut task) = tasks.into_iter().find(|t| t.status != TaskStatus::Succeeded) else {
                break;
            };
            if task.status == TaskStatus::Failed {
                return Err(CacheError::internal(format!("task {} already failed", task.task_id)));
            }

            if job.plan_only && task.kind != TaskKind::Plan && task.kind != TaskKind::ResolveImage {
                // Everything after the plan task commits state/runs
                // builds; a plan_only request stops here, once the
                // remaining tasks are known but unexecuted.
                return Ok(DriveOutcome::PlannedOnly);
            }

            task.status = TaskStatus::Running;
            self.job_store.save_task(task.clone()).map_err(|e| CacheError::internal(e.to_string()))?;
            self.emit(job.job_id, events, EventBody::Task { task_id: task.task_id, status: task.status })?;

            match self.run_task(job, &task, &normalized, engine_version.clone(), last_state_id, cancel).await {
                Ok(outcome) => {
                    task.status = TaskStatus::Succeeded;
                    task.task_hash = outcome.task_hash.clone();
                    task.output_state_id = outcome.output_state_id;
                    task.cached = outcome.cached;
                    if task.kind == TaskKind::Plan && matches!(normalized.prepare_kind, PrepareKind::Migrate) {
                        self.append_migrate_tasks(job.job_id, task.position, outcome.changeset_count.unwrap_or(0))?;
                    }
                    self.job_store.save_task(task.clone()).map_err(|e| CacheError::internal(e.to_string()))?;
                    self.emit(job.job_id, events, EventBody::Task { task_id: task.task_id, status: task.status })?;

                    if let Some(id) = outcome.output_state_id {
                        last_state_id = Some(id);
                    }
                    if let Some(result) = outcome.result {
                        return Ok(DriveOutcome::Completed(result));
                    }
                }
                Err(err) => {
                    task.status = TaskStatus::Failed;
                    self.job_store.save_task(task.clone()).map_err(|e| CacheError::internal(e.to_string()))?;
                    self.emit(job.job_id, events, EventBody::Task { task_id: task.task_id, status: task.status })?;
                    return Err(err);
                }
            }
        }

        if job.plan_only {
            Ok(DriveOutcome::PlannedOnly)
        } else {
            Err(CacheError::internal("job plan exhausted without a prepare_instance result"))
        }
    }

    fn append_migrate_tasks(&self, job_id: JobId, plan_position: u32, changeset_count: usize) -> Result<(), CacheError> {
        for (i, kind) in crate::plan::migrate_remaining_task_kinds(changeset_count).into_iter().enumerate() {
            let task = Task {
                task_id: prepcache_core::TaskId::new(),
                job_id,
                position: plan_position + 1 + i as u32,
                kind,
                status: TaskStatus::Queued,
                input: None,
                task_hash: None,
                output_state_id: None,
                cached: false,
            };
            self.job_store.create_task(task).map_err(|e| CacheError::internal(e.to_string()))?;
        }
        Ok(())
    }

    async fn run_task(
        &self,
        job: &Job,
        task: &Task,
        normalized: &NormalizedRequest,
        engine_version: String,
        last_state_id: Option<StateId>,
        cancel: &CancelToken,
    ) -> Result<TaskOutcome, CacheError> {
        match task.kind {
            TaskKind::ResolveImage => Ok(TaskOutcome::default()),
            TaskKind::Plan => match normalized.prepare_kind {
                PrepareKind::Sql => Ok(TaskOutcome::default()),
                PrepareKind::Migrate => {
                    let changesets = self.run_migrate_plan(normalized, job.job_id, cancel).await?;
                    Ok(TaskOutcome { changeset_count: Some(changesets.len()), ..TaskOutcome::default() })
                }
            },
            TaskKind::StateExecute => {
                let input_ref = match last_state_id {
                    Some(id) => prepcache_cache::TaskInputRef::State(id),
                    None => prepcache_cache::TaskInputRef::Image(normalized.image_id.clone()),
                };
                let step = match normalized.prepare_kind {
                    PrepareKind::Sql => PreparationStep::Sql,
                    PrepareKind::Migrate => {
                        let changesets = self.run_migrate_plan(normalized, job.job_id, cancel).await?;
                        match changesets.into_iter().nth(task.position.checked_sub(1).unwrap_or(0) as usize) {
                            Some(changeset) => PreparationStep::Migrate(changeset),
                            None => PreparationStep::MigrateIdentity,
                        }
                    }
                };
                let outcome = self.execute_state_execute(normalized, input_ref, step, engine_version, cancel).await?;
                Ok(TaskOutcome {
                    task_hash: Some(outcome.task_hash),
                    output_state_id: Some(outcome.output_state_id),
                    cached: outcome.cached,
                    ..TaskOutcome::default()
                })
            }
            TaskKind::PrepareInstance => {
                let state_id = last_state_id
                    .ok_or_else(|| CacheError::internal("prepare_instance has no state to clone from".to_string()))?;
                let prepared = self.execute_prepare_instance(job.job_id, &normalized.image_id, state_id, cancel).await?;
                let result = JobResult {
                    dsn: prepared.dsn,
                    instance_id: prepared.instance_id,
                    state_id,
                    image_id: normalized.image_id.clone(),
                    prepare_kind: normalized.prepare_kind,
                    prepare_args_normalized: normalized.display_args(),
                };
                Ok(TaskOutcome { result: Some(result), ..TaskOutcome::default() })
            }
        }
    }
}

/// What running one task produced, decoupled from `Task`'s own fields
/// so `drive_loop` can apply the parts that matter per task kind.
#[derive(Default)]
struct TaskOutcome {
    task_hash: Option<String>,
    output_state_id: Option<StateId>,
    cached: bool,
    changeset_count: Option<usize>,
    result: Option<JobResult>,
}
