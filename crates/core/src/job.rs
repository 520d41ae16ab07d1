// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job and Task records: the request lifecycle (§3, §4.6).

use crate::error::CacheError;
use crate::state::{PrepareKind, StateId};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Identifier for a submitted job.
    pub struct JobId("job-");
}

crate::define_id! {
    /// Identifier for a task within a job.
    pub struct TaskId("tsk-");
}

/// Job lifecycle status (§4.6).
///
/// `Succeeded`/`Failed` are terminal and sticky: cancellation of a
/// terminal job is a no-op. Cancellation surfaces as `Failed` carrying a
/// `cancelled` error code rather than as a distinct third outcome,
/// preserving the two-outcome terminal taxonomy (§9 Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

crate::simple_display! {
    JobStatus {
        Queued => "queued",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Task kind (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Plan,
    StateExecute,
    PrepareInstance,
    ResolveImage,
}

crate::simple_display! {
    TaskKind {
        Plan => "plan",
        StateExecute => "state_execute",
        PrepareInstance => "prepare_instance",
        ResolveImage => "resolve_image",
    }
}

/// Task lifecycle status. `Running -> Queued` is permitted only at
/// recovery time for `state_execute` tasks whose expected output state
/// vanished from the store (§4.6 recovery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

crate::simple_display! {
    TaskStatus {
        Queued => "queued",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
    }
}

/// What a task consumes as input: either a resolved image, or a state
/// produced by a prior task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskInput {
    Image { id: String },
    State { id: StateId },
}

/// A single task belonging to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub position: u32,
    pub kind: TaskKind,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<TaskInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_state_id: Option<StateId>,
    pub cached: bool,
}

crate::builder! {
    pub struct TaskBuilder => Task {
        computed { task_id: TaskId = TaskId::new() }
        set { job_id: JobId = JobId::new() }
        set { position: u32 = 0 }
        set { kind: TaskKind = TaskKind::Plan }
        set { status: TaskStatus = TaskStatus::Queued }
        option { input: TaskInput = None }
        option { task_hash: String = None }
        option { output_state_id: StateId = None }
        set { cached: bool = false }
    }
}

/// The outcome of a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub dsn: String,
    pub instance_id: crate::instance::InstanceId,
    pub state_id: StateId,
    pub image_id: String,
    pub prepare_kind: PrepareKind,
    pub prepare_args_normalized: String,
}

/// The job lifecycle record (§3, §4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub prepare_kind: PrepareKind,
    pub image_id: String,
    pub plan_only: bool,
    pub prepare_args_normalized: String,
    pub status: JobStatus,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CacheError>,
    /// The original request, serialized, for recovery after restart (§4.6).
    pub serialized_request: String,
}

impl Job {
    /// Transition to `running`. No-op if already terminal or running.
    pub fn start(&mut self) {
        if self.status == JobStatus::Queued {
            self.status = JobStatus::Running;
        }
    }

    /// Transition to `succeeded`. Terminal states are sticky.
    pub fn succeed(&mut self, result: JobResult, finished_at: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Succeeded;
        self.result = Some(result);
        self.finished_at = Some(finished_at.into());
    }

    /// Transition to `succeeded` without a result — used for
    /// `plan_only` requests (§6), which stop once the task plan is
    /// fully resolved and never reach `prepare_instance`.
    pub fn succeed_planned(&mut self, finished_at: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Succeeded;
        self.finished_at = Some(finished_at.into());
    }

    /// Transition to `failed`, carrying the classified error. Terminal
    /// states are sticky — including a cancellation request arriving
    /// after the job already finished.
    pub fn fail(&mut self, error: CacheError, finished_at: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(finished_at.into());
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        computed { job_id: JobId = JobId::new() }
        set { prepare_kind: PrepareKind = PrepareKind::Sql }
        into { image_id: String = "pg:16" }
        set { plan_only: bool = false }
        into { prepare_args_normalized: String = "" }
        set { status: JobStatus = JobStatus::Queued }
        into { created_at: String = "1970-01-01T00:00:00.000000000Z" }
        option { finished_at: String = None }
        option { result: JobResult = None }
        option { error: CacheError = None }
        into { serialized_request: String = "{}" }
    }
}
