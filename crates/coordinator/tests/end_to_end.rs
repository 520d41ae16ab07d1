// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end exercise of the Job Coordinator (§4.6) against in-memory
//! stores, a real `copy` FS Backend over a tempdir, and fake adapters —
//! the same shape of test the teacher's own coordinator-equivalent
//! suite uses to drive a full job without a real database or container
//! runtime.

use std::sync::Arc;
use std::time::Duration;

use prepcache_adapters::{FakeDbms, FakeMigrateRunner, FakeRunner, FakeRuntime, NoOpPathMapper, PendingChangeset};
use prepcache_cache::CapacitySettings;
use prepcache_coordinator::{Coordinator, CoordinatorDeps};
use prepcache_core::{CancelToken, FakeClock, JobStatus};
use prepcache_fs::{CopyBackend, Layout};
use prepcache_store::{InMemoryJobStore, InMemoryStateStore};
use prepcache_wire::{SubmitKind, SubmitRequest};

fn coordinator(root: &std::path::Path) -> Coordinator<FakeClock> {
    coordinator_with_migrate_runner(root, Arc::new(FakeMigrateRunner::new()))
}

fn coordinator_with_migrate_runner(root: &std::path::Path, migrate_runner: Arc<FakeMigrateRunner>) -> Coordinator<FakeClock> {
    let deps = CoordinatorDeps {
        state_store: Arc::new(InMemoryStateStore::new()),
        job_store: Arc::new(InMemoryJobStore::new()),
        fs_backend: Arc::new(CopyBackend),
        layout: Layout::new(root),
        config_path: None,
        default_capacity: CapacitySettings::default(),
        path_mapper: Arc::new(NoOpPathMapper),
        runtime: Arc::new(FakeRuntime::new()),
        dbms: Arc::new(FakeDbms::new()),
        sql_runner: Arc::new(FakeRunner::new()),
        migrate_runner,
        clock: FakeClock::new(),
    };
    Coordinator::new(deps)
}

async fn wait_for_terminal(coordinator: &Coordinator<FakeClock>, job_id: prepcache_core::JobId) -> prepcache_core::Job {
    for _ in 0..200 {
        if let Some(status) = coordinator.status(job_id) {
            if status.job.status.is_terminal() {
                return status.job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

fn sql_request(image_id: &str, args: Vec<&str>) -> SubmitRequest {
    SubmitRequest {
        prepare_kind: SubmitKind::Sql,
        image_id: image_id.to_string(),
        sql_args: args.into_iter().map(str::to_string).collect(),
        migrate_args: vec![],
        migrate_env: Default::default(),
        work_dir: None,
        stdin: None,
        plan_only: false,
    }
}

#[tokio::test]
async fn sql_job_runs_to_completion_and_hands_out_an_instance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coordinator = coordinator(dir.path());

    let request = sql_request("pg:16", vec!["-c", "select 1"]);
    let submitted = coordinator.submit(request).await.expect("submit");
    let job_id: prepcache_core::JobId = submitted.job_id.parse().expect("valid job id");

    let job = wait_for_terminal(&coordinator, job_id).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    let result = job.result.expect("result");
    assert!(result.dsn.starts_with("postgres://"));

    let status = coordinator.status(job_id).expect("status");
    assert!(status.tasks.iter().all(|t| t.status == prepcache_core::TaskStatus::Succeeded));
}

#[tokio::test]
async fn identical_sql_requests_reuse_the_cached_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coordinator = coordinator(dir.path());

    let first = coordinator.submit(sql_request("pg:16", vec!["-c", "select 1"])).await.expect("submit 1");
    let first_id: prepcache_core::JobId = first.job_id.parse().expect("id");
    let first_job = wait_for_terminal(&coordinator, first_id).await;
    let first_state = first_job.result.expect("result").state_id;

    let second = coordinator.submit(sql_request("pg:16", vec!["-c", "select 1"])).await.expect("submit 2");
    let second_id: prepcache_core::JobId = second.job_id.parse().expect("id");
    let second_job = wait_for_terminal(&coordinator, second_id).await;
    let second_state = second_job.result.expect("result").state_id;

    assert_eq!(first_state, second_state, "identical requests must fingerprint to the same state");

    let second_tasks = coordinator.status(second_id).expect("status").tasks;
    let execute = second_tasks.iter().find(|t| t.kind == prepcache_core::TaskKind::StateExecute).expect("execute task");
    assert!(execute.cached, "second build should have hit the cache");
}

#[tokio::test]
async fn differing_sql_args_produce_different_states() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coordinator = coordinator(dir.path());

    let a = coordinator.submit(sql_request("pg:16", vec!["-c", "select 1"])).await.expect("submit a");
    let a_id: prepcache_core::JobId = a.job_id.parse().expect("id");
    let a_state = wait_for_terminal(&coordinator, a_id).await.result.expect("result").state_id;

    let b = coordinator.submit(sql_request("pg:16", vec!["-c", "select 2"])).await.expect("submit b");
    let b_id: prepcache_core::JobId = b.job_id.parse().expect("id");
    let b_state = wait_for_terminal(&coordinator, b_id).await.result.expect("result").state_id;

    assert_ne!(a_state, b_state);
}

#[tokio::test]
async fn plan_only_request_succeeds_without_a_result() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coordinator = coordinator(dir.path());

    let mut request = sql_request("pg:16", vec!["-c", "select 1"]);
    request.plan_only = true;
    let submitted = coordinator.submit(request).await.expect("submit");
    let job_id: prepcache_core::JobId = submitted.job_id.parse().expect("id");

    let job = wait_for_terminal(&coordinator, job_id).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.result.is_none(), "plan_only jobs never hand out an instance");
}

#[tokio::test]
async fn migrate_job_runs_one_state_execute_per_pending_changeset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let migrate_runner = Arc::new(FakeMigrateRunner::new());
    migrate_runner.set_pending(vec![
        PendingChangeset { changeset_id: "001".into(), checksum: Some("a".into()), sql: None },
        PendingChangeset { changeset_id: "002".into(), checksum: Some("b".into()), sql: None },
    ]);
    let coordinator = coordinator_with_migrate_runner(dir.path(), migrate_runner.clone());

    let request = SubmitRequest {
        prepare_kind: SubmitKind::Migrate,
        image_id: "pg:16".to_string(),
        sql_args: vec![],
        migrate_args: vec!["update".to_string()],
        migrate_env: Default::default(),
        work_dir: None,
        stdin: None,
        plan_only: false,
    };

    let submitted = coordinator.submit(request).await.expect("submit");
    let job_id: prepcache_core::JobId = submitted.job_id.parse().expect("id");
    let job = wait_for_terminal(&coordinator, job_id).await;
    assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.error);

    let tasks = coordinator.status(job_id).expect("status").tasks;
    let execute_count = tasks.iter().filter(|t| t.kind == prepcache_core::TaskKind::StateExecute).count();
    assert_eq!(execute_count, 2, "one state_execute per pending changeset");
    assert_eq!(migrate_runner.applied_changeset_ids(), vec!["001".to_string(), "002".to_string()]);
}

#[tokio::test]
async fn migrate_job_with_no_pending_changesets_still_hands_out_an_instance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coordinator = coordinator(dir.path());

    let request = SubmitRequest {
        prepare_kind: SubmitKind::Migrate,
        image_id: "pg:16".to_string(),
        sql_args: vec![],
        migrate_args: vec!["update".to_string()],
        migrate_env: Default::default(),
        work_dir: None,
        stdin: None,
        plan_only: false,
    };

    let submitted = coordinator.submit(request).await.expect("submit");
    let job_id: prepcache_core::JobId = submitted.job_id.parse().expect("id");
    let job = wait_for_terminal(&coordinator, job_id).await;
    assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.error);

    let tasks = coordinator.status(job_id).expect("status").tasks;
    let execute_count = tasks.iter().filter(|t| t.kind == prepcache_core::TaskKind::StateExecute).count();
    assert_eq!(execute_count, 1, "zero pending changesets still gets one identity state_execute");
}

#[tokio::test]
async fn cancelling_a_running_job_fails_it_with_the_cancelled_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coordinator = coordinator(dir.path());

    let submitted = coordinator.submit(sql_request("pg:16", vec!["-c", "select 1"])).await.expect("submit");
    let job_id: prepcache_core::JobId = submitted.job_id.parse().expect("id");

    coordinator.cancel(job_id);
    let job = wait_for_terminal(&coordinator, job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.expect("error").code, prepcache_core::ErrorCode::Cancelled);
}

#[tokio::test]
async fn cancel_on_an_unknown_job_is_a_harmless_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coordinator = coordinator(dir.path());
    let cancel = CancelToken::new();
    let _ = &cancel;
    assert!(!coordinator.cancel(prepcache_core::JobId::new()));
}
