// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory fakes for the adapter traits, exposed to downstream
//! crates' tests behind `test-support` the same way `prepcache-core`
//! exposes its builders.

use crate::dbms::Dbms;
use crate::error::AdapterError;
use crate::runner::{MigrateOutcome, MigrateRunner, PendingChangeset, Runner};
use crate::runtime::{Runtime, RuntimeHandle, RuntimeSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use prepcache_core::CancelToken;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};

/// Records every `start`/`stop` call and hands back deterministic
/// handles; can be told to fail the next `start`.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    next_port: AtomicU16,
    started: Mutex<Vec<RuntimeSpec>>,
    stopped: Mutex<Vec<RuntimeHandle>>,
    fail_start: Mutex<Option<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self { next_port: AtomicU16::new(15432), ..Default::default() }
    }

    pub fn fail_next_start(&self, message: impl Into<String>) {
        *self.fail_start.lock() = Some(message.into());
    }

    pub fn started_specs(&self) -> Vec<RuntimeSpec> {
        self.started.lock().clone()
    }

    pub fn stopped_handles(&self) -> Vec<RuntimeHandle> {
        self.stopped.lock().clone()
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn start(&self, spec: &RuntimeSpec, cancel: &CancelToken) -> Result<RuntimeHandle, AdapterError> {
        prepcache_core::cancel::check(cancel).map_err(|_| AdapterError::Cancelled)?;
        if let Some(message) = self.fail_start.lock().take() {
            return Err(AdapterError::Runtime(message));
        }
        self.started.lock().push(spec.clone());
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        Ok(RuntimeHandle { runtime_id: format!("fake-{port}"), host: "127.0.0.1".to_string(), port })
    }

    async fn stop(&self, handle: &RuntimeHandle, cancel: &CancelToken) -> Result<(), AdapterError> {
        prepcache_core::cancel::check(cancel).map_err(|_| AdapterError::Cancelled)?;
        self.stopped.lock().push(handle.clone());
        Ok(())
    }
}

/// Records quiesce/resume calls; can be told to fail either.
#[derive(Debug, Default)]
pub struct FakeDbms {
    prepared: Mutex<u32>,
    resumed: Mutex<u32>,
    fail_prepare: Mutex<Option<String>>,
    fail_resume: Mutex<Option<String>>,
}

impl FakeDbms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_prepare(&self, message: impl Into<String>) {
        *self.fail_prepare.lock() = Some(message.into());
    }

    pub fn fail_next_resume(&self, message: impl Into<String>) {
        *self.fail_resume.lock() = Some(message.into());
    }

    pub fn prepare_count(&self) -> u32 {
        *self.prepared.lock()
    }

    pub fn resume_count(&self) -> u32 {
        *self.resumed.lock()
    }
}

#[async_trait]
impl Dbms for FakeDbms {
    async fn prepare_snapshot(&self, _handle: &RuntimeHandle, cancel: &CancelToken) -> Result<(), AdapterError> {
        prepcache_core::cancel::check(cancel).map_err(|_| AdapterError::Cancelled)?;
        if let Some(message) = self.fail_prepare.lock().take() {
            return Err(AdapterError::Dbms(message));
        }
        *self.prepared.lock() += 1;
        Ok(())
    }

    async fn resume_snapshot(&self, _handle: &RuntimeHandle, cancel: &CancelToken) -> Result<(), AdapterError> {
        prepcache_core::cancel::check(cancel).map_err(|_| AdapterError::Cancelled)?;
        if let Some(message) = self.fail_resume.lock().take() {
            return Err(AdapterError::Dbms(message));
        }
        *self.resumed.lock() += 1;
        Ok(())
    }
}

/// Records every `run_sql` invocation instead of spawning a process.
#[derive(Debug, Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<FakeRunnerCall>>,
    fail_next: Mutex<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct FakeRunnerCall {
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub work_dir: PathBuf,
    pub dsn: String,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock() = Some(message.into());
    }

    pub fn calls(&self) -> Vec<FakeRunnerCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Runner for FakeRunner {
    async fn run_sql(
        &self,
        args: &[String],
        stdin: Option<&[u8]>,
        work_dir: &Path,
        dsn: &str,
        cancel: &CancelToken,
    ) -> Result<(), AdapterError> {
        prepcache_core::cancel::check(cancel).map_err(|_| AdapterError::Cancelled)?;
        if let Some(message) = self.fail_next.lock().take() {
            return Err(AdapterError::RunnerFailed { description: "sql".to_string(), exit_code: Some(1), stderr_tail: message });
        }
        self.calls.lock().push(FakeRunnerCall {
            args: args.to_vec(),
            stdin: stdin.map(|b| b.to_vec()),
            work_dir: work_dir.to_path_buf(),
            dsn: dsn.to_string(),
        });
        Ok(())
    }
}

/// Serves a fixed list of pending changesets from `plan` and records
/// every `apply` call instead of shelling out to a migration CLI.
#[derive(Debug, Default)]
pub struct FakeMigrateRunner {
    pending: Mutex<Vec<PendingChangeset>>,
    applied: Mutex<Vec<String>>,
    fail_next_apply: Mutex<Option<String>>,
}

impl FakeMigrateRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pending(&self, changesets: Vec<PendingChangeset>) {
        *self.pending.lock() = changesets;
    }

    pub fn fail_next_apply(&self, message: impl Into<String>) {
        *self.fail_next_apply.lock() = Some(message.into());
    }

    pub fn applied_changeset_ids(&self) -> Vec<String> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl MigrateRunner for FakeMigrateRunner {
    async fn plan(
        &self,
        _args: &[String],
        _env: &HashMap<String, String>,
        _work_dir: &Path,
        _dsn: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<PendingChangeset>, AdapterError> {
        prepcache_core::cancel::check(cancel).map_err(|_| AdapterError::Cancelled)?;
        Ok(self.pending.lock().clone())
    }

    async fn apply(
        &self,
        changeset: &PendingChangeset,
        _args: &[String],
        _env: &HashMap<String, String>,
        _work_dir: &Path,
        _dsn: &str,
        cancel: &CancelToken,
    ) -> Result<MigrateOutcome, AdapterError> {
        prepcache_core::cancel::check(cancel).map_err(|_| AdapterError::Cancelled)?;
        if let Some(message) = self.fail_next_apply.lock().take() {
            return Err(AdapterError::RunnerFailed {
                description: "migration apply".to_string(),
                exit_code: Some(1),
                stderr_tail: message,
            });
        }
        self.applied.lock().push(changeset.changeset_id.clone());
        Ok(MigrateOutcome { applied_changeset_id: changeset.changeset_id.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prepcache_core::CancelToken;

    #[tokio::test]
    async fn fake_runtime_assigns_increasing_ports_and_records_specs() {
        let runtime = FakeRuntime::new();
        let cancel = CancelToken::new();
        let spec = RuntimeSpec { image_id: "postgres:16".into(), data_dir: PathBuf::from("/tmp/data") };
        let a = runtime.start(&spec, &cancel).await.unwrap();
        let b = runtime.start(&spec, &cancel).await.unwrap();
        assert_ne!(a.port, b.port);
        assert_eq!(runtime.started_specs().len(), 2);
    }

    #[tokio::test]
    async fn fake_runtime_honors_fail_next_start() {
        let runtime = FakeRuntime::new();
        let cancel = CancelToken::new();
        runtime.fail_next_start("boom");
        let spec = RuntimeSpec { image_id: "postgres:16".into(), data_dir: PathBuf::from("/tmp/data") };
        let err = runtime.start(&spec, &cancel).await.unwrap_err();
        assert!(matches!(err, AdapterError::Runtime(m) if m == "boom"));
    }

    #[tokio::test]
    async fn fake_dbms_counts_prepare_and_resume() {
        let dbms = FakeDbms::new();
        let cancel = CancelToken::new();
        let handle = RuntimeHandle { runtime_id: "r".into(), host: "h".into(), port: 1 };
        dbms.prepare_snapshot(&handle, &cancel).await.unwrap();
        dbms.resume_snapshot(&handle, &cancel).await.unwrap();
        assert_eq!(dbms.prepare_count(), 1);
        assert_eq!(dbms.resume_count(), 1);
    }

    #[tokio::test]
    async fn fake_runner_records_calls() {
        let runner = FakeRunner::new();
        let cancel = CancelToken::new();
        runner.run_sql(&["-f".into(), "init.sql".into()], None, Path::new("/work"), "postgres://x", &cancel).await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].dsn, "postgres://x");
    }

    #[tokio::test]
    async fn fake_migrate_runner_serves_configured_pending_changesets() {
        let runner = FakeMigrateRunner::new();
        let cancel = CancelToken::new();
        runner.set_pending(vec![PendingChangeset { changeset_id: "001".into(), checksum: Some("abc".into()), sql: None }]);
        let plan = runner.plan(&[], &HashMap::new(), Path::new("/work"), "postgres://x", &cancel).await.unwrap();
        assert_eq!(plan.len(), 1);

        let outcome = runner.apply(&plan[0], &[], &HashMap::new(), Path::new("/work"), "postgres://x", &cancel).await.unwrap();
        assert_eq!(outcome.applied_changeset_id, "001");
        assert_eq!(runner.applied_changeset_ids(), vec!["001".to_string()]);
    }

    #[tokio::test]
    async fn fake_migrate_runner_honors_fail_next_apply() {
        let runner = FakeMigrateRunner::new();
        let cancel = CancelToken::new();
        let changeset = PendingChangeset { changeset_id: "001".into(), checksum: None, sql: None };
        runner.fail_next_apply("boom");
        let err = runner.apply(&changeset, &[], &HashMap::new(), Path::new("/work"), "postgres://x", &cancel).await.unwrap_err();
        assert!(matches!(err, AdapterError::RunnerFailed { stderr_tail, .. } if stderr_tail == "boom"));
    }
}
