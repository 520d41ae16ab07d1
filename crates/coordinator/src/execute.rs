// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `state_execute`'s build algorithm (§4.6 step 8 onward), the
//! `migrate` dry-plan runner, and `prepare_instance`'s handout logic —
//! the three task kinds that actually touch disk, a runtime, or a
//! preparation tool.

use std::collections::HashSet;

use prepcache_adapters::{PendingChangeset, RuntimeSpec};
use prepcache_cache::{acquire_build_lock, AcquireOutcome, FingerprintInput, TaskInputRef};
use prepcache_core::{CacheError, CancelToken, Clock, Instance, InstanceId, InstanceStatus, JobId, State, StateId};
use prepcache_fs::FsError;

use crate::normalize::NormalizedRequest;
use crate::{Coordinator, DEFAULT_DB_NAME, DEFAULT_DB_USER};

/// Which preparation tool a `state_execute` task invokes (§4.6 step 8).
pub(crate) enum PreparationStep {
    Sql,
    Migrate(PendingChangeset),
    /// A migrate plan with zero pending changesets: no tool runs, but
    /// the coordinator still snapshots the clone so `prepare_instance`
    /// has a committed, cacheable state rather than a bare image.
    MigrateIdentity,
}

/// What `execute_state_execute` resolved: the output state, its
/// `task_hash` (§4.6 step 1: "persist them on the task row"), and
/// whether it was already cached (skipping every build step).
pub(crate) struct StateExecuteOutcome {
    pub output_state_id: StateId,
    pub task_hash: String,
    pub cached: bool,
}

/// What `execute_prepare_instance` resolved: the live instance plus
/// the DSN to hand back in the job's result (§6).
pub(crate) struct PreparedInstance {
    pub instance_id: InstanceId,
    pub dsn: String,
}

impl<C: Clock + 'static> Coordinator<C> {
    /// Fingerprints, then builds (or reuses) the state a preparation
    /// step against `input_ref` would produce. Implements §4.6's
    /// build-lock/cache-check protocol end to end.
    pub(crate) async fn execute_state_execute(
        &self,
        normalized: &NormalizedRequest,
        input_ref: TaskInputRef,
        step: PreparationStep,
        engine_version: String,
        cancel: &CancelToken,
    ) -> Result<StateExecuteOutcome, CacheError> {
        prepcache_core::cancel::check(cancel)?;

        // Step 1: fingerprint.
        let input_digests = match &step {
            PreparationStep::Sql => {
                crate::digest::digest_sql_inputs(&normalized.file_inputs, normalized.stdin.as_deref()).await?
            }
            PreparationStep::Migrate(changeset) => vec![changeset.digest()],
            PreparationStep::MigrateIdentity => vec![],
        };
        let fingerprint = FingerprintInput {
            prepare_kind: normalized.prepare_kind,
            normalized_args: normalized.fingerprint_args.clone(),
            input_digests,
            engine_version,
        };
        let task_hash = prepcache_cache::task_hash(&fingerprint);
        let output_state_id = prepcache_cache::output_state_id(&input_ref, &task_hash);
        let image_id = normalized.image_id.clone();

        let mut protected = HashSet::new();
        protected.insert(output_state_id);

        // Step 2: capacity preflight, protecting the state we're about
        // to build (or reuse) from the same pass evicting it.
        self.ensure_capacity(&protected, "prepare_step", cancel).await?;

        // Step 3: cache / dirty check.
        if let Some(existing) = self.state_store.get_state(output_state_id) {
            if self.is_state_clean(&existing).await {
                return Ok(StateExecuteOutcome { output_state_id, task_hash: task_hash.clone(), cached: true });
            }
            self.invalidate_state(&existing, cancel).await?;
        }

        let backend_kind = self.fs_backend.kind();
        let lock_path = self.layout.lock_path(&image_id, output_state_id, backend_kind);
        let marker_path = self.layout.marker_path(&image_id, output_state_id, backend_kind);
        let states_dir = self.layout.states_dir(&image_id);
        self.fs_backend.ensure_states_dir(&states_dir, cancel).await.map_err(|e| self.fs_err(e, "prepare_step"))?;

        // Step 4: build lock.
        let guard = match acquire_build_lock(lock_path, &marker_path, cancel).await? {
            AcquireOutcome::Acquired(guard) => guard,
            AcquireOutcome::AlreadyBuilt => {
                // Step 5: double-checked cache recheck.
                if let Some(existing) = self.state_store.get_state(output_state_id) {
                    if self.is_state_clean(&existing).await {
                        return Ok(StateExecuteOutcome { output_state_id, task_hash: task_hash.clone(), cached: true });
                    }
                    self.invalidate_state(&existing, cancel).await?;
                }
                // The marker exists with no row behind it: a process
                // crashed between writing it and committing the state
                // row. Clean up and retry once — after this the marker
                // is gone, so the retry cannot observe `AlreadyBuilt`
                // again.
                let state_dir = self.layout.state_dir(&image_id, output_state_id);
                self.fs_backend.remove_path(&state_dir, cancel).await.map_err(|e| self.fs_err(e, "prepare_step"))?;
                let _ = tokio::fs::remove_file(&marker_path).await;
                return Box::pin(self.execute_state_execute(normalized, input_ref, step, fingerprint.engine_version.clone(), cancel))
                    .await;
            }
        };

        match self.build_state(normalized, output_state_id, &input_ref, step, &protected, cancel).await {
            Ok(()) => {
                guard.complete(&marker_path).await?;
                Ok(StateExecuteOutcome { output_state_id, task_hash: task_hash.clone(), cached: false })
            }
            Err(err) => {
                guard.abort().await;
                Err(err)
            }
        }
    }

    /// Steps 6-13 of §4.6: reset the target directory, clone the
    /// input, run the preparation step, quiesce/snapshot/resume, and
    /// commit the `State` row.
    async fn build_state(
        &self,
        normalized: &NormalizedRequest,
        output_state_id: StateId,
        input_ref: &TaskInputRef,
        step: PreparationStep,
        protected: &HashSet<StateId>,
        cancel: &CancelToken,
    ) -> Result<(), CacheError> {
        let image_id = &normalized.image_id;
        let state_dir = self.layout.state_dir(image_id, output_state_id);

        // Step 6: directory reset, in case a previous attempt left a
        // partial snapshot behind.
        self.fs_backend.remove_path(&state_dir, cancel).await.map_err(|e| self.fs_err(e, "prepare_step"))?;

        // Step 7: ensure a runtime clone of the input, verifying a
        // parent state's cleanliness before trusting it.
        let src_dir = match input_ref {
            TaskInputRef::Image(id) => {
                let base_dir = self.layout.base_dir(id);
                self.fs_backend.ensure_base(&base_dir, cancel).await.map_err(|e| self.fs_err(e, "prepare_step"))?;
                base_dir
            }
            TaskInputRef::State(parent_id) => {
                let parent = self
                    .state_store
                    .get_state(*parent_id)
                    .ok_or_else(|| CacheError::internal(format!("parent state {parent_id} vanished mid-build")))?;
                if !self.is_state_clean(&parent).await {
                    return Err(CacheError::internal(format!("parent state {parent_id} is not clean")));
                }
                self.layout.state_dir(&parent.image_id, *parent_id)
            }
        };

        let clone_dir = self.layout.job_runtime_dir(output_state_id.as_str());
        let clone = self.fs_backend.clone(&src_dir, &clone_dir, cancel).await.map_err(|e| self.fs_err(e, "prepare_step"))?;

        let run_result: Result<(), CacheError> = async {
            let spec = RuntimeSpec { image_id: image_id.clone(), data_dir: clone.mount_dir.0.clone() };
            let runtime_handle = self
                .runtime
                .start(&spec, cancel)
                .await
                .map_err(|e| crate::adapter_error::classify_adapter_error(e, "prepare_step"))?;

            // Step 8: run the preparation step.
            let prep_result = self.run_preparation_step(&runtime_handle, normalized, &clone_dir, step, cancel).await;

            // Step 9: DBMS quiesce, resumed on every exit path below.
            let quiesce_result = self.dbms.prepare_snapshot(&runtime_handle, cancel).await;

            // Step 10: FS snapshot, only attempted if the prep step and
            // quiesce both succeeded.
            let snapshot_result = if prep_result.is_ok() && quiesce_result.is_ok() {
                self.fs_backend.snapshot(&clone.mount_dir.0, &state_dir, cancel).await
            } else {
                Err(FsError::Other("skipped: preparation step or quiesce failed".to_string()))
            };

            // Step 11: capacity preflight again, now that the new
            // state's bytes are on disk.
            let capacity_result =
                if snapshot_result.is_ok() { self.ensure_capacity(protected, "snapshot", cancel).await } else { Ok(()) };

            // Step 12: resume, regardless of what happened above.
            let resume_result = self.dbms.resume_snapshot(&runtime_handle, cancel).await;
            let stop_result = self.runtime.stop(&runtime_handle, cancel).await;

            prep_result.map_err(|e| crate::adapter_error::classify_adapter_error(e, "prepare_step"))?;
            quiesce_result.map_err(|e| crate::adapter_error::classify_adapter_error(e, "prepare_step"))?;
            snapshot_result.map_err(|e| self.fs_err(e, "snapshot"))?;
            capacity_result?;
            resume_result.map_err(|e| crate::adapter_error::classify_adapter_error(e, "prepare_step"))?;
            stop_result.map_err(|e| crate::adapter_error::classify_adapter_error(e, "prepare_step"))?;
            Ok(())
        }
        .await;

        let cleanup_result = clone.cleanup().await;

        if let Err(err) = run_result {
            let _ = self.fs_backend.remove_path(&state_dir, cancel).await;
            return Err(err);
        }
        cleanup_result.map_err(|e| self.fs_err(e, "prepare_step"))?;

        // Step 13: commit the State row, rolling back the directory if
        // the commit itself fails.
        let now = self.clock.now_rfc3339();
        let parent_state_id = match input_ref {
            TaskInputRef::Image(_) => None,
            TaskInputRef::State(id) => Some(*id),
        };
        let state = State {
            state_id: output_state_id,
            parent_state_id,
            image_id: image_id.clone(),
            prepare_kind: normalized.prepare_kind,
            prepare_args_normalized: normalized.display_args(),
            created_at: now.clone(),
            last_used_at: now,
            min_retention_until: None,
            ref_count: 0,
            size_bytes: prepcache_fs::measure_dir_size(&state_dir).await.ok(),
        };
        if let Err(err) = self.state_store.create_state(state) {
            let _ = self.fs_backend.remove_path(&state_dir, cancel).await;
            return Err(CacheError::internal(format!("failed to commit state row: {err}")));
        }
        Ok(())
    }

    async fn run_preparation_step(
        &self,
        runtime_handle: &prepcache_adapters::RuntimeHandle,
        normalized: &NormalizedRequest,
        work_dir: &std::path::Path,
        step: PreparationStep,
        cancel: &CancelToken,
    ) -> Result<(), prepcache_adapters::AdapterError> {
        let dsn = runtime_handle.dsn(DEFAULT_DB_USER, DEFAULT_DB_NAME);
        match step {
            PreparationStep::Sql => {
                self.sql_runner.run_sql(&normalized.normalized_args, normalized.stdin.as_deref(), work_dir, &dsn, cancel).await
            }
            PreparationStep::Migrate(changeset) => self
                .migrate_runner
                .apply(&changeset, &normalized.normalized_args, &normalized.migrate_env, work_dir, &dsn, cancel)
                .await
                .map(|_| ()),
            PreparationStep::MigrateIdentity => Ok(()),
        }
    }

    /// Runs the `migrate` dry-plan (§4.6 "Plan task"): a temporary
    /// runtime against a scratch clone of the image's base directory,
    /// torn down once the tool reports its pending changesets.
    pub(crate) async fn run_migrate_plan(
        &self,
        normalized: &NormalizedRequest,
        job_id: JobId,
        cancel: &CancelToken,
    ) -> Result<Vec<PendingChangeset>, CacheError> {
        let base_dir = self.layout.base_dir(&normalized.image_id);
        self.fs_backend.ensure_base(&base_dir, cancel).await.map_err(|e| self.fs_err(e, "prepare_step"))?;

        let scratch_dir = self.layout.job_runtime_dir(&format!("{}-plan", job_id.as_str()));
        let clone = self.fs_backend.clone(&base_dir, &scratch_dir, cancel).await.map_err(|e| self.fs_err(e, "prepare_step"))?;

        let plan_result: Result<Vec<PendingChangeset>, CacheError> = async {
            let spec = RuntimeSpec { image_id: normalized.image_id.clone(), data_dir: clone.mount_dir.0.clone() };
            let runtime_handle =
                self.runtime.start(&spec, cancel).await.map_err(|e| crate::adapter_error::classify_adapter_error(e, "prepare_step"))?;
            let dsn = runtime_handle.dsn(DEFAULT_DB_USER, DEFAULT_DB_NAME);

            let plan_outcome = self
                .migrate_runner
                .plan(&normalized.normalized_args, &normalized.migrate_env, &scratch_dir, &dsn, cancel)
                .await;
            let stop_result = self.runtime.stop(&runtime_handle, cancel).await;

            let changesets = plan_outcome.map_err(|e| crate::adapter_error::classify_adapter_error(e, "prepare_step"))?;
            stop_result.map_err(|e| crate::adapter_error::classify_adapter_error(e, "prepare_step"))?;
            Ok(changesets)
        }
        .await;

        let cleanup_result = clone.cleanup().await;
        let changesets = plan_result?;
        cleanup_result.map_err(|e| self.fs_err(e, "prepare_step"))?;
        Ok(changesets)
    }

    /// Hands out a writable instance backed by `state_id` (§4.6
    /// "prepare_instance"): clone the state, start a runtime against
    /// it, track it for teardown, and bump the state's `ref_count`.
    pub(crate) async fn execute_prepare_instance(
        &self,
        job_id: JobId,
        image_id: &str,
        state_id: StateId,
        cancel: &CancelToken,
    ) -> Result<PreparedInstance, CacheError> {
        let state = self
            .state_store
            .get_state(state_id)
            .ok_or_else(|| CacheError::internal(format!("state {state_id} vanished before instance handout")))?;
        if !self.is_state_clean(&state).await {
            return Err(CacheError::internal(format!("state {state_id} is not clean at handout time")));
        }

        let state_dir = self.layout.state_dir(&state.image_id, state_id);
        let runtime_dir = self.layout.job_runtime_dir(job_id.as_str());
        let clone = self.fs_backend.clone(&state_dir, &runtime_dir, cancel).await.map_err(|e| self.fs_err(e, "prepare_step"))?;

        let spec = RuntimeSpec { image_id: image_id.to_string(), data_dir: clone.mount_dir.0.clone() };
        let runtime_handle = match self.runtime.start(&spec, cancel).await {
            Ok(handle) => handle,
            Err(e) => {
                let _ = clone.cleanup().await;
                return Err(crate::adapter_error::classify_adapter_error(e, "prepare_step"));
            }
        };
        let dsn = runtime_handle.dsn(DEFAULT_DB_USER, DEFAULT_DB_NAME);

        self.state_store.incref_state(state_id);

        let now = self.clock.now_rfc3339();
        let instance_id = InstanceId::new();
        let instance = Instance {
            instance_id,
            state_id,
            image_id: image_id.to_string(),
            created_at: now,
            runtime_id: Some(runtime_handle.runtime_id.clone()),
            runtime_dir: Some(runtime_dir),
            status: InstanceStatus::Active,
        };
        if let Err(err) = self.state_store.create_instance(instance) {
            let _ = self.runtime.stop(&runtime_handle, cancel).await;
            let _ = clone.cleanup().await;
            let decref_now = self.clock.now_rfc3339();
            self.state_store.decref_state(state_id, &decref_now);
            return Err(CacheError::internal(format!("failed to commit instance row: {err}")));
        }

        self.instances.track(instance_id, runtime_handle, clone);
        Ok(PreparedInstance { instance_id, dsn })
    }
}
