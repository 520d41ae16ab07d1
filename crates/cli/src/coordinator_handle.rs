// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builds an in-process `Coordinator` against the real FS Backend and
//! adapters, the same wiring `prepcached` uses, for the CLI's
//! subcommands to drive directly (§0 "CLI smoke surface").

use std::path::Path;
use std::sync::Arc;

use prepcache_adapters::{LocalProcessRuntime, MigrateCliRunner, NoOpPathMapper, SqlRunner, StopResumeDbms};
use prepcache_coordinator::{Coordinator, CoordinatorDeps};
use prepcache_core::{CapacitySettings, SystemClock};
use prepcache_fs::Layout;
use prepcache_store::{InMemoryJobStore, InMemoryStateStore};

pub fn build(data_dir: &Path) -> Coordinator<SystemClock> {
    let deps = CoordinatorDeps {
        state_store: Arc::new(InMemoryStateStore::new()),
        job_store: Arc::new(InMemoryJobStore::new()),
        fs_backend: prepcache_fs::backend_for(prepcache_core::FsBackendKind::Copy),
        layout: Layout::new(data_dir),
        config_path: None,
        default_capacity: CapacitySettings::default(),
        path_mapper: Arc::new(NoOpPathMapper),
        runtime: Arc::new(LocalProcessRuntime::default()),
        dbms: Arc::new(StopResumeDbms),
        sql_runner: Arc::new(SqlRunner::default()),
        migrate_runner: Arc::new(MigrateCliRunner::default()),
        clock: SystemClock,
    };
    Coordinator::new(deps)
}
