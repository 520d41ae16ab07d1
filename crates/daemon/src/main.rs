// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `prepcached`: the long-running process entry point (§0 crate layout
//! "binds coordinator + adapters into a long-running process"). Builds
//! a `Coordinator` against the real FS Backend/adapters, replays
//! unfinished jobs on startup (§4.6 "Recovery on restart"), then idles
//! until the process is asked to stop.
//!
//! There is no network listener here (§1: "not a network server") —
//! this binary exists so the in-scope core can run unattended on a
//! single host; `prepcache-cli` is the client surface for driving it
//! during manual exercise.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use prepcache_adapters::{LocalProcessRuntime, MigrateCliRunner, NoOpPathMapper, SqlRunner, StopResumeDbms, WslPathMapper};
use prepcache_coordinator::{Coordinator, CoordinatorDeps};
use prepcache_core::{CapacitySettings, Settings};
use prepcache_fs::Layout;
use prepcache_store::{InMemoryJobStore, InMemoryStateStore};

#[derive(Parser, Debug)]
#[command(name = "prepcached", version, about = "prepcache state-cache daemon")]
struct Args {
    /// Root directory for the engines/jobs layout (§3).
    #[arg(long, default_value = "/var/lib/prepcache")]
    data_dir: PathBuf,

    /// Path to `prepcached.toml`; if given, capacity settings are
    /// reloaded from it at the start of every enforcement cycle (§1).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the rolling daemon log file.
    #[arg(long, default_value = "/var/log/prepcache")]
    log_dir: PathBuf,
}

fn init_tracing(log_dir: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "prepcached.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_tracing(&args.log_dir);

    let default_capacity = match &args.config {
        Some(path) => {
            let text = tokio::fs::read_to_string(path).await?;
            Settings::from_toml(&text)?.capacity
        }
        None => CapacitySettings::default(),
    };

    let path_mapper: Arc<dyn prepcache_adapters::PathMapper> =
        match prepcache_adapters::HostInterop::detect() {
            prepcache_adapters::HostInterop::Wsl { distro } => {
                tracing::info!(distro = %distro, "WSL interop detected, enabling path translation");
                Arc::new(WslPathMapper)
            }
            prepcache_adapters::HostInterop::Native => Arc::new(NoOpPathMapper),
        };

    let deps = CoordinatorDeps {
        state_store: Arc::new(InMemoryStateStore::new()),
        job_store: Arc::new(InMemoryJobStore::new()),
        fs_backend: prepcache_fs::backend_for(prepcache_core::FsBackendKind::Copy),
        layout: Layout::new(&args.data_dir),
        config_path: args.config.clone(),
        default_capacity,
        path_mapper,
        runtime: Arc::new(LocalProcessRuntime::default()),
        dbms: Arc::new(StopResumeDbms),
        sql_runner: Arc::new(SqlRunner::default()),
        migrate_runner: Arc::new(MigrateCliRunner::default()),
        clock: prepcache_core::SystemClock,
    };
    let coordinator = Coordinator::new(deps);

    tracing::info!(data_dir = %args.data_dir.display(), "recovering nonterminal jobs");
    coordinator.recover().await?;

    tracing::info!("prepcached ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("prepcached shutting down");
    Ok(())
}
