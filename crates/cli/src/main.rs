// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `prepcache`: a thin client for manual exercise of the in-scope core
//! (§0 crate layout "CLI smoke surface"). Each subcommand builds its
//! own in-process `Coordinator` against the real FS Backend/adapters —
//! there is no daemon transport in scope, so `submit`/`status`/`events`
//! each stand up the coordinator fresh rather than talking to a
//! running `prepcached`.

mod coordinator_handle;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use prepcache_core::{CancelToken, JobId};
use prepcache_wire::{SubmitKind, SubmitRequest};

#[derive(Parser, Debug)]
#[command(name = "prepcache", version, about = "prepcache state-cache engine client")]
struct Cli {
    /// Root directory for the engines/jobs layout (§3), shared with
    /// whatever `prepcached` instance is managing this host's cache.
    #[arg(long, global = true, default_value = "/var/lib/prepcache")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a `sql` or `migrate` preparation request and wait for it
    /// to reach a terminal status.
    Submit {
        #[arg(long, value_enum)]
        kind: CliSubmitKind,
        #[arg(long)]
        image: String,
        /// SQL runner args, e.g. `-c "select 1"` (repeatable).
        #[arg(long = "sql-arg")]
        sql_args: Vec<String>,
        /// Migration runner args (repeatable).
        #[arg(long = "migrate-arg")]
        migrate_args: Vec<String>,
        /// `KEY=VALUE` environment entries for the migration runner (repeatable).
        #[arg(long = "migrate-env")]
        migrate_env: Vec<String>,
        #[arg(long)]
        work_dir: Option<String>,
        #[arg(long)]
        plan_only: bool,
    },
    /// Print a job's record and task list.
    Status {
        job_id: String,
    },
    /// Print events recorded for a job, optionally starting at an index.
    Events {
        job_id: String,
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CliSubmitKind {
    Sql,
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let coordinator = coordinator_handle::build(&cli.data_dir);

    match cli.command {
        Command::Submit { kind, image, sql_args, migrate_args, migrate_env, work_dir, plan_only } => {
            let request = SubmitRequest {
                prepare_kind: match kind {
                    CliSubmitKind::Sql => SubmitKind::Sql,
                    CliSubmitKind::Migrate => SubmitKind::Migrate,
                },
                image_id: image,
                sql_args,
                migrate_args,
                migrate_env: parse_env_pairs(&migrate_env)?,
                work_dir,
                stdin: None,
                plan_only,
            };
            let submitted = coordinator.submit(request).await?;
            println!("{}", serde_json::to_string_pretty(&submitted)?);

            let job_id: JobId = submitted.job_id.parse()?;
            let cancel = CancelToken::new();
            let mut since = 0;
            loop {
                let events = coordinator.wait_for_events(job_id, since, Duration::from_secs(30), &cancel).await?;
                for event in &events {
                    println!("{}", serde_json::to_string(event)?);
                }
                if let Some(last) = events.last() {
                    since = last.index;
                }
                if let Some(status) = coordinator.status(job_id) {
                    if status.job.status.is_terminal() {
                        break;
                    }
                }
            }
        }
        Command::Status { job_id } => {
            let job_id: JobId = job_id.parse()?;
            match coordinator.status(job_id) {
                Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                None => anyhow::bail!("job {job_id} not found"),
            }
        }
        Command::Events { job_id, since } => {
            let job_id: JobId = job_id.parse()?;
            let events = coordinator.events_since(job_id, since)?;
            for event in events {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    Ok(())
}

fn parse_env_pairs(pairs: &[String]) -> anyhow::Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("expected KEY=VALUE, got {pair:?}"))?;
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}
