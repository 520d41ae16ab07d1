// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Runner` capabilities (§1, §4.1, §4.6 step 8): the sql-tool and
//! migration-tool executables that actually mutate the database. Any
//! runner error surfaces the tool's stderr/stdout tail as `details`
//! (§7 "classified near the source").

use crate::error::AdapterError;
use async_trait::async_trait;
use prepcache_core::subprocess::{run_with_timeout, RUNNER_TIMEOUT};
use prepcache_core::CancelToken;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;

/// A single pending changeset reported by a migration tool's dry-plan
/// step (§4.1 "migrate inputs"). `checksum` is the tool-reported
/// checksum when available; otherwise the coordinator falls back to
/// SHA-256 of `sql`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChangeset {
    pub changeset_id: String,
    pub checksum: Option<String>,
    pub sql: Option<String>,
}

impl PendingChangeset {
    /// The digest this changeset contributes to the fingerprint (§4.1):
    /// the tool-reported checksum if present, else SHA-256 of the SQL.
    pub fn digest(&self) -> String {
        if let Some(checksum) = &self.checksum {
            return checksum.clone();
        }
        let sql = self.sql.as_deref().unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(sql.as_bytes());
        hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Outcome of applying one migration changeset.
#[derive(Debug, Clone)]
pub struct MigrateOutcome {
    pub applied_changeset_id: String,
}

/// The `sql` preparation runner (the source's `PsqlRunner`): executes
/// `-c`/`-f` script fragments and stdin payloads against a DSN.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Execute the normalized `sql_args` (plus `stdin`, if the args
    /// contain `-f -`) against `dsn`, in `work_dir`.
    async fn run_sql(
        &self,
        args: &[String],
        stdin: Option<&[u8]>,
        work_dir: &Path,
        dsn: &str,
        cancel: &CancelToken,
    ) -> Result<(), AdapterError>;
}

/// The `migrate` preparation runner: a dry-plan step that enumerates
/// pending changesets, and an apply step per changeset (§4.1, §4.6).
#[async_trait]
pub trait MigrateRunner: Send + Sync {
    async fn plan(
        &self,
        args: &[String],
        env: &HashMap<String, String>,
        work_dir: &Path,
        dsn: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<PendingChangeset>, AdapterError>;

    async fn apply(
        &self,
        changeset: &PendingChangeset,
        args: &[String],
        env: &HashMap<String, String>,
        work_dir: &Path,
        dsn: &str,
        cancel: &CancelToken,
    ) -> Result<MigrateOutcome, AdapterError>;
}

/// Invokes the `psql` binary on the local host.
#[derive(Debug, Clone)]
pub struct SqlRunner {
    pub binary: PathBuf,
}

impl Default for SqlRunner {
    fn default() -> Self {
        Self { binary: PathBuf::from("psql") }
    }
}

#[async_trait]
impl Runner for SqlRunner {
    async fn run_sql(
        &self,
        args: &[String],
        stdin: Option<&[u8]>,
        work_dir: &Path,
        dsn: &str,
        cancel: &CancelToken,
    ) -> Result<(), AdapterError> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(args).arg(dsn).current_dir(work_dir);
        if stdin.is_some() {
            cmd.stdin(std::process::Stdio::piped());
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let output = run_piped(cmd, stdin, "psql", cancel).await?;
        classify(output, "psql")
    }
}

/// Invokes a Liquibase-shaped CLI migration tool on the local host.
#[derive(Debug, Clone)]
pub struct MigrateCliRunner {
    pub binary: PathBuf,
}

impl Default for MigrateCliRunner {
    fn default() -> Self {
        Self { binary: PathBuf::from("liquibase") }
    }
}

#[async_trait]
impl MigrateRunner for MigrateCliRunner {
    async fn plan(
        &self,
        args: &[String],
        env: &HashMap<String, String>,
        work_dir: &Path,
        dsn: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<PendingChangeset>, AdapterError> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(args).arg("--url").arg(dsn).current_dir(work_dir).envs(env);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        let output = run_piped(cmd, None, "migration dry plan", cancel).await?;
        classify(output.clone(), "migration dry plan")?;
        Ok(parse_pending_changesets(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn apply(
        &self,
        changeset: &PendingChangeset,
        args: &[String],
        env: &HashMap<String, String>,
        work_dir: &Path,
        dsn: &str,
        cancel: &CancelToken,
    ) -> Result<MigrateOutcome, AdapterError> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(args)
            .arg("--url")
            .arg(dsn)
            .arg("--changeset-id")
            .arg(&changeset.changeset_id)
            .current_dir(work_dir)
            .envs(env);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        let output = run_piped(cmd, None, "migration apply", cancel).await?;
        classify(output, "migration apply")?;
        Ok(MigrateOutcome { applied_changeset_id: changeset.changeset_id.clone() })
    }
}

/// One line per pending changeset: `<id>\t<checksum-or-dash>`. Tool
/// output formats vary; this is the contract our dry-plan invocation
/// requests via `--format=tsv` (omitted above since the exact flag is
/// tool-specific and out of scope — see §1).
fn parse_pending_changesets(stdout: &str) -> Vec<PendingChangeset> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut parts = line.splitn(2, '\t');
            let id = parts.next().unwrap_or_default().trim().to_string();
            let checksum = parts.next().map(str::trim).filter(|s| *s != "-").map(str::to_string);
            PendingChangeset { changeset_id: id, checksum, sql: None }
        })
        .collect()
}

async fn run_piped(
    mut cmd: tokio::process::Command,
    stdin: Option<&[u8]>,
    description: &str,
    cancel: &CancelToken,
) -> Result<Output, AdapterError> {
    if let Some(bytes) = stdin {
        // spawn + write stdin manually so run_with_timeout's
        // `Command::output()` contract (which owns stdio) still applies.
        let mut child = cmd.spawn().map_err(|e| AdapterError::Runtime(format!("{description} spawn failed: {e}")))?;
        if let Some(mut pipe) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            pipe.write_all(bytes).await.map_err(|e| AdapterError::Runtime(e.to_string()))?;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AdapterError::Cancelled),
            res = tokio::time::timeout(RUNNER_TIMEOUT, child.wait_with_output()) => match res {
                Ok(Ok(out)) => Ok(out),
                Ok(Err(e)) => Err(AdapterError::Runtime(format!("{description} failed: {e}"))),
                Err(_) => Err(AdapterError::Runtime(format!("{description} timed out"))),
            },
        }
    } else {
        run_with_timeout(cmd, RUNNER_TIMEOUT, description, cancel).await.map_err(AdapterError::Runtime)
    }
}

fn classify(output: Output, description: &str) -> Result<(), AdapterError> {
    if output.status.success() {
        return Ok(());
    }
    let mut tail = String::from_utf8_lossy(&output.stderr).into_owned();
    if tail.trim().is_empty() {
        tail = String::from_utf8_lossy(&output.stdout).into_owned();
    }
    Err(AdapterError::RunnerFailed {
        description: description.to_string(),
        exit_code: output.status.code(),
        stderr_tail: tail_lines(&tail, 20),
    })
}

fn tail_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_prefers_tool_reported_checksum() {
        let c = PendingChangeset {
            changeset_id: "001".into(),
            checksum: Some("abc123".into()),
            sql: Some("select 1".into()),
        };
        assert_eq!(c.digest(), "abc123");
    }

    #[test]
    fn digest_falls_back_to_sha256_of_sql() {
        let a = PendingChangeset { changeset_id: "001".into(), checksum: None, sql: Some("create table t()".into()) };
        let b = PendingChangeset { changeset_id: "002".into(), checksum: None, sql: Some("create table t()".into()) };
        assert_eq!(a.digest(), b.digest());
        let c = PendingChangeset { changeset_id: "003".into(), checksum: None, sql: Some("different".into()) };
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn parses_tab_separated_pending_changesets() {
        let out = "001\tabc\n002\t-\n";
        let changesets = parse_pending_changesets(out);
        assert_eq!(changesets.len(), 2);
        assert_eq!(changesets[0].changeset_id, "001");
        assert_eq!(changesets[0].checksum.as_deref(), Some("abc"));
        assert_eq!(changesets[1].checksum, None);
    }

    #[test]
    fn tail_lines_keeps_only_the_last_n() {
        let s = (1..=30).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let tail = tail_lines(&s, 5);
        assert_eq!(tail, "26\n27\n28\n29\n30");
    }
}
