// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess execution helpers shared by the FS Backend (btrfs tooling)
//! and the Runner/DBMS adapters.

use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Default timeout for filesystem tooling (`btrfs subvolume ...`).
pub const FS_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the sql/migrate preparation runners.
pub const RUNNER_TIMEOUT: Duration = Duration::from_secs(600);

/// Default timeout for DBMS quiesce/resume hooks.
pub const DBMS_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Run a subprocess command with a timeout, racing against cancellation.
///
/// Wraps `Command::output()` with `tokio::time::timeout`; the child
/// process is killed on timeout elapse (via tokio's `Child` drop impl)
/// or on cancellation (tokio::select cancels the `output()` future,
/// which does the same).
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    description: &str,
    cancel: &crate::CancelToken,
) -> Result<Output, String> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(format!("{description} cancelled")),
        res = tokio::time::timeout(timeout, cmd.output()) => match res {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(io_err)) => Err(format!("{description} failed: {io_err}")),
            Err(_elapsed) => Err(format!("{description} timed out after {}s", timeout.as_secs())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_on_a_trivial_command() {
        let cmd = Command::new("true");
        let cancel = crate::CancelToken::new();
        let output = run_with_timeout(cmd, Duration::from_secs(5), "true", &cancel)
            .await
            .expect("true should succeed");
        assert!(output.status.success());
    }

    #[tokio::test]
    async fn reports_cancellation_immediately() {
        let cmd = Command::new("sleep");
        let mut cmd = cmd;
        cmd.arg("5");
        let cancel = crate::CancelToken::new();
        cancel.cancel();
        let result = run_with_timeout(cmd, Duration::from_secs(5), "sleep", &cancel).await;
        assert!(result.unwrap_err().contains("cancelled"));
    }
}
