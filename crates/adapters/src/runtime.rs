// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Runtime` capability (§1, §6): starts and stops the database
//! process that a job's preparation steps (and the final instance
//! handout) run against. Out of scope to implement for real — the
//! container runtime itself isn't part of this core — but the trait
//! seam and a local-process default live here so the coordinator has
//! something concrete to drive in tests and in a single-host deployment.

use crate::error::AdapterError;
use async_trait::async_trait;
use prepcache_core::CancelToken;
use std::path::PathBuf;
use std::time::Duration;

/// Stop uses a bounded timeout regardless of backend (§5).
pub const STOP_TIMEOUT: Duration = Duration::from_secs(15);

/// What to start a runtime against.
#[derive(Debug, Clone)]
pub struct RuntimeSpec {
    pub image_id: String,
    /// The directory the database should read/write (a `MountDir` from
    /// the FS Backend).
    pub data_dir: PathBuf,
}

/// A running database process handle.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    pub runtime_id: String,
    pub host: String,
    pub port: u16,
}

impl RuntimeHandle {
    /// Render a `postgres://`-shaped DSN (§6 Result payload), using the
    /// conventional superuser name for the image family since no
    /// authentication material crosses this boundary.
    pub fn dsn(&self, user: &str, db: &str) -> String {
        format!("postgres://{}@{}:{}/{}", user, self.host, self.port, db)
    }
}

/// The opaque container runtime capability (§1, §6).
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Start a database process against `spec.data_dir`, returning the
    /// handle the coordinator uses to build a DSN and to stop it later.
    async fn start(&self, spec: &RuntimeSpec, cancel: &CancelToken) -> Result<RuntimeHandle, AdapterError>;

    /// Stop a previously started runtime, within [`STOP_TIMEOUT`].
    async fn stop(&self, handle: &RuntimeHandle, cancel: &CancelToken) -> Result<(), AdapterError>;
}

/// Starts the database as a plain child process on the local host,
/// binding to an ephemeral port. Suitable for local/manual exercise of
/// the in-scope core (§0 crate layout: "prepcache-daemon exposes the
/// coordinator as a library ... not a network server").
#[derive(Debug, Clone, Default)]
pub struct LocalProcessRuntime {
    pub binary: Option<PathBuf>,
}

#[async_trait]
impl Runtime for LocalProcessRuntime {
    async fn start(&self, spec: &RuntimeSpec, cancel: &CancelToken) -> Result<RuntimeHandle, AdapterError> {
        prepcache_core::cancel::check(cancel).map_err(|_| AdapterError::Cancelled)?;
        let port = pick_ephemeral_port();
        let binary = self
            .binary
            .clone()
            .unwrap_or_else(|| PathBuf::from(binary_for_engine(&spec.image_id)));
        let mut cmd = tokio::process::Command::new(&binary);
        cmd.arg("-D").arg(&spec.data_dir).arg("-p").arg(port.to_string()).arg("-h").arg("127.0.0.1");
        let output = prepcache_core::subprocess::run_with_timeout(
            cmd,
            prepcache_core::subprocess::DBMS_HOOK_TIMEOUT,
            "start database runtime",
            cancel,
        )
        .await
        .map_err(AdapterError::Runtime)?;
        if !output.status.success() {
            return Err(AdapterError::Runtime(format!(
                "runtime start failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(RuntimeHandle { runtime_id: uuid::Uuid::new_v4().to_string(), host: "127.0.0.1".to_string(), port })
    }

    async fn stop(&self, handle: &RuntimeHandle, cancel: &CancelToken) -> Result<(), AdapterError> {
        prepcache_core::cancel::check(cancel).map_err(|_| AdapterError::Cancelled)?;
        let binary = self.binary.clone().unwrap_or_else(|| PathBuf::from("pg_ctl"));
        let mut cmd = tokio::process::Command::new(binary);
        cmd.arg("stop").arg("-m").arg("fast");
        let _ = prepcache_core::subprocess::run_with_timeout(cmd, STOP_TIMEOUT, "stop database runtime", cancel)
            .await
            .map_err(AdapterError::Runtime)?;
        let _ = &handle.runtime_id;
        Ok(())
    }
}

fn binary_for_engine(image_id: &str) -> &'static str {
    let (engine, _) = prepcache_core::image::engine_version(image_id);
    match engine.as_str() {
        "postgres" | "postgresql" | "pg" => "postgres",
        _ => "postgres",
    }
}

fn pick_ephemeral_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsn_interpolates_user_host_port_and_db() {
        let handle = RuntimeHandle { runtime_id: "r1".into(), host: "127.0.0.1".into(), port: 5432 };
        assert_eq!(handle.dsn("prepcache", "postgres"), "postgres://prepcache@127.0.0.1:5432/postgres");
    }

    #[test]
    fn ephemeral_port_is_nonzero_when_binding_succeeds() {
        assert!(pick_ephemeral_port() > 0);
    }
}
