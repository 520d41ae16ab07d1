// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Submit` request payload (§6). Fields are carried verbatim from
//! the caller; normalization (flag validation, injection of required
//! flags, path canonicalization) happens in the coordinator, not here —
//! this type is the wire shape only.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which preparation kind a `Submit` request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitKind {
    Sql,
    Migrate,
}

/// The `Submit` request payload (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub prepare_kind: SubmitKind,
    pub image_id: String,
    #[serde(default)]
    pub sql_args: Vec<String>,
    #[serde(default)]
    pub migrate_args: Vec<String>,
    #[serde(default)]
    pub migrate_env: HashMap<String, String>,
    #[serde(default)]
    pub work_dir: Option<String>,
    /// Base64-encoded stdin payload; only valid when `sql_args` contains
    /// `-f -`.
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub plan_only: bool,
}
