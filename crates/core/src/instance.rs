// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Instance` record: a live database process/handout backed by a
//! writable clone of a specific state (§3).

use crate::state::StateId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Identifier for a live database instance handout.
    pub struct InstanceId("ins-");
}

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Stopped,
}

crate::simple_display! {
    InstanceStatus {
        Active => "active",
        Stopped => "stopped",
    }
}

/// A live database process/handout backed by a writable clone of a state.
///
/// While `status = Active`, the underlying state's `ref_count` is
/// incremented; the instance's lifetime is bounded by the coordinator or
/// by external teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub state_id: StateId,
    pub image_id: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<std::path::PathBuf>,
    pub status: InstanceStatus,
}

crate::builder! {
    pub struct InstanceBuilder => Instance {
        computed { instance_id: InstanceId = InstanceId::new() }
        set { state_id: StateId = StateId::new() }
        into { image_id: String = "pg:16" }
        into { created_at: String = "1970-01-01T00:00:00.000000000Z" }
        option { runtime_id: String = None }
        option { runtime_dir: std::path::PathBuf = None }
        set { status: InstanceStatus = InstanceStatus::Active }
    }
}
