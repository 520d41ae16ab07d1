// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `State` record: a content-addressed, immutable database data
//! directory snapshot (§3).

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Stable, opaque identifier derived deterministically from the
    /// prepared request that produced this state (§4.1).
    pub struct StateId("stt-");
}

/// Which preparation kind produced a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepareKind {
    Sql,
    Migrate,
}

crate::simple_display! {
    PrepareKind {
        Sql => "sql",
        Migrate => "migrate",
    }
}

impl std::str::FromStr for PrepareKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sql" => Ok(PrepareKind::Sql),
            "migrate" => Ok(PrepareKind::Migrate),
            other => Err(format!("unknown prepare_kind: {other}")),
        }
    }
}

/// A content-addressed, immutable database data directory snapshot (§3).
///
/// Invariants (enforced by [`crate::error`] / the store, not by this type):
/// `state_id` unique; `ref_count >= 0`; a row without a materialized
/// directory AND completion marker is dirty and must be invalidated on
/// next use (§4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub state_id: StateId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_state_id: Option<StateId>,
    pub image_id: String,
    pub prepare_kind: PrepareKind,
    pub prepare_args_normalized: String,
    pub created_at: String,
    pub last_used_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_retention_until: Option<String>,
    pub ref_count: u64,
    pub size_bytes: Option<u64>,
}

impl State {
    /// True once no live instance holds a reference to this state.
    pub fn is_unreferenced(&self) -> bool {
        self.ref_count == 0
    }

    /// True if `other` is a child of `self` under `parent_state_id`.
    pub fn is_parent_of(&self, other: &State) -> bool {
        other.parent_state_id == Some(self.state_id)
    }
}

crate::builder! {
    pub struct StateBuilder => State {
        computed { state_id: StateId = StateId::new() }
        option { parent_state_id: StateId = None }
        into { image_id: String = "pg:16" }
        set { prepare_kind: PrepareKind = PrepareKind::Sql }
        into { prepare_args_normalized: String = "" }
        into { created_at: String = "1970-01-01T00:00:00.000000000Z" }
        into { last_used_at: String = "1970-01-01T00:00:00.000000000Z" }
        option { min_retention_until: String = None }
        set { ref_count: u64 = 0 }
        option { size_bytes: u64 = None }
    }
}
