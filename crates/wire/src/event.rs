// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The events endpoint payload (§6, §5 ordering guarantees): an
//! append-only per-job sequence, addressable by a monotonically
//! increasing `index`.

use prepcache_core::error::CacheError;
use prepcache_core::job::{JobResult, JobStatus, TaskId};
use serde::{Deserialize, Serialize};

/// One event in a job's sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonically increasing within a job; the events endpoint is
    /// queried "since" this index.
    pub index: u64,
    pub ts: String,
    #[serde(flatten)]
    pub body: EventBody,
}

/// The event's payload, tagged by `type` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    Status { status: JobStatus },
    Task { task_id: TaskId, status: prepcache_core::job::TaskStatus },
    Log { message: String },
    Result { result: JobResult },
    Error { error: CacheError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_round_trips_with_flattened_type_tag() {
        let event =
            Event { index: 3, ts: "2026-07-28T00:00:00Z".into(), body: EventBody::Status { status: JobStatus::Running } };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "status");
        assert_eq!(json["index"], 3);
        let back: Event = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, event);
    }

    #[test]
    fn log_event_carries_a_message() {
        let event = Event { index: 0, ts: "t".into(), body: EventBody::Log { message: "starting build".into() } };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["message"], "starting build");
    }
}
