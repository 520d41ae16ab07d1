// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Responses to a `Submit` request and to the status endpoint (§6).

use prepcache_core::job::{Job, Task};
use serde::{Deserialize, Serialize};

/// Returned immediately on `Submit` (§6: "Response on submit").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status_url: String,
    pub events_url: String,
    pub status: String,
}

impl SubmitResponse {
    pub fn queued(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self {
            status_url: format!("/jobs/{job_id}/status"),
            events_url: format!("/jobs/{job_id}/events"),
            job_id,
            status: "queued".to_string(),
        }
    }
}

/// The status endpoint's payload: the job record plus its task list
/// (§6: "Status endpoint returns the job record plus its task list").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub job: Job,
    pub tasks: Vec<Task>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_response_derives_status_and_events_urls_from_job_id() {
        let resp = SubmitResponse::queued("job-abc");
        assert_eq!(resp.status_url, "/jobs/job-abc/status");
        assert_eq!(resp.events_url, "/jobs/job-abc/events");
        assert_eq!(resp.status, "queued");
    }
}
