// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors raised by the State Store (§4.3). Distinguishable from "not
//! found", which is always a plain `Option::None`, never an error.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("state_id already exists: {0}")]
    StateAlreadyExists(String),

    #[error("instance_id already exists: {0}")]
    InstanceAlreadyExists(String),

    #[error("job_id already exists: {0}")]
    JobAlreadyExists(String),

    #[error("task_id already exists: {0}")]
    TaskAlreadyExists(String),

    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}
