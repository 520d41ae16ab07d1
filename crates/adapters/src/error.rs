// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors raised by the external-capability adapters. These carry
//! enough of the subordinate's own output (§7 "classified near the
//! source") for the coordinator to surface a useful `details.stderr_tail`
//! without the adapter knowing anything about the wire error taxonomy.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("{description} failed (exit {exit_code:?}): {stderr_tail}")]
    RunnerFailed { description: String, exit_code: Option<i32>, stderr_tail: String },

    #[error("{0}")]
    Runtime(String),

    #[error("{0}")]
    Dbms(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl AdapterError {
    pub fn looks_like_no_space(&self) -> bool {
        match self {
            AdapterError::RunnerFailed { stderr_tail, .. } => {
                prepcache_core::CacheError::looks_like_no_space(stderr_tail)
            }
            AdapterError::Runtime(msg) | AdapterError::Dbms(msg) => {
                prepcache_core::CacheError::looks_like_no_space(msg)
            }
            AdapterError::Cancelled => false,
        }
    }
}
