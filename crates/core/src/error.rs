// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cache engine's error taxonomy.
//!
//! Every public operation in this workspace returns `Result<_, CacheError>`.
//! `CacheError` carries a stable `code` (for wire serialization and client
//! branching), a human `message`, and optional structured `details`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes, matching the taxonomy in the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Request normalization rejected the input.
    InvalidArgument,
    /// Cancellation observed at a suspension point.
    Cancelled,
    /// Unexpected failure of a subordinate with no more specific mapping.
    InternalError,
    /// The effective cache budget cannot hold the workload.
    CacheLimitTooSmall,
    /// Under pressure but nothing was eligible for eviction.
    CacheFullUnreclaimable,
    /// Capacity enforcement itself could not run.
    CacheEnforcementUnavailable,
}

crate::simple_display! {
    ErrorCode {
        InvalidArgument => "invalid_argument",
        Cancelled => "cancelled",
        InternalError => "internal_error",
        CacheLimitTooSmall => "cache_limit_too_small",
        CacheFullUnreclaimable => "cache_full_unreclaimable",
        CacheEnforcementUnavailable => "cache_enforcement_unavailable",
    }
}

/// A classified engine error: `{code, message, details?}` (wire shape in §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CacheError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: None }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "operation cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }

    /// True if this error (or a subordinate's message) indicates the
    /// filesystem ran out of space — used by the capacity manager's
    /// no-space mapper (spec §4.5).
    pub fn looks_like_no_space(message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        lower.contains("no space left on device")
            || lower.contains("enospc")
            || lower.contains("not enough space")
            || lower.contains("disk quota exceeded")
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CacheError {}
