// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Classifies an [`AdapterError`] into the engine's [`CacheError`]
//! taxonomy (§7 "classified near the source, then propagated up
//! unchanged"). This is the one place that bridges the opaque adapter
//! crate's errors into the wire-facing error codes; adapters themselves
//! stay ignorant of the taxonomy.

use prepcache_adapters::AdapterError;
use prepcache_core::{CacheError, ErrorCode};
use serde_json::json;

/// Maps an adapter failure observed during `phase` (`"prepare_step"`,
/// `"snapshot"`, or `"metadata_commit"`, per §7) into a `CacheError`.
/// A failure whose message looks like an out-of-space condition is
/// reported as `cache_limit_too_small` rather than a generic internal
/// error, so callers can distinguish "the tool failed" from "the cache
/// ran out of room mid-build".
pub fn classify_adapter_error(err: AdapterError, phase: &str) -> CacheError {
    if err.looks_like_no_space() {
        return CacheError::new(ErrorCode::CacheLimitTooSmall, format!("{phase} ran out of disk space"))
            .with_details(json!({ "phase": phase, "source": err.to_string() }));
    }

    match err {
        AdapterError::Cancelled => CacheError::cancelled(),
        AdapterError::RunnerFailed { description, exit_code, stderr_tail } => {
            CacheError::new(ErrorCode::InternalError, format!("{description} failed during {phase}")).with_details(json!({
                "phase": phase,
                "exit_code": exit_code,
                "stderr_tail": stderr_tail,
            }))
        }
        AdapterError::Runtime(message) => {
            CacheError::internal(format!("runtime failure during {phase}: {message}")).with_details(json!({ "phase": phase }))
        }
        AdapterError::Dbms(message) => {
            CacheError::internal(format!("dbms failure during {phase}: {message}")).with_details(json!({ "phase": phase }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_space_runner_failure_maps_to_cache_limit_too_small() {
        let err = AdapterError::RunnerFailed {
            description: "psql".to_string(),
            exit_code: Some(1),
            stderr_tail: "ERROR: could not extend file: No space left on device".to_string(),
        };
        let classified = classify_adapter_error(err, "prepare_step");
        assert_eq!(classified.code, ErrorCode::CacheLimitTooSmall);
    }

    #[test]
    fn cancelled_adapter_error_maps_to_cancelled() {
        let classified = classify_adapter_error(AdapterError::Cancelled, "snapshot");
        assert!(classified.is_cancelled());
    }

    #[test]
    fn ordinary_runner_failure_carries_stderr_tail_in_details() {
        let err = AdapterError::RunnerFailed { description: "psql".to_string(), exit_code: Some(2), stderr_tail: "syntax error".to_string() };
        let classified = classify_adapter_error(err, "prepare_step");
        assert_eq!(classified.code, ErrorCode::InternalError);
        assert_eq!(classified.details.expect("details")["stderr_tail"], "syntax error");
    }
}
