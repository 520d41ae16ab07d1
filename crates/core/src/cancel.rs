// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancellation token propagated into every subordinate (§9 design note).
//!
//! Every suspension point — build-lock/eviction-lock retries, runner
//! invocations, FS Backend clone/snapshot/remove, event waits (§5) — takes
//! a [`CancelToken`] and checks it before and/or during blocking work,
//! returning [`CacheError::cancelled`](crate::CacheError::cancelled)
//! promptly once cancellation is observed.

pub use tokio_util::sync::CancellationToken as CancelToken;

use crate::error::CacheError;

/// Check a token and map cancellation to the engine's error type.
pub fn check(token: &CancelToken) -> Result<(), CacheError> {
    if token.is_cancelled() {
        Err(CacheError::cancelled())
    } else {
        Ok(())
    }
}

/// Race a future against cancellation, mapping a won race to
/// `CacheError::cancelled()`.
pub async fn race<F, T>(token: &CancelToken, fut: F) -> Result<T, CacheError>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(CacheError::cancelled()),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn race_returns_cancelled_once_token_fires() {
        let token = CancelToken::new();
        token.cancel();
        let err = race(&token, async { 1u32 }).await.expect_err("should be cancelled");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn race_returns_future_output_when_not_cancelled() {
        let token = CancelToken::new();
        let out = race(&token, async { 42u32 }).await.expect("not cancelled");
        assert_eq!(out, 42);
    }
}
