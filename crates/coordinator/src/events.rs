// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job event notification (§5, §9 "Design Notes": "implemented as a
//! wait-object plus a counter; readers loop re-reading the event count
//! under the wait"). Backs the events endpoint's long-poll/`WaitForEvent`
//! behavior without a broadcast channel per reader.

use prepcache_core::{CacheError, CancelToken};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// A counter plus a wait-object. `bump()` is called once per appended
/// event (after the append is durable in the job store); any number of
/// readers can wait for the count to move past an index they've already
/// seen.
#[derive(Debug, Default)]
pub struct JobEvents {
    count: AtomicU64,
    notify: Notify,
}

impl JobEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of events appended so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Record that one more event was appended and wake every waiter.
    pub fn bump(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Block until `count() > since`, the token is cancelled, or
    /// nothing new arrives within `timeout`. A `notify_waiters` that
    /// lands between the count check and the `notified()` registration
    /// is never missed: `Notify::notified()` captures a permit for any
    /// wake that happened since the last `await` on this future, so the
    /// loop re-checks the count immediately after waking instead of
    /// trusting the wake alone.
    pub async fn wait_for_more(&self, since: u64, timeout: std::time::Duration, cancel: &CancelToken) -> Result<u64, CacheError> {
        loop {
            let current = self.count();
            if current > since {
                return Ok(current);
            }
            let notified = self.notify.notified();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CacheError::cancelled()),
                _ = notified => {}
                _ = tokio::time::sleep(timeout) => return Ok(self.count()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_when_already_past_since() {
        let events = JobEvents::new();
        events.bump();
        let cancel = CancelToken::new();
        let count = events.wait_for_more(0, Duration::from_secs(5), &cancel).await.expect("ok");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn wait_wakes_once_a_concurrent_bump_happens() {
        let events = Arc::new(JobEvents::new());
        let cancel = CancelToken::new();
        let waiter = {
            let events = events.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { events.wait_for_more(0, Duration::from_secs(5), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        events.bump();
        let count = waiter.await.expect("join").expect("ok");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn wait_returns_cancelled_when_token_fires() {
        let events = JobEvents::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = events.wait_for_more(0, Duration::from_secs(5), &cancel).await.expect_err("cancelled");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn wait_times_out_with_unchanged_count_when_nothing_new_arrives() {
        let events = JobEvents::new();
        let cancel = CancelToken::new();
        let count = events.wait_for_more(0, Duration::from_millis(20), &cancel).await.expect("ok");
        assert_eq!(count, 0);
    }
}
