// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Capacity Manager (§4.5): pressure test, eviction loop, and the
//! no-space error mapper. Sits on top of the State Store and FS
//! Backend; doesn't know about jobs or tasks.

use crate::lock;
use prepcache_core::{CacheError, CancelToken, CapacitySettings, Clock, State, StateId, SystemClock};
use prepcache_store::{ListStatesFilter, StateStore};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Stale eviction lock threshold (§4.5, §5).
pub const STALE_EVICT_LOCK_AGE: Duration = Duration::from_secs(5 * 60);

/// Observed filesystem usage, supplied by the caller (measured however
/// the deployment wants — `statvfs`, a cgroup quota, etc).
#[derive(Debug, Clone, Copy)]
pub struct FsUsage {
    pub total: u64,
    pub free: u64,
}

/// True when the cache is over budget by either the logical usage
/// watermark or the physical free-space reserve (§4.5).
pub fn is_pressure(settings: &CapacitySettings, usage_bytes: u64, fs: FsUsage) -> bool {
    let effective_max = settings.effective_max(fs.total);
    let reserve = settings.reserve_bytes(fs.total);
    (usage_bytes as f64) > (effective_max as f64) * settings.high_watermark || fs.free < reserve
}

/// Counters accumulated over one enforcement cycle, surfaced in
/// `cache_full_unreclaimable` details.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvictionCounters {
    pub evicted: u64,
    pub reclaimed_bytes: u64,
    pub blocked: u64,
}

/// Supplies candidate sizing and deletion without requiring the
/// caller to hand over an `FsBackend` trait object directly — the
/// enforcement entry point is generic over how deletion happens so it
/// can be unit tested without a real filesystem.
#[async_trait::async_trait]
pub trait EvictionBackend: Send + Sync {
    async fn remove_state_dir(&self, id: StateId) -> std::io::Result<()>;
    async fn measure_fs(&self) -> std::io::Result<FsUsage>;
    async fn measure_cache_usage(&self) -> std::io::Result<u64>;
}

/// Runs the Capacity Manager's enforcement entry point (§4.5 steps
/// 1-6), protecting `protected_state_ids` (the state currently being
/// built or just committed) from eviction.
pub async fn ensure_capacity(
    store: &dyn StateStore,
    backend: &dyn EvictionBackend,
    settings_source: impl Fn() -> Result<CapacitySettings, String>,
    evict_lock_path: &Path,
    protected_state_ids: &HashSet<StateId>,
    phase: &str,
    cancel: &CancelToken,
) -> Result<(), CacheError> {
    let (total, free) = measure_fs(backend).await?;
    let usage = measure_usage(backend).await?;
    let settings = settings_source().map_err(|e| enforcement_unavailable(format!("invalid settings: {e}")))?;
    settings.validate().map_err(|e| enforcement_unavailable(format!("invalid settings: {e}")))?;

    let effective_max = settings.effective_max(total);
    if effective_max == 0 {
        return Err(cache_limit_too_small(phase, effective_max, usage, 1));
    }

    let fs = FsUsage { total, free };
    if !is_pressure(&settings, usage, fs) {
        return Ok(());
    }

    lock::remove_if_stale(evict_lock_path, STALE_EVICT_LOCK_AGE).await.ok();
    let guard = match lock::acquire(evict_lock_path.to_path_buf(), &never_existing_marker(), cancel).await {
        Ok(lock::AcquireOutcome::Acquired(guard)) => guard,
        Ok(lock::AcquireOutcome::AlreadyBuilt) => {
            return Err(enforcement_unavailable("eviction lock marker unexpectedly present"))
        }
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => return Err(enforcement_unavailable(format!("could not acquire eviction lock: {e}"))),
    };

    let counters = run_eviction_loop(store, backend, &settings, total, protected_state_ids, cancel).await?;
    guard.abort().await;

    let (total, free) = measure_fs(backend).await?;
    let usage = measure_usage(backend).await?;
    let fs = FsUsage { total, free };
    if !is_pressure(&settings, usage, fs) {
        return Ok(());
    }

    let candidates = evictable_candidates(store, protected_state_ids, &settings);
    let observed_min = candidates.iter().map(|s| s.size_bytes.unwrap_or(0)).min();
    if let Some(min_bytes) = observed_min {
        if min_bytes > effective_max {
            return Err(cache_limit_too_small(phase, effective_max, min_bytes, min_bytes + 1));
        }
    }
    if counters.evicted == 0 && counters.blocked == 0 {
        return Err(cache_limit_too_small(phase, effective_max, usage, effective_max + 1));
    }

    let mut reasons = Vec::new();
    if (usage as f64) > (effective_max as f64) * settings.high_watermark {
        reasons.push("usage_above_high_watermark");
    }
    if free < settings.reserve_bytes(total) {
        reasons.push("physical_free_below_reserve");
    }
    Err(CacheError::new(
        prepcache_core::ErrorCode::CacheFullUnreclaimable,
        "cache is under pressure and no candidates were reclaimable",
    )
    .with_details(json!({
        "reasons": reasons,
        "evicted": counters.evicted,
        "reclaimed_bytes": counters.reclaimed_bytes,
        "blocked": counters.blocked,
    })))
}

/// Filters the full state list down to eviction-eligible candidates
/// and sorts them `(last_used_at asc, size_bytes desc, state_id asc)`
/// (§4.5, S5).
fn evictable_candidates(
    store: &dyn StateStore,
    protected: &HashSet<StateId>,
    settings: &CapacitySettings,
) -> Vec<State> {
    let all = store.list_states(&ListStatesFilter::default());
    let has_children: HashSet<StateId> =
        all.iter().filter_map(|s| s.parent_state_id).collect();
    let now = SystemClock.now_rfc3339();
    let min_age_cutoff = subtract_duration_rfc3339(&now, settings.min_state_age);

    let mut candidates: Vec<State> = all
        .into_iter()
        .filter(|s| !protected.contains(&s.state_id))
        .filter(|s| s.ref_count == 0)
        .filter(|s| !has_children.contains(&s.state_id))
        .filter(|s| s.min_retention_until.as_deref().map(|t| t <= now.as_str()).unwrap_or(true))
        .filter(|s| s.created_at <= min_age_cutoff)
        .collect();

    candidates.sort_by(|a, b| {
        a.last_used_at
            .cmp(&b.last_used_at)
            .then_with(|| b.size_bytes.unwrap_or(0).cmp(&a.size_bytes.unwrap_or(0)))
            .then_with(|| a.state_id.as_str().cmp(b.state_id.as_str()))
    });
    candidates
}

/// RFC3339 timestamps sort lexicographically like their instants, so a
/// cutoff can be computed by formatting `now - duration` the same way
/// rather than parsing both sides back into a numeric type.
fn subtract_duration_rfc3339(now_rfc3339: &str, duration: Duration) -> String {
    let now: chrono::DateTime<chrono::Utc> =
        now_rfc3339.parse().unwrap_or_else(|_| chrono::Utc::now());
    let cutoff = now - chrono::Duration::from_std(duration).unwrap_or_default();
    cutoff.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

async fn run_eviction_loop(
    store: &dyn StateStore,
    backend: &dyn EvictionBackend,
    settings: &CapacitySettings,
    fs_total: u64,
    protected: &HashSet<StateId>,
    cancel: &CancelToken,
) -> Result<EvictionCounters, CacheError> {
    let mut counters = EvictionCounters::default();
    let effective_max = settings.effective_max(fs_total);
    let low_water_bytes = (effective_max as f64 * settings.low_watermark) as u64;

    loop {
        prepcache_core::cancel::check(cancel)?;
        let (_, free) = measure_fs(backend).await?;
        let usage = measure_usage(backend).await?;
        if usage <= low_water_bytes && free >= settings.reserve_bytes(fs_total) {
            return Ok(counters);
        }

        let candidates = evictable_candidates(store, protected, settings);
        let Some(victim) = candidates.into_iter().next() else {
            return Ok(counters);
        };

        match backend.remove_state_dir(victim.state_id).await {
            Ok(()) => {
                store
                    .delete_state(victim.state_id)
                    .map_err(|e| CacheError::internal(format!("failed to delete evicted state row: {e}")))?;
                counters.evicted += 1;
                counters.reclaimed_bytes += victim.size_bytes.unwrap_or(0);
            }
            Err(_) => {
                counters.blocked += 1;
                continue;
            }
        }
    }
}

async fn measure_fs(backend: &dyn EvictionBackend) -> Result<(u64, u64), CacheError> {
    let usage = backend
        .measure_fs()
        .await
        .map_err(|e| enforcement_unavailable(format!("could not measure filesystem: {e}")))?;
    Ok((usage.total, usage.free))
}

async fn measure_usage(backend: &dyn EvictionBackend) -> Result<u64, CacheError> {
    backend.measure_cache_usage().await.map_err(|e| enforcement_unavailable(format!("could not measure cache usage: {e}")))
}

fn enforcement_unavailable(message: impl Into<String>) -> CacheError {
    CacheError::new(prepcache_core::ErrorCode::CacheEnforcementUnavailable, message)
}

fn cache_limit_too_small(phase: &str, effective_max_bytes: u64, observed_required_bytes: u64, recommended_min_bytes: u64) -> CacheError {
    CacheError::new(prepcache_core::ErrorCode::CacheLimitTooSmall, "effective cache budget cannot hold the workload").with_details(json!({
        "phase": phase,
        "effective_max_bytes": effective_max_bytes,
        "observed_required_bytes": observed_required_bytes,
        "recommended_min_bytes": recommended_min_bytes,
    }))
}

/// The eviction lock has no marker file of its own (§4.5 reuses the
/// build-lock mechanics but not its "already built" short-circuit);
/// pointing at a path that never exists keeps `lock::acquire` honest
/// without introducing a second code path.
fn never_existing_marker() -> std::path::PathBuf {
    std::path::PathBuf::from("/dev/null/prepcache-eviction-lock-has-no-marker")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_triggers_on_usage_above_high_watermark() {
        let settings = CapacitySettings { reserve_bytes: Some(0), ..Default::default() };
        let fs = FsUsage { total: 1000, free: 1000 };
        assert!(is_pressure(&settings, 950, fs));
        assert!(!is_pressure(&settings, 100, fs));
    }

    #[test]
    fn pressure_triggers_on_free_below_reserve() {
        let settings = CapacitySettings { reserve_bytes: Some(500), ..Default::default() };
        let fs = FsUsage { total: 1000, free: 100 };
        assert!(is_pressure(&settings, 0, fs));
    }

    #[test]
    fn eviction_sort_matches_last_used_then_size_desc_then_id() {
        let store = prepcache_store::InMemoryStateStore::new();
        let a = State::builder()
            .last_used_at("2026-01-01T00:50:00Z")
            .size_bytes(500u64)
            .created_at("2020-01-01T00:00:00Z")
            .build();
        let b = State::builder()
            .last_used_at("2026-01-01T00:00:00Z")
            .size_bytes(100u64)
            .created_at("2020-01-01T00:00:00Z")
            .build();
        let c = State::builder()
            .last_used_at("2026-01-01T00:00:00Z")
            .size_bytes(900u64)
            .created_at("2020-01-01T00:00:00Z")
            .build();
        for s in [&a, &b, &c] {
            store.create_state(s.clone()).expect("insert");
        }

        let candidates = evictable_candidates(&store, &HashSet::new(), &CapacitySettings::default());
        let ids: Vec<StateId> = candidates.iter().map(|s| s.state_id).collect();
        assert_eq!(ids, vec![c.state_id, b.state_id, a.state_id]);
    }

    #[test]
    fn protected_and_referenced_states_are_excluded_from_candidates() {
        let store = prepcache_store::InMemoryStateStore::new();
        let protected = State::builder().created_at("2020-01-01T00:00:00Z").build();
        let referenced = State::builder().ref_count(1).created_at("2020-01-01T00:00:00Z").build();
        store.create_state(protected.clone()).expect("insert");
        store.create_state(referenced).expect("insert");

        let mut protected_ids = HashSet::new();
        protected_ids.insert(protected.state_id);
        let candidates = evictable_candidates(&store, &protected_ids, &CapacitySettings::default());
        assert!(candidates.is_empty());
    }

    #[test]
    fn cache_limit_too_small_carries_the_offending_phase() {
        let err = cache_limit_too_small("prepare_step", 0, 10, 11);
        assert_eq!(err.code, prepcache_core::ErrorCode::CacheLimitTooSmall);
        assert_eq!(err.details.expect("details")["phase"], "prepare_step");
    }
}
