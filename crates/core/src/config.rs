// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capacity Manager settings (§4.5), loaded from a TOML configuration
//! source at the start of each enforcement cycle (never cached across
//! cycles, so an operator edit takes effect on the next build).

use serde::{Deserialize, Serialize};
use std::time::Duration;

const GIB: u64 = 1024 * 1024 * 1024;

/// Capacity Manager settings. `Deserialize`s from a `[capacity]` TOML
/// table; any field omitted in the source falls back to [`Default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacitySettings {
    /// 0 means "use filesystem total minus reserve".
    pub max_bytes: u64,
    /// Floor on physically free bytes that must be preserved. `None` means
    /// "derive from filesystem total at enforcement time" (§4.5 default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve_bytes: Option<u64>,
    pub high_watermark: f64,
    pub low_watermark: f64,
    #[serde(with = "humantime_secs")]
    pub min_state_age: Duration,
}

impl Default for CapacitySettings {
    fn default() -> Self {
        Self {
            max_bytes: 0,
            reserve_bytes: None,
            high_watermark: 0.90,
            low_watermark: 0.80,
            min_state_age: Duration::from_secs(600),
        }
    }
}

impl CapacitySettings {
    /// Resolve `reserve_bytes` against an observed filesystem total, per
    /// the spec default `max(10 GiB, 10% of filesystem total)`.
    pub fn reserve_bytes(&self, filesystem_total: u64) -> u64 {
        self.reserve_bytes
            .unwrap_or_else(|| std::cmp::max(10 * GIB, filesystem_total / 10))
    }

    /// `effective_max = max(0, min(max_bytes, filesystem_total - reserve_bytes))`,
    /// ignoring `max_bytes` in the `min` when it is 0 (unlimited).
    pub fn effective_max(&self, filesystem_total: u64) -> u64 {
        let reserve = self.reserve_bytes(filesystem_total);
        let fs_budget = filesystem_total.saturating_sub(reserve);
        if self.max_bytes == 0 {
            fs_budget
        } else {
            std::cmp::min(self.max_bytes, fs_budget)
        }
    }

    /// Validate internal consistency. Invalid settings map to
    /// `cache_enforcement_unavailable` per §4.5 step 2.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.high_watermark > 0.0 && self.high_watermark <= 1.0) {
            return Err(format!("high_watermark must be in (0, 1], got {}", self.high_watermark));
        }
        if !(self.low_watermark > 0.0 && self.low_watermark < self.high_watermark) {
            return Err(format!(
                "low_watermark must be in (0, high_watermark={}), got {}",
                self.high_watermark, self.low_watermark
            ));
        }
        Ok(())
    }
}

mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Root FS Backend layout settings: where `engines/`, `jobs/`, and the
/// eviction lock live (§3 directory layout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsSettings {
    pub root: std::path::PathBuf,
    pub backend: FsBackendKind,
}

impl Default for FsSettings {
    fn default() -> Self {
        Self { root: std::path::PathBuf::from("/var/lib/prepcache"), backend: FsBackendKind::Copy }
    }
}

/// Which FS Backend variant (§4.2) to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsBackendKind {
    Copy,
    Reflink,
    Subvolume,
}

impl Default for FsBackendKind {
    fn default() -> Self {
        FsBackendKind::Copy
    }
}

/// Top-level settings document (`prepcached.toml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub capacity: CapacitySettings,
    pub fs: FsSettings,
}

impl Settings {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_max_ignores_zero_max_bytes_in_min() {
        let settings = CapacitySettings { max_bytes: 0, reserve_bytes: Some(2000), ..Default::default() };
        assert_eq!(settings.effective_max(10_000), 8_000);
    }

    #[test]
    fn effective_max_clamps_to_max_bytes_when_smaller() {
        let settings = CapacitySettings { max_bytes: 100, reserve_bytes: Some(2000), ..Default::default() };
        assert_eq!(settings.effective_max(10_000), 100);
    }

    #[test]
    fn effective_max_never_underflows_below_zero() {
        let settings = CapacitySettings { max_bytes: 0, reserve_bytes: Some(50_000), ..Default::default() };
        assert_eq!(settings.effective_max(10_000), 0);
    }

    #[test]
    fn default_reserve_is_max_of_10gib_and_10_percent() {
        let settings = CapacitySettings::default();
        assert_eq!(settings.reserve_bytes(1_000 * GIB), 100 * GIB);
        assert_eq!(settings.reserve_bytes(1 * GIB), 10 * GIB);
    }

    #[test]
    fn rejects_low_watermark_at_or_above_high() {
        let settings = CapacitySettings { low_watermark: 0.9, high_watermark: 0.9, ..Default::default() };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_high_watermark_out_of_range() {
        let settings = CapacitySettings { high_watermark: 1.5, ..Default::default() };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn parses_from_toml_with_partial_overrides() {
        let settings = Settings::from_toml("[capacity]\nmax_bytes = 500\n").expect("valid toml");
        assert_eq!(settings.capacity.max_bytes, 500);
        assert_eq!(settings.capacity.high_watermark, 0.90);
    }
}
