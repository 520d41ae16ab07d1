// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! prepcache-cache: the Fingerprinter (§4.1), the Build Lock & Marker
//! Protocol (§4.4), and the Capacity Manager (§4.5) — the three
//! leaf/mid components the Job Coordinator drives.

pub mod capacity;
pub mod fingerprint;
pub mod lock;

pub use capacity::{ensure_capacity, is_pressure, EvictionBackend, FsUsage};
pub use fingerprint::{output_state_id, task_hash, FingerprintInput, TaskInputRef};
pub use lock::{acquire as acquire_build_lock, AcquireOutcome, LockGuard};
