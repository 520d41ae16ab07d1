// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! What a given FS Backend variant can and can't do (§4.2).

/// Capabilities advertised by a backend. The coordinator MAY use these
/// to skip the quiesce step if the backend asserts it is unnecessary;
/// this spec always issues the quiesce/resume pair regardless (simpler,
/// always correct) — see §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The database must be stopped (quiesced) before snapshotting.
    pub requires_stop_before_snapshot: bool,
    /// Clones handed out by `clone()` are writable in place.
    pub clones_are_writable: bool,
    /// Snapshots can be streamed out (e.g. for export) rather than only
    /// read in place.
    pub can_stream_snapshot: bool,
}
