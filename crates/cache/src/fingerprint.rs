// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Fingerprinter (§4.1): derives a stable `task_hash` from a
//! normalized request, and an `output_state_id` from `(input kind,
//! input id, task_hash)`.

use prepcache_core::{PrepareKind, StateId};
use sha2::{Digest, Sha256};

/// What a `state_execute` task was run against: either a database
/// image (first execution of a chain) or a parent state (chained
/// preparation, §3 `parent_state_id`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskInputRef {
    Image(String),
    State(StateId),
}

impl TaskInputRef {
    fn kind(&self) -> &'static str {
        match self {
            TaskInputRef::Image(_) => "image",
            TaskInputRef::State(_) => "state",
        }
    }

    fn id(&self) -> String {
        match self {
            TaskInputRef::Image(id) => id.clone(),
            TaskInputRef::State(id) => id.to_string(),
        }
    }
}

/// Everything the fingerprint needs to be computed, already normalized
/// (§4.1 "Normalization rules").
#[derive(Debug, Clone)]
pub struct FingerprintInput {
    pub prepare_kind: PrepareKind,
    /// Normalized args, in the order they contribute to the digest.
    pub normalized_args: Vec<String>,
    /// Content digests of every file/stdin/changeset input, in order.
    /// SHA-256 hex for `sql`; the tool-reported checksum (or SHA-256 of
    /// the changeset SQL) per changeset for `migrate`.
    pub input_digests: Vec<String>,
    pub engine_version: String,
}

/// Appends one `key=len:value\n` record to the canonical buffer (§4.1).
fn push_kv(buf: &mut String, key: &str, value: &str) {
    buf.push_str(key);
    buf.push('=');
    buf.push_str(&value.len().to_string());
    buf.push(':');
    buf.push_str(value);
    buf.push('\n');
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Computes `task_hash`: the SHA-256 hex of the canonical keyed
/// serialization covering `prepare_kind`, every normalized arg in
/// order, every input content digest in order, and the engine version
/// string.
pub fn task_hash(input: &FingerprintInput) -> String {
    let mut buf = String::new();
    push_kv(&mut buf, "prepare_kind", input.prepare_kind.to_string().as_str());
    for (i, arg) in input.normalized_args.iter().enumerate() {
        push_kv(&mut buf, &format!("arg[{i}]"), arg);
    }
    for (i, digest) in input.input_digests.iter().enumerate() {
        push_kv(&mut buf, &format!("input[{i}]"), digest);
    }
    push_kv(&mut buf, "engine_version", &input.engine_version);
    hex_sha256(buf.as_bytes())
}

/// Computes `output_state_id`: the SHA-256 hex of a canonical
/// serialization of `{input_kind, input_id, task_hash}`, then folded
/// into a [`StateId`] by taking the first 19 hex characters — the
/// nanoid slot width every ID in this workspace uses. This keeps
/// `state_id` a fixed-size, `Copy` value while remaining fully
/// deterministic: identical `(input, task_hash)` pairs always produce
/// the same `StateId`.
pub fn output_state_id(input_ref: &TaskInputRef, hash: &str) -> StateId {
    let mut buf = String::new();
    push_kv(&mut buf, "input_kind", input_ref.kind());
    push_kv(&mut buf, "input_id", &input_ref.id());
    push_kv(&mut buf, "task_hash", hash);
    let digest = hex_sha256(buf.as_bytes());
    StateId::from_string(format!("{}{}", StateId::PREFIX, &digest[..19]))
}
