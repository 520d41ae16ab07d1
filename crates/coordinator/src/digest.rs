// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Content digesting for the Fingerprinter's `sql` inputs (§4.1): file
//! contents are read while holding a shared advisory lock, so a
//! fingerprint is never computed against bytes a concurrent writer is
//! midway through replacing. Paths themselves never enter the digest —
//! only the bytes do.

use prepcache_core::CacheError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Reads `path` under a shared advisory lock and returns the SHA-256
/// hex digest of its contents.
pub async fn digest_file(path: &Path) -> Result<String, CacheError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || digest_file_blocking(&path))
        .await
        .map_err(|e| CacheError::internal(format!("digest task panicked: {e}")))?
}

fn digest_file_blocking(path: &Path) -> Result<String, CacheError> {
    let file = File::open(path)
        .map_err(|e| CacheError::invalid_argument(format!("cannot open input file {}: {e}", path.display())))?;
    lock_shared(&file, path)?;
    let result = (|| -> Result<String, CacheError> {
        let mut hasher = Sha256::new();
        let mut reader = std::io::BufReader::new(&file);
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| CacheError::internal(format!("failed to read {}: {e}", path.display())))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex(hasher.finalize().as_slice()))
    })();
    unlock(&file);
    result
}

#[cfg(unix)]
fn lock_shared(file: &File, path: &Path) -> Result<(), CacheError> {
    use std::os::unix::io::AsRawFd;
    nix::fcntl::flock(file.as_raw_fd(), nix::fcntl::FlockArg::LockShared)
        .map_err(|e| CacheError::internal(format!("failed to lock {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn lock_shared(_file: &File, _path: &Path) -> Result<(), CacheError> {
    Ok(())
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;
    let _ = nix::fcntl::flock(file.as_raw_fd(), nix::fcntl::FlockArg::Unlock);
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

/// SHA-256 hex digest of an in-memory payload (stdin, or a migrate
/// changeset's SQL when the tool reports no checksum — §4.1).
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex(hasher.finalize().as_slice())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Digest every file input in order, then append the stdin digest if
/// present — the order the Fingerprinter's §4.1 contract requires
/// (`-c` fragments live in `normalized_args` already; only file/stdin
/// contents need a separate digest pass).
pub async fn digest_sql_inputs(file_inputs: &[PathBuf], stdin: Option<&[u8]>) -> Result<Vec<String>, CacheError> {
    let mut digests = Vec::with_capacity(file_inputs.len() + 1);
    for path in file_inputs {
        digests.push(digest_file(path).await?);
    }
    if let Some(bytes) = stdin {
        digests.push(digest_bytes(bytes));
    }
    Ok(digests)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn digest_file_matches_digest_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.sql");
        std::fs::write(&path, b"select 1;").expect("write");
        let digest = digest_file(&path).await.expect("digest");
        assert_eq!(digest, digest_bytes(b"select 1;"));
    }

    #[tokio::test]
    async fn digest_file_errors_on_missing_file() {
        let err = digest_file(Path::new("/no/such/file.sql")).await.expect_err("missing");
        assert_eq!(err.code, prepcache_core::ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn digest_sql_inputs_orders_files_then_stdin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.sql");
        let b = dir.path().join("b.sql");
        std::fs::write(&a, b"aaa").expect("write a");
        std::fs::write(&b, b"bbb").expect("write b");

        let digests = digest_sql_inputs(&[a, b], Some(b"stdin-payload")).await.expect("digest");
        assert_eq!(digests, vec![digest_bytes(b"aaa"), digest_bytes(b"bbb"), digest_bytes(b"stdin-payload")]);
    }
}
