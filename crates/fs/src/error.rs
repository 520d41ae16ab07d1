// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! FS Backend error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("io error at {path}: {source}")]
    Io { path: std::path::PathBuf, #[source] source: std::io::Error },

    #[error("reflink not supported on this filesystem: {0}")]
    ReflinkUnsupported(std::path::PathBuf),

    #[error("path exists and is not a subvolume: {0}")]
    NotASubvolume(std::path::PathBuf),

    #[error("parent directory was not created by the subvolume backend: {0}")]
    ForeignParent(std::path::PathBuf),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl FsError {
    pub fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// True if the underlying OS error (or its message) indicates the
    /// filesystem is out of space — used by the capacity manager's
    /// no-space mapper (§4.5).
    pub fn looks_like_no_space(&self) -> bool {
        match self {
            FsError::Io { source, .. } => {
                source.raw_os_error() == Some(libc_enospc())
                    || prepcache_core::CacheError::looks_like_no_space(&source.to_string())
            }
            FsError::Other(msg) => prepcache_core::CacheError::looks_like_no_space(msg),
            _ => false,
        }
    }
}

/// `ENOSPC` on every platform this workspace targets (Linux/macOS); kept
/// as a tiny helper so `looks_like_no_space` doesn't need a `libc` dependency.
fn libc_enospc() -> i32 {
    28
}
