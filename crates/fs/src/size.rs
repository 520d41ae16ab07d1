// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-demand directory size measurement, used both by the Capacity
//! Manager and to populate `State::size_bytes` when the backend didn't
//! report a size at commit time.
//!
//! The walk tolerates `NotFound`/`PermissionDenied` per entry (§4.5) —
//! a concurrently-deleted file or an inaccessible subdirectory doesn't
//! fail the whole measurement, it's just skipped.

use std::io::ErrorKind;
use std::path::Path;

/// Recursively sum file sizes under `root`. Returns 0 if `root` doesn't
/// exist.
pub async fn measure_dir_size(root: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if is_tolerable(&e) => continue,
            Err(e) => return Err(e),
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) if is_tolerable(&e) => break,
                Err(e) => return Err(e),
            };

            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(e) if is_tolerable(&e) => continue,
                Err(e) => return Err(e),
            };

            if file_type.is_dir() {
                stack.push(entry.path());
            } else {
                match entry.metadata().await {
                    Ok(meta) => total += meta.len(),
                    Err(e) if is_tolerable(&e) => continue,
                    Err(e) => return Err(e),
                }
            }
        }
    }

    Ok(total)
}

fn is_tolerable(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn sums_nested_file_sizes() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"12345").expect("write a");
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).expect("mkdir nested");
        let mut f = std::fs::File::create(nested.join("b.txt")).expect("create b");
        f.write_all(b"1234567890").expect("write b");

        let size = measure_dir_size(dir.path()).await.expect("measure");
        assert_eq!(size, 15);
    }

    #[tokio::test]
    async fn missing_root_measures_as_zero() {
        let size = measure_dir_size(Path::new("/nonexistent/does/not/exist")).await.expect("measure");
        assert_eq!(size, 0);
    }
}
