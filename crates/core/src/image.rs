// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parses an opaque `image_id` into the `(engine, version)` pair used to
//! build the `<root>/engines/<engine>/<version>/...` directory layout (§3).
//!
//! The parser never fails: any input becomes a filesystem-safe pair by
//! replacing disallowed characters, so directory construction can't be
//! poisoned by an `image_id` containing path separators or control bytes.

/// Split and sanitize an `image_id` of the form `engine:version` (or
/// `engine/version`) into a filesystem-safe `(engine, version)` pair.
///
/// Each half is sanitized independently: ASCII alphanumerics and `.`, `-`,
/// `_` pass through; everything else (including non-ASCII) folds to `_`.
/// A missing version half becomes `"latest"`.
pub fn engine_version(image_id: &str) -> (String, String) {
    let (engine, version) = match image_id.split_once(':').or_else(|| image_id.split_once('/')) {
        Some((e, v)) => (e, v),
        None => (image_id, "latest"),
    };
    (sanitize(engine), sanitize(version))
}

fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_underscore = false;
    for c in s.chars() {
        let safe = c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_';
        if safe {
            out.push(c);
            last_was_underscore = c == '_';
        } else if !last_was_underscore {
            out.push('_');
            last_was_underscore = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        simple = { "postgres:16.2", ("postgres", "16.2") },
        slash_separated = { "postgres/16.2", ("postgres", "16.2") },
        no_version = { "postgres", ("postgres", "latest") },
        non_ascii = { "pg\u{00e9}s:1\u{00e9}0", ("pg_s", "1_0") },
        path_separators_become_underscores = { "a/b/c:passwd", ("a_b_c", "passwd") },
        repeated_unsafe_chars_collapse = { "a///b:c   d", ("a_b", "c_d") },
    )]
    fn sanitizes_image_ids(input: &str, expected: (&str, &str)) {
        let (engine, version) = engine_version(input);
        assert_eq!((engine.as_str(), version.as_str()), expected);
    }
}
