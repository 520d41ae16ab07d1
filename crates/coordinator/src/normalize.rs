// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request normalization (§4.1 "Normalization rules"). Turns a raw
//! `SubmitRequest` into a [`NormalizedRequest`] the rest of the
//! coordinator works with: every rejection here is `invalid_argument`
//! (§7), before anything touches a lock, a runtime, or disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use prepcache_adapters::PathMapper;
use prepcache_core::{CacheError, PrepareKind};
use prepcache_wire::{SubmitKind, SubmitRequest};

/// The setting psql-family tools use to stop a script on the first
/// error; injected when the caller didn't supply it (§4.1).
const STOP_ON_FIRST_ERROR_VAR: &str = "ON_ERROR_STOP=1";

const SQL_FILE_FLAGS: &[&str] = &["-f", "--file"];
const SQL_COMMAND_FLAGS: &[&str] = &["-c", "--command"];
const SQL_VARIABLE_FLAGS: &[&str] = &["-v", "--set", "--variable"];
const SQL_IGNORE_STARTUP_FLAGS: &[&str] = &["-X", "--no-psqlrc"];
const SQL_FORBIDDEN_FLAGS: &[&str] =
    &["-h", "--host", "-p", "--port", "-U", "--username", "-d", "--dbname", "-w", "-W", "--password"];

const MIGRATE_FORBIDDEN_FLAGS: &[&str] =
    &["--url", "--username", "--password", "--classpath", "--driver"];
/// Actual files the tool must read; canonicalized and existence-checked.
const MIGRATE_FILE_PATH_FLAGS: &[&str] = &["--changelog-file", "--defaults-file"];
/// A classpath/search-path list, not a required file — spelling is
/// normalized but the value is neither canonicalized nor existence
/// checked.
const MIGRATE_SEARCH_PATH_FLAGS: &[&str] = &["--searchPath", "--search-path"];

/// Stands in for a file argument's absolute path in the fingerprinted
/// arg stream (§4.1: "file paths are not part of the digest; only
/// contents are" — the real path lives in `normalized_args`/
/// `file_inputs` only, never in `fingerprint_args`).
const FILE_ARG_FINGERPRINT_PLACEHOLDER: &str = "<file>";

/// A request after every §4.1 rule has been applied. `normalized_args`
/// is the display/audit form (§3 `prepare_args_normalized`) and keeps
/// real paths; `fingerprint_args` feeds `task_hash` and replaces every
/// file argument's path with a fixed placeholder so content-addressing
/// doesn't depend on where a file happened to be read from.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub prepare_kind: PrepareKind,
    pub image_id: String,
    pub normalized_args: Vec<String>,
    pub fingerprint_args: Vec<String>,
    /// Files the fingerprinter must read (in arg order) to compute
    /// `task_hash`'s input digests (§4.1). Already canonicalized.
    pub file_inputs: Vec<PathBuf>,
    pub stdin: Option<Vec<u8>>,
    pub migrate_env: HashMap<String, String>,
    pub work_dir: Option<PathBuf>,
    pub plan_only: bool,
}

impl NormalizedRequest {
    /// The canonical textual form for display/audit (§3
    /// `prepare_args_normalized`) — not part of the fingerprint.
    pub fn display_args(&self) -> String {
        self.normalized_args.join(" ")
    }
}

/// Apply every §4.1 normalization rule, or fail with `invalid_argument`.
pub fn normalize(request: &SubmitRequest, path_mapper: &dyn PathMapper) -> Result<NormalizedRequest, CacheError> {
    if request.image_id.trim().is_empty() {
        return Err(CacheError::invalid_argument("image_id is required"));
    }

    let work_dir = match &request.work_dir {
        Some(raw) => Some(path_mapper.to_local(Path::new(raw))),
        None => None,
    };

    match request.prepare_kind {
        SubmitKind::Sql => normalize_sql(request, work_dir),
        SubmitKind::Migrate => normalize_migrate(request, work_dir, path_mapper),
    }
}

fn normalize_sql(request: &SubmitRequest, work_dir: Option<PathBuf>) -> Result<NormalizedRequest, CacheError> {
    for flag in SQL_FORBIDDEN_FLAGS {
        if request.sql_args.iter().any(|a| flag_matches(a, flag)) {
            return Err(CacheError::invalid_argument(format!("connection flag {flag} is forbidden in sql_args")));
        }
    }

    let mut normalized_args = Vec::new();
    let mut fingerprint_args = Vec::new();
    let mut file_inputs = Vec::new();
    let mut stdin_requested = false;
    let mut has_stop_on_error = false;
    let mut has_ignore_startup = false;

    let mut i = 0;
    while i < request.sql_args.len() {
        let arg = &request.sql_args[i];

        if SQL_IGNORE_STARTUP_FLAGS.iter().any(|f| flag_matches(arg, f)) {
            has_ignore_startup = true;
            normalized_args.push(arg.clone());
            fingerprint_args.push(arg.clone());
            i += 1;
            continue;
        }

        if let Some(value) = flag_value(arg, SQL_VARIABLE_FLAGS, &request.sql_args, i) {
            if value.1.trim().eq_ignore_ascii_case(STOP_ON_FIRST_ERROR_VAR)
                || value.1.trim_start().starts_with("ON_ERROR_STOP=")
            {
                has_stop_on_error = true;
            }
            normalized_args.push(arg.clone());
            fingerprint_args.push(arg.clone());
            if value.0 {
                normalized_args.push(value.1.clone());
                fingerprint_args.push(value.1.clone());
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }

        if let Some(value) = flag_value(arg, SQL_FILE_FLAGS, &request.sql_args, i) {
            normalized_args.push(arg.clone());
            fingerprint_args.push(arg.clone());
            if value.1 == "-" {
                stdin_requested = true;
                normalized_args.push("-".to_string());
                fingerprint_args.push("-".to_string());
            } else {
                let path = canonicalize_input_path(&value.1, work_dir.as_deref())?;
                normalized_args.push(path.display().to_string());
                fingerprint_args.push(FILE_ARG_FINGERPRINT_PLACEHOLDER.to_string());
                file_inputs.push(path);
            }
            i += if value.0 { 2 } else { 1 };
            continue;
        }

        if flag_value(arg, SQL_COMMAND_FLAGS, &request.sql_args, i).is_some() {
            normalized_args.push(arg.clone());
            fingerprint_args.push(arg.clone());
            if i + 1 < request.sql_args.len() {
                normalized_args.push(request.sql_args[i + 1].clone());
                fingerprint_args.push(request.sql_args[i + 1].clone());
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }

        normalized_args.push(arg.clone());
        fingerprint_args.push(arg.clone());
        i += 1;
    }

    if stdin_requested && request.stdin.is_none() {
        return Err(CacheError::invalid_argument("sql_args requests -f - but no stdin payload was supplied"));
    }
    if !stdin_requested && request.stdin.is_some() {
        return Err(CacheError::invalid_argument("stdin is only valid when sql_args contains -f -"));
    }

    if !has_stop_on_error {
        normalized_args.insert(0, STOP_ON_FIRST_ERROR_VAR.to_string());
        normalized_args.insert(0, "-v".to_string());
        fingerprint_args.insert(0, STOP_ON_FIRST_ERROR_VAR.to_string());
        fingerprint_args.insert(0, "-v".to_string());
    }
    if !has_ignore_startup {
        normalized_args.insert(0, "-X".to_string());
        fingerprint_args.insert(0, "-X".to_string());
    }

    let stdin = request
        .stdin
        .as_ref()
        .map(|b64| decode_base64(b64))
        .transpose()
        .map_err(|e| CacheError::invalid_argument(format!("stdin is not valid base64: {e}")))?;

    Ok(NormalizedRequest {
        prepare_kind: PrepareKind::Sql,
        image_id: request.image_id.clone(),
        normalized_args,
        fingerprint_args,
        file_inputs,
        stdin,
        migrate_env: HashMap::new(),
        work_dir,
        plan_only: request.plan_only,
    })
}

fn normalize_migrate(
    request: &SubmitRequest,
    work_dir: Option<PathBuf>,
    path_mapper: &dyn PathMapper,
) -> Result<NormalizedRequest, CacheError> {
    for flag in MIGRATE_FORBIDDEN_FLAGS {
        if request.migrate_args.iter().any(|a| flag_matches(a, flag)) {
            return Err(CacheError::invalid_argument(format!("runtime flag {flag} is forbidden in migrate_args")));
        }
    }

    let command = request
        .migrate_args
        .iter()
        .find(|a| !a.starts_with('-'))
        .ok_or_else(|| CacheError::invalid_argument("migrate_args must contain a command"))?;
    if !command.to_ascii_lowercase().starts_with("update") {
        return Err(CacheError::invalid_argument(format!(
            "migrate command {command:?} is not an `update`-family command"
        )));
    }

    let mut normalized_args = Vec::new();
    let mut fingerprint_args = Vec::new();
    let mut i = 0;
    while i < request.migrate_args.len() {
        let arg = &request.migrate_args[i];
        if let Some(value) = flag_value(arg, MIGRATE_FILE_PATH_FLAGS, &request.migrate_args, i) {
            let path = canonicalize_input_path(&value.1, work_dir.as_deref())?;
            normalized_args.push(normalize_path_flag_name(arg));
            normalized_args.push(path.display().to_string());
            fingerprint_args.push(normalize_path_flag_name(arg));
            fingerprint_args.push(FILE_ARG_FINGERPRINT_PLACEHOLDER.to_string());
            i += if value.0 { 2 } else { 1 };
            continue;
        }
        if let Some(value) = flag_value(arg, MIGRATE_SEARCH_PATH_FLAGS, &request.migrate_args, i) {
            normalized_args.push(normalize_path_flag_name(arg));
            normalized_args.push(value.1.clone());
            fingerprint_args.push(normalize_path_flag_name(arg));
            fingerprint_args.push(value.1);
            i += if value.0 { 2 } else { 1 };
            continue;
        }
        normalized_args.push(arg.clone());
        fingerprint_args.push(arg.clone());
        i += 1;
    }

    let migrate_env = request
        .migrate_env
        .iter()
        .map(|(k, v)| {
            let v = if k == "JAVA_HOME" { path_mapper.to_local(Path::new(v)).display().to_string() } else { v.clone() };
            (k.clone(), v)
        })
        .collect();

    Ok(NormalizedRequest {
        prepare_kind: PrepareKind::Migrate,
        image_id: request.image_id.clone(),
        normalized_args,
        fingerprint_args,
        file_inputs: Vec::new(),
        stdin: None,
        migrate_env,
        work_dir,
        plan_only: request.plan_only,
    })
}

/// `--searchPath` and `--search-path` are the same flag spelled two
/// ways; canonicalize to the hyphenated long form.
fn normalize_path_flag_name(arg: &str) -> String {
    let key = arg.split('=').next().unwrap_or(arg);
    if key.eq_ignore_ascii_case("--searchPath") {
        "--search-path".to_string()
    } else {
        key.to_string()
    }
}

fn flag_matches(arg: &str, flag: &str) -> bool {
    arg == flag || arg.starts_with(&format!("{flag}="))
}

/// Returns `Some((takes_next_token, value))` if `arg` (at `args[i]`) is
/// one of `flags`, handling both `--flag=value` and `--flag value`
/// (and short `-f value`) forms.
fn flag_value(arg: &str, flags: &[&str], args: &[String], i: usize) -> Option<(bool, String)> {
    for flag in flags {
        if let Some(value) = arg.strip_prefix(&format!("{flag}=")) {
            return Some((false, value.to_string()));
        }
        if arg == *flag {
            let value = args.get(i + 1).cloned().unwrap_or_default();
            return Some((true, value));
        }
    }
    None
}

fn canonicalize_input_path(raw: &str, work_dir: Option<&Path>) -> Result<PathBuf, CacheError> {
    let path = Path::new(raw);
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let Some(work_dir) = work_dir else {
            return Err(CacheError::invalid_argument(format!(
                "relative path {raw:?} requires work_dir to be set"
            )));
        };
        work_dir.join(path)
    };
    if !resolved.exists() {
        return Err(CacheError::invalid_argument(format!("input file does not exist: {}", resolved.display())));
    }
    Ok(resolved)
}

fn decode_base64(input: &str) -> Result<Vec<u8>, String> {
    // Minimal standard-alphabet base64 decoder; no external crate pulled
    // in purely for this, and padding is optional on write but checked
    // on read.
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut reverse = [255u8; 256];
    for (idx, &c) in ALPHABET.iter().enumerate() {
        reverse[c as usize] = idx as u8;
    }

    let clean: Vec<u8> = input.bytes().filter(|b| !b.is_ascii_whitespace() && *b != b'=').collect();
    let mut out = Vec::with_capacity(clean.len() * 3 / 4 + 3);
    for chunk in clean.chunks(4) {
        let mut vals = [0u8; 4];
        for (idx, &b) in chunk.iter().enumerate() {
            let v = reverse[b as usize];
            if v == 255 {
                return Err(format!("invalid base64 byte: {}", b as char));
            }
            vals[idx] = v;
        }
        out.push((vals[0] << 2) | (vals[1] >> 4));
        if chunk.len() > 2 {
            out.push((vals[1] << 4) | (vals[2] >> 2));
        }
        if chunk.len() > 3 {
            out.push((vals[2] << 6) | vals[3]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prepcache_adapters::paths::NoOpPathMapper;
    use yare::parameterized;

    fn base_request() -> SubmitRequest {
        SubmitRequest {
            prepare_kind: SubmitKind::Sql,
            image_id: "pg:16".to_string(),
            sql_args: vec!["-c".to_string(), "select 1".to_string()],
            migrate_args: Vec::new(),
            migrate_env: HashMap::new(),
            work_dir: None,
            stdin: None,
            plan_only: false,
        }
    }

    #[test]
    fn injects_stop_on_error_and_ignore_startup_when_absent() {
        let normalized = normalize(&base_request(), &NoOpPathMapper).expect("valid");
        assert!(normalized.normalized_args.contains(&"-X".to_string()));
        assert!(normalized.normalized_args.windows(2).any(|w| w == ["-v", "ON_ERROR_STOP=1"]));
    }

    #[test]
    fn does_not_duplicate_already_present_flags() {
        let mut request = base_request();
        request.sql_args = vec!["-X".to_string(), "-v".to_string(), "ON_ERROR_STOP=1".to_string()];
        let normalized = normalize(&request, &NoOpPathMapper).expect("valid");
        assert_eq!(normalized.normalized_args.iter().filter(|a| *a == "-X").count(), 1);
        assert_eq!(normalized.normalized_args.iter().filter(|a| *a == "-v").count(), 1);
    }

    #[parameterized(
        host = { "-h" },
        long_host = { "--host" },
        port = { "-p" },
        username = { "-U" },
        dbname = { "-d" },
    )]
    fn rejects_forbidden_connection_flags(flag: &str) {
        let mut request = base_request();
        request.sql_args.push(flag.to_string());
        let err = normalize(&request, &NoOpPathMapper).expect_err("forbidden flag");
        assert_eq!(err.code, prepcache_core::ErrorCode::InvalidArgument);
    }

    #[test]
    fn rejects_stdin_requested_without_payload() {
        let mut request = base_request();
        request.sql_args = vec!["-f".to_string(), "-".to_string()];
        let err = normalize(&request, &NoOpPathMapper).expect_err("missing stdin");
        assert!(err.message.contains("stdin"));
    }

    #[test]
    fn accepts_stdin_requested_with_payload() {
        let mut request = base_request();
        request.sql_args = vec!["-f".to_string(), "-".to_string()];
        request.stdin = Some("c2VsZWN0IDE=".to_string());
        let normalized = normalize(&request, &NoOpPathMapper).expect("valid");
        assert_eq!(normalized.stdin.as_deref(), Some(b"select 1".as_slice()));
    }

    #[test]
    fn rejects_relative_file_path_without_work_dir() {
        let mut request = base_request();
        request.sql_args = vec!["-f".to_string(), "init.sql".to_string()];
        let err = normalize(&request, &NoOpPathMapper).expect_err("relative path rejected");
        assert!(err.message.contains("work_dir"));
    }

    #[test]
    fn rejects_nonexistent_file() {
        let mut request = base_request();
        request.sql_args = vec!["-f".to_string(), "/no/such/file.sql".to_string()];
        let err = normalize(&request, &NoOpPathMapper).expect_err("missing file rejected");
        assert!(err.message.contains("does not exist"));
    }

    #[test]
    fn canonicalizes_relative_file_path_against_work_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("init.sql");
        std::fs::write(&file, b"select 1").expect("write");
        let mut request = base_request();
        request.sql_args = vec!["-f".to_string(), "init.sql".to_string()];
        request.work_dir = Some(dir.path().display().to_string());
        let normalized = normalize(&request, &NoOpPathMapper).expect("valid");
        assert_eq!(normalized.file_inputs, vec![file]);
    }

    #[test]
    fn fingerprint_args_use_placeholder_for_file_path_not_the_real_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("init.sql");
        std::fs::write(&file, b"select 1").expect("write");
        let mut request = base_request();
        request.sql_args = vec!["-f".to_string(), "init.sql".to_string()];
        request.work_dir = Some(dir.path().display().to_string());
        let normalized = normalize(&request, &NoOpPathMapper).expect("valid");

        assert!(normalized.normalized_args.iter().any(|a| a == &file.display().to_string()));
        assert!(!normalized.fingerprint_args.iter().any(|a| a == &file.display().to_string()));
        assert!(normalized.fingerprint_args.iter().any(|a| a == FILE_ARG_FINGERPRINT_PLACEHOLDER));
    }

    #[test]
    fn identical_content_at_different_paths_yields_identical_fingerprint_args() {
        let dir_a = tempfile::tempdir().expect("tempdir a");
        let dir_b = tempfile::tempdir().expect("tempdir b");
        std::fs::write(dir_a.path().join("init.sql"), b"select 1").expect("write a");
        std::fs::write(dir_b.path().join("init.sql"), b"select 1").expect("write b");

        let mut request_a = base_request();
        request_a.sql_args = vec!["-f".to_string(), "init.sql".to_string()];
        request_a.work_dir = Some(dir_a.path().display().to_string());
        let mut request_b = base_request();
        request_b.sql_args = vec!["-f".to_string(), "init.sql".to_string()];
        request_b.work_dir = Some(dir_b.path().display().to_string());

        let normalized_a = normalize(&request_a, &NoOpPathMapper).expect("valid a");
        let normalized_b = normalize(&request_b, &NoOpPathMapper).expect("valid b");

        assert_ne!(normalized_a.normalized_args, normalized_b.normalized_args);
        assert_eq!(normalized_a.fingerprint_args, normalized_b.fingerprint_args);
    }

    fn migrate_request() -> SubmitRequest {
        SubmitRequest {
            prepare_kind: SubmitKind::Migrate,
            image_id: "pg:16".to_string(),
            sql_args: Vec::new(),
            migrate_args: vec!["update".to_string()],
            migrate_env: HashMap::new(),
            work_dir: None,
            stdin: None,
            plan_only: false,
        }
    }

    #[test]
    fn accepts_update_family_commands() {
        let mut request = migrate_request();
        request.migrate_args = vec!["updateSQL".to_string()];
        normalize(&request, &NoOpPathMapper).expect("valid");
    }

    #[test]
    fn rejects_non_update_commands() {
        let mut request = migrate_request();
        request.migrate_args = vec!["rollback".to_string()];
        let err = normalize(&request, &NoOpPathMapper).expect_err("rejected");
        assert!(err.message.contains("update"));
    }

    #[parameterized(
        url = { "--url" },
        username = { "--username" },
        password = { "--password" },
        classpath = { "--classpath" },
        driver = { "--driver" },
    )]
    fn rejects_forbidden_migrate_flags(flag: &str) {
        let mut request = migrate_request();
        request.migrate_args.push(flag.to_string());
        let err = normalize(&request, &NoOpPathMapper).expect_err("forbidden flag");
        assert_eq!(err.code, prepcache_core::ErrorCode::InvalidArgument);
    }

    #[test]
    fn normalizes_search_path_spelling() {
        let mut request = migrate_request();
        request.migrate_args.push("--searchPath=/x".to_string());
        let normalized = normalize(&request, &NoOpPathMapper).expect("valid");
        assert!(normalized.normalized_args.iter().any(|a| a == "--search-path"));
    }
}
