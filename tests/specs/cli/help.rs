//! CLI help/version specs

use crate::prelude::*;

#[test]
fn prepcache_help_shows_usage() {
    cli().args(&["--help"]).passes().stdout_has("Usage:");
}

#[test]
fn prepcache_version_shows_version() {
    cli().args(&["--version"]).passes().stdout_has("0.2");
}

#[test]
fn prepcache_submit_help_shows_flags() {
    cli().args(&["submit", "--help"]).passes().stdout_has("--kind").stdout_has("--image");
}

#[test]
fn prepcache_no_args_exits_nonzero_with_usage_on_stderr() {
    cli().args(&[]).fails().stderr_has("Usage:");
}

#[test]
fn prepcache_status_of_unknown_job_exits_nonzero() {
    cli().args(&["status", "job-does-not-exist"]).fails().stderr_has("not found");
}
