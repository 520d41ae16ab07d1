//! `prepcache submit` specs. Only `plan_only` requests are exercised
//! here — submitting a request that reaches `state_execute` would
//! require a real `postgres`/`psql` binary on the host, which these
//! specs don't assume.

use crate::prelude::*;

#[test]
fn submit_without_required_flags_fails_with_usage() {
    cli().args(&["submit"]).fails().stderr_has("required");
}

#[test]
fn plan_only_sql_submit_prints_queued_then_succeeds_with_no_result() {
    let project = Project::empty();

    project
        .prepcache()
        .args(&["submit", "--kind", "sql", "--image", "pg:16", "--sql-arg", "-c", "--sql-arg", "select 1", "--plan-only"])
        .passes()
        .stdout_has("\"status\": \"queued\"")
        .stdout_has("\"status\":\"succeeded\"");
}

#[test]
fn submit_rejects_forbidden_connection_flags() {
    let project = Project::empty();

    project
        .prepcache()
        .args(&["submit", "--kind", "sql", "--image", "pg:16", "--sql-arg", "--host", "--sql-arg", "evil.example"])
        .fails();
}
