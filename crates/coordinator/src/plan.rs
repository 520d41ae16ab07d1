// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task plan construction (§3, §4.6): turns a prepare kind into the
//! ordered task kinds a job runs. `sql` is fully static at submit time;
//! `migrate` only knows its `state_execute` count once the dry-plan
//! task has enumerated pending changesets, so only the leading `plan`
//! task is known up front and the rest is appended as it runs.

use prepcache_core::{PrepareKind, TaskKind};

/// The task kinds known before any task has run, in position order.
/// `migrate` plans grow during execution (one `state_execute` per
/// pending changeset); `sql` is complete as returned.
pub fn initial_task_kinds(kind: PrepareKind) -> Vec<TaskKind> {
    match kind {
        PrepareKind::Sql => vec![TaskKind::Plan, TaskKind::StateExecute, TaskKind::PrepareInstance],
        PrepareKind::Migrate => vec![TaskKind::Plan],
    }
}

/// The task kinds to append after a migrate dry-plan reports
/// `changeset_count` pending changesets: one `state_execute` per
/// changeset, then `prepare_instance`. Zero pending changesets still
/// gets one `state_execute` (an "identity" build against the image,
/// with no changeset applied) so `prepare_instance` always has a
/// committed, cacheable state to clone from rather than a bare image.
pub fn migrate_remaining_task_kinds(changeset_count: usize) -> Vec<TaskKind> {
    let mut kinds = vec![TaskKind::StateExecute; changeset_count.max(1)];
    kinds.push(TaskKind::PrepareInstance);
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_plan_is_three_tasks() {
        let kinds = initial_task_kinds(PrepareKind::Sql);
        assert_eq!(kinds, vec![TaskKind::Plan, TaskKind::StateExecute, TaskKind::PrepareInstance]);
    }

    #[test]
    fn migrate_plan_starts_with_only_the_plan_task() {
        let kinds = initial_task_kinds(PrepareKind::Migrate);
        assert_eq!(kinds, vec![TaskKind::Plan]);
    }

    #[test]
    fn migrate_remaining_tasks_are_one_execute_per_changeset_then_prepare() {
        let kinds = migrate_remaining_task_kinds(3);
        assert_eq!(
            kinds,
            vec![TaskKind::StateExecute, TaskKind::StateExecute, TaskKind::StateExecute, TaskKind::PrepareInstance]
        );
    }

    #[test]
    fn zero_pending_changesets_still_yields_one_identity_execute_then_prepare_instance() {
        assert_eq!(migrate_remaining_task_kinds(0), vec![TaskKind::StateExecute, TaskKind::PrepareInstance]);
    }
}
