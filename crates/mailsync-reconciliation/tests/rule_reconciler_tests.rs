//! Rule Reconciler Tests
//!
//! Drives the rule path against an in-memory directory:
//! - Fresh tenant, growth by one name, shrink from three shards to one
//! - Idempotence of a repeated run
//! - Coverage, capacity and priority across growing and shrinking sets
//! - Exception object creation and enabled-flag preservation
//! - Per-shard failures, transient retries and fatal listing failures
//! - Rename ordering that never duplicates a shard name

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{config, init_tracing, names, InMemoryDirectory};
use mailsync_connector::{
    FailureKind, RemoteError, RemoteRuleObject, RuleAction, RuleCondition, RuleId,
};
use mailsync_reconciliation::{
    normalize_desired, ExceptionOutcome, PlanAction, ReconcileError, RuleReconciler, SyncConfig,
};

const PREFIX: &str = "Disclaimer Shard ";
const EXCEPTION: &str = "Disclaimer Exception";

fn reconciler(directory: &Arc<InMemoryDirectory>, config: SyncConfig) -> RuleReconciler {
    RuleReconciler::new(directory.clone(), config).unwrap()
}

fn members(object: &RemoteRuleObject) -> Vec<String> {
    object.member_words().to_vec()
}

fn seeded_shard(id: &str, name: &str) -> RemoteRuleObject {
    RemoteRuleObject {
        id: RuleId::new(id),
        name: name.to_string(),
        priority: 42,
        enabled: true,
        condition: RuleCondition::SenderNameContains {
            words: vec!["Stale Name".to_string()],
        },
        action: RuleAction::AppendDisclaimer {
            payload: config().disclaimer,
        },
    }
}

/// Union of members equals the desired set, no shard exceeds capacity,
/// shard `i` has priority `i`, names are unique and there is one exception
/// object at priority 0.
fn assert_converged(directory: &InMemoryDirectory, desired: &[String], capacity: usize) {
    let shards = directory.shards(PREFIX);
    let expected = normalize_desired(desired);

    let union: Vec<String> = shards.iter().flat_map(members).collect();
    assert_eq!(union, expected, "coverage");
    assert_eq!(
        union.iter().collect::<BTreeSet<_>>().len(),
        union.len(),
        "no name in two shards"
    );

    for (i, shard) in shards.iter().enumerate() {
        assert!(shard.member_words().len() <= capacity, "capacity");
        assert_eq!(shard.name, format!("{PREFIX}{}", i + 1));
        assert_eq!(shard.priority, i as u32 + 1, "priority");
    }

    let exceptions = directory.named(EXCEPTION);
    assert_eq!(exceptions.len(), 1, "exactly one exception object");
    assert_eq!(exceptions[0].priority, 0);
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_fresh_tenant_creates_shards_and_disabled_exception() {
    init_tracing();
    let directory = Arc::new(InMemoryDirectory::new());
    let rules = reconciler(&directory, config());

    let report = rules.run(names(450)).await.unwrap();

    assert_eq!(report.exception, ExceptionOutcome::CreatedDisabled);
    assert_eq!(report.plan.create, 3);
    assert_eq!(report.summary.result.created, 4);
    assert_eq!(report.summary.result.failed, 0);

    let shards = directory.shards(PREFIX);
    let sizes: Vec<usize> = shards.iter().map(|s| s.member_words().len()).collect();
    assert_eq!(sizes, vec![200, 200, 50]);
    assert!(shards.iter().all(|s| s.enabled));

    let exception = &directory.named(EXCEPTION)[0];
    assert!(!exception.enabled);
    assert_eq!(exception.action, RuleAction::StopProcessing);
    assert!(matches!(
        exception.condition,
        RuleCondition::HeaderMatches { .. }
    ));

    assert_converged(&directory, &names(450), 200);
}

#[tokio::test]
async fn test_adding_one_name_creates_third_shard_only() {
    let directory = Arc::new(InMemoryDirectory::new());
    let rules = reconciler(&directory, config());
    rules.run(names(400)).await.unwrap();
    let before = directory.shards(PREFIX);
    let mutations = directory.mutation_calls();

    let report = rules.run(names(401)).await.unwrap();

    assert_eq!(report.plan.create, 1);
    assert_eq!(report.plan.update, 0);
    assert_eq!(report.plan.unchanged, 2);
    assert_eq!(directory.mutation_calls() - mutations, 1);

    let after = directory.shards(PREFIX);
    assert_eq!(after.len(), 3);
    assert_eq!(after[0], before[0]);
    assert_eq!(after[1], before[1]);
    assert_eq!(members(&after[2]), vec!["User 0400".to_string()]);
}

#[tokio::test]
async fn test_shrinking_to_one_shard_updates_and_deletes() {
    let directory = Arc::new(InMemoryDirectory::new());
    let rules = reconciler(&directory, config());
    rules.run(names(600)).await.unwrap();
    let first_id = directory.shards(PREFIX)[0].id.clone();

    let report = rules.run(names(150)).await.unwrap();

    assert_eq!(report.plan.update, 1);
    assert_eq!(report.plan.delete, 2);
    assert_eq!(report.exception, ExceptionOutcome::Unchanged);
    assert_eq!(report.summary.result.updated, 1);
    assert_eq!(report.summary.result.removed, 2);
    assert_eq!(report.summary.result.skipped, 1);

    let shards = directory.shards(PREFIX);
    assert_eq!(shards.len(), 1);
    assert_eq!(shards[0].id, first_id, "remote identity preserved");
    assert_converged(&directory, &names(150), 200);
}

#[tokio::test]
async fn test_second_run_makes_no_mutations() {
    let directory = Arc::new(InMemoryDirectory::new());
    let rules = reconciler(&directory, config());
    let desired = names(450);

    rules.run(&desired).await.unwrap();
    let mutations = directory.mutation_calls();

    let report = rules.run(&desired).await.unwrap();

    assert_eq!(directory.mutation_calls(), mutations);
    assert_eq!(directory.list_calls(), 2);
    assert_eq!(report.summary.result.skipped, 4);
    assert_eq!(report.summary.result.changes(), 0);
}

#[tokio::test]
async fn test_input_order_and_duplicates_do_not_matter() {
    let directory = Arc::new(InMemoryDirectory::new());
    let rules = reconciler(&directory, config());

    let mut desired = names(250);
    rules.run(&desired).await.unwrap();
    let mutations = directory.mutation_calls();

    desired.reverse();
    desired.push("  User 0001 ".to_string());
    desired.push(String::new());
    rules.run(&desired).await.unwrap();

    assert_eq!(directory.mutation_calls(), mutations);
}

#[tokio::test]
async fn test_coverage_capacity_and_priority_across_resizes() {
    let directory = Arc::new(InMemoryDirectory::new());
    let config = SyncConfig {
        batch_capacity: 50,
        ..config()
    };
    let rules = reconciler(&directory, config);

    for size in [1, 49, 50, 51, 260, 120, 0, 75] {
        let desired = names(size);
        let report = rules.run(&desired).await.unwrap();
        assert_eq!(report.summary.result.failed, 0, "size {size}");
        assert_converged(&directory, &desired, 50);
    }
}

// =============================================================================
// Exception object
// =============================================================================

#[tokio::test]
async fn test_exception_update_preserves_enabled_flag() {
    let directory = Arc::new(InMemoryDirectory::new());
    reconciler(&directory, config())
        .run(names(10))
        .await
        .unwrap();

    let exception_id = directory.named(EXCEPTION)[0].id.clone();
    let shard_id = directory.shards(PREFIX)[0].id.clone();
    directory.set_enabled(&exception_id, true);
    directory.set_enabled(&shard_id, false);

    let changed = SyncConfig {
        exception_header_pattern: "yes".to_string(),
        ..config()
    };
    let report = reconciler(&directory, changed)
        .run(names(11))
        .await
        .unwrap();

    assert_eq!(report.exception, ExceptionOutcome::Updated);
    let exception = &directory.named(EXCEPTION)[0];
    assert_eq!(exception.id, exception_id);
    assert!(exception.enabled, "administrator's enable survives");
    assert_eq!(
        exception.condition,
        RuleCondition::HeaderMatches {
            header: "X-Disclaimer-Exempt".to_string(),
            pattern: "yes".to_string(),
        }
    );

    let shard = &directory.shards(PREFIX)[0];
    assert_eq!(shard.member_words().len(), 11);
    assert!(!shard.enabled, "shard stays disabled through update");
}

#[tokio::test]
async fn test_exception_reconciled_from_snapshot_alone() {
    let directory = Arc::new(InMemoryDirectory::new());
    let rules = reconciler(&directory, config());

    let snapshot = rules.snapshot().await.unwrap();
    assert!(snapshot.exception.is_none());
    assert_eq!(
        rules.reconcile_exception(&snapshot).await,
        ExceptionOutcome::CreatedDisabled
    );
    assert_eq!(directory.list_calls(), 1);

    let snapshot = rules.snapshot().await.unwrap();
    assert_eq!(
        rules.reconcile_exception(&snapshot).await,
        ExceptionOutcome::Unchanged
    );
}

#[tokio::test]
async fn test_duplicate_exception_objects_are_collapsed() {
    let directory = Arc::new(InMemoryDirectory::new());
    for id in ["dup-a", "dup-b"] {
        directory.seed(RemoteRuleObject {
            id: RuleId::new(id),
            name: EXCEPTION.to_string(),
            priority: 0,
            enabled: false,
            condition: RuleCondition::HeaderMatches {
                header: "X-Disclaimer-Exempt".to_string(),
                pattern: "true".to_string(),
            },
            action: RuleAction::StopProcessing,
        });
    }

    let report = reconciler(&directory, config())
        .run(names(5))
        .await
        .unwrap();

    assert_eq!(report.exception, ExceptionOutcome::Unchanged);
    assert_eq!(report.summary.result.removed, 1);
    let remaining = directory.named(EXCEPTION);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id.as_str(), "dup-a");
}

fn exception_object(id: &str) -> RemoteRuleObject {
    RemoteRuleObject {
        id: RuleId::new(id),
        name: EXCEPTION.to_string(),
        priority: 0,
        enabled: false,
        condition: RuleCondition::HeaderMatches {
            header: "X-Disclaimer-Exempt".to_string(),
            pattern: "true".to_string(),
        },
        action: RuleAction::StopProcessing,
    }
}

#[tokio::test]
async fn test_undeletable_duplicate_exception_is_reported() {
    let directory = Arc::new(
        InMemoryDirectory::new().with_delete_error(RemoteError::permanent("object locked")),
    );
    directory.seed(exception_object("dup-a"));
    directory.seed(exception_object("dup-b"));
    let rules = reconciler(&directory, config());

    let snapshot = rules.snapshot().await.unwrap();
    let outcome = rules.reconcile_exception(&snapshot).await;

    match outcome {
        ExceptionOutcome::Failed { failure } => {
            assert!(failure.message.contains("dup-b"));
            assert!(failure.message.contains("object locked"));
        }
        other => panic!("expected a failed exception outcome, got {other:?}"),
    }
    assert_eq!(directory.named(EXCEPTION).len(), 2);

    let report = rules.run(names(5)).await.unwrap();
    assert!(matches!(report.exception, ExceptionOutcome::Failed { .. }));
    assert_eq!(report.summary.result.failed, 1);
    assert_eq!(report.summary.result.failures[0].item, "Disclaimer Exception (dup-b)");
}

#[tokio::test(start_paused = true)]
async fn test_split_operations_share_the_snapshot_deadline() {
    let directory = Arc::new(InMemoryDirectory::new());
    let config = SyncConfig {
        deadline_secs: 10,
        ..config()
    };
    let rules = reconciler(&directory, config);

    let snapshot = rules.snapshot().await.unwrap();
    assert_eq!(snapshot.deadline().budget(), Some(Duration::from_secs(10)));
    tokio::time::advance(Duration::from_secs(11)).await;

    let summary = rules.reconcile_rules(&snapshot, names(5)).await.unwrap();

    assert!(summary.result.timed_out);
    assert_eq!(summary.result.attempted, 0);
    assert_eq!(summary.result.total, 1);
    assert_eq!(directory.create_calls(), 0);

    // A fresh snapshot starts a fresh run.
    let snapshot = rules.snapshot().await.unwrap();
    let summary = rules.reconcile_rules(&snapshot, names(5)).await.unwrap();
    assert_eq!(summary.result.created, 1);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failed_shard_does_not_stop_the_run() {
    let directory = Arc::new(
        InMemoryDirectory::new()
            .with_create_error("Disclaimer Shard 2", RemoteError::validation("too many words")),
    );
    let report = reconciler(&directory, config())
        .run(names(450))
        .await
        .unwrap();

    let result = &report.summary.result;
    assert_eq!(result.created, 3);
    assert_eq!(result.failed, 1);
    assert_eq!(result.failures[0].item, "Disclaimer Shard 2");
    assert_eq!(result.failures[0].kind, FailureKind::Permanent);
    assert!(result.failures[0].reason.contains("too many words"));
    assert!(report.summary.message.contains("1 failed"));

    let shard_names: Vec<String> = directory.shards(PREFIX).into_iter().map(|s| s.name).collect();
    assert_eq!(shard_names, vec!["Disclaimer Shard 1", "Disclaimer Shard 3"]);
}

#[tokio::test]
async fn test_failed_shard_is_repaired_by_next_run() {
    let directory = Arc::new(
        InMemoryDirectory::new().with_transient_create_failures("Disclaimer Shard 1", 10),
    );
    let no_retry = SyncConfig {
        enable_retry: false,
        ..config()
    };
    let first = reconciler(&directory, no_retry.clone())
        .run(names(20))
        .await
        .unwrap();
    assert_eq!(first.summary.result.failed, 1);
    assert_eq!(first.summary.result.failures[0].kind, FailureKind::Transient);

    // Drain the remaining injected failures.
    for _ in 0..9 {
        reconciler(&directory, no_retry.clone())
            .run(names(20))
            .await
            .unwrap();
    }
    let last = reconciler(&directory, no_retry)
        .run(names(20))
        .await
        .unwrap();
    assert_eq!(last.summary.result.failed, 0);
    assert_converged(&directory, &names(20), 200);
}

#[tokio::test(start_paused = true)]
async fn test_transient_create_is_retried() {
    let directory =
        Arc::new(InMemoryDirectory::new().with_transient_create_failures("Disclaimer Shard 1", 2));
    let report = reconciler(&directory, config())
        .run(names(50))
        .await
        .unwrap();

    assert_eq!(report.summary.result.failed, 0);
    assert_eq!(report.summary.result.created, 2);
    // One for the exception object, three attempts for the shard.
    assert_eq!(directory.create_calls(), 4);
}

#[tokio::test]
async fn test_listing_failure_is_fatal() {
    let directory = Arc::new(
        InMemoryDirectory::new().with_list_error(RemoteError::PermissionDenied {
            operation: "Get-TransportRule".to_string(),
        }),
    );
    let result = reconciler(&directory, config()).run(names(10)).await;

    assert!(matches!(
        result,
        Err(ReconcileError::InitialListing { what: "rules", .. })
    ));
    assert_eq!(directory.list_calls(), 1);
    assert_eq!(directory.mutation_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_listing_failure_is_retried_then_fatal() {
    let directory =
        Arc::new(InMemoryDirectory::new().with_list_error(RemoteError::unavailable("down")));
    let err = reconciler(&directory, config())
        .run(names(10))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(directory.list_calls(), 4);
}

#[tokio::test]
async fn test_vanished_shard_is_recreated() {
    let directory = Arc::new(InMemoryDirectory::new());
    let rules = reconciler(&directory, config());
    rules.run(names(10)).await.unwrap();

    let shard_id = directory.shards(PREFIX)[0].id.clone();
    directory.vanish_on_update(&shard_id);

    let report = rules.run(names(11)).await.unwrap();
    assert_eq!(report.summary.result.created, 1);
    assert_eq!(report.summary.result.updated, 0);
    assert_eq!(report.summary.result.failed, 0);
    assert_converged(&directory, &names(11), 200);
}

// =============================================================================
// Remote state drift
// =============================================================================

#[tokio::test]
async fn test_renames_never_collide() {
    let directory = Arc::new(InMemoryDirectory::new().with_unique_names());
    directory.seed(seeded_shard("seed-x", "Disclaimer Shard 2"));
    directory.seed(seeded_shard("seed-y", "Disclaimer Shard 3"));
    let config = SyncConfig {
        batch_capacity: 1,
        ..config()
    };

    let report = reconciler(&directory, config).run(names(3)).await.unwrap();

    assert_eq!(report.summary.result.failed, 0, "{}", report.summary.message);
    assert_converged(&directory, &names(3), 1);
    let ids: Vec<String> = directory
        .shards(PREFIX)
        .into_iter()
        .map(|s| s.id.as_str().to_string())
        .collect();
    assert_eq!(&ids[..2], ["seed-x", "seed-y"]);
}

#[tokio::test]
async fn test_duplicate_shard_numbers_are_resolved() {
    let directory = Arc::new(InMemoryDirectory::new().with_unique_names());
    directory.seed(seeded_shard("seed-a", "Disclaimer Shard 1"));
    directory.seed(seeded_shard("seed-b", "Disclaimer Shard 1"));
    directory.seed(seeded_shard("seed-c", "Disclaimer Shard 2"));
    let config = SyncConfig {
        batch_capacity: 1,
        ..config()
    };

    let report = reconciler(&directory, config).run(names(3)).await.unwrap();

    assert_eq!(report.summary.result.failed, 0, "{}", report.summary.message);
    assert_eq!(report.summary.result.updated, 3);
    assert_converged(&directory, &names(3), 1);
}

#[tokio::test]
async fn test_foreign_objects_are_ignored() {
    let directory = Arc::new(InMemoryDirectory::new());
    let mut legacy = seeded_shard("legacy", "Disclaimer Legacy Footer");
    legacy.priority = 7;
    directory.seed(legacy.clone());

    let report = reconciler(&directory, config())
        .run(names(10))
        .await
        .unwrap();

    assert_eq!(report.summary.result.total, 2);
    assert_eq!(directory.named("Disclaimer Legacy Footer"), vec![legacy]);
}

#[tokio::test]
async fn test_unnumbered_stragglers_are_deleted() {
    let directory = Arc::new(InMemoryDirectory::new());
    let rules = reconciler(&directory, config());
    rules.run(names(10)).await.unwrap();
    directory.seed(seeded_shard("straggler", "Disclaimer Shard old"));

    let report = rules.run(names(10)).await.unwrap();

    assert_eq!(report.summary.result.removed, 1);
    assert_converged(&directory, &names(10), 200);
}

#[tokio::test]
async fn test_preview_does_not_mutate() {
    let directory = Arc::new(InMemoryDirectory::new());
    let rules = reconciler(&directory, config());

    let plan = rules.preview(names(450)).await.unwrap();

    assert_eq!(plan.counts().create, 3);
    assert!(plan
        .entries()
        .iter()
        .all(|entry| entry.action == PlanAction::Create));
    assert_eq!(directory.mutation_calls(), 0);
}
