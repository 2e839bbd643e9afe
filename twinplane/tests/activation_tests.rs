//! Activation Reconciler Tests
//!
//! This module tests how desired activation state reaches the activation
//! service:
//! - Per-entry isolation of failures
//! - Single-pass consumption of the pending set
//! - Indexed upsert/remove semantics
//! - Token validation and property-bag ingestion

use std::sync::Arc;

use serde_json::json;

use twinplane::{ActivationDirective, ActivationReconciler};

use test_utils::*;

const TOKEN: &str = "dG9rZW4tYQ==";

fn reconciler() -> (Arc<RecordingActivation>, ActivationReconciler) {
    let service = Arc::new(RecordingActivation::new());
    let reconciler = ActivationReconciler::new(service.clone());
    (service, reconciler)
}

// ============================================================================
// Snapshot Application
// ============================================================================

/// Verifies the mixed activate/deactivate snapshot: both entries are
/// attempted exactly once, in any order.
#[tokio::test]
async fn test_activate_and_deactivate_in_one_snapshot() {
    let (service, reconciler) = reconciler();

    let report = reconciler
        .apply([
            ActivationDirective::activate("A", TOKEN),
            ActivationDirective::activate("B", ""),
        ])
        .await;

    assert_eq!(service.calls().len(), 2);
    assert_eq!(
        service.count(&ActivationCall::Activate("A".into(), TOKEN.into())),
        1
    );
    assert_eq!(service.count(&ActivationCall::Deactivate("B".into())), 1);
    assert_eq!(report.activated, vec!["A"]);
    assert_eq!(report.deactivated, vec!["B"]);
}

/// Verifies that one failing entry never prevents the others.
#[tokio::test]
async fn test_failure_is_isolated_per_entry() {
    let (service, reconciler) = reconciler();
    service.fail_for("A");
    service.fail_for("C");

    let report = reconciler
        .apply([
            ActivationDirective::activate("A", TOKEN),
            ActivationDirective::deactivate("B"),
            ActivationDirective::deactivate("C"),
            ActivationDirective::activate("D", TOKEN),
        ])
        .await;

    assert_eq!(service.calls().len(), 4);
    assert_eq!(report.attempted(), 4);
    assert_eq!(report.activated, vec!["D"]);
    assert_eq!(report.deactivated, vec!["B"]);
    let failed: Vec<&str> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(failed, vec!["A", "C"]);
}

/// Verifies that the pending set is empty after a pass, even with failures.
#[tokio::test]
async fn test_pending_set_is_consumed_in_one_pass() {
    let (service, reconciler) = reconciler();
    service.fail_for("A");
    reconciler.upsert("A", Some(TOKEN));
    reconciler.upsert("B", Some(TOKEN));

    reconciler.apply([ActivationDirective::deactivate("C")]).await;

    assert_eq!(reconciler.pending_count(), 0);
    assert_eq!(service.calls().len(), 3);

    service.clear();
    let report = reconciler.apply(Vec::new()).await;
    assert_eq!(report.attempted(), 0);
    assert!(service.calls().is_empty());
}

/// Verifies that a malformed token never reaches the activation service
/// and is not reported as a failure.
#[tokio::test]
async fn test_invalid_token_is_skipped() {
    let (service, reconciler) = reconciler();

    let report = reconciler
        .apply([
            ActivationDirective::activate("A", "%%% not base64 %%%"),
            ActivationDirective::activate("B", TOKEN),
        ])
        .await;

    assert_eq!(
        service.calls(),
        vec![ActivationCall::Activate("B".into(), TOKEN.into())]
    );
    assert_eq!(report.skipped, vec!["A"]);
    assert!(report.failed.is_empty());
    assert_eq!(reconciler.pending_count(), 0);
}

/// Verifies that a later snapshot entry for the same id wins.
#[tokio::test]
async fn test_repeated_id_overwrites() {
    let (service, reconciler) = reconciler();

    reconciler
        .apply([
            ActivationDirective::activate("A", TOKEN),
            ActivationDirective::deactivate("A"),
        ])
        .await;

    assert_eq!(service.calls(), vec![ActivationCall::Deactivate("A".into())]);
}

/// Verifies that a deactivate and a later activate in separate snapshots
/// reach the service in delivery order.
#[tokio::test]
async fn test_snapshots_apply_in_delivery_order() {
    let (service, reconciler) = reconciler();

    reconciler.apply([ActivationDirective::deactivate("A")]).await;
    reconciler.apply([ActivationDirective::activate("A", TOKEN)]).await;

    assert_eq!(
        service.calls(),
        vec![
            ActivationCall::Deactivate("A".into()),
            ActivationCall::Activate("A".into(), TOKEN.into()),
        ]
    );
}

// ============================================================================
// Indexed Access
// ============================================================================

/// Verifies upsert/remove/get against the pending set.
#[tokio::test]
async fn test_upsert_semantics() {
    let (service, reconciler) = reconciler();

    assert_eq!(reconciler.get("A"), None);

    reconciler.upsert("A", Some(TOKEN));
    assert_eq!(reconciler.get("A").as_deref(), Some(TOKEN));

    reconciler.upsert("A", Some("QUJD"));
    assert_eq!(reconciler.get("A").as_deref(), Some("QUJD"));

    reconciler.upsert("A", Some(""));
    assert_eq!(reconciler.get("A"), None);

    reconciler.upsert("B", Some(TOKEN));
    assert_eq!(reconciler.remove("B").as_deref(), Some(TOKEN));
    assert_eq!(reconciler.pending_count(), 0);

    reconciler.apply(Vec::new()).await;
    assert!(service.calls().is_empty());
}

/// Verifies that clearing an unknown id is a no-op.
#[tokio::test]
async fn test_clearing_unknown_id_is_noop() {
    let (service, reconciler) = reconciler();

    reconciler.upsert("ghost", None);
    reconciler.upsert("ghost", Some(""));

    assert_eq!(reconciler.pending_count(), 0);
    assert_eq!(reconciler.apply(Vec::new()).await.attempted(), 0);
    assert!(service.calls().is_empty());
}

// ============================================================================
// Retention
// ============================================================================

/// Verifies that failed entries stay pending when retention is enabled.
#[tokio::test]
async fn test_retain_failed_keeps_entries_for_next_pass() {
    let service = Arc::new(RecordingActivation::new());
    let reconciler = ActivationReconciler::new(service.clone()).with_retain_failed(true);
    service.fail_for("A");

    let report = reconciler
        .apply([
            ActivationDirective::activate("A", TOKEN),
            ActivationDirective::activate("B", TOKEN),
        ])
        .await;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(reconciler.get("A").as_deref(), Some(TOKEN));
    assert_eq!(reconciler.get("B"), None);

    service.heal("A");
    let report = reconciler.apply(Vec::new()).await;
    assert_eq!(report.activated, vec!["A"]);
    assert_eq!(reconciler.pending_count(), 0);
}

// ============================================================================
// Property Bags
// ============================================================================

/// Verifies property-bag ingestion, including the connectivity flag.
#[tokio::test]
async fn test_apply_properties() {
    let (service, reconciler) = reconciler();
    let bag = json!({
        "Connected": true,
        "A": TOKEN,
        "B": null,
        "C": "",
        "D": 42,
    });

    let report = reconciler.apply_properties(bag.as_object().unwrap()).await;

    assert!(reconciler.is_connected());
    assert_eq!(report.activated, vec!["A"]);
    assert_eq!(report.deactivated, vec!["B", "C"]);
    assert_eq!(report.attempted(), 3);
    assert_eq!(service.calls().len(), 3);
}
