//! Commit orchestration integration tests against the in-memory ledger.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;
use common::{draft_with, permanent_receipt, unmatched_transaction, InMemoryLedger};
use receipt_service::models::{
    ReceiptLocation, ReconciliationAction, ReconciliationDecision, ReconciliationStatus,
};
use receipt_service::services::orchestrator::Orchestrator;
use service_core::error::AppError;
use uuid::Uuid;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn link_decision(workspace_id: Uuid, target: Uuid, key: &str) -> ReconciliationDecision {
    ReconciliationDecision {
        action: ReconciliationAction::Link,
        workspace_id,
        target_transaction_id: Some(target),
        draft: draft_with("45.20", Some(date(2024, 3, 10)), Some("Carrefour")),
        receipt: permanent_receipt(key),
        resume_transaction_id: None,
    }
}

fn create_new_decision(workspace_id: Uuid, key: &str) -> ReconciliationDecision {
    ReconciliationDecision {
        action: ReconciliationAction::CreateNew,
        workspace_id,
        target_transaction_id: None,
        draft: draft_with("12.00", Some(date(2024, 3, 10)), Some("SNCF")),
        receipt: permanent_receipt(key),
        resume_transaction_id: None,
    }
}

#[tokio::test]
async fn link_marks_row_matched_and_creates_record() {
    let ledger = Arc::new(InMemoryLedger::new());
    let workspace = Uuid::new_v4();
    let tx = unmatched_transaction(workspace, "-45.20", date(2024, 3, 11), Some("CARREFOUR"));
    let tx_id = tx.transaction_id;
    ledger.seed_transaction(tx);

    let orchestrator = Orchestrator::new(ledger.clone());
    let outcome = orchestrator
        .commit(link_decision(workspace, tx_id, "receipts/a.pdf"))
        .await
        .unwrap();

    assert_eq!(outcome.status, ReconciliationStatus::Matched);
    assert_eq!(outcome.transaction_id, Some(tx_id));

    let row = ledger.transaction(tx_id).unwrap();
    assert_eq!(row.status(), ReconciliationStatus::Matched);
    assert_eq!(row.linked_expense_id, Some(outcome.expense_record_id));
    assert_eq!(row.receipt_key.as_deref(), Some("receipts/a.pdf"));

    let record = ledger.record(outcome.expense_record_id).unwrap();
    assert_eq!(record.receipt_key.as_deref(), Some("receipts/a.pdf"));
}

#[tokio::test]
async fn link_to_resolved_row_is_conflict_and_leaves_row_untouched() {
    let ledger = Arc::new(InMemoryLedger::new());
    let workspace = Uuid::new_v4();
    let tx = unmatched_transaction(workspace, "-45.20", date(2024, 3, 11), None);
    let tx_id = tx.transaction_id;
    ledger.seed_transaction(tx);

    let orchestrator = Orchestrator::new(ledger.clone());
    orchestrator
        .commit(link_decision(workspace, tx_id, "receipts/first.pdf"))
        .await
        .unwrap();
    let before = ledger.transaction(tx_id).unwrap();

    let err = orchestrator
        .commit(link_decision(workspace, tx_id, "receipts/second.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let after = ledger.transaction(tx_id).unwrap();
    assert_eq!(after.receipt_key, before.receipt_key);
    assert_eq!(after.linked_expense_id, before.linked_expense_id);
}

#[tokio::test]
async fn link_to_missing_row_is_not_found() {
    let ledger = Arc::new(InMemoryLedger::new());
    let orchestrator = Orchestrator::new(ledger.clone());

    let err = orchestrator
        .commit(link_decision(Uuid::new_v4(), Uuid::new_v4(), "receipts/x.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(ledger.record_count(), 0);
}

#[tokio::test]
async fn temp_receipt_is_rejected() {
    let ledger = Arc::new(InMemoryLedger::new());
    let orchestrator = Orchestrator::new(ledger.clone());

    let mut decision = create_new_decision(Uuid::new_v4(), "tmp/x.pdf");
    decision.receipt.location = ReceiptLocation::Temp;

    let err = orchestrator.commit(decision).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn create_new_writes_exactly_one_signed_row() {
    let ledger = Arc::new(InMemoryLedger::new());
    let workspace = Uuid::new_v4();
    let orchestrator = Orchestrator::new(ledger.clone());

    let outcome = orchestrator
        .commit(create_new_decision(workspace, "receipts/solo.pdf"))
        .await
        .unwrap();

    assert_eq!(outcome.status, ReconciliationStatus::Matched);
    assert_eq!(ledger.transaction_count(), 1);
    assert_eq!(ledger.record_count(), 1);

    let row = ledger.transaction(outcome.transaction_id.unwrap()).unwrap();
    // Expenses land negative in the ledger.
    assert_eq!(row.amount.to_string(), "-12.00");
    assert_eq!(row.status(), ReconciliationStatus::Matched);
    assert_eq!(row.linked_expense_id, Some(outcome.expense_record_id));
    assert_eq!(row.receipt_key.as_deref(), Some("receipts/solo.pdf"));
    assert!(!row.needs_attention);
}

#[tokio::test]
async fn failed_attach_surfaces_row_id_and_resume_completes() {
    let ledger = Arc::new(InMemoryLedger::new());
    let workspace = Uuid::new_v4();
    let orchestrator = Orchestrator::new(ledger.clone());

    ledger.fail_attach.store(true, Ordering::SeqCst);
    let err = orchestrator
        .commit(create_new_decision(workspace, "receipts/crash.pdf"))
        .await
        .unwrap_err();

    let AppError::InconsistentState { record_id, .. } = err else {
        panic!("expected InconsistentState, got {err:?}");
    };
    assert!(ledger.transaction(record_id).unwrap().needs_attention);
    assert_eq!(ledger.transaction_count(), 1);

    // Retry with the surfaced id finishes the attach without a duplicate.
    ledger.fail_attach.store(false, Ordering::SeqCst);
    let mut retry = create_new_decision(workspace, "receipts/crash.pdf");
    retry.resume_transaction_id = Some(record_id);
    let outcome = orchestrator.commit(retry).await.unwrap();

    assert_eq!(outcome.transaction_id, Some(record_id));
    assert_eq!(ledger.transaction_count(), 1);
    let row = ledger.transaction(record_id).unwrap();
    assert!(!row.needs_attention);
    assert_eq!(row.receipt_key.as_deref(), Some("receipts/crash.pdf"));
}

#[tokio::test]
async fn replayed_commit_returns_original_outcome() {
    let ledger = Arc::new(InMemoryLedger::new());
    let workspace = Uuid::new_v4();
    let tx = unmatched_transaction(workspace, "-45.20", date(2024, 3, 11), None);
    let tx_id = tx.transaction_id;
    ledger.seed_transaction(tx);

    let orchestrator = Orchestrator::new(ledger.clone());
    let first = orchestrator
        .commit(link_decision(workspace, tx_id, "receipts/replay.pdf"))
        .await
        .unwrap();

    // Same receipt key again: no second write, same ids back.
    let second = orchestrator
        .commit(link_decision(workspace, tx_id, "receipts/replay.pdf"))
        .await
        .unwrap();
    assert_eq!(second.transaction_id, first.transaction_id);
    assert_eq!(second.expense_record_id, first.expense_record_id);
    assert_eq!(ledger.record_count(), 1);

    let replayed_create = orchestrator
        .commit(create_new_decision(workspace, "receipts/solo.pdf"))
        .await
        .unwrap();
    let again = orchestrator
        .commit(create_new_decision(workspace, "receipts/solo.pdf"))
        .await
        .unwrap();
    assert_eq!(again.expense_record_id, replayed_create.expense_record_id);
    assert_eq!(ledger.record_count(), 2);
}

#[tokio::test]
async fn concurrent_links_have_exactly_one_winner() {
    let ledger = Arc::new(InMemoryLedger::new());
    let workspace = Uuid::new_v4();
    let tx = unmatched_transaction(workspace, "-45.20", date(2024, 3, 11), None);
    let tx_id = tx.transaction_id;
    ledger.seed_transaction(tx);

    let orchestrator = Arc::new(Orchestrator::new(ledger.clone()));

    let mut handles = Vec::new();
    for i in 0..4 {
        let orchestrator = orchestrator.clone();
        let decision = link_decision(workspace, tx_id, &format!("receipts/race-{i}.pdf"));
        handles.push(tokio::spawn(
            async move { orchestrator.commit(decision).await },
        ));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(AppError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(conflicts, 3);
    assert_eq!(ledger.record_count(), 1);
}
