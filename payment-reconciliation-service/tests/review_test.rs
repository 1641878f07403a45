//! Integration tests for the human review queue.

mod common;

use common::{invoice, notification, Harness};
use payment_reconciliation_service::models::{
    DecisionKind, InvoiceStatus, PaymentNotification, ProcessingStatus, ReviewStatus,
};
use payment_reconciliation_service::services::{
    ReconciliationError, ReconciliationOutcome, Trigger,
};
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Exact amount plus matching reference, no phone: 75, flagged.
async fn flagged(h: &Harness, receipt: &str, invoice_number: &str) -> ReconciliationOutcome {
    let n = PaymentNotification {
        payer_reference: Some(invoice_number.to_string()),
        ..notification(receipt, dec!(1000))
    };
    let outcome = h
        .state
        .pipeline
        .reconcile_notification(n, Trigger::Realtime)
        .await
        .unwrap();
    assert_eq!(outcome.decision, DecisionKind::FlaggedForReview);
    outcome
}

#[tokio::test]
async fn flagged_payment_creates_pending_item() {
    let inv = invoice("INV-3001", dec!(1000), None);
    let h = Harness::new(vec![inv.clone()]).await;

    let outcome = flagged(&h, "QK-R1", "INV-3001").await;

    let pending = h.state.review_queue.list_pending(None).await.unwrap();
    assert_eq!(pending.len(), 1);
    let item = &pending[0];
    assert_eq!(Some(item.review_item_id), outcome.review_item_id);
    assert_eq!(item.payment_event_id, outcome.payment_event_id);
    assert_eq!(item.best_candidate_invoice_id, Some(inv.invoice_id));
    assert_eq!(item.score, 75);
    assert_eq!(item.status, ReviewStatus::Pending);
    assert!(item.assignee.is_none());
}

#[tokio::test]
async fn redelivered_flagged_payment_reports_its_pending_item() {
    let h = Harness::new(vec![invoice("INV-3051", dec!(1000), None)]).await;
    let first = flagged(&h, "QK-R1B", "INV-3051").await;

    let n = PaymentNotification {
        payer_reference: Some("INV-3051".to_string()),
        ..notification("QK-R1B", dec!(1000))
    };
    let again = h
        .state
        .pipeline
        .reconcile_notification(n, Trigger::Realtime)
        .await
        .unwrap();

    assert!(again.duplicate);
    assert!(again.needs_review);
    assert_eq!(again.decision, DecisionKind::FlaggedForReview);
    assert!(again.review_item_id.is_some());
    assert_eq!(again.review_item_id, first.review_item_id);
}

#[tokio::test]
async fn assign_sets_reviewer_and_filters_listing() {
    let h = Harness::new(vec![invoice("INV-3101", dec!(1000), None)]).await;
    let outcome = flagged(&h, "QK-R2", "INV-3101").await;
    let item_id = outcome.review_item_id.unwrap();

    let item = h.state.review_queue.assign(item_id, " alice ").await.unwrap();
    assert_eq!(item.assignee.as_deref(), Some("alice"));

    let mine = h.state.review_queue.list_pending(Some("alice")).await.unwrap();
    assert_eq!(mine.len(), 1);
    let theirs = h.state.review_queue.list_pending(Some("bob")).await.unwrap();
    assert!(theirs.is_empty());

    let blank = h.state.review_queue.assign(item_id, "   ").await.unwrap_err();
    assert!(matches!(blank, ReconciliationError::Validation(_)));

    let missing = h
        .state
        .review_queue
        .assign(Uuid::new_v4(), "alice")
        .await
        .unwrap_err();
    assert!(matches!(missing, ReconciliationError::NotFound(_)));
}

#[tokio::test]
async fn resolving_with_invoice_applies_payment() {
    let inv = invoice("INV-3201", dec!(1000), None);
    let h = Harness::new(vec![inv.clone()]).await;
    let item_id = flagged(&h, "QK-R3", "INV-3201").await.review_item_id.unwrap();

    let outcome = h
        .state
        .review_queue
        .resolve(item_id, Some(inv.invoice_id), "alice")
        .await
        .unwrap();

    assert_eq!(outcome.decision, DecisionKind::AutoMatched);
    assert_eq!(outcome.invoice_id, Some(inv.invoice_id));
    assert_eq!(outcome.allocated_amount, dec!(1000));
    assert!(!outcome.duplicate);

    let stored = h.invoice(inv.invoice_id).await;
    assert_eq!(stored.amount_paid, dec!(1000));
    assert_eq!(stored.status, InvoiceStatus::Paid);

    let (event, record) = h
        .state
        .pipeline
        .match_for_receipt("QK-R3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.processing_status, ProcessingStatus::Applied);
    assert_eq!(record.unwrap().matched_by, "alice");
    assert!(h.state.review_queue.list_pending(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn resolving_twice_returns_first_outcome() {
    let inv = invoice("INV-3301", dec!(1000), None);
    let h = Harness::new(vec![inv.clone()]).await;
    let item_id = flagged(&h, "QK-R4", "INV-3301").await.review_item_id.unwrap();

    let first = h
        .state
        .review_queue
        .resolve(item_id, Some(inv.invoice_id), "alice")
        .await
        .unwrap();
    let second = h
        .state
        .review_queue
        .resolve(item_id, None, "bob")
        .await
        .unwrap();

    assert!(second.duplicate);
    assert_eq!(second.decision, first.decision);
    assert_eq!(second.invoice_id, first.invoice_id);
    assert_eq!(h.invoice(inv.invoice_id).await.amount_paid, dec!(1000));
    assert_eq!(h.store.match_records().await.len(), 1);
}

#[tokio::test]
async fn resolving_without_invoice_confirms_non_invoice_payment() {
    let inv = invoice("INV-3401", dec!(1500), None);
    let h = Harness::new(vec![inv.clone()]).await;

    let outcome = h
        .state
        .pipeline
        .reconcile_notification(notification("QK-R5", dec!(1450)), Trigger::Realtime)
        .await
        .unwrap();
    let item_id = outcome.review_item_id.unwrap();

    let resolved = h
        .state
        .review_queue
        .resolve(item_id, None, "carol")
        .await
        .unwrap();

    assert_eq!(resolved.decision, DecisionKind::ConfirmedNonInvoice);
    assert_eq!(resolved.invoice_id, None);
    assert!(!resolved.needs_review);
    assert_eq!(h.invoice(inv.invoice_id).await.amount_paid, dec!(0));

    let (event, _) = h
        .state
        .pipeline
        .match_for_receipt("QK-R5")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.processing_status, ProcessingStatus::ConfirmedNonInvoice);

    // Settled events stay out of the sweep
    let report = h.state.batch.run().await.unwrap();
    assert_eq!(report.total, 0);
}

#[tokio::test]
async fn resolving_to_closed_or_unknown_invoice_is_rejected() {
    let suggested = invoice("INV-3501", dec!(1500), None);
    let mut paid = invoice("INV-3502", dec!(1450), None);
    paid.amount_paid = dec!(1450);
    paid.status = InvoiceStatus::Paid;
    let h = Harness::new(vec![suggested.clone(), paid.clone()]).await;

    let item_id = h
        .state
        .pipeline
        .reconcile_notification(notification("QK-R6", dec!(1450)), Trigger::Realtime)
        .await
        .unwrap()
        .review_item_id
        .unwrap();

    let err = h
        .state
        .review_queue
        .resolve(item_id, Some(paid.invoice_id), "dave")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::Validation(_)));

    let err = h
        .state
        .review_queue
        .resolve(item_id, Some(Uuid::new_v4()), "dave")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::Validation(_)));

    let err = h
        .state
        .review_queue
        .resolve(item_id, Some(suggested.invoice_id), "")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::Validation(_)));

    // Nothing moved and the item is still waiting
    assert_eq!(h.invoice(paid.invoice_id).await.version, paid.version);
    assert_eq!(h.invoice(suggested.invoice_id).await.amount_paid, dec!(0));
    assert_eq!(h.state.review_queue.list_pending(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn resolving_unknown_item_is_not_found() {
    let h = Harness::new(vec![]).await;
    let err = h
        .state
        .review_queue
        .resolve(Uuid::new_v4(), None, "erin")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::NotFound(_)));
}
