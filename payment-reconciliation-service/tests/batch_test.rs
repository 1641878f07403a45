//! Integration tests for the batch sweep.

mod common;

use chrono::{Duration, Utc};
use common::{invoice, notification, notification_from, test_sweep_config, Harness, PHONE};
use payment_reconciliation_service::config::SweepConfig;
use payment_reconciliation_service::models::{DecisionKind, InvoiceStatus, ProcessingStatus};
use payment_reconciliation_service::services::{BatchBucket, Trigger};
use rust_decimal_macros::dec;

#[tokio::test]
async fn sweep_reconciles_backlog_after_invoices_change() {
    let existing = invoice("INV-2001", dec!(1500), None);
    let h = Harness::new(vec![existing.clone()]).await;
    let pipeline = &h.state.pipeline;

    let early = pipeline
        .reconcile_notification(notification_from("QK-D1", dec!(1000), PHONE), Trigger::Realtime)
        .await
        .unwrap();
    let near = pipeline
        .reconcile_notification(notification("QK-D2", dec!(1450)), Trigger::Realtime)
        .await
        .unwrap();
    assert_eq!(early.decision, DecisionKind::Unmatched);
    assert_eq!(near.decision, DecisionKind::Unmatched);

    // The invoice the first payment was meant for shows up later
    let late = invoice("INV-2002", dec!(1000), Some(PHONE));
    h.store.upsert_invoice(late.clone()).await;

    let report = h.state.batch.run().await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.needs_review, 1);
    assert_eq!(report.failed, 0);

    let d1 = report
        .items
        .iter()
        .find(|i| i.gateway_receipt_number == "QK-D1")
        .unwrap();
    assert_eq!(d1.bucket, BatchBucket::Reconciled);
    assert_eq!(d1.decision, Some(DecisionKind::AutoMatched));
    assert_eq!(d1.score, Some(85));
    assert_eq!(d1.invoice_id, Some(late.invoice_id));

    let d2 = report
        .items
        .iter()
        .find(|i| i.gateway_receipt_number == "QK-D2")
        .unwrap();
    assert_eq!(d2.bucket, BatchBucket::NeedsReview);
    assert_eq!(d2.score, Some(40));
    assert_eq!(d2.invoice_id, Some(existing.invoice_id));

    assert_eq!(h.invoice(late.invoice_id).await.status, InvoiceStatus::Paid);
    assert_eq!(h.invoice(existing.invoice_id).await.amount_paid, dec!(0));

    // Still one pending item for the payment that remains unmatched
    let pending = h.state.review_queue.list_pending(None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payment_event_id, near.payment_event_id);
}

#[tokio::test]
async fn sweep_skips_settled_events() {
    let inv = invoice("INV-2101", dec!(1000), Some(PHONE));
    let h = Harness::new(vec![inv]).await;

    h.state
        .pipeline
        .reconcile_notification(notification_from("QK-S1", dec!(1000), PHONE), Trigger::Realtime)
        .await
        .unwrap();

    let report = h.state.batch.run().await.unwrap();
    assert_eq!(report.total, 0);
    assert!(report.items.is_empty());
}

#[tokio::test]
async fn sweep_recovers_events_stuck_before_a_decision() {
    let inv = invoice("INV-2201", dec!(1000), Some(PHONE));
    let h = Harness::new(vec![inv.clone()]).await;

    // Accepted but never reconciled, e.g. the process died after ingest
    let stuck = h
        .state
        .pipeline
        .ingest(notification_from("QK-STUCK", dec!(1000), PHONE))
        .await
        .unwrap();
    let fresh = h
        .state
        .pipeline
        .ingest(notification("QK-FRESH", dec!(10)))
        .await
        .unwrap();
    assert!(stuck.created);
    assert_eq!(stuck.event.processing_status, ProcessingStatus::Received);

    h.store
        .backdate_event(stuck.event.payment_event_id, Utc::now() - Duration::minutes(10))
        .await;

    let report = h.state.batch.run().await.unwrap();

    assert_eq!(report.total, 1);
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.items[0].payment_event_id, stuck.event.payment_event_id);
    assert_eq!(h.invoice(inv.invoice_id).await.status, InvoiceStatus::Paid);

    // Within the grace period the queue may still be working on it
    let (event, record) = h
        .state
        .pipeline
        .match_for_receipt("QK-FRESH")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.payment_event_id, fresh.event.payment_event_id);
    assert_eq!(event.processing_status, ProcessingStatus::Received);
    assert!(record.is_none());
}

#[tokio::test]
async fn sweep_counts_failures_without_aborting() {
    let inv = invoice("INV-2301", dec!(1500), None);
    let h = Harness::with_sweep(
        vec![inv],
        SweepConfig {
            concurrency: 1,
            ..test_sweep_config()
        },
    )
    .await;

    for receipt in ["QK-F1", "QK-F2"] {
        h.state
            .pipeline
            .reconcile_notification(notification(receipt, dec!(1450)), Trigger::Realtime)
            .await
            .unwrap();
    }

    h.store.fail_next_commits(1);
    let report = h.state.batch.run().await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.needs_review, 1);
    let failed = report
        .items
        .iter()
        .find(|i| i.bucket == BatchBucket::Failed)
        .unwrap();
    assert!(failed.error.is_some());
    assert_eq!(failed.decision, None);
}

#[tokio::test]
async fn sweep_respects_batch_limit() {
    let h = Harness::with_sweep(
        vec![],
        SweepConfig {
            batch_limit: 2,
            ..test_sweep_config()
        },
    )
    .await;

    for i in 0..3 {
        h.state
            .pipeline
            .reconcile_notification(notification(&format!("QK-L{}", i), dec!(100)), Trigger::Realtime)
            .await
            .unwrap();
    }

    let report = h.state.batch.run().await.unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.needs_review, 2);
}
