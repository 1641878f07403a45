//! End-to-end tests over the HTTP API.

mod common;

use common::{invoice, TestApp, PHONE};
use reqwest::{Client, StatusCode};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn(vec![]).await;
    let client = Client::new();

    let response = client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "payment-reconciliation-service");

    let ready = client.get(app.url("/ready")).send().await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test]
async fn reconcile_returns_outcome_and_match_is_queryable() {
    let inv = invoice("INV-4001", dec!(1000), Some(PHONE));
    let app = TestApp::spawn(vec![inv.clone()]).await;
    let client = Client::new();

    let response = client
        .post(app.url("/v1/payments/reconcile"))
        .json(&json!({
            "amount": "1000",
            "payer_phone": PHONE,
            "gateway_receipt_number": "QK-H1",
            "gateway": "mpesa"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["decision"], "auto_matched");
    assert_eq!(outcome["score"], 85);
    assert_eq!(outcome["allocated_amount"], "1000");
    assert_eq!(outcome["invoice_id"], inv.invoice_id.to_string());
    assert_eq!(outcome["needs_review"], false);

    let response = client
        .get(app.url("/v1/payments/QK-H1/match"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["processing_status"], "applied");
    assert_eq!(body["match_record"]["decision"], "auto_matched");
    assert_eq!(body["match_record"]["component_scores"]["phone"], 25);
}

#[tokio::test]
async fn unknown_receipt_is_not_found() {
    let app = TestApp::spawn(vec![]).await;

    let response = Client::new()
        .get(app.url("/v1/payments/NOPE/match"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_notification_is_unprocessable() {
    let app = TestApp::spawn(vec![]).await;

    let response = Client::new()
        .post(app.url("/v1/payments/reconcile"))
        .json(&json!({
            "gateway_receipt_number": "QK-H2",
            "gateway": "mpesa"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = Client::new()
        .post(app.url("/v1/payments/reconcile"))
        .json(&json!({
            "amount": "0.004",
            "gateway_receipt_number": "QK-H2",
            "gateway": "mpesa"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(app.store.match_records().await.is_empty());
}

#[tokio::test]
async fn enqueued_payment_is_reconciled_by_workers() {
    let inv = invoice("INV-4101", dec!(2500), Some(PHONE));
    let app = TestApp::spawn(vec![inv.clone()]).await;
    let client = Client::new();

    let response = client
        .post(app.url("/v1/payments/enqueue"))
        .json(&json!({
            "amount": "2500",
            "payer_phone": "0712345678",
            "gateway_receipt_number": "QK-H3",
            "gateway": "mpesa"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["created"], true);
    assert_eq!(body["queued"], true);

    let mut decision = Value::Null;
    for _ in 0..100 {
        let body: Value = client
            .get(app.url("/v1/payments/QK-H3/match"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if !body["match_record"].is_null() {
            decision = body["match_record"]["decision"].clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(decision, "auto_matched");
    let stored = app
        .store
        .invoices()
        .await
        .into_iter()
        .find(|i| i.invoice_id == inv.invoice_id)
        .unwrap();
    assert_eq!(stored.amount_paid, dec!(2500));
}

#[tokio::test]
async fn review_flow_over_http() {
    let inv = invoice("INV-4201", dec!(1000), None);
    let app = TestApp::spawn(vec![inv.clone()]).await;
    let client = Client::new();

    let outcome: Value = client
        .post(app.url("/v1/payments/reconcile"))
        .json(&json!({
            "amount": "1000",
            "payer_reference": "INV-4201",
            "gateway_receipt_number": "QK-H4",
            "gateway": "bank_transfer"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["decision"], "flagged_for_review");
    let item_id = outcome["review_item_id"].as_str().unwrap().to_string();

    let listing: Value = client
        .get(app.url("/v1/review-items"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["items"][0]["review_item_id"], item_id.as_str());

    let response = client
        .post(app.url(&format!("/v1/review-items/{}/assign", item_id)))
        .json(&json!({ "assignee": "alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .post(app.url(&format!("/v1/review-items/{}/resolve", item_id)))
        .json(&json!({ "invoice_id": inv.invoice_id, "resolved_by": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = client
        .post(app.url(&format!("/v1/review-items/{}/resolve", item_id)))
        .json(&json!({ "invoice_id": inv.invoice_id, "resolved_by": "alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let resolved: Value = response.json().await.unwrap();
    assert_eq!(resolved["decision"], "auto_matched");
    assert_eq!(resolved["duplicate"], false);

    let listing: Value = client
        .get(app.url("/v1/review-items?assignee=alice"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["total"], 0);
}

#[tokio::test]
async fn sweep_endpoint_reports_buckets() {
    let app = TestApp::spawn(vec![invoice("INV-4301", dec!(1500), None)]).await;
    let client = Client::new();

    client
        .post(app.url("/v1/payments/reconcile"))
        .json(&json!({
            "amount": "1450",
            "gateway_receipt_number": "QK-H5",
            "gateway": "card"
        }))
        .send()
        .await
        .unwrap();

    let response = client
        .post(app.url("/v1/reconciliation/sweep"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report: Value = response.json().await.unwrap();
    assert_eq!(report["total"], 1);
    assert_eq!(report["reconciled"], 0);
    assert_eq!(report["needs_review"], 1);
    assert_eq!(report["failed"], 0);
    assert_eq!(report["items"][0]["bucket"], "needs_review");
}

#[tokio::test]
async fn metrics_endpoint_exposes_reconciliation_metrics() {
    let app = TestApp::spawn(vec![]).await;

    let response = Client::new().get(app.url("/metrics")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("payment_reconciliation_queue_depth"));
    // Recorded by the service-core middleware for the startup health probe
    assert!(body.contains("http_requests_total"));
}
