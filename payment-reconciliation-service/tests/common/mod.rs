//! Common test utilities for payment-reconciliation-service integration tests.
#![allow(dead_code)]

use chrono::NaiveDate;
use payment_reconciliation_service::config::{
    DatabaseConfig, MatchingConfig, ReconciliationConfig, StoreBackend, SweepConfig, WorkerConfig,
};
use payment_reconciliation_service::models::{
    Gateway, Invoice, InvoiceStatus, PaymentNotification,
};
use payment_reconciliation_service::services::MemoryStore;
use payment_reconciliation_service::startup::{AppState, Application};
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,payment_reconciliation_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const PHONE: &str = "254712345678";

/// Open invoice with no payments against it.
pub fn invoice(number: &str, total: Decimal, phone: Option<&str>) -> Invoice {
    Invoice {
        invoice_id: Uuid::new_v4(),
        invoice_number: number.to_string(),
        customer_id: Uuid::new_v4(),
        customer_phone: phone.map(str::to_string),
        total_amount: total,
        amount_paid: Decimal::ZERO,
        due_date: NaiveDate::from_ymd_opt(2025, 1, 31),
        status: InvoiceStatus::Open,
        version: 1,
    }
}

pub fn notification(receipt: &str, amount: Decimal) -> PaymentNotification {
    PaymentNotification {
        amount: Some(amount),
        payer_phone: None,
        payer_reference: None,
        gateway_receipt_number: Some(receipt.to_string()),
        occurred_at: None,
        gateway: Some(Gateway::Mpesa),
    }
}

pub fn notification_from(receipt: &str, amount: Decimal, phone: &str) -> PaymentNotification {
    PaymentNotification {
        payer_phone: Some(phone.to_string()),
        ..notification(receipt, amount)
    }
}

/// In-process components over a memory store, without the HTTP layer.
pub struct Harness {
    pub store: MemoryStore,
    pub state: AppState,
}

impl Harness {
    pub async fn new(invoices: Vec<Invoice>) -> Self {
        Self::with_sweep(invoices, test_sweep_config()).await
    }

    pub async fn with_sweep(invoices: Vec<Invoice>, sweep: SweepConfig) -> Self {
        init_tracing();

        let store = MemoryStore::new();
        for invoice in invoices {
            store.upsert_invoice(invoice).await;
        }

        let (state, _pool) = AppState::new(
            Arc::new(store.clone()),
            MatchingConfig::default(),
            WorkerConfig {
                enabled: false,
                ..WorkerConfig::default()
            },
            sweep,
            CancellationToken::new(),
        );

        Self { store, state }
    }

    pub async fn invoice(&self, invoice_id: Uuid) -> Invoice {
        self.store
            .invoices()
            .await
            .into_iter()
            .find(|i| i.invoice_id == invoice_id)
            .expect("invoice should exist")
    }
}

pub fn test_sweep_config() -> SweepConfig {
    SweepConfig {
        interval: None,
        concurrency: 4,
        batch_limit: 100,
        stale_after: Duration::from_secs(60),
    }
}

fn test_config() -> ReconciliationConfig {
    ReconciliationConfig {
        common: CommonConfig { port: 0 },
        service_name: "payment-reconciliation-service-test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        store: StoreBackend::Memory,
        database: DatabaseConfig {
            url: None,
            max_connections: 1,
            min_connections: 1,
        },
        worker: WorkerConfig {
            enabled: true,
            worker_count: 2,
            queue_size: 16,
            max_retry_secs: 5,
        },
        sweep: test_sweep_config(),
        matching: MatchingConfig::default(),
    }
}

/// Running server backed by a memory store the test can inspect.
pub struct TestApp {
    pub http_address: String,
    pub store: MemoryStore,
    shutdown: CancellationToken,
}

impl TestApp {
    pub async fn spawn(invoices: Vec<Invoice>) -> Self {
        init_tracing();

        let store = MemoryStore::new();
        for invoice in invoices {
            store.upsert_invoice(invoice).await;
        }

        let app = Application::build_with_store(test_config(), Arc::new(store.clone()))
            .await
            .expect("Failed to build application");
        let http_address = format!("http://127.0.0.1:{}", app.port());
        let shutdown = app.shutdown_token();

        tokio::spawn(async move {
            let _ = app.run_until_stopped().await;
        });

        // Wait for the server to accept connections
        let client = reqwest::Client::new();
        for _ in 0..50 {
            if client
                .get(format!("{}/health", http_address))
                .send()
                .await
                .is_ok()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        TestApp {
            http_address,
            store,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http_address, path)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
