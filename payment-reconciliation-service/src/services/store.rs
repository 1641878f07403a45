//! Store interfaces injected into every reconciliation component.
//!
//! `InvoiceStore` and `PaymentEventStore` are the read side used by the
//! candidate selector, review queue and batch sweep. All writes that make up
//! a decision go through a `UnitOfWork`, which commits atomically or not at
//! all.

use crate::models::{
    Invoice, InvoicePatch, MatchRecord, NewPaymentEvent, PaymentEvent, ProcessingStatus,
    ReviewItem, ReviewItemDraft, ReviewStatus, StoredEvent,
};
use crate::services::error::ReconciliationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub type StoreResult<T> = Result<T, ReconciliationError>;

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Matchable invoices. With a phone hint, only that customer's invoices.
    async fn get_open_invoices(&self, customer_phone: Option<&str>) -> StoreResult<Vec<Invoice>>;

    async fn get_invoice(&self, invoice_id: Uuid) -> StoreResult<Option<Invoice>>;
}

#[async_trait]
pub trait PaymentEventStore: Send + Sync {
    /// Insert the event, or return the existing row for its receipt number.
    async fn store_event(&self, event: NewPaymentEvent) -> StoreResult<StoredEvent>;

    async fn get_event(&self, payment_event_id: Uuid) -> StoreResult<Option<PaymentEvent>>;

    async fn get_event_by_receipt(&self, receipt: &str) -> StoreResult<Option<PaymentEvent>>;

    /// Events in any of `statuses`, oldest first. `updated_before` limits the
    /// result to events untouched since that instant.
    async fn list_events(
        &self,
        statuses: &[ProcessingStatus],
        updated_before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<PaymentEvent>>;

    /// `received -> scored`. Any other current status is left alone.
    async fn mark_scored(&self, payment_event_id: Uuid) -> StoreResult<bool>;

    async fn get_match_record(&self, payment_event_id: Uuid) -> StoreResult<Option<MatchRecord>>;

    async fn get_review_item(&self, review_item_id: Uuid) -> StoreResult<Option<ReviewItem>>;

    /// The pending review item for a payment event, if one is open.
    async fn pending_review_item(&self, payment_event_id: Uuid) -> StoreResult<Option<ReviewItem>>;

    /// Review items by status, oldest first, optionally for one assignee.
    async fn list_review_items(
        &self,
        status: ReviewStatus,
        assignee: Option<&str>,
    ) -> StoreResult<Vec<ReviewItem>>;

    /// Set the assignee of a pending item. `None` if no pending item has that id.
    async fn assign_review_item(
        &self,
        review_item_id: Uuid,
        assignee: &str,
    ) -> StoreResult<Option<ReviewItem>>;
}

/// Status and match record written together by `UnitOfWork::update_event`.
#[derive(Debug, Clone)]
pub struct EventUpdate {
    pub processing_status: ProcessingStatus,
    pub match_record: Option<MatchRecord>,
}

/// How pending review items of an event are closed.
#[derive(Debug, Clone)]
pub struct ReviewResolution {
    pub resolution: String,
    pub resolved_by: String,
}

/// An atomic set of writes against both stores.
///
/// Dropping a unit of work without calling `commit` discards every write.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock the event for the rest of the unit of work.
    async fn lock_event(&mut self, payment_event_id: Uuid) -> StoreResult<Option<PaymentEvent>>;

    async fn match_record(&mut self, payment_event_id: Uuid) -> StoreResult<Option<MatchRecord>>;

    /// Lock the invoice for the rest of the unit of work.
    async fn lock_invoice(&mut self, invoice_id: Uuid) -> StoreResult<Option<Invoice>>;

    /// Compare-and-swap on `patch.expected_version`. `false` when the stored
    /// version moved on; the version is bumped on success.
    async fn update_invoice(&mut self, invoice_id: Uuid, patch: InvoicePatch) -> StoreResult<bool>;

    /// Set the processing status and upsert the event's single match record.
    async fn update_event(&mut self, payment_event_id: Uuid, update: EventUpdate)
        -> StoreResult<bool>;

    /// Create the event's pending review item, or refresh it if one exists.
    async fn upsert_review_item(&mut self, draft: ReviewItemDraft) -> StoreResult<ReviewItem>;

    /// Resolve every pending review item of the event. Returns how many changed.
    async fn resolve_review_items(
        &mut self,
        payment_event_id: Uuid,
        resolution: ReviewResolution,
    ) -> StoreResult<u64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Both stores plus the ability to open a unit of work spanning them.
#[async_trait]
pub trait ReconciliationStore: InvoiceStore + PaymentEventStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    async fn health_check(&self) -> StoreResult<()>;
}
