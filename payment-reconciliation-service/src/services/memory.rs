//! In-process store used by tests and `STORE_BACKEND=memory` deployments.
//!
//! A unit of work holds the store-wide lock and writes to a staged copy of
//! the state; `commit` swaps the copy in. Every decision is therefore
//! serialized, which subsumes per-invoice serialization.

use crate::models::{
    Invoice, InvoicePatch, MatchRecord, NewPaymentEvent, PaymentEvent, ProcessingStatus,
    ReviewItem, ReviewItemDraft, ReviewStatus, StoredEvent,
};
use crate::services::error::ReconciliationError;
use crate::services::store::{
    EventUpdate, InvoiceStore, PaymentEventStore, ReconciliationStore, ReviewResolution,
    StoreResult, UnitOfWork,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
struct MemoryState {
    invoices: HashMap<Uuid, Invoice>,
    events: HashMap<Uuid, PaymentEvent>,
    receipts: HashMap<String, Uuid>,
    match_records: HashMap<Uuid, MatchRecord>,
    review_items: HashMap<Uuid, ReviewItem>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an invoice, as the invoicing collaborator would.
    pub async fn upsert_invoice(&self, invoice: Invoice) {
        let mut state = self.state.lock().await;
        state.invoices.insert(invoice.invoice_id, invoice);
    }

    pub async fn invoices(&self) -> Vec<Invoice> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state.invoices.values().cloned().collect();
        invoices.sort_by(|a, b| a.invoice_number.cmp(&b.invoice_number));
        invoices
    }

    pub async fn match_records(&self) -> Vec<MatchRecord> {
        let state = self.state.lock().await;
        state.match_records.values().cloned().collect()
    }

    /// Move an event's `updated_utc` into the past, as if it had been
    /// sitting unprocessed since `at`.
    pub async fn backdate_event(&self, payment_event_id: Uuid, at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(event) = state.events.get_mut(&payment_event_id) {
            event.updated_utc = at;
        }
    }

    /// Make the next `count` commits fail, leaving the state untouched.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn get_open_invoices(&self, customer_phone: Option<&str>) -> StoreResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .values()
            .filter(|inv| inv.is_open())
            .filter(|inv| match customer_phone {
                Some(phone) => inv.customer_phone.as_deref() == Some(phone),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> StoreResult<Option<Invoice>> {
        let state = self.state.lock().await;
        Ok(state.invoices.get(&invoice_id).cloned())
    }
}

#[async_trait]
impl PaymentEventStore for MemoryStore {
    async fn store_event(&self, event: NewPaymentEvent) -> StoreResult<StoredEvent> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .receipts
            .get(&event.gateway_receipt_number)
            .and_then(|id| state.events.get(id))
        {
            return Ok(StoredEvent {
                event: existing.clone(),
                created: false,
            });
        }

        let now = Utc::now();
        let stored = PaymentEvent {
            payment_event_id: Uuid::new_v4(),
            gateway: event.gateway,
            amount: event.amount,
            payer_phone: event.payer_phone,
            payer_reference: event.payer_reference,
            gateway_receipt_number: event.gateway_receipt_number,
            occurred_at: event.occurred_at,
            processing_status: ProcessingStatus::Received,
            received_utc: now,
            updated_utc: now,
        };

        state
            .receipts
            .insert(stored.gateway_receipt_number.clone(), stored.payment_event_id);
        state.events.insert(stored.payment_event_id, stored.clone());

        Ok(StoredEvent {
            event: stored,
            created: true,
        })
    }

    async fn get_event(&self, payment_event_id: Uuid) -> StoreResult<Option<PaymentEvent>> {
        let state = self.state.lock().await;
        Ok(state.events.get(&payment_event_id).cloned())
    }

    async fn get_event_by_receipt(&self, receipt: &str) -> StoreResult<Option<PaymentEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .receipts
            .get(receipt)
            .and_then(|id| state.events.get(id))
            .cloned())
    }

    async fn list_events(
        &self,
        statuses: &[ProcessingStatus],
        updated_before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<PaymentEvent>> {
        let state = self.state.lock().await;
        let mut events: Vec<PaymentEvent> = state
            .events
            .values()
            .filter(|e| statuses.contains(&e.processing_status))
            .filter(|e| updated_before.map_or(true, |cutoff| e.updated_utc < cutoff))
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.received_utc
                .cmp(&b.received_utc)
                .then(a.payment_event_id.cmp(&b.payment_event_id))
        });
        events.truncate(limit);
        Ok(events)
    }

    async fn mark_scored(&self, payment_event_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.events.get_mut(&payment_event_id) {
            Some(event) if event.processing_status == ProcessingStatus::Received => {
                event.processing_status = ProcessingStatus::Scored;
                event.updated_utc = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_match_record(&self, payment_event_id: Uuid) -> StoreResult<Option<MatchRecord>> {
        let state = self.state.lock().await;
        Ok(state.match_records.get(&payment_event_id).cloned())
    }

    async fn get_review_item(&self, review_item_id: Uuid) -> StoreResult<Option<ReviewItem>> {
        let state = self.state.lock().await;
        Ok(state.review_items.get(&review_item_id).cloned())
    }

    async fn pending_review_item(&self, payment_event_id: Uuid) -> StoreResult<Option<ReviewItem>> {
        let state = self.state.lock().await;
        Ok(state
            .review_items
            .values()
            .find(|item| {
                item.payment_event_id == payment_event_id && item.status == ReviewStatus::Pending
            })
            .cloned())
    }

    async fn list_review_items(
        &self,
        status: ReviewStatus,
        assignee: Option<&str>,
    ) -> StoreResult<Vec<ReviewItem>> {
        let state = self.state.lock().await;
        let mut items: Vec<ReviewItem> = state
            .review_items
            .values()
            .filter(|item| item.status == status)
            .filter(|item| assignee.map_or(true, |a| item.assignee.as_deref() == Some(a)))
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then(a.review_item_id.cmp(&b.review_item_id))
        });
        Ok(items)
    }

    async fn assign_review_item(
        &self,
        review_item_id: Uuid,
        assignee: &str,
    ) -> StoreResult<Option<ReviewItem>> {
        let mut state = self.state.lock().await;
        match state.review_items.get_mut(&review_item_id) {
            Some(item) if item.status == ReviewStatus::Pending => {
                item.assignee = Some(assignee.to_string());
                item.updated_utc = Utc::now();
                Ok(Some(item.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ReconciliationStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            staged,
            failing_commits: self.failing_commits.clone(),
        }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    failing_commits: Arc<AtomicUsize>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_event(&mut self, payment_event_id: Uuid) -> StoreResult<Option<PaymentEvent>> {
        Ok(self.staged.events.get(&payment_event_id).cloned())
    }

    async fn match_record(&mut self, payment_event_id: Uuid) -> StoreResult<Option<MatchRecord>> {
        Ok(self.staged.match_records.get(&payment_event_id).cloned())
    }

    async fn lock_invoice(&mut self, invoice_id: Uuid) -> StoreResult<Option<Invoice>> {
        Ok(self.staged.invoices.get(&invoice_id).cloned())
    }

    async fn update_invoice(&mut self, invoice_id: Uuid, patch: InvoicePatch) -> StoreResult<bool> {
        match self.staged.invoices.get_mut(&invoice_id) {
            Some(invoice) if invoice.version == patch.expected_version => {
                if patch.amount_paid > invoice.total_amount {
                    return Err(ReconciliationError::Persistence(anyhow::anyhow!(
                        "amount_paid {} exceeds total {} for invoice {}",
                        patch.amount_paid,
                        invoice.total_amount,
                        invoice_id
                    )));
                }
                invoice.amount_paid = patch.amount_paid;
                invoice.status = patch.status;
                invoice.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_event(
        &mut self,
        payment_event_id: Uuid,
        update: EventUpdate,
    ) -> StoreResult<bool> {
        let Some(event) = self.staged.events.get_mut(&payment_event_id) else {
            return Ok(false);
        };
        event.processing_status = update.processing_status;
        event.updated_utc = Utc::now();

        if let Some(record) = update.match_record {
            self.staged.match_records.insert(payment_event_id, record);
        }
        Ok(true)
    }

    async fn upsert_review_item(&mut self, draft: ReviewItemDraft) -> StoreResult<ReviewItem> {
        let now = Utc::now();
        let existing = self.staged.review_items.values_mut().find(|item| {
            item.payment_event_id == draft.payment_event_id && item.status == ReviewStatus::Pending
        });

        if let Some(item) = existing {
            item.best_candidate_invoice_id = draft.best_candidate_invoice_id;
            item.score = draft.score;
            item.reason = draft.reason;
            item.updated_utc = now;
            return Ok(item.clone());
        }

        let item = ReviewItem {
            review_item_id: Uuid::new_v4(),
            payment_event_id: draft.payment_event_id,
            best_candidate_invoice_id: draft.best_candidate_invoice_id,
            score: draft.score,
            reason: draft.reason,
            assignee: None,
            status: ReviewStatus::Pending,
            resolution: None,
            resolved_by: None,
            created_utc: now,
            updated_utc: now,
            resolved_utc: None,
        };
        self.staged
            .review_items
            .insert(item.review_item_id, item.clone());
        Ok(item)
    }

    async fn resolve_review_items(
        &mut self,
        payment_event_id: Uuid,
        resolution: ReviewResolution,
    ) -> StoreResult<u64> {
        let now = Utc::now();
        let mut resolved = 0;
        for item in self.staged.review_items.values_mut() {
            if item.payment_event_id == payment_event_id && item.status == ReviewStatus::Pending {
                item.status = ReviewStatus::Resolved;
                item.resolution = Some(resolution.resolution.clone());
                item.resolved_by = Some(resolution.resolved_by.clone());
                item.resolved_utc = Some(now);
                item.updated_utc = now;
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        let fail = this
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(ReconciliationError::Persistence(anyhow::anyhow!(
                "injected commit failure"
            )));
        }

        let MemoryUnitOfWork {
            mut guard, staged, ..
        } = this;
        *guard = staged;
        Ok(())
    }
}
