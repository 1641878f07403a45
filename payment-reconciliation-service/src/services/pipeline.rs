//! Single-event reconciliation: select, score, decide, apply.

use crate::models::{DecisionKind, MatchRecord, PaymentEvent, PaymentNotification, StoredEvent};
use crate::services::candidates::{CandidatePool, CandidateSelector};
use crate::services::decision::{decide, Decision, AUTO_MATCH_THRESHOLD};
use crate::services::error::ReconciliationError;
use crate::services::metrics::{record_decision, record_error, RECONCILE_DURATION};
use crate::services::scorer::ScoringStrategy;
use crate::services::state_updater::{Applied, StateUpdater};
use crate::services::store::ReconciliationStore;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Attempts per event when the chosen invoice changes under us.
pub const MAX_CONFLICT_ATTEMPTS: u32 = 3;

/// What started a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Realtime,
    Queue,
    Sweep,
    Review,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Realtime => "realtime",
            Trigger::Queue => "queue",
            Trigger::Sweep => "sweep",
            Trigger::Review => "review",
        }
    }
}

/// Result of reconciling one payment event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationOutcome {
    pub payment_event_id: Uuid,
    pub gateway_receipt_number: String,
    pub decision: DecisionKind,
    pub score: u8,
    /// Chosen invoice, or the suggested one when a human must decide.
    pub invoice_id: Option<Uuid>,
    pub allocated_amount: Decimal,
    /// Part of the payment no invoice absorbed.
    pub unallocated_amount: Decimal,
    pub needs_review: bool,
    /// The event was already reconciled; this run changed nothing.
    pub duplicate: bool,
    pub review_item_id: Option<Uuid>,
}

impl ReconciliationOutcome {
    pub fn from_record(
        event: &PaymentEvent,
        record: MatchRecord,
        duplicate: bool,
        review_item_id: Option<Uuid>,
    ) -> Self {
        let unallocated_amount = if record.decision.allocates() {
            (event.amount - record.allocated_amount).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        Self {
            payment_event_id: record.payment_event_id,
            gateway_receipt_number: record.gateway_receipt_number,
            decision: record.decision,
            score: record.score,
            invoice_id: record.invoice_id,
            allocated_amount: record.allocated_amount,
            unallocated_amount,
            needs_review: record.decision.needs_review(),
            duplicate,
            review_item_id,
        }
    }

    fn from_applied(event: &PaymentEvent, applied: Applied) -> Self {
        let review_item_id = applied.review_item.as_ref().map(|i| i.review_item_id);
        Self::from_record(event, applied.record, false, review_item_id)
    }
}

#[derive(Clone)]
pub struct ReconciliationPipeline {
    store: Arc<dyn ReconciliationStore>,
    selector: CandidateSelector,
    scoring: ScoringStrategy,
    updater: StateUpdater,
}

impl ReconciliationPipeline {
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        selector: CandidateSelector,
        scoring: ScoringStrategy,
    ) -> Self {
        Self {
            updater: StateUpdater::new(store.clone()),
            store,
            selector,
            scoring,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReconciliationStore> {
        &self.store
    }

    pub fn scoring(&self) -> &ScoringStrategy {
        &self.scoring
    }

    pub fn updater(&self) -> &StateUpdater {
        &self.updater
    }

    /// Validate and durably record a notification. Redelivery of a known
    /// receipt returns the stored event with `created = false`.
    #[instrument(skip(self, notification), fields(receipt = ?notification.gateway_receipt_number))]
    pub async fn ingest(
        &self,
        notification: PaymentNotification,
    ) -> Result<StoredEvent, ReconciliationError> {
        let event = notification.into_new_event().map_err(|e| {
            record_error("validation");
            ReconciliationError::from(e)
        })?;
        self.store.store_event(event).await
    }

    /// Ingest then reconcile immediately.
    pub async fn reconcile_notification(
        &self,
        notification: PaymentNotification,
        trigger: Trigger,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let stored = self.ingest(notification).await?;

        if !stored.created {
            if let Some(record) = self
                .store
                .get_match_record(stored.event.payment_event_id)
                .await?
            {
                info!(
                    payment_event_id = %stored.event.payment_event_id,
                    decision = record.decision.as_str(),
                    "Duplicate delivery of a reconciled receipt"
                );
                let review_item_id = if record.decision.needs_review() {
                    self.store
                        .pending_review_item(stored.event.payment_event_id)
                        .await?
                        .map(|item| item.review_item_id)
                } else {
                    None
                };
                return Ok(ReconciliationOutcome::from_record(
                    &stored.event,
                    record,
                    true,
                    review_item_id,
                ));
            }
        }

        self.reconcile_event(&stored.event, trigger).await
    }

    /// Reload the event and reconcile it. Settled events are reported as
    /// duplicates without a new run.
    pub async fn reconcile_by_id(
        &self,
        payment_event_id: Uuid,
        trigger: Trigger,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let event = self.store.get_event(payment_event_id).await?.ok_or_else(|| {
            ReconciliationError::NotFound(format!("Payment event {} not found", payment_event_id))
        })?;

        if event.processing_status.is_settled() {
            if let Some(record) = self.store.get_match_record(payment_event_id).await? {
                return Ok(ReconciliationOutcome::from_record(&event, record, true, None));
            }
        }

        self.reconcile_event(&event, trigger).await
    }

    /// Run selection, scoring, decision and application for a stored event.
    ///
    /// A `Conflict` from the state updater means the chosen invoice changed
    /// after scoring; the run starts over with fresh invoices, at most
    /// `MAX_CONFLICT_ATTEMPTS` times.
    #[instrument(
        skip(self, event),
        fields(
            payment_event_id = %event.payment_event_id,
            receipt = %event.gateway_receipt_number,
            trigger = trigger.as_str(),
        )
    )]
    pub async fn reconcile_event(
        &self,
        event: &PaymentEvent,
        trigger: Trigger,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let timer = RECONCILE_DURATION
            .with_label_values(&[trigger.as_str()])
            .start_timer();

        let mut attempt = 1;
        loop {
            let decision = self.evaluate(event).await?;

            match self.updater.apply(event, &decision).await {
                Ok(applied) => {
                    timer.observe_duration();
                    let outcome = ReconciliationOutcome::from_applied(event, applied);
                    record_decision(outcome.decision.as_str(), trigger.as_str());
                    info!(
                        decision = outcome.decision.as_str(),
                        score = outcome.score,
                        invoice_id = ?outcome.invoice_id,
                        needs_review = outcome.needs_review,
                        "Payment event reconciled"
                    );
                    return Ok(outcome);
                }
                Err(ReconciliationError::DuplicateEvent(record)) => {
                    timer.observe_duration();
                    info!(decision = record.decision.as_str(), "Payment event already reconciled");
                    return Ok(ReconciliationOutcome::from_record(event, *record, true, None));
                }
                Err(ReconciliationError::Conflict(reason)) if attempt < MAX_CONFLICT_ATTEMPTS => {
                    warn!(attempt, reason = %reason, "Invoice changed during reconciliation, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    record_error(e.kind());
                    return Err(e);
                }
            }
        }
    }

    /// Select and score candidates, then decide. Marks the event scored.
    ///
    /// A customer-scoped pool that does not reach auto-match is widened to
    /// every open invoice, so a better match elsewhere is never hidden.
    async fn evaluate(&self, event: &PaymentEvent) -> Result<Decision, ReconciliationError> {
        let pool = match self.selector.select(event).await {
            Ok(pool) => pool,
            Err(ReconciliationError::NoCandidates) => CandidatePool {
                invoices: Vec::new(),
                scoped: false,
            },
            Err(e) => return Err(e),
        };

        let scored = self.scoring.score(event, &pool.invoices).await;
        let mut decision = decide(event, &scored);

        if pool.scoped && decision.score < AUTO_MATCH_THRESHOLD {
            let full = self.selector.select_all(event).await?;
            debug!(
                scoped_score = decision.score,
                candidates = full.len(),
                "Scoped pool below auto-match, scoring all open invoices"
            );
            let scored = self.scoring.score(event, &full).await;
            decision = decide(event, &scored);
        }

        self.store.mark_scored(event.payment_event_id).await?;
        Ok(decision)
    }

    /// Current match record for a receipt, if the receipt is known.
    pub async fn match_for_receipt(
        &self,
        receipt: &str,
    ) -> Result<Option<(PaymentEvent, Option<MatchRecord>)>, ReconciliationError> {
        let Some(event) = self.store.get_event_by_receipt(receipt).await? else {
            return Ok(None);
        };
        let record = self.store.get_match_record(event.payment_event_id).await?;
        Ok(Some((event, record)))
    }
}
