//! Human review of payments the engine would not apply on its own.

use crate::models::{PaymentEvent, ReviewItem, ReviewStatus};
use crate::services::decision::Decision;
use crate::services::error::ReconciliationError;
use crate::services::metrics::{record_decision, record_review_resolution};
use crate::services::pipeline::{
    ReconciliationOutcome, ReconciliationPipeline, Trigger, MAX_CONFLICT_ATTEMPTS,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ReviewQueue {
    pipeline: ReconciliationPipeline,
}

impl ReviewQueue {
    pub fn new(pipeline: ReconciliationPipeline) -> Self {
        Self { pipeline }
    }

    /// Pending items, oldest first.
    pub async fn list_pending(
        &self,
        assignee: Option<&str>,
    ) -> Result<Vec<ReviewItem>, ReconciliationError> {
        self.pipeline
            .store()
            .list_review_items(ReviewStatus::Pending, assignee)
            .await
    }

    #[instrument(skip(self), fields(review_item_id = %review_item_id))]
    pub async fn assign(
        &self,
        review_item_id: Uuid,
        assignee: &str,
    ) -> Result<ReviewItem, ReconciliationError> {
        let assignee = assignee.trim();
        if assignee.is_empty() {
            return Err(ReconciliationError::Validation(
                "assignee must not be empty".to_string(),
            ));
        }

        let store = self.pipeline.store();
        if let Some(item) = store.assign_review_item(review_item_id, assignee).await? {
            info!(assignee = %assignee, "Review item assigned");
            return Ok(item);
        }

        match store.get_review_item(review_item_id).await? {
            Some(_) => Err(ReconciliationError::Conflict(format!(
                "Review item {} is already resolved",
                review_item_id
            ))),
            None => Err(ReconciliationError::NotFound(format!(
                "Review item {} not found",
                review_item_id
            ))),
        }
    }

    /// Close a review item by matching the payment to `invoice_id`, or by
    /// confirming it is not an invoice payment when `invoice_id` is `None`.
    ///
    /// Resolving an item whose payment is already settled returns the
    /// existing outcome and writes nothing.
    #[instrument(skip(self), fields(review_item_id = %review_item_id, invoice_id = ?invoice_id))]
    pub async fn resolve(
        &self,
        review_item_id: Uuid,
        invoice_id: Option<Uuid>,
        resolved_by: &str,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let resolved_by = resolved_by.trim();
        if resolved_by.is_empty() {
            return Err(ReconciliationError::Validation(
                "resolved_by must not be empty".to_string(),
            ));
        }

        let store = self.pipeline.store();
        let item = store.get_review_item(review_item_id).await?.ok_or_else(|| {
            ReconciliationError::NotFound(format!("Review item {} not found", review_item_id))
        })?;
        let event = store
            .get_event(item.payment_event_id)
            .await?
            .ok_or_else(|| {
                ReconciliationError::NotFound(format!(
                    "Payment event {} not found",
                    item.payment_event_id
                ))
            })?;

        if item.status == ReviewStatus::Resolved || event.processing_status.is_settled() {
            return match store.get_match_record(event.payment_event_id).await? {
                Some(record) if record.is_final() => Ok(ReconciliationOutcome::from_record(
                    &event,
                    record,
                    true,
                    Some(item.review_item_id),
                )),
                _ => Err(ReconciliationError::Conflict(format!(
                    "Review item {} is already resolved",
                    review_item_id
                ))),
            };
        }

        let mut attempt = 1;
        loop {
            let decision = self.reviewer_decision(&event, invoice_id, resolved_by).await?;

            match self.pipeline.updater().apply(&event, &decision).await {
                Ok(applied) => {
                    let outcome = ReconciliationOutcome::from_record(
                        &event,
                        applied.record,
                        false,
                        Some(item.review_item_id),
                    );
                    record_decision(outcome.decision.as_str(), Trigger::Review.as_str());
                    record_review_resolution(if invoice_id.is_some() {
                        "matched"
                    } else {
                        "non_invoice"
                    });
                    info!(
                        resolved_by = %resolved_by,
                        decision = outcome.decision.as_str(),
                        "Review item resolved"
                    );
                    return Ok(outcome);
                }
                Err(ReconciliationError::DuplicateEvent(record)) => {
                    return Ok(ReconciliationOutcome::from_record(
                        &event,
                        *record,
                        true,
                        Some(item.review_item_id),
                    ));
                }
                Err(ReconciliationError::Conflict(reason)) if attempt < MAX_CONFLICT_ATTEMPTS => {
                    warn!(attempt, reason = %reason, "Invoice changed during review, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn reviewer_decision(
        &self,
        event: &PaymentEvent,
        invoice_id: Option<Uuid>,
        resolved_by: &str,
    ) -> Result<Decision, ReconciliationError> {
        let Some(invoice_id) = invoice_id else {
            return Ok(Decision::confirmed_non_invoice(resolved_by));
        };

        let invoice = self
            .pipeline
            .store()
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| {
                ReconciliationError::Validation(format!("Invoice {} does not exist", invoice_id))
            })?;

        if !invoice.is_open() {
            return Err(ReconciliationError::Validation(format!(
                "Invoice {} is {} and cannot take payments",
                invoice.invoice_number,
                invoice.status.as_str()
            )));
        }

        let components = self.pipeline.scoring().deterministic().components(event, &invoice);
        Ok(Decision::allocate(
            event,
            invoice,
            components.total(),
            components,
            resolved_by,
        ))
    }
}
