//! Atomic, idempotent application of reconciliation decisions.

use crate::models::{
    DecisionKind, InvoiceStatus, MatchRecord, PaymentEvent, ProcessingStatus, ReviewItem,
    ReviewItemDraft,
};
use crate::services::decision::Decision;
use crate::services::error::ReconciliationError;
use crate::services::store::{EventUpdate, ReconciliationStore, ReviewResolution, UnitOfWork};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};

/// What `StateUpdater::apply` left in the stores.
#[derive(Debug, Clone)]
pub struct Applied {
    pub record: MatchRecord,
    pub review_item: Option<ReviewItem>,
}

#[derive(Clone)]
pub struct StateUpdater {
    store: Arc<dyn ReconciliationStore>,
}

impl StateUpdater {
    pub fn new(store: Arc<dyn ReconciliationStore>) -> Self {
        Self { store }
    }

    /// Apply `decision` to `event` in one unit of work.
    ///
    /// Nothing is written when the event already has a final match record;
    /// that record comes back as `DuplicateEvent`.
    /// Allocating decisions fail with `Conflict` if the invoice moved on since
    /// it was scored.
    #[instrument(
        skip(self, event, decision),
        fields(
            payment_event_id = %event.payment_event_id,
            decision = decision.kind.as_str(),
            score = decision.score,
        )
    )]
    pub async fn apply(
        &self,
        event: &PaymentEvent,
        decision: &Decision,
    ) -> Result<Applied, ReconciliationError> {
        let mut uow = self.store.begin().await?;
        let event_id = event.payment_event_id;

        if uow.lock_event(event_id).await?.is_none() {
            return Err(ReconciliationError::NotFound(format!(
                "Payment event {} not found",
                event_id
            )));
        }

        if let Some(existing) = uow.match_record(event_id).await? {
            if existing.is_final() {
                info!(decision = existing.decision.as_str(), "Payment event already reconciled");
                return Err(ReconciliationError::DuplicateEvent(Box::new(existing)));
            }
        }

        let mut record = MatchRecord {
            payment_event_id: event_id,
            gateway_receipt_number: event.gateway_receipt_number.clone(),
            invoice_id: decision.candidate_id(),
            score: decision.score,
            component_scores: decision.components,
            decision: decision.kind,
            allocated_amount: Decimal::ZERO,
            matched_by: decision.matched_by.clone(),
            created_utc: Utc::now(),
        };
        let mut review_item = None;

        let status = match decision.kind {
            DecisionKind::AutoMatched | DecisionKind::PartialMatched => {
                allocate(uow.as_mut(), decision, &mut record).await?;
                resolve_pending(uow.as_mut(), event, &record).await?;
                ProcessingStatus::Applied
            }
            DecisionKind::FlaggedForReview | DecisionKind::Unmatched => {
                let item = uow
                    .upsert_review_item(ReviewItemDraft {
                        payment_event_id: event_id,
                        best_candidate_invoice_id: decision.candidate_id(),
                        score: decision.score,
                        reason: decision.reason.clone(),
                    })
                    .await?;
                review_item = Some(item);
                if decision.kind == DecisionKind::FlaggedForReview {
                    ProcessingStatus::NeedsReview
                } else {
                    ProcessingStatus::Unmatched
                }
            }
            DecisionKind::ConfirmedNonInvoice => {
                record.invoice_id = None;
                resolve_pending(uow.as_mut(), event, &record).await?;
                ProcessingStatus::ConfirmedNonInvoice
            }
        };

        uow.update_event(
            event_id,
            EventUpdate {
                processing_status: status,
                match_record: Some(record.clone()),
            },
        )
        .await?;
        uow.commit().await?;

        info!(
            status = status.as_str(),
            invoice_id = ?record.invoice_id,
            allocated_amount = %record.allocated_amount,
            "Decision applied"
        );

        Ok(Applied {
            record,
            review_item,
        })
    }
}

async fn allocate(
    uow: &mut dyn UnitOfWork,
    decision: &Decision,
    record: &mut MatchRecord,
) -> Result<(), ReconciliationError> {
    let Some(scored) = decision.candidate.as_ref() else {
        return Err(ReconciliationError::Validation(
            "allocating decision without an invoice".to_string(),
        ));
    };

    let invoice = uow.lock_invoice(scored.invoice_id).await?.ok_or_else(|| {
        ReconciliationError::NotFound(format!("Invoice {} not found", scored.invoice_id))
    })?;

    if invoice.version != scored.version {
        return Err(ReconciliationError::Conflict(format!(
            "Invoice {} changed since scoring (version {} -> {})",
            invoice.invoice_number, scored.version, invoice.version
        )));
    }
    if !invoice.is_open() {
        return Err(ReconciliationError::Conflict(format!(
            "Invoice {} is no longer open",
            invoice.invoice_number
        )));
    }

    let patch = invoice.allocate(decision.allocation);
    let applied = patch.amount_paid - invoice.amount_paid;

    if !uow.update_invoice(invoice.invoice_id, patch).await? {
        return Err(ReconciliationError::Conflict(format!(
            "Invoice {} version moved during update",
            invoice.invoice_number
        )));
    }

    record.allocated_amount = applied;
    record.decision = if patch.status == InvoiceStatus::Paid {
        DecisionKind::AutoMatched
    } else {
        DecisionKind::PartialMatched
    };
    Ok(())
}

async fn resolve_pending(
    uow: &mut dyn UnitOfWork,
    event: &PaymentEvent,
    record: &MatchRecord,
) -> Result<u64, ReconciliationError> {
    let resolution = match record.decision {
        DecisionKind::ConfirmedNonInvoice => "confirmed_non_invoice".to_string(),
        kind => match record.invoice_id {
            Some(invoice_id) => format!("{} to invoice {}", kind.as_str(), invoice_id),
            None => kind.as_str().to_string(),
        },
    };

    uow.resolve_review_items(
        event.payment_event_id,
        ReviewResolution {
            resolution,
            resolved_by: record.matched_by.clone(),
        },
    )
    .await
}
