//! Batch sweep over the reconciliation backlog.

use crate::config::SweepConfig;
use crate::models::{DecisionKind, PaymentEvent, ProcessingStatus};
use crate::services::error::ReconciliationError;
use crate::services::metrics::record_batch_item;
use crate::services::pipeline::{ReconciliationOutcome, ReconciliationPipeline, Trigger};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchBucket {
    Reconciled,
    NeedsReview,
    Failed,
}

impl BatchBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchBucket::Reconciled => "reconciled",
            BatchBucket::NeedsReview => "needs_review",
            BatchBucket::Failed => "failed",
        }
    }

    fn for_decision(decision: DecisionKind) -> Self {
        if decision.is_final() {
            BatchBucket::Reconciled
        } else {
            BatchBucket::NeedsReview
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItemResult {
    pub payment_event_id: Uuid,
    pub gateway_receipt_number: String,
    pub bucket: BatchBucket,
    pub decision: Option<DecisionKind>,
    pub score: Option<u8>,
    pub invoice_id: Option<Uuid>,
    pub duplicate: bool,
    pub error: Option<String>,
}

impl BatchItemResult {
    fn new(event: &PaymentEvent, result: Result<ReconciliationOutcome, ReconciliationError>) -> Self {
        match result {
            Ok(outcome) => Self {
                payment_event_id: event.payment_event_id,
                gateway_receipt_number: event.gateway_receipt_number.clone(),
                bucket: BatchBucket::for_decision(outcome.decision),
                decision: Some(outcome.decision),
                score: Some(outcome.score),
                invoice_id: outcome.invoice_id,
                duplicate: outcome.duplicate,
                error: None,
            },
            Err(e) => Self {
                payment_event_id: event.payment_event_id,
                gateway_receipt_number: event.gateway_receipt_number.clone(),
                bucket: BatchBucket::Failed,
                decision: None,
                score: None,
                invoice_id: None,
                duplicate: false,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub reconciled: usize,
    pub needs_review: usize,
    pub failed: usize,
    pub started_utc: DateTime<Utc>,
    pub finished_utc: DateTime<Utc>,
    pub items: Vec<BatchItemResult>,
}

#[derive(Clone)]
pub struct BatchReconciler {
    pipeline: ReconciliationPipeline,
    config: SweepConfig,
}

impl BatchReconciler {
    pub fn new(pipeline: ReconciliationPipeline, config: SweepConfig) -> Self {
        Self { pipeline, config }
    }

    /// Re-run the pipeline over events awaiting review or unmatched, plus
    /// events left in `received`/`scored` for longer than the grace period.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<BatchReport, ReconciliationError> {
        let store = self.pipeline.store();
        let limit = self.config.batch_limit;

        let mut events = store
            .list_events(&ProcessingStatus::BACKLOG, None, limit)
            .await?;

        let remaining = limit.saturating_sub(events.len());
        if remaining > 0 {
            let stale_after = chrono::Duration::from_std(self.config.stale_after)
                .unwrap_or_else(|_| chrono::Duration::zero());
            let stuck = store
                .list_events(
                    &ProcessingStatus::IN_FLIGHT,
                    Some(Utc::now() - stale_after),
                    remaining,
                )
                .await?;
            if !stuck.is_empty() {
                warn!(count = stuck.len(), "Recovering payment events stuck before a decision");
            }
            events.extend(stuck);
        }

        Ok(self.run_events(events).await)
    }

    /// Reconcile `events` with bounded concurrency. Per-event failures are
    /// counted and never abort the sweep.
    pub async fn run_events(&self, events: Vec<PaymentEvent>) -> BatchReport {
        let started_utc = Utc::now();
        let concurrency = self.config.concurrency.max(1);

        let mut results: Vec<(usize, BatchItemResult)> = stream::iter(events.into_iter().enumerate())
            .map(|(index, event)| async move {
                let result = self.pipeline.reconcile_event(&event, Trigger::Sweep).await;
                (index, BatchItemResult::new(&event, result))
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let items: Vec<BatchItemResult> = results.into_iter().map(|(_, item)| item).collect();
        let count = |bucket: BatchBucket| items.iter().filter(|i| i.bucket == bucket).count();

        for item in &items {
            record_batch_item(item.bucket.as_str());
        }

        let report = BatchReport {
            total: items.len(),
            reconciled: count(BatchBucket::Reconciled),
            needs_review: count(BatchBucket::NeedsReview),
            failed: count(BatchBucket::Failed),
            started_utc,
            finished_utc: Utc::now(),
            items,
        };

        info!(
            total = report.total,
            reconciled = report.reconciled,
            needs_review = report.needs_review,
            failed = report.failed,
            "Batch sweep completed"
        );
        report
    }
}
