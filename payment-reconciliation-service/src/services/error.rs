use crate::models::{MatchRecord, UnknownVariant};
use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconciliationError {
    /// Malformed event, rejected before persistence.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid payment notification: {0}")]
    InvalidNotification(#[from] validator::ValidationErrors),

    /// Empty candidate pool. The pipeline turns this into an unmatched outcome.
    #[error("No open invoices to match against")]
    NoCandidates,

    /// A store read or write failed; nothing was applied and a retry is safe.
    #[error("Persistence error: {0}")]
    Persistence(anyhow::Error),

    /// The invoice changed between scoring and applying.
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    /// The receipt already has a final match record.
    #[error("Payment {} already reconciled", .0.gateway_receipt_number)]
    DuplicateEvent(Box<MatchRecord>),

    /// The alternate scorer failed; callers fall back to the deterministic scorer.
    #[error("Scorer error: {0}")]
    Scorer(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ReconciliationError {
    pub fn persistence(context: &str, err: impl std::fmt::Display) -> Self {
        ReconciliationError::Persistence(anyhow::anyhow!("{}: {}", context, err))
    }

    /// Worth retrying with fresh state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReconciliationError::Persistence(_) | ReconciliationError::Conflict(_)
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconciliationError::Validation(_) | ReconciliationError::InvalidNotification(_) => {
                "validation"
            }
            ReconciliationError::NoCandidates => "no_candidates",
            ReconciliationError::Persistence(_) => "persistence",
            ReconciliationError::Conflict(_) => "conflict",
            ReconciliationError::DuplicateEvent(_) => "duplicate_event",
            ReconciliationError::Scorer(_) => "scorer",
            ReconciliationError::NotFound(_) => "not_found",
        }
    }
}

impl From<UnknownVariant> for ReconciliationError {
    fn from(err: UnknownVariant) -> Self {
        ReconciliationError::Persistence(anyhow::Error::new(err))
    }
}

impl From<ReconciliationError> for AppError {
    fn from(err: ReconciliationError) -> Self {
        match err {
            ReconciliationError::Validation(e) => AppError::UnprocessableEntity(anyhow::anyhow!(e)),
            ReconciliationError::InvalidNotification(e) => AppError::ValidationError(e),
            ReconciliationError::NoCandidates => {
                AppError::NotFound(anyhow::anyhow!("No open invoices to match against"))
            }
            ReconciliationError::Persistence(e) => AppError::DatabaseError(e),
            ReconciliationError::Conflict(e) => AppError::Conflict(anyhow::anyhow!(e)),
            ReconciliationError::DuplicateEvent(record) => AppError::Conflict(anyhow::anyhow!(
                "Payment {} already reconciled",
                record.gateway_receipt_number
            )),
            ReconciliationError::Scorer(e) => AppError::InternalError(anyhow::anyhow!(e)),
            ReconciliationError::NotFound(e) => AppError::NotFound(anyhow::anyhow!(e)),
        }
    }
}
