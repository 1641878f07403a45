//! Domain models for payment-reconciliation-service.

mod invoice;
mod match_record;
mod payment_event;
mod review_item;

pub use invoice::{Invoice, InvoicePatch, InvoiceStatus};
pub use match_record::{ComponentScores, DecisionKind, MatchRecord, SYSTEM_ACTOR};
pub use payment_event::{
    Gateway, NewPaymentEvent, PaymentEvent, PaymentNotification, ProcessingStatus, StoredEvent,
};
pub use review_item::{ReviewItem, ReviewItemDraft, ReviewStatus};

/// Error returned when a stored enum column holds an unknown value.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
