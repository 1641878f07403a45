use crate::models::{MatchRecord, PaymentEvent, ProcessingStatus, ReviewItem};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub payment_event_id: Uuid,
    pub gateway_receipt_number: String,
    pub processing_status: ProcessingStatus,
    /// `false` for a redelivered receipt.
    pub created: bool,
    /// `false` when the event was left for the batch sweep.
    pub queued: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MatchResponse {
    pub payment_event_id: Uuid,
    pub gateway_receipt_number: String,
    pub processing_status: ProcessingStatus,
    pub match_record: Option<MatchRecord>,
}

impl MatchResponse {
    pub fn new(event: PaymentEvent, match_record: Option<MatchRecord>) -> Self {
        Self {
            payment_event_id: event.payment_event_id,
            gateway_receipt_number: event.gateway_receipt_number,
            processing_status: event.processing_status,
            match_record,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviewListParams {
    pub assignee: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewItemListResponse {
    pub items: Vec<ReviewItem>,
    pub total: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignReviewRequest {
    #[validate(length(min = 1, max = 128, message = "assignee must be 1-128 characters"))]
    pub assignee: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveReviewRequest {
    /// Invoice the payment belongs to; omit to confirm it is not an invoice payment.
    #[serde(default)]
    pub invoice_id: Option<Uuid>,

    #[validate(length(min = 1, max = 128, message = "resolved_by must be 1-128 characters"))]
    pub resolved_by: String,
}
