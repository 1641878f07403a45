//! Payment events received from gateways.

use super::UnknownVariant;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Payment gateway that delivered the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gateway {
    Mpesa,
    BankTransfer,
    Card,
}

impl Gateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::Mpesa => "mpesa",
            Gateway::BankTransfer => "bank_transfer",
            Gateway::Card => "card",
        }
    }
}

impl FromStr for Gateway {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mpesa" => Ok(Gateway::Mpesa),
            "bank_transfer" => Ok(Gateway::BankTransfer),
            "card" => Ok(Gateway::Card),
            other => Err(UnknownVariant::new("gateway", other)),
        }
    }
}

/// Processing state of a payment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Received,
    Scored,
    Applied,
    NeedsReview,
    Unmatched,
    ConfirmedNonInvoice,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Received => "received",
            ProcessingStatus::Scored => "scored",
            ProcessingStatus::Applied => "applied",
            ProcessingStatus::NeedsReview => "needs_review",
            ProcessingStatus::Unmatched => "unmatched",
            ProcessingStatus::ConfirmedNonInvoice => "confirmed_non_invoice",
        }
    }

    /// Statuses the batch sweep re-evaluates.
    pub const BACKLOG: [ProcessingStatus; 2] =
        [ProcessingStatus::NeedsReview, ProcessingStatus::Unmatched];

    /// Statuses of events accepted but never carried to a decision.
    pub const IN_FLIGHT: [ProcessingStatus; 2] =
        [ProcessingStatus::Received, ProcessingStatus::Scored];

    /// Settled for good: no sweep or review will touch the event again.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Applied | ProcessingStatus::ConfirmedNonInvoice
        )
    }
}

impl FromStr for ProcessingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(ProcessingStatus::Received),
            "scored" => Ok(ProcessingStatus::Scored),
            "applied" => Ok(ProcessingStatus::Applied),
            "needs_review" => Ok(ProcessingStatus::NeedsReview),
            "unmatched" => Ok(ProcessingStatus::Unmatched),
            "confirmed_non_invoice" => Ok(ProcessingStatus::ConfirmedNonInvoice),
            other => Err(UnknownVariant::new("processing_status", other)),
        }
    }
}

/// A persisted payment notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub payment_event_id: Uuid,
    pub gateway: Gateway,
    pub amount: Decimal,
    pub payer_phone: Option<String>,
    pub payer_reference: Option<String>,
    pub gateway_receipt_number: String,
    pub occurred_at: DateTime<Utc>,
    pub processing_status: ProcessingStatus,
    pub received_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Validated input for `store_event`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPaymentEvent {
    pub gateway: Gateway,
    pub amount: Decimal,
    pub payer_phone: Option<String>,
    pub payer_reference: Option<String>,
    pub gateway_receipt_number: String,
    pub occurred_at: DateTime<Utc>,
}

/// Result of `store_event`: the stored row and whether this call created it.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event: PaymentEvent,
    pub created: bool,
}

/// Inbound notification as delivered by the gateway collaborator.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_amount", skip_on_field_errors = true))]
pub struct PaymentNotification {
    #[validate(required(message = "amount is required"))]
    pub amount: Option<Decimal>,

    #[serde(default)]
    pub payer_phone: Option<String>,

    #[serde(default)]
    pub payer_reference: Option<String>,

    #[validate(
        required(message = "gateway_receipt_number is required"),
        length(min = 1, max = 64, message = "gateway_receipt_number must be 1-64 characters")
    )]
    pub gateway_receipt_number: Option<String>,

    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,

    #[validate(required(message = "gateway is required"))]
    pub gateway: Option<Gateway>,
}

/// Decimal places the ledger stores for money.
const AMOUNT_SCALE: u32 = 2;

fn validate_amount(n: &PaymentNotification) -> Result<(), ValidationError> {
    match n.amount {
        Some(amount) if amount <= Decimal::ZERO => {
            let mut err = ValidationError::new("amount_not_positive");
            err.message = Some("amount must be greater than zero".into());
            Err(err)
        }
        Some(amount) if amount.normalize().scale() > AMOUNT_SCALE => {
            let mut err = ValidationError::new("amount_precision");
            err.message = Some("amount must have at most two decimal places".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl PaymentNotification {
    /// Validate and convert into a storable event.
    pub fn into_new_event(self) -> Result<NewPaymentEvent, validator::ValidationErrors> {
        self.validate()?;

        // `validate` guarantees the required fields are present.
        let (Some(amount), Some(receipt), Some(gateway)) =
            (self.amount, self.gateway_receipt_number, self.gateway)
        else {
            let mut errors = validator::ValidationErrors::new();
            errors.add("payload", ValidationError::new("required"));
            return Err(errors);
        };

        let receipt = receipt.trim().to_string();
        if receipt.is_empty() {
            let mut errors = validator::ValidationErrors::new();
            errors.add("gateway_receipt_number", ValidationError::new("length"));
            return Err(errors);
        }

        Ok(NewPaymentEvent {
            gateway,
            amount,
            payer_phone: non_blank(self.payer_phone),
            payer_reference: non_blank(self.payer_reference),
            gateway_receipt_number: receipt,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
        })
    }
}
