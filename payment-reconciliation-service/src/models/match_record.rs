//! Match records: the persisted outcome of a reconciliation run.

use super::UnknownVariant;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Actor recorded on decisions taken without a human.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    AutoMatched,
    PartialMatched,
    FlaggedForReview,
    Unmatched,
    ConfirmedNonInvoice,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::AutoMatched => "auto_matched",
            DecisionKind::PartialMatched => "partial_matched",
            DecisionKind::FlaggedForReview => "flagged_for_review",
            DecisionKind::Unmatched => "unmatched",
            DecisionKind::ConfirmedNonInvoice => "confirmed_non_invoice",
        }
    }

    /// Final decisions are write-once; provisional ones may be re-evaluated.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            DecisionKind::AutoMatched
                | DecisionKind::PartialMatched
                | DecisionKind::ConfirmedNonInvoice
        )
    }

    /// Decisions that move money onto an invoice.
    pub fn allocates(&self) -> bool {
        matches!(self, DecisionKind::AutoMatched | DecisionKind::PartialMatched)
    }

    pub fn needs_review(&self) -> bool {
        matches!(self, DecisionKind::FlaggedForReview | DecisionKind::Unmatched)
    }
}

impl FromStr for DecisionKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto_matched" => Ok(DecisionKind::AutoMatched),
            "partial_matched" => Ok(DecisionKind::PartialMatched),
            "flagged_for_review" => Ok(DecisionKind::FlaggedForReview),
            "unmatched" => Ok(DecisionKind::Unmatched),
            "confirmed_non_invoice" => Ok(DecisionKind::ConfirmedNonInvoice),
            other => Err(UnknownVariant::new("decision", other)),
        }
    }
}

/// Per-component breakdown of a confidence score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentScores {
    pub amount: u8,
    pub phone: u8,
    pub reference: u8,
}

impl ComponentScores {
    pub fn total(&self) -> u8 {
        (self.amount as u16 + self.phone as u16 + self.reference as u16).min(100) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub payment_event_id: Uuid,
    pub gateway_receipt_number: String,
    pub invoice_id: Option<Uuid>,
    pub score: u8,
    pub component_scores: ComponentScores,
    pub decision: DecisionKind,
    pub allocated_amount: Decimal,
    pub matched_by: String,
    pub created_utc: DateTime<Utc>,
}

impl MatchRecord {
    pub fn is_final(&self) -> bool {
        self.decision.is_final()
    }
}
