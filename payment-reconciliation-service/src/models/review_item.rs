//! Review queue items.

use super::UnknownVariant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Resolved,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for ReviewStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "resolved" => Ok(ReviewStatus::Resolved),
            other => Err(UnknownVariant::new("review_status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub review_item_id: Uuid,
    pub payment_event_id: Uuid,
    pub best_candidate_invoice_id: Option<Uuid>,
    pub score: u8,
    pub reason: String,
    pub assignee: Option<String>,
    pub status: ReviewStatus,
    pub resolution: Option<String>,
    pub resolved_by: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub resolved_utc: Option<DateTime<Utc>>,
}

/// Content written when a run flags an event for review.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewItemDraft {
    pub payment_event_id: Uuid,
    pub best_candidate_invoice_id: Option<Uuid>,
    pub score: u8,
    pub reason: String,
}
