//! Invoice view owned by the invoice store.

use super::UnknownVariant;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Open,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Open => "open",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_matchable(&self) -> bool {
        matches!(self, InvoiceStatus::Open | InvoiceStatus::PartiallyPaid)
    }
}

impl FromStr for InvoiceStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(InvoiceStatus::Open),
            "partially_paid" => Ok(InvoiceStatus::PartiallyPaid),
            "paid" => Ok(InvoiceStatus::Paid),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(UnknownVariant::new("invoice_status", other)),
        }
    }
}

/// Invoice as seen by the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub customer_id: Uuid,
    pub customer_phone: Option<String>,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub due_date: Option<NaiveDate>,
    pub status: InvoiceStatus,
    /// Bumped on every patch; used for compare-and-swap updates.
    pub version: i64,
}

impl Invoice {
    pub fn balance(&self) -> Decimal {
        self.total_amount - self.amount_paid
    }

    /// Matchable and still owing money.
    pub fn is_open(&self) -> bool {
        self.status.is_matchable() && self.balance() > Decimal::ZERO
    }

    /// Patch that applies `allocation` to this invoice.
    ///
    /// The allocation is clamped to the outstanding balance so the balance
    /// never goes negative.
    pub fn allocate(&self, allocation: Decimal) -> InvoicePatch {
        let applied = allocation.min(self.balance()).max(Decimal::ZERO);
        let amount_paid = self.amount_paid + applied;
        let status = if amount_paid >= self.total_amount {
            InvoiceStatus::Paid
        } else if amount_paid > Decimal::ZERO {
            InvoiceStatus::PartiallyPaid
        } else {
            self.status
        };

        InvoicePatch {
            amount_paid,
            status,
            expected_version: self.version,
        }
    }
}

/// `update_invoice` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoicePatch {
    pub amount_paid: Decimal,
    pub status: InvoiceStatus,
    /// The update only succeeds while the stored version still equals this.
    pub expected_version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn invoice(total: Decimal, paid: Decimal) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: "INV-001".to_string(),
            customer_id: Uuid::new_v4(),
            customer_phone: None,
            total_amount: total,
            amount_paid: paid,
            due_date: None,
            status: InvoiceStatus::Open,
            version: 3,
        }
    }

    #[test]
    fn test_full_allocation_marks_paid() {
        let patch = invoice(dec!(1000), dec!(0)).allocate(dec!(1000));
        assert_eq!(patch.amount_paid, dec!(1000));
        assert_eq!(patch.status, InvoiceStatus::Paid);
        assert_eq!(patch.expected_version, 3);
    }

    #[test]
    fn test_partial_allocation_marks_partially_paid() {
        let patch = invoice(dec!(1500), dec!(0)).allocate(dec!(1450));
        assert_eq!(patch.amount_paid, dec!(1450));
        assert_eq!(patch.status, InvoiceStatus::PartiallyPaid);
    }

    #[test]
    fn test_allocation_is_clamped_to_balance() {
        let patch = invoice(dec!(1000), dec!(400)).allocate(dec!(900));
        assert_eq!(patch.amount_paid, dec!(1000));
        assert_eq!(patch.status, InvoiceStatus::Paid);
    }

    #[test]
    fn test_paid_invoice_is_not_open() {
        let mut inv = invoice(dec!(1000), dec!(1000));
        inv.status = InvoiceStatus::Paid;
        assert!(!inv.is_open());
        assert_eq!(inv.balance(), dec!(0));
    }
}
