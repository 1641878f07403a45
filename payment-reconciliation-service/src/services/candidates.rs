//! Candidate selection: which invoices a payment may settle.

use crate::config::MatchingConfig;
use crate::models::{Invoice, PaymentEvent};
use crate::services::error::ReconciliationError;
use crate::services::store::ReconciliationStore;
use crate::utils::normalize_phone;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Invoices a payment is scored against.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    pub invoices: Vec<Invoice>,
    /// Restricted to the payer's own invoices.
    pub scoped: bool,
}

/// Due date ascending with undated invoices last, then invoice number.
pub fn candidate_order(a: &Invoice, b: &Invoice) -> Ordering {
    let by_due = match (a.due_date, b.due_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_due.then_with(|| a.invoice_number.cmp(&b.invoice_number))
}

#[derive(Clone)]
pub struct CandidateSelector {
    store: Arc<dyn ReconciliationStore>,
    config: MatchingConfig,
}

impl CandidateSelector {
    pub fn new(store: Arc<dyn ReconciliationStore>, config: MatchingConfig) -> Self {
        Self { store, config }
    }

    /// Open invoices with a positive balance, in candidate order.
    ///
    /// When the payer's phone identifies a customer with open invoices, only
    /// that customer's invoices are returned and the pool is marked
    /// `scoped`. Fails with `NoCandidates` when nothing is open.
    #[instrument(skip(self, event), fields(payment_event_id = %event.payment_event_id))]
    pub async fn select(&self, event: &PaymentEvent) -> Result<CandidatePool, ReconciliationError> {
        let payer_phone = if self.config.customer_scoping {
            event
                .payer_phone
                .as_deref()
                .and_then(|p| normalize_phone(p, &self.config.default_country_code))
        } else {
            None
        };

        let (pool, scoped) = match payer_phone.as_deref() {
            Some(phone) => self.scoped_pool(phone).await?,
            None => (self.store.get_open_invoices(None).await?, false),
        };

        let invoices = finish(pool)?;
        debug!(candidates = invoices.len(), scoped, "Candidate pool selected");
        Ok(CandidatePool { invoices, scoped })
    }

    /// Every open invoice regardless of payer, in candidate order.
    #[instrument(skip(self, event), fields(payment_event_id = %event.payment_event_id))]
    pub async fn select_all(&self, event: &PaymentEvent) -> Result<Vec<Invoice>, ReconciliationError> {
        let invoices = finish(self.store.get_open_invoices(None).await?)?;
        debug!(candidates = invoices.len(), "Full candidate pool selected");
        Ok(invoices)
    }

    async fn scoped_pool(&self, phone: &str) -> Result<(Vec<Invoice>, bool), ReconciliationError> {
        let scoped = self.store.get_open_invoices(Some(phone)).await?;
        if scoped.iter().any(Invoice::is_open) {
            return Ok((scoped, true));
        }

        // Stored phones may not be normalized; compare in canonical form.
        let full = self.store.get_open_invoices(None).await?;
        let cc = &self.config.default_country_code;
        let customer: Vec<Invoice> = full
            .iter()
            .filter(|inv| {
                inv.customer_phone
                    .as_deref()
                    .and_then(|p| normalize_phone(p, cc))
                    .as_deref()
                    == Some(phone)
            })
            .cloned()
            .collect();

        if customer.iter().any(Invoice::is_open) {
            Ok((customer, true))
        } else {
            Ok((full, false))
        }
    }
}

fn finish(mut pool: Vec<Invoice>) -> Result<Vec<Invoice>, ReconciliationError> {
    pool.retain(Invoice::is_open);
    if pool.is_empty() {
        return Err(ReconciliationError::NoCandidates);
    }
    pool.sort_by(candidate_order);
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvoiceStatus;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn invoice(number: &str, due: Option<(i32, u32, u32)>) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: number.to_string(),
            customer_id: Uuid::new_v4(),
            customer_phone: None,
            total_amount: dec!(100),
            amount_paid: dec!(0),
            due_date: due.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            status: InvoiceStatus::Open,
            version: 0,
        }
    }

    #[test]
    fn test_candidate_order_puts_undated_last() {
        let mut pool = vec![
            invoice("INV-003", None),
            invoice("INV-002", Some((2025, 3, 1))),
            invoice("INV-001", Some((2025, 3, 1))),
            invoice("INV-000", Some((2025, 4, 1))),
        ];
        pool.sort_by(candidate_order);
        let numbers: Vec<&str> = pool.iter().map(|i| i.invoice_number.as_str()).collect();
        assert_eq!(numbers, vec!["INV-001", "INV-002", "INV-000", "INV-003"]);
    }
}
