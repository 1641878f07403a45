//! Decision policy: best candidate plus score to a reconciliation decision.

use crate::models::{ComponentScores, DecisionKind, Invoice, PaymentEvent, SYSTEM_ACTOR};
use crate::services::candidates::candidate_order;
use crate::services::scorer::{ScoredCandidate, EXACT_AMOUNT_SCORE};
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// Scores at or above this are applied without a human.
pub const AUTO_MATCH_THRESHOLD: u8 = 80;
/// Scores at or above this (and below auto-match) go to review.
pub const REVIEW_THRESHOLD: u8 = 70;

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub kind: DecisionKind,
    pub score: u8,
    pub components: ComponentScores,
    /// Chosen invoice for allocating decisions, otherwise the best suggestion.
    /// Snapshot taken at scoring time; its `version` guards the update.
    pub candidate: Option<Invoice>,
    pub allocation: Decimal,
    pub matched_by: String,
    pub reason: String,
}

impl Decision {
    pub fn candidate_id(&self) -> Option<uuid::Uuid> {
        self.candidate.as_ref().map(|c| c.invoice_id)
    }

    /// Empty candidate pool.
    pub fn no_candidates() -> Self {
        Self {
            kind: DecisionKind::Unmatched,
            score: 0,
            components: ComponentScores::default(),
            candidate: None,
            allocation: Decimal::ZERO,
            matched_by: SYSTEM_ACTOR.to_string(),
            reason: "no open invoices".to_string(),
        }
    }

    /// Apply `event` to `invoice`, allocating up to the outstanding balance.
    pub fn allocate(
        event: &PaymentEvent,
        invoice: Invoice,
        score: u8,
        components: ComponentScores,
        matched_by: &str,
    ) -> Self {
        let balance = invoice.balance();
        let allocation = event.amount.min(balance);
        let kind = if allocation >= balance {
            DecisionKind::AutoMatched
        } else {
            DecisionKind::PartialMatched
        };
        let reason = if event.amount > balance {
            format!(
                "score {} on {}; {} exceeds balance",
                score,
                invoice.invoice_number,
                event.amount - balance
            )
        } else {
            format!("score {} on {}", score, invoice.invoice_number)
        };

        Self {
            kind,
            score,
            components,
            candidate: Some(invoice),
            allocation,
            matched_by: matched_by.to_string(),
            reason,
        }
    }

    /// A reviewer confirmed the payment does not belong to any invoice.
    pub fn confirmed_non_invoice(reviewer: &str) -> Self {
        Self {
            kind: DecisionKind::ConfirmedNonInvoice,
            score: 0,
            components: ComponentScores::default(),
            candidate: None,
            allocation: Decimal::ZERO,
            matched_by: reviewer.to_string(),
            reason: "confirmed as not an invoice payment".to_string(),
        }
    }
}

/// Higher score first, then an exact amount match, then candidate order.
fn rank(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    let exact = |c: &ScoredCandidate| c.components.amount == EXACT_AMOUNT_SCORE;
    b.score
        .cmp(&a.score)
        .then_with(|| exact(b).cmp(&exact(a)))
        .then_with(|| candidate_order(&a.invoice, &b.invoice))
}

/// Best candidate under the tie-break rules.
pub fn best_candidate(scored: &[ScoredCandidate]) -> Option<&ScoredCandidate> {
    scored.iter().min_by(|a, b| rank(a, b))
}

/// Decide what to do with `event` given its scored candidates.
pub fn decide(event: &PaymentEvent, scored: &[ScoredCandidate]) -> Decision {
    let Some(best) = best_candidate(scored) else {
        return Decision::no_candidates();
    };

    if best.score >= AUTO_MATCH_THRESHOLD {
        return Decision::allocate(
            event,
            best.invoice.clone(),
            best.score,
            best.components,
            SYSTEM_ACTOR,
        );
    }

    let (kind, reason) = if best.score >= REVIEW_THRESHOLD {
        (
            DecisionKind::FlaggedForReview,
            format!(
                "score {} on {} needs confirmation",
                best.score, best.invoice.invoice_number
            ),
        )
    } else {
        (
            DecisionKind::Unmatched,
            format!(
                "score {} below review threshold; best candidate {}",
                best.score, best.invoice.invoice_number
            ),
        )
    };

    Decision {
        kind,
        score: best.score,
        components: best.components,
        candidate: Some(best.invoice.clone()),
        allocation: Decimal::ZERO,
        matched_by: SYSTEM_ACTOR.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Gateway, InvoiceStatus, ProcessingStatus};
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn event(amount: Decimal) -> PaymentEvent {
        PaymentEvent {
            payment_event_id: Uuid::new_v4(),
            gateway: Gateway::Mpesa,
            amount,
            payer_phone: None,
            payer_reference: None,
            gateway_receipt_number: "QK12ABC".to_string(),
            occurred_at: Utc::now(),
            processing_status: ProcessingStatus::Received,
            received_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn candidate(number: &str, balance: Decimal, amount: u8, phone: u8, due: Option<u32>) -> ScoredCandidate {
        let components = ComponentScores {
            amount,
            phone,
            reference: 0,
        };
        ScoredCandidate {
            invoice: Invoice {
                invoice_id: Uuid::new_v4(),
                invoice_number: number.to_string(),
                customer_id: Uuid::new_v4(),
                customer_phone: None,
                total_amount: balance,
                amount_paid: dec!(0),
                due_date: due.and_then(|d| NaiveDate::from_ymd_opt(2025, 1, d)),
                status: InvoiceStatus::Open,
                version: 0,
            },
            score: components.total(),
            components,
        }
    }

    #[test]
    fn test_threshold_boundaries() {
        let e = event(dec!(1000));

        let auto = decide(&e, &[candidate("INV-1", dec!(1000), 60, 25, None)]);
        assert_eq!(auto.kind, DecisionKind::AutoMatched);
        assert_eq!(auto.allocation, dec!(1000));

        let below_review = decide(&e, &[candidate("INV-1", dec!(1500), 40, 25, None)]);
        assert_eq!(below_review.score, 65);
        assert_eq!(below_review.kind, DecisionKind::Unmatched);

        let flagged = decide(
            &e,
            &[ScoredCandidate {
                score: 70,
                ..candidate("INV-1", dec!(1500), 40, 30, None)
            }],
        );
        assert_eq!(flagged.kind, DecisionKind::FlaggedForReview);
        assert_eq!(flagged.allocation, dec!(0));
        assert!(flagged.candidate.is_some());
    }

    #[test]
    fn test_partial_match_when_balance_remains() {
        let e = event(dec!(1450));
        let d = decide(
            &e,
            &[ScoredCandidate {
                score: 80,
                ..candidate("INV-1", dec!(1500), 40, 25, None)
            }],
        );
        assert_eq!(d.kind, DecisionKind::PartialMatched);
        assert_eq!(d.allocation, dec!(1450));
    }

    #[test]
    fn test_overpayment_allocates_only_balance() {
        let e = event(dec!(1200));
        let d = decide(
            &e,
            &[ScoredCandidate {
                score: 90,
                ..candidate("INV-1", dec!(1000), 40, 25, None)
            }],
        );
        assert_eq!(d.kind, DecisionKind::AutoMatched);
        assert_eq!(d.allocation, dec!(1000));
        assert_eq!(e.amount - d.allocation, dec!(200));
    }

    #[test]
    fn test_tie_prefers_exact_amount() {
        let near = ScoredCandidate {
            score: 85,
            ..candidate("INV-1", dec!(1000), 40, 25, Some(1))
        };
        let exact = candidate("INV-2", dec!(1000), 60, 25, Some(9));
        let scored = [near, exact];
        let best = best_candidate(&scored).unwrap();
        assert_eq!(best.invoice.invoice_number, "INV-2");
    }

    #[test]
    fn test_tie_prefers_earliest_due_then_number() {
        let scored = [
            candidate("INV-3", dec!(1000), 60, 25, None),
            candidate("INV-2", dec!(1000), 60, 25, Some(5)),
            candidate("INV-1", dec!(1000), 60, 25, Some(5)),
        ];
        let best = best_candidate(&scored).unwrap();
        assert_eq!(best.invoice.invoice_number, "INV-1");
    }

    #[test]
    fn test_empty_pool_is_unmatched_without_hint() {
        let d = decide(&event(dec!(10)), &[]);
        assert_eq!(d.kind, DecisionKind::Unmatched);
        assert!(d.candidate.is_none());
        assert_eq!(d.score, 0);
    }
}
