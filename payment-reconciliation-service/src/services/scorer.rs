//! Confidence scoring of payment/invoice pairs.

use crate::models::{ComponentScores, Invoice, PaymentEvent};
use crate::services::error::ReconciliationError;
use crate::services::metrics::record_scorer_fallback;
use crate::utils::{fold_reference, normalize_phone};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub const EXACT_AMOUNT_SCORE: u8 = 60;
pub const NEAR_AMOUNT_SCORE: u8 = 40;
pub const UNDERPAYMENT_SCORE: u8 = 30;
pub const PHONE_SCORE: u8 = 25;
pub const REFERENCE_SCORE: u8 = 15;

/// Score a scorer assigns to one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateScore {
    pub invoice_id: Uuid,
    pub score: u8,
    pub components: ComponentScores,
}

/// A candidate invoice together with its validated score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub invoice: Invoice,
    pub score: u8,
    pub components: ComponentScores,
}

/// Pluggable scoring strategy.
#[async_trait]
pub trait MatchScorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// One score per candidate, each in `0..=100`.
    async fn score(
        &self,
        event: &PaymentEvent,
        candidates: &[Invoice],
    ) -> Result<Vec<CandidateScore>, ReconciliationError>;
}

/// Rule-based scorer: amount, phone and reference components.
#[derive(Debug, Clone)]
pub struct DeterministicScorer {
    country_code: String,
}

impl DeterministicScorer {
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
        }
    }

    pub fn components(&self, event: &PaymentEvent, invoice: &Invoice) -> ComponentScores {
        ComponentScores {
            amount: amount_score(event.amount, invoice.balance()),
            phone: self.phone_score(event, invoice),
            reference: reference_score(event.payer_reference.as_deref(), &invoice.invoice_number),
        }
    }

    fn phone_score(&self, event: &PaymentEvent, invoice: &Invoice) -> u8 {
        let payer = event
            .payer_phone
            .as_deref()
            .and_then(|p| normalize_phone(p, &self.country_code));
        let customer = invoice
            .customer_phone
            .as_deref()
            .and_then(|p| normalize_phone(p, &self.country_code));

        match (payer, customer) {
            (Some(a), Some(b)) if a == b => PHONE_SCORE,
            _ => 0,
        }
    }
}

fn amount_score(amount: Decimal, balance: Decimal) -> u8 {
    let diff = (amount - balance).abs();
    if diff < Decimal::ONE {
        EXACT_AMOUNT_SCORE
    } else if diff < balance * Decimal::new(5, 2) {
        NEAR_AMOUNT_SCORE
    } else if amount > Decimal::ZERO && amount < balance {
        UNDERPAYMENT_SCORE
    } else {
        0
    }
}

fn reference_score(reference: Option<&str>, invoice_number: &str) -> u8 {
    let (Some(reference), Some(number)) =
        (reference.and_then(fold_reference), fold_reference(invoice_number))
    else {
        return 0;
    };

    if number.contains(&reference) || reference.contains(&number) {
        REFERENCE_SCORE
    } else {
        0
    }
}

#[async_trait]
impl MatchScorer for DeterministicScorer {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    async fn score(
        &self,
        event: &PaymentEvent,
        candidates: &[Invoice],
    ) -> Result<Vec<CandidateScore>, ReconciliationError> {
        Ok(candidates
            .iter()
            .map(|invoice| {
                let components = self.components(event, invoice);
                CandidateScore {
                    invoice_id: invoice.invoice_id,
                    score: components.total(),
                    components,
                }
            })
            .collect())
    }
}

/// Runs the alternate scorer when one is configured and falls back to the
/// deterministic scorer whenever it errors or answers with a malformed result.
#[derive(Clone)]
pub struct ScoringStrategy {
    deterministic: DeterministicScorer,
    alternate: Option<Arc<dyn MatchScorer>>,
}

impl ScoringStrategy {
    pub fn new(deterministic: DeterministicScorer) -> Self {
        Self {
            deterministic,
            alternate: None,
        }
    }

    pub fn with_alternate(mut self, alternate: Arc<dyn MatchScorer>) -> Self {
        self.alternate = Some(alternate);
        self
    }

    pub fn deterministic(&self) -> &DeterministicScorer {
        &self.deterministic
    }

    /// Scored candidates in the order of `candidates`.
    pub async fn score(&self, event: &PaymentEvent, candidates: &[Invoice]) -> Vec<ScoredCandidate> {
        if let Some(alternate) = &self.alternate {
            match alternate.score(event, candidates).await {
                Ok(scores) => match join_scores(candidates, scores) {
                    Some(scored) => return scored,
                    None => {
                        warn!(scorer = alternate.name(), "Malformed scorer result, falling back");
                        record_scorer_fallback(alternate.name(), "malformed");
                    }
                },
                Err(e) => {
                    warn!(scorer = alternate.name(), error = %e, "Scorer failed, falling back");
                    record_scorer_fallback(alternate.name(), e.kind());
                }
            }
        }

        candidates
            .iter()
            .map(|invoice| {
                let components = self.deterministic.components(event, invoice);
                ScoredCandidate {
                    invoice: invoice.clone(),
                    score: components.total(),
                    components,
                }
            })
            .collect()
    }
}

/// Pair scores with candidates. `None` unless every candidate is scored
/// exactly once and no unknown invoice appears.
fn join_scores(candidates: &[Invoice], scores: Vec<CandidateScore>) -> Option<Vec<ScoredCandidate>> {
    if scores.len() != candidates.len() {
        return None;
    }

    let mut by_id: HashMap<Uuid, CandidateScore> = HashMap::with_capacity(scores.len());
    for score in scores {
        if by_id.insert(score.invoice_id, score).is_some() {
            return None;
        }
    }

    candidates
        .iter()
        .map(|invoice| {
            by_id.get(&invoice.invoice_id).map(|s| ScoredCandidate {
                invoice: invoice.clone(),
                score: s.score.min(100),
                components: s.components,
            })
        })
        .collect()
}
