//! Services module for payment-reconciliation-service.

pub mod batch;
pub mod candidates;
pub mod database;
pub mod decision;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod review_queue;
pub mod scorer;
pub mod state_updater;
pub mod store;

pub use batch::{BatchBucket, BatchItemResult, BatchReconciler, BatchReport};
pub use candidates::{CandidatePool, CandidateSelector};
pub use database::PgStore;
pub use decision::Decision;
pub use error::ReconciliationError;
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use pipeline::{ReconciliationOutcome, ReconciliationPipeline, Trigger};
pub use review_queue::ReviewQueue;
pub use scorer::{CandidateScore, DeterministicScorer, MatchScorer, ScoredCandidate, ScoringStrategy};
pub use state_updater::StateUpdater;
pub use store::{InvoiceStore, PaymentEventStore, ReconciliationStore, UnitOfWork};
