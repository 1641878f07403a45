pub mod health;
pub mod payments;
pub mod review;

pub use health::{health_check, metrics_handler, readiness_check};
pub use payments::{enqueue_payment, get_payment_match, reconcile_payment, run_sweep};
pub use review::{assign_review_item, list_review_items, resolve_review_item};
