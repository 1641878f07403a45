mod orchestrator;
mod sweeper;

pub use orchestrator::{JobDispatcher, ReconciliationJob, WorkerPool};
pub use sweeper::Sweeper;
