use crate::services::batch::BatchReconciler;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Runs the batch sweep on a fixed interval until cancelled.
pub struct Sweeper {
    batch: BatchReconciler,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl Sweeper {
    pub fn new(batch: BatchReconciler, interval: Duration, shutdown_token: CancellationToken) -> Self {
        Self {
            batch,
            interval,
            shutdown_token,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Starting periodic sweep");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.batch.run().await {
                        Ok(report) if report.total > 0 => {
                            tracing::info!(
                                total = report.total,
                                reconciled = report.reconciled,
                                needs_review = report.needs_review,
                                failed = report.failed,
                                "Periodic sweep finished"
                            );
                        }
                        Ok(_) => tracing::debug!("Periodic sweep found no backlog"),
                        Err(e) => tracing::error!(error = %e, "Periodic sweep failed"),
                    }
                }
            }
        }
    }
}
