use crate::config::WorkerConfig;
use crate::services::metrics::QUEUE_DEPTH;
use crate::services::pipeline::{ReconciliationPipeline, Trigger};
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ReconciliationJob {
    pub payment_event_id: Uuid,
    pub gateway_receipt_number: String,
}

/// Sending side of the worker queue, shared with HTTP handlers.
#[derive(Clone)]
pub struct JobDispatcher {
    job_tx: mpsc::Sender<ReconciliationJob>,
}

impl JobDispatcher {
    /// Queue a persisted event for background reconciliation.
    ///
    /// Returns `false` when the queue is full or the pool is not running; the
    /// event stays `received` and the batch sweep picks it up later.
    pub fn enqueue(&self, job: ReconciliationJob) -> bool {
        let payment_event_id = job.payment_event_id;
        match self.job_tx.try_send(job) {
            Ok(()) => {
                QUEUE_DEPTH.inc();
                true
            }
            Err(e) => {
                tracing::warn!(
                    payment_event_id = %payment_event_id,
                    error = %e,
                    "Reconciliation queue unavailable, leaving event for the sweep"
                );
                metrics::counter!("reconciliation_jobs_deferred").increment(1);
                false
            }
        }
    }
}

pub struct WorkerPool {
    config: WorkerConfig,
    pipeline: ReconciliationPipeline,
    job_rx: Option<mpsc::Receiver<ReconciliationJob>>,
    shutdown_token: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        pipeline: ReconciliationPipeline,
        shutdown_token: CancellationToken,
    ) -> (Self, JobDispatcher) {
        let (job_tx, job_rx) = mpsc::channel(config.queue_size.max(1));

        let pool = Self {
            config,
            pipeline,
            job_rx: Some(job_rx),
            shutdown_token,
        };

        (pool, JobDispatcher { job_tx })
    }

    /// Spawn the workers. With the pool disabled the receiver is dropped and
    /// every enqueue is deferred to the sweep.
    pub fn start(mut self) -> Vec<JoinHandle<()>> {
        let Some(job_rx) = self.job_rx.take() else {
            return Vec::new();
        };

        if !self.config.enabled {
            tracing::info!("Worker pool disabled by configuration");
            return Vec::new();
        }

        tracing::info!(
            worker_count = self.config.worker_count,
            queue_size = self.config.queue_size,
            "Starting worker pool"
        );

        let job_rx = Arc::new(Mutex::new(job_rx));
        (0..self.config.worker_count.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    pipeline: self.pipeline.clone(),
                    config: self.config.clone(),
                };
                let job_rx = job_rx.clone();
                let shutdown = self.shutdown_token.clone();
                tokio::spawn(async move { worker.run(job_rx, shutdown).await })
            })
            .collect()
    }
}

struct Worker {
    id: usize,
    pipeline: ReconciliationPipeline,
    config: WorkerConfig,
}

impl Worker {
    async fn run(
        &self,
        job_rx: Arc<Mutex<mpsc::Receiver<ReconciliationJob>>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(worker_id = self.id, "Worker shutting down");
                    break;
                }
                job = async { job_rx.lock().await.recv().await } => job,
            };

            match job {
                Some(job) => {
                    QUEUE_DEPTH.dec();
                    self.process_job(job).await;
                }
                None => {
                    tracing::info!(worker_id = self.id, "Channel closed, worker exiting");
                    break;
                }
            }
        }
    }

    async fn process_job(&self, job: ReconciliationJob) {
        let start = Instant::now();

        tracing::info!(
            worker_id = self.id,
            payment_event_id = %job.payment_event_id,
            receipt = %job.gateway_receipt_number,
            "Reconciliation job started"
        );

        metrics::counter!("reconciliation_jobs_total").increment(1);

        // Retry transient store failures with exponential backoff
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.max_retry_elapsed()),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            self.pipeline
                .reconcile_by_id(job.payment_event_id, Trigger::Queue)
                .await
                .map_err(|e| {
                    if e.is_transient() {
                        tracing::warn!(
                            worker_id = self.id,
                            payment_event_id = %job.payment_event_id,
                            error = %e,
                            "Transient reconciliation failure, retrying"
                        );
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
        })
        .await;

        match result {
            Ok(outcome) => {
                metrics::histogram!("reconciliation_job_duration")
                    .record(start.elapsed().as_secs_f64());

                tracing::info!(
                    worker_id = self.id,
                    payment_event_id = %job.payment_event_id,
                    decision = outcome.decision.as_str(),
                    duplicate = outcome.duplicate,
                    duration_ms = start.elapsed().as_millis(),
                    "Reconciliation job succeeded"
                );
            }
            Err(e) => {
                metrics::counter!("reconciliation_jobs_failed", "error" => e.kind())
                    .increment(1);

                tracing::error!(
                    worker_id = self.id,
                    payment_event_id = %job.payment_event_id,
                    error = %e,
                    "Reconciliation job failed after retries; left for the sweep"
                );
            }
        }
    }
}
