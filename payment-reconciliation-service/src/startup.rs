//! Application startup and lifecycle management.

use crate::config::{MatchingConfig, ReconciliationConfig, StoreBackend, SweepConfig, WorkerConfig};
use crate::handlers;
use crate::services::{
    init_metrics, BatchReconciler, CandidateSelector, DeterministicScorer, MemoryStore, PgStore,
    ReconciliationPipeline, ReconciliationStore, ReviewQueue, ScoringStrategy,
};
use crate::workers::{JobDispatcher, Sweeper, WorkerPool};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReconciliationStore>,
    pub pipeline: ReconciliationPipeline,
    pub review_queue: ReviewQueue,
    pub batch: BatchReconciler,
    pub dispatcher: JobDispatcher,
}

impl AppState {
    /// Wire every component around `store`. The returned pool must be
    /// started for queued events to be processed.
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        matching: MatchingConfig,
        worker: WorkerConfig,
        sweep: SweepConfig,
        shutdown_token: CancellationToken,
    ) -> (Self, WorkerPool) {
        let scoring = ScoringStrategy::new(DeterministicScorer::new(
            matching.default_country_code.clone(),
        ));
        let selector = CandidateSelector::new(store.clone(), matching);
        let pipeline = ReconciliationPipeline::new(store.clone(), selector, scoring);
        let (pool, dispatcher) = WorkerPool::new(worker, pipeline.clone(), shutdown_token);

        let state = Self {
            store,
            review_queue: ReviewQueue::new(pipeline.clone()),
            batch: BatchReconciler::new(pipeline.clone(), sweep),
            pipeline,
            dispatcher,
        };

        (state, pool)
    }
}

/// HTTP routes with the service-core middleware stack.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/v1/payments/reconcile", post(handlers::reconcile_payment))
        .route("/v1/payments/enqueue", post(handlers::enqueue_payment))
        .route("/v1/payments/:receipt/match", get(handlers::get_payment_match))
        .route("/v1/reconciliation/sweep", post(handlers::run_sweep))
        .route("/v1/review-items", get(handlers::list_review_items))
        .route(
            "/v1/review-items/:review_item_id/assign",
            post(handlers::assign_review_item),
        )
        .route(
            "/v1/review-items/:review_item_id/resolve",
            post(handlers::resolve_review_item),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    worker_pool: WorkerPool,
    sweep_interval: Option<Duration>,
    shutdown_token: CancellationToken,
}

impl Application {
    /// Build the application with the configured store backend.
    pub async fn build(config: ReconciliationConfig) -> Result<Self, AppError> {
        let store: Arc<dyn ReconciliationStore> = match config.store {
            StoreBackend::Postgres => {
                let url = config.database.url.as_ref().ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is not set"))
                })?;

                let db = PgStore::new(
                    url.expose_secret(),
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;

                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;

                Arc::new(db)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using the in-memory store; state is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        Self::build_with_store(config, store).await
    }

    /// Build the application around an existing store.
    pub async fn build_with_store(
        config: ReconciliationConfig,
        store: Arc<dyn ReconciliationStore>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let shutdown_token = CancellationToken::new();
        let (state, worker_pool) = AppState::new(
            store,
            config.matching.clone(),
            config.worker.clone(),
            config.sweep.clone(),
            shutdown_token.clone(),
        );

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(http_port = port, "Payment reconciliation listener bound");

        Ok(Self {
            port,
            listener,
            state,
            worker_pool,
            sweep_interval: config.sweep.interval,
            shutdown_token,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Cancelling this token stops the server, the workers and the sweeper.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run the application until the shutdown token is cancelled.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let workers = self.worker_pool.start();

        let sweeper = self.sweep_interval.map(|interval| {
            Sweeper::new(self.state.batch.clone(), interval, self.shutdown_token.clone()).spawn()
        });

        tracing::info!(
            service = "payment-reconciliation-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.port,
            workers = workers.len(),
            periodic_sweep = sweeper.is_some(),
            "Service ready to accept connections"
        );

        let shutdown = self.shutdown_token.clone();
        let result = axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.shutdown_token.cancel();
        for handle in workers.into_iter().chain(sweeper) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
