use crate::dtos::{EnqueueResponse, MatchResponse};
use crate::models::{PaymentNotification, ProcessingStatus};
use crate::services::pipeline::Trigger;
use crate::startup::AppState;
use crate::workers::ReconciliationJob;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

/// Persist a gateway notification and reconcile it before responding.
pub async fn reconcile_payment(
    State(state): State<AppState>,
    Json(notification): Json<PaymentNotification>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .pipeline
        .reconcile_notification(notification, Trigger::Realtime)
        .await?;
    Ok(Json(outcome))
}

/// Persist a gateway notification and hand it to the worker pool.
pub async fn enqueue_payment(
    State(state): State<AppState>,
    Json(notification): Json<PaymentNotification>,
) -> Result<impl IntoResponse, AppError> {
    let stored = state.pipeline.ingest(notification).await?;
    let event = stored.event;

    let queued = ProcessingStatus::IN_FLIGHT.contains(&event.processing_status)
        && state.dispatcher.enqueue(ReconciliationJob {
            payment_event_id: event.payment_event_id,
            gateway_receipt_number: event.gateway_receipt_number.clone(),
        });

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            payment_event_id: event.payment_event_id,
            gateway_receipt_number: event.gateway_receipt_number,
            processing_status: event.processing_status,
            created: stored.created,
            queued,
        }),
    ))
}

pub async fn run_sweep(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let report = state.batch.run().await?;
    Ok(Json(report))
}

pub async fn get_payment_match(
    State(state): State<AppState>,
    Path(receipt): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (event, record) = state
        .pipeline
        .match_for_receipt(&receipt)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Unknown receipt {}", receipt)))?;
    Ok(Json(MatchResponse::new(event, record)))
}
