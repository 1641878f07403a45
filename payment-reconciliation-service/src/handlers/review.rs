use crate::dtos::{
    AssignReviewRequest, ResolveReviewRequest, ReviewItemListResponse, ReviewListParams,
};
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn list_review_items(
    State(state): State<AppState>,
    Query(params): Query<ReviewListParams>,
) -> Result<impl IntoResponse, AppError> {
    let assignee = params.assignee.as_deref().filter(|a| !a.trim().is_empty());
    let items = state.review_queue.list_pending(assignee).await?;
    Ok(Json(ReviewItemListResponse {
        total: items.len(),
        items,
    }))
}

pub async fn assign_review_item(
    State(state): State<AppState>,
    Path(review_item_id): Path<Uuid>,
    Json(req): Json<AssignReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let item = state
        .review_queue
        .assign(review_item_id, &req.assignee)
        .await?;
    Ok(Json(item))
}

pub async fn resolve_review_item(
    State(state): State<AppState>,
    Path(review_item_id): Path<Uuid>,
    Json(req): Json<ResolveReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let outcome = state
        .review_queue
        .resolve(review_item_id, req.invoice_id, &req.resolved_by)
        .await?;
    Ok(Json(outcome))
}
