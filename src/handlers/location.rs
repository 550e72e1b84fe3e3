use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::errors::AppError;
use crate::middleware::AuthUser;
use crate::models::{HistoryQuery, LocationSample, LocationUpdateRequest, ProximityAlert};
use crate::services::{location, proximity};
use crate::AppState;

/// Task-scoped tracking routes, nested under /api/tasks.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:task_id/location", post(ingest_location))
        .route("/:task_id/location/latest", get(latest_location))
        .route("/:task_id/location/history", get(location_history))
        .route("/:task_id/alerts", get(list_alerts))
}

/// Alert-scoped routes, nested under /api/alerts.
pub fn alerts_router() -> Router<AppState> {
    Router::new().route("/:alert_id/acknowledge", post(acknowledge_alert))
}

async fn ingest_location(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<LocationUpdateRequest>,
) -> Result<Json<LocationSample>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(format!("Validation error: {}", e)))?;

    let sample = location::ingest(&state.db, &state.events, caller, task_id, payload).await?;
    Ok(Json(sample))
}

async fn latest_location(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Option<LocationSample>>, AppError> {
    let sample = location::latest_location(&state.db, caller, task_id).await?;
    Ok(Json(sample))
}

async fn location_history(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(task_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<LocationSample>>, AppError> {
    let samples =
        location::location_history(&state.db, caller, task_id, query.limit).await?;
    Ok(Json(samples))
}

async fn list_alerts(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Vec<ProximityAlert>>, AppError> {
    let alerts = proximity::list_alerts(&state.db, caller, task_id).await?;
    Ok(Json(alerts))
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<ProximityAlert>, AppError> {
    let alert = proximity::acknowledge_alert(&state.db, caller, alert_id).await?;
    Ok(Json(alert))
}
