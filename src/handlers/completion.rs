use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::errors::AppError;
use crate::middleware::AuthUser;
use crate::models::{CompletionCode, RedeemCodeRequest, RedeemCodeResponse};
use crate::services::completion;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/:task_id/completion-code",
            post(generate_code).get(get_active_code),
        )
        .route("/:task_id/complete", post(redeem_code))
}

async fn generate_code(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<CompletionCode>, AppError> {
    let code = completion::generate(&state.db, &state.events, caller, task_id).await?;
    Ok(Json(code))
}

async fn get_active_code(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<CompletionCode>, AppError> {
    completion::active_code(&state.db, caller, task_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no active completion code".to_string()))
}

async fn redeem_code(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<RedeemCodeRequest>,
) -> Result<Json<RedeemCodeResponse>, AppError> {
    let success =
        completion::redeem(&state.db, &state.events, caller, task_id, &payload.code).await?;
    Ok(Json(RedeemCodeResponse { success }))
}
