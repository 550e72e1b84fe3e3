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
use crate::models::{AssignRunnerRequest, CreateTaskRequest, Task, TaskListQuery};
use crate::services::tasks;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_task).get(list_tasks))
        .route("/:task_id", get(get_task))
        .route("/:task_id/assign", post(assign_runner))
        .route("/:task_id/start", post(start_task))
        .route("/:task_id/cancel", post(cancel_task))
}

async fn create_task(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<Json<Task>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(format!("Validation error: {}", e)))?;

    let task = tasks::create_task(&state.db, caller, payload).await?;
    Ok(Json(task))
}

async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<Task>>, AppError> {
    let tasks = tasks::list_tasks(&state.db, &query).await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    let task = tasks::fetch_task(&state.db, task_id).await?;
    Ok(Json(task))
}

async fn assign_runner(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<AssignRunnerRequest>,
) -> Result<Json<Task>, AppError> {
    let task = tasks::assign_runner(&state.db, caller, task_id, payload.runner_id).await?;
    Ok(Json(task))
}

async fn start_task(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    let task = tasks::start_task(&state.db, caller, task_id).await?;
    Ok(Json(task))
}

async fn cancel_task(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    let task = tasks::cancel_task(&state.db, caller, task_id).await?;
    Ok(Json(task))
}
