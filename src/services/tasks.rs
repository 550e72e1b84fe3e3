use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::geo;
use crate::models::{CreateTaskRequest, Task, TaskListQuery, TaskStatus};

const TASK_COLUMNS: &str = "id, creator_id, runner_id, title, description, budget, \
     pickup_latitude, pickup_longitude, status, created_at, updated_at";

pub async fn fetch_task(db: &PgPool, task_id: Uuid) -> Result<Task> {
    sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
        .bind(task_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))
}

pub async fn create_task(db: &PgPool, creator_id: Uuid, req: CreateTaskRequest) -> Result<Task> {
    // A pickup coordinate is optional, but if one is given it must be a
    // real coordinate and it must be complete.
    match (req.pickup_latitude, req.pickup_longitude) {
        (Some(lat), Some(lon)) => geo::validate_coordinate(lat, lon)?,
        (None, None) => {}
        _ => {
            return Err(AppError::BadRequest(
                "pickup_latitude and pickup_longitude must be provided together".to_string(),
            ))
        }
    }

    let task = sqlx::query_as::<_, Task>(&format!(
        "INSERT INTO tasks (creator_id, title, description, budget, pickup_latitude, pickup_longitude) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {TASK_COLUMNS}"
    ))
    .bind(creator_id)
    .bind(req.title.trim())
    .bind(req.description.unwrap_or_default())
    .bind(req.budget)
    .bind(req.pickup_latitude)
    .bind(req.pickup_longitude)
    .fetch_one(db)
    .await?;

    tracing::info!(task_id = %task.id, creator_id = %creator_id, "task created");
    Ok(task)
}

pub async fn list_tasks(db: &PgPool, query: &TaskListQuery) -> Result<Vec<Task>> {
    if let Some(status) = &query.status {
        if TaskStatus::parse(status).is_none() {
            return Err(AppError::BadRequest(format!("unknown status '{status}'")));
        }
    }

    let tasks = sqlx::query_as::<_, Task>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks \
         WHERE ($1::text IS NULL OR status = $1) \
           AND ($2::uuid IS NULL OR creator_id = $2 OR runner_id = $2) \
         ORDER BY created_at DESC \
         LIMIT 200"
    ))
    .bind(&query.status)
    .bind(query.user_id)
    .fetch_all(db)
    .await?;

    Ok(tasks)
}

/// posted -> accepted, naming the runner. Stands in for the bidding flow,
/// which lives outside this service.
pub async fn assign_runner(
    db: &PgPool,
    caller: Uuid,
    task_id: Uuid,
    runner_id: Uuid,
) -> Result<Task> {
    let task = fetch_task(db, task_id).await?;
    if task.creator_id != caller {
        return Err(AppError::Forbidden(
            "only the task creator may assign a runner".to_string(),
        ));
    }
    if runner_id == task.creator_id {
        return Err(AppError::BadRequest(
            "a creator cannot run their own task".to_string(),
        ));
    }

    transition(db, task_id, TaskStatus::Accepted, Some(runner_id)).await
}

/// accepted -> in_progress, by the assigned runner. Tracking becomes
/// meaningful from this point.
pub async fn start_task(db: &PgPool, caller: Uuid, task_id: Uuid) -> Result<Task> {
    let task = fetch_task(db, task_id).await?;
    if task.runner_id != Some(caller) {
        return Err(AppError::Forbidden(
            "only the assigned runner may start the task".to_string(),
        ));
    }

    transition(db, task_id, TaskStatus::InProgress, None).await
}

pub async fn cancel_task(db: &PgPool, caller: Uuid, task_id: Uuid) -> Result<Task> {
    let task = fetch_task(db, task_id).await?;
    if task.creator_id != caller {
        return Err(AppError::Forbidden(
            "only the task creator may cancel the task".to_string(),
        ));
    }

    transition(db, task_id, TaskStatus::Cancelled, None).await
}

/// Compare-and-swap status transition. The UPDATE re-checks that the
/// current status actually permits the edge, so two racing transitions
/// cannot both apply.
async fn transition(
    db: &PgPool,
    task_id: Uuid,
    next: TaskStatus,
    runner_id: Option<Uuid>,
) -> Result<Task> {
    let allowed_from: Vec<&str> = [
        TaskStatus::Posted,
        TaskStatus::Accepted,
        TaskStatus::InProgress,
    ]
    .iter()
    .filter(|from| from.can_transition_to(next))
    .map(|from| from.as_str())
    .collect();

    let updated = sqlx::query_as::<_, Task>(&format!(
        "UPDATE tasks SET status = $2, runner_id = COALESCE($3, runner_id), updated_at = NOW() \
         WHERE id = $1 AND status = ANY($4) \
         RETURNING {TASK_COLUMNS}"
    ))
    .bind(task_id)
    .bind(next.as_str())
    .bind(runner_id)
    .bind(&allowed_from)
    .fetch_optional(db)
    .await?;

    match updated {
        Some(task) => {
            tracing::info!(task_id = %task_id, status = %next, "task transitioned");
            Ok(task)
        }
        None => {
            let current = fetch_task(db, task_id).await?;
            Err(AppError::TaskNotTrackable(current.status))
        }
    }
}
