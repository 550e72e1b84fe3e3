use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::events::{EventBus, TaskEvent};
use crate::geo;
use crate::models::{LocationSample, LocationUpdateRequest, Task};
use crate::services::{proximity, tasks};

const DEFAULT_HISTORY_LIMIT: i64 = 100;
const MAX_HISTORY_LIMIT: i64 = 1000;

/// Append a runner position sample and run proximity evaluation on it.
/// This is the sole write path for location data.
pub async fn ingest(
    db: &PgPool,
    events: &EventBus,
    caller: Uuid,
    task_id: Uuid,
    req: LocationUpdateRequest,
) -> Result<LocationSample> {
    geo::validate_coordinate(req.latitude, req.longitude)?;

    let task = tasks::fetch_task(db, task_id).await?;
    authorize_runner(&task, caller)?;

    let status = task.current_status()?;
    if !status.is_trackable() {
        return Err(AppError::TaskNotTrackable(task.status.clone()));
    }

    // A device clock running ahead would push the evaluation watermark
    // into the future and freeze the geofence, so future timestamps are
    // clamped to server time.
    let sample = sqlx::query_as::<_, LocationSample>(
        "INSERT INTO location_samples \
             (task_id, runner_id, latitude, longitude, accuracy, heading, speed, recorded_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, LEAST(COALESCE($8, NOW()), NOW())) \
         RETURNING id, task_id, runner_id, latitude, longitude, accuracy, heading, speed, recorded_at",
    )
    .bind(task_id)
    .bind(caller)
    .bind(req.latitude)
    .bind(req.longitude)
    .bind(req.accuracy)
    .bind(req.heading)
    .bind(req.speed)
    .bind(req.recorded_at)
    .fetch_one(db)
    .await?;

    events.publish(TaskEvent::LocationUpdate {
        task_id,
        latitude: sample.latitude,
        longitude: sample.longitude,
        recorded_at: sample.recorded_at,
    });

    match proximity::evaluate(db, events, &task, &sample).await {
        Ok(_) => {}
        // Not all tasks are geocoded; the sample is still recorded.
        Err(AppError::MissingPickupLocation) => {
            tracing::debug!(task_id = %task_id, "no pickup coordinate, skipping proximity evaluation");
        }
        Err(e) => return Err(e),
    }

    Ok(sample)
}

pub async fn latest_location(
    db: &PgPool,
    caller: Uuid,
    task_id: Uuid,
) -> Result<Option<LocationSample>> {
    let task = tasks::fetch_task(db, task_id).await?;
    authorize_participant(&task, caller)?;

    let sample = sqlx::query_as::<_, LocationSample>(
        "SELECT id, task_id, runner_id, latitude, longitude, accuracy, heading, speed, recorded_at \
         FROM location_samples WHERE task_id = $1 \
         ORDER BY recorded_at DESC LIMIT 1",
    )
    .bind(task_id)
    .fetch_optional(db)
    .await?;

    Ok(sample)
}

pub async fn location_history(
    db: &PgPool,
    caller: Uuid,
    task_id: Uuid,
    limit: Option<i64>,
) -> Result<Vec<LocationSample>> {
    let task = tasks::fetch_task(db, task_id).await?;
    authorize_participant(&task, caller)?;

    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);

    let samples = sqlx::query_as::<_, LocationSample>(
        "SELECT id, task_id, runner_id, latitude, longitude, accuracy, heading, speed, recorded_at \
         FROM location_samples WHERE task_id = $1 \
         ORDER BY recorded_at DESC LIMIT $2",
    )
    .bind(task_id)
    .bind(limit)
    .fetch_all(db)
    .await?;

    Ok(samples)
}

fn authorize_runner(task: &Task, caller: Uuid) -> Result<()> {
    if task.runner_id != Some(caller) {
        return Err(AppError::Forbidden(
            "only the assigned runner may report location".to_string(),
        ));
    }
    Ok(())
}

fn authorize_participant(task: &Task, caller: Uuid) -> Result<()> {
    if !task.is_participant(caller) {
        return Err(AppError::Forbidden(
            "only task participants may view tracking data".to_string(),
        ));
    }
    Ok(())
}
