use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::events::{EventBus, TaskEvent};
use crate::geo;
use crate::models::{
    LocationSample, ProximityAlert, ProximityStateRow, ProximityZone, Task,
};
use crate::services::tasks;

pub const DEFAULT_ALERT_DISTANCE_M: f64 = 100.0;
const ALERT_DISTANCE_SETTING: &str = "proximity_alert_distance";

/// Current alert threshold in meters. Read fresh on every evaluation so
/// an operator change takes effect on the next sample.
pub async fn alert_threshold_meters(db: &PgPool) -> Result<f64> {
    let value: Option<serde_json::Value> =
        sqlx::query_scalar("SELECT value FROM admin_settings WHERE key = $1")
            .bind(ALERT_DISTANCE_SETTING)
            .fetch_optional(db)
            .await?;

    let threshold = value
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .filter(|t| *t > 0.0)
        .unwrap_or(DEFAULT_ALERT_DISTANCE_M);

    Ok(threshold)
}

/// Edge-triggered geofence check for one new sample.
///
/// An alert is emitted only when the runner crosses from outside (or an
/// unknown state) to within the threshold; loitering inside the radius
/// produces nothing until the runner leaves and comes back. Samples
/// older than the last evaluated one are skipped so network retries
/// cannot flap the state backwards.
pub async fn evaluate(
    db: &PgPool,
    events: &EventBus,
    task: &Task,
    sample: &LocationSample,
) -> Result<Option<ProximityAlert>> {
    let (pickup_lat, pickup_lon) = task
        .pickup_coordinate()
        .ok_or(AppError::MissingPickupLocation)?;

    let threshold = alert_threshold_meters(db).await?;
    let distance =
        geo::distance_meters(sample.latitude, sample.longitude, pickup_lat, pickup_lon)?;

    let state = sqlx::query_as::<_, ProximityStateRow>(
        "SELECT zone, last_sample_at FROM task_proximity_state WHERE task_id = $1",
    )
    .bind(task.id)
    .fetch_optional(db)
    .await?;

    let zone = match &state {
        Some(row) => {
            if let Some(last) = row.last_sample_at {
                if sample.recorded_at < last {
                    tracing::debug!(task_id = %task.id, "stale sample, skipping evaluation");
                    return Ok(None);
                }
            }
            ProximityZone::parse(&row.zone)
        }
        None => ProximityZone::Unknown,
    };

    if distance > threshold {
        // Leaving the radius re-arms the alert.
        store_zone(db, task.id, ProximityZone::Outside, sample).await?;
        return Ok(None);
    }

    if zone == ProximityZone::Inside {
        store_zone(db, task.id, ProximityZone::Inside, sample).await?;
        return Ok(None);
    }

    // Rising edge: outside (or never evaluated) -> inside.
    let runner_id = task.runner_id.ok_or_else(|| {
        AppError::DatabaseError(format!("trackable task {} has no runner", task.id))
    })?;

    // Zone flip and alert insert commit together. If they didn't, a
    // failed insert would leave the zone stuck at 'inside' and the
    // approach would never alert; the next sample re-triggers instead.
    let mut tx = db.begin().await?;

    store_zone(&mut *tx, task.id, ProximityZone::Inside, sample).await?;

    let alert = sqlx::query_as::<_, ProximityAlert>(
        "INSERT INTO proximity_alerts (task_id, runner_id, creator_id, distance_meters) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, task_id, runner_id, creator_id, distance_meters, alert_sent_at, \
                   acknowledged_by_runner, acknowledged_by_creator",
    )
    .bind(task.id)
    .bind(runner_id)
    .bind(task.creator_id)
    .bind(distance)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        task_id = %task.id,
        distance_m = distance,
        threshold_m = threshold,
        "proximity alert emitted"
    );

    events.publish(TaskEvent::ProximityAlert {
        task_id: task.id,
        alert_id: alert.id,
        distance_meters: distance,
    });

    Ok(Some(alert))
}

async fn store_zone<'e>(
    db: impl sqlx::PgExecutor<'e>,
    task_id: Uuid,
    zone: ProximityZone,
    sample: &LocationSample,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_proximity_state (task_id, zone, last_sample_at, updated_at) \
         VALUES ($1, $2, $3, NOW()) \
         ON CONFLICT (task_id) DO UPDATE \
         SET zone = EXCLUDED.zone, last_sample_at = EXCLUDED.last_sample_at, updated_at = NOW()",
    )
    .bind(task_id)
    .bind(zone.as_str())
    .bind(sample.recorded_at)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn list_alerts(db: &PgPool, caller: Uuid, task_id: Uuid) -> Result<Vec<ProximityAlert>> {
    let task = tasks::fetch_task(db, task_id).await?;
    if !task.is_participant(caller) {
        return Err(AppError::Forbidden(
            "only task participants may view proximity alerts".to_string(),
        ));
    }

    let alerts = sqlx::query_as::<_, ProximityAlert>(
        "SELECT id, task_id, runner_id, creator_id, distance_meters, alert_sent_at, \
                acknowledged_by_runner, acknowledged_by_creator \
         FROM proximity_alerts WHERE task_id = $1 \
         ORDER BY alert_sent_at DESC",
    )
    .bind(task_id)
    .fetch_all(db)
    .await?;

    Ok(alerts)
}

/// Flip the acknowledgment flag belonging to the calling party.
pub async fn acknowledge_alert(
    db: &PgPool,
    caller: Uuid,
    alert_id: Uuid,
) -> Result<ProximityAlert> {
    let alert = sqlx::query_as::<_, ProximityAlert>(
        "SELECT id, task_id, runner_id, creator_id, distance_meters, alert_sent_at, \
                acknowledged_by_runner, acknowledged_by_creator \
         FROM proximity_alerts WHERE id = $1",
    )
    .bind(alert_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("alert {alert_id}")))?;

    let column = if caller == alert.runner_id {
        "acknowledged_by_runner"
    } else if caller == alert.creator_id {
        "acknowledged_by_creator"
    } else {
        return Err(AppError::Forbidden(
            "only task participants may acknowledge alerts".to_string(),
        ));
    };

    let updated = sqlx::query_as::<_, ProximityAlert>(&format!(
        "UPDATE proximity_alerts SET {column} = TRUE WHERE id = $1 \
         RETURNING id, task_id, runner_id, creator_id, distance_meters, alert_sent_at, \
                   acknowledged_by_runner, acknowledged_by_creator"
    ))
    .bind(alert_id)
    .fetch_one(db)
    .await?;

    Ok(updated)
}
