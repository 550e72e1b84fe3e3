use rand::Rng;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::events::{EventBus, TaskEvent};
use crate::models::{CompletionCode, Task};
use crate::ratelimit;
use crate::services::tasks;

/// Short enough to read aloud over the phone, random enough to survive
/// its 24h window under the redemption throttle.
const CODE_LENGTH: usize = 6;
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_VALIDITY_HOURS: i32 = 24;

const CODE_COLUMNS: &str =
    "id, task_id, code, generated_at, expires_at, is_used, used_at";

fn generate_code_value() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// Mint a completion code for the task, or hand back the one already
/// active. Idempotent on purpose: the creator must never be shown two
/// different valid codes for the same task.
pub async fn generate(
    db: &PgPool,
    events: &EventBus,
    caller: Uuid,
    task_id: Uuid,
) -> Result<CompletionCode> {
    let task = tasks::fetch_task(db, task_id).await?;
    authorize_creator(&task, caller)?;

    let status = task.current_status()?;
    if !status.is_trackable() {
        return Err(AppError::TaskNotTrackable(task.status.clone()));
    }

    let mut tx = db.begin().await?;

    // Concurrent generates serialize on the task row, so at most one of
    // them mints; the rest see the fresh row and return it.
    sqlx::query("SELECT id FROM tasks WHERE id = $1 FOR UPDATE")
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await?;

    let existing = sqlx::query_as::<_, CompletionCode>(&format!(
        "SELECT {CODE_COLUMNS} FROM completion_codes \
         WHERE task_id = $1 AND is_used = FALSE AND expires_at > NOW() \
         ORDER BY generated_at DESC LIMIT 1"
    ))
    .bind(task_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(code) = existing {
        tx.commit().await?;
        return Ok(code);
    }

    let code = sqlx::query_as::<_, CompletionCode>(&format!(
        "INSERT INTO completion_codes (task_id, code, expires_at) \
         VALUES ($1, $2, NOW() + make_interval(hours => $3)) \
         RETURNING {CODE_COLUMNS}"
    ))
    .bind(task_id)
    .bind(generate_code_value())
    .bind(CODE_VALIDITY_HOURS)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(task_id = %task_id, expires_at = %code.expires_at, "completion code generated");
    events.publish(TaskEvent::CodeGenerated {
        task_id,
        expires_at: code.expires_at,
    });

    Ok(code)
}

/// The currently active code, if any. Creator only.
pub async fn active_code(
    db: &PgPool,
    caller: Uuid,
    task_id: Uuid,
) -> Result<Option<CompletionCode>> {
    let task = tasks::fetch_task(db, task_id).await?;
    authorize_creator(&task, caller)?;

    let code = sqlx::query_as::<_, CompletionCode>(&format!(
        "SELECT {CODE_COLUMNS} FROM completion_codes \
         WHERE task_id = $1 AND is_used = FALSE AND expires_at > NOW() \
         ORDER BY generated_at DESC LIMIT 1"
    ))
    .bind(task_id)
    .fetch_optional(db)
    .await?;

    Ok(code)
}

/// Redeem a completion code, completing the task.
///
/// The flip of `is_used` and the task status transition happen in one
/// SQL statement: the code row update re-checks `is_used = FALSE` under
/// the row lock, so of N concurrent attempts with the same code exactly
/// one sees the old row and wins. Every failure shape — wrong code,
/// expired, already used, lost race — comes back as `Ok(false)`, so a
/// guesser learns nothing about which it was.
pub async fn redeem(
    db: &PgPool,
    events: &EventBus,
    caller: Uuid,
    task_id: Uuid,
    code: &str,
) -> Result<bool> {
    ratelimit::check_redeem_attempt(task_id, caller)?;

    let task = tasks::fetch_task(db, task_id).await?;
    if task.runner_id != Some(caller) {
        return Err(AppError::Forbidden(
            "only the assigned runner may redeem a completion code".to_string(),
        ));
    }

    let normalized = code.trim().to_ascii_uppercase();
    if normalized.is_empty() || normalized.len() > CODE_LENGTH * 2 {
        return Ok(false);
    }

    let completed: Option<Uuid> = sqlx::query_scalar(
        "WITH redeemed AS ( \
             UPDATE completion_codes c SET is_used = TRUE, used_at = NOW() \
             FROM tasks t \
             WHERE t.id = c.task_id \
               AND c.task_id = $1 AND c.code = $2 \
               AND c.is_used = FALSE AND c.expires_at > NOW() \
               AND t.status IN ('accepted', 'in_progress') \
             RETURNING c.task_id \
         ) \
         UPDATE tasks SET status = 'completed', updated_at = NOW() \
         WHERE id IN (SELECT task_id FROM redeemed) \
         RETURNING id",
    )
    .bind(task_id)
    .bind(&normalized)
    .fetch_optional(db)
    .await?;

    match completed {
        Some(_) => {
            tracing::info!(task_id = %task_id, "completion code redeemed, task completed");
            events.publish(TaskEvent::CodeRedeemed { task_id });
            Ok(true)
        }
        None => {
            tracing::debug!(task_id = %task_id, "completion code rejected");
            Ok(false)
        }
    }
}

fn authorize_creator(task: &Task, caller: Uuid) -> Result<()> {
    if task.creator_id != caller {
        return Err(AppError::Forbidden(
            "only the task creator may manage completion codes".to_string(),
        ));
    }
    Ok(())
}
