use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A short-lived shared secret authorizing task completion. Used and
/// expired rows are kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CompletionCode {
    pub id: Uuid,
    pub task_id: Uuid,
    pub code: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemCodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct RedeemCodeResponse {
    pub success: bool,
}
