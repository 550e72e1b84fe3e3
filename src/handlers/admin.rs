use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, put},
    Router,
};
use serde_json::json;

use crate::errors::AppError;
use crate::middleware::AuthUser;
use crate::models::{AdminSetting, UpdateSettingRequest};
use crate::AppState;

/// Back-office settings. Admin authorization happens at the gateway in
/// front of this service; here we only record who changed what.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/settings", get(get_settings))
        .route("/settings/:key", put(update_setting))
}

async fn get_settings(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let rows = sqlx::query_as::<_, AdminSetting>(
        "SELECT key, value, updated_by, updated_at FROM admin_settings ORDER BY key",
    )
    .fetch_all(&state.db)
    .await?;

    let mut settings = serde_json::Map::new();
    for row in rows {
        settings.insert(row.key, row.value);
    }

    Ok(Json(serde_json::Value::Object(settings)))
}

async fn update_setting(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(key): Path<String>,
    Json(payload): Json<UpdateSettingRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    // The proximity threshold is consumed as a positive number of meters;
    // reject anything else before it poisons evaluations.
    if key == "proximity_alert_distance" {
        let valid = payload.value.as_f64().map(|v| v > 0.0).unwrap_or(false);
        if !valid {
            return Err(AppError::BadRequest(
                "proximity_alert_distance must be a positive number of meters".to_string(),
            ));
        }
    }

    sqlx::query(
        "INSERT INTO admin_settings (key, value, updated_by, updated_at) \
         VALUES ($1, $2, $3, NOW()) \
         ON CONFLICT (key) DO UPDATE \
         SET value = EXCLUDED.value, updated_by = EXCLUDED.updated_by, updated_at = NOW()",
    )
    .bind(&key)
    .bind(&payload.value)
    .bind(caller)
    .execute(&state.db)
    .await?;

    tracing::info!(setting = %key, updated_by = %caller, "admin setting updated");
    Ok(Json(json!({ "success": true, "key": key })))
}
