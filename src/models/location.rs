use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// One reported runner position. Append-only; never updated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LocationSample {
    pub id: Uuid,
    pub task_id: Uuid,
    pub runner_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LocationUpdateRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[validate(range(min = 0.0))]
    pub accuracy: Option<f64>,
    #[validate(range(min = 0.0, max = 360.0))]
    pub heading: Option<f64>,
    #[validate(range(min = 0.0))]
    pub speed: Option<f64>,
    /// Device timestamp; defaults to server time when absent.
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProximityAlert {
    pub id: Uuid,
    pub task_id: Uuid,
    pub runner_id: Uuid,
    pub creator_id: Uuid,
    pub distance_meters: f64,
    pub alert_sent_at: DateTime<Utc>,
    pub acknowledged_by_runner: bool,
    pub acknowledged_by_creator: bool,
}

/// Per-task geofence state, persisted so rising-edge detection does not
/// have to rescan alert history on every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityZone {
    Unknown,
    Inside,
    Outside,
}

impl ProximityZone {
    pub fn as_str(self) -> &'static str {
        match self {
            ProximityZone::Unknown => "unknown",
            ProximityZone::Inside => "inside",
            ProximityZone::Outside => "outside",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "inside" => ProximityZone::Inside,
            "outside" => ProximityZone::Outside,
            _ => ProximityZone::Unknown,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ProximityStateRow {
    pub zone: String,
    pub last_sample_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}
