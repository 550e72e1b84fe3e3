use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::errors::{AppError, Result};

/// Task lifecycle. Transitions are monotonic along the graph below; the
/// only edge this service drives itself is `in_progress -> completed`,
/// via completion-code redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Posted,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Posted => "posted",
            TaskStatus::Accepted => "accepted",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "posted" => Some(TaskStatus::Posted),
            "accepted" => Some(TaskStatus::Accepted),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Location ingestion and code generation are only allowed here.
    pub fn is_trackable(self) -> bool {
        matches!(self, TaskStatus::Accepted | TaskStatus::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Posted, TaskStatus::Accepted)
                | (TaskStatus::Posted, TaskStatus::Cancelled)
                | (TaskStatus::Accepted, TaskStatus::InProgress)
                // Redemption may complete a task whose runner never
                // formally pressed "start".
                | (TaskStatus::Accepted, TaskStatus::Completed)
                | (TaskStatus::Accepted, TaskStatus::Cancelled)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub runner_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub budget: Option<f64>,
    pub pickup_latitude: Option<f64>,
    pub pickup_longitude: Option<f64>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn current_status(&self) -> Result<TaskStatus> {
        TaskStatus::parse(&self.status).ok_or_else(|| {
            AppError::DatabaseError(format!("task {} has unknown status '{}'", self.id, self.status))
        })
    }

    /// (latitude, longitude) of the pickup point, if the task was geocoded.
    pub fn pickup_coordinate(&self) -> Option<(f64, f64)> {
        match (self.pickup_latitude, self.pickup_longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.creator_id == user_id || self.runner_id == Some(user_id)
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 3, max = 120))]
    pub title: String,
    pub description: Option<String>,
    #[validate(range(min = 0.0))]
    pub budget: Option<f64>,
    pub pickup_latitude: Option<f64>,
    pub pickup_longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRunnerRequest {
    pub runner_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
    /// Match tasks where this user is creator or runner.
    pub user_id: Option<Uuid>,
}
