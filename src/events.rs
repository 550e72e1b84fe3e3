use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Domain events emitted by the tracking core. A presentation layer
/// (SSE stream, toast surface) decides how to render them; the core
/// never formats user-facing text.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    LocationUpdate {
        task_id: Uuid,
        latitude: f64,
        longitude: f64,
        recorded_at: DateTime<Utc>,
    },
    ProximityAlert {
        task_id: Uuid,
        alert_id: Uuid,
        distance_meters: f64,
    },
    CodeGenerated {
        task_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    CodeRedeemed {
        task_id: Uuid,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> Uuid {
        match self {
            TaskEvent::LocationUpdate { task_id, .. }
            | TaskEvent::ProximityAlert { task_id, .. }
            | TaskEvent::CodeGenerated { task_id, .. }
            | TaskEvent::CodeRedeemed { task_id } => *task_id,
        }
    }
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// In-process fan-out of task events over a tokio broadcast channel,
/// standing in for the hosted backend's realtime change feed.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Send errors only mean nobody is subscribed, which is fine.
    pub fn publish(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
