use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use uuid::Uuid;

use crate::errors::AppError;
use crate::middleware::AuthUser;
use crate::services::tasks;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/:task_id/events", get(task_events))
}

/// Live feed of one task's domain events (location updates, proximity
/// alerts, code lifecycle) as Server-Sent Events. The browser client
/// subscribes here instead of to a database change feed.
async fn task_events(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let task = tasks::fetch_task(&state.db, task_id).await?;
    if !task.is_participant(caller) {
        return Err(AppError::Forbidden(
            "only task participants may subscribe to task events".to_string(),
        ));
    }

    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |item| {
        // Lagged receivers just drop the missed events.
        let event = item.ok()?;
        if event.task_id() != task_id {
            return None;
        }
        Event::default().json_data(&event).ok().map(Ok::<_, Infallible>)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
