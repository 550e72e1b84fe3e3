pub mod database;
pub mod errors;
pub mod events;
pub mod geo;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod ratelimit;
pub mod services;

use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub events: events::EventBus,
}
