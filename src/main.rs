use axum::{
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use runam_backend::events::EventBus;
use runam_backend::handlers::{admin, completion, events, location, tasks};
use runam_backend::{database, ratelimit, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with reduced SQL verbosity
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(EnvFilter::new("runam_backend=info,sqlx=warn,info"))
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = database::create_pool(&database_url)
        .await
        .expect("Failed to connect to PostgreSQL");

    // Run migrations with better error handling (can be disabled via env var)
    let skip_migrations = std::env::var("SKIP_MIGRATIONS")
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(false);

    if skip_migrations {
        warn!("⚠️ Skipping migrations due to SKIP_MIGRATIONS=true");
    } else {
        match sqlx::migrate!("./migrations").run(&pool).await {
            Ok(_) => info!("✅ Migrations completed successfully"),
            Err(sqlx::migrate::MigrateError::VersionMismatch(version)) => {
                warn!("⚠️  Migration version mismatch: {}", version);
                warn!("Database has different migration state than expected");
            }
            Err(e) => {
                warn!("❌ Failed to run migrations: {}", e);
                warn!("Continuing without migrations (set SKIP_MIGRATIONS=true to suppress this warning)");
            }
        }
    }

    let state = AppState {
        db: pool,
        events: EventBus::new(),
    };

    // Housekeeping: drop replenished entries from the redemption
    // limiter's key store so it doesn't grow unbounded.
    tokio::spawn(async {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            ratelimit::prune_stale_keys();
        }
    });

    // Configure CORS - permissive for development, origin list for production
    let is_development = std::env::var("DEBUG_MODE").unwrap_or_default() == "true";

    let cors = if is_development {
        info!("🔓 Development mode: Using permissive CORS");
        CorsLayer::new().allow_origin(Any).allow_credentials(false)
    } else {
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "https://runam.app,https://www.runam.app".to_string());

        let origins: Result<Vec<_>, _> = allowed_origins
            .split(',')
            .map(|origin| origin.trim().parse())
            .collect();

        match origins {
            Ok(parsed_origins) => {
                info!("🔒 Production mode: CORS configured for origins: {}", allowed_origins);
                CorsLayer::new()
                    .allow_origin(parsed_origins)
                    .allow_credentials(true)
            }
            Err(e) => {
                warn!("⚠️ Failed to parse ALLOWED_ORIGINS ({}), denying cross-origin requests", e);
                CorsLayer::new()
            }
        }
    }
    .allow_methods([
        axum::http::Method::GET,
        axum::http::Method::POST,
        axum::http::Method::PUT,
        axum::http::Method::OPTIONS,
    ])
    .allow_headers([
        axum::http::header::CONTENT_TYPE,
        axum::http::header::AUTHORIZATION,
        axum::http::header::ACCEPT,
        "X-User-Id".parse().expect("valid header name"),
    ]);

    let app = Router::new()
        .route("/api/health", get(health_check))
        .nest("/api/tasks", tasks::router())
        .nest("/api/tasks", location::router())
        .nest("/api/tasks", completion::router())
        .nest("/api/tasks", events::router())
        .nest("/api/alerts", location::alerts_router())
        .nest("/api/admin", admin::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state);

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3001".to_string())
        .parse::<u16>()
        .expect("PORT must be a valid number");

    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    info!("🚀 Server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "runam-backend",
        "timestamp": chrono::Utc::now(),
        "version": "1.0.0",
        "endpoints": {
            "tasks": "/api/tasks",
            "tracking": "/api/tasks/:id/location",
            "alerts": "/api/tasks/:id/alerts",
            "completion": "/api/tasks/:id/completion-code",
            "admin": "/api/admin/settings",
            "health": "/api/health"
        }
    })))
}
