//! End-to-end tests for the tracking and completion core, run against a
//! real Postgres database via `#[sqlx::test]` (migrations applied per test).

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use runam_backend::errors::AppError;
use runam_backend::events::EventBus;
use runam_backend::models::{CreateTaskRequest, LocationUpdateRequest, Task, TaskStatus};
use runam_backend::services::{completion, location, proximity, tasks};

/// Roughly one degree of latitude in meters.
const METERS_PER_DEGREE_LAT: f64 = 111_195.0;

fn lat_offset(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE_LAT
}

/// A sample stamped `secs_ago` seconds in the past; timestamps stay in
/// the past because the ingest path clamps future ones to server time.
fn sample_at(latitude: f64, longitude: f64, secs_ago: i64) -> LocationUpdateRequest {
    LocationUpdateRequest {
        latitude,
        longitude,
        accuracy: Some(5.0),
        heading: None,
        speed: None,
        recorded_at: Some(Utc::now() - Duration::seconds(secs_ago)),
    }
}

/// A sample with no device timestamp; the server stamps it on arrival.
fn sample_now(latitude: f64, longitude: f64) -> LocationUpdateRequest {
    LocationUpdateRequest {
        recorded_at: None,
        ..sample_at(latitude, longitude, 0)
    }
}

/// Create a task, assign a runner and start it, returning (task, creator, runner).
async fn in_progress_task(db: &PgPool, pickup: Option<(f64, f64)>) -> (Task, Uuid, Uuid) {
    let creator = Uuid::new_v4();
    let runner = Uuid::new_v4();

    let task = tasks::create_task(
        db,
        creator,
        CreateTaskRequest {
            title: "Pick up groceries".to_string(),
            description: Some("Two bags from the market".to_string()),
            budget: Some(5000.0),
            pickup_latitude: pickup.map(|p| p.0),
            pickup_longitude: pickup.map(|p| p.1),
        },
    )
    .await
    .expect("create task");

    let task = tasks::assign_runner(db, creator, task.id, runner)
        .await
        .expect("assign runner");
    let task = tasks::start_task(db, runner, task.id)
        .await
        .expect("start task");

    assert_eq!(task.current_status().unwrap(), TaskStatus::InProgress);
    (task, creator, runner)
}

async fn alert_count(db: &PgPool, task_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM proximity_alerts WHERE task_id = $1")
        .bind(task_id)
        .fetch_one(db)
        .await
        .expect("count alerts")
}

async fn sample_count(db: &PgPool, task_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM location_samples WHERE task_id = $1")
        .bind(task_id)
        .fetch_one(db)
        .await
        .expect("count samples")
}

#[sqlx::test]
async fn edge_triggered_alerting(pool: PgPool) {
    let events = EventBus::new();
    let (task, _creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    // 50m inside the 100m default threshold: exactly one alert.
    let sample = location::ingest(&pool, &events, runner, task.id, sample_at(lat_offset(50.0), 0.0, 60))
        .await
        .expect("ingest");
    assert_eq!(alert_count(&pool, task.id).await, 1);
    assert!(sample.latitude > 0.0);

    // Still inside: no duplicate while loitering.
    location::ingest(&pool, &events, runner, task.id, sample_at(lat_offset(50.0), 0.0, 50))
        .await
        .expect("ingest");
    assert_eq!(alert_count(&pool, task.id).await, 1);

    // Leaving the radius re-arms the detector.
    location::ingest(&pool, &events, runner, task.id, sample_at(lat_offset(500.0), 0.0, 40))
        .await
        .expect("ingest");
    assert_eq!(alert_count(&pool, task.id).await, 1);

    // Coming back inside fires exactly one more.
    location::ingest(&pool, &events, runner, task.id, sample_at(lat_offset(80.0), 0.0, 30))
        .await
        .expect("ingest");
    assert_eq!(alert_count(&pool, task.id).await, 2);

    let listed = proximity::list_alerts(&pool, runner, task.id).await.expect("list");
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|a| a.distance_meters <= 100.0));
}

#[sqlx::test]
async fn stale_samples_do_not_flap_the_geofence(pool: PgPool) {
    let events = EventBus::new();
    let (task, _creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    location::ingest(&pool, &events, runner, task.id, sample_at(lat_offset(50.0), 0.0, 100))
        .await
        .expect("ingest");
    assert_eq!(alert_count(&pool, task.id).await, 1);

    // A delayed retry from before the approach arrives late, reporting
    // the runner far away. It must not re-arm the detector.
    location::ingest(&pool, &events, runner, task.id, sample_at(lat_offset(500.0), 0.0, 200))
        .await
        .expect("ingest");
    location::ingest(&pool, &events, runner, task.id, sample_at(lat_offset(60.0), 0.0, 50))
        .await
        .expect("ingest");
    assert_eq!(alert_count(&pool, task.id).await, 1);

    // The stale sample is still kept in the audit log.
    assert_eq!(sample_count(&pool, task.id).await, 3);
}

#[sqlx::test]
async fn failed_alert_write_leaves_the_geofence_rearmed(pool: PgPool) {
    let events = EventBus::new();
    let (task, _creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    // Make the alert insert fail, standing in for a transient storage
    // error at the worst possible moment.
    sqlx::query(
        "ALTER TABLE proximity_alerts ADD CONSTRAINT alerts_unwritable CHECK (distance_meters > 100000)",
    )
    .execute(&pool)
    .await
    .expect("add constraint");

    let err = location::ingest(&pool, &events, runner, task.id, sample_at(lat_offset(50.0), 0.0, 60))
        .await
        .expect_err("alert write failure surfaces to the caller");
    assert!(matches!(err, AppError::Database(_)));
    assert_eq!(alert_count(&pool, task.id).await, 0);

    sqlx::query("ALTER TABLE proximity_alerts DROP CONSTRAINT alerts_unwritable")
        .execute(&pool)
        .await
        .expect("drop constraint");

    // The zone flip rolled back together with the failed insert, so the
    // next in-radius sample still counts as a fresh approach.
    location::ingest(&pool, &events, runner, task.id, sample_at(lat_offset(50.0), 0.0, 30))
        .await
        .expect("ingest");
    assert_eq!(alert_count(&pool, task.id).await, 1);
}

#[sqlx::test]
async fn future_clock_skew_cannot_freeze_the_geofence(pool: PgPool) {
    let events = EventBus::new();
    let (task, _creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    // A device clock an hour ahead reports from outside the radius.
    let mut skewed = sample_now(lat_offset(500.0), 0.0);
    skewed.recorded_at = Some(Utc::now() + Duration::hours(1));
    let stored = location::ingest(&pool, &events, runner, task.id, skewed)
        .await
        .expect("ingest");
    assert!(
        stored.recorded_at <= Utc::now() + Duration::seconds(5),
        "future timestamp must be clamped to server time"
    );

    // Honestly-timestamped samples that follow must not be dropped as
    // stale behind the skewed watermark.
    location::ingest(&pool, &events, runner, task.id, sample_now(lat_offset(50.0), 0.0))
        .await
        .expect("ingest");
    assert_eq!(alert_count(&pool, task.id).await, 1);
}

#[sqlx::test]
async fn threshold_setting_is_read_live(pool: PgPool) {
    let events = EventBus::new();
    let (task, _creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    assert_eq!(proximity::alert_threshold_meters(&pool).await.unwrap(), 100.0);

    // Operator tightens the radius; a 150m approach no longer fires.
    sqlx::query("UPDATE admin_settings SET value = '50' WHERE key = 'proximity_alert_distance'")
        .execute(&pool)
        .await
        .expect("update setting");

    location::ingest(&pool, &events, runner, task.id, sample_at(lat_offset(80.0), 0.0, 60))
        .await
        .expect("ingest");
    assert_eq!(alert_count(&pool, task.id).await, 0);

    location::ingest(&pool, &events, runner, task.id, sample_at(lat_offset(30.0), 0.0, 30))
        .await
        .expect("ingest");
    assert_eq!(alert_count(&pool, task.id).await, 1);
}

#[sqlx::test]
async fn tasks_without_pickup_are_ingested_but_not_evaluated(pool: PgPool) {
    let events = EventBus::new();
    let (task, _creator, runner) = in_progress_task(&pool, None).await;

    location::ingest(&pool, &events, runner, task.id, sample_at(6.5244, 3.3792, 0))
        .await
        .expect("ingest without pickup must not error");

    assert_eq!(sample_count(&pool, task.id).await, 1);
    assert_eq!(alert_count(&pool, task.id).await, 0);
}

#[sqlx::test]
async fn ingest_rejects_invalid_coordinates(pool: PgPool) {
    let events = EventBus::new();
    let (task, _creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    let err = location::ingest(&pool, &events, runner, task.id, sample_at(91.0, 0.0, 0))
        .await
        .expect_err("latitude out of range");
    assert!(matches!(err, AppError::InvalidCoordinate { .. }));

    let err = location::ingest(&pool, &events, runner, task.id, sample_at(0.0, -180.5, 0))
        .await
        .expect_err("longitude out of range");
    assert!(matches!(err, AppError::InvalidCoordinate { .. }));

    // Nothing was persisted.
    assert_eq!(sample_count(&pool, task.id).await, 0);
}

#[sqlx::test]
async fn ingest_enforces_runner_and_status(pool: PgPool) {
    let events = EventBus::new();
    let (task, creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    // Only the assigned runner may report positions.
    let err = location::ingest(&pool, &events, creator, task.id, sample_at(0.001, 0.0, 0))
        .await
        .expect_err("creator cannot report location");
    assert!(matches!(err, AppError::Forbidden(_)));

    // Terminal task stops accepting samples.
    tasks::cancel_task(&pool, creator, task.id).await.expect("cancel");
    let err = location::ingest(&pool, &events, runner, task.id, sample_at(0.001, 0.0, 0))
        .await
        .expect_err("cancelled task is not trackable");
    assert!(matches!(err, AppError::TaskNotTrackable(_)));

    assert_eq!(sample_count(&pool, task.id).await, 0);
}

#[sqlx::test]
async fn generate_is_idempotent_while_active(pool: PgPool) {
    let events = EventBus::new();
    let (task, creator, _runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    let first = completion::generate(&pool, &events, creator, task.id).await.expect("generate");
    let second = completion::generate(&pool, &events, creator, task.id).await.expect("generate");

    assert_eq!(first.code, second.code);
    assert_eq!(first.id, second.id);
    assert_eq!(first.code.len(), 6);

    let active = completion::active_code(&pool, creator, task.id)
        .await
        .expect("active code")
        .expect("one active code");
    assert_eq!(active.code, first.code);
}

#[sqlx::test]
async fn generate_is_gated_by_role_and_status(pool: PgPool) {
    let events = EventBus::new();
    let creator = Uuid::new_v4();

    let task = tasks::create_task(
        &pool,
        creator,
        CreateTaskRequest {
            title: "Deliver documents".to_string(),
            description: None,
            budget: None,
            pickup_latitude: None,
            pickup_longitude: None,
        },
    )
    .await
    .expect("create");

    // Posted tasks have no runner yet; no code can exist.
    let err = completion::generate(&pool, &events, creator, task.id)
        .await
        .expect_err("posted task is not trackable");
    assert!(matches!(err, AppError::TaskNotTrackable(_)));

    let runner = Uuid::new_v4();
    tasks::assign_runner(&pool, creator, task.id, runner).await.expect("assign");

    let err = completion::generate(&pool, &events, runner, task.id)
        .await
        .expect_err("runner may not mint codes");
    assert!(matches!(err, AppError::Forbidden(_)));

    completion::generate(&pool, &events, creator, task.id)
        .await
        .expect("creator may mint once accepted");
}

#[sqlx::test]
async fn redeem_consumes_the_code_exactly_once(pool: PgPool) {
    let events = EventBus::new();
    let (task, creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    let code = completion::generate(&pool, &events, creator, task.id).await.expect("generate");

    let first = completion::redeem(&pool, &events, runner, task.id, &code.code)
        .await
        .expect("redeem");
    assert!(first);

    let task_after = tasks::fetch_task(&pool, task.id).await.expect("fetch");
    assert_eq!(task_after.current_status().unwrap(), TaskStatus::Completed);

    // Same code again: routine failure, task untouched.
    let second = completion::redeem(&pool, &events, runner, task.id, &code.code)
        .await
        .expect("redeem");
    assert!(!second);

    let task_after = tasks::fetch_task(&pool, task.id).await.expect("fetch");
    assert_eq!(task_after.current_status().unwrap(), TaskStatus::Completed);
}

#[sqlx::test]
async fn redeem_tolerates_whitespace_and_case(pool: PgPool) {
    let events = EventBus::new();
    let (task, creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    let code = completion::generate(&pool, &events, creator, task.id).await.expect("generate");
    let typed = format!("  {}  ", code.code.to_lowercase());

    let ok = completion::redeem(&pool, &events, runner, task.id, &typed)
        .await
        .expect("redeem");
    assert!(ok);
}

#[sqlx::test]
async fn expired_codes_are_inert(pool: PgPool) {
    let events = EventBus::new();
    let (task, _creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    sqlx::query(
        "INSERT INTO completion_codes (task_id, code, generated_at, expires_at) \
         VALUES ($1, 'AAA111', NOW() - INTERVAL '25 hours', NOW() - INTERVAL '1 hour')",
    )
    .bind(task.id)
    .execute(&pool)
    .await
    .expect("seed expired code");

    let ok = completion::redeem(&pool, &events, runner, task.id, "AAA111")
        .await
        .expect("redeem");
    assert!(!ok);

    let task_after = tasks::fetch_task(&pool, task.id).await.expect("fetch");
    assert_eq!(task_after.current_status().unwrap(), TaskStatus::InProgress);
}

#[sqlx::test]
async fn wrong_code_is_a_routine_false(pool: PgPool) {
    let events = EventBus::new();
    let (task, creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    completion::generate(&pool, &events, creator, task.id).await.expect("generate");

    let ok = completion::redeem(&pool, &events, runner, task.id, "WRONG1")
        .await
        .expect("redeem");
    assert!(!ok);

    let err = completion::redeem(&pool, &events, creator, task.id, "WRONG1")
        .await
        .expect_err("creator may not redeem");
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[sqlx::test]
async fn concurrent_redemptions_have_exactly_one_winner(pool: PgPool) {
    let events = EventBus::new();
    let (task, creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    let code = completion::generate(&pool, &events, creator, task.id).await.expect("generate");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let events = events.clone();
        let code = code.code.clone();
        let task_id = task.id;
        handles.push(tokio::spawn(async move {
            completion::redeem(&pool, &events, runner, task_id, &code).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.expect("join").expect("redeem") {
            successes += 1;
        }
    }
    assert_eq!(successes, 1, "exactly one concurrent redemption must win");

    let task_after = tasks::fetch_task(&pool, task.id).await.expect("fetch");
    assert_eq!(task_after.current_status().unwrap(), TaskStatus::Completed);

    let used: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM completion_codes WHERE task_id = $1 AND is_used")
            .bind(task.id)
            .fetch_one(&pool)
            .await
            .expect("count used");
    assert_eq!(used, 1);
}

#[sqlx::test]
async fn redemption_attempts_are_rate_limited(pool: PgPool) {
    let events = EventBus::new();
    let (task, _creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    let mut limited = false;
    for i in 0..30 {
        match completion::redeem(&pool, &events, runner, task.id, &format!("GU{i:04}")).await {
            Ok(false) => {}
            Ok(true) => panic!("guess must not succeed"),
            Err(AppError::RateLimited) => {
                limited = true;
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(limited, "brute-force guessing must hit the throttle");
}

#[sqlx::test]
async fn acknowledgment_flags_are_per_party(pool: PgPool) {
    let events = EventBus::new();
    let (task, creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    location::ingest(&pool, &events, runner, task.id, sample_at(lat_offset(40.0), 0.0, 0))
        .await
        .expect("ingest");
    let alerts = proximity::list_alerts(&pool, creator, task.id).await.expect("list");
    let alert = &alerts[0];

    let after_runner = proximity::acknowledge_alert(&pool, runner, alert.id).await.expect("ack");
    assert!(after_runner.acknowledged_by_runner);
    assert!(!after_runner.acknowledged_by_creator);

    let after_creator = proximity::acknowledge_alert(&pool, creator, alert.id).await.expect("ack");
    assert!(after_creator.acknowledged_by_runner);
    assert!(after_creator.acknowledged_by_creator);

    let stranger = Uuid::new_v4();
    let err = proximity::acknowledge_alert(&pool, stranger, alert.id)
        .await
        .expect_err("strangers may not acknowledge");
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[sqlx::test]
async fn location_reads_are_participant_only(pool: PgPool) {
    let events = EventBus::new();
    let (task, creator, runner) = in_progress_task(&pool, Some((0.0, 0.0))).await;

    for i in 0..3 {
        location::ingest(
            &pool,
            &events,
            runner,
            task.id,
            sample_at(lat_offset(200.0 + f64::from(i) * 10.0), 0.0, 60 - i64::from(i) * 10),
        )
        .await
        .expect("ingest");
    }

    let latest = location::latest_location(&pool, creator, task.id)
        .await
        .expect("latest")
        .expect("has samples");
    assert!((latest.latitude - lat_offset(220.0)).abs() < 1e-9);

    let history = location::location_history(&pool, runner, task.id, Some(2))
        .await
        .expect("history");
    assert_eq!(history.len(), 2);

    let stranger = Uuid::new_v4();
    let err = location::latest_location(&pool, stranger, task.id)
        .await
        .expect_err("strangers may not read tracking data");
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[sqlx::test]
async fn lagos_walk_end_to_end(pool: PgPool) {
    let events = EventBus::new();
    let pickup = (6.5244, 3.3792);
    let (task, creator, runner) = in_progress_task(&pool, Some(pickup)).await;

    // Runner walks in from ~2km; nothing fires until the 100m threshold.
    let approach_meters = [2000.0, 1000.0, 500.0, 300.0, 150.0, 90.0, 30.0];
    let mut alerts_seen = 0;
    for (i, meters) in approach_meters.iter().enumerate() {
        location::ingest(
            &pool,
            &events,
            runner,
            task.id,
            sample_at(pickup.0 + lat_offset(*meters), pickup.1, (10 - i as i64) * 10),
        )
        .await
        .expect("ingest");

        let count = alert_count(&pool, task.id).await;
        if *meters > 100.0 {
            assert_eq!(count, 0, "no alert expected at {meters}m");
        } else {
            alerts_seen = count;
        }
    }
    assert_eq!(alerts_seen, 1, "exactly one alert for the whole approach");

    // Creator mints the code and reads it back out-of-band.
    let code = completion::generate(&pool, &events, creator, task.id).await.expect("generate");
    assert!(code.expires_at > Utc::now());

    // Runner types it in; handoff complete.
    let ok = completion::redeem(&pool, &events, runner, task.id, &code.code)
        .await
        .expect("redeem");
    assert!(ok);

    let done = tasks::fetch_task(&pool, task.id).await.expect("fetch");
    assert_eq!(done.current_status().unwrap(), TaskStatus::Completed);

    // Completed tasks stop tracking and minting.
    let err = location::ingest(&pool, &events, runner, task.id, sample_at(pickup.0, pickup.1, 999))
        .await
        .expect_err("completed task is not trackable");
    assert!(matches!(err, AppError::TaskNotTrackable(_)));

    let err = completion::generate(&pool, &events, creator, task.id)
        .await
        .expect_err("completed task mints no codes");
    assert!(matches!(err, AppError::TaskNotTrackable(_)));
}
