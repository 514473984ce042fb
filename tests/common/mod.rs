//! Shared test helpers for integration tests.

#![allow(dead_code)]

use rapd_panel::config::{DatabaseConfig, PanelConfig};
use rapd_panel::db::Database;
use std::sync::Once;

pub const DATADIR: &str = "/gpfs3/users/necat/Guest_Apr11";

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// One-time schema initialization.
static SCHEMA_INIT: Once = Once::new();

/// Ensure the test database schema is set up (runs migrations once per test binary).
pub fn ensure_schema() {
    SCHEMA_INIT.call_once(|| {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let pool = sqlx::PgPool::connect(&test_db_url()).await.unwrap();
            run_migrations(&pool).await;
        });
    });
}

/// Connect to the test database with clean tables.
pub async fn setup_test_db() -> Database {
    ensure_schema();
    let db = Database::connect(&test_db_url(), &DatabaseConfig::default())
        .await
        .expect("Failed to connect to test database");
    truncate_all_tables(db.pool()).await;
    db
}

/// Build an Axum test app router plus a handle on the same database for seeding.
pub async fn build_test_app() -> (axum::Router, Database) {
    build_test_app_with(PanelConfig::default()).await
}

pub async fn build_test_app_with(config: PanelConfig) -> (axum::Router, Database) {
    let db = setup_test_db().await;
    let state = rapd_panel::dashboard::AppState::with_db(db.clone(), config);
    (rapd_panel::dashboard::build_router(state, None), db)
}

/// Truncate all tables and re-seed the dispatcher state row.
pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql(
        "TRUNCATE TABLE results, result_cursor, single_results, pair_results, integrate_results,
                       integrate_shell_results, merge_results, sad_results, mr_results,
                       processes, images, cloud_requests, cloud_current, cloud_complete,
                       cloud_state, current, presets, settings,
                       status_dataserver, status_controller, status_cluster
         RESTART IDENTITY CASCADE",
    )
    .execute(pool)
    .await
    .unwrap();

    sqlx::raw_sql("INSERT INTO cloud_state (id) VALUES (1)")
        .execute(pool)
        .await
        .unwrap();
}

/// Run every migration under `migrations/` in name order.
async fn run_migrations(pool: &sqlx::PgPool) {
    let mut files: Vec<_> = std::fs::read_dir("migrations")
        .expect("migrations directory not found")
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map(|x| x == "sql").unwrap_or(false))
        .collect();
    files.sort();

    for path in &files {
        let sql = std::fs::read_to_string(path).unwrap();
        sqlx::raw_sql(&sql).execute(pool).await.unwrap_or_else(|e| {
            panic!("Migration {} failed: {}", path.display(), e);
        });
    }
}

// ── Seeding ─────────────────────────────────────────────────────

/// Insert a single-image result with the given strategy statuses.
/// Returns `(result_id, single_result_id)`.
pub async fn seed_single(
    pool: &sqlx::PgPool,
    dir: &str,
    process_id: i64,
    best: Option<&str>,
    stac: Option<&str>,
) -> (i64, i64) {
    let detail_id: i64 = sqlx::query_scalar(
        "INSERT INTO single_results (repr, type, best_norm_status, mosflm_norm_status,
                                     summary_stac, fullname, adsc_number)
         VALUES ('snap_1_001.img', 'normal', $1, 'FAILED', $2,
                 '/data/snap_1_001.img', '1')
         RETURNING single_result_id",
    )
    .bind(best)
    .bind(stac)
    .fetch_one(pool)
    .await
    .unwrap();
    let result_id = seed_result(pool, "single", detail_id, process_id, dir).await;
    (result_id, detail_id)
}

/// Insert an integrate result in `status`, `age_secs` old.
/// Returns `(result_id, integrate_result_id)`.
pub async fn seed_integrate(
    pool: &sqlx::PgPool,
    dir: &str,
    process_id: i64,
    status: &str,
    age_secs: i64,
) -> (i64, i64) {
    seed_integrate_aged(pool, dir, process_id, status, age_secs as f64).await
}

/// Like [`seed_integrate`] with a fractional age.
pub async fn seed_integrate_aged(
    pool: &sqlx::PgPool,
    dir: &str,
    process_id: i64,
    status: &str,
    age_secs: f64,
) -> (i64, i64) {
    let detail_id: i64 = sqlx::query_scalar(
        "INSERT INTO integrate_results (data_root_dir, integrate_status, repr, timestamp)
         VALUES ($1, $2, 'run_1', NOW() - make_interval(secs => $3))
         RETURNING integrate_result_id",
    )
    .bind(dir)
    .bind(status)
    .bind(age_secs)
    .fetch_one(pool)
    .await
    .unwrap();
    let result_id = seed_result(pool, "integrate", detail_id, process_id, dir).await;
    (result_id, detail_id)
}

pub async fn seed_result(
    pool: &sqlx::PgPool,
    kind: &str,
    detail_id: i64,
    process_id: i64,
    dir: &str,
) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO results (kind, id, process_id, data_root_dir)
         VALUES ($1, $2, $3, $4) RETURNING result_id",
    )
    .bind(kind)
    .bind(detail_id)
    .bind(process_id)
    .bind(dir)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn seed_process(pool: &sqlx::PgPool, kind: &str, dir: &str) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO processes (kind, repr, data_root_dir)
         VALUES ($1, 'pending', $2) RETURNING process_id",
    )
    .bind(kind)
    .bind(dir)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn result_seq(pool: &sqlx::PgPool, result_id: i64) -> i64 {
    sqlx::query_scalar("SELECT seq FROM results WHERE result_id = $1")
        .bind(result_id)
        .fetch_one(pool)
        .await
        .unwrap()
}
