//! Database initialization and schema capability probing.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup creates the shared SQLx pool, optionally runs migrations, and
//! probes what the schema supports. Deployments with an externally managed
//! (possibly older) schema set `SKIP_MIGRATIONS=1`; the probe then decides
//! whether the server runs in full or legacy mode instead of failing.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::store::StoreCapabilities;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

fn db_max_connections() -> u32 {
    std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
}

fn skip_migrations() -> bool {
    std::env::var("SKIP_MIGRATIONS").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Initialize the `PostgreSQL` connection pool and run migrations unless
/// `SKIP_MIGRATIONS` is set.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(db_max_connections())
        .connect(database_url)
        .await?;

    if skip_migrations() {
        tracing::info!("migrations skipped; relying on externally managed schema");
    } else {
        sqlx::migrate!("src/db/migrations").run(&pool).await?;
    }

    Ok(pool)
}

/// Probe what the schema supports, once, at startup. Branching happens on
/// the returned capability set, never on error-message matching.
///
/// # Errors
///
/// Returns an error if the catalog queries fail.
pub async fn probe_capabilities(pool: &PgPool) -> Result<StoreCapabilities, sqlx::Error> {
    let has_floors: bool = sqlx::query_scalar(
        "SELECT EXISTS(
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name = 'floors'
        )",
    )
    .fetch_one(pool)
    .await?;

    let has_cover_floor_ref: bool = sqlx::query_scalar(
        "SELECT EXISTS(
            SELECT 1 FROM information_schema.columns
            WHERE table_schema = current_schema()
              AND table_name = 'covers' AND column_name = 'floor_id'
        )",
    )
    .fetch_one(pool)
    .await?;

    Ok(StoreCapabilities { has_floors, has_cover_floor_ref })
}
