use std::sync::Arc;

use maproom::services::persistence;
use maproom::state::{AppState, SessionState};
use maproom::store::MapStore;
use maproom::store::pg::PgStore;
use maproom::{db, routes};
use tokio::sync::RwLock;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let pool = db::init_pool(&database_url)
        .await
        .expect("database init failed");
    let caps = db::probe_capabilities(&pool)
        .await
        .expect("schema capability probe failed");
    tracing::info!(
        has_floors = caps.has_floors,
        has_cover_floor_ref = caps.has_cover_floor_ref,
        "store capabilities probed"
    );

    let store: Arc<dyn MapStore> = Arc::new(PgStore::new(pool, caps));

    // Serving with unknown state is unacceptable for an authoritative server,
    // so a failed initial load is fatal.
    let session = SessionState::load(store.as_ref())
        .await
        .expect("initial session load failed");
    tracing::info!(battlemaps = session.order.len(), "session state loaded");

    let persist_tx = persistence::spawn_persistence_worker(store.clone());
    // No grid detector ships in this build: detection is an optional
    // image-analysis collaborator plugged in behind `GridDetector`. Until
    // one is wired here, maps stay uncalibrated until a client submits
    // grid data by hand.
    let state = AppState::new(Arc::new(RwLock::new(session)), store, persist_tx, None);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "maproom listening");
    axum::serve(listener, app).await.expect("server failed");
}
