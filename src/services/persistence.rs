//! Persistence service — one-way command queue into a background writer.
//!
//! DESIGN
//! ======
//! Mutations enqueue full-entity snapshots on a bounded channel and return
//! immediately; a single worker drains the queue and writes through the
//! store adapter. Because every mutation re-enqueues the complete current
//! state of its entity, ordering only matters per entity and the contract
//! is last-write-wins.
//!
//! ERROR HANDLING
//! ==============
//! A failed write is logged and dropped: the request it belonged to was
//! acked long ago, so there is nobody left to tell. In-memory state stays
//! the accepted truth until the next write of the same entity supersedes
//! the loss.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::state::{AppState, Battlemap};
use crate::store::MapStore;

const DEFAULT_PERSIST_QUEUE_CAPACITY: usize = 1024;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Outbound persistence command. Saves carry the full entity snapshot.
#[derive(Debug, Clone)]
pub enum PersistCmd {
    SaveBattlemap(Battlemap),
    DeleteBattlemap(Uuid),
    DeleteFloor(Uuid),
    DeleteCover(Uuid),
    SaveOrder(Vec<Uuid>),
}

impl PersistCmd {
    /// Entity label for log lines.
    #[must_use]
    pub fn entity(&self) -> &'static str {
        match self {
            Self::SaveBattlemap(_) | Self::DeleteBattlemap(_) => "battlemap",
            Self::DeleteFloor(_) => "floor",
            Self::DeleteCover(_) => "cover",
            Self::SaveOrder(_) => "order",
        }
    }
}

/// Spawn the persistence worker and return its queue sender.
#[must_use]
pub fn spawn_persistence_worker(store: Arc<dyn MapStore>) -> mpsc::Sender<PersistCmd> {
    let capacity = env_parse("PERSIST_QUEUE_CAPACITY", DEFAULT_PERSIST_QUEUE_CAPACITY);
    let (tx, mut rx) = mpsc::channel::<PersistCmd>(capacity);
    info!(capacity, "persistence worker configured");

    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            apply(store.as_ref(), cmd).await;
        }
    });

    tx
}

/// Best-effort, non-blocking enqueue. Never awaited on the hot path.
pub fn enqueue(state: &AppState, cmd: PersistCmd) {
    match state.persist_tx.try_send(cmd) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(cmd)) => {
            warn!(entity = cmd.entity(), "persist queue full; dropping write");
        }
        Err(mpsc::error::TrySendError::Closed(cmd)) => {
            warn!(entity = cmd.entity(), "persist queue closed; dropping write");
        }
    }
}

async fn apply(store: &dyn MapStore, cmd: PersistCmd) {
    let entity = cmd.entity();
    let result = match cmd {
        PersistCmd::SaveBattlemap(bm) => store.upsert_battlemap(&bm).await,
        PersistCmd::DeleteBattlemap(id) => store.delete_battlemap(id).await,
        PersistCmd::DeleteFloor(id) => store.delete_floor(id).await,
        PersistCmd::DeleteCover(id) => store.delete_cover(id).await,
        PersistCmd::SaveOrder(ids) => store.save_order(&ids).await,
    };
    if let Err(e) = result {
        error!(error = %e, entity, "persistence write failed; in-memory state retained");
    }
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
