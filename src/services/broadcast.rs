//! Broadcast layer — snapshot builders and fan-out.
//!
//! DESIGN
//! ======
//! Pure functions of session state into wire messages, plus one fan-out
//! primitive over the connection sender map. This module only ever reads
//! the session; mutation belongs to the gateway and presence services.

use uuid::Uuid;

use crate::protocol::{BattlemapListEntry, BattlemapSnapshot, ServerMessage};
use crate::state::{AppState, Battlemap, SessionState};

/// Full battlemap snapshot for `battlemap.updated` and get acks. Covers are
/// filtered to the active floor; legacy rows without a floor reference are
/// always included.
#[must_use]
pub fn battlemap_snapshot(bm: &Battlemap) -> BattlemapSnapshot {
    BattlemapSnapshot {
        id: bm.id,
        name: bm.name.clone(),
        map_path: bm.map_path.clone(),
        floors: bm.floors.clone(),
        active_floor_id: bm.active_floor_id,
        grid_scale: bm.grid_scale,
        grid_offset_x: bm.grid_offset_x,
        grid_offset_y: bm.grid_offset_y,
        grid_data: bm.grid_data.clone(),
        covers: bm.visible_covers(),
    }
}

/// Ordered list rows for the `battlemap.list` broadcast.
#[must_use]
pub fn list_entries(session: &SessionState) -> Vec<BattlemapListEntry> {
    session
        .order
        .iter()
        .filter_map(|id| session.battlemaps.get(id))
        .map(|bm| BattlemapListEntry { id: bm.id, name: bm.name.clone(), map_path: bm.map_path.clone() })
        .collect()
}

/// Build the current `battlemap.list` broadcast.
pub async fn list_message(state: &AppState) -> ServerMessage {
    let session = state.session.read().await;
    ServerMessage::BattlemapList { battlemaps: list_entries(&session) }
}

/// Build the current `battlemap.active` broadcast.
pub async fn active_message(state: &AppState) -> ServerMessage {
    let session = state.session.read().await;
    ServerMessage::BattlemapActive { battlemap_id: session.active_battlemap }
}

/// Send a message to every connected client, optionally excluding one.
pub async fn fanout(state: &AppState, message: &ServerMessage, exclude: Option<Uuid>) {
    let session = state.session.read().await;
    for (conn_id, tx) in &session.clients {
        if exclude == Some(*conn_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        let _ = tx.try_send(message.clone());
    }
}

/// Send a message to a single connection, if still present.
pub async fn send_to(state: &AppState, conn_id: Uuid, message: ServerMessage) {
    let session = state.session.read().await;
    if let Some(tx) = session.clients.get(&conn_id) {
        let _ = tx.try_send(message);
    }
}
