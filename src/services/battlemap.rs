//! Mutation gateway — validated battlemap/floor/cover operations.
//!
//! DESIGN
//! ======
//! One function per mutation kind. Each checks the caller's mutator
//! capability, validates referenced ids and structural invariants under the
//! session write lock, applies the change, and enqueues a fire-and-forget
//! persistence command. The returned snapshot is what the caller broadcasts;
//! acks never wait for storage.
//!
//! ERROR HANDLING
//! ==============
//! Every failure is a typed `GatewayError` mapped onto the wire error kinds.
//! A rejected operation leaves the session untouched — validation happens
//! before any field is written.

use uuid::Uuid;

use crate::protocol::{BattlemapSnapshot, CoverInput, CoverPatch, ErrorKind};
use crate::services::broadcast::battlemap_snapshot;
use crate::services::persistence::{self, PersistCmd};
use crate::state::{AppState, Battlemap, Cover, Floor, GridData, DEFAULT_COVER_COLOR};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("battlemap not found: {0}")]
    BattlemapNotFound(Uuid),
    #[error("floor not found: {0}")]
    FloorNotFound(Uuid),
    #[error("cover not found: {0}")]
    CoverNotFound(Uuid),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("battlemap mutator capability required")]
    Forbidden,
    #[error("{0}")]
    InvalidInput(String),
    #[error("floor support not available in this store")]
    Unsupported,
}

impl GatewayError {
    /// Wire error kind carried on the ack channel.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BattlemapNotFound(_) | Self::FloorNotFound(_) | Self::CoverNotFound(_) | Self::UserNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::Forbidden => ErrorKind::Forbidden,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Unsupported => ErrorKind::Unsupported,
        }
    }
}

fn require_mutator(can_mutate: bool) -> Result<(), GatewayError> {
    if can_mutate { Ok(()) } else { Err(GatewayError::Forbidden) }
}

// =============================================================================
// BATTLEMAP CRUD
// =============================================================================

/// Full snapshot of one battlemap.
///
/// # Errors
///
/// `BattlemapNotFound` if the id is unknown.
pub async fn get(state: &AppState, battlemap_id: Uuid) -> Result<BattlemapSnapshot, GatewayError> {
    let session = state.session.read().await;
    let bm = session
        .battlemaps
        .get(&battlemap_id)
        .ok_or(GatewayError::BattlemapNotFound(battlemap_id))?;
    Ok(battlemap_snapshot(bm))
}

/// Create a battlemap with one initial floor. Returns the new id.
///
/// # Errors
///
/// `Forbidden` without the mutator capability.
pub async fn create(
    state: &AppState,
    can_mutate: bool,
    name: &str,
    map_path: Option<String>,
) -> Result<Uuid, GatewayError> {
    require_mutator(can_mutate)?;

    let mut bm = Battlemap::new(name, map_path);
    if !state.caps.has_floors && bm.floors.is_empty() {
        // Legacy mode keeps one synthetic floor per battlemap in memory.
        bm.backfill_floor();
    }
    let id = bm.id;
    let mut session = state.session.write().await;
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    {
        bm.sort_index = session.order.len() as i32;
    }
    session.order.push(id);
    session.battlemaps.insert(id, bm.clone());
    drop(session);

    persistence::enqueue(state, PersistCmd::SaveBattlemap(bm));
    Ok(id)
}

/// # Errors
///
/// `Forbidden` or `BattlemapNotFound`.
pub async fn rename(
    state: &AppState,
    can_mutate: bool,
    battlemap_id: Uuid,
    name: &str,
) -> Result<(), GatewayError> {
    require_mutator(can_mutate)?;

    let mut session = state.session.write().await;
    let bm = session
        .battlemaps
        .get_mut(&battlemap_id)
        .ok_or(GatewayError::BattlemapNotFound(battlemap_id))?;
    bm.name = name.to_string();
    let bm = bm.clone();
    drop(session);

    persistence::enqueue(state, PersistCmd::SaveBattlemap(bm));
    Ok(())
}

/// Delete a battlemap, cascading its floors and covers. Returns `true` when
/// the shared display's active battlemap changed as a result.
///
/// # Errors
///
/// `Forbidden` or `BattlemapNotFound`.
pub async fn delete(state: &AppState, can_mutate: bool, battlemap_id: Uuid) -> Result<bool, GatewayError> {
    require_mutator(can_mutate)?;

    let mut session = state.session.write().await;
    if !session.battlemaps.contains_key(&battlemap_id) {
        return Err(GatewayError::BattlemapNotFound(battlemap_id));
    }
    session.battlemaps.remove(&battlemap_id);
    session.order.retain(|id| *id != battlemap_id);

    let mut active_changed = false;
    if session.active_battlemap == Some(battlemap_id) {
        session.active_battlemap = session.order.first().copied();
        active_changed = true;
    }
    drop(session);

    persistence::enqueue(state, PersistCmd::DeleteBattlemap(battlemap_id));
    Ok(active_changed)
}

/// Reorder the battlemap list. The id set must match the current set
/// exactly; anything else is rejected wholesale with the order unchanged.
///
/// # Errors
///
/// `Forbidden` or `InvalidInput`.
pub async fn reorder(state: &AppState, can_mutate: bool, ordered_ids: &[Uuid]) -> Result<(), GatewayError> {
    require_mutator(can_mutate)?;

    let mut session = state.session.write().await;
    if ordered_ids.len() != session.order.len() {
        return Err(GatewayError::InvalidInput(format!(
            "reorder requires all {} battlemap ids, got {}",
            session.order.len(),
            ordered_ids.len()
        )));
    }
    let mut seen = std::collections::HashSet::new();
    for id in ordered_ids {
        if !session.battlemaps.contains_key(id) {
            return Err(GatewayError::InvalidInput(format!("unknown battlemap id in reorder: {id}")));
        }
        if !seen.insert(*id) {
            return Err(GatewayError::InvalidInput(format!("duplicate battlemap id in reorder: {id}")));
        }
    }

    session.order = ordered_ids.to_vec();
    for (i, id) in ordered_ids.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        if let Some(bm) = session.battlemaps.get_mut(id) {
            bm.sort_index = i as i32;
        }
    }
    drop(session);

    persistence::enqueue(state, PersistCmd::SaveOrder(ordered_ids.to_vec()));
    Ok(())
}

/// Switch the battlemap shown on the shared display.
///
/// # Errors
///
/// `Forbidden` or `BattlemapNotFound`.
pub async fn set_active(state: &AppState, can_mutate: bool, battlemap_id: Uuid) -> Result<(), GatewayError> {
    require_mutator(can_mutate)?;

    let mut session = state.session.write().await;
    if !session.battlemaps.contains_key(&battlemap_id) {
        return Err(GatewayError::BattlemapNotFound(battlemap_id));
    }
    session.active_battlemap = Some(battlemap_id);
    Ok(())
}

// =============================================================================
// FLOORS
// =============================================================================

fn require_floor_support(state: &AppState) -> Result<(), GatewayError> {
    if state.caps.has_floors { Ok(()) } else { Err(GatewayError::Unsupported) }
}

/// Add a floor. Returns the new floor id and the updated snapshot. The
/// first floor of a floorless battlemap becomes the active one.
///
/// # Errors
///
/// `Forbidden`, `Unsupported` in legacy mode, or `BattlemapNotFound`.
pub async fn add_floor(
    state: &AppState,
    can_mutate: bool,
    battlemap_id: Uuid,
    name: &str,
) -> Result<(Uuid, BattlemapSnapshot), GatewayError> {
    require_mutator(can_mutate)?;
    require_floor_support(state)?;

    let mut session = state.session.write().await;
    let bm = session
        .battlemaps
        .get_mut(&battlemap_id)
        .ok_or(GatewayError::BattlemapNotFound(battlemap_id))?;

    let was_floorless = bm.floors.is_empty();
    let sort_index = bm.floors.iter().map(|f| f.sort_index).max().unwrap_or(-1) + 1;
    let floor = Floor {
        id: Uuid::new_v4(),
        battlemap_id,
        name: name.to_string(),
        map_path: None,
        sort_index,
    };
    let floor_id = floor.id;
    bm.floors.push(floor);
    if was_floorless {
        bm.active_floor_id = Some(floor_id);
        bm.sync_legacy_path();
    }

    let snapshot = battlemap_snapshot(bm);
    let bm = bm.clone();
    drop(session);

    persistence::enqueue(state, PersistCmd::SaveBattlemap(bm));
    Ok((floor_id, snapshot))
}

/// # Errors
///
/// `Forbidden`, `Unsupported`, `BattlemapNotFound`, or `FloorNotFound`.
pub async fn rename_floor(
    state: &AppState,
    can_mutate: bool,
    battlemap_id: Uuid,
    floor_id: Uuid,
    name: &str,
) -> Result<BattlemapSnapshot, GatewayError> {
    require_mutator(can_mutate)?;
    require_floor_support(state)?;

    let mut session = state.session.write().await;
    let bm = session
        .battlemaps
        .get_mut(&battlemap_id)
        .ok_or(GatewayError::BattlemapNotFound(battlemap_id))?;
    let floor = bm.floor_mut(floor_id).ok_or(GatewayError::FloorNotFound(floor_id))?;
    floor.name = name.to_string();

    let snapshot = battlemap_snapshot(bm);
    let bm = bm.clone();
    drop(session);

    persistence::enqueue(state, PersistCmd::SaveBattlemap(bm));
    Ok(snapshot)
}

/// Delete a floor and the covers scoped to it. The last remaining floor of
/// a battlemap cannot be deleted. If the deleted floor was active, the
/// first remaining floor by sort index takes over.
///
/// # Errors
///
/// `Forbidden`, `Unsupported`, `BattlemapNotFound`, `FloorNotFound`, or
/// `InvalidInput` for the last floor.
pub async fn delete_floor(
    state: &AppState,
    can_mutate: bool,
    battlemap_id: Uuid,
    floor_id: Uuid,
) -> Result<BattlemapSnapshot, GatewayError> {
    require_mutator(can_mutate)?;
    require_floor_support(state)?;

    let mut session = state.session.write().await;
    let bm = session
        .battlemaps
        .get_mut(&battlemap_id)
        .ok_or(GatewayError::BattlemapNotFound(battlemap_id))?;
    if bm.floor(floor_id).is_none() {
        return Err(GatewayError::FloorNotFound(floor_id));
    }
    if bm.floors.len() == 1 {
        return Err(GatewayError::InvalidInput("cannot delete the last remaining floor".into()));
    }

    bm.floors.retain(|f| f.id != floor_id);
    bm.covers.retain(|_, c| c.floor_id != Some(floor_id));
    if bm.active_floor_id == Some(floor_id) {
        bm.active_floor_id = bm.floors.iter().min_by_key(|f| f.sort_index).map(|f| f.id);
    }
    bm.sync_legacy_path();

    let snapshot = battlemap_snapshot(bm);
    let bm = bm.clone();
    drop(session);

    // Cover rows scoped to the floor cascade in the store.
    persistence::enqueue(state, PersistCmd::DeleteFloor(floor_id));
    persistence::enqueue(state, PersistCmd::SaveBattlemap(bm));
    Ok(snapshot)
}

/// # Errors
///
/// `Forbidden`, `Unsupported`, `BattlemapNotFound`, or `FloorNotFound`.
pub async fn set_active_floor(
    state: &AppState,
    can_mutate: bool,
    battlemap_id: Uuid,
    floor_id: Uuid,
) -> Result<BattlemapSnapshot, GatewayError> {
    require_mutator(can_mutate)?;
    require_floor_support(state)?;

    let mut session = state.session.write().await;
    let bm = session
        .battlemaps
        .get_mut(&battlemap_id)
        .ok_or(GatewayError::BattlemapNotFound(battlemap_id))?;
    if bm.floor(floor_id).is_none() {
        return Err(GatewayError::FloorNotFound(floor_id));
    }
    bm.active_floor_id = Some(floor_id);
    bm.sync_legacy_path();

    let snapshot = battlemap_snapshot(bm);
    let bm = bm.clone();
    drop(session);

    persistence::enqueue(state, PersistCmd::SaveBattlemap(bm));
    Ok(snapshot)
}

/// Update a floor's image path (the active floor when no id is given; the
/// synthetic floor in legacy mode). Returns the snapshot and whether the
/// active floor's image was the one that changed.
///
/// # Errors
///
/// `Forbidden`, `BattlemapNotFound`, or `FloorNotFound`.
pub async fn update_map_path(
    state: &AppState,
    can_mutate: bool,
    battlemap_id: Uuid,
    floor_id: Option<Uuid>,
    map_path: Option<String>,
) -> Result<(BattlemapSnapshot, bool), GatewayError> {
    require_mutator(can_mutate)?;

    let mut session = state.session.write().await;
    let bm = session
        .battlemaps
        .get_mut(&battlemap_id)
        .ok_or(GatewayError::BattlemapNotFound(battlemap_id))?;

    let target_id = if state.caps.has_floors {
        match floor_id.or(bm.active_floor_id) {
            Some(id) if bm.floor(id).is_some() => id,
            Some(id) => return Err(GatewayError::FloorNotFound(id)),
            None => return Err(GatewayError::InvalidInput("battlemap has no floors".into())),
        }
    } else {
        // Legacy mode: the single synthetic floor is the only target.
        bm.floors
            .first()
            .map(|f| f.id)
            .ok_or_else(|| GatewayError::InvalidInput("battlemap has no floors".into()))?
    };

    if let Some(floor) = bm.floor_mut(target_id) {
        floor.map_path = map_path;
    }
    let affected_active = bm.active_floor_id == Some(target_id);
    bm.sync_legacy_path();

    let snapshot = battlemap_snapshot(bm);
    let bm = bm.clone();
    drop(session);

    persistence::enqueue(state, PersistCmd::SaveBattlemap(bm));
    Ok((snapshot, affected_active))
}

// =============================================================================
// CALIBRATION
// =============================================================================

/// # Errors
///
/// `Forbidden` or `BattlemapNotFound`.
pub async fn update_settings(
    state: &AppState,
    can_mutate: bool,
    battlemap_id: Uuid,
    grid_scale: Option<f64>,
    grid_offset_x: Option<f64>,
    grid_offset_y: Option<f64>,
) -> Result<BattlemapSnapshot, GatewayError> {
    require_mutator(can_mutate)?;

    let mut session = state.session.write().await;
    let bm = session
        .battlemaps
        .get_mut(&battlemap_id)
        .ok_or(GatewayError::BattlemapNotFound(battlemap_id))?;
    if let Some(scale) = grid_scale {
        bm.grid_scale = scale;
    }
    if let Some(x) = grid_offset_x {
        bm.grid_offset_x = x;
    }
    if let Some(y) = grid_offset_y {
        bm.grid_offset_y = y;
    }

    let snapshot = battlemap_snapshot(bm);
    let bm = bm.clone();
    drop(session);

    persistence::enqueue(state, PersistCmd::SaveBattlemap(bm));
    Ok(snapshot)
}

/// Replace the cached grid data wholesale (client-driven calibration).
///
/// # Errors
///
/// `Forbidden` or `BattlemapNotFound`.
pub async fn update_grid_data(
    state: &AppState,
    can_mutate: bool,
    battlemap_id: Uuid,
    grid_data: GridData,
) -> Result<BattlemapSnapshot, GatewayError> {
    require_mutator(can_mutate)?;

    let mut session = state.session.write().await;
    let bm = session
        .battlemaps
        .get_mut(&battlemap_id)
        .ok_or(GatewayError::BattlemapNotFound(battlemap_id))?;
    bm.grid_data = Some(grid_data);

    let snapshot = battlemap_snapshot(bm);
    let bm = bm.clone();
    drop(session);

    persistence::enqueue(state, PersistCmd::SaveBattlemap(bm));
    Ok(snapshot)
}

// =============================================================================
// COVERS
// =============================================================================

/// Add a cover, clamped into image space and scoped to the given floor
/// (default: the active floor; legacy mode: the whole battlemap).
///
/// # Errors
///
/// `Forbidden`, `BattlemapNotFound`, or `FloorNotFound`.
pub async fn add_cover(
    state: &AppState,
    can_mutate: bool,
    battlemap_id: Uuid,
    floor_id: Option<Uuid>,
    input: CoverInput,
) -> Result<(Uuid, BattlemapSnapshot), GatewayError> {
    require_mutator(can_mutate)?;

    let mut session = state.session.write().await;
    let bm = session
        .battlemaps
        .get_mut(&battlemap_id)
        .ok_or(GatewayError::BattlemapNotFound(battlemap_id))?;

    let scope = if state.caps.has_cover_floor_ref {
        match floor_id {
            Some(id) if bm.floor(id).is_none() => return Err(GatewayError::FloorNotFound(id)),
            Some(id) => Some(id),
            None => bm.active_floor_id,
        }
    } else {
        None
    };

    let cover = Cover {
        id: Uuid::new_v4(),
        floor_id: scope,
        x: input.x,
        y: input.y,
        width: input.width,
        height: input.height,
        color: input.color.unwrap_or_else(|| DEFAULT_COVER_COLOR.into()),
    }
    .clamped();
    let cover_id = cover.id;
    bm.covers.insert(cover_id, cover);

    let snapshot = battlemap_snapshot(bm);
    let bm = bm.clone();
    drop(session);

    persistence::enqueue(state, PersistCmd::SaveBattlemap(bm));
    Ok((cover_id, snapshot))
}

/// Apply a partial cover update, then re-clamp the whole rectangle.
///
/// # Errors
///
/// `Forbidden`, `BattlemapNotFound`, or `CoverNotFound`.
pub async fn update_cover(
    state: &AppState,
    can_mutate: bool,
    battlemap_id: Uuid,
    cover_id: Uuid,
    updates: &CoverPatch,
) -> Result<BattlemapSnapshot, GatewayError> {
    require_mutator(can_mutate)?;

    let mut session = state.session.write().await;
    let bm = session
        .battlemaps
        .get_mut(&battlemap_id)
        .ok_or(GatewayError::BattlemapNotFound(battlemap_id))?;
    let cover = bm.covers.get(&cover_id).ok_or(GatewayError::CoverNotFound(cover_id))?;

    let mut next = cover.clone();
    if let Some(x) = updates.x {
        next.x = x;
    }
    if let Some(y) = updates.y {
        next.y = y;
    }
    if let Some(width) = updates.width {
        next.width = width;
    }
    if let Some(height) = updates.height {
        next.height = height;
    }
    if let Some(color) = &updates.color {
        next.color = color.clone();
    }
    bm.covers.insert(cover_id, next.clamped());

    let snapshot = battlemap_snapshot(bm);
    let bm = bm.clone();
    drop(session);

    persistence::enqueue(state, PersistCmd::SaveBattlemap(bm));
    Ok(snapshot)
}

/// # Errors
///
/// `Forbidden`, `BattlemapNotFound`, or `CoverNotFound`.
pub async fn remove_cover(
    state: &AppState,
    can_mutate: bool,
    battlemap_id: Uuid,
    cover_id: Uuid,
) -> Result<BattlemapSnapshot, GatewayError> {
    require_mutator(can_mutate)?;

    let mut session = state.session.write().await;
    let bm = session
        .battlemaps
        .get_mut(&battlemap_id)
        .ok_or(GatewayError::BattlemapNotFound(battlemap_id))?;
    if bm.covers.remove(&cover_id).is_none() {
        return Err(GatewayError::CoverNotFound(cover_id));
    }

    let snapshot = battlemap_snapshot(bm);
    drop(session);

    persistence::enqueue(state, PersistCmd::DeleteCover(cover_id));
    Ok(snapshot)
}

#[cfg(test)]
#[path = "battlemap_test.rs"]
mod tests;
