//! Shared application state and the in-memory session model.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. The
//! session model — battlemap arena, token maps, and the connection sender
//! registry — lives behind a single `RwLock`. Every mutation runs to
//! completion under one write guard, so structural invariants (a battlemap
//! never loses its last floor, cover clamps never half-apply) hold without
//! any finer-grained locking.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::protocol::ServerMessage;
use crate::services::grid::GridDetector;
use crate::services::persistence::PersistCmd;
use crate::store::{MapStore, StoreCapabilities, StoreError};

/// Default cover fill when the client does not pick one.
pub const DEFAULT_COVER_COLOR: &str = "#808080";

/// Name given to floors synthesized for battlemaps that have none.
pub const DEFAULT_FLOOR_NAME: &str = "Ground";

/// Name of the battlemap seeded into an empty store.
pub const DEFAULT_BATTLEMAP_NAME: &str = "New battlemap";

// =============================================================================
// DOMAIN TYPES
// =============================================================================

/// A point in percent-of-image space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Image center, the default spawn point for fresh tokens.
    #[must_use]
    pub fn center() -> Self {
        Self { x: 50.0, y: 50.0 }
    }
}

/// Token footprint classes, D&D style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSize {
    Tiny,
    Small,
    #[default]
    Medium,
    Large,
    Huge,
    Gargantuan,
}

/// Detected (or synthesized) grid line geometry in source-image pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GridData {
    pub vertical: Vec<f64>,
    pub horizontal: Vec<f64>,
    pub width: f64,
    pub height: f64,
}

/// One image layer within a battlemap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Floor {
    pub id: Uuid,
    pub battlemap_id: Uuid,
    pub name: String,
    pub map_path: Option<String>,
    pub sort_index: i32,
}

/// An opaque occluder rectangle. All coordinates are percentages of image
/// space; `clamped` is the only way a cover ever enters the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cover {
    pub id: Uuid,
    pub floor_id: Option<Uuid>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub color: String,
}

impl Cover {
    /// Enforce `x + width <= 100` and `y + height <= 100`: width/height are
    /// clamped to [0, 100] first, then x/y into the remaining range.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.width = self.width.clamp(0.0, 100.0);
        self.height = self.height.clamp(0.0, 100.0);
        self.x = self.x.clamp(0.0, 100.0 - self.width);
        self.y = self.y.clamp(0.0, 100.0 - self.height);
        self
    }
}

/// A named map collection: floors, covers, and grid calibration.
#[derive(Debug, Clone)]
pub struct Battlemap {
    pub id: Uuid,
    pub name: String,
    /// Legacy single-image field, always mirroring the active floor's path.
    pub map_path: Option<String>,
    pub floors: Vec<Floor>,
    pub active_floor_id: Option<Uuid>,
    pub grid_scale: f64,
    pub grid_offset_x: f64,
    pub grid_offset_y: f64,
    pub grid_data: Option<GridData>,
    pub covers: HashMap<Uuid, Cover>,
    pub sort_index: i32,
}

impl Battlemap {
    /// Create a battlemap. A default floor is created only when an image
    /// path is supplied; a battlemap created without one stays floorless
    /// until its first `add_floor`, which then takes the active slot.
    #[must_use]
    pub fn new(name: impl Into<String>, map_path: Option<String>) -> Self {
        let mut bm = Self {
            id: Uuid::new_v4(),
            name: name.into(),
            map_path,
            floors: Vec::new(),
            active_floor_id: None,
            grid_scale: 1.0,
            grid_offset_x: 0.0,
            grid_offset_y: 0.0,
            grid_data: None,
            covers: HashMap::new(),
            sort_index: 0,
        };
        if bm.map_path.is_some() {
            bm.backfill_floor();
        }
        bm
    }

    /// Give a floorless battlemap one default floor carrying the legacy
    /// image path, and make it active.
    pub fn backfill_floor(&mut self) {
        let floor = Floor {
            id: Uuid::new_v4(),
            battlemap_id: self.id,
            name: DEFAULT_FLOOR_NAME.into(),
            map_path: self.map_path.clone(),
            sort_index: 0,
        };
        self.active_floor_id = Some(floor.id);
        self.floors.push(floor);
    }

    #[must_use]
    pub fn floor(&self, floor_id: Uuid) -> Option<&Floor> {
        self.floors.iter().find(|f| f.id == floor_id)
    }

    pub fn floor_mut(&mut self, floor_id: Uuid) -> Option<&mut Floor> {
        self.floors.iter_mut().find(|f| f.id == floor_id)
    }

    #[must_use]
    pub fn active_floor(&self) -> Option<&Floor> {
        self.active_floor_id.and_then(|id| self.floor(id))
    }

    /// Re-mirror the legacy single-image path from the active floor.
    pub fn sync_legacy_path(&mut self) {
        self.map_path = self.active_floor().and_then(|f| f.map_path.clone());
    }

    /// Covers visible on the active floor. Covers without a floor reference
    /// (legacy rows) are always visible.
    #[must_use]
    pub fn visible_covers(&self) -> Vec<Cover> {
        self.covers
            .values()
            .filter(|c| c.floor_id.is_none() || c.floor_id == self.active_floor_id)
            .cloned()
            .collect()
    }
}

/// A participant's visual marker. Live tokens are keyed by connection id in
/// the session (manual tokens by a synthetic key); ghosts by persistent id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserToken {
    pub persistent_id: String,
    pub color: String,
    pub position: Position,
    pub avatar: Option<String>,
    pub size: TokenSize,
    pub is_display: bool,
    /// Created by `token.add` rather than a connection; never ghosts.
    pub manual: bool,
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// The single in-memory source of truth, guarded by one `RwLock`.
pub struct SessionState {
    /// User-visible battlemap ordering.
    pub order: Vec<Uuid>,
    pub battlemaps: HashMap<Uuid, Battlemap>,
    /// Battlemap currently shown on the shared display.
    pub active_battlemap: Option<Uuid>,
    /// Live tokens keyed by connection id (synthetic ids for manual tokens).
    pub users: HashMap<Uuid, UserToken>,
    /// Disconnected tokens retained for reconnection, keyed by persistent id.
    pub ghosts: HashMap<String, UserToken>,
    /// Connected clients: connection id -> sender for outgoing messages.
    pub clients: HashMap<Uuid, mpsc::Sender<ServerMessage>>,
}

impl SessionState {
    /// Hydrate the session from the store. Seeds one battlemap if the store
    /// is empty and backfills a floor for any battlemap that has none (in
    /// legacy mode the backfilled floor is synthetic and never persisted).
    ///
    /// # Errors
    ///
    /// Returns the store error unchanged; startup treats this as fatal.
    pub async fn load(store: &dyn MapStore) -> Result<Self, StoreError> {
        let caps = store.capabilities();
        let mut battlemaps = store.load_battlemaps().await?;

        if battlemaps.is_empty() {
            let seeded = Battlemap::new(DEFAULT_BATTLEMAP_NAME, None);
            store.upsert_battlemap(&seeded).await?;
            battlemaps.push(seeded);
        }

        for bm in &mut battlemaps {
            if bm.floors.is_empty() {
                bm.backfill_floor();
                if caps.has_floors {
                    for floor in &bm.floors {
                        store.upsert_floor(floor).await?;
                    }
                }
            }
            if bm.active_floor().is_none() {
                bm.active_floor_id = bm.floors.first().map(|f| f.id);
            }
            bm.sync_legacy_path();
        }

        let order: Vec<Uuid> = battlemaps.iter().map(|bm| bm.id).collect();
        let active_battlemap = order.first().copied();
        let battlemaps = battlemaps.into_iter().map(|bm| (bm.id, bm)).collect();

        Ok(Self {
            order,
            battlemaps,
            active_battlemap,
            users: HashMap::new(),
            ghosts: HashMap::new(),
            clients: HashMap::new(),
        })
    }

    /// Live tokens visible to other participants (display consoles are not
    /// tokens).
    #[must_use]
    pub fn visible_users(&self) -> Vec<UserToken> {
        self.users.values().filter(|u| !u.is_display).cloned().collect()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — all inner fields are Arc-wrapped or Copy.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<RwLock<SessionState>>,
    pub store: Arc<dyn MapStore>,
    pub caps: StoreCapabilities,
    /// One-way queue into the persistence worker.
    pub persist_tx: mpsc::Sender<PersistCmd>,
    /// Optional grid-detection collaborator. `None` disables reconciliation.
    pub detector: Option<Arc<dyn GridDetector>>,
}

impl AppState {
    #[must_use]
    pub fn new(
        session: Arc<RwLock<SessionState>>,
        store: Arc<dyn MapStore>,
        persist_tx: mpsc::Sender<PersistCmd>,
        detector: Option<Arc<dyn GridDetector>>,
    ) -> Self {
        let caps = store.capabilities();
        Self { session, store, caps, persist_tx, detector }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
