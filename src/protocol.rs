//! Wire protocol — tagged request/response messages.
//!
//! DESIGN
//! ======
//! Every message is an internally tagged JSON object (`"type": "..."`), one
//! variant per operation kind, validated strictly at the boundary: an
//! unknown tag, a stray payload field, or a malformed value fails
//! deserialization and is answered with an `invalid-input` ack instead of
//! being coerced. Requests carry an
//! optional `requestId` echoed back in the ack for correlation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{Cover, Floor, GridData, Position, TokenSize, UserToken};

// =============================================================================
// ERROR KINDS
// =============================================================================

/// Synchronous error outcomes returned on the ack channel. Store failures
/// are deliberately absent: background persistence detaches from the
/// request before it can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidInput,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckError {
    pub kind: ErrorKind,
    pub message: String,
}

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

/// New cover payload. Color is optional; the server fills the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CoverInput {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub color: Option<String>,
}

/// Partial cover update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CoverPatch {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "identify")]
    Identify {
        #[serde(default)]
        persistent_id: Option<String>,
        #[serde(default)]
        is_display: bool,
        #[serde(default)]
        suppress_presence: bool,
        #[serde(default)]
        allow_mutations: bool,
    },

    #[serde(rename = "battlemap.get")]
    BattlemapGet {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
    },
    #[serde(rename = "battlemap.create")]
    BattlemapCreate {
        #[serde(default)]
        request_id: Option<Uuid>,
        name: String,
        #[serde(default)]
        map_path: Option<String>,
    },
    #[serde(rename = "battlemap.rename")]
    BattlemapRename {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
        name: String,
    },
    #[serde(rename = "battlemap.delete")]
    BattlemapDelete {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
    },
    #[serde(rename = "battlemap.reorder")]
    BattlemapReorder {
        #[serde(default)]
        request_id: Option<Uuid>,
        ordered_ids: Vec<Uuid>,
    },
    #[serde(rename = "battlemap.setActive")]
    BattlemapSetActive {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
    },

    #[serde(rename = "battlemap.addFloor")]
    FloorAdd {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
        name: String,
    },
    #[serde(rename = "battlemap.renameFloor")]
    FloorRename {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
        floor_id: Uuid,
        name: String,
    },
    #[serde(rename = "battlemap.deleteFloor")]
    FloorDelete {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
        floor_id: Uuid,
    },
    #[serde(rename = "battlemap.setActiveFloor")]
    FloorSetActive {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
        floor_id: Uuid,
    },
    #[serde(rename = "battlemap.updateMapPath")]
    MapPathUpdate {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
        #[serde(default)]
        floor_id: Option<Uuid>,
        map_path: Option<String>,
    },

    #[serde(rename = "battlemap.updateSettings")]
    SettingsUpdate {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
        #[serde(default)]
        grid_scale: Option<f64>,
        #[serde(default)]
        grid_offset_x: Option<f64>,
        #[serde(default)]
        grid_offset_y: Option<f64>,
    },
    #[serde(rename = "battlemap.updateGridData")]
    GridDataUpdate {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
        grid_data: GridData,
    },

    #[serde(rename = "battlemap.addCover")]
    CoverAdd {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
        #[serde(default)]
        floor_id: Option<Uuid>,
        cover: CoverInput,
    },
    #[serde(rename = "battlemap.updateCover")]
    CoverUpdate {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
        cover_id: Uuid,
        updates: CoverPatch,
    },
    #[serde(rename = "battlemap.removeCover")]
    CoverRemove {
        #[serde(default)]
        request_id: Option<Uuid>,
        battlemap_id: Uuid,
        cover_id: Uuid,
    },

    /// Fire-and-forget: no ack, broadcast as `user.moved` to everyone else.
    #[serde(rename = "user.positionUpdate")]
    PositionUpdate {
        #[serde(default)]
        token_id: Option<String>,
        position: Position,
    },
    #[serde(rename = "token.add")]
    TokenAdd {
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        position: Option<Position>,
        #[serde(default)]
        size: Option<TokenSize>,
        #[serde(default)]
        avatar: Option<String>,
    },
    #[serde(rename = "token.remove")]
    TokenRemove { persistent_user_id: String },
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

/// One row of the ordered battlemap list broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattlemapListEntry {
    pub id: Uuid,
    pub name: String,
    pub map_path: Option<String>,
}

/// Full battlemap snapshot: everything a client needs to render the map.
/// Covers are pre-filtered to the active floor (all covers in legacy mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattlemapSnapshot {
    pub id: Uuid,
    pub name: String,
    pub map_path: Option<String>,
    pub floors: Vec<Floor>,
    pub active_floor_id: Option<Uuid>,
    pub grid_scale: f64,
    pub grid_offset_x: f64,
    pub grid_offset_y: f64,
    pub grid_data: Option<GridData>,
    pub covers: Vec<Cover>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "ack")]
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<Uuid>,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<AckError>,
        /// Newly minted id for creation operations.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        battlemap: Option<BattlemapSnapshot>,
    },

    #[serde(rename = "battlemap.list")]
    BattlemapList { battlemaps: Vec<BattlemapListEntry> },
    #[serde(rename = "battlemap.active")]
    BattlemapActive { battlemap_id: Option<Uuid> },
    #[serde(rename = "battlemap.updated")]
    BattlemapUpdated { battlemap: BattlemapSnapshot },

    #[serde(rename = "user.connected")]
    UserConnected { user: UserToken },
    #[serde(rename = "user.joined")]
    UserJoined { user: UserToken },
    #[serde(rename = "user.moved")]
    UserMoved { persistent_id: String, position: Position },
    #[serde(rename = "user.disconnected")]
    UserDisconnected { user: UserToken },
    #[serde(rename = "user.reconnected")]
    UserReconnected { user: UserToken },
    #[serde(rename = "token.added")]
    TokenAdded { user: UserToken },
    #[serde(rename = "token.removed")]
    TokenRemoved { persistent_id: String },

    #[serde(rename = "users.all")]
    AllUsers { users: Vec<UserToken> },
    #[serde(rename = "covers.all")]
    AllCovers { covers: Vec<Cover> },
    #[serde(rename = "users.disconnected")]
    DisconnectedUsers { users: Vec<UserToken> },
}

impl ClientMessage {
    /// Wire tag, for log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::BattlemapGet { .. } => "battlemap.get",
            Self::BattlemapCreate { .. } => "battlemap.create",
            Self::BattlemapRename { .. } => "battlemap.rename",
            Self::BattlemapDelete { .. } => "battlemap.delete",
            Self::BattlemapReorder { .. } => "battlemap.reorder",
            Self::BattlemapSetActive { .. } => "battlemap.setActive",
            Self::FloorAdd { .. } => "battlemap.addFloor",
            Self::FloorRename { .. } => "battlemap.renameFloor",
            Self::FloorDelete { .. } => "battlemap.deleteFloor",
            Self::FloorSetActive { .. } => "battlemap.setActiveFloor",
            Self::MapPathUpdate { .. } => "battlemap.updateMapPath",
            Self::SettingsUpdate { .. } => "battlemap.updateSettings",
            Self::GridDataUpdate { .. } => "battlemap.updateGridData",
            Self::CoverAdd { .. } => "battlemap.addCover",
            Self::CoverUpdate { .. } => "battlemap.updateCover",
            Self::CoverRemove { .. } => "battlemap.removeCover",
            Self::PositionUpdate { .. } => "user.positionUpdate",
            Self::TokenAdd { .. } => "token.add",
            Self::TokenRemove { .. } => "token.remove",
        }
    }
}

impl ServerMessage {
    /// Wire tag, for log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ack { .. } => "ack",
            Self::BattlemapList { .. } => "battlemap.list",
            Self::BattlemapActive { .. } => "battlemap.active",
            Self::BattlemapUpdated { .. } => "battlemap.updated",
            Self::UserConnected { .. } => "user.connected",
            Self::UserJoined { .. } => "user.joined",
            Self::UserMoved { .. } => "user.moved",
            Self::UserDisconnected { .. } => "user.disconnected",
            Self::UserReconnected { .. } => "user.reconnected",
            Self::TokenAdded { .. } => "token.added",
            Self::TokenRemoved { .. } => "token.removed",
            Self::AllUsers { .. } => "users.all",
            Self::AllCovers { .. } => "covers.all",
            Self::DisconnectedUsers { .. } => "users.disconnected",
        }
    }

    #[must_use]
    pub fn ack_ok(request_id: Option<Uuid>) -> Self {
        Self::Ack { request_id, ok: true, error: None, id: None, battlemap: None }
    }

    #[must_use]
    pub fn ack_created(request_id: Option<Uuid>, id: Uuid) -> Self {
        Self::Ack { request_id, ok: true, error: None, id: Some(id), battlemap: None }
    }

    #[must_use]
    pub fn ack_battlemap(request_id: Option<Uuid>, battlemap: BattlemapSnapshot) -> Self {
        Self::Ack { request_id, ok: true, error: None, id: None, battlemap: Some(battlemap) }
    }

    #[must_use]
    pub fn ack_error(request_id: Option<Uuid>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Ack {
            request_id,
            ok: false,
            error: Some(AckError { kind, message: message.into() }),
            id: None,
            battlemap: None,
        }
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
