//! Persistent store adapter.
//!
//! ARCHITECTURE
//! ============
//! The session core depends on the narrow `MapStore` capability, never on
//! SQL directly. `PgStore` is the production implementation; `MemStore`
//! backs tests. Schema differences (missing floor table, missing cover
//! floor reference) are captured once at startup as a structured
//! `StoreCapabilities` value — callers branch on that, never on error
//! strings.

pub mod mem;
pub mod pg;

use async_trait::async_trait;
use uuid::Uuid;

use crate::state::{Battlemap, Cover, Floor};

/// What the backing schema supports. Probed once at startup.
#[derive(Debug, Clone, Copy)]
pub struct StoreCapabilities {
    /// Floor table present; without it one synthetic floor per battlemap
    /// is assumed in memory and floor rows are never written.
    pub has_floors: bool,
    /// Covers carry a floor reference; without it covers are scoped to the
    /// whole battlemap.
    pub has_cover_floor_ref: bool,
}

impl StoreCapabilities {
    #[must_use]
    pub fn full() -> Self {
        Self { has_floors: true, has_cover_floor_ref: true }
    }

    #[must_use]
    pub fn legacy() -> Self {
        Self { has_floors: false, has_cover_floor_ref: false }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Narrow load/save interface the session core depends on.
///
/// Writes are full-entity snapshots: `upsert_battlemap` persists the row
/// plus all of its floors and covers, so a later write of the same entity
/// always supersedes an earlier one (last write wins, per entity).
#[async_trait]
pub trait MapStore: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities;

    /// Load every battlemap with its floors and covers, in sort order.
    async fn load_battlemaps(&self) -> Result<Vec<Battlemap>, StoreError>;

    async fn upsert_battlemap(&self, battlemap: &Battlemap) -> Result<(), StoreError>;
    async fn delete_battlemap(&self, battlemap_id: Uuid) -> Result<(), StoreError>;

    async fn upsert_floor(&self, floor: &Floor) -> Result<(), StoreError>;
    /// Deleting a floor cascades to the covers scoped to it.
    async fn delete_floor(&self, floor_id: Uuid) -> Result<(), StoreError>;

    async fn upsert_cover(&self, battlemap_id: Uuid, cover: &Cover) -> Result<(), StoreError>;
    async fn delete_cover(&self, cover_id: Uuid) -> Result<(), StoreError>;

    /// Persist the user-visible battlemap ordering.
    async fn save_order(&self, ordered_ids: &[Uuid]) -> Result<(), StoreError>;
}
