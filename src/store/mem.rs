//! In-memory store used by tests.
//!
//! Emulates the persistence contract including legacy-schema behavior: a
//! legacy `MemStore` drops floor rows and cover floor references exactly as
//! an old database would never have held them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::state::{Battlemap, Cover, Floor};
use crate::store::{MapStore, StoreCapabilities, StoreError};

#[derive(Default)]
struct Inner {
    battlemaps: HashMap<Uuid, Battlemap>,
    order: Vec<Uuid>,
}

#[derive(Clone)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
    caps: StoreCapabilities,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::default())), caps: StoreCapabilities::full() }
    }

    /// A store emulating the old schema: no floors, battlemap-scoped covers.
    #[must_use]
    pub fn legacy() -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::default())), caps: StoreCapabilities::legacy() }
    }

    /// Snapshot of a persisted battlemap, for assertions.
    #[must_use]
    pub fn battlemap(&self, battlemap_id: Uuid) -> Option<Battlemap> {
        self.inner.lock().expect("mem store poisoned").battlemaps.get(&battlemap_id).cloned()
    }

    /// Persisted ordering, for assertions.
    #[must_use]
    pub fn order(&self) -> Vec<Uuid> {
        self.inner.lock().expect("mem store poisoned").order.clone()
    }

    fn strip(&self, mut bm: Battlemap) -> Battlemap {
        if !self.caps.has_floors {
            bm.floors.clear();
            bm.active_floor_id = None;
        }
        if !self.caps.has_cover_floor_ref {
            for cover in bm.covers.values_mut() {
                cover.floor_id = None;
            }
        }
        bm
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MapStore for MemStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.caps
    }

    async fn load_battlemaps(&self) -> Result<Vec<Battlemap>, StoreError> {
        let inner = self.inner.lock().expect("mem store poisoned");
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.battlemaps.get(id).cloned())
            .collect())
    }

    async fn upsert_battlemap(&self, battlemap: &Battlemap) -> Result<(), StoreError> {
        let stripped = self.strip(battlemap.clone());
        let mut inner = self.inner.lock().expect("mem store poisoned");
        if !inner.order.contains(&stripped.id) {
            inner.order.push(stripped.id);
        }
        inner.battlemaps.insert(stripped.id, stripped);
        Ok(())
    }

    async fn delete_battlemap(&self, battlemap_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mem store poisoned");
        inner.battlemaps.remove(&battlemap_id);
        inner.order.retain(|id| *id != battlemap_id);
        Ok(())
    }

    async fn upsert_floor(&self, floor: &Floor) -> Result<(), StoreError> {
        if !self.caps.has_floors {
            return Ok(());
        }
        let mut inner = self.inner.lock().expect("mem store poisoned");
        if let Some(bm) = inner.battlemaps.get_mut(&floor.battlemap_id) {
            match bm.floors.iter_mut().find(|f| f.id == floor.id) {
                Some(existing) => *existing = floor.clone(),
                None => bm.floors.push(floor.clone()),
            }
            bm.floors.sort_by_key(|f| f.sort_index);
        }
        Ok(())
    }

    async fn delete_floor(&self, floor_id: Uuid) -> Result<(), StoreError> {
        if !self.caps.has_floors {
            return Ok(());
        }
        let mut inner = self.inner.lock().expect("mem store poisoned");
        for bm in inner.battlemaps.values_mut() {
            bm.floors.retain(|f| f.id != floor_id);
            // Covers scoped to the floor cascade, matching the FK behavior.
            bm.covers.retain(|_, c| c.floor_id != Some(floor_id));
        }
        Ok(())
    }

    async fn upsert_cover(&self, battlemap_id: Uuid, cover: &Cover) -> Result<(), StoreError> {
        let mut stored = cover.clone();
        if !self.caps.has_cover_floor_ref {
            stored.floor_id = None;
        }
        let mut inner = self.inner.lock().expect("mem store poisoned");
        if let Some(bm) = inner.battlemaps.get_mut(&battlemap_id) {
            bm.covers.insert(stored.id, stored);
        }
        Ok(())
    }

    async fn delete_cover(&self, cover_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mem store poisoned");
        for bm in inner.battlemaps.values_mut() {
            bm.covers.remove(&cover_id);
        }
        Ok(())
    }

    async fn save_order(&self, ordered_ids: &[Uuid]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mem store poisoned");
        inner.order = ordered_ids.to_vec();
        Ok(())
    }
}
