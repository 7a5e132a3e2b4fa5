//! Postgres implementation of the store adapter.
//!
//! DESIGN
//! ======
//! Capabilities are injected at construction (probed by `db::probe_capabilities`)
//! and every query branches on them: a legacy schema without the floor table
//! or the cover floor reference still loads and saves, just with less shape.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::state::{Battlemap, Cover, Floor, GridData};
use crate::store::{MapStore, StoreCapabilities, StoreError};

pub struct PgStore {
    pool: PgPool,
    caps: StoreCapabilities,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool, caps: StoreCapabilities) -> Self {
        Self { pool, caps }
    }
}

fn decode_grid_data(value: Option<serde_json::Value>) -> Result<Option<GridData>, StoreError> {
    match value {
        None => Ok(None),
        Some(v) => serde_json::from_value(v)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("grid data: {e}"))),
    }
}

#[async_trait]
impl MapStore for PgStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.caps
    }

    async fn load_battlemaps(&self) -> Result<Vec<Battlemap>, StoreError> {
        let mut battlemaps: Vec<Battlemap> = Vec::new();
        let mut index: HashMap<Uuid, usize> = HashMap::new();

        if self.caps.has_floors {
            let rows = sqlx::query_as::<
                _,
                (Uuid, String, Option<String>, Option<Uuid>, f64, f64, f64, Option<serde_json::Value>, i32),
            >(
                "SELECT id, name, map_path, active_floor_id, grid_scale, grid_offset_x, grid_offset_y, \
                        grid_data, sort_index \
                 FROM battlemaps ORDER BY sort_index ASC, name ASC",
            )
            .fetch_all(&self.pool)
            .await?;

            for (id, name, map_path, active_floor_id, grid_scale, grid_offset_x, grid_offset_y, grid_data, sort_index) in rows {
                index.insert(id, battlemaps.len());
                battlemaps.push(Battlemap {
                    id,
                    name,
                    map_path,
                    floors: Vec::new(),
                    active_floor_id,
                    grid_scale,
                    grid_offset_x,
                    grid_offset_y,
                    grid_data: decode_grid_data(grid_data)?,
                    covers: HashMap::new(),
                    sort_index,
                });
            }

            let floors = sqlx::query_as::<_, (Uuid, Uuid, String, Option<String>, i32)>(
                "SELECT id, battlemap_id, name, map_path, sort_index \
                 FROM floors ORDER BY sort_index ASC, name ASC",
            )
            .fetch_all(&self.pool)
            .await?;
            for (id, battlemap_id, name, map_path, sort_index) in floors {
                if let Some(&i) = index.get(&battlemap_id) {
                    battlemaps[i].floors.push(Floor { id, battlemap_id, name, map_path, sort_index });
                }
            }
        } else {
            // Legacy schema: no floor table, no active floor column.
            let rows = sqlx::query_as::<_, (Uuid, String, Option<String>, f64, f64, f64, Option<serde_json::Value>, i32)>(
                "SELECT id, name, map_path, grid_scale, grid_offset_x, grid_offset_y, grid_data, sort_index \
                 FROM battlemaps ORDER BY sort_index ASC, name ASC",
            )
            .fetch_all(&self.pool)
            .await?;

            for (id, name, map_path, grid_scale, grid_offset_x, grid_offset_y, grid_data, sort_index) in rows {
                index.insert(id, battlemaps.len());
                battlemaps.push(Battlemap {
                    id,
                    name,
                    map_path,
                    floors: Vec::new(),
                    active_floor_id: None,
                    grid_scale,
                    grid_offset_x,
                    grid_offset_y,
                    grid_data: decode_grid_data(grid_data)?,
                    covers: HashMap::new(),
                    sort_index,
                });
            }
        }

        if self.caps.has_cover_floor_ref {
            let covers = sqlx::query_as::<_, (Uuid, Uuid, Option<Uuid>, f64, f64, f64, f64, String)>(
                "SELECT id, battlemap_id, floor_id, x, y, width, height, color FROM covers",
            )
            .fetch_all(&self.pool)
            .await?;
            for (id, battlemap_id, floor_id, x, y, width, height, color) in covers {
                if let Some(&i) = index.get(&battlemap_id) {
                    battlemaps[i].covers.insert(id, Cover { id, floor_id, x, y, width, height, color });
                }
            }
        } else {
            let covers = sqlx::query_as::<_, (Uuid, Uuid, f64, f64, f64, f64, String)>(
                "SELECT id, battlemap_id, x, y, width, height, color FROM covers",
            )
            .fetch_all(&self.pool)
            .await?;
            for (id, battlemap_id, x, y, width, height, color) in covers {
                if let Some(&i) = index.get(&battlemap_id) {
                    battlemaps[i].covers.insert(id, Cover { id, floor_id: None, x, y, width, height, color });
                }
            }
        }

        Ok(battlemaps)
    }

    async fn upsert_battlemap(&self, battlemap: &Battlemap) -> Result<(), StoreError> {
        let grid_data = battlemap
            .grid_data
            .as_ref()
            .map(|g| serde_json::to_value(g).unwrap_or_default());

        if self.caps.has_floors {
            sqlx::query(
                "INSERT INTO battlemaps (id, name, map_path, active_floor_id, grid_scale, grid_offset_x, \
                                         grid_offset_y, grid_data, sort_index, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now()) \
                 ON CONFLICT (id) DO UPDATE SET \
                     name = EXCLUDED.name, map_path = EXCLUDED.map_path, \
                     active_floor_id = EXCLUDED.active_floor_id, grid_scale = EXCLUDED.grid_scale, \
                     grid_offset_x = EXCLUDED.grid_offset_x, grid_offset_y = EXCLUDED.grid_offset_y, \
                     grid_data = EXCLUDED.grid_data, sort_index = EXCLUDED.sort_index, updated_at = now()",
            )
            .bind(battlemap.id)
            .bind(&battlemap.name)
            .bind(&battlemap.map_path)
            .bind(battlemap.active_floor_id)
            .bind(battlemap.grid_scale)
            .bind(battlemap.grid_offset_x)
            .bind(battlemap.grid_offset_y)
            .bind(&grid_data)
            .bind(battlemap.sort_index)
            .execute(&self.pool)
            .await?;

            for floor in &battlemap.floors {
                self.upsert_floor(floor).await?;
            }
        } else {
            sqlx::query(
                "INSERT INTO battlemaps (id, name, map_path, grid_scale, grid_offset_x, grid_offset_y, \
                                         grid_data, sort_index, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now()) \
                 ON CONFLICT (id) DO UPDATE SET \
                     name = EXCLUDED.name, map_path = EXCLUDED.map_path, \
                     grid_scale = EXCLUDED.grid_scale, grid_offset_x = EXCLUDED.grid_offset_x, \
                     grid_offset_y = EXCLUDED.grid_offset_y, grid_data = EXCLUDED.grid_data, \
                     sort_index = EXCLUDED.sort_index, updated_at = now()",
            )
            .bind(battlemap.id)
            .bind(&battlemap.name)
            .bind(&battlemap.map_path)
            .bind(battlemap.grid_scale)
            .bind(battlemap.grid_offset_x)
            .bind(battlemap.grid_offset_y)
            .bind(&grid_data)
            .bind(battlemap.sort_index)
            .execute(&self.pool)
            .await?;
        }

        for cover in battlemap.covers.values() {
            self.upsert_cover(battlemap.id, cover).await?;
        }
        Ok(())
    }

    async fn delete_battlemap(&self, battlemap_id: Uuid) -> Result<(), StoreError> {
        // Floors and covers cascade.
        sqlx::query("DELETE FROM battlemaps WHERE id = $1")
            .bind(battlemap_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_floor(&self, floor: &Floor) -> Result<(), StoreError> {
        if !self.caps.has_floors {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO floors (id, battlemap_id, name, map_path, sort_index) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET \
                 name = EXCLUDED.name, map_path = EXCLUDED.map_path, sort_index = EXCLUDED.sort_index",
        )
        .bind(floor.id)
        .bind(floor.battlemap_id)
        .bind(&floor.name)
        .bind(&floor.map_path)
        .bind(floor.sort_index)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_floor(&self, floor_id: Uuid) -> Result<(), StoreError> {
        if !self.caps.has_floors {
            return Ok(());
        }
        sqlx::query("DELETE FROM floors WHERE id = $1")
            .bind(floor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_cover(&self, battlemap_id: Uuid, cover: &Cover) -> Result<(), StoreError> {
        if self.caps.has_cover_floor_ref {
            sqlx::query(
                "INSERT INTO covers (id, battlemap_id, floor_id, x, y, width, height, color) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (id) DO UPDATE SET \
                     floor_id = EXCLUDED.floor_id, x = EXCLUDED.x, y = EXCLUDED.y, \
                     width = EXCLUDED.width, height = EXCLUDED.height, color = EXCLUDED.color",
            )
            .bind(cover.id)
            .bind(battlemap_id)
            .bind(cover.floor_id)
            .bind(cover.x)
            .bind(cover.y)
            .bind(cover.width)
            .bind(cover.height)
            .bind(&cover.color)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "INSERT INTO covers (id, battlemap_id, x, y, width, height, color) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (id) DO UPDATE SET \
                     x = EXCLUDED.x, y = EXCLUDED.y, width = EXCLUDED.width, \
                     height = EXCLUDED.height, color = EXCLUDED.color",
            )
            .bind(cover.id)
            .bind(battlemap_id)
            .bind(cover.x)
            .bind(cover.y)
            .bind(cover.width)
            .bind(cover.height)
            .bind(&cover.color)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn delete_cover(&self, cover_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM covers WHERE id = $1")
            .bind(cover_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_order(&self, ordered_ids: &[Uuid]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (i, id) in ordered_ids.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let sort_index = i as i32;
            sqlx::query("UPDATE battlemaps SET sort_index = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(sort_index)
                .execute(tx.as_mut())
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
