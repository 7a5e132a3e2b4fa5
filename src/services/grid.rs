//! Grid/calibration reconciliation.
//!
//! DESIGN
//! ======
//! Grid-line detection is an external collaborator behind the
//! `GridDetector` trait; this module owns only the caching policy: detect
//! when the active floor's image changes and nothing is cached yet, treat
//! an empty detection result as the degraded default (an evenly spaced
//! synthetic grid covering the image), and schedule persistence of the
//! cached result.

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::BattlemapSnapshot;
use crate::services::persistence::{self, PersistCmd};
use crate::services::broadcast;
use crate::state::{AppState, GridData};

/// Cell count across the image width for the synthetic fallback grid.
const SYNTHETIC_GRID_COLUMNS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("grid detection failed: {0}")]
    Detection(String),
}

/// Image-to-grid-geometry collaborator. Implementations may return empty
/// line lists; callers degrade to a synthetic grid instead of failing.
#[async_trait]
pub trait GridDetector: Send + Sync {
    async fn detect(&self, map_path: &str) -> Result<GridData, GridError>;
}

/// Evenly spaced grid covering a `width` x `height` image.
#[must_use]
pub fn synthetic_grid(width: f64, height: f64) -> GridData {
    if width <= 0.0 || height <= 0.0 {
        return GridData { vertical: Vec::new(), horizontal: Vec::new(), width, height };
    }
    #[allow(clippy::cast_precision_loss)]
    let cell = width / SYNTHETIC_GRID_COLUMNS as f64;
    #[allow(clippy::cast_precision_loss)]
    let vertical: Vec<f64> = (1..SYNTHETIC_GRID_COLUMNS).map(|i| i as f64 * cell).collect();
    let mut horizontal = Vec::new();
    let mut y = cell;
    while y < height {
        horizontal.push(y);
        y += cell;
    }
    GridData { vertical, horizontal, width, height }
}

/// Recompute cached grid data for a battlemap after its active floor's
/// image changed. No-op when data is already cached, no detector is
/// configured, or the active floor has no image. Returns the refreshed
/// snapshot when the cache was updated.
pub async fn reconcile(state: &AppState, battlemap_id: Uuid) -> Option<BattlemapSnapshot> {
    let detector = state.detector.as_ref()?;

    let map_path = {
        let session = state.session.read().await;
        let bm = session.battlemaps.get(&battlemap_id)?;
        if bm.grid_data.is_some() {
            return None;
        }
        bm.active_floor()?.map_path.clone()?
    };

    let detected = match detector.detect(&map_path).await {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, %battlemap_id, "grid detection failed; keeping uncalibrated map");
            return None;
        }
    };

    // "No lines detected" is a valid result; fall back to an even grid.
    let grid_data = if detected.vertical.is_empty() && detected.horizontal.is_empty() {
        synthetic_grid(detected.width, detected.height)
    } else {
        detected
    };

    let mut session = state.session.write().await;
    let bm = session.battlemaps.get_mut(&battlemap_id)?;
    if bm.grid_data.is_some() {
        // A client calibrated by hand while detection ran; theirs wins.
        return None;
    }
    bm.grid_data = Some(grid_data);
    info!(%battlemap_id, "grid data cached from detection");
    let snapshot = broadcast::battlemap_snapshot(bm);
    let bm = bm.clone();
    drop(session);
    persistence::enqueue(state, PersistCmd::SaveBattlemap(bm));
    Some(snapshot)
}

#[cfg(test)]
#[path = "grid_test.rs"]
mod tests;
