use std::sync::Arc;

use super::*;
use crate::services::battlemap;
use crate::state::test_helpers::*;

/// Detector stub returning a fixed result.
struct FixedDetector(Result<GridData, String>);

#[async_trait]
impl GridDetector for FixedDetector {
    async fn detect(&self, _map_path: &str) -> Result<GridData, GridError> {
        self.0.clone().map_err(GridError::Detection)
    }
}

fn with_detector(mut state: AppState, result: Result<GridData, String>) -> AppState {
    state.detector = Some(Arc::new(FixedDetector(result)));
    state
}

async fn battlemap_with_image(state: &AppState) -> Uuid {
    let id = state.session.read().await.order[0];
    battlemap::update_map_path(state, true, id, None, Some("maps/dungeon.png".into()))
        .await
        .unwrap();
    id
}

// =============================================================================
// SYNTHETIC GRID
// =============================================================================

#[test]
fn synthetic_grid_spaces_lines_evenly() {
    let grid = synthetic_grid(2000.0, 1000.0);
    // 20 columns => 19 interior vertical lines, square cells.
    assert_eq!(grid.vertical.len(), 19);
    assert_eq!(grid.vertical[0], 100.0);
    assert_eq!(grid.vertical[18], 1900.0);
    assert_eq!(grid.horizontal.len(), 9);
    assert_eq!(grid.horizontal[0], 100.0);
    assert_eq!((grid.width, grid.height), (2000.0, 1000.0));
}

#[test]
fn synthetic_grid_handles_degenerate_dimensions() {
    let grid = synthetic_grid(0.0, 500.0);
    assert!(grid.vertical.is_empty());
    assert!(grid.horizontal.is_empty());
}

// =============================================================================
// RECONCILE
// =============================================================================

#[tokio::test]
async fn reconcile_caches_the_detected_grid() {
    let detected =
        GridData { vertical: vec![64.0, 128.0], horizontal: vec![64.0], width: 640.0, height: 480.0 };
    let state = with_detector(test_app_state().await, Ok(detected.clone()));
    let id = battlemap_with_image(&state).await;

    let snapshot = reconcile(&state, id).await.unwrap();
    assert_eq!(snapshot.grid_data, Some(detected.clone()));
    assert_eq!(state.session.read().await.battlemaps[&id].grid_data, Some(detected));
}

#[tokio::test]
async fn reconcile_falls_back_to_a_synthetic_grid_on_empty_detection() {
    let empty = GridData { vertical: Vec::new(), horizontal: Vec::new(), width: 2000.0, height: 1000.0 };
    let state = with_detector(test_app_state().await, Ok(empty));
    let id = battlemap_with_image(&state).await;

    let snapshot = reconcile(&state, id).await.unwrap();
    let grid = snapshot.grid_data.unwrap();
    assert_eq!(grid.vertical.len(), 19);
    assert_eq!((grid.width, grid.height), (2000.0, 1000.0));
}

#[tokio::test]
async fn reconcile_keeps_existing_calibration() {
    let detected = GridData { vertical: vec![1.0], horizontal: vec![1.0], width: 10.0, height: 10.0 };
    let state = with_detector(test_app_state().await, Ok(detected));
    let id = battlemap_with_image(&state).await;

    let manual = GridData { vertical: vec![50.0], horizontal: vec![50.0], width: 100.0, height: 100.0 };
    battlemap::update_grid_data(&state, true, id, manual.clone()).await.unwrap();

    assert!(reconcile(&state, id).await.is_none());
    assert_eq!(state.session.read().await.battlemaps[&id].grid_data, Some(manual));
}

#[tokio::test]
async fn reconcile_is_a_noop_without_detector_or_image() {
    // No detector configured.
    let state = test_app_state().await;
    let id = battlemap_with_image(&state).await;
    assert!(reconcile(&state, id).await.is_none());

    // Detector present but the active floor has no image.
    let detected = GridData { vertical: vec![1.0], horizontal: vec![1.0], width: 10.0, height: 10.0 };
    let state = with_detector(test_app_state().await, Ok(detected));
    let id = state.session.read().await.order[0];
    assert!(reconcile(&state, id).await.is_none());
    assert!(state.session.read().await.battlemaps[&id].grid_data.is_none());
}

#[tokio::test]
async fn reconcile_survives_a_failing_detector() {
    let state = with_detector(test_app_state().await, Err("decoder crashed".into()));
    let id = battlemap_with_image(&state).await;

    assert!(reconcile(&state, id).await.is_none());
    assert!(state.session.read().await.battlemaps[&id].grid_data.is_none());
}
