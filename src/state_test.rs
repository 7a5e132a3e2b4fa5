use super::test_helpers::*;
use super::*;
use crate::store::mem::MemStore;

// =============================================================================
// COVER CLAMPING
// =============================================================================

fn cover(x: f64, y: f64, width: f64, height: f64) -> Cover {
    Cover {
        id: Uuid::new_v4(),
        floor_id: None,
        x,
        y,
        width,
        height,
        color: DEFAULT_COVER_COLOR.into(),
    }
}

#[test]
fn cover_clamp_pulls_overflowing_rect_back_into_image() {
    let c = cover(90.0, 90.0, 30.0, 30.0).clamped();
    assert_eq!((c.x, c.y, c.width, c.height), (70.0, 70.0, 30.0, 30.0));
}

#[test]
fn cover_clamp_shrinks_oversized_dimensions_first() {
    let c = cover(10.0, 10.0, 150.0, 200.0).clamped();
    assert_eq!((c.width, c.height), (100.0, 100.0));
    assert_eq!((c.x, c.y), (0.0, 0.0));
}

#[test]
fn cover_clamp_rejects_negative_origin() {
    let c = cover(-5.0, -10.0, 20.0, 20.0).clamped();
    assert_eq!((c.x, c.y), (0.0, 0.0));
}

#[test]
fn cover_clamp_leaves_valid_rect_untouched() {
    let c = cover(25.0, 25.0, 50.0, 50.0).clamped();
    assert_eq!((c.x, c.y, c.width, c.height), (25.0, 25.0, 50.0, 50.0));
}

// =============================================================================
// BATTLEMAP MODEL
// =============================================================================

#[test]
fn new_battlemap_starts_with_one_active_floor() {
    let bm = Battlemap::new("Dungeon", Some("maps/dungeon.png".into()));
    assert_eq!(bm.floors.len(), 1);
    assert_eq!(bm.active_floor_id, Some(bm.floors[0].id));
    assert_eq!(bm.floors[0].name, DEFAULT_FLOOR_NAME);
    assert_eq!(bm.floors[0].map_path.as_deref(), Some("maps/dungeon.png"));
    assert_eq!(bm.map_path.as_deref(), Some("maps/dungeon.png"));
}

#[test]
fn new_battlemap_without_image_is_floorless() {
    let bm = Battlemap::new("Dungeon", None);
    assert!(bm.floors.is_empty());
    assert_eq!(bm.active_floor_id, None);
}

#[test]
fn backfill_floor_creates_an_active_floor_carrying_the_path() {
    let mut bm = Battlemap::new("Old map", None);
    bm.map_path = Some("maps/old.png".into());
    bm.backfill_floor();
    assert_eq!(bm.floors.len(), 1);
    assert_eq!(bm.active_floor_id, Some(bm.floors[0].id));
    assert_eq!(bm.floors[0].map_path.as_deref(), Some("maps/old.png"));
}

#[test]
fn visible_covers_filters_to_active_floor_but_keeps_unscoped_rows() {
    let mut bm = Battlemap::new("Dungeon", Some("maps/dungeon.png".into()));
    let active = bm.active_floor_id;
    assert!(active.is_some());

    let mut on_active = cover(0.0, 0.0, 10.0, 10.0);
    on_active.floor_id = active;
    let mut elsewhere = cover(0.0, 0.0, 10.0, 10.0);
    elsewhere.floor_id = Some(Uuid::new_v4());
    let unscoped = cover(0.0, 0.0, 10.0, 10.0);

    let visible_ids = [on_active.id, unscoped.id];
    bm.covers.insert(on_active.id, on_active);
    bm.covers.insert(elsewhere.id, elsewhere);
    bm.covers.insert(unscoped.id, unscoped);

    let visible = bm.visible_covers();
    assert_eq!(visible.len(), 2);
    assert!(visible.iter().all(|c| visible_ids.contains(&c.id)));
}

#[test]
fn sync_legacy_path_mirrors_active_floor() {
    let mut bm = Battlemap::new("Dungeon", Some("maps/dungeon.png".into()));
    let floor_id = bm.floors[0].id;
    bm.floor_mut(floor_id).unwrap().map_path = Some("maps/basement.png".into());
    bm.sync_legacy_path();
    assert_eq!(bm.map_path.as_deref(), Some("maps/basement.png"));
}

// =============================================================================
// SESSION LOAD
// =============================================================================

#[tokio::test]
async fn load_seeds_one_battlemap_into_an_empty_store() {
    let store = MemStore::new();
    let session = SessionState::load(&store).await.unwrap();

    assert_eq!(session.order.len(), 1);
    let bm = &session.battlemaps[&session.order[0]];
    assert_eq!(bm.name, DEFAULT_BATTLEMAP_NAME);
    assert_eq!(bm.floors.len(), 1);
    assert_eq!(session.active_battlemap, Some(bm.id));
    // The seed reached the store too.
    assert!(store.battlemap(bm.id).is_some());
}

#[tokio::test]
async fn load_backfills_a_floor_for_legacy_battlemaps() {
    let store = MemStore::legacy();
    let bm = Battlemap::new("Old map", Some("maps/old.png".into()));
    let id = bm.id;
    store.upsert_battlemap(&bm).await.unwrap();
    // Legacy storage kept no floor rows.
    assert!(store.battlemap(id).unwrap().floors.is_empty());

    let session = SessionState::load(&store).await.unwrap();
    let loaded = &session.battlemaps[&id];
    assert_eq!(loaded.floors.len(), 1);
    assert_eq!(loaded.floors[0].name, DEFAULT_FLOOR_NAME);
    assert_eq!(loaded.active_floor_id, Some(loaded.floors[0].id));
    assert_eq!(loaded.map_path.as_deref(), Some("maps/old.png"));
    // The synthetic floor stays in memory only.
    assert!(store.battlemap(id).unwrap().floors.is_empty());
}

#[tokio::test]
async fn load_repairs_dangling_active_floor_reference() {
    let store = MemStore::new();
    let mut bm = Battlemap::new("Dungeon", Some("maps/dungeon.png".into()));
    bm.active_floor_id = Some(Uuid::new_v4());
    let id = bm.id;
    store.upsert_battlemap(&bm).await.unwrap();

    let session = SessionState::load(&store).await.unwrap();
    let loaded = &session.battlemaps[&id];
    assert_eq!(loaded.active_floor_id, Some(loaded.floors[0].id));
}

#[tokio::test]
async fn visible_users_excludes_display_tokens() {
    let state = test_app_state().await;
    let mut session = state.session.write().await;
    session.users.insert(Uuid::new_v4(), dummy_token("alice"));
    let mut display = dummy_token("console");
    display.is_display = true;
    session.users.insert(Uuid::new_v4(), display);

    let visible = session.visible_users();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].persistent_id, "alice");
}
