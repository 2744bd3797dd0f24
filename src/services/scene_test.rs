use super::*;
use crate::frame::Status;
use crate::state::test_helpers;
use tokio::time::{Duration, timeout};

fn sample_snapshot(table_id: Uuid) -> SceneSnapshot {
    let map_id = Uuid::new_v4();
    SceneSnapshot {
        map: Some(Map {
            id: map_id,
            table_id,
            name: "Crossroads".into(),
            image_url: "https://img.example/crossroads.png".into(),
            is_active: true,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }),
        tokens: vec![SceneToken {
            id: Uuid::new_v4(),
            map_id,
            kind: "enemy".into(),
            character_id: None,
            owner_id: None,
            name: Some("Goblin".into()),
            icon_url: None,
            hit_points: Some(7),
            max_hit_points: Some(10),
            x: 50.0,
            y: 50.0,
            size: 48,
        }],
    }
}

#[test]
fn validate_map_trims_and_requires_fields() {
    assert_eq!(
        validate_map(" Keep ", " https://x/y.png ").unwrap(),
        ("Keep".to_owned(), "https://x/y.png".to_owned())
    );
    assert!(matches!(validate_map("", "https://x"), Err(SceneError::Validation(_))));
    assert!(matches!(validate_map("Keep", "  "), Err(SceneError::Validation(_))));
}

#[test]
fn empty_snapshot_serializes_null_map() {
    let json = serde_json::to_value(SceneSnapshot::default()).unwrap();
    assert!(json["map"].is_null());
    assert_eq!(json["tokens"], serde_json::json!([]));
}

#[tokio::test]
async fn publish_snapshot_caches_and_broadcasts() {
    let state = test_helpers::test_app_state();
    let table_id = test_helpers::seed_table(&state).await;
    let (_c, _, mut rx) = test_helpers::connect_client(&state, table_id, TableRole::Player).await;

    let snapshot = sample_snapshot(table_id);
    publish_snapshot(&state, table_id, &snapshot).await;

    let frame = timeout(Duration::from_millis(200), rx.recv()).await.unwrap().unwrap();
    assert_eq!(frame.syscall, "scene:snapshot");
    assert_eq!(frame.status, Status::Request);
    assert_eq!(frame.table_id, Some(table_id));
    assert_eq!(frame.data["tokens"][0]["name"], "Goblin");

    let cached = cached_scene(&state, table_id).await.expect("snapshot should be cached");
    assert_eq!(cached.tokens.len(), 1);
}

#[tokio::test]
async fn players_cannot_manage_maps() {
    let state = test_helpers::test_app_state();
    let table_id = Uuid::new_v4();

    let created = create_map(&state.pool, table_id, TableRole::Player, "Keep", "https://x", false).await;
    assert!(matches!(created, Err(SceneError::Forbidden(_))));
    let activated = activate_map(&state.pool, table_id, TableRole::Player, Uuid::new_v4()).await;
    assert!(matches!(activated, Err(SceneError::Forbidden(_))));
    let deleted = delete_map(&state.pool, table_id, TableRole::Player, Uuid::new_v4()).await;
    assert!(matches!(deleted, Err(SceneError::Forbidden(_))));
}

#[tokio::test]
#[ignore = "requires a migrated Postgres database"]
async fn activating_a_map_leaves_exactly_one_active() {
    let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap()).await.unwrap();
    let table_id: Uuid = sqlx::query_scalar("SELECT id FROM game_tables LIMIT 1").fetch_one(&pool).await.unwrap();

    let first = create_map(&pool, table_id, TableRole::Master, "One", "https://x/1.png", false).await.unwrap();
    let second = create_map(&pool, table_id, TableRole::Master, "Two", "https://x/2.png", false).await.unwrap();
    activate_map(&pool, table_id, TableRole::Master, second.id).await.unwrap();
    activate_map(&pool, table_id, TableRole::Master, first.id).await.unwrap();

    let active: i64 = sqlx::query_scalar("SELECT count(*) FROM table_maps WHERE table_id = $1 AND is_active")
        .bind(table_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(active, 1);
}
