use super::*;
use crate::frame::ErrorCode;
use crate::state::test_helpers;

// =============================================================================
// clamping
// =============================================================================

#[test]
fn clamp_position_bounds_both_axes() {
    assert_eq!(clamp_position(-10.0, 250.0), (0.0, 100.0));
    assert_eq!(clamp_position(33.3, 66.6), (33.3, 66.6));
    assert_eq!(clamp_position(0.0, 100.0), (0.0, 100.0));
}

#[test]
fn clamp_position_replaces_nan() {
    assert_eq!(clamp_position(f64::NAN, 10.0), (50.0, 10.0));
}

#[test]
fn clamp_size_bounds() {
    assert_eq!(clamp_size(5), TOKEN_SIZE_MIN);
    assert_eq!(clamp_size(500), TOKEN_SIZE_MAX);
    assert_eq!(clamp_size(TOKEN_SIZE_DEFAULT), 48);
}

// =============================================================================
// rubber-band selection
// =============================================================================

#[test]
fn select_in_rect_is_inclusive_and_order_independent() {
    let inside = Uuid::new_v4();
    let on_edge = Uuid::new_v4();
    let outside = Uuid::new_v4();
    let tokens = vec![(inside, 25.0, 25.0), (on_edge, 40.0, 10.0), (outside, 41.0, 25.0)];

    let forward = Rect { x1: 10.0, y1: 10.0, x2: 40.0, y2: 40.0 };
    let reversed = Rect { x1: 40.0, y1: 40.0, x2: 10.0, y2: 10.0 };

    assert_eq!(select_in_rect(&forward, tokens.clone()), vec![inside, on_edge]);
    assert_eq!(select_in_rect(&reversed, tokens), vec![inside, on_edge]);
}

#[test]
fn select_in_empty_rect_matches_point() {
    let exact = Uuid::new_v4();
    let rect = Rect { x1: 50.0, y1: 50.0, x2: 50.0, y2: 50.0 };
    assert_eq!(select_in_rect(&rect, [(exact, 50.0, 50.0), (Uuid::new_v4(), 50.1, 50.0)]), vec![exact]);
}

// =============================================================================
// enemy templates
// =============================================================================

#[test]
fn validate_enemy_defaults_hp_to_max() {
    assert_eq!(validate_enemy(" Goblin ", 10, None).unwrap(), ("Goblin".to_owned(), 10, 10));
    assert_eq!(validate_enemy("Goblin", 10, Some(25)).unwrap().1, 10);
    assert_eq!(validate_enemy("Goblin", 10, Some(-3)).unwrap().1, 0);
}

#[test]
fn validate_enemy_rejects_bad_templates() {
    assert!(matches!(validate_enemy("", 10, None), Err(TokenError::Validation(_))));
    assert!(matches!(validate_enemy("Goblin", 0, None), Err(TokenError::Validation(_))));
}

#[test]
fn token_kind_serializes_tagged() {
    let character_id = Uuid::new_v4();
    let json = serde_json::to_value(TokenKind::Player { character_id }).unwrap();
    assert_eq!(json["kind"], "player");
    assert_eq!(json["character_id"], character_id.to_string());

    let json = serde_json::to_value(TokenKind::Enemy { hit_points: 3, max_hit_points: 10 }).unwrap();
    assert_eq!(json["kind"], "enemy");
    assert_eq!(json["hit_points"], 3);
}

#[test]
fn error_codes() {
    assert_eq!(TokenError::NoActiveMap.error_code(), "E_NO_ACTIVE_MAP");
    assert_eq!(TokenError::NotFound(Uuid::nil()).error_code(), "E_TOKEN_NOT_FOUND");
    assert_eq!(TokenError::Forbidden("x").error_code(), "E_FORBIDDEN");
}

// =============================================================================
// authorization happens before any query
// =============================================================================

#[tokio::test]
async fn player_cannot_move_resize_or_remove() {
    let state = test_helpers::test_app_state();
    let table_id = Uuid::new_v4();
    let token_id = Uuid::new_v4();

    let moved = move_token(&state.pool, table_id, TableRole::Player, token_id, 1.0, 1.0).await;
    assert!(matches!(moved, Err(TokenError::Forbidden(_))));

    let resized = resize_tokens(&state.pool, table_id, TableRole::Player, ResizeTarget::Ids(vec![token_id]), 60).await;
    assert!(matches!(resized, Err(TokenError::Forbidden(_))));

    let removed = remove_token(&state.pool, table_id, TableRole::Player, token_id).await;
    assert!(matches!(removed, Err(TokenError::Forbidden(_))));
}

#[tokio::test]
async fn resize_with_no_targets_skips_database() {
    let state = test_helpers::test_app_state();
    let updated = resize_tokens(&state.pool, Uuid::new_v4(), TableRole::Master, ResizeTarget::Ids(Vec::new()), 60)
        .await
        .unwrap();
    assert!(updated.is_empty());
}

#[tokio::test]
#[ignore = "requires a migrated Postgres database"]
async fn second_token_for_character_is_already_placed() {
    let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap()).await.unwrap();
    let table_id: Uuid = sqlx::query_scalar("SELECT table_id FROM table_maps WHERE is_active LIMIT 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    let (character_id, owner): (Uuid, Uuid) =
        sqlx::query_as("SELECT id, user_id FROM character_sheets WHERE table_id = $1 LIMIT 1")
            .bind(table_id)
            .fetch_one(&pool)
            .await
            .unwrap();

    let request = PlaceRequest::Character { character_id };
    let _ = place_token(&pool, table_id, owner, TableRole::Player, request.clone(), None, None).await.unwrap();
    let second = place_token(&pool, table_id, owner, TableRole::Player, request, None, None).await.unwrap();
    assert!(matches!(second, PlaceOutcome::AlreadyPlaced { .. }));

    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM map_tokens WHERE character_id = $1")
        .bind(character_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
