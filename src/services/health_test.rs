use super::*;
use crate::state::test_helpers;

#[test]
fn enemy_overkill_clamps_to_zero() {
    assert_eq!(apply_change(10, 10, 15, Direction::Damage), Some(0));
}

#[test]
fn heal_clamps_to_max() {
    assert_eq!(apply_change(7, 10, 5, Direction::Heal), Some(10));
    assert_eq!(apply_change(3, 10, 2, Direction::Heal), Some(5));
}

#[test]
fn non_positive_amount_is_noop() {
    assert_eq!(apply_change(5, 10, 0, Direction::Damage), None);
    assert_eq!(apply_change(5, 10, -4, Direction::Heal), None);
}

#[test]
fn result_always_within_bounds() {
    for current in [0, 1, 5, 10] {
        for amount in [1, 3, 9, 100, i32::MAX] {
            for direction in [Direction::Damage, Direction::Heal] {
                let next = apply_change(current, 10, amount, direction).unwrap();
                assert!((0..=10).contains(&next), "{current} {amount} {direction:?} -> {next}");
            }
        }
    }
}

#[test]
fn direction_parse() {
    assert_eq!(Direction::parse("damage"), Some(Direction::Damage));
    assert_eq!(Direction::parse("heal"), Some(Direction::Heal));
    assert_eq!(Direction::parse("hurt"), None);
}

#[tokio::test]
async fn players_cannot_apply_health() {
    let state = test_helpers::test_app_state();
    let result = apply_to_target(
        &state.pool,
        Uuid::new_v4(),
        TableRole::Player,
        HealthTarget::Token(Uuid::new_v4()),
        5,
        Direction::Damage,
    )
    .await;
    assert!(matches!(result, Err(HealthError::Forbidden)));
}

#[tokio::test]
async fn zero_amount_skips_database() {
    let state = test_helpers::test_app_state();
    let result = apply_to_target(
        &state.pool,
        Uuid::new_v4(),
        TableRole::Master,
        HealthTarget::Character(Uuid::new_v4()),
        0,
        Direction::Heal,
    )
    .await
    .unwrap();
    assert!(result.is_none());
}
