use super::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

#[test]
fn validate_roll_bounds() {
    assert!(validate_roll(1, 2).is_ok());
    assert!(validate_roll(20, 100).is_ok());
    assert!(validate_roll(0, 6).is_err());
    assert!(validate_roll(21, 6).is_err());
    assert!(validate_roll(3, 1).is_err());
    assert!(validate_roll(3, 101).is_err());
}

#[test]
fn roll_results_stay_in_face_range() {
    let mut rng = StdRng::seed_from_u64(7);
    for faces in [2, 6, 20, 100] {
        let (results, total) = roll(&mut rng, 20, faces);
        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|r| (1..=faces).contains(r)));
        assert_eq!(total, results.iter().sum::<i32>());
    }
}

#[test]
fn seeded_rolls_are_reproducible() {
    let a = roll(&mut StdRng::seed_from_u64(42), 5, 20);
    let b = roll(&mut StdRng::seed_from_u64(42), 5, 20);
    assert_eq!(a, b);
}

#[tokio::test]
async fn invalid_roll_is_rejected_before_database() {
    let state = crate::state::test_helpers::test_app_state();
    let result = roll_and_record(&state.pool, Uuid::new_v4(), Uuid::new_v4(), None, 0, 6).await;
    assert!(matches!(result, Err(DiceError::Validation(_))));
}
