use super::*;
use crate::frame::{Data, Frame, Status};
use crate::state::test_helpers;
use tokio::time::{Duration, timeout};

async fn assert_channel_has_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

async fn assert_channel_empty(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected channel to remain empty"
    );
}

// =============================================================================
// roles
// =============================================================================

#[test]
fn role_round_trip() {
    for role in [TableRole::Admin, TableRole::Master, TableRole::Player] {
        assert_eq!(TableRole::parse(role.as_str()), Some(role));
    }
    assert_eq!(TableRole::parse("gm"), None);
    assert_eq!(TableRole::parse("MASTER"), None);
}

#[test]
fn master_permission_requires_authority() {
    assert!(role_satisfies(TableRole::Player, TablePermission::View));
    assert!(!role_satisfies(TableRole::Player, TablePermission::Master));
    assert!(role_satisfies(TableRole::Master, TablePermission::Master));
    assert!(role_satisfies(TableRole::Admin, TablePermission::Master));
}

#[test]
fn name_and_level_validation() {
    assert_eq!(normalize_name("  Crypt of Ash ").unwrap(), "Crypt of Ash");
    assert!(matches!(normalize_name("   "), Err(TableError::Validation(_))));
    assert_eq!(validate_max_level(20).unwrap(), 20);
    assert!(validate_max_level(0).is_err());
    assert!(validate_max_level(MAX_LEVEL_CAP + 1).is_err());
}

// =============================================================================
// broadcast / part / evict
// =============================================================================

#[tokio::test]
async fn broadcast_sends_to_all_except_excluded_client() {
    let state = test_helpers::test_app_state();
    let table_id = test_helpers::seed_table(&state).await;
    let (_a, _, mut rx_a) = test_helpers::connect_client(&state, table_id, TableRole::Master).await;
    let (b, _, mut rx_b) = test_helpers::connect_client(&state, table_id, TableRole::Player).await;
    let (_c, _, mut rx_c) = test_helpers::connect_client(&state, table_id, TableRole::Player).await;

    let frame = Frame::request("scene:snapshot", Data::new()).with_table_id(table_id);
    broadcast(&state, table_id, &frame, Some(b)).await;

    assert_eq!(assert_channel_has_frame(&mut rx_a).await.syscall, "scene:snapshot");
    assert_eq!(assert_channel_has_frame(&mut rx_c).await.syscall, "scene:snapshot");
    assert_channel_empty(&mut rx_b).await;
}

#[tokio::test]
async fn part_table_keeps_state_while_clients_remain() {
    let state = test_helpers::test_app_state();
    let table_id = test_helpers::seed_table(&state).await;
    let (a, _, _rx_a) = test_helpers::connect_client(&state, table_id, TableRole::Master).await;
    let (b, _, _rx_b) = test_helpers::connect_client(&state, table_id, TableRole::Player).await;

    part_table(&state, table_id, a).await;
    {
        let tables = state.tables.read().await;
        let table = tables.get(&table_id).expect("table should remain live");
        assert!(!table.clients.contains_key(&a));
        assert!(table.clients.contains_key(&b));
    }

    part_table(&state, table_id, b).await;
    assert!(!state.tables.read().await.contains_key(&table_id));
}

#[tokio::test]
async fn part_table_abandons_open_drags() {
    let state = test_helpers::test_app_state();
    let table_id = test_helpers::seed_table(&state).await;
    let (master, _, _rx) = test_helpers::connect_client(&state, table_id, TableRole::Master).await;
    let (_other, _, _rx_other) = test_helpers::connect_client(&state, table_id, TableRole::Player).await;
    {
        let mut tables = state.tables.write().await;
        let table = tables.get_mut(&table_id).unwrap();
        table.drags.begin(Uuid::new_v4(), master, 10.0, 10.0).unwrap();
    }

    part_table(&state, table_id, master).await;

    let tables = state.tables.read().await;
    assert!(tables.get(&table_id).unwrap().drags.is_empty());
}

#[tokio::test]
async fn evict_user_notifies_and_removes_all_connections() {
    let state = test_helpers::test_app_state();
    let table_id = test_helpers::seed_table(&state).await;
    let (_m, _, _rx_m) = test_helpers::connect_client(&state, table_id, TableRole::Master).await;
    let (p, user_id, mut rx_p) = test_helpers::connect_client(&state, table_id, TableRole::Player).await;

    let removed = evict_user(&state, table_id, user_id).await;
    assert_eq!(removed, 1);

    let notice = assert_channel_has_frame(&mut rx_p).await;
    assert_eq!(notice.syscall, "table:kicked");
    assert_eq!(notice.status, Status::Request);
    assert!(connected_client(&state, table_id, p).await.is_none());
}

#[tokio::test]
async fn evict_user_everywhere_clears_every_table_seat() {
    let state = test_helpers::test_app_state();
    let first = test_helpers::seed_table(&state).await;
    let second = test_helpers::seed_table(&state).await;
    let untouched = test_helpers::seed_table(&state).await;
    let (_m, _, _rx_m) = test_helpers::connect_client(&state, first, TableRole::Player).await;
    let (_o, _, _rx_o) = test_helpers::connect_client(&state, untouched, TableRole::Player).await;

    let user_id = Uuid::new_v4();
    let (a, mut rx_a) = test_helpers::connect_as(&state, first, user_id, TableRole::Master).await;
    let (b, mut rx_b) = test_helpers::connect_as(&state, second, user_id, TableRole::Master).await;

    let mut affected = evict_user_everywhere(&state, user_id).await;
    affected.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(affected, expected);

    assert_eq!(assert_channel_has_frame(&mut rx_a).await.syscall, "table:kicked");
    assert_eq!(assert_channel_has_frame(&mut rx_b).await.syscall, "table:kicked");
    assert!(connected_client(&state, first, a).await.is_none());
    assert!(connected_client(&state, second, b).await.is_none());

    let tables = state.tables.read().await;
    assert!(tables.contains_key(&first), "other clients keep the table live");
    assert!(!tables.contains_key(&second), "table with no clients left is evicted");
    assert!(tables.contains_key(&untouched));
}

#[tokio::test]
async fn connected_client_reports_cached_role() {
    let state = test_helpers::test_app_state();
    let table_id = test_helpers::seed_table(&state).await;
    let (client_id, user_id, _rx) = test_helpers::connect_client(&state, table_id, TableRole::Player).await;

    let client = connected_client(&state, table_id, client_id).await.expect("client should exist");
    assert_eq!(client.user_id, user_id);
    assert_eq!(client.role, TableRole::Player);
}

#[tokio::test]
#[ignore = "join_table hits Postgres via sqlx::query"]
async fn join_table_unknown_table_is_not_found() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let result = join_table(&state, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), tx).await;
    assert!(matches!(result, Err(TableError::NotFound(_))));
}
