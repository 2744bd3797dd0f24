use super::*;
use crate::state::test_helpers;
use tokio::time::timeout;

fn client_seen(ago: Duration) -> ConnectedClient {
    let mut client = ConnectedClient::new(Uuid::new_v4(), "Aria", TableRole::Player);
    client.last_seen = Instant::now().checked_sub(ago).unwrap_or_else(Instant::now);
    client
}

async fn age_client(state: &AppState, table_id: Uuid, client_id: Uuid, ago: Duration) {
    let mut tables = state.tables.write().await;
    let client = tables.get_mut(&table_id).unwrap().users.get_mut(&client_id).unwrap();
    client.last_seen = Instant::now().checked_sub(ago).unwrap_or_else(Instant::now);
}

// =============================================================================
// collect_stale
// =============================================================================

#[test]
fn collect_stale_marks_only_idle_clients() {
    let mut users = HashMap::new();
    let idle = Uuid::new_v4();
    let fresh = Uuid::new_v4();
    users.insert(idle, client_seen(Duration::from_secs(60)));
    users.insert(fresh, client_seen(Duration::from_secs(1)));

    let changed = collect_stale(&mut users, Instant::now(), Duration::from_secs(30));

    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].0, idle);
    assert!(users[&idle].stale);
    assert!(!users[&fresh].stale);
}

#[test]
fn collect_stale_reports_each_client_once() {
    let mut users = HashMap::new();
    users.insert(Uuid::new_v4(), client_seen(Duration::from_secs(60)));

    assert_eq!(collect_stale(&mut users, Instant::now(), Duration::from_secs(30)).len(), 1);
    assert!(collect_stale(&mut users, Instant::now(), Duration::from_secs(30)).is_empty());
}

// =============================================================================
// sweep / touch / online
// =============================================================================

#[tokio::test]
async fn sweep_broadcasts_stale_to_peers() {
    let state = test_helpers::test_app_state();
    let table_id = test_helpers::seed_table(&state).await;
    let (quiet, quiet_user, _rx_quiet) = test_helpers::connect_client(&state, table_id, TableRole::Player).await;
    let (_peer, _, mut rx_peer) = test_helpers::connect_client(&state, table_id, TableRole::Master).await;
    age_client(&state, table_id, quiet, Duration::from_secs(120)).await;

    assert_eq!(sweep(&state, Duration::from_secs(30)).await, 1);

    let frame = timeout(Duration::from_millis(200), rx_peer.recv()).await.unwrap().unwrap();
    assert_eq!(frame.syscall, "presence:stale");
    assert_eq!(frame.uuid("user_id"), Some(quiet_user));

    let online = online_users(&state, table_id).await;
    assert!(online.iter().all(|u| u.user_id != quiet_user));
}

#[tokio::test]
async fn touch_revives_stale_client_once() {
    let state = test_helpers::test_app_state();
    let table_id = test_helpers::seed_table(&state).await;
    let (client_id, user_id, _rx) = test_helpers::connect_client(&state, table_id, TableRole::Player).await;
    age_client(&state, table_id, client_id, Duration::from_secs(120)).await;
    sweep(&state, Duration::from_secs(30)).await;

    let revived = touch(&state, table_id, client_id).await.expect("stale client should be revived");
    assert_eq!(revived.user_id, user_id);
    assert!(touch(&state, table_id, client_id).await.is_none());
    assert_eq!(online_users(&state, table_id).await.len(), 1);
}

#[tokio::test]
async fn online_users_dedupes_connections() {
    let state = test_helpers::test_app_state();
    let table_id = test_helpers::seed_table(&state).await;
    let (_a, user_id, _rx_a) = test_helpers::connect_client(&state, table_id, TableRole::Player).await;
    {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let mut tables = state.tables.write().await;
        let table = tables.get_mut(&table_id).unwrap();
        let second = Uuid::new_v4();
        table.clients.insert(second, tx);
        table.users.insert(second, ConnectedClient::new(user_id, "same-user", TableRole::Player));
    }

    let online = online_users(&state, table_id).await;
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].user_id, user_id);
}

#[tokio::test]
async fn announce_join_skips_the_joiner() {
    let state = test_helpers::test_app_state();
    let table_id = test_helpers::seed_table(&state).await;
    let (joiner, _, mut rx_joiner) = test_helpers::connect_client(&state, table_id, TableRole::Player).await;
    let (_peer, _, mut rx_peer) = test_helpers::connect_client(&state, table_id, TableRole::Master).await;

    let client = ConnectedClient::new(Uuid::new_v4(), "Aria", TableRole::Player);
    announce_join(&state, table_id, joiner, &client).await;

    let frame = timeout(Duration::from_millis(200), rx_peer.recv()).await.unwrap().unwrap();
    assert_eq!(frame.syscall, "presence:join");
    assert_eq!(frame.str("display_name"), Some("Aria"));
    assert!(timeout(Duration::from_millis(50), rx_joiner.recv()).await.is_err());
}
