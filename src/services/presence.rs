//! Presence service — who is at the table, and who has gone quiet.
//!
//! DESIGN
//! ======
//! Presence is tracked per connection. Every inbound frame refreshes the
//! connection's `last_seen`. A background sweeper marks connections whose
//! `last_seen` is older than the configured timeout as stale and tells the
//! table; a stale connection that speaks again is announced as joined.
//!
//! A user is online while at least one of their connections is not stale.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::services::table::{self, TableRole};
use crate::state::{AppState, ConnectedClient};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnlineUser {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: TableRole,
}

fn presence_data(client_id: Uuid, client: &ConnectedClient) -> Data {
    let mut data = Data::new();
    data.insert("client_id".into(), json!(client_id));
    data.insert("user_id".into(), json!(client.user_id));
    data.insert("display_name".into(), json!(client.display_name));
    data.insert("role".into(), json!(client.role));
    data
}

/// Tell the other clients of a table that a connection is present.
pub async fn announce_join(state: &AppState, table_id: Uuid, client_id: Uuid, client: &ConnectedClient) {
    let frame = Frame::request("presence:join", presence_data(client_id, client)).with_table_id(table_id);
    table::broadcast(state, table_id, &frame, Some(client_id)).await;
}

/// Tell the remaining clients of a table that a connection left.
pub async fn announce_part(state: &AppState, table_id: Uuid, client_id: Uuid, client: &ConnectedClient) {
    let frame = Frame::request("presence:part", presence_data(client_id, client)).with_table_id(table_id);
    table::broadcast(state, table_id, &frame, Some(client_id)).await;
}

/// Refresh a connection's `last_seen`. Returns the client when it was stale
/// and has just come back, so the caller can re-announce it.
pub async fn touch(state: &AppState, table_id: Uuid, client_id: Uuid) -> Option<ConnectedClient> {
    let mut tables = state.tables.write().await;
    let client = tables.get_mut(&table_id)?.users.get_mut(&client_id)?;
    client.last_seen = Instant::now();
    if client.stale {
        client.stale = false;
        return Some(client.clone());
    }
    None
}

/// Users with at least one live connection, one entry per user.
pub async fn online_users(state: &AppState, table_id: Uuid) -> Vec<OnlineUser> {
    let tables = state.tables.read().await;
    let Some(table_state) = tables.get(&table_id) else {
        return Vec::new();
    };

    let mut by_user: HashMap<Uuid, OnlineUser> = HashMap::new();
    for client in table_state.users.values().filter(|c| !c.stale) {
        by_user.entry(client.user_id).or_insert_with(|| OnlineUser {
            user_id: client.user_id,
            display_name: client.display_name.clone(),
            role: client.role,
        });
    }
    let mut users: Vec<OnlineUser> = by_user.into_values().collect();
    users.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    users
}

/// Mark connections idle for longer than `timeout` as stale. Returns the
/// ones that changed in this pass.
pub fn collect_stale(
    users: &mut HashMap<Uuid, ConnectedClient>,
    now: Instant,
    timeout: Duration,
) -> Vec<(Uuid, ConnectedClient)> {
    users
        .iter_mut()
        .filter(|(_, c)| !c.stale && now.saturating_duration_since(c.last_seen) > timeout)
        .map(|(client_id, c)| {
            c.stale = true;
            (*client_id, c.clone())
        })
        .collect()
}

/// One sweep over every live table.
pub async fn sweep(state: &AppState, timeout: Duration) -> usize {
    let now = Instant::now();
    let newly_stale: Vec<(Uuid, Uuid, ConnectedClient)> = {
        let mut tables = state.tables.write().await;
        tables
            .iter_mut()
            .flat_map(|(table_id, t)| {
                collect_stale(&mut t.users, now, timeout)
                    .into_iter()
                    .map(move |(client_id, c)| (*table_id, client_id, c))
            })
            .collect()
    };

    for (table_id, client_id, client) in &newly_stale {
        debug!(%table_id, %client_id, user_id = %client.user_id, "client marked stale");
        let frame = Frame::request("presence:stale", presence_data(*client_id, client)).with_table_id(*table_id);
        table::broadcast(state, *table_id, &frame, Some(*client_id)).await;
    }
    newly_stale.len()
}

/// Spawn the background presence sweeper.
pub fn spawn_presence_sweeper(state: AppState) -> JoinHandle<()> {
    let timeout = state.config.presence_timeout;
    let every = state.config.presence_sweep;
    info!(timeout_secs = timeout.as_secs(), sweep_secs = every.as_secs(), "presence sweeper configured");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            sweep(&state, timeout).await;
        }
    })
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
