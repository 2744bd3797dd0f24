//! Table service — game tables, memberships, turn order, live join/part.
//!
//! DESIGN
//! ======
//! A "table" is one running campaign. Membership rows decide every
//! permission downstream: REST handlers check them per request via
//! `ensure_table_permission`, while websocket clients have their role
//! resolved once at `table:join` and cached in the live `TableState`.
//!
//! Live table state exists only while clients are connected. Parting the
//! last client evicts it; there is nothing to flush because every mutation
//! is written through to Postgres when it happens.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::frame::Frame;
use crate::services::character::XP_PER_LEVEL;
use crate::state::{AppState, ConnectedClient, TableState};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("table not found: {0}")]
    NotFound(Uuid),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for TableError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_TABLE_NOT_FOUND",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::Validation(_) => "E_VALIDATION",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Role of a user within one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableRole {
    Admin,
    Master,
    Player,
}

impl TableRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Master => "master",
            Self::Player => "player",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "admin" => Some(Self::Admin),
            "master" => Some(Self::Master),
            "player" => Some(Self::Player),
            _ => None,
        }
    }

    /// Admins moderate like masters.
    #[must_use]
    pub fn has_master_authority(self) -> bool {
        matches!(self, Self::Admin | Self::Master)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePermission {
    /// Any member.
    View,
    /// Master authority.
    Master,
}

#[must_use]
pub fn role_satisfies(role: TableRole, permission: TablePermission) -> bool {
    match permission {
        TablePermission::View => true,
        TablePermission::Master => role.has_master_authority(),
    }
}

/// Highest valid `max_level` accepted on create/update.
pub const MAX_LEVEL_CAP: i32 = 1000;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GameTable {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub max_level: i32,
    pub current_turn_character_id: Option<Uuid>,
    pub created_by: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A table as listed on a user's dashboard.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TableSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub max_level: i32,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MemberRow {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: String,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TablePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub max_level: Option<i32>,
}

/// What a websocket client learns on a successful join.
#[derive(Debug, Clone)]
pub struct JoinInfo {
    pub role: TableRole,
    pub display_name: String,
    pub table: GameTable,
}

// =============================================================================
// VALIDATION
// =============================================================================

pub(crate) fn normalize_name(raw: &str) -> Result<String, TableError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(TableError::Validation("name required".into()));
    }
    Ok(name.to_owned())
}

pub(crate) fn validate_max_level(max_level: i32) -> Result<i32, TableError> {
    if !(1..=MAX_LEVEL_CAP).contains(&max_level) {
        return Err(TableError::Validation(format!("max_level must be between 1 and {MAX_LEVEL_CAP}")));
    }
    Ok(max_level)
}

// =============================================================================
// CRUD
// =============================================================================

/// Create a table and make the creator its master.
///
/// # Errors
///
/// Returns `Validation` for an empty name or out-of-range level cap.
pub async fn create_table(
    pool: &PgPool,
    name: &str,
    description: Option<&str>,
    max_level: Option<i32>,
    created_by: Uuid,
) -> Result<GameTable, TableError> {
    let name = normalize_name(name)?;
    let max_level = validate_max_level(max_level.unwrap_or(20))?;

    let mut tx = pool.begin().await?;
    let table = sqlx::query_as::<_, GameTable>(
        "INSERT INTO game_tables (name, description, max_level, created_by)
         VALUES ($1, $2, $3, $4)
         RETURNING id, name, description, max_level, current_turn_character_id, created_by, created_at",
    )
    .bind(&name)
    .bind(description.map(str::trim).filter(|d| !d.is_empty()))
    .bind(max_level)
    .bind(created_by)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO table_memberships (table_id, user_id, role) VALUES ($1, $2, 'master')")
        .bind(table.id)
        .bind(created_by)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(table_id = %table.id, %created_by, "table created");
    Ok(table)
}

/// List tables the user belongs to, newest first.
pub async fn list_tables_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<TableSummary>, TableError> {
    let rows = sqlx::query_as::<_, TableSummary>(
        "SELECT t.id, t.name, t.description, t.max_level, m.role
         FROM game_tables t
         JOIN table_memberships m ON m.table_id = t.id
         WHERE m.user_id = $1
         ORDER BY t.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch one table.
///
/// # Errors
///
/// Returns `NotFound` if the table does not exist.
pub async fn get_table(pool: &PgPool, table_id: Uuid) -> Result<GameTable, TableError> {
    sqlx::query_as::<_, GameTable>(
        "SELECT id, name, description, max_level, current_turn_character_id, created_by, created_at
         FROM game_tables WHERE id = $1",
    )
    .bind(table_id)
    .fetch_optional(pool)
    .await?
    .ok_or(TableError::NotFound(table_id))
}

/// Apply a partial update to name/description/max level. A new level cap
/// recomputes every stored character level in the same transaction.
pub async fn update_table(pool: &PgPool, table_id: Uuid, patch: &TablePatch) -> Result<GameTable, TableError> {
    let name = patch.name.as_deref().map(normalize_name).transpose()?;
    let max_level = patch.max_level.map(validate_max_level).transpose()?;

    let mut tx = pool.begin().await?;
    let table = sqlx::query_as::<_, GameTable>(
        "UPDATE game_tables SET
             name = COALESCE($2, name),
             description = COALESCE($3, description),
             max_level = COALESCE($4, max_level)
         WHERE id = $1
         RETURNING id, name, description, max_level, current_turn_character_id, created_by, created_at",
    )
    .bind(table_id)
    .bind(name)
    .bind(patch.description.as_deref().map(str::trim))
    .bind(max_level)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(TableError::NotFound(table_id))?;

    if max_level.is_some() {
        let relevelled = sqlx::query(
            "UPDATE character_sheets SET level = LEAST(GREATEST(xp, 0) / $2, $3)
             WHERE table_id = $1",
        )
        .bind(table_id)
        .bind(XP_PER_LEVEL)
        .bind(table.max_level)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        info!(%table_id, max_level = table.max_level, relevelled, "table level cap changed");
    }
    tx.commit().await?;
    Ok(table)
}

/// Set or clear the character whose turn is active.
///
/// # Errors
///
/// Returns `Validation` if the character belongs to another table.
pub async fn set_turn(pool: &PgPool, table_id: Uuid, character_id: Option<Uuid>) -> Result<GameTable, TableError> {
    if let Some(character_id) = character_id {
        let belongs: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM character_sheets WHERE id = $1 AND table_id = $2)",
        )
        .bind(character_id)
        .bind(table_id)
        .fetch_one(pool)
        .await?;
        if !belongs {
            return Err(TableError::Validation("character is not part of this table".into()));
        }
    }

    sqlx::query_as::<_, GameTable>(
        "UPDATE game_tables SET current_turn_character_id = $2 WHERE id = $1
         RETURNING id, name, description, max_level, current_turn_character_id, created_by, created_at",
    )
    .bind(table_id)
    .bind(character_id)
    .fetch_optional(pool)
    .await?
    .ok_or(TableError::NotFound(table_id))
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

/// Resolve a user's role in a table.
pub async fn member_role(pool: &PgPool, table_id: Uuid, user_id: Uuid) -> Result<Option<TableRole>, TableError> {
    let role: Option<String> =
        sqlx::query_scalar("SELECT role FROM table_memberships WHERE table_id = $1 AND user_id = $2")
            .bind(table_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(role.as_deref().and_then(TableRole::parse))
}

/// Require that `user_id` holds `permission` in `table_id`.
///
/// Non-members get `NotFound` so table ids do not leak.
pub async fn ensure_table_permission(
    pool: &PgPool,
    table_id: Uuid,
    user_id: Uuid,
    permission: TablePermission,
) -> Result<TableRole, TableError> {
    let Some(role) = member_role(pool, table_id, user_id).await? else {
        return Err(TableError::NotFound(table_id));
    };
    if !role_satisfies(role, permission) {
        return Err(TableError::Forbidden("master role required"));
    }
    Ok(role)
}

pub async fn list_members(pool: &PgPool, table_id: Uuid) -> Result<Vec<MemberRow>, TableError> {
    let rows = sqlx::query_as::<_, MemberRow>(
        "SELECT m.user_id, u.display_name, u.avatar_url, m.role, m.joined_at
         FROM table_memberships m
         JOIN users u ON u.id = m.user_id
         WHERE m.table_id = $1
         ORDER BY m.joined_at ASC",
    )
    .bind(table_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Remove a member and delete their characters in this table.
///
/// # Errors
///
/// Returns `Validation` when the actor targets themselves and `NotFound`
/// when the target is not a member.
pub async fn kick_member(pool: &PgPool, table_id: Uuid, actor_id: Uuid, target_id: Uuid) -> Result<u64, TableError> {
    if actor_id == target_id {
        return Err(TableError::Validation("cannot remove yourself from the table".into()));
    }

    let mut tx = pool.begin().await?;
    let deleted_characters = sqlx::query("DELETE FROM character_sheets WHERE table_id = $1 AND user_id = $2")
        .bind(table_id)
        .bind(target_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    let removed = sqlx::query("DELETE FROM table_memberships WHERE table_id = $1 AND user_id = $2")
        .bind(table_id)
        .bind(target_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(TableError::NotFound(table_id));
    }
    tx.commit().await?;

    info!(%table_id, %target_id, deleted_characters, "member removed from table");
    Ok(deleted_characters)
}

// =============================================================================
// LIVE JOIN / PART
// =============================================================================

/// Join a table's live state. Verifies membership before registering the
/// client's sender.
///
/// # Errors
///
/// Returns `NotFound` if the table does not exist or the user is not a member.
pub async fn join_table(
    state: &AppState,
    table_id: Uuid,
    user_id: Uuid,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<JoinInfo, TableError> {
    let table = get_table(&state.pool, table_id).await?;
    let Some(role) = member_role(&state.pool, table_id, user_id).await? else {
        return Err(TableError::NotFound(table_id));
    };
    let display_name: String = sqlx::query_scalar("SELECT display_name FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .unwrap_or_else(|| "unknown".to_owned());

    let mut tables = state.tables.write().await;
    let table_state = tables.entry(table_id).or_insert_with(TableState::new);
    table_state.clients.insert(client_id, tx);
    table_state
        .users
        .insert(client_id, ConnectedClient::new(user_id, display_name.clone(), role));

    info!(%table_id, %client_id, %user_id, clients = table_state.clients.len(), "client joined table");
    Ok(JoinInfo { role, display_name, table })
}

/// Leave a table. Abandons the client's open drags and evicts the live
/// state when the last client leaves.
pub async fn part_table(state: &AppState, table_id: Uuid, client_id: Uuid) {
    let mut tables = state.tables.write().await;
    let Some(table_state) = tables.get_mut(&table_id) else {
        return;
    };

    table_state.clients.remove(&client_id);
    table_state.users.remove(&client_id);
    let abandoned = table_state.drags.abandon_client(client_id);
    info!(%table_id, %client_id, abandoned, remaining = table_state.clients.len(), "client left table");

    if table_state.clients.is_empty() {
        tables.remove(&table_id);
        info!(%table_id, "evicted table from memory");
    }
}

/// Identity of a joined client, if it is still connected.
pub async fn connected_client(state: &AppState, table_id: Uuid, client_id: Uuid) -> Option<ConnectedClient> {
    let tables = state.tables.read().await;
    tables
        .get(&table_id)
        .and_then(|t| t.users.get(&client_id))
        .cloned()
}

/// Disconnect every live client of `user_id` from the table and notify them.
/// Returns how many connections were removed.
pub async fn evict_user(state: &AppState, table_id: Uuid, user_id: Uuid) -> usize {
    let mut tables = state.tables.write().await;
    let Some(table_state) = tables.get_mut(&table_id) else {
        return 0;
    };

    let client_ids: Vec<Uuid> = table_state
        .users
        .iter()
        .filter(|(_, c)| c.user_id == user_id)
        .map(|(id, _)| *id)
        .collect();

    for client_id in &client_ids {
        table_state.users.remove(client_id);
        table_state.drags.abandon_client(*client_id);
        if let Some(tx) = table_state.clients.remove(client_id) {
            let notice = Frame::request("table:kicked", crate::frame::Data::new()).with_table_id(table_id);
            let _ = tx.try_send(notice);
        }
    }
    if table_state.clients.is_empty() {
        tables.remove(&table_id);
    }
    client_ids.len()
}

/// Evict `user_id` from every live table. Returns the tables that lost a
/// connection.
pub async fn evict_user_everywhere(state: &AppState, user_id: Uuid) -> Vec<Uuid> {
    let table_ids: Vec<Uuid> = {
        let tables = state.tables.read().await;
        tables
            .iter()
            .filter(|(_, t)| t.users.values().any(|c| c.user_id == user_id))
            .map(|(id, _)| *id)
            .collect()
    };
    for table_id in &table_ids {
        evict_user(state, *table_id, user_id).await;
    }
    table_ids
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast a frame to all clients in a table, optionally excluding one.
pub async fn broadcast(state: &AppState, table_id: Uuid, frame: &Frame, exclude: Option<Uuid>) {
    let tables = state.tables.read().await;
    let Some(table_state) = tables.get(&table_id) else {
        return;
    };

    for (client_id, tx) in &table_state.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        let _ = tx.try_send(frame.clone());
    }
}

#[cfg(test)]
#[path = "table_test.rs"]
mod tests;
