//! Scene service — maps, the active map, and scene snapshots.
//!
//! DESIGN
//! ======
//! A scene is the table's active map plus every token on it, with player
//! tokens resolved against their character sheet. Clients never patch the
//! scene incrementally: after any map or token mutation the server loads
//! the whole scene again and broadcasts it as `scene:snapshot`.
//!
//! Activation runs in one transaction that locks the table row, so two
//! masters activating different maps at once serialize and the table ends
//! with exactly one active map.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Frame, to_data};
use crate::services::table::{self, TableRole};
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("map not found: {0}")]
    MapNotFound(Uuid),
    #[error("table not found: {0}")]
    TableNotFound(Uuid),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for SceneError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MapNotFound(_) => "E_MAP_NOT_FOUND",
            Self::TableNotFound(_) => "E_TABLE_NOT_FOUND",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::Validation(_) => "E_VALIDATION",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Map {
    pub id: Uuid,
    pub table_id: Uuid,
    pub name: String,
    pub image_url: String,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A token as displayed: player tokens carry their character's name, icon
/// and health.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SceneToken {
    pub id: Uuid,
    pub map_id: Uuid,
    pub kind: String,
    pub character_id: Option<Uuid>,
    /// Owner of the linked character, for player tokens.
    pub owner_id: Option<Uuid>,
    pub name: Option<String>,
    pub icon_url: Option<String>,
    pub hit_points: Option<i32>,
    pub max_hit_points: Option<i32>,
    pub x: f64,
    pub y: f64,
    pub size: i32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SceneSnapshot {
    pub map: Option<Map>,
    pub tokens: Vec<SceneToken>,
}

const MAP_COLUMNS: &str = "id, table_id, name, image_url, is_active, created_at";

// =============================================================================
// LOAD
// =============================================================================

/// Load the active map and its resolved tokens.
pub async fn load_scene(pool: &PgPool, table_id: Uuid) -> Result<SceneSnapshot, SceneError> {
    let map = sqlx::query_as::<_, Map>(&format!(
        "SELECT {MAP_COLUMNS} FROM table_maps WHERE table_id = $1 AND is_active"
    ))
    .bind(table_id)
    .fetch_optional(pool)
    .await?;

    let Some(map) = map else {
        return Ok(SceneSnapshot::default());
    };

    let tokens = sqlx::query_as::<_, SceneToken>(
        "SELECT t.id, t.map_id, t.token_type AS kind, t.character_id, c.user_id AS owner_id,
                COALESCE(c.name, t.name) AS name,
                COALESCE(c.icon_url, t.icon_url) AS icon_url,
                COALESCE(c.current_hp, t.hit_points) AS hit_points,
                COALESCE(c.hit_points, t.max_hit_points) AS max_hit_points,
                t.x_position AS x, t.y_position AS y, t.size
         FROM map_tokens t
         LEFT JOIN character_sheets c ON c.id = t.character_id
         WHERE t.map_id = $1
         ORDER BY t.created_at ASC",
    )
    .bind(map.id)
    .fetch_all(pool)
    .await?;

    Ok(SceneSnapshot { map: Some(map), tokens })
}

/// Reload the scene, cache it in live state and broadcast it.
///
/// A failed load keeps the previous snapshot and is only logged; the next
/// mutation or `scene:load` tries again.
pub async fn refresh_scene(state: &AppState, table_id: Uuid) -> Option<SceneSnapshot> {
    let snapshot = match load_scene(&state.pool, table_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(%table_id, error = %e, "scene refresh failed; keeping previous snapshot");
            return None;
        }
    };

    publish_snapshot(state, table_id, &snapshot).await;
    Some(snapshot)
}

/// Store a loaded snapshot and broadcast it to every client of the table.
pub async fn publish_snapshot(state: &AppState, table_id: Uuid, snapshot: &SceneSnapshot) {
    {
        let mut tables = state.tables.write().await;
        if let Some(table_state) = tables.get_mut(&table_id) {
            table_state.scene = Some(snapshot.clone());
        }
    }
    let frame = Frame::request("scene:snapshot", to_data(snapshot)).with_table_id(table_id);
    table::broadcast(state, table_id, &frame, None).await;
}

/// Last snapshot cached in live state.
pub async fn cached_scene(state: &AppState, table_id: Uuid) -> Option<SceneSnapshot> {
    let tables = state.tables.read().await;
    tables.get(&table_id).and_then(|t| t.scene.clone())
}

// =============================================================================
// MAPS
// =============================================================================

fn require_master(role: TableRole) -> Result<(), SceneError> {
    if role.has_master_authority() { Ok(()) } else { Err(SceneError::Forbidden("only the master can manage maps")) }
}

pub(crate) fn validate_map(name: &str, image_url: &str) -> Result<(String, String), SceneError> {
    let name = name.trim();
    let image_url = image_url.trim();
    if name.is_empty() {
        return Err(SceneError::Validation("map name required".into()));
    }
    if image_url.is_empty() {
        return Err(SceneError::Validation("image_url required".into()));
    }
    Ok((name.to_owned(), image_url.to_owned()))
}

pub async fn list_maps(pool: &PgPool, table_id: Uuid) -> Result<Vec<Map>, SceneError> {
    let maps = sqlx::query_as::<_, Map>(&format!(
        "SELECT {MAP_COLUMNS} FROM table_maps WHERE table_id = $1 ORDER BY created_at ASC"
    ))
    .bind(table_id)
    .fetch_all(pool)
    .await?;
    Ok(maps)
}

/// Add a map to the table. The table's first map becomes active.
pub async fn create_map(
    pool: &PgPool,
    table_id: Uuid,
    role: TableRole,
    name: &str,
    image_url: &str,
    activate: bool,
) -> Result<Map, SceneError> {
    require_master(role)?;
    let (name, image_url) = validate_map(name, image_url)?;

    let map = sqlx::query_as::<_, Map>(&format!(
        "INSERT INTO table_maps (table_id, name, image_url) VALUES ($1, $2, $3) RETURNING {MAP_COLUMNS}"
    ))
    .bind(table_id)
    .bind(&name)
    .bind(&image_url)
    .fetch_one(pool)
    .await?;

    let has_active: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM table_maps WHERE table_id = $1 AND is_active)")
            .bind(table_id)
            .fetch_one(pool)
            .await?;
    if activate || !has_active {
        return activate_map(pool, table_id, role, map.id).await;
    }
    Ok(map)
}

/// Make `map_id` the only active map of the table.
///
/// # Errors
///
/// Returns `MapNotFound` if the map is not part of the table.
pub async fn activate_map(pool: &PgPool, table_id: Uuid, role: TableRole, map_id: Uuid) -> Result<Map, SceneError> {
    require_master(role)?;

    let mut tx = pool.begin().await?;
    let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM game_tables WHERE id = $1 FOR UPDATE")
        .bind(table_id)
        .fetch_optional(&mut *tx)
        .await?;
    if locked.is_none() {
        return Err(SceneError::TableNotFound(table_id));
    }

    sqlx::query("UPDATE table_maps SET is_active = false WHERE table_id = $1 AND is_active")
        .bind(table_id)
        .execute(&mut *tx)
        .await?;
    let map = sqlx::query_as::<_, Map>(&format!(
        "UPDATE table_maps SET is_active = true WHERE id = $1 AND table_id = $2 RETURNING {MAP_COLUMNS}"
    ))
    .bind(map_id)
    .bind(table_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(SceneError::MapNotFound(map_id))?;
    tx.commit().await?;

    info!(%table_id, %map_id, "map activated");
    Ok(map)
}

/// Delete a map and its tokens. Deleting the active map leaves the table
/// without one.
pub async fn delete_map(pool: &PgPool, table_id: Uuid, role: TableRole, map_id: Uuid) -> Result<(), SceneError> {
    require_master(role)?;
    let deleted = sqlx::query("DELETE FROM table_maps WHERE id = $1 AND table_id = $2")
        .bind(map_id)
        .bind(table_id)
        .execute(pool)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(SceneError::MapNotFound(map_id));
    }
    info!(%table_id, %map_id, "map deleted");
    Ok(())
}

#[cfg(test)]
#[path = "scene_test.rs"]
mod tests;
