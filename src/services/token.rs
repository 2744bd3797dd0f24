//! Token service — place, move, resize and remove tokens on the active map.
//!
//! DESIGN
//! ======
//! Tokens are either a player's character or an enemy built from a
//! template. A player token borrows its name, icon and health from the
//! character; an enemy token carries its own hit points.
//!
//! Positions are percentages of the map image, so every write clamps to
//! [0, 100] on both axes. Sizes clamp to `TOKEN_SIZE_MIN..=TOKEN_SIZE_MAX`.
//! Every statement scopes the token to its table through `table_maps` so a
//! client joined to one table can never touch another table's tokens.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::services::table::TableRole;

// =============================================================================
// CONSTANTS
// =============================================================================

pub const TOKEN_SIZE_MIN: i32 = 20;
pub const TOKEN_SIZE_MAX: i32 = 160;
pub const TOKEN_SIZE_DEFAULT: i32 = 48;

/// Where new tokens land when the caller gives no position.
pub const DEFAULT_POSITION: (f64, f64) = (50.0, 50.0);

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("table has no active map")]
    NoActiveMap,
    #[error("token not found: {0}")]
    NotFound(Uuid),
    #[error("character not found: {0}")]
    CharacterNotFound(Uuid),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for TokenError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NoActiveMap => "E_NO_ACTIVE_MAP",
            Self::NotFound(_) => "E_TOKEN_NOT_FOUND",
            Self::CharacterNotFound(_) => "E_CHARACTER_NOT_FOUND",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::Validation(_) => "E_VALIDATION",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// What a token represents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TokenKind {
    Player { character_id: Uuid },
    Enemy { hit_points: i32, max_hit_points: i32 },
}

/// Request to put a token on the active map.
#[derive(Debug, Clone)]
pub enum PlaceRequest {
    Character { character_id: Uuid },
    Enemy { name: String, icon_url: Option<String>, max_hit_points: i32, hit_points: Option<i32> },
}

#[derive(Debug, Clone, Serialize)]
pub struct Token {
    pub id: Uuid,
    pub map_id: Uuid,
    #[serde(flatten)]
    pub kind: TokenKind,
    pub name: Option<String>,
    pub icon_url: Option<String>,
    pub x: f64,
    pub y: f64,
    pub size: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    map_id: Uuid,
    token_type: String,
    character_id: Option<Uuid>,
    name: Option<String>,
    icon_url: Option<String>,
    hit_points: Option<i32>,
    max_hit_points: Option<i32>,
    x: f64,
    y: f64,
    size: i32,
}

impl TokenRow {
    fn into_token(self) -> Result<Token, TokenError> {
        let kind = match (self.token_type.as_str(), self.character_id) {
            ("player", Some(character_id)) => TokenKind::Player { character_id },
            ("enemy", _) => TokenKind::Enemy {
                hit_points: self.hit_points.unwrap_or(0),
                max_hit_points: self.max_hit_points.unwrap_or(0),
            },
            (other, _) => return Err(TokenError::Validation(format!("unknown token type {other}"))),
        };
        Ok(Token {
            id: self.id,
            map_id: self.map_id,
            kind,
            name: self.name,
            icon_url: self.icon_url,
            x: self.x,
            y: self.y,
            size: self.size,
        })
    }
}

const TOKEN_COLUMNS: &str = "id, map_id, token_type, character_id, name, icon_url, hit_points, max_hit_points,
     x_position AS x, y_position AS y, size";

/// Result of a place request.
#[derive(Debug, Clone)]
pub enum PlaceOutcome {
    Placed(Token),
    /// The character already has a token on this map; nothing was written.
    AlreadyPlaced { token_id: Uuid },
}

// =============================================================================
// GEOMETRY
// =============================================================================

fn clamp_percent(v: f64) -> f64 {
    if v.is_nan() { DEFAULT_POSITION.0 } else { v.clamp(0.0, 100.0) }
}

/// Clamp a position into the map's percentage space.
#[must_use]
pub fn clamp_position(x: f64, y: f64) -> (f64, f64) {
    (clamp_percent(x), clamp_percent(y))
}

#[must_use]
pub fn clamp_size(size: i32) -> i32 {
    size.clamp(TOKEN_SIZE_MIN, TOKEN_SIZE_MAX)
}

/// Rubber-band selection rectangle in map percentages. Corners may be given
/// in any order.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Rect {
    /// Inclusive containment test.
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (left, right) = (self.x1.min(self.x2), self.x1.max(self.x2));
        let (top, bottom) = (self.y1.min(self.y2), self.y1.max(self.y2));
        (left..=right).contains(&x) && (top..=bottom).contains(&y)
    }
}

/// Ids of the positioned tokens that fall inside `rect`.
pub fn select_in_rect(rect: &Rect, tokens: impl IntoIterator<Item = (Uuid, f64, f64)>) -> Vec<Uuid> {
    tokens
        .into_iter()
        .filter(|(_, x, y)| rect.contains(*x, *y))
        .map(|(id, _, _)| id)
        .collect()
}

/// Tokens addressed by a resize.
#[derive(Debug, Clone)]
pub enum ResizeTarget {
    Ids(Vec<Uuid>),
    Rect(Rect),
}

// =============================================================================
// AUTHORIZATION
// =============================================================================

fn require_master(role: TableRole, what: &'static str) -> Result<(), TokenError> {
    if role.has_master_authority() { Ok(()) } else { Err(TokenError::Forbidden(what)) }
}

pub(crate) fn validate_enemy(
    name: &str,
    max_hit_points: i32,
    hit_points: Option<i32>,
) -> Result<(String, i32, i32), TokenError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TokenError::Validation("enemy name required".into()));
    }
    if max_hit_points < 1 {
        return Err(TokenError::Validation("max_hit_points must be at least 1".into()));
    }
    let hit_points = hit_points.unwrap_or(max_hit_points).clamp(0, max_hit_points);
    Ok((name.to_owned(), hit_points, max_hit_points))
}

// =============================================================================
// QUERIES
// =============================================================================

/// Id of the table's active map.
pub async fn active_map_id(pool: &PgPool, table_id: Uuid) -> Result<Uuid, TokenError> {
    sqlx::query_scalar("SELECT id FROM table_maps WHERE table_id = $1 AND is_active")
        .bind(table_id)
        .fetch_optional(pool)
        .await?
        .ok_or(TokenError::NoActiveMap)
}

/// Current position of a token in `table_id`.
pub async fn token_position(pool: &PgPool, table_id: Uuid, token_id: Uuid) -> Result<(f64, f64), TokenError> {
    sqlx::query_as::<_, (f64, f64)>(
        "SELECT t.x_position, t.y_position
         FROM map_tokens t JOIN table_maps m ON m.id = t.map_id
         WHERE t.id = $1 AND m.table_id = $2",
    )
    .bind(token_id)
    .bind(table_id)
    .fetch_optional(pool)
    .await?
    .ok_or(TokenError::NotFound(token_id))
}

// =============================================================================
// PLACE
// =============================================================================

/// Place a token on the table's active map.
///
/// Players may only place their own character. A character already on the
/// map yields `AlreadyPlaced` without writing.
///
/// # Errors
///
/// Returns `NoActiveMap`, `CharacterNotFound`, `Forbidden` or `Validation`.
#[allow(clippy::too_many_arguments)]
pub async fn place_token(
    pool: &PgPool,
    table_id: Uuid,
    user_id: Uuid,
    role: TableRole,
    request: PlaceRequest,
    position: Option<(f64, f64)>,
    size: Option<i32>,
) -> Result<PlaceOutcome, TokenError> {
    let map_id = active_map_id(pool, table_id).await?;
    let (x, y) = position.map_or(DEFAULT_POSITION, |(x, y)| clamp_position(x, y));
    let size = size.map_or(TOKEN_SIZE_DEFAULT, clamp_size);

    match request {
        PlaceRequest::Character { character_id } => {
            let owner: Option<Uuid> =
                sqlx::query_scalar("SELECT user_id FROM character_sheets WHERE id = $1 AND table_id = $2")
                    .bind(character_id)
                    .bind(table_id)
                    .fetch_optional(pool)
                    .await?;
            let owner = owner.ok_or(TokenError::CharacterNotFound(character_id))?;
            if owner != user_id && !role.has_master_authority() {
                return Err(TokenError::Forbidden("only the master can place other players' characters"));
            }

            let inserted = sqlx::query_as::<_, TokenRow>(&format!(
                "INSERT INTO map_tokens (map_id, token_type, character_id, x_position, y_position, size)
                 VALUES ($1, 'player', $2, $3, $4, $5)
                 ON CONFLICT (map_id, character_id) WHERE character_id IS NOT NULL DO NOTHING
                 RETURNING {TOKEN_COLUMNS}"
            ))
            .bind(map_id)
            .bind(character_id)
            .bind(x)
            .bind(y)
            .bind(size)
            .fetch_optional(pool)
            .await?;

            if let Some(row) = inserted {
                return Ok(PlaceOutcome::Placed(row.into_token()?));
            }
            let token_id: Uuid =
                sqlx::query_scalar("SELECT id FROM map_tokens WHERE map_id = $1 AND character_id = $2")
                    .bind(map_id)
                    .bind(character_id)
                    .fetch_one(pool)
                    .await?;
            Ok(PlaceOutcome::AlreadyPlaced { token_id })
        }
        PlaceRequest::Enemy { name, icon_url, max_hit_points, hit_points } => {
            require_master(role, "only the master can place enemies")?;
            let (name, hit_points, max_hit_points) = validate_enemy(&name, max_hit_points, hit_points)?;

            let row = sqlx::query_as::<_, TokenRow>(&format!(
                "INSERT INTO map_tokens
                     (map_id, token_type, name, icon_url, hit_points, max_hit_points, x_position, y_position, size)
                 VALUES ($1, 'enemy', $2, $3, $4, $5, $6, $7, $8)
                 RETURNING {TOKEN_COLUMNS}"
            ))
            .bind(map_id)
            .bind(name)
            .bind(icon_url)
            .bind(hit_points)
            .bind(max_hit_points)
            .bind(x)
            .bind(y)
            .bind(size)
            .fetch_one(pool)
            .await?;
            Ok(PlaceOutcome::Placed(row.into_token()?))
        }
    }
}

// =============================================================================
// MOVE / RESIZE / REMOVE
// =============================================================================

/// Write a token's position. Used by `token:move` and by `drag:end`.
pub async fn move_token(
    pool: &PgPool,
    table_id: Uuid,
    role: TableRole,
    token_id: Uuid,
    x: f64,
    y: f64,
) -> Result<(f64, f64), TokenError> {
    require_master(role, "only the master can move tokens")?;
    let (x, y) = clamp_position(x, y);
    let updated = sqlx::query(
        "UPDATE map_tokens t SET x_position = $3, y_position = $4
         FROM table_maps m
         WHERE t.id = $1 AND t.map_id = m.id AND m.table_id = $2",
    )
    .bind(token_id)
    .bind(table_id)
    .bind(x)
    .bind(y)
    .execute(pool)
    .await?
    .rows_affected();
    if updated == 0 {
        return Err(TokenError::NotFound(token_id));
    }
    Ok((x, y))
}

/// Resize one or more tokens. Returns the ids that were updated.
pub async fn resize_tokens(
    pool: &PgPool,
    table_id: Uuid,
    role: TableRole,
    target: ResizeTarget,
    size: i32,
) -> Result<Vec<Uuid>, TokenError> {
    require_master(role, "only the master can resize tokens")?;
    let size = clamp_size(size);

    let ids = match target {
        ResizeTarget::Ids(ids) => ids,
        ResizeTarget::Rect(rect) => {
            let positioned = sqlx::query_as::<_, (Uuid, f64, f64)>(
                "SELECT t.id, t.x_position, t.y_position
                 FROM map_tokens t JOIN table_maps m ON m.id = t.map_id
                 WHERE m.table_id = $1 AND m.is_active",
            )
            .bind(table_id)
            .fetch_all(pool)
            .await?;
            select_in_rect(&rect, positioned)
        }
    };
    if ids.is_empty() {
        return Ok(ids);
    }

    let updated: Vec<Uuid> = sqlx::query_scalar(
        "UPDATE map_tokens t SET size = $3
         FROM table_maps m
         WHERE t.id = ANY($1) AND t.map_id = m.id AND m.table_id = $2
         RETURNING t.id",
    )
    .bind(&ids)
    .bind(table_id)
    .bind(size)
    .fetch_all(pool)
    .await?;
    Ok(updated)
}

/// Delete a token. The character it showed is untouched.
pub async fn remove_token(pool: &PgPool, table_id: Uuid, role: TableRole, token_id: Uuid) -> Result<(), TokenError> {
    require_master(role, "only the master can remove tokens")?;
    let deleted = sqlx::query(
        "DELETE FROM map_tokens t USING table_maps m
         WHERE t.id = $1 AND t.map_id = m.id AND m.table_id = $2",
    )
    .bind(token_id)
    .bind(table_id)
    .execute(pool)
    .await?
    .rows_affected();
    if deleted == 0 {
        return Err(TokenError::NotFound(token_id));
    }
    Ok(())
}

#[cfg(test)]
#[path = "token_test.rs"]
mod tests;
