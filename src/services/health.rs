//! Damage and healing for tokens and characters.
//!
//! Enemy tokens keep their own hit points. Player tokens and direct
//! character targets both write the character's `current_hp`, so the sheet
//! and every token showing it stay in agreement.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::services::table::TableRole;

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("target not found: {0}")]
    NotFound(Uuid),
    #[error("forbidden: only the master can change health")]
    Forbidden,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for HealthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_TARGET_NOT_FOUND",
            Self::Forbidden => "E_FORBIDDEN",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Damage,
    Heal,
}

impl Direction {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "damage" => Some(Self::Damage),
            "heal" => Some(Self::Heal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTarget {
    Token(Uuid),
    Character(Uuid),
}

/// What was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthChange {
    /// Character whose `current_hp` changed, if any.
    pub character_id: Option<Uuid>,
    /// Enemy token whose hit points changed, if any.
    pub token_id: Option<Uuid>,
    pub previous: i32,
    pub current: i32,
    pub max: i32,
}

/// New health after applying `amount` in `direction`, clamped to
/// `[0, max]`. Returns `None` for a non-positive amount.
#[must_use]
pub fn apply_change(current: i32, max: i32, amount: i32, direction: Direction) -> Option<i32> {
    if amount <= 0 {
        return None;
    }
    let next = match direction {
        Direction::Damage => current.saturating_sub(amount),
        Direction::Heal => current.saturating_add(amount),
    };
    Some(next.clamp(0, max.max(0)))
}

/// Apply damage or healing to a token or character in `table_id`.
///
/// Returns `Ok(None)` for a non-positive amount without touching the
/// database.
///
/// # Errors
///
/// Returns `Forbidden` for non-masters and `NotFound` if the target is not
/// part of the table.
pub async fn apply_to_target(
    pool: &PgPool,
    table_id: Uuid,
    role: TableRole,
    target: HealthTarget,
    amount: i32,
    direction: Direction,
) -> Result<Option<HealthChange>, HealthError> {
    if !role.has_master_authority() {
        return Err(HealthError::Forbidden);
    }
    if amount <= 0 {
        return Ok(None);
    }

    let character_id = match target {
        HealthTarget::Character(id) => id,
        HealthTarget::Token(token_id) => {
            let row = sqlx::query_as::<_, (String, Option<Uuid>, Option<i32>, Option<i32>)>(
                "SELECT t.token_type, t.character_id, t.hit_points, t.max_hit_points
                 FROM map_tokens t JOIN table_maps m ON m.id = t.map_id
                 WHERE t.id = $1 AND m.table_id = $2",
            )
            .bind(token_id)
            .bind(table_id)
            .fetch_optional(pool)
            .await?
            .ok_or(HealthError::NotFound(token_id))?;

            match row {
                (_, Some(character_id), _, _) => character_id,
                (_, None, hit_points, max_hit_points) => {
                    let previous = hit_points.unwrap_or(0);
                    let max = max_hit_points.unwrap_or(0);
                    let Some(current) = apply_change(previous, max, amount, direction) else {
                        return Ok(None);
                    };
                    sqlx::query("UPDATE map_tokens SET hit_points = $2 WHERE id = $1")
                        .bind(token_id)
                        .bind(current)
                        .execute(pool)
                        .await?;
                    return Ok(Some(HealthChange {
                        character_id: None,
                        token_id: Some(token_id),
                        previous,
                        current,
                        max,
                    }));
                }
            }
        }
    };

    let (previous, max) = sqlx::query_as::<_, (i32, i32)>(
        "SELECT current_hp, hit_points FROM character_sheets WHERE id = $1 AND table_id = $2",
    )
    .bind(character_id)
    .bind(table_id)
    .fetch_optional(pool)
    .await?
    .ok_or(HealthError::NotFound(character_id))?;

    let Some(current) = apply_change(previous, max, amount, direction) else {
        return Ok(None);
    };
    sqlx::query("UPDATE character_sheets SET current_hp = $2 WHERE id = $1")
        .bind(character_id)
        .bind(current)
        .execute(pool)
        .await?;
    Ok(Some(HealthChange { character_id: Some(character_id), token_id: None, previous, current, max }))
}

#[cfg(test)]
#[path = "health_test.rs"]
mod tests;
