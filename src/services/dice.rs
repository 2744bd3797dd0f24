//! Dice service — validated rolls, persisted history.
//!
//! Rolls are immutable once written. The websocket layer announces
//! `dice:rolling`, waits the configured delay, then calls [`roll_and_record`]
//! and broadcasts the result.

use rand::Rng;
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

pub const MIN_DICE: i32 = 1;
pub const MAX_DICE: i32 = 20;
pub const MIN_FACES: i32 = 2;
pub const MAX_FACES: i32 = 100;
pub const HISTORY_LIMIT: i64 = 20;

#[derive(Debug, thiserror::Error)]
pub enum DiceError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for DiceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DiceRoll {
    pub id: Uuid,
    pub table_id: Uuid,
    pub user_id: Uuid,
    pub character_name: Option<String>,
    pub num_dice: i32,
    pub num_faces: i32,
    pub results: Vec<i32>,
    pub total: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Check a roll request before anything is announced.
///
/// # Errors
///
/// Returns `Validation` if the count or faces fall outside the allowed range.
pub fn validate_roll(num_dice: i32, num_faces: i32) -> Result<(), DiceError> {
    if !(MIN_DICE..=MAX_DICE).contains(&num_dice) {
        return Err(DiceError::Validation(format!("num_dice must be between {MIN_DICE} and {MAX_DICE}")));
    }
    if !(MIN_FACES..=MAX_FACES).contains(&num_faces) {
        return Err(DiceError::Validation(format!("num_faces must be between {MIN_FACES} and {MAX_FACES}")));
    }
    Ok(())
}

/// Roll `num_dice` dice with `num_faces` faces each.
pub fn roll(rng: &mut impl Rng, num_dice: i32, num_faces: i32) -> (Vec<i32>, i32) {
    let results: Vec<i32> = (0..num_dice).map(|_| rng.random_range(1..=num_faces)).collect();
    let total = results.iter().sum();
    (results, total)
}

/// Roll and persist.
pub async fn roll_and_record(
    pool: &PgPool,
    table_id: Uuid,
    user_id: Uuid,
    character_name: Option<&str>,
    num_dice: i32,
    num_faces: i32,
) -> Result<DiceRoll, DiceError> {
    validate_roll(num_dice, num_faces)?;
    let (results, total) = roll(&mut rand::rng(), num_dice, num_faces);

    let row = sqlx::query_as::<_, DiceRoll>(
        "INSERT INTO dice_rolls (table_id, user_id, character_name, num_dice, num_faces, results, total)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id, table_id, user_id, character_name, num_dice, num_faces, results, total, created_at",
    )
    .bind(table_id)
    .bind(user_id)
    .bind(character_name)
    .bind(num_dice)
    .bind(num_faces)
    .bind(&results)
    .bind(total)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Most recent rolls, newest first.
pub async fn list_rolls(pool: &PgPool, table_id: Uuid) -> Result<Vec<DiceRoll>, DiceError> {
    let rows = sqlx::query_as::<_, DiceRoll>(
        "SELECT id, table_id, user_id, character_name, num_dice, num_faces, results, total, created_at
         FROM dice_rolls WHERE table_id = $1
         ORDER BY created_at DESC LIMIT $2",
    )
    .bind(table_id)
    .bind(HISTORY_LIMIT)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
#[path = "dice_test.rs"]
mod tests;
