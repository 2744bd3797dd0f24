//! Invitation service — single-use links that add a player to a table.
//!
//! DESIGN
//! ======
//! The raw token is shown to the master once and never stored; the
//! database keeps only its SHA-256 hex digest. Redemption marks the row
//! used with a conditional UPDATE, so a token can be consumed exactly once
//! even under concurrent redeems. An expired or used token stays rejected
//! on every retry.

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::services::character::{self, Character, CharacterDraft, CharacterError};
use crate::services::session::{bytes_to_hex, generate_token};

#[derive(Debug, thiserror::Error)]
pub enum InvitationError {
    #[error("invitation not found")]
    NotFound,
    #[error("invitation expired")]
    Expired,
    #[error("invitation already used")]
    AlreadyUsed,
    #[error(transparent)]
    Character(#[from] CharacterError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for InvitationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound => "E_INVITATION_NOT_FOUND",
            Self::Expired => "E_INVITATION_EXPIRED",
            Self::AlreadyUsed => "E_INVITATION_USED",
            Self::Character(e) => e.error_code(),
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedInvitation {
    /// Raw token. Only returned here.
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvitationPreview {
    pub table_id: Uuid,
    pub table_name: String,
    pub valid: bool,
    pub expired: bool,
    pub used: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedeemOutcome {
    pub table_id: Uuid,
    pub already_member: bool,
    pub character: Option<Character>,
}

#[derive(sqlx::FromRow)]
struct InvitationRow {
    table_id: Uuid,
    table_name: String,
    expires_at: OffsetDateTime,
    used_by: Option<Uuid>,
}

#[must_use]
pub fn hash_token(token: &str) -> String {
    bytes_to_hex(&Sha256::digest(token.trim().as_bytes()))
}

/// Why a fetched invitation cannot be used, if it cannot.
fn unusable(row: &InvitationRow, now: OffsetDateTime) -> Option<InvitationError> {
    if row.used_by.is_some() {
        Some(InvitationError::AlreadyUsed)
    } else if row.expires_at <= now {
        Some(InvitationError::Expired)
    } else {
        None
    }
}

async fn find_by_token(pool: &PgPool, token: &str) -> Result<InvitationRow, InvitationError> {
    sqlx::query_as::<_, InvitationRow>(
        "SELECT i.table_id, t.name AS table_name, i.expires_at, i.used_by
         FROM table_invitations i JOIN game_tables t ON t.id = i.table_id
         WHERE i.token_hash = $1",
    )
    .bind(hash_token(token))
    .fetch_optional(pool)
    .await?
    .ok_or(InvitationError::NotFound)
}

/// Issue a new invitation for `table_id`.
pub async fn create_invitation(
    pool: &PgPool,
    table_id: Uuid,
    invited_by: Uuid,
    ttl_hours: i64,
) -> Result<CreatedInvitation, InvitationError> {
    let token = generate_token();
    let expires_at: OffsetDateTime = sqlx::query_scalar(
        "INSERT INTO table_invitations (table_id, invited_by, token_hash, expires_at)
         VALUES ($1, $2, $3, now() + $4)
         RETURNING expires_at",
    )
    .bind(table_id)
    .bind(invited_by)
    .bind(hash_token(&token))
    .bind(time::Duration::hours(ttl_hours))
    .fetch_one(pool)
    .await?;

    info!(%table_id, %invited_by, "invitation created");
    Ok(CreatedInvitation { token, expires_at })
}

pub async fn preview_invitation(pool: &PgPool, token: &str) -> Result<InvitationPreview, InvitationError> {
    let row = find_by_token(pool, token).await?;
    let now = OffsetDateTime::now_utc();
    let used = row.used_by.is_some();
    let expired = row.expires_at <= now;
    Ok(InvitationPreview {
        table_id: row.table_id,
        table_name: row.table_name,
        valid: !used && !expired,
        expired,
        used,
        expires_at: row.expires_at,
    })
}

/// Redeem an invitation for `user_id`, optionally creating a character.
///
/// A caller who is already a member gets `already_member: true` and the
/// invitation is left unused.
///
/// # Errors
///
/// Returns `NotFound`, `Expired` or `AlreadyUsed` for unusable tokens.
pub async fn redeem_invitation(
    pool: &PgPool,
    token: &str,
    user_id: Uuid,
    draft: Option<&CharacterDraft>,
) -> Result<RedeemOutcome, InvitationError> {
    let row = find_by_token(pool, token).await?;
    let table_id = row.table_id;

    let is_member: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM table_memberships WHERE table_id = $1 AND user_id = $2)")
            .bind(table_id)
            .bind(user_id)
            .fetch_one(pool)
            .await?;
    if is_member {
        return Ok(RedeemOutcome { table_id, already_member: true, character: None });
    }
    if let Some(err) = unusable(&row, OffsetDateTime::now_utc()) {
        return Err(err);
    }

    let mut tx = pool.begin().await?;
    let consumed: Option<Uuid> = sqlx::query_scalar(
        "UPDATE table_invitations SET used_by = $2, used_at = now()
         WHERE token_hash = $1 AND used_by IS NULL AND expires_at > now()
         RETURNING table_id",
    )
    .bind(hash_token(token))
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    if consumed.is_none() {
        return Err(InvitationError::AlreadyUsed);
    }

    let inserted = sqlx::query(
        "INSERT INTO table_memberships (table_id, user_id, role) VALUES ($1, $2, 'player')
         ON CONFLICT (table_id, user_id) DO NOTHING",
    )
    .bind(table_id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let character = match draft {
        Some(draft) if inserted > 0 => Some(character::insert_character(&mut tx, table_id, user_id, draft).await?),
        _ => None,
    };
    tx.commit().await?;

    info!(%table_id, %user_id, with_character = character.is_some(), "invitation redeemed");
    Ok(RedeemOutcome { table_id, already_member: inserted == 0, character })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ErrorCode;

    fn row(used: bool, expires_in: time::Duration) -> InvitationRow {
        InvitationRow {
            table_id: Uuid::new_v4(),
            table_name: "Crypt".into(),
            expires_at: OffsetDateTime::now_utc() + expires_in,
            used_by: used.then(Uuid::new_v4),
        }
    }

    #[test]
    fn hash_is_sha256_hex() {
        let hash = hash_token("abc");
        assert_eq!(hash, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(hash_token(" abc\n"), hash);
    }

    #[test]
    fn fresh_invitation_is_usable() {
        assert!(unusable(&row(false, time::Duration::hours(1)), OffsetDateTime::now_utc()).is_none());
    }

    #[test]
    fn expired_or_used_invitation_is_rejected() {
        let now = OffsetDateTime::now_utc();
        assert!(matches!(unusable(&row(false, time::Duration::hours(-1)), now), Some(InvitationError::Expired)));
        assert!(matches!(unusable(&row(true, time::Duration::hours(1)), now), Some(InvitationError::AlreadyUsed)));
        assert!(matches!(unusable(&row(true, time::Duration::hours(-1)), now), Some(InvitationError::AlreadyUsed)));
    }

    #[test]
    fn character_errors_keep_their_code() {
        let err = InvitationError::from(CharacterError::Validation("name required".into()));
        assert_eq!(err.error_code(), "E_VALIDATION");
    }
}
