//! Account service — users, passwords and global roles.
//!
//! DESIGN
//! ======
//! Accounts are created by an admin; there is no self sign-up. The one
//! exception is bootstrap: while the `users` table is empty an anonymous
//! caller may create the first account, which always becomes an admin.
//! Bootstrap runs under a transaction-scoped advisory lock so two racing
//! requests cannot both claim it.
//!
//! Passwords are bcrypt hashes. Hashing and verification run on the
//! blocking pool.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Advisory lock key serializing bootstrap account creation.
const BOOTSTRAP_LOCK_KEY: i64 = 0x7461_626c_6574_6f70;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("email already registered")]
    EmailTaken,
    #[error("user not found: {0}")]
    NotFound(Uuid),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for AccountError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "E_INVALID_CREDENTIALS",
            Self::EmailTaken => "E_EMAIL_TAKEN",
            Self::NotFound(_) => "E_USER_NOT_FOUND",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::Validation(_) => "E_VALIDATION",
            Self::Hash(_) => "E_INTERNAL",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Global role. Decides who may create tables and manage accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Master,
    Player,
}

impl UserRole {
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

    #[must_use]
    pub fn can_create_tables(self) -> bool {
        matches!(self, Self::Admin | Self::Master)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AccountUser {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sign_in_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub display_name: String,
    #[serde(default)]
    pub role: Option<UserRole>,
}

const USER_COLUMNS: &str = "id, email, display_name, role, avatar_url, created_at, last_sign_in_at";

// =============================================================================
// VALIDATION & HASHING
// =============================================================================

#[must_use]
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub(crate) fn validate_new_user(input: &NewUser) -> Result<(String, String), AccountError> {
    let email = normalize_email(&input.email);
    let Some((local, domain)) = email.split_once('@') else {
        return Err(AccountError::Validation("email must contain @".into()));
    };
    if local.is_empty() || !domain.contains('.') {
        return Err(AccountError::Validation("email is not valid".into()));
    }
    let display_name = input.display_name.trim();
    if display_name.is_empty() {
        return Err(AccountError::Validation("display_name required".into()));
    }
    if input.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AccountError::Validation(format!("password must be at least {MIN_PASSWORD_LEN} characters")));
    }
    Ok((email, display_name.to_owned()))
}

async fn hash_password(password: String) -> Result<String, AccountError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| AccountError::Hash(e.to_string()))?
        .map_err(|e| AccountError::Hash(e.to_string()))
}

async fn verify_password(password: String, hash: String) -> Result<bool, AccountError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AccountError::Hash(e.to_string()))?
        .map_err(|e| AccountError::Hash(e.to_string()))
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Create an account.
///
/// `actor_role` is `None` for anonymous callers, which is only accepted
/// while no account exists. The first account is always an admin.
///
/// # Errors
///
/// Returns `Forbidden` for non-admin callers after bootstrap, `EmailTaken`
/// for a duplicate email and `Validation` for malformed input.
pub async fn create_user(
    pool: &PgPool,
    actor_role: Option<UserRole>,
    input: &NewUser,
) -> Result<AccountUser, AccountError> {
    let (email, display_name) = validate_new_user(input)?;
    let password_hash = hash_password(input.password.clone()).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(BOOTSTRAP_LOCK_KEY)
        .execute(&mut *tx)
        .await?;
    let existing: i64 = sqlx::query_scalar("SELECT count(*) FROM users")
        .fetch_one(&mut *tx)
        .await?;

    let role = if existing == 0 {
        UserRole::Admin
    } else if actor_role == Some(UserRole::Admin) {
        input.role.unwrap_or(UserRole::Player)
    } else {
        return Err(AccountError::Forbidden("only admins can create accounts"));
    };

    let user = sqlx::query_as::<_, AccountUser>(&format!(
        "INSERT INTO users (email, display_name, password_hash, role)
         VALUES ($1, $2, $3, $4)
         RETURNING {USER_COLUMNS}"
    ))
    .bind(&email)
    .bind(&display_name)
    .bind(&password_hash)
    .bind(role.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if crate::db::is_unique_violation(&e) {
            AccountError::EmailTaken
        } else {
            AccountError::Database(e)
        }
    })?;
    tx.commit().await?;

    info!(user_id = %user.id, role = role.as_str(), bootstrap = existing == 0, "account created");
    Ok(user)
}

/// Check credentials and stamp `last_sign_in_at`.
///
/// # Errors
///
/// Returns `InvalidCredentials` for an unknown email or wrong password.
pub async fn authenticate(pool: &PgPool, email: &str, password: &str) -> Result<AccountUser, AccountError> {
    let row: Option<(Uuid, String)> = sqlx::query_as("SELECT id, password_hash FROM users WHERE email = $1")
        .bind(normalize_email(email))
        .fetch_optional(pool)
        .await?;
    let Some((user_id, hash)) = row else {
        return Err(AccountError::InvalidCredentials);
    };
    if !verify_password(password.to_owned(), hash).await? {
        return Err(AccountError::InvalidCredentials);
    }

    let user = sqlx::query_as::<_, AccountUser>(&format!(
        "UPDATE users SET last_sign_in_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
    ))
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

pub async fn list_users(pool: &PgPool) -> Result<Vec<AccountUser>, AccountError> {
    let users = sqlx::query_as::<_, AccountUser>(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"))
        .fetch_all(pool)
        .await?;
    Ok(users)
}

pub async fn set_role(pool: &PgPool, user_id: Uuid, role: UserRole) -> Result<AccountUser, AccountError> {
    sqlx::query_as::<_, AccountUser>(&format!("UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"))
        .bind(user_id)
        .bind(role.as_str())
        .fetch_optional(pool)
        .await?
        .ok_or(AccountError::NotFound(user_id))
}

/// Delete an account and everything it owns.
///
/// # Errors
///
/// Returns `Forbidden` when an admin targets their own account.
pub async fn delete_user(pool: &PgPool, actor_id: Uuid, user_id: Uuid) -> Result<(), AccountError> {
    if actor_id == user_id {
        return Err(AccountError::Forbidden("cannot delete your own account"));
    }
    let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AccountError::NotFound(user_id));
    }
    info!(%user_id, %actor_id, "account deleted");
    Ok(())
}

#[cfg(test)]
#[path = "account_test.rs"]
mod tests;
