//! Table chat.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const HISTORY_LIMIT: i64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: Uuid,
    pub table_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub(crate) fn normalize_message(raw: &str) -> Result<String, ChatError> {
    let message = raw.trim();
    if message.is_empty() {
        return Err(ChatError::Validation("message must not be empty".into()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatError::Validation(format!("message exceeds {MAX_MESSAGE_CHARS} characters")));
    }
    Ok(message.to_owned())
}

pub async fn send_message(
    pool: &PgPool,
    table_id: Uuid,
    user_id: Uuid,
    display_name: &str,
    raw: &str,
) -> Result<ChatMessage, ChatError> {
    let message = normalize_message(raw)?;
    let row = sqlx::query_as::<_, ChatMessage>(
        "INSERT INTO table_messages (table_id, user_id, display_name, message)
         VALUES ($1, $2, $3, $4)
         RETURNING id, table_id, user_id, display_name, message, created_at",
    )
    .bind(table_id)
    .bind(user_id)
    .bind(display_name)
    .bind(message)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Most recent messages, oldest first.
pub async fn list_messages(pool: &PgPool, table_id: Uuid) -> Result<Vec<ChatMessage>, ChatError> {
    let rows = sqlx::query_as::<_, ChatMessage>(
        "SELECT * FROM (
             SELECT id, table_id, user_id, display_name, message, created_at
             FROM table_messages WHERE table_id = $1
             ORDER BY created_at DESC LIMIT $2
         ) recent ORDER BY created_at ASC",
    )
    .bind(table_id)
    .bind(HISTORY_LIMIT)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_trimmed() {
        assert_eq!(normalize_message("  hello table \n").unwrap(), "hello table");
    }

    #[test]
    fn blank_message_rejected() {
        assert!(matches!(normalize_message(" \t "), Err(ChatError::Validation(_))));
    }

    #[test]
    fn length_limit_counts_characters() {
        let at_limit = "é".repeat(MAX_MESSAGE_CHARS);
        assert!(normalize_message(&at_limit).is_ok());
        let over = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(normalize_message(&over).is_err());
    }
}
