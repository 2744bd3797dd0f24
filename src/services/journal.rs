//! Journal service — the master's campaign notes.
//!
//! Everyone at the table reads the journal; only master authority writes.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::services::table::TableRole;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal entry not found: {0}")]
    NotFound(Uuid),
    #[error("forbidden: only the master can edit the journal")]
    Forbidden,
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for JournalError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_JOURNAL_NOT_FOUND",
            Self::Forbidden => "E_FORBIDDEN",
            Self::Validation(_) => "E_VALIDATION",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JournalEntry {
    pub id: Uuid,
    pub table_id: Uuid,
    pub title: String,
    pub content: String,
    pub character_ids: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct EntryInput {
    pub title: String,
    pub content: String,
    pub character_ids: Vec<Uuid>,
}

const ENTRY_COLUMNS: &str = "id, table_id, title, content, character_ids, created_at, updated_at";

fn require_master(role: TableRole) -> Result<(), JournalError> {
    if role.has_master_authority() { Ok(()) } else { Err(JournalError::Forbidden) }
}

pub(crate) fn normalize_title(raw: &str) -> Result<String, JournalError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(JournalError::Validation("title required".into()));
    }
    Ok(title.to_owned())
}

/// Drop repeated ids, keeping first-seen order.
pub(crate) fn dedup_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Every linked character must belong to `table_id`.
async fn linked_characters(pool: &PgPool, table_id: Uuid, ids: &[Uuid]) -> Result<Vec<Uuid>, JournalError> {
    let ids = dedup_ids(ids);
    if ids.is_empty() {
        return Ok(ids);
    }
    let found: i64 = sqlx::query_scalar("SELECT count(*) FROM character_sheets WHERE table_id = $1 AND id = ANY($2)")
        .bind(table_id)
        .bind(&ids)
        .fetch_one(pool)
        .await?;
    if usize::try_from(found).ok() != Some(ids.len()) {
        return Err(JournalError::Validation("unknown character for this table".into()));
    }
    Ok(ids)
}

pub async fn list_entries(pool: &PgPool, table_id: Uuid) -> Result<Vec<JournalEntry>, JournalError> {
    let rows = sqlx::query_as::<_, JournalEntry>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE table_id = $1 ORDER BY created_at DESC"
    ))
    .bind(table_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn create_entry(
    pool: &PgPool,
    table_id: Uuid,
    role: TableRole,
    input: &EntryInput,
) -> Result<JournalEntry, JournalError> {
    require_master(role)?;
    let title = normalize_title(&input.title)?;
    let character_ids = linked_characters(pool, table_id, &input.character_ids).await?;
    let row = sqlx::query_as::<_, JournalEntry>(&format!(
        "INSERT INTO journal_entries (table_id, title, content, character_ids)
         VALUES ($1, $2, $3, $4)
         RETURNING {ENTRY_COLUMNS}"
    ))
    .bind(table_id)
    .bind(title)
    .bind(&input.content)
    .bind(&character_ids)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn update_entry(
    pool: &PgPool,
    table_id: Uuid,
    role: TableRole,
    entry_id: Uuid,
    input: &EntryInput,
) -> Result<JournalEntry, JournalError> {
    require_master(role)?;
    let title = normalize_title(&input.title)?;
    let character_ids = linked_characters(pool, table_id, &input.character_ids).await?;
    sqlx::query_as::<_, JournalEntry>(&format!(
        "UPDATE journal_entries
         SET title = $3, content = $4, character_ids = $5, updated_at = now()
         WHERE id = $1 AND table_id = $2
         RETURNING {ENTRY_COLUMNS}"
    ))
    .bind(entry_id)
    .bind(table_id)
    .bind(title)
    .bind(&input.content)
    .bind(&character_ids)
    .fetch_optional(pool)
    .await?
    .ok_or(JournalError::NotFound(entry_id))
}

pub async fn delete_entry(
    pool: &PgPool,
    table_id: Uuid,
    role: TableRole,
    entry_id: Uuid,
) -> Result<(), JournalError> {
    require_master(role)?;
    let deleted = sqlx::query("DELETE FROM journal_entries WHERE id = $1 AND table_id = $2")
        .bind(entry_id)
        .bind(table_id)
        .execute(pool)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(JournalError::NotFound(entry_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_helpers;

    #[test]
    fn title_required() {
        assert_eq!(normalize_title("  Session 3 ").unwrap(), "Session 3");
        assert!(matches!(normalize_title(""), Err(JournalError::Validation(_))));
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(dedup_ids(&[a, b, a, a]), vec![a, b]);
        assert!(dedup_ids(&[]).is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a migrated Postgres database"]
    async fn linking_a_character_from_another_table_is_rejected() {
        let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap()).await.unwrap();
        let input = EntryInput {
            title: "Recap".into(),
            character_ids: vec![Uuid::new_v4()],
            ..EntryInput::default()
        };
        let table_id = Uuid::new_v4();

        let created = create_entry(&pool, table_id, TableRole::Master, &input).await;
        assert!(matches!(created, Err(JournalError::Validation(_))));
        let updated = update_entry(&pool, table_id, TableRole::Master, Uuid::new_v4(), &input).await;
        assert!(matches!(updated, Err(JournalError::Validation(_))));
        assert!(list_entries(&pool, table_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn players_cannot_write() {
        let state = test_helpers::test_app_state();
        let input = EntryInput { title: "Notes".into(), ..EntryInput::default() };
        let table_id = Uuid::new_v4();

        assert!(matches!(
            create_entry(&state.pool, table_id, TableRole::Player, &input).await,
            Err(JournalError::Forbidden)
        ));
        assert!(matches!(
            update_entry(&state.pool, table_id, TableRole::Player, Uuid::new_v4(), &input).await,
            Err(JournalError::Forbidden)
        ));
        assert!(matches!(
            delete_entry(&state.pool, table_id, TableRole::Player, Uuid::new_v4()).await,
            Err(JournalError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn master_with_blank_title_fails_validation() {
        let state = test_helpers::test_app_state();
        let input = EntryInput { title: " ".into(), ..EntryInput::default() };
        let result = create_entry(&state.pool, Uuid::new_v4(), TableRole::Master, &input).await;
        assert!(matches!(result, Err(JournalError::Validation(_))));
    }
}
