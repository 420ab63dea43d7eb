use crate::{bool_from_any_row, datetime_to_db_text, DbError, DbPool};
use bazaar_models::chat::ChatSettings;
use chrono::Utc;
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct ChatSettingsRow {
    pub chat_id: i64,
    pub user_id: i64,
    pub archived: bool,
    pub favorite: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ChatSettingsRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            chat_id: row.try_get("chat_id")?,
            user_id: row.try_get("user_id")?,
            archived: bool_from_any_row(row, "archived")?,
            favorite: bool_from_any_row(row, "favorite")?,
        })
    }
}

impl From<&ChatSettingsRow> for ChatSettings {
    fn from(row: &ChatSettingsRow) -> Self {
        ChatSettings {
            chat_id: row.chat_id,
            user_id: row.user_id,
            archived: row.archived,
            favorite: row.favorite,
        }
    }
}

impl ChatSettingsRow {
    pub fn defaults(chat_id: i64, user_id: i64) -> Self {
        Self {
            chat_id,
            user_id,
            archived: false,
            favorite: false,
        }
    }
}

pub async fn get_chat_settings(
    pool: &DbPool,
    chat_id: i64,
    user_id: i64,
) -> Result<ChatSettingsRow, DbError> {
    let row = sqlx::query_as::<_, ChatSettingsRow>(
        "SELECT chat_id, user_id, archived, favorite
         FROM chat_settings WHERE chat_id = $1 AND user_id = $2",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.unwrap_or_else(|| ChatSettingsRow::defaults(chat_id, user_id)))
}

pub async fn toggle_archived(
    pool: &DbPool,
    chat_id: i64,
    user_id: i64,
) -> Result<ChatSettingsRow, DbError> {
    let row = sqlx::query_as::<_, ChatSettingsRow>(
        "INSERT INTO chat_settings (chat_id, user_id, archived, favorite, updated_at)
         VALUES ($1, $2, 1, 0, $3)
         ON CONFLICT (chat_id, user_id)
         DO UPDATE SET archived = 1 - chat_settings.archived, updated_at = excluded.updated_at
         RETURNING chat_id, user_id, archived, favorite",
    )
    .bind(chat_id)
    .bind(user_id)
    .bind(datetime_to_db_text(Utc::now()))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn toggle_favorite(
    pool: &DbPool,
    chat_id: i64,
    user_id: i64,
) -> Result<ChatSettingsRow, DbError> {
    let row = sqlx::query_as::<_, ChatSettingsRow>(
        "INSERT INTO chat_settings (chat_id, user_id, archived, favorite, updated_at)
         VALUES ($1, $2, 0, 1, $3)
         ON CONFLICT (chat_id, user_id)
         DO UPDATE SET favorite = 1 - chat_settings.favorite, updated_at = excluded.updated_at
         RETURNING chat_id, user_id, archived, favorite",
    )
    .bind(chat_id)
    .bind(user_id)
    .bind(datetime_to_db_text(Utc::now()))
    .fetch_one(pool)
    .await?;
    Ok(row)
}
