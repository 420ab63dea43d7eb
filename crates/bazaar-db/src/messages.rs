use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use bazaar_models::chat::Message;
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub text: String,
    pub product_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MessageRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            chat_id: row.try_get("chat_id")?,
            sender_id: row.try_get("sender_id")?,
            text: row.try_get("text")?,
            product_id: row.try_get("product_id")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

impl From<&MessageRow> for Message {
    fn from(row: &MessageRow) -> Self {
        Message {
            id: row.id,
            chat_id: row.chat_id,
            sender_id: row.sender_id,
            text: row.text.clone(),
            product_id: row.product_id,
            created_at: row.created_at,
        }
    }
}

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, text, product_id, created_at";

/// Persists a message and bumps the chat's `updated_at` in one transaction.
pub async fn create_message(
    pool: &DbPool,
    chat_id: i64,
    sender_id: i64,
    text: &str,
    product_id: Option<i64>,
) -> Result<MessageRow, DbError> {
    let now = datetime_to_db_text(Utc::now());
    let mut tx = pool.begin().await?;

    let sql = format!(
        "INSERT INTO messages (chat_id, sender_id, text, product_id, created_at)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {MESSAGE_COLUMNS}"
    );
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(chat_id)
        .bind(sender_id)
        .bind(text)
        .bind(product_id)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

    sqlx::query("UPDATE chats SET updated_at = $1 WHERE id = $2")
        .bind(&now)
        .bind(chat_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(row)
}

/// A page of chat history, oldest first.
pub async fn list_messages(
    pool: &DbPool,
    chat_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<MessageRow>, DbError> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE chat_id = $1
         ORDER BY created_at ASC, id ASC
         LIMIT $2 OFFSET $3"
    );
    let rows = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(chat_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn count_messages(pool: &DbPool, chat_id: i64) -> Result<i64, DbError> {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM messages WHERE chat_id = $1")
        .bind(chat_id)
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("total")?)
}
