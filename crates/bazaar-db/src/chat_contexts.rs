use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use bazaar_models::chat::ChatContext;
use chrono::{DateTime, Utc};
use sqlx::Row;

/// The product a chat is currently about. Updated whenever a message
/// references a product.
#[derive(Debug, Clone)]
pub struct ChatContextRow {
    pub chat_id: i64,
    pub product_id: i64,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ChatContextRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let updated_at_raw: String = row.try_get("updated_at")?;
        Ok(Self {
            chat_id: row.try_get("chat_id")?,
            product_id: row.try_get("product_id")?,
            updated_at: datetime_from_db_text(&updated_at_raw)?,
        })
    }
}

impl From<&ChatContextRow> for ChatContext {
    fn from(row: &ChatContextRow) -> Self {
        ChatContext {
            chat_id: row.chat_id,
            product_id: row.product_id,
            updated_at: row.updated_at,
        }
    }
}

pub async fn upsert_chat_context(
    pool: &DbPool,
    chat_id: i64,
    product_id: i64,
) -> Result<ChatContextRow, DbError> {
    let row = sqlx::query_as::<_, ChatContextRow>(
        "INSERT INTO chat_contexts (chat_id, product_id, updated_at)
         VALUES ($1, $2, $3)
         ON CONFLICT (chat_id)
         DO UPDATE SET product_id = excluded.product_id, updated_at = excluded.updated_at
         RETURNING chat_id, product_id, updated_at",
    )
    .bind(chat_id)
    .bind(product_id)
    .bind(datetime_to_db_text(Utc::now()))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_chat_context(
    pool: &DbPool,
    chat_id: i64,
) -> Result<Option<ChatContextRow>, DbError> {
    let row = sqlx::query_as::<_, ChatContextRow>(
        "SELECT chat_id, product_id, updated_at FROM chat_contexts WHERE chat_id = $1",
    )
    .bind(chat_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chats::create_chat;
    use crate::test_support::test_pool;

    #[tokio::test]
    async fn latest_product_wins() {
        let pool = test_pool().await;
        let (chat, _) = create_chat(&pool, 1, 2).await.unwrap();
        assert!(get_chat_context(&pool, chat.id).await.unwrap().is_none());

        upsert_chat_context(&pool, chat.id, 10).await.unwrap();
        upsert_chat_context(&pool, chat.id, 11).await.unwrap();

        let ctx = get_chat_context(&pool, chat.id).await.unwrap().unwrap();
        assert_eq!(ctx.product_id, 11);
    }
}
