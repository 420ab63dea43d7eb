use crate::{datetime_to_db_text, DbError, DbPool};
use bazaar_models::chat::UnreadCount;
use chrono::Utc;
use sqlx::Row;

/// Messages in `chat_id` sent by someone other than `user_id` that `user_id`
/// has no receipt for.
pub async fn unread_count(pool: &DbPool, chat_id: i64, user_id: i64) -> Result<i64, DbError> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS unread FROM messages m
         WHERE m.chat_id = $1
           AND m.sender_id <> $2
           AND NOT EXISTS (
               SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = $3
           )",
    )
    .bind(chat_id)
    .bind(user_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get("unread")?)
}

/// Unread counts for every chat the user participates in, including zeroes.
pub async fn unread_counts_for_user(
    pool: &DbPool,
    user_id: i64,
) -> Result<Vec<UnreadCount>, DbError> {
    let rows = sqlx::query(
        "SELECT c.id AS chat_id,
                (SELECT COUNT(*) FROM messages m
                  WHERE m.chat_id = c.id
                    AND m.sender_id <> $1
                    AND NOT EXISTS (
                        SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = $2
                    )) AS unread
         FROM chats c
         WHERE c.buyer_id = $3 OR c.seller_id = $4
         ORDER BY c.id ASC",
    )
    .bind(user_id)
    .bind(user_id)
    .bind(user_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(UnreadCount {
                chat_id: row.try_get("chat_id")?,
                unread_count: row.try_get("unread")?,
            })
        })
        .collect()
}

/// Records receipts for the given message ids. Ids outside the chat and the
/// reader's own messages are skipped. Returns the number of new receipts.
pub async fn mark_messages_read(
    pool: &DbPool,
    chat_id: i64,
    user_id: i64,
    message_ids: &[i64],
) -> Result<u64, DbError> {
    if message_ids.is_empty() {
        return Ok(0);
    }
    let now = datetime_to_db_text(Utc::now());
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;
    for message_id in message_ids {
        let result = sqlx::query(
            "INSERT INTO message_reads (message_id, user_id, read_at)
             SELECT m.id, $1, $2 FROM messages m
             WHERE m.id = $3 AND m.chat_id = $4 AND m.sender_id <> $5
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(&now)
        .bind(*message_id)
        .bind(chat_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

/// Marks every message from the counterpart in `chat_id` as read.
pub async fn mark_all_chat_messages_read(
    pool: &DbPool,
    chat_id: i64,
    user_id: i64,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "INSERT INTO message_reads (message_id, user_id, read_at)
         SELECT m.id, $1, $2 FROM messages m
         WHERE m.chat_id = $3 AND m.sender_id <> $4
         ON CONFLICT (message_id, user_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(datetime_to_db_text(Utc::now()))
    .bind(chat_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
