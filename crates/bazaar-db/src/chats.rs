use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use bazaar_models::chat::Chat;
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct ChatRow {
    pub id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ChatRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        let updated_at_raw: String = row.try_get("updated_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            buyer_id: row.try_get("buyer_id")?,
            seller_id: row.try_get("seller_id")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
            updated_at: datetime_from_db_text(&updated_at_raw)?,
        })
    }
}

impl From<&ChatRow> for Chat {
    fn from(row: &ChatRow) -> Self {
        Chat {
            id: row.id,
            buyer_id: row.buyer_id,
            seller_id: row.seller_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const CHAT_COLUMNS: &str = "id, buyer_id, seller_id, created_at, updated_at";

fn ordered_pair(a: i64, b: i64) -> (i64, i64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

pub async fn get_chat(pool: &DbPool, id: i64) -> Result<Option<ChatRow>, DbError> {
    let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = $1");
    let row = sqlx::query_as::<_, ChatRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Chat between two users regardless of which one is the buyer.
pub async fn find_chat_between(
    pool: &DbPool,
    user_a: i64,
    user_b: i64,
) -> Result<Option<ChatRow>, DbError> {
    let (low, high) = ordered_pair(user_a, user_b);
    let sql = format!(
        "SELECT {CHAT_COLUMNS} FROM chats WHERE participant_low = $1 AND participant_high = $2"
    );
    let row = sqlx::query_as::<_, ChatRow>(&sql)
        .bind(low)
        .bind(high)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Creates the chat for a pair of users, or returns the existing one.
/// The flag is `true` only when a new row was inserted.
pub async fn create_chat(
    pool: &DbPool,
    buyer_id: i64,
    seller_id: i64,
) -> Result<(ChatRow, bool), DbError> {
    let (low, high) = ordered_pair(buyer_id, seller_id);
    let now = datetime_to_db_text(Utc::now());
    let sql = format!(
        "INSERT INTO chats
             (buyer_id, seller_id, participant_low, participant_high, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (participant_low, participant_high) DO NOTHING
         RETURNING {CHAT_COLUMNS}"
    );
    let inserted = sqlx::query_as::<_, ChatRow>(&sql)
        .bind(buyer_id)
        .bind(seller_id)
        .bind(low)
        .bind(high)
        .bind(&now)
        .bind(&now)
        .fetch_optional(pool)
        .await?;

    if let Some(row) = inserted {
        return Ok((row, true));
    }

    let existing = find_chat_between(pool, buyer_id, seller_id)
        .await?
        .ok_or(DbError::NotFound)?;
    Ok((existing, false))
}

pub async fn list_user_chat_ids(pool: &DbPool, user_id: i64) -> Result<Vec<i64>, DbError> {
    let rows = sqlx::query(
        "SELECT id FROM chats WHERE buyer_id = $1 OR seller_id = $2 ORDER BY id ASC",
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    let ids = rows
        .iter()
        .map(|row| row.try_get::<i64, _>("id"))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}
