use serde::Deserialize;

use crate::ids::{de_id, de_opt_id, de_opt_ids};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(deserialize_with = "de_id")]
    pub chat_id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub product_id: Option<i64>,
}

/// Payload of events that only name a chat (`typing:*`, `chat:toggle-*`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRef {
    #[serde(deserialize_with = "de_id")]
    pub chat_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinChat {
    #[serde(deserialize_with = "de_id")]
    pub chat_id: i64,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChat {
    #[serde(deserialize_with = "de_id")]
    pub buyer_id: i64,
    #[serde(deserialize_with = "de_id")]
    pub seller_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRead {
    #[serde(deserialize_with = "de_id")]
    pub chat_id: i64,
    #[serde(default, deserialize_with = "de_opt_ids")]
    pub message_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshToken {
    #[serde(default)]
    pub token: String,
}
