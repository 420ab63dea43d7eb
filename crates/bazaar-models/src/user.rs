use serde::{Deserialize, Serialize};

/// User object returned by the identity service's `/api/users/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityUser {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IdentityUser {
    pub fn minimal(id: i64) -> Self {
        Self {
            id,
            email: None,
            name: None,
            extra: serde_json::Map::new(),
        }
    }
}
