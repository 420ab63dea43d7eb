use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// Client -> Server events
pub const EVENT_MESSAGE_SEND: &str = "message:send";
pub const EVENT_TYPING_START: &str = "typing:start";
pub const EVENT_TYPING_STOP: &str = "typing:stop";
pub const EVENT_CHAT_JOIN: &str = "chat:join";
pub const EVENT_CHAT_CREATE: &str = "chat:create";
pub const EVENT_USERS_ONLINE: &str = "users:online";
pub const EVENT_AUTH_REFRESH_TOKEN: &str = "auth:refresh-token";
pub const EVENT_MESSAGE_MARK_READ: &str = "message:mark-read";
pub const EVENT_UNREAD_GET: &str = "unread:get";
pub const EVENT_CHAT_TOGGLE_ARCHIVE: &str = "chat:toggle-archive";
pub const EVENT_CHAT_TOGGLE_FAVORITE: &str = "chat:toggle-favorite";

// Server -> Client events
pub const EVENT_MESSAGE_NEW: &str = "message:new";
pub const EVENT_USER_ONLINE: &str = "user:online";
pub const EVENT_USER_OFFLINE: &str = "user:offline";
pub const EVENT_CHAT_CREATED: &str = "chat:created";
pub const EVENT_UNREAD_UPDATED: &str = "unread:updated";
pub const EVENT_MESSAGE_READ: &str = "message:read";
pub const EVENT_AUTH_ERROR: &str = "auth:error";
pub const EVENT_AUTH_TOKEN_EXPIRED: &str = "auth:token-expired";

// Error codes carried in failed acks and auth events
pub const CODE_AUTH_REQUIRED: &str = "AUTH_REQUIRED";
pub const CODE_AUTH_INVALID: &str = "AUTH_INVALID";
pub const CODE_AUTH_SERVICE_UNAVAILABLE: &str = "AUTH_SERVICE_UNAVAILABLE";
pub const CODE_TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
pub const CODE_NOT_FOUND: &str = "NOT_FOUND";
pub const CODE_ACCESS_DENIED: &str = "ACCESS_DENIED";
pub const CODE_VALIDATION_FAILED: &str = "VALIDATION_FAILED";
pub const CODE_RATE_LIMITED: &str = "RATE_LIMITED";
pub const CODE_INTERNAL_FAILURE: &str = "INTERNAL_FAILURE";

/// Frame sent by a client. `ack` is echoed back on the reply when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

/// Server-initiated event frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFrame {
    pub event: String,
    pub data: Value,
}

/// Reply to a client frame that carried an `ack` id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckFrame {
    pub ack: u64,
    pub data: Value,
}

/// Merge `success: true` into a handler result object.
pub fn ack_success(mut body: Value) -> Value {
    match body.as_object_mut() {
        Some(obj) => {
            obj.insert("success".to_string(), Value::Bool(true));
            body
        }
        None => json!({ "success": true, "data": body }),
    }
}

pub fn ack_failure(error: &str, code: &str) -> Value {
    json!({ "success": false, "error": error, "code": code })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthErrorPayload {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_defaults_missing_data_and_ack() {
        let frame: ClientFrame = serde_json::from_str(r#"{"event":"users:online"}"#).unwrap();
        assert_eq!(frame.event, EVENT_USERS_ONLINE);
        assert!(frame.data.is_null());
        assert!(frame.ack.is_none());
    }

    #[test]
    fn ack_success_merges_into_objects() {
        let body = ack_success(json!({ "unreadCount": 0 }));
        assert_eq!(body["success"], true);
        assert_eq!(body["unreadCount"], 0);

        let wrapped = ack_success(json!([1, 2]));
        assert_eq!(wrapped["success"], true);
        assert_eq!(wrapped["data"], json!([1, 2]));
    }
}
