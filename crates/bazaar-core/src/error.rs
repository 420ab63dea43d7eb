use bazaar_models::gateway::{
    CODE_ACCESS_DENIED, CODE_AUTH_INVALID, CODE_AUTH_REQUIRED, CODE_AUTH_SERVICE_UNAVAILABLE,
    CODE_INTERNAL_FAILURE, CODE_NOT_FOUND, CODE_RATE_LIMITED, CODE_TOKEN_EXPIRED,
    CODE_VALIDATION_FAILED,
};
use thiserror::Error;

use crate::auth::AuthError;
use crate::session_cache::CacheError;

/// Failure of a single client action, reported back in the ack frame.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("authentication required")]
    AuthRequired,
    #[error("invalid token")]
    AuthInvalid,
    #[error("authentication service unavailable")]
    AuthServiceUnavailable,
    #[error("token expired")]
    TokenExpired,
    #[error("chat not found")]
    NotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("{0}")]
    Validation(String),
    #[error("rate limited")]
    RateLimited,
    #[error("internal failure: {0}")]
    Upstream(String),
}

impl ActionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRequired => CODE_AUTH_REQUIRED,
            Self::AuthInvalid => CODE_AUTH_INVALID,
            Self::AuthServiceUnavailable => CODE_AUTH_SERVICE_UNAVAILABLE,
            Self::TokenExpired => CODE_TOKEN_EXPIRED,
            Self::NotFound => CODE_NOT_FOUND,
            Self::AccessDenied => CODE_ACCESS_DENIED,
            Self::Validation(_) => CODE_VALIDATION_FAILED,
            Self::RateLimited => CODE_RATE_LIMITED,
            Self::Upstream(_) => CODE_INTERNAL_FAILURE,
        }
    }

    /// Message shown to clients. Internal details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Upstream(_) => "internal failure".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<bazaar_db::DbError> for ActionError {
    fn from(err: bazaar_db::DbError) -> Self {
        match err {
            bazaar_db::DbError::NotFound => Self::NotFound,
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<CacheError> for ActionError {
    fn from(err: CacheError) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<AuthError> for ActionError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken => Self::AuthRequired,
            AuthError::InvalidToken | AuthError::Rejected => Self::AuthInvalid,
            AuthError::ServiceUnavailable(_) => Self::AuthServiceUnavailable,
        }
    }
}
