use bazaar_models::user::IdentityUser;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

pub const MIN_IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum IdentityError {
    /// 401/403: the identity service has definitively refused the token.
    #[error("identity service rejected token (status {0})")]
    Rejected(u16),
    #[error("identity service error (status {0})")]
    ServerError(u16),
    /// Refused, timed out, DNS or other transport failure.
    #[error("identity service unreachable: {0}")]
    Unavailable(String),
    #[error("unexpected identity response: {0}")]
    Unexpected(String),
}

impl IdentityError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Client for the external identity service's `/api/users/me`.
#[derive(Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    me_url: String,
}

impl IdentityClient {
    /// Timeouts below five seconds are raised to five.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(timeout.max(MIN_IDENTITY_TIMEOUT))
            .build()
            .map_err(|e| IdentityError::Unexpected(e.to_string()))?;
        Ok(Self {
            http,
            me_url: format!("{}/api/users/me", base_url.trim_end_matches('/')),
        })
    }

    /// Single attempt; no retry.
    pub async fn fetch_me(&self, token: &str) -> Result<IdentityUser, IdentityError> {
        let response = self
            .http
            .get(&self.me_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(IdentityError::Rejected(status.as_u16()));
        }
        if status.is_server_error() {
            return Err(IdentityError::ServerError(status.as_u16()));
        }
        if !status.is_success() {
            return Err(IdentityError::Unexpected(format!("status {}", status.as_u16())));
        }

        response
            .json::<IdentityUser>()
            .await
            .map_err(|e| IdentityError::Unexpected(e.to_string()))
    }
}
