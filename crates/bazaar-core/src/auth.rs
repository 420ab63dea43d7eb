use bazaar_models::user::IdentityUser;
use thiserror::Error;

use crate::identity::IdentityClient;
use crate::session_cache::SessionCache;
use crate::token;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication token missing")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("token rejected by identity service")]
    Rejected,
    #[error("identity service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifySource {
    /// Token cache hit; only the id is known.
    Cache,
    /// Confirmed by the identity service.
    Remote,
    /// Identity service unavailable, locally decoded subject trusted.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct VerifiedUser {
    pub id: i64,
    pub profile: Option<IdentityUser>,
    pub source: VerifySource,
}

/// Combines the token cache, local claim checks and the identity service.
#[derive(Clone)]
pub struct AuthCoordinator {
    cache: SessionCache,
    identity: IdentityClient,
    allow_degraded_fallback: bool,
}

impl AuthCoordinator {
    pub fn new(
        cache: SessionCache,
        identity: IdentityClient,
        allow_degraded_fallback: bool,
    ) -> Self {
        Self {
            cache,
            identity,
            allow_degraded_fallback,
        }
    }

    /// Authoritative check used at connection time and on token refresh.
    pub async fn full_verify(&self, token: &str) -> Result<VerifiedUser, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        match self.cache.cached_token_user(token).await {
            Ok(Some(id)) => {
                return Ok(VerifiedUser {
                    id,
                    profile: None,
                    source: VerifySource::Cache,
                })
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("token cache lookup failed: {e}"),
        }

        // Locally expired or malformed tokens never reach the identity service.
        let Some(local_subject) = token::fast_check(token) else {
            return Err(AuthError::InvalidToken);
        };

        match self.identity.fetch_me(token).await {
            Ok(user) => {
                if user.id != local_subject {
                    tracing::debug!(
                        local_subject,
                        remote_id = user.id,
                        "identity service subject differs from token claims"
                    );
                }
                if let Err(e) = self.cache.cache_token(token, user.id).await {
                    tracing::warn!(user_id = user.id, "failed to cache token: {e}");
                }
                Ok(VerifiedUser {
                    id: user.id,
                    profile: Some(user),
                    source: VerifySource::Remote,
                })
            }
            Err(err) if err.is_rejection() => {
                tracing::info!(local_subject, "identity service rejected token: {err}");
                Err(AuthError::Rejected)
            }
            Err(err) if self.allow_degraded_fallback => {
                tracing::warn!(
                    user_id = local_subject,
                    "identity service degraded, trusting local token subject: {err}"
                );
                Ok(VerifiedUser {
                    id: local_subject,
                    profile: None,
                    source: VerifySource::Fallback,
                })
            }
            Err(err) => {
                tracing::warn!(local_subject, "identity service unavailable: {err}");
                Err(AuthError::ServiceUnavailable(err.to_string()))
            }
        }
    }

    /// Cheap per-action check: token cache, then local claims. Never remote.
    pub async fn fast_verify(&self, token: &str) -> Option<i64> {
        match self.cache.cached_token_user(token).await {
            Ok(Some(id)) => return Some(id),
            Ok(None) => {}
            Err(e) => tracing::debug!("token cache lookup failed: {e}"),
        }
        token::fast_check(token)
    }
}
