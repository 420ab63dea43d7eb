//! Local, signature-less inspection of bearer tokens.
//!
//! The identity service owns the signing key, so this side can only read the
//! claims. A decoded subject is a hint used to skip remote round trips, never
//! proof of identity on its own.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSubject {
    Int(i64),
    Text(String),
}

impl RawSubject {
    fn as_id(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<RawSubject>,
    #[serde(default, rename = "userId")]
    user_id: Option<RawSubject>,
    #[serde(default)]
    id: Option<RawSubject>,
    #[serde(default)]
    exp: Option<f64>,
}

/// Claims this service cares about, read without verifying the signature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnverifiedClaims {
    pub subject: Option<i64>,
    /// Expiry as unix seconds, if the token carries one.
    pub exp: Option<i64>,
}

fn insecure_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

pub fn decode_unverified(token: &str) -> Option<UnverifiedClaims> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    let data = decode::<RawClaims>(token, &DecodingKey::from_secret(&[]), &insecure_validation())
        .ok()?;
    let claims = data.claims;
    let subject = [&claims.sub, &claims.user_id, &claims.id]
        .into_iter()
        .flatten()
        .find_map(RawSubject::as_id);
    Some(UnverifiedClaims {
        subject,
        exp: claims.exp.map(|v| v.floor() as i64),
    })
}

/// Subject of a structurally valid, locally unexpired token.
pub fn fast_check(token: &str) -> Option<i64> {
    fast_check_at(token, chrono::Utc::now().timestamp())
}

pub fn fast_check_at(token: &str, now: i64) -> Option<i64> {
    let claims = decode_unverified(token)?;
    if let Some(exp) = claims.exp {
        if exp <= now {
            return None;
        }
    }
    claims.subject
}

/// Seconds until the token's own expiry, or `None` if it carries no `exp`.
pub fn remaining_lifetime_secs(token: &str, now: i64) -> Option<i64> {
    decode_unverified(token)?.exp.map(|exp| exp - now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn mint(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"identity-service-secret"),
        )
        .unwrap()
    }

    #[test]
    fn future_exp_yields_subject() {
        let now = 1_700_000_000;
        let token = mint(json!({ "sub": 42, "exp": now + 60 }));
        assert_eq!(fast_check_at(&token, now), Some(42));
    }

    #[test]
    fn past_exp_yields_nothing() {
        let now = 1_700_000_000;
        let token = mint(json!({ "sub": 42, "exp": now - 1 }));
        assert_eq!(fast_check_at(&token, now), None);
    }

    #[test]
    fn missing_subject_yields_nothing() {
        let token = mint(json!({ "exp": 4_000_000_000u64 }));
        assert_eq!(fast_check(&token), None);
    }

    #[test]
    fn falls_back_to_user_id_and_string_subjects() {
        let token = mint(json!({ "userId": "17", "exp": 4_000_000_000u64 }));
        assert_eq!(fast_check(&token), Some(17));

        let token = mint(json!({ "id": 9 }));
        assert_eq!(fast_check(&token), Some(9));
    }

    #[test]
    fn non_numeric_subject_falls_through_to_next_claim() {
        let token = mint(json!({ "sub": "alice", "userId": 5 }));
        assert_eq!(fast_check(&token), Some(5));
    }

    #[test]
    fn garbage_never_panics() {
        assert_eq!(fast_check(""), None);
        assert_eq!(fast_check("not-a-token"), None);
        assert_eq!(fast_check("a.b.c"), None);
    }

    #[test]
    fn remaining_lifetime_reads_exp() {
        let now = 1_700_000_000;
        let token = mint(json!({ "sub": 1, "exp": now + 90 }));
        assert_eq!(remaining_lifetime_secs(&token, now), Some(90));
        assert_eq!(remaining_lifetime_secs(&mint(json!({ "sub": 1 })), now), None);
    }
}
