use thiserror::Error;

use crate::error::ActionError;

pub const MAX_MESSAGE_CHARS: usize = 4000;
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message text is too long (max {max}, got {got})")]
    TooLong { max: usize, got: usize },
    #[error("message text is empty")]
    EmptyMessage,
    #[error("buyer and seller must be different users")]
    SameParties,
    #[error("{0} must be a positive id")]
    InvalidId(&'static str),
}

impl From<ValidationError> for ActionError {
    fn from(err: ValidationError) -> Self {
        ActionError::Validation(err.to_string())
    }
}

/// Text is counted in characters. Blank text is only allowed when the
/// message carries a product reference.
pub fn validate_message_text(text: &str, product_id: Option<i64>) -> Result<(), ValidationError> {
    let got = text.chars().count();
    if got > MAX_MESSAGE_CHARS {
        return Err(ValidationError::TooLong {
            max: MAX_MESSAGE_CHARS,
            got,
        });
    }
    if text.trim().is_empty() && product_id.is_none() {
        return Err(ValidationError::EmptyMessage);
    }
    Ok(())
}

pub fn validate_chat_parties(buyer_id: i64, seller_id: i64) -> Result<(), ValidationError> {
    if buyer_id <= 0 {
        return Err(ValidationError::InvalidId("buyerId"));
    }
    if seller_id <= 0 {
        return Err(ValidationError::InvalidId("sellerId"));
    }
    if buyer_id == seller_id {
        return Err(ValidationError::SameParties);
    }
    Ok(())
}

/// Normalizes a history page request to `(limit, offset)`.
pub fn history_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = match limit {
        Some(l) if l > 0 => l.min(MAX_HISTORY_LIMIT),
        _ => DEFAULT_HISTORY_LIMIT,
    };
    (limit, offset.unwrap_or(0).max(0))
}
