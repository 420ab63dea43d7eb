mod handler;
pub mod relay;
pub mod session;

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
    response::IntoResponse,
    routing::get,
    Router,
};
use bazaar_core::AppState;
use serde::Deserialize;

pub use relay::ChatRelay;
pub use session::{Session, SessionPhase};

pub fn gateway_router() -> Router<AppState> {
    Router::new().route("/socket", get(ws_upgrade))
}

#[derive(Debug, Default, Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// The query parameter wins over the `Authorization` header.
fn handshake_token(query: ConnectQuery, headers: &HeaderMap) -> Option<String> {
    query
        .token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(headers))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = handshake_token(query, &headers);
    let max_frame_bytes = state.config.max_frame_bytes;
    ws.max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| handler::handle_connection(socket, state, token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn token_prefers_query_then_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));

        let from_query = handshake_token(
            ConnectQuery {
                token: Some("query-token".into()),
            },
            &headers,
        );
        assert_eq!(from_query.as_deref(), Some("query-token"));

        let from_header = handshake_token(ConnectQuery::default(), &headers);
        assert_eq!(from_header.as_deref(), Some("header-token"));
    }

    #[test]
    fn non_bearer_authorization_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(handshake_token(ConnectQuery::default(), &headers).is_none());

        let blank = ConnectQuery {
            token: Some("   ".into()),
        };
        assert!(handshake_token(blank, &HeaderMap::new()).is_none());
    }
}
