use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use bazaar_core::auth::AuthCoordinator;
use bazaar_core::events::OutboundEvent;
use bazaar_core::identity::IdentityClient;
use bazaar_core::notifier::OfflineNotifier;
use bazaar_core::session_cache::{CacheTtls, SessionCache};
use bazaar_core::{ActionError, AppConfig, AppState};
use bazaar_models::chat::OfflineMessageNotice;
use bazaar_ws::{ChatRelay, Session, SessionPhase};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

/// Users with ids at or above this are refused by the stub identity service.
const REJECTED_FROM: i64 = 1000;

fn mint(user_id: i64, exp_offset_secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + exp_offset_secs;
    encode(
        &Header::default(),
        &json!({ "sub": user_id, "exp": exp }),
        &EncodingKey::from_secret(b"identity-service-secret"),
    )
    .unwrap()
}

async fn me(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let id = bazaar_core::token::decode_unverified(token)
        .and_then(|claims| claims.subject)
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if id >= REJECTED_FROM {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(json!({ "id": id, "name": format!("user-{id}") })))
}

async fn spawn_identity() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/api/users/me", get(me));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

struct Harness {
    state: AppState,
    relay: ChatRelay,
    notices: mpsc::Receiver<OfflineMessageNotice>,
}

/// An address nothing listens on.
async fn refused_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn harness() -> Harness {
    harness_with(&spawn_identity().await, true).await
}

async fn harness_with(identity_url: &str, allow_fallback: bool) -> Harness {
    let db = bazaar_db::create_pool("sqlite::memory:", 1).await.unwrap();
    bazaar_db::run_migrations(&db).await.unwrap();

    let cache = SessionCache::memory(CacheTtls::default());
    let identity = IdentityClient::new(identity_url, Duration::from_secs(2)).unwrap();
    let auth = AuthCoordinator::new(cache.clone(), identity, allow_fallback);
    let (notifier, notices) = OfflineNotifier::channel(16);
    let state = AppState::new(db, cache, auth, notifier, AppConfig::default());

    Harness {
        relay: ChatRelay::new(state.clone()),
        state,
        notices,
    }
}

struct Client {
    session: Session,
    rx: mpsc::Receiver<OutboundEvent>,
}

impl Client {
    fn drain(&mut self) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn drain_named(&mut self, name: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|e| e.event == name)
            .map(|e| e.data)
            .collect()
    }
}

async fn connect(h: &Harness, user_id: i64) -> Client {
    let mut session = Session::new();
    let rx = h.relay.attach(&session);
    let authed = h
        .relay
        .connect(&mut session, Some(&mint(user_id, 3600)))
        .await
        .unwrap();
    assert_eq!(authed, user_id);
    Client { session, rx }
}

async fn act(
    h: &Harness,
    client: &mut Client,
    event: &str,
    data: Value,
) -> Result<Value, ActionError> {
    h.relay.dispatch(&mut client.session, event, data).await
}

async fn open_chat(h: &Harness, buyer: &mut Client, buyer_id: i64, seller_id: i64) -> i64 {
    let created = act(
        h,
        buyer,
        "chat:create",
        json!({ "buyerId": buyer_id, "sellerId": seller_id }),
    )
    .await
    .unwrap();
    created["chat"]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn buyer_and_seller_conversation() {
    let mut h = harness().await;
    let mut buyer = connect(&h, 1).await;
    let mut seller = connect(&h, 2).await;
    buyer.drain();
    seller.drain();

    let chat_id = open_chat(&h, &mut buyer, 1, 2).await;
    assert_eq!(seller.drain_named("chat:created").len(), 1);
    assert_eq!(buyer.drain_named("chat:created").len(), 1);

    let sent = act(
        &h,
        &mut buyer,
        "message:send",
        json!({ "chatId": chat_id, "text": "Is this still available?", "productId": 77 }),
    )
    .await
    .unwrap();
    assert_eq!(sent["message"]["text"], "Is this still available?");

    let seller_events = seller.drain();
    let new_messages: Vec<_> = seller_events.iter().filter(|e| e.event == "message:new").collect();
    assert_eq!(new_messages.len(), 1);
    assert_eq!(new_messages[0].data["senderId"], 1);
    let unread: Vec<_> = seller_events
        .iter()
        .filter(|e| e.event == "unread:updated")
        .collect();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].data, json!({ "chatId": chat_id, "unreadCount": 1 }));

    // The sender sees the message but no unread bump of their own.
    let buyer_events = buyer.drain();
    assert!(buyer_events.iter().any(|e| e.event == "message:new"));
    assert!(!buyer_events.iter().any(|e| e.event == "unread:updated"));

    // Seller is online, so nobody is emailed.
    assert!(h.notices.try_recv().is_err());

    let joined = act(&h, &mut seller, "chat:join", json!({ "chatId": chat_id }))
        .await
        .unwrap();
    assert_eq!(joined["messages"].as_array().unwrap().len(), 1);
    assert_eq!(joined["context"]["productId"], 77);

    let read = act(&h, &mut seller, "message:mark-read", json!({ "chatId": chat_id }))
        .await
        .unwrap();
    assert_eq!(read["unreadCount"], 0);
    assert_eq!(read["marked"], 1);

    let receipts = buyer.drain_named("message:read");
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0]["userId"], 2);
    assert_eq!(
        seller.drain_named("unread:updated"),
        vec![json!({ "chatId": chat_id, "unreadCount": 0 })]
    );

    let again = act(&h, &mut seller, "message:mark-read", json!({ "chatId": chat_id }))
        .await
        .unwrap();
    assert_eq!(again["unreadCount"], 0);
    assert_eq!(again["marked"], 0);
}

#[tokio::test]
async fn mark_read_by_message_ids_reports_the_ids() {
    let h = harness().await;
    let mut buyer = connect(&h, 1).await;
    let mut seller = connect(&h, 2).await;
    let chat_id = open_chat(&h, &mut buyer, 1, 2).await;

    let mut ids = Vec::new();
    for text in ["first", "second"] {
        let sent = act(&h, &mut buyer, "message:send", json!({ "chatId": chat_id, "text": text }))
            .await
            .unwrap();
        ids.push(sent["message"]["id"].as_i64().unwrap());
    }
    buyer.drain();
    seller.drain();

    let read = act(
        &h,
        &mut seller,
        "message:mark-read",
        json!({ "chatId": chat_id, "messageIds": [ids[0]] }),
    )
    .await
    .unwrap();
    assert_eq!(read["marked"], 1);
    assert_eq!(read["unreadCount"], 1);

    assert_eq!(
        buyer.drain_named("message:read"),
        vec![json!({ "chatId": chat_id, "userId": 2, "messageIds": [ids[0]] })]
    );
    assert_eq!(
        seller.drain_named("unread:updated"),
        vec![json!({ "chatId": chat_id, "unreadCount": 1 })]
    );
}

#[tokio::test]
async fn offline_recipient_gets_exactly_one_notification() {
    let mut h = harness().await;
    let mut buyer = connect(&h, 10).await;
    let chat_id = open_chat(&h, &mut buyer, 10, 20).await;

    act(&h, &mut buyer, "message:send", json!({ "chatId": chat_id, "text": "hello?" }))
        .await
        .unwrap();

    let notice = h.notices.try_recv().unwrap();
    assert_eq!(notice.recipient_id, 20);
    assert_eq!(notice.sender_id, 10);
    assert_eq!(notice.chat_id, chat_id);
    assert_eq!(notice.message_text, "hello?");
    assert!(h.notices.try_recv().is_err());

    // Product-only messages carry no text to notify about.
    act(
        &h,
        &mut buyer,
        "message:send",
        json!({ "chatId": chat_id, "text": "", "productId": 5 }),
    )
    .await
    .unwrap();
    assert!(h.notices.try_recv().is_err());

    let _seller = connect(&h, 20).await;
    act(&h, &mut buyer, "message:send", json!({ "chatId": chat_id, "text": "you there" }))
        .await
        .unwrap();
    assert!(h.notices.try_recv().is_err());
}

#[tokio::test]
async fn expired_session_token_blocks_send_without_closing() {
    let h = harness().await;
    let mut buyer = connect(&h, 1).await;
    let chat_id = open_chat(&h, &mut buyer, 1, 2).await;
    buyer.drain();

    buyer.session.token = Some(mint(1, -30));
    let err = act(&h, &mut buyer, "message:send", json!({ "chatId": chat_id, "text": "late" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::TokenExpired));
    assert_eq!(err.code(), "TOKEN_EXPIRED");

    let expired = buyer.drain_named("auth:token-expired");
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0]["code"], "TOKEN_EXPIRED");

    assert_eq!(bazaar_db::messages::count_messages(&h.state.db, chat_id).await.unwrap(), 0);
    assert_eq!(buyer.session.phase, SessionPhase::Authenticated);
}

#[tokio::test]
async fn token_for_another_user_is_treated_as_expired() {
    let h = harness().await;
    let mut buyer = connect(&h, 1).await;
    buyer.session.token = Some(mint(2, 3600));
    let err = act(&h, &mut buyer, "users:online", json!({})).await.unwrap_err();
    assert!(matches!(err, ActionError::TokenExpired));
}

#[tokio::test]
async fn presence_survives_until_last_session_closes() {
    let h = harness().await;
    let mut observer = connect(&h, 99).await;
    let mut first = connect(&h, 5).await;
    let mut second = connect(&h, 5).await;
    observer.drain();
    assert!(h.state.cache.is_online(5).await.unwrap());

    h.relay.disconnect(&mut first.session).await;
    assert_eq!(first.session.phase, SessionPhase::Closed);
    assert!(h.state.cache.is_online(5).await.unwrap());
    assert!(h.state.registry.is_connected(5));
    assert!(observer.drain_named("user:offline").is_empty());

    h.relay.disconnect(&mut second.session).await;
    assert!(!h.state.cache.is_online(5).await.unwrap());
    assert!(!h.state.registry.is_connected(5));
    assert_eq!(
        observer.drain_named("user:offline"),
        vec![json!({ "userId": 5 })]
    );
}

#[tokio::test]
async fn timed_out_connect_releases_partial_session() {
    let h = harness().await;
    let mut observer = connect(&h, 99).await;
    observer.drain();

    let token = mint(5, 3600);
    h.state.cache.cache_token(&token, 5).await.unwrap();

    // With the only pooled connection checked out, room loading stalls
    // after the user is registered and announced.
    let held = h.state.db.acquire().await.unwrap();
    let mut session = Session::new();
    let _rx = h.relay.attach(&session);
    let outcome = tokio::time::timeout(
        Duration::from_millis(300),
        h.relay.connect(&mut session, Some(&token)),
    )
    .await;
    assert!(outcome.is_err());
    assert!(h.state.registry.is_connected(5));

    h.relay.reject(&mut session, ActionError::AuthServiceUnavailable);
    drop(held);
    h.relay.disconnect(&mut session).await;

    assert_eq!(session.phase, SessionPhase::Rejected);
    assert!(!h.state.registry.is_connected(5));
    assert!(!h.state.cache.is_online(5).await.unwrap());
    assert_eq!(
        observer.drain_named("user:offline"),
        vec![json!({ "userId": 5 })]
    );
}

#[tokio::test]
async fn pending_connections_miss_presence_broadcasts() {
    let h = harness().await;
    let mut pending = Session::new();
    let mut pending_rx = h.relay.attach(&pending);

    let _buyer = connect(&h, 1).await;
    assert!(pending_rx.try_recv().is_err());

    h.relay
        .connect(&mut pending, Some(&mint(2, 3600)))
        .await
        .unwrap();
    let _seller = connect(&h, 3).await;
    let online: Vec<_> = std::iter::from_fn(|| pending_rx.try_recv().ok())
        .filter(|e| e.event == "user:online")
        .map(|e| e.data)
        .collect();
    assert_eq!(online, vec![json!({ "userId": 2 }), json!({ "userId": 3 })]);
}

#[tokio::test]
async fn cached_opaque_token_passes_connect_and_actions() {
    let h = harness().await;
    h.state
        .cache
        .cache_token("opaque-session-token", 4)
        .await
        .unwrap();

    let mut session = Session::new();
    let _rx = h.relay.attach(&session);
    let authed = h
        .relay
        .connect(&mut session, Some("opaque-session-token"))
        .await
        .unwrap();
    assert_eq!(authed, 4);

    let online = h
        .relay
        .dispatch(&mut session, "users:online", json!({}))
        .await
        .unwrap();
    assert_eq!(online["users"], json!([4]));
}

#[tokio::test]
async fn degraded_identity_service_falls_back_to_token_subject() {
    let h = harness_with(&refused_url().await, true).await;
    let (chat, _) = bazaar_db::chats::create_chat(&h.state.db, 1, 2).await.unwrap();

    let client = connect(&h, 1).await;
    assert!(h.state.registry.is_connected(1));
    assert!(h.state.cache.is_online(1).await.unwrap());
    assert!(h.state.event_bus.is_in_room(&client.session.conn_id, chat.id));

    let strict = harness_with(&refused_url().await, false).await;
    let mut session = Session::new();
    let mut rx = strict.relay.attach(&session);
    let err = strict
        .relay
        .connect(&mut session, Some(&mint(1, 3600)))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::AuthServiceUnavailable));
    assert_eq!(rx.try_recv().unwrap().event, "auth:error");
    assert!(!strict.state.registry.is_connected(1));
}

#[tokio::test]
async fn connect_failures_emit_auth_error() {
    let h = harness().await;

    let mut session = Session::new();
    let mut rx = h.relay.attach(&session);
    let err = h.relay.connect(&mut session, None).await.unwrap_err();
    assert!(matches!(err, ActionError::AuthRequired));
    assert_eq!(session.phase, SessionPhase::Rejected);
    let event = rx.try_recv().unwrap();
    assert_eq!(event.event, "auth:error");
    assert_eq!(event.data["code"], "AUTH_REQUIRED");

    let mut session = Session::new();
    let mut rx = h.relay.attach(&session);
    let err = h
        .relay
        .connect(&mut session, Some(&mint(3, -60)))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::AuthInvalid));
    assert_eq!(rx.try_recv().unwrap().data["code"], "AUTH_INVALID");

    // Locally valid but refused by the identity service.
    let mut session = Session::new();
    let _rx = h.relay.attach(&session);
    let err = h
        .relay
        .connect(&mut session, Some(&mint(REJECTED_FROM, 3600)))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::AuthInvalid));
    assert!(!h.state.registry.is_connected(REJECTED_FROM));
    h.relay.disconnect(&mut session).await;
    assert_eq!(session.phase, SessionPhase::Rejected);
}

#[tokio::test]
async fn participation_is_enforced() {
    let h = harness().await;
    let mut buyer = connect(&h, 1).await;
    let mut stranger = connect(&h, 3).await;
    let chat_id = open_chat(&h, &mut buyer, 1, 2).await;

    let err = act(&h, &mut stranger, "chat:join", json!({ "chatId": chat_id }))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::AccessDenied));

    let err = act(&h, &mut stranger, "message:send", json!({ "chatId": chat_id, "text": "hi" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::AccessDenied));

    let err = act(&h, &mut buyer, "chat:join", json!({ "chatId": 4040 }))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::NotFound));

    let err = act(&h, &mut stranger, "chat:create", json!({ "buyerId": 1, "sellerId": 2 }))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::AccessDenied));

    let err = act(&h, &mut buyer, "chat:create", json!({ "buyerId": 1, "sellerId": 1 }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");

    let err = act(&h, &mut stranger, "typing:start", json!({ "chatId": chat_id }))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::AccessDenied));
}

#[tokio::test]
async fn invalid_messages_are_not_persisted() {
    let h = harness().await;
    let mut buyer = connect(&h, 1).await;
    let chat_id = open_chat(&h, &mut buyer, 1, 2).await;

    let err = act(&h, &mut buyer, "message:send", json!({ "chatId": chat_id, "text": "   " }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");

    let long = "x".repeat(4001);
    let err = act(&h, &mut buyer, "message:send", json!({ "chatId": chat_id, "text": long }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");

    let err = act(&h, &mut buyer, "message:send", json!({ "text": "no chat" }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");

    assert_eq!(bazaar_db::messages::count_messages(&h.state.db, chat_id).await.unwrap(), 0);
}

#[tokio::test]
async fn typing_is_relayed_to_the_other_party_only() {
    let h = harness().await;
    let mut buyer = connect(&h, 1).await;
    let mut seller = connect(&h, 2).await;
    let chat_id = open_chat(&h, &mut buyer, 1, 2).await;
    buyer.drain();
    seller.drain();

    act(&h, &mut buyer, "typing:start", json!({ "chatId": chat_id }))
        .await
        .unwrap();
    assert!(h.state.cache.is_typing(chat_id, 1).await.unwrap());
    assert_eq!(
        seller.drain_named("typing:start"),
        vec![json!({ "chatId": chat_id, "userId": 1 })]
    );
    assert!(buyer.drain().is_empty());

    act(&h, &mut buyer, "typing:stop", json!({ "chatId": chat_id }))
        .await
        .unwrap();
    assert!(!h.state.cache.is_typing(chat_id, 1).await.unwrap());
    assert_eq!(seller.drain_named("typing:stop").len(), 1);
}

#[tokio::test]
async fn chats_are_rejoined_on_reconnect() {
    let h = harness().await;
    let mut buyer = connect(&h, 1).await;
    let chat_id = open_chat(&h, &mut buyer, 1, 2).await;

    // Seller was offline when the chat was created.
    let seller = connect(&h, 2).await;
    assert!(h.state.event_bus.is_in_room(&seller.session.conn_id, chat_id));
}

#[tokio::test]
async fn refresh_token_can_switch_identity() {
    let h = harness().await;
    let mut client = connect(&h, 1).await;
    let chat_id = open_chat(&h, &mut client, 1, 2).await;

    let first_token = client.session.token.clone().unwrap();
    let renewed = mint(1, 7200);
    let same = act(&h, &mut client, "auth:refresh-token", json!({ "token": renewed }))
        .await
        .unwrap();
    assert_eq!(same["userId"], 1);
    assert!(h.state.registry.is_connected(1));
    assert_eq!(client.session.token.as_deref(), Some(renewed.as_str()));
    // Superseded tokens lose their cache entry; the new one is cached.
    assert_eq!(h.state.cache.cached_token_user(&first_token).await.unwrap(), None);
    assert_eq!(h.state.cache.cached_token_user(&renewed).await.unwrap(), Some(1));

    let switched = act(&h, &mut client, "auth:refresh-token", json!({ "token": mint(3, 3600) }))
        .await
        .unwrap();
    assert_eq!(switched["userId"], 3);
    assert_eq!(client.session.user_id, Some(3));
    assert!(!h.state.registry.is_connected(1));
    assert!(!h.state.cache.is_online(1).await.unwrap());
    assert!(h.state.registry.is_connected(3));
    assert!(!h.state.event_bus.is_in_room(&client.session.conn_id, chat_id));

    let err = act(&h, &mut client, "auth:refresh-token", json!({ "token": mint(3, -5) }))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::AuthInvalid));
    assert_eq!(client.session.user_id, Some(3));
}

#[tokio::test]
async fn online_users_and_unread_counts() {
    let h = harness().await;
    let mut buyer = connect(&h, 1).await;
    let mut seller = connect(&h, 2).await;
    let chat_id = open_chat(&h, &mut buyer, 1, 2).await;

    let online = act(&h, &mut buyer, "users:online", json!({})).await.unwrap();
    assert_eq!(online["users"], json!([1, 2]));

    for text in ["a", "b"] {
        act(&h, &mut buyer, "message:send", json!({ "chatId": chat_id, "text": text }))
            .await
            .unwrap();
    }
    let unread = act(&h, &mut seller, "unread:get", Value::Null).await.unwrap();
    assert_eq!(unread["total"], 2);
    assert_eq!(unread["chats"], json!([{ "chatId": chat_id, "unreadCount": 2 }]));

    let archived = act(&h, &mut seller, "chat:toggle-archive", json!({ "chatId": chat_id }))
        .await
        .unwrap();
    assert_eq!(archived["settings"]["archived"], true);
    let favorite = act(&h, &mut seller, "chat:toggle-favorite", json!({ "chatId": chat_id }))
        .await
        .unwrap();
    assert_eq!(favorite["settings"]["favorite"], true);
    assert_eq!(favorite["settings"]["archived"], true);
}

#[tokio::test]
async fn unknown_events_and_unauthenticated_actions_fail() {
    let h = harness().await;
    let mut client = connect(&h, 1).await;
    let err = act(&h, &mut client, "chat:explode", json!({})).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");

    let mut fresh = Session::new();
    let _rx = h.relay.attach(&fresh);
    let err = h
        .relay
        .dispatch(&mut fresh, "users:online", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::AuthRequired));
}

// ---- end to end over a real socket ----

async fn spawn_gateway(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = bazaar_ws::gateway_router().with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/socket")
}

#[tokio::test]
async fn websocket_round_trip_with_ack() {
    use tokio_tungstenite::tungstenite::Message;

    let h = harness().await;
    let url = spawn_gateway(h.state.clone()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{url}?token={}", mint(7, 3600)))
        .await
        .unwrap();

    let request = json!({ "event": "users:online", "data": {}, "ack": 1 }).to_string();
    ws.send(Message::Text(request.into())).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = ws.next().await {
            let Ok(Message::Text(text)) = msg else { continue };
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            if frame["ack"] == 1 {
                return frame["data"].clone();
            }
        }
        panic!("socket closed before ack");
    })
    .await
    .unwrap();

    assert_eq!(reply["success"], true);
    assert_eq!(reply["users"], json!([7]));
}

#[tokio::test]
async fn websocket_without_token_is_closed_with_policy_violation() {
    use tokio_tungstenite::tungstenite::Message;

    let h = harness().await;
    let url = spawn_gateway(h.state.clone()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let mut saw_auth_error = false;
    let mut close_code = None;
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) => {
                    let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                    if frame["event"] == "auth:error" {
                        assert_eq!(frame["data"]["code"], "AUTH_REQUIRED");
                        saw_auth_error = true;
                    }
                }
                Message::Close(frame) => {
                    close_code = frame.map(|f| u16::from(f.code));
                    break;
                }
                _ => {}
            }
        }
    })
    .await;

    assert!(saw_auth_error);
    assert_eq!(close_code, Some(1008));
}
