//! Connection lifecycle and per-action handlers.
//!
//! The relay is transport-agnostic: it reads and mutates a [`Session`] and
//! pushes outbound events through the [`EventBus`]. The WebSocket loop in
//! `handler` is the only caller in production.

use bazaar_core::auth::AuthError;
use bazaar_core::events::OutboundEvent;
use bazaar_core::{observability, validation, ActionError, AppState};
use bazaar_models::chat::{
    Chat, ChatContext, ChatSettings, Message, MessageReadEvent, OfflineMessageNotice,
    PresenceEvent, TypingEvent, UnreadCount,
};
use bazaar_models::gateway::*;
use bazaar_models::payloads::{
    ChatRef, CreateChat, JoinChat, MarkRead, RefreshToken, SendMessage,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::session::{Session, SessionPhase};

#[derive(Clone)]
pub struct ChatRelay {
    state: AppState,
}

fn parse<T: DeserializeOwned>(data: Value) -> Result<T, ActionError> {
    let data = if data.is_null() { json!({}) } else { data };
    serde_json::from_value(data)
        .map_err(|e| ActionError::Validation(format!("invalid payload: {e}")))
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl ChatRelay {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Opens the outbound queue for a session. Must precede `connect` so that
    /// auth failures can be reported before the transport closes.
    pub fn attach(&self, session: &Session) -> mpsc::Receiver<OutboundEvent> {
        self.state.event_bus.register(&session.conn_id)
    }

    // ---- lifecycle ----

    pub async fn connect(
        &self,
        session: &mut Session,
        token: Option<&str>,
    ) -> Result<i64, ActionError> {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Err(self.reject(session, ActionError::AuthRequired));
        };

        match self.state.auth.full_verify(token).await {
            Ok(verified) => {
                tracing::info!(
                    conn_id = %session.conn_id,
                    user_id = verified.id,
                    source = ?verified.source,
                    "connection authenticated"
                );
                self.establish(session, verified.id, token).await;
                Ok(verified.id)
            }
            Err(err) => Err(self.reject(session, err.into())),
        }
    }

    /// Reports a connect-time failure to the client and marks the session rejected.
    pub fn reject(&self, session: &mut Session, err: ActionError) -> ActionError {
        observability::ws_auth_rejected();
        tracing::info!(
            conn_id = %session.conn_id,
            code = err.code(),
            "connection rejected: {err}"
        );
        self.state.event_bus.emit_to(
            &session.conn_id,
            EVENT_AUTH_ERROR,
            to_value(&AuthErrorPayload {
                error: err.client_message(),
                code: err.code().to_string(),
            }),
        );
        session.phase = SessionPhase::Rejected;
        err
    }

    async fn establish(&self, session: &mut Session, user_id: i64, token: &str) {
        session.authenticate(user_id, token);
        let conn_id = session.conn_id.as_str();

        self.state.registry.add(user_id, conn_id);
        if let Err(e) = self.state.cache.set_presence(user_id, conn_id).await {
            tracing::warn!(user_id, conn_id, "failed to set presence: {e}");
        }
        if let Err(e) = self.state.cache.bind_socket(conn_id, user_id).await {
            tracing::warn!(user_id, conn_id, "failed to bind socket: {e}");
        }

        self.state.event_bus.mark_authenticated(conn_id);
        self.state
            .event_bus
            .broadcast(EVENT_USER_ONLINE, &to_value(&PresenceEvent { user_id }));

        match bazaar_db::chats::list_user_chat_ids(&self.state.db, user_id).await {
            Ok(chat_ids) => {
                for chat_id in &chat_ids {
                    self.state.event_bus.join_room(conn_id, *chat_id);
                }
                tracing::debug!(user_id, conn_id, rooms = chat_ids.len(), "joined chat rooms");
            }
            Err(e) => tracing::warn!(user_id, conn_id, "failed to load chat rooms: {e}"),
        }
    }

    /// Releases the user's claim held by this connection. Presence is only
    /// cleared when no other local connection remains.
    async fn release_user(&self, conn_id: &str, user_id: i64) {
        let remaining = self.state.registry.remove(user_id, conn_id);
        if remaining > 0 {
            tracing::debug!(user_id, conn_id, remaining, "user still connected elsewhere");
            return;
        }

        if let Err(e) = self.state.cache.clear_presence(user_id).await {
            tracing::warn!(user_id, "failed to clear presence: {e}");
        }

        // A new connection may have registered while presence was being cleared.
        if let Some(other) = self.state.registry.all_connections(user_id).into_iter().next() {
            if let Err(e) = self.state.cache.set_presence(user_id, &other).await {
                tracing::warn!(user_id, "failed to restore presence: {e}");
            }
            return;
        }

        self.state
            .event_bus
            .broadcast(EVENT_USER_OFFLINE, &to_value(&PresenceEvent { user_id }));
        tracing::info!(user_id, "user offline");
    }

    pub async fn disconnect(&self, session: &mut Session) {
        let conn_id = session.conn_id.clone();
        self.state.event_bus.unregister(&conn_id);

        // A connect that timed out mid-establish may hold a registry claim
        // while its phase already says Rejected.
        match session.user_id {
            Some(user_id) if self.state.registry.holds(user_id, &conn_id) => {
                self.release_user(&conn_id, user_id).await;
                if let Err(e) = self.state.cache.unbind_socket(&conn_id).await {
                    tracing::debug!(conn_id = %conn_id, "failed to unbind socket: {e}");
                }
                tracing::info!(
                    user_id,
                    conn_id = %conn_id,
                    phase = ?session.phase,
                    "connection closed"
                );
            }
            _ => tracing::debug!(conn_id = %conn_id, "unauthenticated connection closed"),
        }

        if session.phase != SessionPhase::Rejected {
            session.phase = SessionPhase::Closed;
        }
    }

    /// Periodic refresh of presence and socket binding TTLs.
    pub async fn keepalive(&self, session: &Session) {
        let Some(user_id) = session.user_id.filter(|_| session.is_authenticated()) else {
            return;
        };
        if let Err(e) = self.state.cache.set_presence(user_id, &session.conn_id).await {
            tracing::warn!(user_id, "failed to refresh presence: {e}");
        }
        if let Err(e) = self.state.cache.bind_socket(&session.conn_id, user_id).await {
            tracing::debug!(user_id, "failed to refresh socket binding: {e}");
        }
    }

    // ---- actions ----

    pub async fn dispatch(
        &self,
        session: &mut Session,
        event: &str,
        data: Value,
    ) -> Result<Value, ActionError> {
        if event == EVENT_AUTH_REFRESH_TOKEN {
            return self.refresh_token(session, parse(data)?).await;
        }

        let user_id = match event {
            EVENT_MESSAGE_SEND
            | EVENT_TYPING_START
            | EVENT_TYPING_STOP
            | EVENT_CHAT_JOIN
            | EVENT_CHAT_CREATE
            | EVENT_MESSAGE_MARK_READ
            | EVENT_USERS_ONLINE
            | EVENT_UNREAD_GET
            | EVENT_CHAT_TOGGLE_ARCHIVE
            | EVENT_CHAT_TOGGLE_FAVORITE => self.authorize_action(session).await?,
            other => return Err(ActionError::Validation(format!("unknown event '{other}'"))),
        };

        match event {
            EVENT_MESSAGE_SEND => self.send_message(user_id, parse(data)?).await,
            EVENT_TYPING_START => self.typing(session, user_id, parse(data)?, true).await,
            EVENT_TYPING_STOP => self.typing(session, user_id, parse(data)?, false).await,
            EVENT_CHAT_JOIN => self.join_chat(session, user_id, parse(data)?).await,
            EVENT_CHAT_CREATE => self.create_chat(user_id, parse(data)?).await,
            EVENT_MESSAGE_MARK_READ => self.mark_read(user_id, parse(data)?).await,
            EVENT_USERS_ONLINE => self.online_users().await,
            EVENT_UNREAD_GET => self.unread_counts(user_id).await,
            EVENT_CHAT_TOGGLE_ARCHIVE => {
                self.toggle_setting(user_id, parse(data)?, Toggle::Archive).await
            }
            EVENT_CHAT_TOGGLE_FAVORITE => {
                self.toggle_setting(user_id, parse(data)?, Toggle::Favorite).await
            }
            other => Err(ActionError::Validation(format!("unknown event '{other}'"))),
        }
    }

    /// Fast path only. The session's token must still resolve to its user.
    async fn authorize_action(&self, session: &Session) -> Result<i64, ActionError> {
        let (Some(user_id), Some(token)) = (session.user_id, session.token.as_deref()) else {
            return Err(ActionError::AuthRequired);
        };
        if !session.is_authenticated() {
            return Err(ActionError::AuthRequired);
        }

        match self.state.auth.fast_verify(token).await {
            Some(verified) if verified == user_id => Ok(user_id),
            verified => {
                tracing::info!(
                    user_id,
                    conn_id = %session.conn_id,
                    resolved = ?verified,
                    "session token no longer valid"
                );
                let err = ActionError::TokenExpired;
                self.state.event_bus.emit_to(
                    &session.conn_id,
                    EVENT_AUTH_TOKEN_EXPIRED,
                    to_value(&AuthErrorPayload {
                        error: err.client_message(),
                        code: err.code().to_string(),
                    }),
                );
                Err(err)
            }
        }
    }

    async fn participating_chat(&self, chat_id: i64, user_id: i64) -> Result<Chat, ActionError> {
        let row = bazaar_db::chats::get_chat(&self.state.db, chat_id)
            .await?
            .ok_or(ActionError::NotFound)?;
        let chat = Chat::from(&row);
        if !chat.is_participant(user_id) {
            return Err(ActionError::AccessDenied);
        }
        Ok(chat)
    }

    fn emit_to_user(&self, user_id: i64, event: &str, data: &Value) -> usize {
        let conns = self.state.registry.all_connections(user_id);
        self.state.event_bus.emit_to_connections(conns.iter(), event, data)
    }

    async fn send_message(&self, user_id: i64, payload: SendMessage) -> Result<Value, ActionError> {
        let chat = self.participating_chat(payload.chat_id, user_id).await?;
        validation::validate_message_text(&payload.text, payload.product_id)?;

        let row = bazaar_db::messages::create_message(
            &self.state.db,
            chat.id,
            user_id,
            &payload.text,
            payload.product_id,
        )
        .await?;
        observability::message_persisted();
        let message = Message::from(&row);
        tracing::debug!(
            chat_id = chat.id,
            user_id,
            message_id = message.id,
            "message persisted"
        );

        // Everything below is best effort: the message is already durable.
        if let Some(product_id) = payload.product_id {
            let recorded =
                bazaar_db::chat_contexts::upsert_chat_context(&self.state.db, chat.id, product_id)
                    .await;
            if let Err(e) = recorded {
                tracing::warn!(
                    chat_id = chat.id,
                    product_id,
                    "failed to record chat context: {e}"
                );
            }
        }

        let recipient_id = chat.counterpart(user_id);
        let recipient_unread =
            bazaar_db::read_receipts::unread_count(&self.state.db, chat.id, recipient_id).await;
        let recipient_unread = match recipient_unread {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(chat_id = chat.id, recipient_id, "failed to count unread: {e}");
                None
            }
        };

        let message_value = to_value(&message);
        self.state
            .event_bus
            .emit_to_room(chat.id, EVENT_MESSAGE_NEW, &message_value, None);

        if let Some(unread_count) = recipient_unread {
            self.emit_to_user(
                recipient_id,
                EVENT_UNREAD_UPDATED,
                &to_value(&UnreadCount {
                    chat_id: chat.id,
                    unread_count,
                }),
            );
        }

        if !payload.text.trim().is_empty() {
            match self.state.cache.is_online(recipient_id).await {
                Ok(false) => {
                    let queued = self.state.notifier.dispatch(OfflineMessageNotice {
                        recipient_id,
                        sender_id: user_id,
                        chat_id: chat.id,
                        message_text: payload.text.clone(),
                        product_id: payload.product_id,
                    });
                    tracing::debug!(chat_id = chat.id, recipient_id, queued, "recipient offline");
                }
                Ok(true) => {}
                Err(e) => tracing::warn!(
                    recipient_id,
                    "presence lookup failed, skipping notification: {e}"
                ),
            }
        }

        Ok(json!({ "message": message_value }))
    }

    async fn typing(
        &self,
        session: &Session,
        user_id: i64,
        payload: ChatRef,
        start: bool,
    ) -> Result<Value, ActionError> {
        if !self.state.event_bus.is_in_room(&session.conn_id, payload.chat_id) {
            return Err(ActionError::AccessDenied);
        }

        let event = if start {
            self.state.cache.set_typing(payload.chat_id, user_id).await?;
            EVENT_TYPING_START
        } else {
            self.state.cache.clear_typing(payload.chat_id, user_id).await?;
            EVENT_TYPING_STOP
        };

        self.state.event_bus.emit_to_room(
            payload.chat_id,
            event,
            &to_value(&TypingEvent {
                chat_id: payload.chat_id,
                user_id,
            }),
            Some(&session.conn_id),
        );
        Ok(json!({}))
    }

    async fn join_chat(
        &self,
        session: &Session,
        user_id: i64,
        payload: JoinChat,
    ) -> Result<Value, ActionError> {
        let chat = self.participating_chat(payload.chat_id, user_id).await?;
        self.state.event_bus.join_room(&session.conn_id, chat.id);

        let (limit, offset) = validation::history_page(payload.limit, payload.offset);
        let rows =
            bazaar_db::messages::list_messages(&self.state.db, chat.id, limit, offset).await?;
        let messages: Vec<Message> = rows.iter().map(Message::from).collect();
        let context = bazaar_db::chat_contexts::get_chat_context(&self.state.db, chat.id)
            .await?
            .as_ref()
            .map(ChatContext::from);

        Ok(json!({
            "chat": to_value(&chat),
            "messages": to_value(&messages),
            "context": to_value(&context),
        }))
    }

    async fn create_chat(&self, user_id: i64, payload: CreateChat) -> Result<Value, ActionError> {
        validation::validate_chat_parties(payload.buyer_id, payload.seller_id)?;
        if user_id != payload.buyer_id && user_id != payload.seller_id {
            return Err(ActionError::AccessDenied);
        }

        let (row, created) =
            bazaar_db::chats::create_chat(&self.state.db, payload.buyer_id, payload.seller_id)
                .await?;

        for party in [row.buyer_id, row.seller_id] {
            for conn_id in self.state.registry.all_connections(party) {
                self.state.event_bus.join_room(&conn_id, row.id);
            }
        }

        let chat = to_value(&Chat::from(&row));
        self.state
            .event_bus
            .emit_to_room(row.id, EVENT_CHAT_CREATED, &json!({ "chat": chat }), None);
        if created {
            tracing::info!(
                chat_id = row.id,
                buyer_id = row.buyer_id,
                seller_id = row.seller_id,
                "chat created"
            );
        }

        Ok(json!({ "chat": chat, "created": created }))
    }

    async fn mark_read(&self, user_id: i64, payload: MarkRead) -> Result<Value, ActionError> {
        let chat = self.participating_chat(payload.chat_id, user_id).await?;

        let db = &self.state.db;
        let marked = match payload.message_ids.as_deref() {
            Some(ids) if !ids.is_empty() => {
                bazaar_db::read_receipts::mark_messages_read(db, chat.id, user_id, ids).await?
            }
            _ => bazaar_db::read_receipts::mark_all_chat_messages_read(db, chat.id, user_id).await?,
        };
        let unread_count = bazaar_db::read_receipts::unread_count(db, chat.id, user_id).await?;

        self.emit_to_user(
            chat.counterpart(user_id),
            EVENT_MESSAGE_READ,
            &to_value(&MessageReadEvent {
                chat_id: chat.id,
                user_id,
                message_ids: payload.message_ids.clone(),
            }),
        );
        self.emit_to_user(
            user_id,
            EVENT_UNREAD_UPDATED,
            &to_value(&UnreadCount {
                chat_id: chat.id,
                unread_count,
            }),
        );

        Ok(json!({ "chatId": chat.id, "unreadCount": unread_count, "marked": marked }))
    }

    /// Re-authenticates the session with a new token. Works before the first
    /// successful authentication too.
    async fn refresh_token(
        &self,
        session: &mut Session,
        payload: RefreshToken,
    ) -> Result<Value, ActionError> {
        let verified = self
            .state
            .auth
            .full_verify(&payload.token)
            .await
            .map_err(|err| match err {
                AuthError::MissingToken => ActionError::Validation("token is required".into()),
                other => ActionError::from(other),
            })?;
        let token = payload.token.trim();
        let superseded = session.token.clone().filter(|old| old != token);

        match session.user_id.filter(|_| session.is_authenticated()) {
            Some(current) if current == verified.id => {
                session.authenticate(current, token);
                self.keepalive(session).await;
            }
            previous => {
                if let Some(previous) = previous {
                    tracing::info!(
                        conn_id = %session.conn_id,
                        previous,
                        user_id = verified.id,
                        "token refresh switched identity"
                    );
                    self.state.event_bus.leave_all_rooms(&session.conn_id);
                    self.release_user(&session.conn_id, previous).await;
                }
                self.establish(session, verified.id, token).await;
            }
        }

        // The old token must not keep passing the fast path from the cache.
        if let Some(old) = superseded {
            if let Err(e) = self.state.cache.forget_token(&old).await {
                tracing::warn!(conn_id = %session.conn_id, "failed to drop superseded token: {e}");
            }
        }

        Ok(json!({ "userId": verified.id }))
    }

    async fn online_users(&self) -> Result<Value, ActionError> {
        let users = self.state.cache.online_users().await?;
        Ok(json!({ "users": users }))
    }

    async fn unread_counts(&self, user_id: i64) -> Result<Value, ActionError> {
        let counts =
            bazaar_db::read_receipts::unread_counts_for_user(&self.state.db, user_id).await?;
        let total: i64 = counts.iter().map(|c| c.unread_count).sum();
        Ok(json!({ "chats": to_value(&counts), "total": total }))
    }

    async fn toggle_setting(
        &self,
        user_id: i64,
        payload: ChatRef,
        toggle: Toggle,
    ) -> Result<Value, ActionError> {
        let chat = self.participating_chat(payload.chat_id, user_id).await?;
        let db = &self.state.db;
        let row = match toggle {
            Toggle::Archive => {
                bazaar_db::chat_settings::toggle_archived(db, chat.id, user_id).await?
            }
            Toggle::Favorite => {
                bazaar_db::chat_settings::toggle_favorite(db, chat.id, user_id).await?
            }
        };
        Ok(json!({ "settings": to_value(&ChatSettings::from(&row)) }))
    }
}

#[derive(Debug, Clone, Copy)]
enum Toggle {
    Archive,
    Favorite,
}
