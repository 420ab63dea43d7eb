use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bazaar_core::events::OutboundEvent;
use bazaar_core::{observability, ActionError, AppConfig, AppState};
use bazaar_models::gateway::{
    ack_failure, ack_success, AckFrame, ClientFrame, ServerFrame, EVENT_TYPING_START,
    EVENT_TYPING_STOP,
};
use futures_util::{SinkExt, StreamExt};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::relay::ChatRelay;
use crate::session::Session;

const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Per-user limiters shared by all of a user's connections.
struct UserRateLimits {
    actions: DefaultKeyedRateLimiter<i64>,
    typing: DefaultKeyedRateLimiter<i64>,
}

static USER_RATE_LIMITS: OnceLock<UserRateLimits> = OnceLock::new();

fn per_minute(limit: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN))
}

fn user_rate_limits(config: &AppConfig) -> &'static UserRateLimits {
    USER_RATE_LIMITS.get_or_init(|| {
        let limits = UserRateLimits {
            actions: RateLimiter::keyed(per_minute(config.max_actions_per_minute)),
            typing: RateLimiter::keyed(per_minute(config.max_typing_events_per_minute)),
        };

        tokio::spawn(async {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Some(rl) = USER_RATE_LIMITS.get() {
                    rl.actions.retain_recent();
                    rl.typing.retain_recent();
                    rl.actions.shrink_to_fit();
                    rl.typing.shrink_to_fit();
                    tracing::trace!("rate limiter cleanup: pruned stale entries");
                }
            }
        });

        limits
    })
}

enum RateDecision {
    Allow,
    Drop,
    Reject,
}

impl UserRateLimits {
    fn check(&self, user_id: i64, event: &str) -> RateDecision {
        if event == EVENT_TYPING_START || event == EVENT_TYPING_STOP {
            return match self.typing.check_key(&user_id) {
                Ok(()) => RateDecision::Allow,
                Err(_) => RateDecision::Drop,
            };
        }
        match self.actions.check_key(&user_id) {
            Ok(()) => RateDecision::Allow,
            Err(_) => RateDecision::Reject,
        }
    }
}

fn wire_log_ws_in(user_id: Option<i64>, conn_id: &str, payload: &str, frame_type: &str) {
    if !observability::wire_trace_enabled() {
        return;
    }
    let payload_preview = observability::wire_trace_payload_preview(payload);
    tracing::info!(
        target: "wire",
        transport = "gateway_ws",
        direction = "in",
        frame_type,
        user_id = ?user_id,
        conn_id,
        bytes = payload.len(),
        payload_preview = ?payload_preview,
        "server_in"
    );
}

fn wire_log_ws_out(user_id: Option<i64>, conn_id: &str, payload: &str, frame_type: &str) {
    if !observability::wire_trace_enabled() {
        return;
    }
    let payload_preview = observability::wire_trace_payload_preview(payload);
    tracing::info!(
        target: "wire",
        transport = "gateway_ws",
        direction = "out",
        frame_type,
        user_id = ?user_id,
        conn_id,
        bytes = payload.len(),
        payload_preview = ?payload_preview,
        "server_out"
    );
}

async fn send_ws_text_logged(
    sender: &mut (impl SinkExt<Message> + Unpin),
    payload: String,
    session: &Session,
    frame_type: &str,
) -> Result<(), ()> {
    wire_log_ws_out(session.user_id, &session.conn_id, &payload, frame_type);
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}

async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event: OutboundEvent,
    session: &Session,
) -> Result<(), ()> {
    let frame = ServerFrame {
        event: event.event,
        data: event.data,
    };
    let payload = serde_json::to_string(&frame).map_err(|_| ())?;
    send_ws_text_logged(sender, payload, session, "event").await
}

async fn send_ack(
    sender: &mut (impl SinkExt<Message> + Unpin),
    ack: u64,
    data: Value,
    session: &Session,
) -> Result<(), ()> {
    let payload = serde_json::to_string(&AckFrame { ack, data }).map_err(|_| ())?;
    send_ws_text_logged(sender, payload, session, "ack").await
}

async fn send_ws_close_logged(
    sender: &mut (impl SinkExt<Message> + Unpin),
    code: u16,
    reason: &str,
    session: &Session,
) -> Result<(), ()> {
    if observability::wire_trace_enabled() {
        tracing::info!(
            target: "wire",
            transport = "gateway_ws",
            direction = "out",
            frame_type = "close",
            user_id = ?session.user_id,
            conn_id = %session.conn_id,
            code,
            reason,
            "server_out"
        );
    }
    sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await
        .map_err(|_| ())
}

/// Sends whatever the relay queued for this connection so far.
async fn flush_pending(
    sender: &mut (impl SinkExt<Message> + Unpin),
    outbound: &mut mpsc::Receiver<OutboundEvent>,
    session: &Session,
) {
    while let Ok(event) = outbound.try_recv() {
        if send_event(sender, event, session).await.is_err() {
            break;
        }
    }
}

pub async fn handle_connection(socket: WebSocket, state: AppState, token: Option<String>) {
    observability::ws_connection_open();
    let relay = ChatRelay::new(state.clone());
    let mut session = Session::new();
    let mut outbound = relay.attach(&session);
    let (mut sender, mut receiver) = socket.split();

    let outcome = tokio::time::timeout(
        state.config.connect_timeout,
        relay.connect(&mut session, token.as_deref()),
    )
    .await;
    let connected = match outcome {
        Ok(result) => result,
        Err(_) => Err(relay.reject(&mut session, ActionError::AuthServiceUnavailable)),
    };

    if let Err(err) = connected {
        flush_pending(&mut sender, &mut outbound, &session).await;
        let _ =
            send_ws_close_logged(&mut sender, CLOSE_POLICY_VIOLATION, err.code(), &session)
                .await;
        relay.disconnect(&mut session).await;
        observability::ws_connection_close();
        return;
    }

    let rate_limits = user_rate_limits(&state.config);
    let mut keepalive = tokio::time::interval(state.config.keepalive_interval);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    keepalive.tick().await;

    let disconnect_reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        wire_log_ws_in(session.user_id, &session.conn_id, &text, "client_message");
                        let frame = match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::debug!(
                                    conn_id = %session.conn_id,
                                    "unparseable frame: {e}"
                                );
                                continue;
                            }
                        };

                        if let Some(user_id) = session.user_id {
                            match rate_limits.check(user_id, &frame.event) {
                                RateDecision::Allow => {}
                                RateDecision::Drop => {
                                    tracing::debug!(
                                        user_id,
                                        event = %frame.event,
                                        "rate limited (silent drop)"
                                    );
                                    continue;
                                }
                                RateDecision::Reject => {
                                    let err = ActionError::RateLimited;
                                    if let Some(ack) = frame.ack {
                                        let body = ack_failure(&err.client_message(), err.code());
                                        let sent =
                                            send_ack(&mut sender, ack, body, &session).await;
                                        if sent.is_err() {
                                            break "failed to send ack".to_string();
                                        }
                                    }
                                    continue;
                                }
                            }
                        }

                        let result = relay.dispatch(&mut session, &frame.event, frame.data).await;
                        observability::ws_action_handled(result.is_ok());
                        let body = match result {
                            Ok(value) => ack_success(value),
                            Err(err) => {
                                if let ActionError::Upstream(detail) = &err {
                                    tracing::error!(
                                        user_id = ?session.user_id,
                                        event = %frame.event,
                                        "action failed: {detail}"
                                    );
                                } else {
                                    tracing::debug!(
                                        user_id = ?session.user_id,
                                        event = %frame.event,
                                        code = err.code(),
                                        "action refused: {err}"
                                    );
                                }
                                ack_failure(&err.client_message(), err.code())
                            }
                        };
                        if let Some(ack) = frame.ack {
                            if send_ack(&mut sender, ack, body, &session).await.is_err() {
                                break "failed to send ack".to_string();
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => format!(
                                "client close frame (code={}, reason={})",
                                frame.code, frame.reason
                            ),
                            None => "client close frame (no code/reason)".to_string(),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        break format!("websocket receive error: {err}");
                    }
                    None => {
                        break "websocket stream ended".to_string();
                    }
                }
            }
            Some(event) = outbound.recv() => {
                if send_event(&mut sender, event, &session).await.is_err() {
                    break "failed to send event".to_string();
                }
            }
            _ = keepalive.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break "failed to send ping".to_string();
                }
                relay.keepalive(&session).await;
            }
        }
    };

    tracing::info!(
        user_id = ?session.user_id,
        conn_id = %session.conn_id,
        reason = %disconnect_reason,
        "gateway connection closing"
    );
    relay.disconnect(&mut session).await;
    observability::ws_connection_close();
}
