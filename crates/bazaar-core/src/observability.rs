use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

const WIRE_TRACE_PREVIEW_CHARS: usize = 512;

static WIRE_TRACE: OnceLock<bool> = OnceLock::new();

static WS_CONNECTIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static WS_CONNECTIONS_CLOSED: AtomicU64 = AtomicU64::new(0);
static WS_AUTH_REJECTED: AtomicU64 = AtomicU64::new(0);
static WS_ACTIONS_HANDLED: AtomicU64 = AtomicU64::new(0);
static WS_ACTIONS_FAILED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_PERSISTED: AtomicU64 = AtomicU64::new(0);

/// `BAZAAR_WIRE_TRACE=1` logs every gateway frame under the `wire` target.
pub fn wire_trace_enabled() -> bool {
    *WIRE_TRACE.get_or_init(|| {
        std::env::var("BAZAAR_WIRE_TRACE")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    })
}

pub fn wire_trace_payload_preview(payload: &str) -> String {
    let mut chars = payload.chars();
    let preview: String = chars.by_ref().take(WIRE_TRACE_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{preview}...")
    } else {
        preview
    }
}

pub fn ws_connection_open() {
    WS_CONNECTIONS_OPENED.fetch_add(1, Ordering::Relaxed);
}

pub fn ws_connection_close() {
    WS_CONNECTIONS_CLOSED.fetch_add(1, Ordering::Relaxed);
}

pub fn ws_auth_rejected() {
    WS_AUTH_REJECTED.fetch_add(1, Ordering::Relaxed);
}

pub fn ws_action_handled(ok: bool) {
    WS_ACTIONS_HANDLED.fetch_add(1, Ordering::Relaxed);
    if !ok {
        WS_ACTIONS_FAILED.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn message_persisted() {
    MESSAGES_PERSISTED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CounterSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub auth_rejected: u64,
    pub actions_handled: u64,
    pub actions_failed: u64,
    pub messages_persisted: u64,
}

pub fn snapshot() -> CounterSnapshot {
    CounterSnapshot {
        connections_opened: WS_CONNECTIONS_OPENED.load(Ordering::Relaxed),
        connections_closed: WS_CONNECTIONS_CLOSED.load(Ordering::Relaxed),
        auth_rejected: WS_AUTH_REJECTED.load(Ordering::Relaxed),
        actions_handled: WS_ACTIONS_HANDLED.load(Ordering::Relaxed),
        actions_failed: WS_ACTIONS_FAILED.load(Ordering::Relaxed),
        messages_persisted: MESSAGES_PERSISTED.load(Ordering::Relaxed),
    }
}
