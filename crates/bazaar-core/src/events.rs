use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub const DEFAULT_CONNECTION_CAPACITY: usize = 256;

/// An event queued for one connection's writer task.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub event: String,
    pub data: Value,
}

struct ConnectionSlot {
    sender: mpsc::Sender<OutboundEvent>,
    rooms: HashSet<i64>,
    /// Only authenticated connections receive process-wide broadcasts.
    authenticated: bool,
}

struct BusInner {
    connections: DashMap<String, ConnectionSlot>,
    /// Chat -> connections currently joined to its room.
    rooms: DashMap<i64, HashSet<String>>,
    capacity: usize,
}

/// Room-scoped fan-out to live connections.
///
/// Each registered connection owns a bounded queue. Delivery never blocks:
/// when a queue is full the event is dropped and logged, since clients can
/// always recover the message from chat history.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                connections: DashMap::new(),
                rooms: DashMap::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn register(&self, conn_id: &str) -> mpsc::Receiver<OutboundEvent> {
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        let previous = self.inner.connections.insert(
            conn_id.to_string(),
            ConnectionSlot {
                sender,
                rooms: HashSet::new(),
                authenticated: false,
            },
        );
        if let Some(previous) = previous {
            self.release_rooms(conn_id, previous.rooms);
        }
        receiver
    }

    /// Drops the connection's queue and all of its room memberships.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, slot)) = self.inner.connections.remove(conn_id) {
            self.release_rooms(conn_id, slot.rooms);
        }
    }

    pub fn is_registered(&self, conn_id: &str) -> bool {
        self.inner.connections.contains_key(conn_id)
    }

    /// Opts the connection into broadcasts. Returns `false` if it is not registered.
    pub fn mark_authenticated(&self, conn_id: &str) -> bool {
        match self.inner.connections.get_mut(conn_id) {
            Some(mut slot) => {
                slot.authenticated = true;
                true
            }
            None => false,
        }
    }

    /// Returns `false` if the connection is not registered.
    pub fn join_room(&self, conn_id: &str, chat_id: i64) -> bool {
        {
            let Some(mut slot) = self.inner.connections.get_mut(conn_id) else {
                return false;
            };
            slot.rooms.insert(chat_id);
        }
        self.inner
            .rooms
            .entry(chat_id)
            .or_default()
            .insert(conn_id.to_string());

        // An unregister between the two inserts cannot see the room entry yet.
        if !self.inner.connections.contains_key(conn_id) {
            self.release_rooms(conn_id, HashSet::from([chat_id]));
            return false;
        }
        true
    }

    pub fn leave_all_rooms(&self, conn_id: &str) {
        let rooms = match self.inner.connections.get_mut(conn_id) {
            Some(mut slot) => std::mem::take(&mut slot.rooms),
            None => return,
        };
        self.release_rooms(conn_id, rooms);
    }

    pub fn is_in_room(&self, conn_id: &str, chat_id: i64) -> bool {
        self.inner
            .connections
            .get(conn_id)
            .is_some_and(|slot| slot.rooms.contains(&chat_id))
    }

    pub fn room_size(&self, chat_id: i64) -> usize {
        self.inner
            .rooms
            .get(&chat_id)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn emit_to(&self, conn_id: &str, event: &str, data: Value) -> bool {
        let Some(sender) = self
            .inner
            .connections
            .get(conn_id)
            .map(|slot| slot.sender.clone())
        else {
            return false;
        };
        deliver(
            conn_id,
            &sender,
            OutboundEvent {
                event: event.to_string(),
                data,
            },
        )
    }

    /// Returns the number of connections the event was queued for.
    pub fn emit_to_connections<'a, I>(&self, conn_ids: I, event: &str, data: &Value) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        conn_ids
            .into_iter()
            .filter(|conn_id| self.emit_to(conn_id, event, data.clone()))
            .count()
    }

    pub fn emit_to_room(
        &self,
        chat_id: i64,
        event: &str,
        data: &Value,
        except: Option<&str>,
    ) -> usize {
        let members: Vec<String> = match self.inner.rooms.get(&chat_id) {
            Some(members) => members
                .iter()
                .filter(|conn_id| Some(conn_id.as_str()) != except)
                .cloned()
                .collect(),
            None => return 0,
        };
        self.emit_to_connections(members.iter(), event, data)
    }

    /// Every authenticated connection.
    pub fn broadcast(&self, event: &str, data: &Value) -> usize {
        let all: Vec<String> = self
            .inner
            .connections
            .iter()
            .filter(|entry| entry.value().authenticated)
            .map(|entry| entry.key().clone())
            .collect();
        self.emit_to_connections(all.iter(), event, data)
    }

    fn release_rooms(&self, conn_id: &str, rooms: HashSet<i64>) {
        for chat_id in rooms {
            if let Some(mut members) = self.inner.rooms.get_mut(&chat_id) {
                members.remove(conn_id);
            }
            self.inner.rooms.remove_if(&chat_id, |_, members| members.is_empty());
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_CAPACITY)
    }
}

fn deliver(conn_id: &str, sender: &mpsc::Sender<OutboundEvent>, event: OutboundEvent) -> bool {
    match sender.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(dropped)) => {
            tracing::warn!(
                conn_id,
                event = %dropped.event,
                "outbound queue full, dropping event"
            );
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(conn_id, "outbound queue closed");
            false
        }
    }
}
