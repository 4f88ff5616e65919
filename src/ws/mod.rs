pub mod actor;
pub mod handler;
pub mod protocol;

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::ws::protocol::ServerEvent;

/// Monotonic id for one live WebSocket connection.
pub type ConnectionId = u64;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Room name for a user's personal delivery target.
pub fn user_room(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Room name for a group conversation.
pub fn conversation_room(conversation_id: &str) -> String {
    format!("conversation:{}", conversation_id)
}

struct ConnectionEntry {
    user_id: String,
    tx: ConnectionSender,
}

/// Explicit broadcast-room registry.
///
/// Rooms are mutated only through join/leave calls made in the same code path
/// as the domain change they mirror (connect/disconnect, group membership),
/// so fan-out targets and membership never diverge. A user can hold several
/// concurrent connections (devices/tabs); each gets its own ConnectionId.
pub struct RoomRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
    next_id: AtomicU64,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a connection and join it to the user's personal room.
    pub fn register(&self, user_id: &str, tx: ConnectionSender) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(
            id,
            ConnectionEntry {
                user_id: user_id.to_string(),
                tx,
            },
        );
        self.join(&user_room(user_id), id);

        tracing::debug!(
            user_id = %user_id,
            connection_id = id,
            connections = self.user_connection_count(user_id),
            "Connection registered"
        );
        id
    }

    /// Remove a connection from every room and drop it.
    pub fn unregister(&self, id: ConnectionId) {
        let user_id = self.connections.remove(&id).map(|(_, e)| e.user_id);

        let mut empty_rooms = Vec::new();
        for mut room in self.rooms.iter_mut() {
            room.value_mut().remove(&id);
            if room.value().is_empty() {
                empty_rooms.push(room.key().clone());
            }
        }
        for name in empty_rooms {
            self.rooms.remove_if(&name, |_, members| members.is_empty());
        }

        if let Some(user_id) = user_id {
            tracing::debug!(user_id = %user_id, connection_id = id, "Connection unregistered");
        }
    }

    pub fn join(&self, room: &str, id: ConnectionId) {
        self.rooms.entry(room.to_string()).or_default().insert(id);
    }

    pub fn leave(&self, room: &str, id: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&id);
        }
    }

    /// Join all of a user's live connections to a room.
    /// Called when group membership is granted.
    pub fn join_user(&self, room: &str, user_id: &str) {
        let ids: Vec<ConnectionId> = self.connection_ids_of(user_id);
        for id in ids {
            self.join(room, id);
        }
    }

    /// Remove all of a user's live connections from a room.
    /// Called when group membership is revoked or the user leaves.
    pub fn leave_user(&self, room: &str, user_id: &str) {
        let ids: Vec<ConnectionId> = self.connection_ids_of(user_id);
        for id in ids {
            self.leave(room, id);
        }
    }

    /// Drop a room entirely (group deleted).
    pub fn remove_room(&self, room: &str) {
        self.rooms.remove(room);
    }

    fn connection_ids_of(&self, user_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(&user_room(user_id))
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.rooms
            .get(&user_room(user_id))
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Emit an event to the union of the given rooms.
    ///
    /// A connection present in more than one targeted room receives the
    /// payload exactly once: targets are deduplicated by connection id before
    /// sending. The event is serialized once and cloned per receiver.
    pub fn emit_to_rooms(&self, rooms: &[String], event: &ServerEvent) {
        let text = match serde_json::to_string(event) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize server event");
                return;
            }
        };
        let msg = axum::extract::ws::Message::Text(text.into());

        let mut targets: HashSet<ConnectionId> = HashSet::new();
        for room in rooms {
            if let Some(members) = self.rooms.get(room) {
                targets.extend(members.iter().copied());
            }
        }

        for id in targets {
            if let Some(entry) = self.connections.get(&id) {
                let _ = entry.tx.send(msg.clone());
            }
        }
    }

    /// Emit an event to a single user's room.
    pub fn send_to_user(&self, user_id: &str, event: &ServerEvent) {
        self.emit_to_rooms(&[user_room(user_id)], event);
    }

    /// Emit an event to every live connection.
    pub fn emit_to_all(&self, event: &ServerEvent) {
        let text = match serde_json::to_string(event) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize server event");
                return;
            }
        };
        let msg = axum::extract::ws::Message::Text(text.into());

        for entry in self.connections.iter() {
            let _ = entry.tx.send(msg.clone());
        }
    }

    /// Send an event to one specific connection (acks, direct errors).
    pub fn send_to_connection(&self, id: ConnectionId, event: &ServerEvent) {
        if let Some(entry) = self.connections.get(&id) {
            send_event(&entry.tx, event);
        }
    }
}

/// Serialize an event onto a connection channel.
pub fn send_event(tx: &ConnectionSender, event: &ServerEvent) {
    if let Ok(text) = serde_json::to_string(event) {
        let _ = tx.send(axum::extract::ws::Message::Text(text.into()));
    }
}

/// Create a new shared room registry.
pub fn new_room_registry() -> Arc<RoomRegistry> {
    Arc::new(RoomRegistry::new())
}
