//! In-process event bus with room-based WebSocket fan-out.
//!
//! The rooms map is guarded by a mutex for structural changes only. Sends
//! happen outside the lock: the member list is snapshotted first, then the
//! serialized message is pushed onto each client's outbound queue. A slow
//! client cannot stall others; its writer task owns the socket and applies
//! the write deadline.

use crate::models::WsEvent;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug)]
struct ClientInfo {
    sender: mpsc::UnboundedSender<String>,
    connected_at: Instant,
    last_activity: Instant,
    messages_sent: u64,
}

#[derive(Default)]
struct BusState {
    // room → client id → client
    rooms: HashMap<String, HashMap<u64, ClientInfo>>,
    next_client_id: u64,
    total_connections_ever: u64,
    total_messages_sent: u64,
}

/// Handle identifying one connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientId {
    pub id: u64,
}

pub struct EventBus {
    state: Mutex<BusState>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState {
                next_client_id: 1,
                ..Default::default()
            }),
        }
    }

    fn envelope(event: &str, data: &Value) -> String {
        json!({
            "event": event,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        })
        .to_string()
    }

    /// Attach a client to a room and greet it with a `connected` event.
    pub fn subscribe(&self, room: &str, sender: mpsc::UnboundedSender<String>) -> ClientId {
        let (client_id, room_count, total) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let id = state.next_client_id;
            state.next_client_id += 1;
            state.total_connections_ever += 1;
            let total = state.total_connections_ever;

            let now = Instant::now();
            let room_map = state.rooms.entry(room.to_string()).or_default();
            room_map.insert(
                id,
                ClientInfo {
                    sender: sender.clone(),
                    connected_at: now,
                    last_activity: now,
                    messages_sent: 0,
                },
            );
            (ClientId { id }, room_map.len(), total)
        };

        info!(room, in_room = room_count, total_ever = total, "ws client connected");

        let welcome = Self::envelope(
            WsEvent::Connected.as_str(),
            &json!({"room": room, "timestamp": Utc::now().to_rfc3339()}),
        );
        let _ = sender.send(welcome);

        client_id
    }

    pub fn disconnect(&self, room: &str, client: ClientId) {
        let remaining = {
            let mut state = self.state.lock();
            if let Some(room_map) = state.rooms.get_mut(room) {
                room_map.remove(&client.id);
                let remaining = room_map.len();
                if room_map.is_empty() {
                    state.rooms.remove(room);
                }
                remaining
            } else {
                0
            }
        };
        info!(room, remaining, "ws client disconnected");
    }

    /// Broadcast an event to one room. Returns the number of clients whose
    /// queue accepted the message; clients with a closed queue are removed.
    pub fn broadcast(&self, room: &str, event: WsEvent, data: &Value) -> usize {
        self.broadcast_named(room, event.as_str(), data)
    }

    pub fn broadcast_named(&self, room: &str, event: &str, data: &Value) -> usize {
        // Snapshot members under the lock, send outside it.
        let members: Vec<(u64, mpsc::UnboundedSender<String>)> = {
            let state = self.state.lock();
            match state.rooms.get(room) {
                Some(room_map) => room_map
                    .iter()
                    .map(|(id, c)| (*id, c.sender.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        if members.is_empty() {
            debug!(room, event, "no ws clients for broadcast");
            return 0;
        }

        let message = Self::envelope(event, data);
        let mut sent = 0usize;
        let mut dead: Vec<u64> = Vec::new();
        for (id, sender) in &members {
            if sender.send(message.clone()).is_ok() {
                sent += 1;
            } else {
                dead.push(*id);
            }
        }

        {
            let mut state = self.state.lock();
            state.total_messages_sent += sent as u64;
            if let Some(room_map) = state.rooms.get_mut(room) {
                for id in &dead {
                    room_map.remove(id);
                }
                for (id, _) in &members {
                    if let Some(client) = room_map.get_mut(id) {
                        client.messages_sent += 1;
                    }
                }
                if room_map.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }

        debug!(room, event, sent, dropped = dead.len(), "broadcast");
        sent
    }

    /// Broadcast to every room.
    pub fn broadcast_all(&self, event: WsEvent, data: &Value) -> usize {
        let rooms: Vec<String> = {
            let state = self.state.lock();
            state.rooms.keys().cloned().collect()
        };
        rooms
            .iter()
            .map(|room| self.broadcast(room, event, data))
            .sum()
    }

    /// Handle an inbound client message: answer pings, record activity.
    /// Returns an optional direct reply.
    pub fn handle_message(&self, room: &str, client: ClientId, raw: &str) -> Option<String> {
        self.touch(room, client);

        let is_ping = raw == "ping"
            || serde_json::from_str::<Value>(raw)
                .ok()
                .and_then(|v| v.get("action").and_then(|a| a.as_str()).map(|a| a == "ping"))
                .unwrap_or(false);

        if is_ping {
            return Some(Self::envelope(
                WsEvent::Pong.as_str(),
                &json!({"timestamp": Utc::now().to_rfc3339()}),
            ));
        }

        debug!(room, len = raw.len(), "ignoring non-ping ws message");
        None
    }

    /// Queue a message for a single client (direct replies share the same
    /// ordered queue as broadcasts).
    pub fn send_direct(&self, room: &str, client: ClientId, message: String) -> bool {
        let sender = {
            let state = self.state.lock();
            state
                .rooms
                .get(room)
                .and_then(|room_map| room_map.get(&client.id))
                .map(|c| c.sender.clone())
        };
        match sender {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Record client activity without any reply.
    pub fn record_activity(&self, room: &str, client: ClientId) {
        self.touch(room, client);
    }

    fn touch(&self, room: &str, client: ClientId) {
        let mut state = self.state.lock();
        if let Some(info) = state
            .rooms
            .get_mut(room)
            .and_then(|room_map| room_map.get_mut(&client.id))
        {
            info.last_activity = Instant::now();
        }
    }

    /// Drop clients idle longer than the threshold. Returns removed count.
    pub fn cleanup_stale(&self, max_idle_secs: u64) -> usize {
        let mut state = self.state.lock();
        let mut removed = 0usize;
        let threshold = std::time::Duration::from_secs(max_idle_secs);
        state.rooms.retain(|_, room_map| {
            room_map.retain(|_, client| {
                if client.last_activity.elapsed() > threshold {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
            !room_map.is_empty()
        });
        if removed > 0 {
            info!(removed, "cleaned up stale ws clients");
        }
        removed
    }

    pub fn connection_count(&self, room: Option<&str>) -> usize {
        let state = self.state.lock();
        match room {
            Some(room) => state.rooms.get(room).map(|r| r.len()).unwrap_or(0),
            None => state.rooms.values().map(|r| r.len()).sum(),
        }
    }

    pub fn stats(&self) -> Value {
        let state = self.state.lock();
        let rooms: HashMap<String, Value> = state
            .rooms
            .iter()
            .map(|(room, clients)| {
                let oldest_secs = clients
                    .values()
                    .map(|c| c.connected_at.elapsed().as_secs())
                    .max();
                (
                    room.clone(),
                    json!({"count": clients.len(), "oldest_connection_secs": oldest_secs}),
                )
            })
            .collect();

        json!({
            "active_connections": state.rooms.values().map(|r| r.len()).sum::<usize>(),
            "total_connections_ever": state.total_connections_ever,
            "total_messages_sent": state.total_messages_sent,
            "rooms": rooms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn subscribe_sends_connected_event() {
        let bus = EventBus::new();
        let (tx, mut rx) = client();
        bus.subscribe("dashboard", tx);

        let greeting = rx.try_recv().unwrap();
        let parsed: Value = serde_json::from_str(&greeting).unwrap();
        assert_eq!(parsed["event"], "connected");
        assert_eq!(parsed["data"]["room"], "dashboard");
    }

    #[test]
    fn broadcast_reaches_room_members_only() {
        let bus = EventBus::new();
        let (tx1, mut rx1) = client();
        let (tx2, mut rx2) = client();
        let (tx3, mut rx3) = client();
        bus.subscribe("dashboard", tx1);
        bus.subscribe("dashboard", tx2);
        bus.subscribe("admin", tx3);
        // Drain greetings.
        rx1.try_recv().unwrap();
        rx2.try_recv().unwrap();
        rx3.try_recv().unwrap();

        let sent = bus.broadcast(
            "dashboard",
            WsEvent::OrdersSynced,
            &json!({"count": 3}),
        );
        assert_eq!(sent, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn dead_clients_are_removed_on_broadcast() {
        let bus = EventBus::new();
        let (tx1, rx1) = client();
        let (tx2, mut rx2) = client();
        bus.subscribe("dashboard", tx1);
        bus.subscribe("dashboard", tx2);
        drop(rx1); // closed queue = dead client
        rx2.try_recv().unwrap();

        let sent = bus.broadcast("dashboard", WsEvent::SyncStatus, &json!({}));
        assert_eq!(sent, 1);
        assert_eq!(bus.connection_count(Some("dashboard")), 1);
    }

    #[test]
    fn ping_gets_pong() {
        let bus = EventBus::new();
        let (tx, _rx) = client();
        let id = bus.subscribe("dashboard", tx);

        let reply = bus.handle_message("dashboard", id, "ping").unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["event"], "pong");

        let reply = bus
            .handle_message("dashboard", id, r#"{"action": "ping"}"#)
            .unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["event"], "pong");

        assert!(bus.handle_message("dashboard", id, "hello").is_none());
    }

    #[test]
    fn stats_track_totals() {
        let bus = EventBus::new();
        let (tx1, _rx1) = client();
        let (tx2, _rx2) = client();
        bus.subscribe("dashboard", tx1);
        bus.subscribe("dashboard", tx2);
        bus.broadcast("dashboard", WsEvent::GoalProgress, &json!({}));

        let stats = bus.stats();
        assert_eq!(stats["active_connections"], 2);
        assert_eq!(stats["total_connections_ever"], 2);
        assert_eq!(stats["total_messages_sent"], 2);
    }

    #[test]
    fn cleanup_stale_removes_idle_clients() {
        let bus = EventBus::new();
        let (tx, _rx) = client();
        bus.subscribe("dashboard", tx);
        // Nothing is stale with a generous threshold.
        assert_eq!(bus.cleanup_stale(3600), 0);
        // Everything is stale with a zero threshold after some activity age.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(bus.cleanup_stale(0), 1);
        assert_eq!(bus.connection_count(None), 0);
    }
}
