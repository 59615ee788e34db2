// Broadcast hub
// Live viewer registry with per-connection topic filters and best-effort push

pub mod protocol;

use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::now_millis;
use protocol::{ClientMessage, Envelope, ProtocolError};
pub use protocol::{parse_client_message, WILDCARD};

pub type ConnectionId = Uuid;

/// Lifecycle of a viewer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

struct Viewer {
    connected_at: i64,
    state: ConnectionState,
    subscriptions: HashSet<String>,
    outbox: mpsc::Sender<String>,
}

impl Viewer {
    fn wants(&self, topic: &str) -> bool {
        self.subscriptions.contains(WILDCARD) || self.subscriptions.contains(topic)
    }
}

/// Point-in-time view of one connection, for diagnostics
#[derive(Debug, Clone, serde::Serialize)]
pub struct ViewerInfo {
    pub id: ConnectionId,
    pub connected_at: i64,
    pub subscriptions: Vec<String>,
}

/// Fan-out point for live events.
///
/// Delivery is fire-and-forget: each viewer has a bounded outbox, and a
/// viewer whose outbox is full or closed is dropped on the spot.
pub struct BroadcastHub {
    connections: DashMap<ConnectionId, Viewer>,
    queue_capacity: usize,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Outbox size transports should allocate per viewer
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Track a new connection in the Connecting state
    pub fn register(&self, outbox: mpsc::Sender<String>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            Viewer {
                connected_at: now_millis(),
                state: ConnectionState::Connecting,
                subscriptions: HashSet::new(),
                outbox,
            },
        );
        debug!(connection = %id, "Viewer registered");
        id
    }

    /// Move a connection to Open with the wildcard subscription and greet it
    pub fn open(&self, id: ConnectionId) -> bool {
        {
            let Some(mut viewer) = self.connections.get_mut(&id) else {
                return false;
            };
            if viewer.state != ConnectionState::Connecting {
                return false;
            }
            viewer.state = ConnectionState::Open;
            viewer.subscriptions = HashSet::from([WILDCARD.to_string()]);
        }

        info!(connection = %id, viewers = self.viewer_count(), "Viewer connected");
        self.send_direct(id, protocol::TOPIC_WELCOME, json!({ "connection_id": id }))
    }

    /// Forget a connection; returns false if it was already gone
    pub fn unregister(&self, id: ConnectionId) -> bool {
        // Removal is the Closed transition; dropping the outbox ends the writer task.
        match self.connections.remove(&id) {
            Some(_) => {
                info!(connection = %id, "Viewer disconnected");
                true
            }
            None => false,
        }
    }

    /// Current state; unknown connections report Closed
    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        self.connections
            .get(&id)
            .map(|viewer| viewer.state)
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn viewer_count(&self) -> usize {
        self.connections.len()
    }

    pub fn viewers(&self) -> Vec<ViewerInfo> {
        self.connections
            .iter()
            .map(|entry| {
                let mut subscriptions: Vec<String> = entry.subscriptions.iter().cloned().collect();
                subscriptions.sort();
                ViewerInfo {
                    id: *entry.key(),
                    connected_at: entry.connected_at,
                    subscriptions,
                }
            })
            .collect()
    }

    /// Push `payload` on `topic` to every open, interested viewer.
    /// Returns how many viewers accepted the frame.
    pub fn emit(&self, topic: &str, payload: Value) -> usize {
        let frame = match Envelope::new(topic, payload).to_json() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(topic, error = %err, "Dropping unencodable event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for entry in self.connections.iter() {
            if entry.state != ConnectionState::Open || !entry.wants(topic) {
                continue;
            }
            match entry.outbox.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => failed.push((*entry.key(), err)),
            }
        }

        // Removal has to wait until the iterator has released its shard locks.
        for (id, err) in failed {
            warn!(connection = %id, topic, reason = delivery_failure(&err), "Dropping viewer");
            self.unregister(id);
        }

        debug!(topic, delivered, "Event emitted");
        delivered
    }

    /// Send a frame to one connection regardless of its subscriptions
    pub fn send_direct(&self, id: ConnectionId, topic: &str, payload: Value) -> bool {
        let frame = match Envelope::new(topic, payload).to_json() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(topic, error = %err, "Dropping unencodable frame");
                return false;
            }
        };

        let result = match self.connections.get(&id) {
            Some(viewer) if viewer.state != ConnectionState::Closed => viewer.outbox.try_send(frame),
            _ => return false,
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(connection = %id, topic, reason = delivery_failure(&err), "Dropping viewer");
                self.unregister(id);
                false
            }
        }
    }

    /// Handle one inbound text frame from a viewer
    pub fn on_message(&self, id: ConnectionId, raw: &str) -> Result<(), ProtocolError> {
        if !self.connections.contains_key(&id) {
            return Err(ProtocolError::UnknownConnection(id));
        }

        match parse_client_message(raw)? {
            ClientMessage::Ping => {
                self.send_direct(id, protocol::TOPIC_PONG, json!({ "timestamp": now_millis() }));
            }
            ClientMessage::Subscribe { channels } => {
                if let Some(mut viewer) = self.connections.get_mut(&id) {
                    viewer.subscriptions = channels.iter().cloned().collect();
                }
                debug!(connection = %id, channels = ?channels, "Subscriptions replaced");
                self.send_direct(id, protocol::TOPIC_SUBSCRIBED, json!({ "channels": channels }));
            }
        }
        Ok(())
    }
}

fn delivery_failure<T>(err: &mpsc::error::TrySendError<T>) -> &'static str {
    match err {
        mpsc::error::TrySendError::Full(_) => "outbox full",
        mpsc::error::TrySendError::Closed(_) => "connection closed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(hub: &BroadcastHub) -> (ConnectionId, mpsc::Receiver<String>) {
        let (tx, mut rx) = mpsc::channel(16);
        let id = hub.register(tx);
        assert!(hub.open(id));
        let welcome = next(&mut rx).expect("welcome frame");
        assert_eq!(welcome["type"], "welcome");
        (id, rx)
    }

    fn next(rx: &mut mpsc::Receiver<String>) -> Option<Value> {
        rx.try_recv().ok().map(|raw| serde_json::from_str(&raw).unwrap())
    }

    #[test]
    fn test_state_machine() {
        let hub = BroadcastHub::new(4);
        let (tx, _rx) = mpsc::channel(4);
        let id = hub.register(tx);
        assert_eq!(hub.state(id), ConnectionState::Connecting);

        // Connecting viewers receive nothing from emit
        assert_eq!(hub.emit("alerts", json!([])), 0);

        assert!(hub.open(id));
        assert_eq!(hub.state(id), ConnectionState::Open);
        assert!(!hub.open(id));

        assert!(hub.unregister(id));
        assert_eq!(hub.state(id), ConnectionState::Closed);
        assert!(!hub.unregister(id));
    }

    #[test]
    fn test_subscription_filtering() {
        let hub = BroadcastHub::new(16);
        let (narrow, mut narrow_rx) = connect(&hub);
        let (_wide, mut wide_rx) = connect(&hub);

        hub.on_message(narrow, r#"{"type":"subscribe","channels":["benchmark:complete"]}"#)
            .unwrap();
        let ack = next(&mut narrow_rx).unwrap();
        assert_eq!(ack["type"], "subscribed");
        assert_eq!(ack["data"]["channels"], json!(["benchmark:complete"]));

        hub.emit("benchmark:complete", json!({"name": "sort"}));
        hub.emit("tests:complete", json!({"name": "login"}));

        assert_eq!(next(&mut narrow_rx).unwrap()["type"], "benchmark:complete");
        assert!(next(&mut narrow_rx).is_none());

        assert_eq!(next(&mut wide_rx).unwrap()["type"], "benchmark:complete");
        assert_eq!(next(&mut wide_rx).unwrap()["type"], "tests:complete");
    }

    #[test]
    fn test_subscribe_replaces_rather_than_unions() {
        let hub = BroadcastHub::new(16);
        let (id, mut rx) = connect(&hub);

        hub.on_message(id, r#"{"type":"subscribe","channels":["alerts"]}"#).unwrap();
        hub.on_message(id, r#"{"type":"subscribe","channels":["data:updated"]}"#).unwrap();
        while next(&mut rx).is_some() {}

        hub.emit("alerts", json!([]));
        hub.emit("data:updated", json!({}));

        assert_eq!(next(&mut rx).unwrap()["type"], "data:updated");
        assert!(next(&mut rx).is_none());
    }

    #[test]
    fn test_ping_ignores_subscriptions() {
        let hub = BroadcastHub::new(16);
        let (id, mut rx) = connect(&hub);
        hub.on_message(id, r#"{"type":"subscribe","channels":[]}"#).unwrap();
        next(&mut rx);

        hub.on_message(id, r#"{"type":"ping"}"#).unwrap();
        let pong = next(&mut rx).unwrap();
        assert_eq!(pong["type"], "pong");
        assert!(pong["data"]["timestamp"].is_i64());
    }

    #[test]
    fn test_failed_delivery_drops_only_that_viewer() {
        let hub = BroadcastHub::new(16);
        let (gone, gone_rx) = connect(&hub);
        let (_alive, mut alive_rx) = connect(&hub);
        drop(gone_rx);

        let delivered = hub.emit("data:updated", json!({"run": 1}));
        assert_eq!(delivered, 1);
        assert_eq!(hub.state(gone), ConnectionState::Closed);
        assert_eq!(hub.viewer_count(), 1);
        assert_eq!(next(&mut alive_rx).unwrap()["data"]["run"], 1);
    }

    #[test]
    fn test_slow_viewer_is_dropped_without_blocking() {
        let hub = BroadcastHub::new(2);
        let (tx, _rx) = mpsc::channel(2);
        let id = hub.register(tx);
        hub.open(id); // welcome occupies one slot

        assert_eq!(hub.emit("alerts", json!([1])), 1);
        assert_eq!(hub.emit("alerts", json!([2])), 0);
        assert_eq!(hub.state(id), ConnectionState::Closed);
    }

    #[test]
    fn test_unknown_connection_and_bad_frames() {
        let hub = BroadcastHub::new(4);
        assert!(matches!(
            hub.on_message(Uuid::new_v4(), r#"{"type":"ping"}"#),
            Err(ProtocolError::UnknownConnection(_))
        ));

        let (id, _rx) = connect(&hub);
        assert!(hub.on_message(id, "{").is_err());
        assert_eq!(hub.state(id), ConnectionState::Open);
    }
}
