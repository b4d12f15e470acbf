use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use sumten_core::protocol::{ConnectionId, ServerMessage};

use crate::registry::RoomRegistry;

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Handle to push messages to a connected WebSocket client.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub tx: Outbox,
    pub connected_at: Instant,
}

/// Shared application state.
pub struct AppState {
    pub db: SqlitePool,
    pub rooms: RoomRegistry,
    pub connections: DashMap<ConnectionId, ConnectionHandle>,
    /// Reserved connection slots, including upgrades still in flight.
    pub connection_count: AtomicU32,
    pub max_connections: u32,
    next_connection_id: AtomicU64,
}

impl AppState {
    pub fn new(db: SqlitePool, max_connections: u32) -> Self {
        Self {
            db,
            rooms: RoomRegistry::new(),
            connections: DashMap::new(),
            connection_count: AtomicU32::new(0),
            max_connections,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Claim a connection slot. Fails without side effects when all
    /// `max_connections` slots are taken.
    pub fn try_reserve_slot(&self) -> bool {
        self.connection_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_connections).then_some(n + 1)
            })
            .is_ok()
    }

    /// Return a slot taken by [`try_reserve_slot`](Self::try_reserve_slot).
    pub fn release_slot(&self) {
        let _ = self
            .connection_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn register(&self, id: ConnectionId, tx: Outbox) {
        self.connections.insert(
            id,
            ConnectionHandle {
                id,
                tx,
                connected_at: Instant::now(),
            },
        );
    }

    /// Drop the connection and free its slot.
    pub fn deregister(&self, id: ConnectionId) {
        if let Some((_, conn)) = self.connections.remove(&id) {
            self.release_slot();
            tracing::debug!(
                connection = %conn.id,
                secs = conn.connected_at.elapsed().as_secs(),
                "connection closed"
            );
        }
    }

    /// Send to every connected client, whether or not it is in a room.
    pub fn broadcast_all(&self, msg: &ServerMessage) {
        for conn in self.connections.iter() {
            let _ = conn.tx.send(msg.clone());
        }
    }
}
