//! Live set of authenticated stream connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, gauge};
use parking_lot::RwLock;
use tracing::{info, warn};

use super::connection::Connection;
use super::errors::CloseReason;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_EVICTIONS_TOTAL};

/// Concurrent connection registry.
///
/// Mutations take a short write lock; readers copy the current set into a
/// [`Snapshot`] so no lock is ever held across an `.await`.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    closed: AtomicBool,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a connection.
    ///
    /// Returns `false` (and registers nothing) once the registry is closed
    /// or if a connection with the same ID is already present.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        let count = {
            let mut conns = self.connections.write();
            if self.closed.load(Ordering::Acquire) || conns.contains_key(&connection.id) {
                return false;
            }
            let _ = conns.insert(connection.id.clone(), connection);
            conns.len()
        };
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        record_active(count);
        true
    }

    /// Remove a connection by ID. Removing an absent ID is a no-op.
    pub fn remove(&self, connection_id: &str) -> Option<Arc<Connection>> {
        let (removed, count) = {
            let mut conns = self.connections.write();
            let removed = conns.remove(connection_id);
            (removed, conns.len())
        };
        if removed.is_some() {
            record_active(count);
        }
        removed
    }

    /// Point-in-time copy of all registered connections.
    pub fn snapshot(&self) -> Snapshot {
        let conns = self.connections.read();
        Snapshot {
            connections: conns.values().cloned().collect(),
        }
    }

    /// Look up a connection by ID.
    pub fn get(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(connection_id).cloned()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Number of registered connections for one owner.
    pub fn owner_connection_count(&self, owner_id: &str) -> usize {
        self.connections
            .read()
            .values()
            .filter(|c| c.owner_id() == owner_id)
            .count()
    }

    /// Tear a connection down.
    ///
    /// Safe to call from any path (read-loop, keep-alive, broadcaster,
    /// shutdown) any number of times: only the first call removes the
    /// connection, cancels its tasks, logs, and returns `true`.
    pub fn evict(&self, connection: &Connection, reason: &CloseReason) -> bool {
        if !connection.begin_close() {
            return false;
        }
        let _ = self.remove(&connection.id);
        let lifetime_secs = connection.age().as_secs();
        if reason.is_failure() {
            warn!(
                conn_id = %connection.id,
                owner_id = connection.owner_id(),
                reason = reason.label(),
                lifetime_secs,
                error = %reason,
                "stream connection evicted"
            );
        } else {
            info!(
                conn_id = %connection.id,
                owner_id = connection.owner_id(),
                reason = reason.label(),
                lifetime_secs,
                "stream connection closed"
            );
        }
        counter!(WS_EVICTIONS_TOTAL, "reason" => reason.label()).increment(1);
        true
    }

    /// Refuse new registrations and evict everything currently registered.
    ///
    /// Returns the number of connections evicted.
    pub fn close(&self, reason: &CloseReason) -> usize {
        self.closed.store(true, Ordering::Release);
        self.snapshot()
            .iter()
            .filter(|conn| self.evict(conn, reason))
            .count()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_active(count: usize) {
    gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
}

/// Immutable view of the registry at one instant.
///
/// Later registrations and evictions do not affect an existing snapshot.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    connections: Vec<Arc<Connection>>,
}

impl Snapshot {
    /// Every connection in the snapshot.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.connections.iter()
    }

    /// Open connections bound to `owner_id`.
    pub fn for_owner<'a>(&'a self, owner_id: &'a str) -> impl Iterator<Item = &'a Arc<Connection>> {
        self.connections
            .iter()
            .filter(move |c| c.owner_id() == owner_id && c.is_open())
    }

    /// Number of connections in the snapshot.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
