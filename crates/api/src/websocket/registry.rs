//! Connection registry
//!
//! Maps an authenticated user to the one live socket that represents them.

use std::collections::HashMap;
use std::sync::Arc;

use huddle_shared::{OrgId, UserId};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;

/// All registered connections indexed by user
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns the stored handle and, if the user was
    /// already connected, the connection it replaced.
    pub async fn register(&self, conn: Connection) -> (Arc<Connection>, Option<Arc<Connection>>) {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        let previous = connections.insert(conn.user_id(), Arc::clone(&conn));

        tracing::info!(
            connection_id = %conn.connection_id,
            user_id = %conn.user_id(),
            org_id = %conn.org_id(),
            replaced = previous.is_some(),
            total_connections = connections.len(),
            "WebSocket connection registered"
        );

        (conn, previous)
    }

    /// Live connection for a user, if any
    pub async fn lookup(&self, user_id: &UserId) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.get(user_id).cloned()
    }

    /// Evict a user's connection, but only if `connection_id` is still the
    /// registered one. The caller that gets `Some` owns disconnect cleanup.
    pub async fn remove(&self, user_id: &UserId, connection_id: Uuid) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        match connections.get(user_id) {
            Some(current) if current.connection_id == connection_id => {
                let removed = connections.remove(user_id);
                tracing::info!(
                    connection_id = %connection_id,
                    user_id = %user_id,
                    remaining_connections = connections.len(),
                    "WebSocket connection removed"
                );
                removed
            }
            _ => None,
        }
    }

    /// Snapshot of every registered connection
    pub async fn all(&self) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.values().cloned().collect()
    }

    /// Snapshot of the connections belonging to one organization
    pub async fn in_org(&self, org_id: &OrgId) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|c| c.org_id() == *org_id)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }
}
