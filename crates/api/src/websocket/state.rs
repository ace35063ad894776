//! Collaboration state
//!
//! Owns the connection and session registries for one service instance.
//! Handlers receive it by reference through `AppState`; there is no global state.

use std::sync::Arc;

use serde::Serialize;

use crate::store::RecordSink;

use super::registry::ConnectionRegistry;
use super::relay::Relay;
use super::session::SessionRegistry;

#[derive(Clone)]
pub struct CollabState {
    pub connections: Arc<ConnectionRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub relay: Relay,
}

impl CollabState {
    pub fn new(sink: RecordSink, recent_edits_capacity: usize, max_message_bytes: usize) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let sessions = Arc::new(SessionRegistry::new(recent_edits_capacity));
        let relay = Relay::new(
            Arc::clone(&connections),
            Arc::clone(&sessions),
            sink,
            max_message_bytes,
        );

        Self {
            connections,
            sessions,
            relay,
        }
    }

    /// Get statistics about connections and sessions
    pub async fn get_stats(&self) -> CollabStats {
        let (total_sessions, active_sessions) = self.sessions.counts().await;

        CollabStats {
            active_connections: self.connections.count().await,
            total_sessions,
            active_sessions,
            relayed_messages: self.relay.relayed_count(),
        }
    }
}

/// Statistics about the collaboration relay
#[derive(Debug, Clone, Serialize)]
pub struct CollabStats {
    pub active_connections: usize,
    pub total_sessions: usize,
    /// Sessions with at least one participant
    pub active_sessions: usize,
    pub relayed_messages: u64,
}
