//! WebSocket support for real-time collaboration
//!
//! Provides the collaboration relay:
//! - User presence tracking (online/away/busy/offline), broadcast per organization
//! - Collaboration sessions with many-to-many membership
//! - Fan-out of chat, cursor, edit, review, and task messages to session members
//! - Heartbeat pings with cleanup of dead connections
//!
//! # Architecture
//!
//! - **Connection**: An authenticated socket, its lifecycle state and presence
//! - **Registry**: User -> live connection
//! - **Session**: Session <-> member bookkeeping and shared ephemeral state
//! - **Relay**: Validates envelopes and broadcasts them
//! - **Heartbeat**: Periodic liveness check
//! - **Handler**: Axum WebSocket route handler
//! - **Events**: Type-safe envelope definitions for client/server communication

pub mod connection;
pub mod events;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod relay;
pub mod session;
pub mod state;


pub use handler::ws_handler;
pub use heartbeat::HeartbeatMonitor;
pub use relay::Relay;
pub use state::{CollabState, CollabStats};
