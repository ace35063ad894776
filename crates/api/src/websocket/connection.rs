//! WebSocket connection management
//!
//! Represents an authenticated WebSocket connection, its lifecycle state, and
//! the presence of the user behind it.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use huddle_shared::{OrgId, PresenceStatus, UserId};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::auth::Identity;

use super::events::ServerEvent;

/// WebSocket close codes used by the relay
pub mod close_code {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Upgrade attempted without a credential
    pub const MISSING_CREDENTIAL: u16 = 4001;
    /// Credential present but invalid, expired, or not a usable identity
    pub const INVALID_CREDENTIAL: u16 = 4003;
    /// Same user connected again; the older socket is closed
    pub const SUPERSEDED: u16 = 4009;
}

/// Lifecycle of a connection. Only `Open` connections receive broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Authenticated = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Authenticated,
            2 => Self::Open,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Frames queued for the socket writer task
#[derive(Debug)]
pub enum Outbound {
    Event(ServerEvent),
    Ping,
    Close { code: u16, reason: &'static str },
}

/// User record as seen by other participants
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub org_id: OrgId,
    pub status: PresenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_project: Option<String>,
}

#[derive(Debug)]
struct Presence {
    status: PresenceStatus,
    current_project: Option<String>,
}

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique ID for this socket
    pub connection_id: Uuid,

    /// Authenticated identity
    pub identity: Identity,

    /// Channel to the socket writer task
    sender: mpsc::UnboundedSender<Outbound>,

    state: AtomicU8,

    /// Set when a ping is sent, cleared by any inbound frame
    awaiting_pong: AtomicBool,

    presence: RwLock<Presence>,
}

impl Connection {
    /// Create a connection for an identity that has already been authenticated
    pub fn new(identity: Identity, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            identity,
            sender,
            state: AtomicU8::new(ConnectionState::Authenticated as u8),
            awaiting_pong: AtomicBool::new(false),
            presence: RwLock::new(Presence {
                status: PresenceStatus::Online,
                current_project: None,
            }),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    pub fn org_id(&self) -> OrgId {
        self.identity.org_id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Authenticated -> Open
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Authenticated as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Authenticated/Open -> Closing. Returns false if already closing or closed.
    pub fn begin_closing(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match ConnectionState::from_u8(current) {
                    ConnectionState::Closing | ConnectionState::Closed => None,
                    _ => Some(ConnectionState::Closing as u8),
                }
            })
            .is_ok()
    }

    /// Any state -> Closed
    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if queued, Err if the writer task is gone
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed frame
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<Outbound>> {
        self.sender.send(Outbound::Event(event))
    }

    /// Queue a heartbeat ping. Returns false if the writer task is gone.
    pub fn ping(&self) -> bool {
        self.awaiting_pong.store(true, Ordering::Release);
        self.sender.send(Outbound::Ping).is_ok()
    }

    /// Ask the writer task to close the socket with `code`
    pub fn close(&self, code: u16, reason: &'static str) {
        self.begin_closing();
        let _ = self.sender.send(Outbound::Close { code, reason });
    }

    /// Record that the peer is alive (pong or any other inbound frame)
    pub fn record_activity(&self) {
        self.awaiting_pong.store(false, Ordering::Release);
    }

    pub fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong.load(Ordering::Acquire)
    }

    /// Snapshot of the user behind this connection
    pub async fn user(&self) -> User {
        let presence = self.presence.read().await;
        User {
            id: self.identity.user_id,
            display_name: self.identity.display_name.clone(),
            org_id: self.identity.org_id,
            status: presence.status,
            current_project: presence.current_project.clone(),
        }
    }

    /// Update presence and return the resulting user snapshot
    pub async fn set_presence(
        &self,
        status: PresenceStatus,
        current_project: Option<String>,
    ) -> User {
        {
            let mut presence = self.presence.write().await;
            presence.status = status;
            if current_project.is_some() {
                presence.current_project = current_project;
            }
        }
        tracing::debug!(
            connection_id = %self.connection_id,
            user_id = %self.identity.user_id,
            status = %status,
            "Presence updated"
        );
        self.user().await
    }
}
