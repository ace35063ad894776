//! Message relay
//!
//! Applies inbound envelopes to the registries and fans the results out to
//! session members and organizations. Edits and cursors are forwarded as-is in
//! arrival order; no merging is attempted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use huddle_shared::{
    CollabError, CollabResult, MessageId, MessageKind, MessageRecord, OrgId, PresenceStatus,
    SessionId, UserId,
};
use time::OffsetDateTime;

use crate::store::RecordSink;

use super::{
    connection::{close_code, Connection, User},
    events::{ClientEvent, CreateSessionPayload, Relayable, ServerEvent, StatusPayload},
    registry::ConnectionRegistry,
    session::{NewSession, SessionRegistry},
};

/// Fan-out engine over the connection and session registries
#[derive(Clone)]
pub struct Relay {
    connections: Arc<ConnectionRegistry>,
    sessions: Arc<SessionRegistry>,
    sink: RecordSink,
    max_message_bytes: usize,
    relayed: Arc<AtomicU64>,
}

impl Relay {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        sessions: Arc<SessionRegistry>,
        sink: RecordSink,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            connections,
            sessions,
            sink,
            max_message_bytes,
            relayed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of messages relayed since startup
    pub fn relayed_count(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Register an authenticated connection, open it, and announce it to the org
    pub async fn connect(&self, conn: Connection) -> Arc<Connection> {
        let (conn, superseded) = self.connections.register(conn).await;

        if let Some(old) = superseded {
            tracing::info!(
                user_id = %old.user_id(),
                connection_id = %old.connection_id,
                "Closing superseded connection"
            );
            old.close(close_code::SUPERSEDED, "superseded by a newer connection");
        }

        conn.mark_open();
        let user = conn.user().await;
        let _ = conn.send(ServerEvent::Connected {
            connection_id: conn.connection_id,
            user: user.clone(),
        });

        let others: Vec<User> = self
            .online_users(&user.org_id)
            .await
            .into_iter()
            .filter(|u| u.id != user.id)
            .collect();
        let _ = conn.send(ServerEvent::PresenceBatch { users: others });

        self.broadcast_to_org(&user.org_id, ServerEvent::presence(&user), Some(user.id))
            .await;

        conn
    }

    /// Disconnect cleanup. Runs at most once per connection: only the caller
    /// that evicts the connection from the registry performs the broadcasts.
    /// Returns whether this call did the cleanup.
    pub async fn disconnect(&self, conn: &Arc<Connection>) -> bool {
        conn.begin_closing();
        let removed = self
            .connections
            .remove(&conn.user_id(), conn.connection_id)
            .await;
        conn.mark_closed();

        if removed.is_none() {
            return false;
        }

        let user_id = conn.user_id();
        for (session_id, remaining) in self.sessions.remove_user(&user_id).await {
            self.send_to_users(&remaining, ServerEvent::UserLeft { session_id, user_id }, None)
                .await;
        }

        let mut user = conn.user().await;
        user.status = PresenceStatus::Offline;
        self.broadcast_to_org(&user.org_id, ServerEvent::presence(&user), Some(user_id))
            .await;

        // Lets the socket task stop reading when cleanup came from elsewhere
        conn.close(close_code::NORMAL, "connection closed");

        tracing::info!(
            connection_id = %conn.connection_id,
            user_id = %user_id,
            "Connection cleaned up"
        );
        true
    }

    // =========================================================================
    // Inbound dispatch
    // =========================================================================

    /// Handle one inbound text frame. Failures are reported to the sender only.
    /// Frames from a connection that is no longer open are dropped.
    pub async fn handle_text(&self, conn: &Arc<Connection>, text: &str) {
        if !conn.is_open() {
            tracing::debug!(
                connection_id = %conn.connection_id,
                user_id = %conn.user_id(),
                state = ?conn.state(),
                "Dropping frame from connection that is not open"
            );
            return;
        }

        let result = if text.len() > self.max_message_bytes {
            Err(CollabError::InvalidPayload(format!(
                "message exceeds {} bytes",
                self.max_message_bytes
            )))
        } else {
            match ClientEvent::parse(text) {
                Ok(event) => self.handle_event(conn, event).await,
                Err(e) => Err(e),
            }
        };

        if let Err(e) = result {
            tracing::debug!(
                connection_id = %conn.connection_id,
                user_id = %conn.user_id(),
                code = e.code(),
                error = %e,
                "Rejected client message"
            );
            let _ = conn.send(ServerEvent::from(e));
        }
    }

    /// Apply a parsed event on behalf of `conn`. Ignored unless `conn` is open.
    pub async fn handle_event(&self, conn: &Arc<Connection>, event: ClientEvent) -> CollabResult<()> {
        if !conn.is_open() {
            return Ok(());
        }

        match event {
            ClientEvent::CreateSession(payload) => self.create_session(conn, payload).await,
            ClientEvent::JoinSession(r) => self.join_session(conn, r.session_id).await,
            ClientEvent::LeaveSession(r) => self.leave_session(conn, r.session_id).await,
            ClientEvent::StatusUpdate(payload) => {
                self.update_status(conn, payload).await;
                Ok(())
            }
            ClientEvent::Ping => {
                let _ = conn.send(ServerEvent::Pong);
                Ok(())
            }
            relayable => match relayable.into_relayable()? {
                Some(message) => self.relay(conn, message).await.map(|_| ()),
                None => Ok(()),
            },
        }
    }

    pub async fn create_session(
        &self,
        conn: &Arc<Connection>,
        payload: CreateSessionPayload,
    ) -> CollabResult<()> {
        let session = self
            .sessions
            .create_session(
                &conn.identity,
                NewSession {
                    name: payload.name,
                    project_id: payload.project_id,
                    session_type: payload.session_type,
                    values: payload.state,
                },
            )
            .await;

        // Disconnect cleanup may have run while the session was being created
        if !conn.is_open() {
            let _ = self.sessions.leave(&conn.user_id(), session.id).await;
            return Ok(());
        }

        let _ = conn.send(ServerEvent::SessionCreated { session });
        Ok(())
    }

    pub async fn join_session(&self, conn: &Arc<Connection>, session_id: SessionId) -> CollabResult<()> {
        let outcome = self.sessions.join(&conn.identity, session_id).await?;
        if !conn.is_open() {
            if !outcome.already_member {
                let _ = self.sessions.leave(&conn.user_id(), session_id).await;
            }
            return Ok(());
        }
        let user = conn.user().await;

        let mut participants = Vec::with_capacity(outcome.session.participants.len());
        for member in &outcome.session.participants {
            if *member == user.id {
                participants.push(user.clone());
            } else if let Some(other) = self.connections.lookup(member).await {
                participants.push(other.user().await);
            }
        }

        let _ = conn.send(ServerEvent::SessionJoined {
            session: outcome.session,
            participants,
        });

        if !outcome.already_member {
            self.broadcast_to_session(
                &session_id,
                ServerEvent::UserJoined { session_id, user },
                Some(conn.user_id()),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn leave_session(&self, conn: &Arc<Connection>, session_id: SessionId) -> CollabResult<()> {
        let user_id = conn.user_id();
        let session = self.sessions.leave(&user_id, session_id).await?;
        let _ = conn.send(ServerEvent::SessionLeft { session_id });

        let remaining: Vec<UserId> = session.participants.into_iter().collect();
        self.send_to_users(&remaining, ServerEvent::UserLeft { session_id, user_id }, None)
            .await;
        Ok(())
    }

    /// Update presence and announce it to the rest of the organization
    pub async fn update_status(&self, conn: &Arc<Connection>, payload: StatusPayload) {
        let user = conn
            .set_presence(payload.status, payload.current_project)
            .await;
        self.broadcast_to_org(&user.org_id, ServerEvent::presence(&user), Some(user.id))
            .await;
    }

    /// Stamp, persist, and fan out a session message.
    /// Returns the number of recipients.
    pub async fn relay(&self, conn: &Arc<Connection>, message: Relayable) -> CollabResult<usize> {
        let Relayable {
            kind,
            session_id,
            payload,
        } = message;

        if self.sessions.get(&session_id).await.is_none() {
            return Err(CollabError::SessionNotFound(session_id));
        }
        if !self.sessions.is_member(&conn.user_id(), &session_id).await {
            return Err(CollabError::NotAMember(session_id));
        }

        let record = MessageRecord {
            id: MessageId::new(),
            session_id,
            author_id: conn.user_id(),
            author_name: conn.identity.display_name.clone(),
            kind,
            payload,
            timestamp: OffsetDateTime::now_utc(),
        };

        if kind == MessageKind::CodeEdit {
            if let Err(e) = self.sessions.record_edit(session_id, record.clone()).await {
                tracing::warn!(error = %e, session_id = %session_id, "Failed to record edit");
            }
        }

        if self.sink.send(record.clone()).is_err() {
            tracing::error!(
                message_id = %record.id,
                session_id = %session_id,
                "Message store unavailable, record not persisted"
            );
        }

        self.relayed.fetch_add(1, Ordering::Relaxed);
        self.broadcast_to_session(
            &session_id,
            ServerEvent::from_record(record),
            Some(conn.user_id()),
        )
        .await
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Send an event to every open member connection of a session except `exclude`.
    /// Returns the number of connections the event was queued for.
    pub async fn broadcast_to_session(
        &self,
        session_id: &SessionId,
        event: ServerEvent,
        exclude: Option<UserId>,
    ) -> CollabResult<usize> {
        let members = self.sessions.members(session_id).await?;
        let delivered = self.send_to_users(&members, event, exclude).await;

        tracing::debug!(
            session_id = %session_id,
            members = members.len(),
            recipients = delivered,
            "Broadcast event to session"
        );
        Ok(delivered)
    }

    /// Send an event to every other open connection in an organization
    pub async fn broadcast_to_org(&self, org_id: &OrgId, event: ServerEvent, exclude: Option<UserId>) -> usize {
        let mut delivered = 0;
        for conn in self.connections.in_org(org_id).await {
            if Some(conn.user_id()) == exclude || !conn.is_open() {
                continue;
            }
            if conn.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    async fn send_to_users(&self, users: &[UserId], event: ServerEvent, exclude: Option<UserId>) -> usize {
        let mut delivered = 0;
        for user_id in users {
            if Some(*user_id) == exclude {
                continue;
            }
            let Some(conn) = self.connections.lookup(user_id).await else {
                continue;
            };
            if !conn.is_open() {
                continue;
            }
            match conn.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::warn!(
                    connection_id = %conn.connection_id,
                    user_id = %user_id,
                    "Failed to send event to connection (likely closed)"
                ),
            }
        }
        delivered
    }

    /// Current users of every open connection in an organization
    pub async fn online_users(&self, org_id: &OrgId) -> Vec<User> {
        let mut users = Vec::new();
        for conn in self.connections.in_org(org_id).await {
            if conn.is_open() {
                users.push(conn.user().await);
            }
        }
        users
    }
}
