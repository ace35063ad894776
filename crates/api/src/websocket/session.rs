//! Collaboration session registry
//!
//! Sessions and memberships form a many-to-many mapping. Both directions live
//! behind one lock so a user is a member of a session exactly when each side
//! references the other.

use std::collections::{HashMap, HashSet, VecDeque};

use huddle_shared::{
    CollabError, CollabResult, MessageRecord, OrgId, SessionId, SessionType, UserId,
};
use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::auth::Identity;

/// Ephemeral state shared by the members of a session
#[derive(Debug, Clone, Default, Serialize)]
pub struct SharedState {
    /// Most recent edits, oldest first, bounded by the registry capacity
    pub recent_edits: VecDeque<MessageRecord>,
    /// Free-form key/value bag supplied at creation
    pub values: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub project_id: String,
    pub org_id: OrgId,
    pub session_type: SessionType,
    pub created_by: UserId,
    pub participants: HashSet<UserId>,
    pub state: SharedState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// False while nobody is in the session
    pub active: bool,
}

/// Metadata for a new session
#[derive(Debug, Clone)]
pub struct NewSession {
    pub name: String,
    pub project_id: String,
    pub session_type: SessionType,
    pub values: Map<String, Value>,
}

/// Result of a join
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub session: Session,
    /// True if the user was already a participant (membership unchanged)
    pub already_member: bool,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    memberships: HashMap<UserId, HashSet<SessionId>>,
}

/// Manages collaboration sessions and their participants
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    recent_edits_capacity: usize,
}

impl SessionRegistry {
    pub fn new(recent_edits_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            recent_edits_capacity,
        }
    }

    /// Create a session with the creator as its sole participant
    pub async fn create_session(&self, creator: &Identity, new: NewSession) -> Session {
        let now = OffsetDateTime::now_utc();
        let session = Session {
            id: SessionId::new(),
            name: new.name,
            project_id: new.project_id,
            org_id: creator.org_id,
            session_type: new.session_type,
            created_by: creator.user_id,
            participants: HashSet::from([creator.user_id]),
            state: SharedState {
                recent_edits: VecDeque::new(),
                values: new.values,
            },
            created_at: now,
            updated_at: now,
            active: true,
        };

        let mut inner = self.inner.write().await;
        inner
            .memberships
            .entry(creator.user_id)
            .or_default()
            .insert(session.id);
        inner.sessions.insert(session.id, session.clone());

        tracing::info!(
            session_id = %session.id,
            user_id = %creator.user_id,
            org_id = %creator.org_id,
            session_type = %session.session_type,
            total_sessions = inner.sessions.len(),
            "Session created"
        );

        session
    }

    /// Add a user to a session. Users from another organization are always rejected.
    pub async fn join(&self, user: &Identity, session_id: SessionId) -> CollabResult<JoinOutcome> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(CollabError::SessionNotFound(session_id))?;

        if session.org_id != user.org_id {
            tracing::warn!(
                session_id = %session_id,
                user_id = %user.user_id,
                "Rejected cross-organization join"
            );
            return Err(CollabError::CrossOrganization);
        }

        let newly_added = session.participants.insert(user.user_id);
        if newly_added {
            session.active = true;
            session.updated_at = OffsetDateTime::now_utc();
        }
        let snapshot = session.clone();

        inner
            .memberships
            .entry(user.user_id)
            .or_default()
            .insert(session_id);

        tracing::debug!(
            session_id = %session_id,
            user_id = %user.user_id,
            session_size = snapshot.participants.len(),
            already_member = !newly_added,
            "User joined session"
        );

        Ok(JoinOutcome {
            session: snapshot,
            already_member: !newly_added,
        })
    }

    /// Remove a user from a session. Returns the session as it is afterwards.
    pub async fn leave(&self, user_id: &UserId, session_id: SessionId) -> CollabResult<Session> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(CollabError::SessionNotFound(session_id))?;

        if !session.participants.remove(user_id) {
            return Err(CollabError::NotAMember(session_id));
        }
        Self::touch_after_departure(session);
        let snapshot = session.clone();

        if let Some(joined) = inner.memberships.get_mut(user_id) {
            joined.remove(&session_id);
            if joined.is_empty() {
                inner.memberships.remove(user_id);
            }
        }

        tracing::debug!(
            session_id = %session_id,
            user_id = %user_id,
            session_size = snapshot.participants.len(),
            "User left session"
        );

        Ok(snapshot)
    }

    /// Remove a user from every session they are in.
    /// Returns each affected session with its remaining participants.
    pub async fn remove_user(&self, user_id: &UserId) -> Vec<(SessionId, Vec<UserId>)> {
        let mut inner = self.inner.write().await;
        let Some(joined) = inner.memberships.remove(user_id) else {
            return Vec::new();
        };

        let mut affected = Vec::with_capacity(joined.len());
        for session_id in joined {
            if let Some(session) = inner.sessions.get_mut(&session_id) {
                session.participants.remove(user_id);
                Self::touch_after_departure(session);
                affected.push((session_id, session.participants.iter().copied().collect()));
            }
        }

        if !affected.is_empty() {
            tracing::debug!(
                user_id = %user_id,
                session_count = affected.len(),
                "Removed user from sessions"
            );
        }

        affected
    }

    fn touch_after_departure(session: &mut Session) {
        session.updated_at = OffsetDateTime::now_utc();
        if session.participants.is_empty() {
            session.active = false;
        }
    }

    /// Append a code edit to the session's ring buffer
    pub async fn record_edit(&self, session_id: SessionId, edit: MessageRecord) -> CollabResult<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(CollabError::SessionNotFound(session_id))?;

        let edits = &mut session.state.recent_edits;
        while edits.len() >= self.recent_edits_capacity && !edits.is_empty() {
            edits.pop_front();
        }
        if self.recent_edits_capacity > 0 {
            edits.push_back(edit);
        }
        session.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<Session> {
        let inner = self.inner.read().await;
        inner.sessions.get(session_id).cloned()
    }

    pub async fn is_member(&self, user_id: &UserId, session_id: &SessionId) -> bool {
        let inner = self.inner.read().await;
        inner
            .memberships
            .get(user_id)
            .is_some_and(|joined| joined.contains(session_id))
    }

    /// Participants of a session
    pub async fn members(&self, session_id: &SessionId) -> CollabResult<Vec<UserId>> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(session_id)
            .map(|s| s.participants.iter().copied().collect())
            .ok_or(CollabError::SessionNotFound(*session_id))
    }

    /// Sessions a user has joined
    pub async fn sessions_for(&self, user_id: &UserId) -> Vec<SessionId> {
        let inner = self.inner.read().await;
        inner
            .memberships
            .get(user_id)
            .map(|joined| joined.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All sessions of an organization, newest first
    pub async fn list_for_org(&self, org_id: &OrgId) -> Vec<Session> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.org_id == *org_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    /// Total sessions and how many of them currently have participants
    pub async fn counts(&self) -> (usize, usize) {
        let inner = self.inner.read().await;
        let active = inner.sessions.values().filter(|s| s.active).count();
        (inner.sessions.len(), active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::identity;
    use huddle_shared::{MessageId, MessageKind};

    fn standup() -> NewSession {
        NewSession {
            name: "standup-1".to_string(),
            project_id: "project-x".to_string(),
            session_type: SessionType::Meeting,
            values: Map::new(),
        }
    }

    fn edit(session_id: SessionId, n: u64) -> MessageRecord {
        MessageRecord {
            id: MessageId::new(),
            session_id,
            author_id: UserId::new(),
            author_name: "Ada".to_string(),
            kind: MessageKind::CodeEdit,
            payload: serde_json::json!({ "n": n }),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_create_session_adds_creator_both_ways() {
        let registry = SessionRegistry::new(10);
        let ada = identity(OrgId::new(), "Ada");

        let session = registry.create_session(&ada, standup()).await;
        assert_eq!(session.participants.len(), 1);
        assert!(session.participants.contains(&ada.user_id));
        assert!(session.active);
        assert!(registry.is_member(&ada.user_id, &session.id).await);
        assert_eq!(registry.sessions_for(&ada.user_id).await, vec![session.id]);
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let registry = SessionRegistry::new(10);
        let org = OrgId::new();
        let ada = identity(org, "Ada");
        let bob = identity(org, "Bob");
        let session = registry.create_session(&ada, standup()).await;

        let first = registry.join(&bob, session.id).await.unwrap();
        assert!(!first.already_member);
        assert_eq!(first.session.participants.len(), 2);

        let second = registry.join(&bob, session.id).await.unwrap();
        assert!(second.already_member);
        assert_eq!(second.session.participants.len(), 2);
        assert_eq!(registry.sessions_for(&bob.user_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_cross_organization_join_rejected_even_when_inactive() {
        let registry = SessionRegistry::new(10);
        let ada = identity(OrgId::new(), "Ada");
        let eve = identity(OrgId::new(), "Eve");
        let session = registry.create_session(&ada, standup()).await;

        assert_eq!(
            registry.join(&eve, session.id).await.unwrap_err(),
            CollabError::CrossOrganization
        );

        // Empty the session so it is inactive, and try again
        registry.leave(&ada.user_id, session.id).await.unwrap();
        assert!(!registry.get(&session.id).await.unwrap().active);
        assert_eq!(
            registry.join(&eve, session.id).await.unwrap_err(),
            CollabError::CrossOrganization
        );
        assert!(!registry.is_member(&eve.user_id, &session.id).await);
    }

    #[tokio::test]
    async fn test_join_unknown_session() {
        let registry = SessionRegistry::new(10);
        let ada = identity(OrgId::new(), "Ada");
        let missing = SessionId::new();

        assert_eq!(
            registry.join(&ada, missing).await.unwrap_err(),
            CollabError::SessionNotFound(missing)
        );
    }

    #[tokio::test]
    async fn test_leave_removes_both_directions() {
        let registry = SessionRegistry::new(10);
        let org = OrgId::new();
        let ada = identity(org, "Ada");
        let bob = identity(org, "Bob");
        let session = registry.create_session(&ada, standup()).await;
        registry.join(&bob, session.id).await.unwrap();

        let after = registry.leave(&bob.user_id, session.id).await.unwrap();
        assert!(!after.participants.contains(&bob.user_id));
        assert!(after.active);
        assert!(registry.sessions_for(&bob.user_id).await.is_empty());

        assert_eq!(
            registry.leave(&bob.user_id, session.id).await.unwrap_err(),
            CollabError::NotAMember(session.id)
        );
    }

    #[tokio::test]
    async fn test_remove_user_reports_remaining_members() {
        let registry = SessionRegistry::new(10);
        let org = OrgId::new();
        let ada = identity(org, "Ada");
        let bob = identity(org, "Bob");
        let one = registry.create_session(&ada, standup()).await;
        let two = registry.create_session(&bob, standup()).await;
        registry.join(&bob, one.id).await.unwrap();

        let mut affected = registry.remove_user(&bob.user_id).await;
        affected.sort_by_key(|(id, _)| *id == two.id);

        assert_eq!(affected.len(), 2);
        assert_eq!(affected[0], (one.id, vec![ada.user_id]));
        assert_eq!(affected[1], (two.id, vec![]));
        assert!(!registry.get(&two.id).await.unwrap().active);
        assert!(registry.remove_user(&bob.user_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_recent_edits_ring_buffer_is_bounded() {
        let registry = SessionRegistry::new(3);
        let ada = identity(OrgId::new(), "Ada");
        let session = registry.create_session(&ada, standup()).await;

        for n in 0..5 {
            registry.record_edit(session.id, edit(session.id, n)).await.unwrap();
        }

        let edits = registry.get(&session.id).await.unwrap().state.recent_edits;
        let ns: Vec<u64> = edits.iter().filter_map(|e| e.payload["n"].as_u64()).collect();
        assert_eq!(ns, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_list_for_org_scopes_by_org() {
        let registry = SessionRegistry::new(3);
        let org = OrgId::new();
        registry.create_session(&identity(org, "Ada"), standup()).await;
        registry.create_session(&identity(org, "Bob"), standup()).await;
        registry.create_session(&identity(OrgId::new(), "Eve"), standup()).await;

        assert_eq!(registry.list_for_org(&org).await.len(), 2);
        assert_eq!(registry.counts().await, (3, 3));
    }
}
