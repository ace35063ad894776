//! WebSocket envelope types and serialization
//!
//! Every frame in both directions is a JSON envelope `{"type": ..., "payload": ...}`.
//! Inbound envelopes are parsed in two steps so that malformed JSON, unknown
//! types, and bad payloads can be reported to the sender with distinct codes.

use huddle_shared::{
    CollabError, CollabResult, MessageKind, MessageRecord, PresenceStatus, SessionId,
    SessionType, UserId,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::connection::User;
use super::session::Session;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    CreateSession(CreateSessionPayload),
    JoinSession(SessionRef),
    LeaveSession(SessionRef),
    ChatMessage(ChatPayload),
    CursorUpdate(CursorPayload),
    CodeEdit(CodeEditPayload),
    CodeReview(CodeReviewPayload),
    TaskUpdate(TaskUpdatePayload),
    StatusUpdate(StatusPayload),
    Ping,
}

/// Envelope shape shared by every inbound frame
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateSessionPayload {
    pub name: String,
    pub project_id: String,
    #[serde(default)]
    pub session_type: SessionType,
    /// Initial shared key/value state
    #[serde(default)]
    pub state: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SessionRef {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(skip_serializing)]
    pub session_id: SessionId,
    pub content: String,
}

/// Zero-based position in a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPayload {
    #[serde(skip_serializing)]
    pub session_id: SessionId,
    pub file: String,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<TextRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEditPayload {
    #[serde(skip_serializing)]
    pub session_id: SessionId,
    pub file: String,
    pub range: TextRange,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeReviewPayload {
    #[serde(skip_serializing)]
    pub session_id: SessionId,
    pub file: String,
    pub line: u32,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ReviewSeverity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdatePayload {
    #[serde(skip_serializing)]
    pub session_id: SessionId,
    pub task_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusPayload {
    pub status: PresenceStatus,
    #[serde(default)]
    pub current_project: Option<String>,
}

/// A validated message that is relayed to the other members of a session
#[derive(Debug, Clone, PartialEq)]
pub struct Relayable {
    pub kind: MessageKind,
    pub session_id: SessionId,
    pub payload: Value,
}

fn payload<T: DeserializeOwned>(value: Value) -> CollabResult<T> {
    serde_json::from_value(value).map_err(|e| CollabError::InvalidPayload(e.to_string()))
}

fn require_non_empty(field: &str, value: &str) -> CollabResult<()> {
    if value.trim().is_empty() {
        return Err(CollabError::InvalidPayload(format!("{} must not be empty", field)));
    }
    Ok(())
}

impl ClientEvent {
    /// Parse and validate an inbound text frame
    pub fn parse(text: &str) -> CollabResult<Self> {
        let raw: RawEnvelope =
            serde_json::from_str(text).map_err(|e| CollabError::InvalidJson(e.to_string()))?;

        let event = match raw.kind.as_str() {
            "create_session" => Self::CreateSession(payload(raw.payload)?),
            "join_session" => Self::JoinSession(payload(raw.payload)?),
            "leave_session" => Self::LeaveSession(payload(raw.payload)?),
            "chat_message" => Self::ChatMessage(payload(raw.payload)?),
            "cursor_update" => Self::CursorUpdate(payload(raw.payload)?),
            "code_edit" => Self::CodeEdit(payload(raw.payload)?),
            "code_review" => Self::CodeReview(payload(raw.payload)?),
            "task_update" => Self::TaskUpdate(payload(raw.payload)?),
            "status_update" => Self::StatusUpdate(payload(raw.payload)?),
            "ping" => Self::Ping,
            other => return Err(CollabError::UnknownType(other.to_string())),
        };

        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> CollabResult<()> {
        match self {
            Self::CreateSession(p) => {
                require_non_empty("name", &p.name)?;
                require_non_empty("project_id", &p.project_id)
            }
            Self::ChatMessage(p) => require_non_empty("content", &p.content),
            Self::CursorUpdate(p) => {
                require_non_empty("file", &p.file)?;
                match p.selection {
                    Some(range) if range.start > range.end => Err(CollabError::InvalidPayload(
                        "selection start must not be after end".to_string(),
                    )),
                    _ => Ok(()),
                }
            }
            Self::CodeEdit(p) => {
                require_non_empty("file", &p.file)?;
                if p.range.start > p.range.end {
                    return Err(CollabError::InvalidPayload(
                        "range start must not be after end".to_string(),
                    ));
                }
                Ok(())
            }
            Self::CodeReview(p) => {
                require_non_empty("file", &p.file)?;
                require_non_empty("comment", &p.comment)
            }
            Self::TaskUpdate(p) => {
                require_non_empty("task_id", &p.task_id)?;
                require_non_empty("status", &p.status)
            }
            Self::JoinSession(_) | Self::LeaveSession(_) | Self::StatusUpdate(_) | Self::Ping => {
                Ok(())
            }
        }
    }

    /// Split a relayable event into its kind, session, and payload object.
    /// Returns `None` for control events handled by the relay itself.
    pub fn into_relayable(self) -> CollabResult<Option<Relayable>> {
        let (kind, session_id, payload) = match self {
            Self::ChatMessage(p) => (MessageKind::ChatMessage, p.session_id, to_value(&p)?),
            Self::CursorUpdate(p) => (MessageKind::CursorUpdate, p.session_id, to_value(&p)?),
            Self::CodeEdit(p) => (MessageKind::CodeEdit, p.session_id, to_value(&p)?),
            Self::CodeReview(p) => (MessageKind::CodeReview, p.session_id, to_value(&p)?),
            Self::TaskUpdate(p) => (MessageKind::TaskUpdate, p.session_id, to_value(&p)?),
            _ => return Ok(None),
        };

        Ok(Some(Relayable {
            kind,
            session_id,
            payload,
        }))
    }
}

fn to_value<T: Serialize>(payload: &T) -> CollabResult<Value> {
    serde_json::to_value(payload).map_err(|e| CollabError::InvalidPayload(e.to_string()))
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection acknowledged
    Connected { connection_id: Uuid, user: User },

    /// Session created by this connection
    SessionCreated { session: Session },

    /// This connection joined a session
    SessionJoined {
        session: Session,
        participants: Vec<User>,
    },

    /// This connection left a session
    SessionLeft { session_id: SessionId },

    /// Another user joined a session this connection is in
    UserJoined { session_id: SessionId, user: User },

    /// Another user left (or disconnected from) a session this connection is in
    UserLeft {
        session_id: SessionId,
        user_id: UserId,
    },

    ChatMessage(MessageRecord),
    CursorUpdate(MessageRecord),
    CodeEdit(MessageRecord),
    CodeReview(MessageRecord),
    TaskUpdate(MessageRecord),

    /// User presence status changed
    PresenceUpdate {
        user_id: UserId,
        display_name: String,
        status: PresenceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_project: Option<String>,
    },

    /// Presence of the organization's online users (sent on connect)
    PresenceBatch { users: Vec<User> },

    /// Heartbeat response
    Pong,

    /// Error message, delivered only to the connection that caused it
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Wrap a relayed record in the event matching its kind
    pub fn from_record(record: MessageRecord) -> Self {
        match record.kind {
            MessageKind::ChatMessage => Self::ChatMessage(record),
            MessageKind::CursorUpdate => Self::CursorUpdate(record),
            MessageKind::CodeEdit => Self::CodeEdit(record),
            MessageKind::CodeReview => Self::CodeReview(record),
            MessageKind::TaskUpdate => Self::TaskUpdate(record),
        }
    }

    pub fn presence(user: &User) -> Self {
        Self::PresenceUpdate {
            user_id: user.id,
            display_name: user.display_name.clone(),
            status: user.status,
            current_project: user.current_project.clone(),
        }
    }
}

impl From<CollabError> for ServerEvent {
    fn from(err: CollabError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn test_parse_chat_message() {
        let json = format!(
            r#"{{"type":"chat_message","payload":{{"session_id":"{}","content":"hello"}}}}"#,
            SESSION
        );
        match ClientEvent::parse(&json).unwrap() {
            ClientEvent::ChatMessage(p) => {
                assert_eq!(p.session_id.to_string(), SESSION);
                assert_eq!(p.content, "hello");
            }
            other => panic!("Expected ChatMessage, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_ping_without_payload() {
        assert_eq!(ClientEvent::parse(r#"{"type":"ping"}"#).unwrap(), ClientEvent::Ping);
    }

    #[test]
    fn test_parse_errors_have_distinct_codes() {
        let malformed = ClientEvent::parse("{not json").unwrap_err();
        assert_eq!(malformed.code(), "invalid_json");

        let no_type = ClientEvent::parse(r#"{"payload":{}}"#).unwrap_err();
        assert_eq!(no_type.code(), "invalid_json");

        let unknown = ClientEvent::parse(r#"{"type":"launch_rockets","payload":{}}"#).unwrap_err();
        assert_eq!(unknown, CollabError::UnknownType("launch_rockets".to_string()));

        let missing_session = ClientEvent::parse(r#"{"type":"chat_message","payload":{"content":"hi"}}"#)
            .unwrap_err();
        assert_eq!(missing_session.code(), "invalid_payload");
    }

    #[test]
    fn test_validation_rejects_empty_chat_and_inverted_range() {
        let empty = format!(
            r#"{{"type":"chat_message","payload":{{"session_id":"{}","content":"   "}}}}"#,
            SESSION
        );
        assert_eq!(ClientEvent::parse(&empty).unwrap_err().code(), "invalid_payload");

        let inverted = format!(
            r#"{{"type":"code_edit","payload":{{"session_id":"{}","file":"a.rs",
                "range":{{"start":{{"line":4,"column":0}},"end":{{"line":2,"column":0}}}},"text":"x"}}}}"#,
            SESSION
        );
        assert_eq!(ClientEvent::parse(&inverted).unwrap_err().code(), "invalid_payload");
    }

    #[test]
    fn test_create_session_defaults() {
        let json = r#"{"type":"create_session","payload":{"name":"standup-1","project_id":"p1"}}"#;
        match ClientEvent::parse(json).unwrap() {
            ClientEvent::CreateSession(p) => {
                assert_eq!(p.session_type, SessionType::Coding);
                assert!(p.state.is_empty());
            }
            other => panic!("Expected CreateSession, got {:?}", other),
        }
    }

    #[test]
    fn test_relayable_payload_omits_session_id() {
        let json = format!(
            r#"{{"type":"chat_message","payload":{{"session_id":"{}","content":"hi"}}}}"#,
            SESSION
        );
        let relayable = ClientEvent::parse(&json)
            .unwrap()
            .into_relayable()
            .unwrap()
            .unwrap();
        assert_eq!(relayable.kind, MessageKind::ChatMessage);
        assert_eq!(relayable.payload, serde_json::json!({"content": "hi"}));

        assert!(ClientEvent::Ping.into_relayable().unwrap().is_none());
    }

    #[test]
    fn test_server_event_serialization() {
        let json = serde_json::to_string(&ServerEvent::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);

        let json = serde_json::to_value(ServerEvent::from(CollabError::CrossOrganization)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["payload"]["code"], "cross_organization");
    }
}
