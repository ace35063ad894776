//! Error types for Huddle

use thiserror::Error;

use crate::types::SessionId;

/// Failures of collaboration operations (session membership and relay)
///
/// Each variant maps to a stable machine-readable code that is sent back to
/// the originating connection in an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollabError {
    #[error("Malformed JSON: {0}")]
    InvalidJson(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Not a member of session {0}")]
    NotAMember(SessionId),

    #[error("Session belongs to another organization")]
    CrossOrganization,
}

impl CollabError {
    /// Machine-readable error code for the wire
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::UnknownType(_) => "unknown_type",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::SessionNotFound(_) => "session_not_found",
            Self::NotAMember(_) => "not_a_member",
            Self::CrossOrganization => "cross_organization",
        }
    }
}

pub type CollabResult<T> = Result<T, CollabError>;
