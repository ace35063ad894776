//! Read-only view of the caller's organization's sessions

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use huddle_shared::SessionId;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
    websocket::session::Session,
};

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<Session>,
    pub total: usize,
}

/// List sessions of the caller's organization, newest first
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Json<SessionsResponse> {
    let sessions = state.collab.sessions.list_for_org(&auth_user.0.org_id).await;

    Json(SessionsResponse {
        total: sessions.len(),
        sessions,
    })
}

/// Get one session. Sessions of other organizations are reported as missing.
pub async fn get_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Session>> {
    let session = state
        .collab
        .sessions
        .get(&SessionId::from(session_id))
        .await
        .filter(|s| s.org_id == auth_user.0.org_id)
        .ok_or(ApiError::NotFound)?;

    Ok(Json(session))
}
