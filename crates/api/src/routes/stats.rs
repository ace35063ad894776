//! Relay statistics

use axum::{extract::State, Json};
use serde::Serialize;

use crate::{state::AppState, websocket::CollabStats};

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub relay: CollabStats,
    pub message_store: &'static str,
    /// Records held by the in-memory log; omitted for Postgres
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_messages: Option<usize>,
}

/// Current connection, session, relay, and message log counters
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        relay: state.collab.get_stats().await,
        message_store: state.store.backend(),
        stored_messages: state.store.stored_count().await,
    })
}
