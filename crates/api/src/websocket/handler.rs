//! WebSocket handler for Axum
//!
//! Handles the upgrade, credential check, socket read/write loops, and
//! disconnect cleanup.

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::Identity;
use crate::state::AppState;

use super::{
    connection::{close_code, Connection, ConnectionState, Outbound},
    state::CollabState,
};

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// Why an upgrade was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthFailure {
    MissingCredential,
    InvalidCredential,
}

impl AuthFailure {
    fn close_frame(self) -> CloseFrame<'static> {
        let (code, reason) = match self {
            Self::MissingCredential => (close_code::MISSING_CREDENTIAL, "authentication required"),
            Self::InvalidCredential => (close_code::INVALID_CREDENTIAL, "invalid credential"),
        };
        CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        }
    }
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
/// Authenticates via the `token` query parameter. Rejected sockets are closed
/// with a close code that tells a missing credential from an invalid one.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
) -> Response {
    let auth = match params.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        None => {
            tracing::warn!("WebSocket auth failed: no credential");
            Err(AuthFailure::MissingCredential)
        }
        Some(token) => app_state.jwt.authenticate(token).map_err(|e| {
            tracing::warn!(error = %e, "WebSocket auth failed: invalid credential");
            AuthFailure::InvalidCredential
        }),
    };

    let collab = app_state.collab.clone();
    ws.on_upgrade(move |socket| async move {
        match auth {
            Ok(identity) => handle_socket(socket, identity, collab).await,
            Err(failure) => reject_socket(socket, failure).await,
        }
    })
}

/// Connecting -> Closed: no registry state is created
async fn reject_socket(mut socket: WebSocket, failure: AuthFailure) {
    tracing::debug!(
        state = ?ConnectionState::Connecting,
        failure = ?failure,
        "Closing unauthenticated socket"
    );
    let _ = socket.send(Message::Close(Some(failure.close_frame()))).await;
}

/// Handle an authenticated WebSocket connection
async fn handle_socket(socket: WebSocket, identity: Identity, collab: CollabState) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for frames to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let conn = collab.relay.connect(Connection::new(identity, tx)).await;
    let connection_id = conn.connection_id;
    let user_id = conn.user_id();

    // Spawn task to write frames to the client
    let writer_conn = Arc::clone(&conn);
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                Outbound::Event(event) => match serde_json::to_string(&event) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                        continue;
                    }
                },
                Outbound::Ping => Message::Ping(Vec::new()),
                Outbound::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: Cow::Borrowed(reason),
                        })))
                        .await;
                    break;
                }
            };

            if sender.send(message).await.is_err() {
                // Stop receiving broadcasts; cleanup happens in the read loop or heartbeat
                writer_conn.begin_closing();
                break;
            }
        }
    });

    // Handle incoming messages in arrival order
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket read error");
                break;
            }
        };

        conn.record_activity();
        match msg {
            Message::Text(text) => collab.relay.handle_text(&conn, &text).await,
            Message::Close(_) => {
                tracing::info!(connection_id = %connection_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum answers pings automatically; pongs only count as activity
            }
            Message::Binary(_) => {
                tracing::debug!(connection_id = %connection_id, "Ignoring binary frame");
            }
        }

        // Reaped by the heartbeat or superseded by a newer connection
        if !conn.is_open() {
            tracing::debug!(connection_id = %connection_id, state = ?conn.state(), "Connection no longer open, stopping reader");
            break;
        }
    }

    // Cleanup on disconnect
    tracing::info!(connection_id = %connection_id, user_id = %user_id, "WebSocket connection closing");
    collab.relay.disconnect(&conn).await;

    send_task.abort();
}
