#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the collaboration relay
//!
//! These tests boot the full router on an ephemeral port and drive it with
//! real WebSocket clients.
//!
//! ## Test Coverage
//! - Credential rejection close codes
//! - Create / join / chat round trip between two clients
//! - Sender-only error envelopes
//! - Health and session HTTP routes
//!
//! ## Running Tests
//! ```bash
//! cargo test -p huddle-api --test websocket
//! ```

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, StatusCode},
    Router,
};
use futures::{SinkExt, StreamExt};
use huddle_api::{
    config::LogFormat, create_router, websocket::connection::close_code, AppState, Config,
    MessageStore,
};
use huddle_shared::{OrgId, UserId};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "integration-test-secret-at-least-32-chars";

// ============================================================================
// Test Utilities
// ============================================================================

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".to_string(),
        cors_allowed_origins: Vec::new(),
        log_format: LogFormat::Pretty,
        database_url: None,
        database_max_connections: 1,
        jwt_secret: SECRET.to_string(),
        jwt_expiry_hours: 1,
        heartbeat_interval_secs: 30,
        recent_edits_capacity: 10,
        message_log_capacity: 100,
        max_message_bytes: 64 * 1024,
    }
}

fn test_app() -> (Router, AppState) {
    let state = AppState::new(test_config(), MessageStore::memory(100), None);
    (create_router(state.clone()), state)
}

/// Serve the router on a free port and return its address
async fn start_test_server() -> (String, AppState) {
    let (app, state) = test_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr.to_string(), state)
}

fn token(state: &AppState, org: OrgId, name: &str) -> String {
    state.jwt.generate_token(UserId::new(), org, name).unwrap()
}

async fn connect(addr: &str, token: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/ws?token={}", addr, token))
        .await
        .expect("WebSocket connect failed");
    ws
}

/// Next text frame as JSON, skipping control frames
async fn next_event(ws: &mut Client) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for event")
            .expect("Socket closed")
            .expect("Socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Next event of the given type, skipping presence and other noise
async fn next_of_type(ws: &mut Client, kind: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["type"] == kind {
            return event;
        }
    }
}

async fn send(ws: &mut Client, event: Value) {
    ws.send(Message::Text(event.to_string())).await.unwrap();
}

async fn close_code_of(ws: &mut Client) -> u16 {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for close")
            .expect("Socket ended without close frame")
            .expect("Socket error");
        if let Message::Close(Some(frame)) = frame {
            return u16::from(frame.code);
        }
    }
}

// ============================================================================
// WebSocket
// ============================================================================

#[tokio::test]
async fn test_missing_credential_closes_with_4001() {
    let (addr, state) = start_test_server().await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    assert_eq!(close_code_of(&mut ws).await, close_code::MISSING_CREDENTIAL);
    assert_eq!(state.collab.connections.count().await, 0);
}

#[tokio::test]
async fn test_invalid_credential_closes_with_4003() {
    let (addr, state) = start_test_server().await;

    let mut ws = connect(&addr, "not-a-jwt").await;
    assert_eq!(close_code_of(&mut ws).await, close_code::INVALID_CREDENTIAL);

    // Signed with a different secret
    let other = huddle_api::auth::JwtManager::new("some-other-secret-that-is-long-enough", 1)
        .generate_token(UserId::new(), OrgId::new(), "Mallory")
        .unwrap();
    let mut ws = connect(&addr, &other).await;
    assert_eq!(close_code_of(&mut ws).await, close_code::INVALID_CREDENTIAL);

    assert_eq!(state.collab.connections.count().await, 0);
}

#[tokio::test]
async fn test_create_join_chat_round_trip() {
    let (addr, state) = start_test_server().await;
    let org = OrgId::new();

    let mut ada = connect(&addr, &token(&state, org, "Ada")).await;
    let connected = next_event(&mut ada).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["payload"]["user"]["display_name"], "Ada");

    send(
        &mut ada,
        json!({ "type": "create_session", "payload": { "name": "standup-1", "project_id": "huddle" } }),
    )
    .await;
    let created = next_of_type(&mut ada, "session_created").await;
    let session_id = created["payload"]["session"]["id"].as_str().unwrap().to_string();

    let mut bob = connect(&addr, &token(&state, org, "Bob")).await;
    next_of_type(&mut bob, "connected").await;
    send(
        &mut bob,
        json!({ "type": "join_session", "payload": { "session_id": session_id } }),
    )
    .await;
    let joined = next_of_type(&mut bob, "session_joined").await;
    assert_eq!(joined["payload"]["participants"].as_array().unwrap().len(), 2);

    let user_joined = next_of_type(&mut ada, "user_joined").await;
    assert_eq!(user_joined["payload"]["user"]["display_name"], "Bob");

    send(
        &mut ada,
        json!({ "type": "chat_message", "payload": { "session_id": session_id, "content": "hello, bob" } }),
    )
    .await;
    let chat = next_of_type(&mut bob, "chat_message").await;
    assert_eq!(chat["payload"]["author_name"], "Ada");
    assert_eq!(chat["payload"]["session_id"], session_id.as_str());
    assert_eq!(chat["payload"]["payload"]["content"], "hello, bob");

    let stats = state.collab.get_stats().await;
    assert_eq!(stats.active_connections, 2);
    assert_eq!(stats.relayed_messages, 1);
}

#[tokio::test]
async fn test_malformed_message_errors_sender_only() {
    let (addr, state) = start_test_server().await;
    let org = OrgId::new();

    let mut ada = connect(&addr, &token(&state, org, "Ada")).await;
    next_of_type(&mut ada, "connected").await;
    let mut bob = connect(&addr, &token(&state, org, "Bob")).await;
    next_of_type(&mut bob, "connected").await;
    next_of_type(&mut ada, "presence_update").await;

    ada.send(Message::Text("{not json".to_string())).await.unwrap();
    let error = next_of_type(&mut ada, "error").await;
    assert_eq!(error["payload"]["code"], "invalid_json");

    send(&mut ada, json!({ "type": "teleport", "payload": {} })).await;
    let error = next_of_type(&mut ada, "error").await;
    assert_eq!(error["payload"]["code"], "unknown_type");

    // The socket is still usable afterwards
    send(&mut ada, json!({ "type": "ping" })).await;
    next_of_type(&mut ada, "pong").await;

    // Bob never sees Ada's errors
    send(&mut bob, json!({ "type": "ping" })).await;
    loop {
        let event = next_event(&mut bob).await;
        assert_ne!(event["type"], "error");
        if event["type"] == "pong" {
            break;
        }
    }
}

#[tokio::test]
async fn test_disconnect_notifies_session_members() {
    let (addr, state) = start_test_server().await;
    let org = OrgId::new();

    let mut ada = connect(&addr, &token(&state, org, "Ada")).await;
    send(
        &mut ada,
        json!({ "type": "create_session", "payload": { "name": "review", "project_id": "huddle", "session_type": "review" } }),
    )
    .await;
    let created = next_of_type(&mut ada, "session_created").await;
    let session_id = created["payload"]["session"]["id"].clone();

    let mut bob = connect(&addr, &token(&state, org, "Bob")).await;
    send(&mut bob, json!({ "type": "join_session", "payload": { "session_id": session_id } })).await;
    next_of_type(&mut bob, "session_joined").await;
    let bob_id = next_of_type(&mut ada, "user_joined").await["payload"]["user"]["id"].clone();

    bob.close(None).await.unwrap();

    let left = next_of_type(&mut ada, "user_left").await;
    assert_eq!(left["payload"]["user_id"], bob_id);
    assert_eq!(left["payload"]["session_id"], session_id);

    let offline = next_of_type(&mut ada, "presence_update").await;
    assert_eq!(offline["payload"]["status"], "offline");
}

// ============================================================================
// HTTP
// ============================================================================

#[tokio::test]
async fn test_health_without_database() {
    let (app, _state) = test_app();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["database"], "disabled");
    assert_eq!(health["message_store"], "memory");

    for uri in ["/health/live", "/health/ready"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
    }
}

#[tokio::test]
async fn test_sessions_require_bearer_token() {
    let (app, _state) = test_app();

    let response = app
        .oneshot(Request::builder().uri("/api/v1/sessions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sessions_are_scoped_to_organization() {
    let (addr, state) = start_test_server().await;
    let app = create_router(state.clone());
    let org = OrgId::new();

    let mut ada = connect(&addr, &token(&state, org, "Ada")).await;
    send(
        &mut ada,
        json!({ "type": "create_session", "payload": { "name": "planning", "project_id": "huddle" } }),
    )
    .await;
    let created = next_of_type(&mut ada, "session_created").await;
    let session_id = created["payload"]["session"]["id"].as_str().unwrap().to_string();

    let get = |uri: String, bearer: String| {
        Request::builder()
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {}", bearer))
            .body(Body::empty())
            .unwrap()
    };

    let own = token(&state, org, "Bob");
    let response = app
        .clone()
        .oneshot(get("/api/v1/sessions".to_string(), own.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let list: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(list["total"], 1);
    assert_eq!(list["sessions"][0]["name"], "planning");

    let response = app
        .clone()
        .oneshot(get(format!("/api/v1/sessions/{}", session_id), own))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let foreign = token(&state, OrgId::new(), "Eve");
    let response = app
        .clone()
        .oneshot(get(format!("/api/v1/sessions/{}", session_id), foreign.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get("/api/v1/sessions".to_string(), foreign))
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let list: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn test_stats_report_relay_and_message_log() {
    let (addr, state) = start_test_server().await;
    let app = create_router(state.clone());
    let org = OrgId::new();

    let stats = |app: Router| async move {
        let response = app
            .oneshot(Request::builder().uri("/api/v1/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice::<Value>(&body).unwrap()
    };

    let initial = stats(app.clone()).await;
    assert_eq!(initial["message_store"], "memory");
    assert_eq!(initial["stored_messages"], 0);
    assert_eq!(initial["active_connections"], 0);

    let mut ada = connect(&addr, &token(&state, org, "Ada")).await;
    send(
        &mut ada,
        json!({ "type": "create_session", "payload": { "name": "standup-1", "project_id": "huddle" } }),
    )
    .await;
    let created = next_of_type(&mut ada, "session_created").await;
    let session_id = created["payload"]["session"]["id"].clone();
    send(
        &mut ada,
        json!({ "type": "chat_message", "payload": { "session_id": session_id, "content": "logged" } }),
    )
    .await;

    // The store writer runs in the background
    let mut latest = Value::Null;
    for _ in 0..40 {
        latest = stats(app.clone()).await;
        if latest["stored_messages"] == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(latest["stored_messages"], 1);
    assert_eq!(latest["relayed_messages"], 1);
    assert_eq!(latest["active_connections"], 1);
    assert_eq!(latest["total_sessions"], 1);
}
