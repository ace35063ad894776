//! Application state shared across handlers

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::{
    auth::JwtManager,
    config::Config,
    store::{spawn_store_writer, MessageStore},
    websocket::CollabState,
};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwt: JwtManager,
    pub collab: CollabState,
    pub store: Arc<MessageStore>,
    /// Present only when `DATABASE_URL` is configured
    pub db: Option<PgPool>,
}

impl AppState {
    /// Build the state and start the message store writer.
    /// Must be called from within a Tokio runtime.
    pub fn new(config: Config, store: MessageStore, db: Option<PgPool>) -> Self {
        let store = Arc::new(store);
        let (sink, records) = mpsc::unbounded_channel();
        spawn_store_writer(Arc::clone(&store), records);

        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        let collab = CollabState::new(
            sink,
            config.recent_edits_capacity,
            config.max_message_bytes,
        );

        Self {
            config: Arc::new(config),
            jwt,
            collab,
            store,
            db,
        }
    }
}
