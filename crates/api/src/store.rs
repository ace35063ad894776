//! Message log
//!
//! Relayed records reach the store through an `mpsc` channel so that the relay
//! never waits on, or fails because of, persistence.

use std::collections::VecDeque;
use std::sync::Arc;

use huddle_shared::{MessageRecord, SessionId};
use sqlx::PgPool;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Sending half handed to the relay
pub type RecordSink = mpsc::UnboundedSender<MessageRecord>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Where relayed records end up
pub enum MessageStore {
    /// Bounded in-memory log; oldest records are dropped at capacity
    Memory(MemoryLog),
    /// `collab_messages` table
    Postgres(PgPool),
}

impl MessageStore {
    pub fn memory(capacity: usize) -> Self {
        Self::Memory(MemoryLog::new(capacity))
    }

    pub async fn append(&self, record: &MessageRecord) -> Result<(), StoreError> {
        match self {
            Self::Memory(log) => {
                log.push(record.clone()).await;
                Ok(())
            }
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO collab_messages (id, session_id, author_id, author_name, kind, payload, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(record.id.0)
                .bind(record.session_id.0)
                .bind(record.author_id.0)
                .bind(&record.author_name)
                .bind(record.kind)
                .bind(&record.payload)
                .bind(record.timestamp)
                .execute(pool)
                .await?;
                Ok(())
            }
        }
    }

    /// Records currently held by the in-memory log; `None` for Postgres
    pub async fn stored_count(&self) -> Option<usize> {
        match self {
            Self::Memory(log) => Some(log.len().await),
            Self::Postgres(_) => None,
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Postgres(_) => "postgres",
        }
    }
}

pub struct MemoryLog {
    records: RwLock<VecDeque<MessageRecord>>,
    capacity: usize,
}

impl MemoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    async fn push(&self, record: MessageRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.write().await;
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Records of one session, oldest first
    #[cfg(test)]
    pub async fn for_session(&self, session_id: &SessionId) -> Vec<MessageRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .filter(|r| r.session_id == *session_id)
            .cloned()
            .collect()
    }
}

/// Drain the record channel into the store until every sender is dropped.
/// Store failures are logged and the record is dropped.
pub fn spawn_store_writer(
    store: Arc<MessageStore>,
    mut records: mpsc::UnboundedReceiver<MessageRecord>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(backend = store.backend(), "Message store writer started");

        while let Some(record) = records.recv().await {
            if let Err(e) = store.append(&record).await {
                tracing::error!(
                    error = %e,
                    message_id = %record.id,
                    session_id = %record.session_id,
                    "Failed to persist relayed message"
                );
            }
        }

        tracing::info!("Message store writer stopped");
    })
}
