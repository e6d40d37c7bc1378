//! Chat history storage seam.
//!
//! # Data Flow
//! ```text
//! MessageRouter
//!     → PersistenceGate (bounded in-flight writes)
//!     → MessageStore::persist_message
//!
//! HTTP presence / history queries
//!     → MessageStore::last_messages / history / mark_read
//! ```
//!
//! # Design Decisions
//! - The hub only depends on the trait; the relational store of the full
//!   platform plugs in here
//! - `memory.rs` is the in-process store used by the binary and the tests
//! - Backpressure on writes is independent of connection count

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

/// Who wrote a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Visitor,
    Agent,
}

/// One chat message as written to history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub visitor_id: String,
    pub agent_id: String,
    pub role: SenderRole,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Errors from the storage collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or refusing writes.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The write was rejected (e.g. empty content).
    #[error("message rejected: {0}")]
    Rejected(String),
}

/// Storage for chat history and read state.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to the visitor's history.
    async fn persist_message(&self, record: MessageRecord) -> Result<(), StoreError>;

    /// Mark every visitor-sent message in the conversation as read.
    async fn mark_read(&self, visitor_id: &str) -> Result<(), StoreError>;

    /// The most recent message of each listed visitor that has any history.
    async fn last_messages(&self, visitor_ids: &[String]) -> Result<Vec<MessageRecord>, StoreError>;

    /// Full stored history for one visitor, oldest first.
    async fn history(&self, visitor_id: &str) -> Result<Vec<MessageRecord>, StoreError>;
}

/// Bounds how many writes may be in flight to the store at once.
///
/// Callers wait for a permit, so a slow store slows writers down instead of
/// piling up unbounded work.
#[derive(Debug, Clone)]
pub struct PersistenceGate {
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl PersistenceGate {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Persist `record` once a slot is free.
    pub async fn persist(&self, store: &dyn MessageStore, record: MessageRecord) -> Result<(), StoreError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StoreError::Unavailable("persistence gate closed".into()))?;
        store.persist_message(record).await
    }

    /// Writes currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Store that records the highest number of concurrent writes it saw.
    #[derive(Default)]
    struct SlowStore {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MessageStore for SlowStore {
        async fn persist_message(&self, _record: MessageRecord) -> Result<(), StoreError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
        async fn mark_read(&self, _visitor_id: &str) -> Result<(), StoreError> {
            Ok(())
        }
        async fn last_messages(&self, _ids: &[String]) -> Result<Vec<MessageRecord>, StoreError> {
            Ok(Vec::new())
        }
        async fn history(&self, _visitor_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn record(n: usize) -> MessageRecord {
        MessageRecord {
            visitor_id: format!("v{n}"),
            agent_id: "kefu1".into(),
            role: SenderRole::Visitor,
            content: "hi".into(),
            sent_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn gate_limits_concurrent_writes() {
        let store = Arc::new(SlowStore::default());
        let gate = PersistenceGate::new(2);

        let tasks: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                let gate = gate.clone();
                tokio::spawn(async move { gate.persist(store.as_ref(), record(n)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(store.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gate.in_flight(), 0);
    }
}
