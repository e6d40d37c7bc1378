//! In-process message store backed by a DashMap.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::store::{MessageRecord, MessageStore, SenderRole, StoreError};

#[derive(Debug, Clone)]
struct StoredMessage {
    record: MessageRecord,
    read: bool,
}

/// Keeps the last `history_limit` messages per visitor in memory.
#[derive(Debug)]
pub struct InMemoryMessageStore {
    conversations: DashMap<String, VecDeque<StoredMessage>>,
    history_limit: usize,
}

impl InMemoryMessageStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            conversations: DashMap::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Stored messages for one visitor, oldest first.
    pub fn messages_for(&self, visitor_id: &str) -> Vec<MessageRecord> {
        self.conversations
            .get(visitor_id)
            .map(|c| c.iter().map(|m| m.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Visitor-sent messages not yet read by an agent.
    pub fn unread_count(&self, visitor_id: &str) -> usize {
        self.conversations
            .get(visitor_id)
            .map(|c| {
                c.iter()
                    .filter(|m| !m.read && m.record.role == SenderRole::Visitor)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn persist_message(&self, record: MessageRecord) -> Result<(), StoreError> {
        if record.content.trim().is_empty() {
            return Err(StoreError::Rejected("empty content".into()));
        }
        let mut conversation = self
            .conversations
            .entry(record.visitor_id.clone())
            .or_default();
        conversation.push_back(StoredMessage { record, read: false });
        while conversation.len() > self.history_limit {
            conversation.pop_front();
        }
        Ok(())
    }

    async fn mark_read(&self, visitor_id: &str) -> Result<(), StoreError> {
        if let Some(mut conversation) = self.conversations.get_mut(visitor_id) {
            for message in conversation.iter_mut() {
                message.read = true;
            }
        }
        Ok(())
    }

    async fn last_messages(&self, visitor_ids: &[String]) -> Result<Vec<MessageRecord>, StoreError> {
        Ok(visitor_ids
            .iter()
            .filter_map(|id| {
                self.conversations
                    .get(id)
                    .and_then(|c| c.back().map(|m| m.record.clone()))
            })
            .collect())
    }

    async fn history(&self, visitor_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        Ok(self.messages_for(visitor_id))
    }
}
