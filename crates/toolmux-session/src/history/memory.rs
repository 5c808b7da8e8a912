//! In-memory history store.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use toolmux_core::{HistoryStore, Message, StorageError};

/// In-memory history.
///
/// Clones share the same buffer. Data is lost on exit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    messages: Arc<RwLock<Option<Vec<Message>>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Arc::new(RwLock::new(Some(messages))),
        }
    }

    /// Currently stored messages; empty if nothing was saved.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages
            .read()
            .map(|guard| guard.clone().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn load(&self) -> Result<Vec<Message>, StorageError> {
        self.messages
            .read()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?
            .clone()
            .ok_or(StorageError::NotFound)
    }

    async fn save(&self, messages: &[Message]) -> Result<(), StorageError> {
        *self
            .messages
            .write()
            .map_err(|e| StorageError::Corrupt(e.to_string()))? = Some(messages.to_vec());
        Ok(())
    }
}
