//! Conversation history: bounding and persistence.

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use toolmux_core::{Conversation, HistoryStore, Message, StorageError};

/// Keep the `max_entries` most recent non-system messages.
///
/// A leading system message is always retained in front. Idempotent.
#[must_use]
pub fn trim(mut messages: Vec<Message>, max_entries: usize) -> Vec<Message> {
    let offset = usize::from(messages.first().is_some_and(Message::is_system));
    let core = messages.len() - offset;
    if core <= max_entries {
        return messages;
    }
    messages.drain(offset..offset + (core - max_entries));
    messages
}

/// Bounds and persists one conversation through a [`HistoryStore`].
///
/// Storage failures never reach the caller: a failed load yields an empty
/// history and a failed save is logged and dropped.
pub struct HistoryManager {
    store: Box<dyn HistoryStore>,
    max_entries: usize,
}

impl HistoryManager {
    #[must_use]
    pub fn new(store: impl HistoryStore + 'static, max_entries: usize) -> Self {
        Self {
            store: Box::new(store),
            max_entries,
        }
    }

    #[must_use]
    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub async fn load_or_empty(&self) -> Vec<Message> {
        match self.store.load().await {
            Ok(messages) => {
                tracing::debug!(count = messages.len(), "Loaded conversation history");
                messages
            }
            Err(StorageError::NotFound) => {
                tracing::debug!("No conversation history yet");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable conversation history: {e}");
                Vec::new()
            }
        }
    }

    /// Persisted conversation, or a fresh one seeded with `system_prompt`.
    pub async fn load_conversation(&self, system_prompt: &str) -> Conversation {
        Conversation::restore(self.load_or_empty().await, system_prompt)
    }

    pub async fn save_best_effort(&self, messages: &[Message]) {
        if let Err(e) = self.store.save(messages).await {
            tracing::warn!("Failed to save conversation history: {e}");
        }
    }

    /// Trim `conversation` in place and persist it.
    pub async fn commit(&self, conversation: &mut Conversation) {
        let trimmed = trim(std::mem::take(conversation).into_messages(), self.max_entries);
        *conversation = Conversation::from(trimmed);
        self.save_best_effort(conversation.messages()).await;
    }
}
