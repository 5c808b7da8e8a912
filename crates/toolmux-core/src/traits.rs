//! Core traits for tool sessions, model backends and history storage.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    ServerSpec,
    message::{Message, ModelReply},
    tool::{ToolCallOutput, ToolDefinition, ToolDescriptor},
};

/// Tool session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Server error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("{operation} timed out after {secs}s", secs = .after.as_secs())]
    Timeout {
        operation: String,
        after: Duration,
    },
    #[error("Server disconnected")]
    Disconnected,
    #[error("Session not initialized")]
    NotInitialized,
}

/// A live connection to one tool server.
///
/// Implementations must tolerate concurrent `list_tools`/`call_tool` calls;
/// the tool-call loop dispatches one round's calls together.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Complete the handshake; the session is unusable before this succeeds.
    async fn initialize(&self) -> Result<(), SessionError>;

    /// Fetch the server's current tool list.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError>;

    /// Invoke one tool.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallOutput, SessionError>;

    /// Tear the session down and release the server process.
    async fn shutdown(&self) -> Result<(), SessionError>;
}

/// Opens sessions from launch specs.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Start the server process. The returned session is not yet initialized.
    async fn connect(&self, spec: &ServerSpec) -> Result<Arc<dyn ToolSession>, SessionError>;
}

/// Model backend error.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed response: {0}")]
    Decode(String),
}

/// Language model able to request tool calls.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Run one completion over the full conversation.
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, BackendError>;
}

#[async_trait]
impl<B: ModelBackend + ?Sized> ModelBackend for Arc<B> {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, BackendError> {
        (**self).chat(messages, tools).await
    }
}

/// History storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No stored history")]
    NotFound,
    #[error("Stored history is corrupt: {0}")]
    Corrupt(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for conversation history backends.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load the persisted message sequence.
    async fn load(&self) -> Result<Vec<Message>, StorageError>;

    /// Replace the persisted message sequence.
    async fn save(&self, messages: &[Message]) -> Result<(), StorageError>;
}
