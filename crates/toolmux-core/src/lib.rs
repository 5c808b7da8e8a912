//! Core abstractions for multi-server tool orchestration.
//!
//! This crate provides the shared building blocks:
//! - `ServerSpec` - How to launch one tool server
//! - `Message` / `Conversation` - Role-tagged conversation state
//! - `ToolDescriptor`, `ToolDefinition`, `ToolCallOutput` - Tool-facing data
//! - Session, model backend and history storage traits

pub mod context;
pub mod message;
pub mod tool;
pub mod traits;

pub use context::ServerSpec;
pub use message::{Conversation, Message, ModelReply, Role, ToolCallRequest};
pub use tool::{ContentBlock, ToolCallOutput, ToolDefinition, ToolDescriptor};
pub use traits::{
    BackendError, HistoryStore, ModelBackend, SessionConnector, SessionError, StorageError,
    ToolSession,
};
