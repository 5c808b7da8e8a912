//! Tool-call loop between a language model and the tool servers.
//!
//! Provides:
//! - `ToolLoop` - Runs one user turn through as many tool-call rounds as needed
//! - The two generic tool definitions advertised to the model
//! - `OllamaBackend` - `/api/chat` model backend

pub mod controller;
pub mod ollama;
pub mod schema;

pub use controller::{AgentError, DEFAULT_MAX_ROUNDS, ToolLoop};
pub use ollama::{OllamaBackend, OllamaConfig};
pub use schema::{CALL_TOOL, LIST_TOOLS, default_system_prompt, tool_definitions};
