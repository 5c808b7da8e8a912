//! Session orchestration and conversation history for toolmux.
//!
//! Provides:
//! - `SessionRegistry` - One live session per configured tool server
//! - `CatalogAggregator` - Unified per-server tool listing
//! - `ToolInvoker` - Dispatch a call to the right session and flatten the result
//! - `HistoryManager` - Trim and persist the conversation (JSON file, memory)

pub mod catalog;
pub mod history;
pub mod invoker;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{Catalog, CatalogAggregator, CatalogError};
pub use history::{HistoryManager, JsonFileStore, MemoryStore, trim};
pub use invoker::{InvokeError, ToolInvoker, ToolOutcome};
pub use registry::{OpenFailure, RegistryError, SessionRegistry};
