//! Stdio transport for MCP tool servers.
//!
//! Provides:
//! - `StdioSession` - One spawned server speaking JSON-RPC over its pipes
//! - `StdioConnector` - `SessionConnector` that opens stdio sessions
//! - `ProtocolPeer` - Request/response multiplexing over a pipe pair

pub mod command;
pub mod protocol;
pub mod resolve;
pub mod session;
pub mod types;

pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use protocol::{ProtocolError, ProtocolPeer};
pub use session::{StdioConnector, StdioSession};
