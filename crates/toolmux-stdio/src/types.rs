//! JSON-RPC 2.0 and MCP wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolmux_core::{ContentBlock, ToolCallOutput, ToolDescriptor};

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision requested during `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

/// JSON-RPC method-not-found code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// A request (has an `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Value::from(id),
            method: method.into(),
            params,
        }
    }
}

/// A notification (no `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A response to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Extract the result, or the error object.
    ///
    /// # Errors
    /// Returns the server's error object when present.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Anything a server may write on its stdout.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
    /// Server-initiated request expecting an answer.
    Request(JsonRpcRequest),
}

impl IncomingMessage {
    /// Classify one line: `method` + `id` is a request, `method` alone a
    /// notification, everything else a response.
    ///
    /// # Errors
    /// Returns error if the line is not valid JSON-RPC.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(line)?;
        let has_method = raw.get("method").is_some();
        let has_id = raw.get("id").is_some_and(|id| !id.is_null());

        Ok(match (has_method, has_id) {
            (true, true) => Self::Request(serde_json::from_value(raw)?),
            (true, false) => Self::Notification(serde_json::from_value(raw)?),
            _ => Self::Response(serde_json::from_value(raw)?),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ImplementationInfo,
}

impl InitializeParams {
    #[must_use]
    pub fn for_client(name: &str, version: &str) -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(serde_json::Map::new()),
            client_info: ImplementationInfo {
                name: name.to_string(),
                version: version.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: ImplementationInfo,
}

/// One entry of `tools/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

impl From<ToolEntry> for ToolDescriptor {
    fn from(entry: ToolEntry) -> Self {
        Self::new(entry.name, entry.description)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsListResult {
    pub tools: Vec<ToolEntry>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl From<CallToolResult> for ToolCallOutput {
    fn from(result: CallToolResult) -> Self {
        Self {
            structured: result.structured_content.filter(|v| !v.is_null()),
            content: result.content.into_iter().map(ContentBlock::from_value).collect(),
            is_error: result.is_error,
        }
    }
}
