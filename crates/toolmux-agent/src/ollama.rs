//! Ollama `/api/chat` backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use toolmux_core::{
    BackendError, Message, ModelBackend, ModelReply, Role, ToolCallRequest, ToolDefinition,
};

/// Connection and sampling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OllamaConfig {
    /// Base URL of the Ollama server.
    pub url: String,
    pub model: String,
    pub temperature: f32,
    /// Maximum tokens to generate (`num_predict`).
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            temperature: 0.2,
            max_tokens: None,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Non-streaming chat against a local or remote Ollama server.
pub struct OllamaBackend {
    client: reqwest::Client,
    endpoint: String,
    config: OllamaConfig,
}

impl OllamaBackend {
    /// Build a backend.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(config: OllamaConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", config.url.trim_end_matches('/')),
            config,
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request<'a>(&'a self, messages: &[Message], tools: &'a [ToolDefinition]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: tools.iter().map(WireTool::from).collect(),
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        }
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, BackendError> {
        let body = self.request(messages, tools);
        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            "POST {}",
            self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(parsed.message.into())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str(),
            content: message.content.clone(),
            tool_name: message
                .name
                .clone()
                .filter(|_| message.role == Role::Tool),
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    function: WireFunction {
                        name: call.name.clone(),
                        arguments: Value::Object(call.arguments.clone()),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

impl<'a> From<&'a ToolDefinition> for WireTool<'a> {
    fn from(function: &'a ToolDefinition) -> Self {
        Self {
            kind: "function",
            function,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// An object, or a JSON-encoded object from some models.
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

impl From<ResponseMessage> for ModelReply {
    fn from(message: ResponseMessage) -> Self {
        Self {
            content: message.content.filter(|s| !s.is_empty()),
            tool_calls: message
                .tool_calls
                .into_iter()
                .map(|call| {
                    let arguments = argument_map(&call.function.name, call.function.arguments);
                    ToolCallRequest::new(call.function.name, arguments)
                })
                .collect(),
        }
    }
}

fn argument_map(function: &str, arguments: Value) -> Map<String, Value> {
    match arguments {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        Value::String(text) if text.trim().is_empty() => Map::new(),
        Value::String(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(function, "Discarding unparseable tool arguments: {e}");
            Map::new()
        }),
        other => {
            tracing::warn!(function, "Discarding non-object tool arguments: {other}");
            Map::new()
        }
    }
}
