//! Tool-call loop: model round trips until the model stops asking for tools.

use futures::future::join_all;
use serde_json::{Map, Value};
use toolmux_core::{
    BackendError, Conversation, Message, ModelBackend, ToolCallRequest, ToolDefinition,
};
use toolmux_session::{CatalogAggregator, SessionRegistry, ToolInvoker};

use crate::schema::{CALL_TOOL, LIST_TOOLS, tool_definitions};

/// Rounds of tool calls allowed in one turn.
pub const DEFAULT_MAX_ROUNDS: usize = 16;

const MISSING_CALL_PARAMS: &str = "Error: call_tool requires 'server' and 'tool'.";

/// Turn error.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Model backend failed: {0}")]
    Backend(#[from] BackendError),
}

/// Drives one conversation against a model backend and the registry's
/// tool servers.
pub struct ToolLoop<'r, B> {
    backend: B,
    registry: &'r SessionRegistry,
    tools: Vec<ToolDefinition>,
    max_rounds: usize,
}

impl<'r, B: ModelBackend> ToolLoop<'r, B> {
    #[must_use]
    pub fn new(backend: B, registry: &'r SessionRegistry) -> Self {
        Self {
            backend,
            tools: tool_definitions(&registry.identities()),
            registry,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    #[must_use]
    pub const fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    #[must_use]
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Run one user turn and return the final assistant text.
    ///
    /// Every round with tool calls appends an assistant message carrying the
    /// calls, then one tool message per call in request order. The final
    /// answer joins the visible text of all rounds and is appended as the
    /// closing assistant message.
    ///
    /// # Errors
    /// Returns [`AgentError::Backend`] if a model request fails. Messages
    /// appended before the failure stay in `conversation`.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        input: &str,
    ) -> Result<String, AgentError> {
        conversation.push(Message::user(input));

        let mut chunks: Vec<String> = Vec::new();
        let mut rounds = 0;

        loop {
            let reply = self
                .backend
                .chat(conversation.messages(), &self.tools)
                .await?;
            if let Some(text) = reply.visible_text() {
                chunks.push(text.to_string());
            }
            if reply.tool_calls.is_empty() {
                break;
            }
            if rounds >= self.max_rounds {
                tracing::warn!(
                    rounds,
                    pending = reply.tool_calls.len(),
                    "Tool-call round limit reached, dropping pending calls"
                );
                chunks.push(format!("[stopped after {rounds} tool-call rounds]"));
                break;
            }
            rounds += 1;

            tracing::debug!(round = rounds, calls = reply.tool_calls.len(), "Dispatching tool calls");
            let results = join_all(reply.tool_calls.iter().map(|call| self.dispatch(call))).await;

            let names: Vec<String> = reply.tool_calls.iter().map(|c| c.name.clone()).collect();
            conversation.push(Message::assistant_tool_calls(reply.tool_calls));
            for (name, content) in names.into_iter().zip(results) {
                conversation.push(Message::tool(name, content));
            }
        }

        let answer = chunks.join("\n");
        conversation.push(Message::assistant(answer.clone()));
        Ok(answer)
    }

    async fn dispatch(&self, call: &ToolCallRequest) -> String {
        match call.name.as_str() {
            LIST_TOOLS => {
                let listing = CatalogAggregator::new(self.registry)
                    .collect(call.str_arg("server"))
                    .await;
                match listing {
                    Ok(catalog) => catalog
                        .to_pretty_json()
                        .unwrap_or_else(|e| format!("Error listing tools: {e}")),
                    Err(e) => {
                        tracing::warn!("Tool listing failed: {e}");
                        format!("Error listing tools: {e}")
                    }
                }
            }
            CALL_TOOL => {
                let (Some(server), Some(tool)) = (call.str_arg("server"), call.str_arg("tool"))
                else {
                    return MISSING_CALL_PARAMS.to_string();
                };
                ToolInvoker::new(self.registry)
                    .call(server, tool, nested_arguments(call))
                    .await
                    .into_content()
            }
            other => format!("Unknown tool request: {other}"),
        }
    }
}

/// The `arguments` object of a `call_tool` request.
///
/// Some models send it as a JSON-encoded string.
fn nested_arguments(call: &ToolCallRequest) -> Option<Map<String, Value>> {
    match call.arguments.get("arguments")? {
        Value::Object(map) => Some(map.clone()),
        Value::String(s) => serde_json::from_str(s).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::json;
    use toolmux_core::{
        ModelReply, Role, SessionError, ToolCallOutput, ToolDescriptor, ToolSession,
    };

    use super::*;

    /// Replays scripted replies and records the conversation length it saw.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<ModelReply, BackendError>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl ScriptedBackend {
        fn new(replies: impl IntoIterator<Item = ModelReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(Ok).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                replies: Mutex::new(VecDeque::from([Err(BackendError::Request(
                    "connection refused".into(),
                ))])),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn chat(
            &self,
            messages: &[Message],
            tools: &[ToolDefinition],
        ) -> Result<ModelReply, BackendError> {
            assert_eq!(tools.len(), 2);
            self.seen.lock().unwrap().push(messages.len());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelReply::text("out of script")))
        }
    }

    /// Answers `ping` with "pong" and `slow` with "slow" after a delay.
    struct PingSession {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolSession for PingSession {
        async fn initialize(&self) -> Result<(), SessionError> {
            Ok(())
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
            Ok(vec![ToolDescriptor::new("ping", Some("Reply with pong".into()))])
        }

        async fn call_tool(
            &self,
            name: &str,
            _arguments: Map<String, Value>,
        ) -> Result<ToolCallOutput, SessionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match name {
                "ping" => Ok(ToolCallOutput::text("pong")),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(ToolCallOutput::text("slow"))
                }
                _ => Err(SessionError::Remote {
                    code: -32602,
                    message: format!("Unknown tool: {name}"),
                }),
            }
        }

        async fn shutdown(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn fixture() -> (SessionRegistry, Arc<PingSession>) {
        let alpha = Arc::new(PingSession {
            calls: AtomicUsize::new(0),
        });
        let beta: Arc<dyn ToolSession> = Arc::new(PingSession {
            calls: AtomicUsize::new(0),
        });
        let registry = SessionRegistry::from_sessions([
            ("alpha", Arc::clone(&alpha) as Arc<dyn ToolSession>),
            ("beta", beta),
        ]);
        (registry, alpha)
    }

    fn call(name: &str, args: Value) -> ToolCallRequest {
        let Value::Object(map) = args else {
            panic!("arguments must be an object");
        };
        ToolCallRequest::new(name, map)
    }

    #[tokio::test]
    async fn test_call_then_answer() {
        let (mut registry, alpha) = fixture();
        let backend = Arc::new(ScriptedBackend::new([
            ModelReply::calls(vec![call(
                CALL_TOOL,
                json!({"server": "alpha", "tool": "ping", "arguments": {}}),
            )]),
            ModelReply::text("Done"),
        ]));
        let agent = ToolLoop::new(Arc::clone(&backend), &registry);

        let mut conversation = Conversation::seeded("sys");
        let answer = agent.run_turn(&mut conversation, "ping alpha").await.unwrap();

        assert_eq!(answer, "Done");
        assert_eq!(alpha.calls.load(Ordering::SeqCst), 1);

        let messages = conversation.messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].tool_calls.len(), 1);
        assert_eq!(messages[3], Message::tool(CALL_TOOL, "pong"));
        assert_eq!(messages[4], Message::assistant("Done"));
        assert_eq!(*backend.seen.lock().unwrap(), [2, 4]);

        registry.close().await;
    }

    #[tokio::test]
    async fn test_missing_server_never_invokes() {
        let (mut registry, alpha) = fixture();
        let backend = Arc::new(ScriptedBackend::new([
            ModelReply::calls(vec![call(CALL_TOOL, json!({"tool": "ping"}))]),
            ModelReply::text("ok"),
        ]));
        let agent = ToolLoop::new(Arc::clone(&backend), &registry);

        let mut conversation = Conversation::seeded("sys");
        agent.run_turn(&mut conversation, "go").await.unwrap();

        assert_eq!(conversation.messages()[3].content, MISSING_CALL_PARAMS);
        assert_eq!(alpha.calls.load(Ordering::SeqCst), 0);

        let backend = Arc::new(ScriptedBackend::new([
            ModelReply::calls(vec![call(CALL_TOOL, json!({"server": "alpha", "tool": ""}))]),
            ModelReply::text("ok"),
        ]));
        ToolLoop::new(Arc::clone(&backend), &registry)
            .run_turn(&mut conversation, "again")
            .await
            .unwrap();
        assert_eq!(conversation.messages()[7].content, MISSING_CALL_PARAMS);
        assert_eq!(alpha.calls.load(Ordering::SeqCst), 0);

        registry.close().await;
    }

    #[tokio::test]
    async fn test_list_tools_and_unknown_request() {
        let (mut registry, _) = fixture();
        let backend = Arc::new(ScriptedBackend::new([
            ModelReply::calls(vec![
                call(LIST_TOOLS, json!({"server": "alpha"})),
                call(LIST_TOOLS, json!({"server": "gamma"})),
                call("delete_everything", json!({})),
            ]),
            ModelReply::text("Listed"),
        ]));
        let agent = ToolLoop::new(Arc::clone(&backend), &registry);

        let mut conversation = Conversation::new();
        agent.run_turn(&mut conversation, "what tools?").await.unwrap();

        let messages = conversation.messages();
        let listing: Value = serde_json::from_str(&messages[2].content).unwrap();
        assert_eq!(
            listing,
            json!({"alpha": [{"name": "ping", "description": "Reply with pong"}]})
        );
        assert_eq!(messages[3].content, "{\n  \"gamma\": []\n}");
        assert_eq!(messages[4].content, "Unknown tool request: delete_everything");
        assert_eq!(messages[4].name.as_deref(), Some("delete_everything"));

        registry.close().await;
    }

    #[tokio::test]
    async fn test_unknown_server_call_is_reported() {
        let (mut registry, _) = fixture();
        let backend = Arc::new(ScriptedBackend::new([
            ModelReply::calls(vec![call(
                CALL_TOOL,
                json!({"server": "gamma", "tool": "ping"}),
            )]),
            ModelReply::text("Sorry"),
        ]));
        let agent = ToolLoop::new(Arc::clone(&backend), &registry);

        let mut conversation = Conversation::new();
        agent.run_turn(&mut conversation, "ping gamma").await.unwrap();
        assert_eq!(
            conversation.messages()[2].content,
            "Error calling gamma.ping: Unknown server: gamma"
        );

        registry.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_calls_keep_request_order() {
        let (mut registry, alpha) = fixture();
        let backend = Arc::new(ScriptedBackend::new([
            ModelReply::calls(vec![
                call(CALL_TOOL, json!({"server": "alpha", "tool": "slow"})),
                call(
                    CALL_TOOL,
                    json!({"server": "alpha", "tool": "ping", "arguments": "{}"}),
                ),
            ]),
            ModelReply::text("Both done"),
        ]));
        let agent = ToolLoop::new(Arc::clone(&backend), &registry);

        let mut conversation = Conversation::new();
        agent.run_turn(&mut conversation, "both").await.unwrap();

        let messages = conversation.messages();
        assert_eq!(messages[2].content, "slow");
        assert_eq!(messages[3].content, "pong");
        assert_eq!(alpha.calls.load(Ordering::SeqCst), 2);

        registry.close().await;
    }

    #[tokio::test]
    async fn test_text_is_buffered_across_rounds() {
        let (mut registry, _) = fixture();
        let backend = Arc::new(ScriptedBackend::new([
            ModelReply {
                content: Some("Let me check.".into()),
                tool_calls: vec![call(CALL_TOOL, json!({"server": "alpha", "tool": "ping"}))],
            },
            ModelReply::text("It answered pong."),
        ]));
        let agent = ToolLoop::new(Arc::clone(&backend), &registry);

        let mut conversation = Conversation::new();
        let answer = agent.run_turn(&mut conversation, "check").await.unwrap();
        assert_eq!(answer, "Let me check.\nIt answered pong.");
        assert_eq!(conversation.messages()[1].content, "");

        registry.close().await;
    }

    #[tokio::test]
    async fn test_round_cap_stops_loop() {
        let (mut registry, alpha) = fixture();
        let ping = || {
            ModelReply::calls(vec![call(
                CALL_TOOL,
                json!({"server": "alpha", "tool": "ping"}),
            )])
        };
        let backend = Arc::new(ScriptedBackend::new([ping(), ping(), ping()]));
        let agent = ToolLoop::new(Arc::clone(&backend), &registry).with_max_rounds(2);

        let mut conversation = Conversation::new();
        let answer = agent.run_turn(&mut conversation, "loop").await.unwrap();

        assert_eq!(answer, "[stopped after 2 tool-call rounds]");
        assert_eq!(alpha.calls.load(Ordering::SeqCst), 2);
        assert_eq!(conversation.last(), Some(&Message::assistant(answer)));

        registry.close().await;
    }

    #[tokio::test]
    async fn test_empty_reply_is_empty_answer() {
        let (mut registry, _) = fixture();
        let backend = Arc::new(ScriptedBackend::new([ModelReply::default()]));
        let agent = ToolLoop::new(Arc::clone(&backend), &registry);

        let mut conversation = Conversation::new();
        let answer = agent.run_turn(&mut conversation, "hello").await.unwrap();
        assert_eq!(answer, "");
        assert_eq!(conversation.len(), 2);

        registry.close().await;
    }

    #[tokio::test]
    async fn test_backend_error_keeps_user_message() {
        let (mut registry, _) = fixture();
        let backend = Arc::new(ScriptedBackend::failing());
        let agent = ToolLoop::new(Arc::clone(&backend), &registry);

        let mut conversation = Conversation::seeded("sys");
        let err = agent.run_turn(&mut conversation, "hello").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Model backend failed: Request failed: connection refused"
        );
        assert_eq!(conversation.last(), Some(&Message::user("hello")));

        registry.close().await;
    }
}
