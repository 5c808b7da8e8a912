//! MCP tool session over a child process's stdio.

use std::{
    process::Stdio,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use serde_json::{Map, Value, json};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{ChildStderr, Command},
    sync::Mutex,
};
use toolmux_core::{
    ServerSpec, SessionConnector, SessionError, ToolCallOutput, ToolDescriptor, ToolSession,
};

use crate::{
    command::{CommandBuildError, CommandBuilder},
    protocol::ProtocolPeer,
    types::{
        CallToolResult, ImplementationInfo, InitializeParams, InitializeResult,
        MCP_PROTOCOL_VERSION, ToolsListResult,
    },
};

/// Maximum time to wait for a server to exit after its stdin is closed.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on `tools/list` pages followed in one listing.
const MAX_LIST_PAGES: usize = 64;

const CLIENT_NAME: &str = "toolmux";

/// A spawned tool server speaking MCP over stdin/stdout.
///
/// The server runs in its own process group; the whole group is killed on
/// shutdown or when the session is dropped.
pub struct StdioSession {
    name: String,
    peer: ProtocolPeer,
    child: Mutex<Option<AsyncGroupChild>>,
    initialized: AtomicBool,
    server_info: OnceLock<ImplementationInfo>,
    request_timeout: Duration,
    init_timeout: Duration,
    shutdown_timeout: Duration,
}

impl StdioSession {
    /// Launch the server described by `spec`.
    ///
    /// The returned session still needs [`ToolSession::initialize`].
    ///
    /// # Errors
    /// Returns error if the command cannot be built, resolved or spawned.
    pub async fn spawn(spec: &ServerSpec) -> Result<Self, SessionError> {
        let spec = spec.expanded();
        let (program, args) = CommandBuilder::from_spec(&spec)
            .build()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?
            .into_resolved(spec.cwd.as_deref())
            .await
            .map_err(|e| match e {
                CommandBuildError::NotFound(program) => SessionError::ExecutableNotFound(program),
                other => SessionError::SpawnFailed(other.to_string()),
            })?;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .group_spawn()
            .map_err(|e| SessionError::SpawnFailed(format!("{}: {e}", program.display())))?;

        let stdin = child
            .inner()
            .stdin
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("failed to capture stdin".into()))?;
        let stdout = child
            .inner()
            .stdout
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("failed to capture stdout".into()))?;
        if let Some(stderr) = child.inner().stderr.take() {
            forward_stderr(spec.name.clone(), stderr);
        }

        tracing::info!(server = %spec.name, program = %program.display(), ?args, "Spawned tool server");

        let request_timeout = spec.request_timeout();
        let init_timeout = spec.init_timeout();
        Ok(Self {
            peer: ProtocolPeer::spawn(spec.name.clone(), stdin, stdout),
            name: spec.name,
            child: Mutex::new(Some(child)),
            initialized: AtomicBool::new(false),
            server_info: OnceLock::new(),
            request_timeout,
            init_timeout,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        })
    }

    /// Grace period between closing stdin and killing the process group.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Identity this session was opened for.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server name and version reported during the handshake.
    #[must_use]
    pub fn server_info(&self) -> Option<&ImplementationInfo> {
        self.server_info.get()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> Result<(), SessionError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(SessionError::NotInitialized)
        }
    }
}

fn forward_stderr(server: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, "stderr: {line}");
        }
    });
}

#[async_trait]
impl ToolSession for StdioSession {
    async fn initialize(&self) -> Result<(), SessionError> {
        if self.is_initialized() {
            return Ok(());
        }

        let params = serde_json::to_value(InitializeParams::for_client(
            CLIENT_NAME,
            env!("CARGO_PKG_VERSION"),
        ))
        .map_err(|e| SessionError::Protocol(e.to_string()))?;

        let raw = self
            .peer
            .request("initialize", Some(params), self.init_timeout)
            .await?;
        let result: InitializeResult =
            serde_json::from_value(raw).map_err(|e| SessionError::Protocol(e.to_string()))?;

        if result.protocol_version != MCP_PROTOCOL_VERSION {
            tracing::warn!(
                server = %self.name,
                "Server negotiated protocol '{}' (requested '{MCP_PROTOCOL_VERSION}')",
                result.protocol_version,
            );
        }

        self.peer.notify("notifications/initialized", None).await?;

        tracing::info!(
            server = %self.name,
            "Connected to {} v{}",
            result.server_info.name,
            result.server_info.version,
        );
        let _ = self.server_info.set(result.server_info);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        self.ensure_initialized()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let raw = self
                .peer
                .request("tools/list", params, self.request_timeout)
                .await?;
            let page: ToolsListResult =
                serde_json::from_value(raw).map_err(|e| SessionError::Protocol(e.to_string()))?;

            tools.extend(page.tools.into_iter().map(ToolDescriptor::from));

            match page.next_cursor {
                Some(next) if cursor.as_ref() != Some(&next) => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(server = %self.name, "Stopped following tools/list after {MAX_LIST_PAGES} pages");
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallOutput, SessionError> {
        self.ensure_initialized()?;

        let params = json!({ "name": name, "arguments": arguments });
        let raw = self
            .peer
            .request("tools/call", Some(params), self.request_timeout)
            .await?;
        let result: CallToolResult =
            serde_json::from_value(raw).map_err(|e| SessionError::Protocol(e.to_string()))?;

        if result.is_error {
            tracing::debug!(server = %self.name, tool = name, "Tool reported an error result");
        }
        Ok(result.into())
    }

    async fn shutdown(&self) -> Result<(), SessionError> {
        self.initialized.store(false, Ordering::Release);
        if let Err(e) = self.peer.close().await {
            tracing::debug!(server = %self.name, "Closing stdin failed: {e}");
        }

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(server = %self.name, %status, "Tool server exited");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = child.start_kill();
                Err(e.into())
            }
            Err(_) => {
                tracing::warn!(server = %self.name, "Tool server did not exit, killing process group");
                if let Err(e) = child.kill().await {
                    let _ = child.start_kill();
                    return Err(e.into());
                }
                Ok(())
            }
        }
    }
}

impl Drop for StdioSession {
    fn drop(&mut self) {
        if let Some(child) = self.child.get_mut().as_mut() {
            tracing::debug!(server = %self.name, "Killing tool server on drop");
            let _ = child.start_kill();
        }
    }
}

/// Opens [`StdioSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioConnector;

#[async_trait]
impl SessionConnector for StdioConnector {
    async fn connect(&self, spec: &ServerSpec) -> Result<Arc<dyn ToolSession>, SessionError> {
        let session = StdioSession::spawn(spec).await?;
        Ok(Arc::new(session))
    }
}
