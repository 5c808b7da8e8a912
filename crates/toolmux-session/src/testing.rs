//! Scriptable sessions and connectors for unit tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use toolmux_core::{
    ServerSpec, SessionConnector, SessionError, ToolCallOutput, ToolDescriptor, ToolSession,
};

pub type ShutdownLog = Arc<Mutex<Vec<String>>>;

pub struct FakeSession {
    name: String,
    tools: Vec<ToolDescriptor>,
    responses: HashMap<String, ToolCallOutput>,
    fail_init: bool,
    hang_init: bool,
    fail_list: bool,
    fail_shutdown: bool,
    shutdown_log: Option<ShutdownLog>,
    initialized: AtomicBool,
    pub calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub last_arguments: Mutex<Option<Map<String, Value>>>,
}

impl FakeSession {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tools: Vec::new(),
            responses: HashMap::new(),
            fail_init: false,
            hang_init: false,
            fail_list: false,
            fail_shutdown: false,
            shutdown_log: None,
            initialized: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            last_arguments: Mutex::new(None),
        }
    }

    pub fn tool(mut self, name: &str, description: Option<&str>) -> Self {
        self.tools
            .push(ToolDescriptor::new(name, description.map(str::to_string)));
        self
    }

    pub fn respond(mut self, tool: &str, output: ToolCallOutput) -> Self {
        self.responses.insert(tool.to_string(), output);
        self
    }

    pub const fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub const fn hanging_init(mut self) -> Self {
        self.hang_init = true;
        self
    }

    pub const fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub const fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    pub fn logging_shutdown(mut self, log: &ShutdownLog) -> Self {
        self.shutdown_log = Some(Arc::clone(log));
        self
    }

    /// Mark as already initialized, for `SessionRegistry::from_sessions`.
    pub fn ready(self) -> Self {
        self.initialized.store(true, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolSession for FakeSession {
    async fn initialize(&self) -> Result<(), SessionError> {
        if self.hang_init {
            std::future::pending::<()>().await;
        }
        if self.fail_init {
            return Err(SessionError::Protocol("handshake rejected".into()));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(SessionError::Disconnected);
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallOutput, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_arguments.lock().unwrap() = Some(arguments);
        self.responses
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::Remote {
                code: -32602,
                message: format!("Unknown tool: {name}"),
            })
    }

    async fn shutdown(&self) -> Result<(), SessionError> {
        if let Some(log) = &self.shutdown_log {
            log.lock().unwrap().push(self.name.clone());
        }
        if self.fail_shutdown {
            return Err(SessionError::Disconnected);
        }
        Ok(())
    }
}

/// Hands out pre-built fakes by identity; unknown identities fail to spawn.
#[derive(Default)]
pub struct FakeConnector {
    sessions: HashMap<String, Arc<FakeSession>>,
    pub connects: AtomicUsize,
}

impl FakeConnector {
    pub fn with(mut self, session: &Arc<FakeSession>) -> Self {
        self.sessions
            .insert(session.name.clone(), Arc::clone(session));
        self
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, spec: &ServerSpec) -> Result<Arc<dyn ToolSession>, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.sessions.get(&spec.name) {
            Some(session) => Ok(Arc::clone(session) as Arc<dyn ToolSession>),
            None => Err(SessionError::SpawnFailed(format!("no such server: {}", spec.name))),
        }
    }
}

pub fn spec(name: &str) -> ServerSpec {
    ServerSpec::new(name, name, Vec::<String>::new())
}
