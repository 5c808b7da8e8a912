//! Launch settings for tool servers.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Default per-request timeout, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default initialization handshake timeout, in seconds.
pub const DEFAULT_INIT_TIMEOUT_SECS: u64 = 30;

/// How to launch one tool server and which identity it answers to.
///
/// `command` may be a bare executable or a full command line; it is split
/// shell-style at launch and `args` are appended after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Identity the server is addressed by (e.g. `"filesystem"`).
    pub name: String,

    /// Executable or command line.
    pub command: String,

    /// Extra arguments, appended in order.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables set for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the server process.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Upper bound for any single request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound for the initialization handshake.
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_init_timeout_secs() -> u64 {
    DEFAULT_INIT_TIMEOUT_SECS
}

impl ServerSpec {
    /// Create a spec with default timeouts and no extra environment.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            cwd: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            init_timeout_secs: DEFAULT_INIT_TIMEOUT_SECS,
        }
    }

    /// Set an environment variable for the server process.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    /// Copy of this spec with `${VAR}` references expanded in the command,
    /// arguments and environment values.
    #[must_use]
    pub fn expanded(&self) -> Self {
        Self {
            command: expand_env_vars(&self.command),
            args: self.args.iter().map(|a| expand_env_vars(a)).collect(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), expand_env_vars(v)))
                .collect(),
            ..self.clone()
        }
    }
}

/// Expand `${VAR}` references from the process environment.
///
/// Unset variables are left verbatim, including the braces.
#[must_use]
pub fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            out.push(ch);
            continue;
        }
        chars.next();

        let mut name = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            name.push(c);
        }

        match std::env::var(&name) {
            Ok(value) if closed => out.push_str(&value),
            _ => {
                out.push_str("${");
                out.push_str(&name);
                if closed {
                    out.push('}');
                }
            }
        }
    }

    out
}
