//! Dispatch of single tool calls.

use serde_json::{Map, Value};
use toolmux_core::SessionError;

use crate::registry::{RegistryError, SessionRegistry};

/// Tool invocation error.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result of a tool call as it enters the conversation.
///
/// Both variants carry conversation-ready text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success(String),
    Failure(String),
}

impl ToolOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success(s) | Self::Failure(s) => s,
        }
    }

    #[must_use]
    pub fn into_content(self) -> String {
        match self {
            Self::Success(s) | Self::Failure(s) => s,
        }
    }
}

/// Routes `(server, tool, arguments)` to the owning session.
#[derive(Clone, Copy)]
pub struct ToolInvoker<'r> {
    registry: &'r SessionRegistry,
}

impl<'r> ToolInvoker<'r> {
    #[must_use]
    pub const fn new(registry: &'r SessionRegistry) -> Self {
        Self { registry }
    }

    /// Call `tool` on `identity` and flatten the result to text.
    ///
    /// Missing arguments default to an empty object.
    ///
    /// # Errors
    /// Returns [`InvokeError::Registry`] for an unknown identity, without
    /// touching any session, and [`InvokeError::Session`] if the call fails.
    pub async fn try_call(
        &self,
        identity: &str,
        tool: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<String, InvokeError> {
        let session = self.registry.get(identity)?;
        let output = session
            .call_tool(tool, arguments.unwrap_or_default())
            .await?;
        if output.is_error {
            tracing::debug!(server = identity, tool, "Tool returned an error result");
        }
        Ok(output.render())
    }

    /// Like [`try_call`](Self::try_call), with failures folded into text.
    pub async fn call(
        &self,
        identity: &str,
        tool: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ToolOutcome {
        match self.try_call(identity, tool, arguments).await {
            Ok(text) => ToolOutcome::Success(text),
            Err(e) => {
                tracing::warn!(server = identity, tool, "Tool call failed: {e}");
                ToolOutcome::Failure(format!("Error calling {identity}.{tool}: {e}"))
            }
        }
    }
}
