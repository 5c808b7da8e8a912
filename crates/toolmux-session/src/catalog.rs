//! Unified tool catalog across all sessions.

use serde::{Serialize, Serializer, ser::SerializeMap};
use toolmux_core::{SessionError, ToolDescriptor};

use crate::registry::{RegistryError, SessionRegistry};

/// Catalog query error.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{identity}: {source}")]
    Session {
        identity: String,
        #[source]
        source: SessionError,
    },
}

/// Tools per server identity, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<(String, Vec<ToolDescriptor>)>,
}

impl Catalog {
    fn push(&mut self, identity: impl Into<String>, tools: Vec<ToolDescriptor>) {
        self.entries.push((identity.into(), tools));
    }

    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&[ToolDescriptor]> {
        self.entries
            .iter()
            .find(|(name, _)| name == identity)
            .map(|(_, tools)| tools.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ToolDescriptor])> {
        self.entries
            .iter()
            .map(|(name, tools)| (name.as_str(), tools.as_slice()))
    }

    #[must_use]
    pub fn identities(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of tools across all servers.
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.entries.iter().map(|(_, tools)| tools.len()).sum()
    }

    /// Indented JSON object keyed by identity.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<ToolDescriptor>)> for Catalog {
    fn from_iter<I: IntoIterator<Item = (S, Vec<ToolDescriptor>)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(identity, tools)| (identity.into(), tools))
                .collect(),
        }
    }
}

impl Serialize for Catalog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (identity, tools) in &self.entries {
            map.serialize_entry(identity, tools)?;
        }
        map.end()
    }
}

/// Queries sessions for their tools. Nothing is cached.
#[derive(Clone, Copy)]
pub struct CatalogAggregator<'r> {
    registry: &'r SessionRegistry,
}

impl<'r> CatalogAggregator<'r> {
    #[must_use]
    pub const fn new(registry: &'r SessionRegistry) -> Self {
        Self { registry }
    }

    /// Tools of one server, or of all servers when `identity` is `None`.
    ///
    /// # Errors
    /// Returns [`CatalogError::Registry`] for an unknown identity and
    /// [`CatalogError::Session`] if a server fails to list its tools.
    pub async fn list(&self, identity: Option<&str>) -> Result<Catalog, CatalogError> {
        let mut catalog = Catalog::default();
        match identity {
            Some(identity) => {
                let session = self.registry.get(identity)?;
                catalog.push(identity, fetch(identity, session.list_tools()).await?);
            }
            None => {
                for (identity, session) in self.registry.sessions() {
                    catalog.push(identity, fetch(identity, session.list_tools()).await?);
                }
            }
        }
        Ok(catalog)
    }

    /// Like [`list`](Self::list), but returns what is available: an unknown
    /// filter yields an empty entry for that name, and servers that fail an
    /// unfiltered listing are logged and left out.
    ///
    /// # Errors
    /// Returns [`CatalogError::Session`] if the one server named by `filter`
    /// fails to list its tools.
    pub async fn collect(&self, filter: Option<&str>) -> Result<Catalog, CatalogError> {
        match filter {
            Some(identity) if !self.registry.contains(identity) => {
                tracing::debug!(server = identity, "Tool listing requested for unknown server");
                let mut catalog = Catalog::default();
                catalog.push(identity, Vec::new());
                Ok(catalog)
            }
            Some(_) => self.list(filter).await,
            None => {
                let mut catalog = Catalog::default();
                for (identity, session) in self.registry.sessions() {
                    match fetch(identity, session.list_tools()).await {
                        Ok(tools) => catalog.push(identity, tools),
                        Err(e) => tracing::warn!("Skipping server in tool listing: {e}"),
                    }
                }
                Ok(catalog)
            }
        }
    }
}

async fn fetch(
    identity: &str,
    listing: impl Future<Output = Result<Vec<ToolDescriptor>, SessionError>>,
) -> Result<Vec<ToolDescriptor>, CatalogError> {
    let tools = listing.await.map_err(|source| CatalogError::Session {
        identity: identity.to_string(),
        source,
    })?;
    tracing::debug!(server = identity, count = tools.len(), "Listed tools");
    Ok(tools)
}
