//! JSON file history store.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use toolmux_core::{HistoryStore, Message, StorageError};

/// History kept as one pretty-printed JSON array on disk.
///
/// Saves go through a sibling temp file and a rename, so the file on disk is
/// always either the old or the new array.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(ToOwned::to_owned)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl HistoryStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<Message>, StorageError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StorageError::NotFound),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text).map_err(|e| StorageError::Corrupt(e.to_string()))
    }

    async fn save(&self, messages: &[Message]) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(messages)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(path = %self.path.display(), count = messages.len(), "Saved history");
        Ok(())
    }
}
