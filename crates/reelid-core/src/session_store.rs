use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::Result;

/// Persists the account client's serialized state as one JSON document.
///
/// Every save overwrites the whole file; there is no merging, versioning or locking.
#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self, blob: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let txt = serde_json::to_string(blob)?;
        tokio::fs::write(&self.path, txt).await?;
        debug!("Session written to {}", self.path.display());
        Ok(())
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Missing or empty file is `Ok(None)`; malformed JSON is an error.
    pub async fn load(&self) -> Result<Option<Value>> {
        if !self.exists().await {
            return Ok(None);
        }
        debug!("Reading session from {}", self.path.display());
        let txt = tokio::fs::read_to_string(&self.path).await?;
        if txt.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&txt)?))
    }
}
