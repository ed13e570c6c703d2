//! Local persistence of the viewer's subscription set.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no usable data directory")]
    NoDataDir,
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store format: {0}")]
    Format(#[from] serde_json::Error),
}

/// Save/load of subscribed topics keyed by client id.
pub trait SubscriptionStore: Send + Sync {
    fn save_subscriptions(&self, client_id: &str, topics: &[String]) -> Result<(), StoreError>;
    fn load_subscriptions(&self, client_id: &str) -> Result<Vec<String>, StoreError>;
}

/// JSON file: `{ "<client_id>": ["topic", ...], ... }`.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `VIEWER_DATA_DIR` if set, else the platform data directory.
    pub fn default_location() -> Result<Self, StoreError> {
        let dir = match std::env::var("VIEWER_DATA_DIR") {
            Ok(d) if !d.trim().is_empty() => PathBuf::from(shellexpand::tilde(&d).to_string()),
            _ => directories::ProjectDirs::from("", "", "mqtt-relay-viewer")
                .ok_or(StoreError::NoDataDir)?
                .data_dir()
                .to_path_buf(),
        };
        Ok(Self::at(dir.join("subscriptions.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, BTreeSet<String>>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl SubscriptionStore for FileStore {
    fn save_subscriptions(&self, client_id: &str, topics: &[String]) -> Result<(), StoreError> {
        let mut all = self.read_all()?;
        if topics.is_empty() {
            all.remove(client_id);
        } else {
            all.insert(client_id.to_string(), topics.iter().cloned().collect());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // replace atomically
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&all)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load_subscriptions(&self, client_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read_all()?
            .remove(client_id)
            .map(|topics| topics.into_iter().collect())
            .unwrap_or_default())
    }
}
