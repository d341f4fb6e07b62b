//! JSON persistence for repositories and forests

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::forest::Forest;
use crate::history::History;

use super::RepositoryError;

/// Everything needed to restore a repository
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RepositorySnapshot {
    pub unique_identifier: String,
    pub forest: Forest,
    pub history: History,
}

/// Write `value` as pretty JSON, replacing any existing file atomically.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RepositoryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RepositoryError::IoError(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, json).map_err(|e| RepositoryError::IoError(e.to_string()))?;
    std::fs::rename(&staging, path).map_err(|e| RepositoryError::IoError(e.to_string()))?;
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, RepositoryError> {
    let data = std::fs::read(path).map_err(|e| RepositoryError::IoError(e.to_string()))?;
    serde_json::from_slice(&data).map_err(|e| RepositoryError::DeserializationError(e.to_string()))
}

/// Loads and saves whole forests.
pub trait ForestSerializer {
    fn load(&self, path: &Path) -> Result<Forest, RepositoryError>;

    fn save(&self, forest: &Forest, path: &Path) -> Result<(), RepositoryError>;
}

/// Stores a forest as a JSON array of value trees.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonForestSerializer;

impl ForestSerializer for JsonForestSerializer {
    fn load(&self, path: &Path) -> Result<Forest, RepositoryError> {
        read_json(path)
    }

    fn save(&self, forest: &Forest, path: &Path) -> Result<(), RepositoryError> {
        write_json(path, forest)
    }
}
