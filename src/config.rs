//! Configuration for repositories and exchanges
//!
//! Both structs are plain serde types: build them in code or load them from
//! a JSON file.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors related to loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let data = std::fs::read(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    serde_json::from_slice(&data).map_err(|e| ConfigError::DeserializationError(e.to_string()))
}

/// How a [`MonolithicRepository`](crate::repository::MonolithicRepository)
/// is opened.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository identifier; a fresh UUID when absent
    #[serde(default)]
    pub identifier: Option<String>,
    /// JSON snapshot location; in-memory only when absent
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl RepositoryConfig {
    pub fn in_memory(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            store_path: None,
        }
    }

    pub fn persistent(identifier: impl Into<String>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            store_path: Some(store_path.into()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::DeserializationError(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_json(path)
    }
}

/// How an [`Exchange`](crate::exchange::Exchange) keeps its cursors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Where cursors are saved after each successful round
    #[serde(default)]
    pub saved_state_path: Option<PathBuf>,
}

impl ExchangeConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::DeserializationError(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_json(path)
    }
}
