//! Cursor-based synchronization between repositories
//!
//! An [`Exchange`] holds a fixed set of peers and a cursor for every ordered
//! pair (source, destination). Each round asks every source for the changes
//! its destination has not yet seen and hands them to that destination.
//! Cursors only move when the whole round succeeds; a failed round is
//! recovered by running another, since pulls are idempotent.

mod cursor;

pub use cursor::{Cursor, TimestampCursor};

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::ExchangeConfig;
use crate::repository::{MonolithicRepository, RepositoryError};
use crate::tree::ValueTree;

/// Errors related to synchronization
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Exchange needs at least two peers, got {0}")]
    InsufficientPeers(usize),

    #[error("Duplicate peer: {0}")]
    DuplicatePeer(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// A repository that can take part in an exchange.
#[async_trait]
pub trait Exchangable: Send + Sync {
    /// Stable identifier of this peer.
    fn unique_identifier(&self) -> String;

    /// Value trees changed since `since` (everything when absent), and the
    /// cursor to pass next time.
    async fn push(&self, since: Option<Cursor>) -> Result<(Vec<ValueTree>, Cursor), ExchangeError>;

    /// Integrate value trees pushed by another peer. Must be idempotent.
    async fn pull(&self, trees: Vec<ValueTree>) -> Result<(), ExchangeError>;
}

#[async_trait]
impl Exchangable for MonolithicRepository {
    fn unique_identifier(&self) -> String {
        MonolithicRepository::unique_identifier(self).to_string()
    }

    async fn push(&self, since: Option<Cursor>) -> Result<(Vec<ValueTree>, Cursor), ExchangeError> {
        let since = since
            .as_ref()
            .map(TimestampCursor::decode)
            .transpose()?
            .map(|cursor| cursor.timestamp);
        let (trees, next) = self.changes_since(since)?;
        Ok((trees, TimestampCursor::new(next).encode()?))
    }

    async fn pull(&self, trees: Vec<ValueTree>) -> Result<(), ExchangeError> {
        self.pull_trees(trees)?;
        Ok(())
    }
}

/// Key of the cursor for one ordered pair of peers
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CursorKey {
    source: String,
    destination: String,
}

/// On-disk form of one cursor
#[derive(Clone, Debug, Serialize, Deserialize)]
struct SavedCursor {
    source: String,
    destination: String,
    cursor: Cursor,
}

fn load_cursors(path: &Path) -> Result<HashMap<CursorKey, Cursor>, ExchangeError> {
    let data = std::fs::read(path).map_err(|e| ExchangeError::IoError(e.to_string()))?;
    let saved: Vec<SavedCursor> = serde_json::from_slice(&data)
        .map_err(|e| ExchangeError::DeserializationError(e.to_string()))?;
    Ok(saved
        .into_iter()
        .map(|saved| {
            (
                CursorKey {
                    source: saved.source,
                    destination: saved.destination,
                },
                saved.cursor,
            )
        })
        .collect())
}

fn save_cursors(path: &Path, cursors: &HashMap<CursorKey, Cursor>) -> Result<(), ExchangeError> {
    let mut saved: Vec<SavedCursor> = cursors
        .iter()
        .map(|(key, cursor)| SavedCursor {
            source: key.source.clone(),
            destination: key.destination.clone(),
            cursor: cursor.clone(),
        })
        .collect();
    saved.sort_by(|a, b| (&a.source, &a.destination).cmp(&(&b.source, &b.destination)));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ExchangeError::IoError(e.to_string()))?;
    }
    let json = serde_json::to_string_pretty(&saved)
        .map_err(|e| ExchangeError::SerializationError(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| ExchangeError::IoError(e.to_string()))?;
    Ok(())
}

/// Synchronizes a fixed set of peers pairwise.
pub struct Exchange {
    peers: Vec<Arc<dyn Exchangable>>,
    config: ExchangeConfig,
    /// Held for a whole round so rounds never overlap
    cursors: Mutex<HashMap<CursorKey, Cursor>>,
}

impl Exchange {
    pub fn new(peers: Vec<Arc<dyn Exchangable>>) -> Result<Self, ExchangeError> {
        Self::with_config(peers, ExchangeConfig::default())
    }

    /// Create an exchange, restoring cursors from
    /// `config.saved_state_path` when that file exists.
    pub fn with_config(
        peers: Vec<Arc<dyn Exchangable>>,
        config: ExchangeConfig,
    ) -> Result<Self, ExchangeError> {
        if peers.len() < 2 {
            return Err(ExchangeError::InsufficientPeers(peers.len()));
        }
        let mut identifiers = HashSet::new();
        for peer in &peers {
            let identifier = peer.unique_identifier();
            if !identifiers.insert(identifier.clone()) {
                return Err(ExchangeError::DuplicatePeer(identifier));
            }
        }

        let cursors = match &config.saved_state_path {
            Some(path) if path.exists() => load_cursors(path)?,
            _ => HashMap::new(),
        };

        Ok(Self {
            peers,
            config,
            cursors: Mutex::new(cursors),
        })
    }

    pub fn peers(&self) -> &[Arc<dyn Exchangable>] {
        &self.peers
    }

    /// Stored cursor for the pair, if a round has completed for it
    pub async fn cursor(&self, source: &str, destination: &str) -> Option<Cursor> {
        let key = CursorKey {
            source: source.to_string(),
            destination: destination.to_string(),
        };
        self.cursors.lock().await.get(&key).cloned()
    }

    /// Run one synchronization round.
    ///
    /// Every ordered pair runs concurrently: push from the source, then pull
    /// into the destination. The round waits for all pairs. If any push or
    /// pull failed, the first failure in peer order is returned and no
    /// cursor moves; otherwise every cursor advances.
    pub async fn exchange(&self) -> Result<(), ExchangeError> {
        let mut cursors = self.cursors.lock().await;

        let mut transfers = Vec::new();
        for source in &self.peers {
            for destination in &self.peers {
                if Arc::ptr_eq(source, destination) {
                    continue;
                }
                let key = CursorKey {
                    source: source.unique_identifier(),
                    destination: destination.unique_identifier(),
                };
                let since = cursors.get(&key).cloned();
                transfers.push(async move {
                    let outcome = async {
                        let (trees, next) = source.push(since).await?;
                        let count = trees.len();
                        destination.pull(trees).await?;
                        Ok::<_, ExchangeError>((next, count))
                    }
                    .await;
                    (key, outcome)
                });
            }
        }

        let mut advanced = Vec::new();
        let mut first_error = None;
        for (key, outcome) in join_all(transfers).await {
            match outcome {
                Ok((next, count)) => {
                    log::debug!(
                        "Moved {} value trees from {} to {}",
                        count,
                        key.source,
                        key.destination
                    );
                    advanced.push((key, next));
                }
                Err(e) => {
                    log::warn!(
                        "Exchange from {} to {} failed: {}",
                        key.source,
                        key.destination,
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        cursors.extend(advanced);
        if let Some(path) = &self.config.saved_state_path {
            save_cursors(path, &cursors)?;
        }
        log::info!("Exchange round complete across {} peers", self.peers.len());
        Ok(())
    }
}
