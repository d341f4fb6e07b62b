use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CommitIdentifier, ValueTreeIdentity};

/// Per-entity bookkeeping carried by every repositable value and value tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub unique_identifier: String,
    pub is_deleted: bool,
    /// Commit that wrote this version, absent until first committed
    pub commit_identifier: Option<CommitIdentifier>,
    /// Identities from the root down to this node's parent at commit time
    pub ancestry: Vec<ValueTreeIdentity>,
    /// Last write time
    pub timestamp: DateTime<Utc>,
    /// Head the value was read against; only set on harvested values
    pub head_when_fetched: Option<CommitIdentifier>,
}

impl Metadata {
    /// Fresh metadata with a random identifier
    pub fn new() -> Self {
        Self::with_identifier(Uuid::new_v4().to_string())
    }

    pub fn with_identifier(unique_identifier: impl Into<String>) -> Self {
        Self {
            unique_identifier: unique_identifier.into(),
            is_deleted: false,
            commit_identifier: None,
            ancestry: Vec::new(),
            timestamp: Utc::now(),
            head_when_fetched: None,
        }
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}
