use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tree::CommitIdentifier;

/// Where a commit came from in the DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLineage {
    pub predecessor: CommitIdentifier,
    pub merged_predecessor: Option<CommitIdentifier>,
}

/// An immutable node of a repository history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub identifier: CommitIdentifier,
    /// Absent for the first commit of a line
    pub lineage: Option<CommitLineage>,
    pub timestamp: DateTime<Utc>,
    pub repository_identifier: String,
}

impl Commit {
    pub fn new(
        repository_identifier: impl Into<String>,
        lineage: Option<CommitLineage>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier: Uuid::new_v4().to_string(),
            lineage,
            timestamp,
            repository_identifier: repository_identifier.into(),
        }
    }

    /// Predecessor first, then the merged predecessor
    pub fn predecessors(&self) -> impl Iterator<Item = &CommitIdentifier> {
        self.lineage.iter().flat_map(|lineage| {
            std::iter::once(&lineage.predecessor).chain(lineage.merged_predecessor.iter())
        })
    }

    pub fn is_merge(&self) -> bool {
        self.lineage
            .as_ref()
            .map_or(false, |lineage| lineage.merged_predecessor.is_some())
    }
}
