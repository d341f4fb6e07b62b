//! Commit history
//!
//! Each repository keeps an append-only DAG of commits. The live `head` is
//! the commit the repository considers current; `detached_heads` are local
//! branch tips forked from an older commit, and `remote_heads` are tips
//! introduced by synchronization that still await a merge.

mod commit;

pub use commit::{Commit, CommitLineage};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tree::CommitIdentifier;

/// Errors related to the commit DAG
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Merge error: {reason}")]
    MergeError { reason: String },

    #[error("Unknown commit: {0}")]
    UnknownCommit(CommitIdentifier),

    #[error("Duplicate commit: {0}")]
    DuplicateCommit(CommitIdentifier),
}

/// Append-only commit DAG of one repository.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct History {
    repository_identifier: String,
    commits_by_identifier: BTreeMap<CommitIdentifier, Commit>,
    head: Option<CommitIdentifier>,
    detached_heads: BTreeSet<CommitIdentifier>,
    remote_heads: BTreeSet<CommitIdentifier>,
}

impl History {
    pub fn new(repository_identifier: impl Into<String>) -> Self {
        Self {
            repository_identifier: repository_identifier.into(),
            commits_by_identifier: BTreeMap::new(),
            head: None,
            detached_heads: BTreeSet::new(),
            remote_heads: BTreeSet::new(),
        }
    }

    pub fn repository_identifier(&self) -> &str {
        &self.repository_identifier
    }

    pub fn head(&self) -> Option<&CommitIdentifier> {
        self.head.as_ref()
    }

    pub fn detached_heads(&self) -> &BTreeSet<CommitIdentifier> {
        &self.detached_heads
    }

    pub fn remote_heads(&self) -> &BTreeSet<CommitIdentifier> {
        &self.remote_heads
    }

    pub fn fetch_commit(&self, identifier: &str) -> Option<&Commit> {
        self.commits_by_identifier.get(identifier)
    }

    pub fn commits(&self) -> impl Iterator<Item = &Commit> {
        self.commits_by_identifier.values()
    }

    pub fn len(&self) -> usize {
        self.commits_by_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits_by_identifier.is_empty()
    }

    fn require(&self, identifier: &str) -> Result<&Commit, HistoryError> {
        self.fetch_commit(identifier)
            .ok_or_else(|| HistoryError::UnknownCommit(identifier.to_string()))
    }

    /// Commit timestamps never run behind their predecessors.
    fn next_timestamp(&self, predecessors: &[&CommitIdentifier]) -> DateTime<Utc> {
        predecessors
            .iter()
            .filter_map(|identifier| self.fetch_commit(identifier))
            .map(|commit| commit.timestamp)
            .fold(Utc::now(), |latest, timestamp| latest.max(timestamp))
    }

    fn insert(&mut self, commit: Commit) {
        self.commits_by_identifier
            .insert(commit.identifier.clone(), commit);
    }

    /// Create a commit on top of `based_on`, or on the head when absent.
    ///
    /// Building on the head fast-forwards it. Building on a detached head
    /// advances that branch. Building on anything else forks a new detached
    /// head. Without any predecessor this is the first commit and becomes
    /// the head.
    pub fn commit_new_head(
        &mut self,
        based_on: Option<&CommitIdentifier>,
    ) -> Result<Commit, HistoryError> {
        let predecessor = match based_on.or(self.head.as_ref()) {
            Some(predecessor) => Some(self.require(predecessor)?.identifier.clone()),
            None => None,
        };

        let commit = match predecessor {
            None => {
                let commit = Commit::new(&self.repository_identifier, None, Utc::now());
                self.head = Some(commit.identifier.clone());
                commit
            }
            Some(predecessor) => {
                let timestamp = self.next_timestamp(&[&predecessor]);
                let commit = Commit::new(
                    &self.repository_identifier,
                    Some(CommitLineage {
                        predecessor: predecessor.clone(),
                        merged_predecessor: None,
                    }),
                    timestamp,
                );
                if self.head.as_ref() == Some(&predecessor) {
                    self.head = Some(commit.identifier.clone());
                } else {
                    self.detached_heads.remove(&predecessor);
                    self.detached_heads.insert(commit.identifier.clone());
                }
                commit
            }
        };

        self.insert(commit.clone());
        Ok(commit)
    }

    /// Whether `identifier` is a detached or remote head awaiting a merge
    pub fn is_mergeable(&self, identifier: &str) -> bool {
        self.detached_heads.contains(identifier) || self.remote_heads.contains(identifier)
    }

    /// Merge a detached or remote head into the live head.
    pub fn merge(&mut self, other: &CommitIdentifier) -> Result<Commit, HistoryError> {
        let head = self.head.clone().ok_or_else(|| HistoryError::MergeError {
            reason: "No local head".to_string(),
        })?;
        if !self.is_mergeable(other) {
            return Err(HistoryError::MergeError {
                reason: format!("{} is not a detached or remote head", other),
            });
        }

        let timestamp = self.next_timestamp(&[&head, other]);
        let commit = Commit::new(
            &self.repository_identifier,
            Some(CommitLineage {
                predecessor: head,
                merged_predecessor: Some(other.clone()),
            }),
            timestamp,
        );

        self.detached_heads.remove(other);
        self.remote_heads.remove(other);
        self.head = Some(commit.identifier.clone());
        self.insert(commit.clone());
        Ok(commit)
    }

    /// Register a commit introduced by synchronization as a remote head.
    pub fn record_remote_head(&mut self, commit: Commit) -> Result<(), HistoryError> {
        if self.commits_by_identifier.contains_key(&commit.identifier) {
            return Err(HistoryError::DuplicateCommit(commit.identifier));
        }
        for predecessor in commit.predecessors() {
            self.require(predecessor)?;
        }

        self.remote_heads.insert(commit.identifier.clone());
        self.insert(commit);
        Ok(())
    }

    /// Depth-first walk from `from` through its predecessors.
    ///
    /// The predecessor line is walked before the merged predecessor line and
    /// each commit is visited once. The walk stops as soon as `visitor`
    /// returns false.
    pub fn visit_predecessors<V>(&self, from: &str, mut visitor: V) -> Result<(), HistoryError>
    where
        V: FnMut(&Commit) -> bool,
    {
        let mut stack = vec![from.to_string()];
        let mut visited = HashSet::new();

        while let Some(identifier) = stack.pop() {
            if !visited.insert(identifier.clone()) {
                continue;
            }
            let commit = self.require(&identifier)?;
            if !visitor(commit) {
                return Ok(());
            }
            let predecessors: Vec<_> = commit.predecessors().cloned().collect();
            stack.extend(predecessors.into_iter().rev());
        }
        Ok(())
    }

    /// Every commit reachable from `from`, including itself.
    pub fn ancestors(&self, from: &str) -> Result<HashSet<CommitIdentifier>, HistoryError> {
        let mut ancestors = HashSet::new();
        self.visit_predecessors(from, |commit| {
            ancestors.insert(commit.identifier.clone());
            true
        })?;
        Ok(ancestors)
    }

    /// Nearest commit reachable from both `a` and `b`.
    ///
    /// Generations are edge distances. The walk from `b` proceeds one
    /// generation at a time; among the shared commits found in the first
    /// generation that has any, the one closest to `a` wins, with ties
    /// broken by identifier. `None` when the histories share no commit.
    pub fn greatest_common_ancestor(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<CommitIdentifier>, HistoryError> {
        let mut generations_from_a: HashMap<CommitIdentifier, usize> = HashMap::new();
        let mut queue = VecDeque::from([(a.to_string(), 0usize)]);
        while let Some((identifier, generation)) = queue.pop_front() {
            if generations_from_a.contains_key(&identifier) {
                continue;
            }
            let commit = self.require(&identifier)?;
            for predecessor in commit.predecessors() {
                queue.push_back((predecessor.clone(), generation + 1));
            }
            generations_from_a.insert(identifier, generation);
        }

        let mut seen = HashSet::new();
        let mut frontier = vec![b.to_string()];
        while !frontier.is_empty() {
            let best = frontier
                .iter()
                .filter_map(|identifier| {
                    generations_from_a
                        .get(identifier)
                        .map(|generation| (*generation, identifier))
                })
                .min();
            if let Some((_, identifier)) = best {
                return Ok(Some(identifier.clone()));
            }

            let mut next = Vec::new();
            for identifier in frontier {
                seen.insert(identifier.clone());
                for predecessor in self.require(&identifier)?.predecessors() {
                    if !seen.contains(predecessor) && !next.contains(predecessor) {
                        next.push(predecessor.clone());
                    }
                }
            }
            frontier = next;
        }
        Ok(None)
    }

    /// Check the DAG invariants after loading persisted state.
    pub fn validate(&self) -> Result<(), HistoryError> {
        for (identifier, commit) in &self.commits_by_identifier {
            if identifier != &commit.identifier {
                return Err(HistoryError::UnknownCommit(identifier.clone()));
            }
            for predecessor in commit.predecessors() {
                self.require(predecessor)?;
            }
        }
        for identifier in self
            .head
            .iter()
            .chain(self.detached_heads.iter())
            .chain(self.remote_heads.iter())
        {
            self.require(identifier)?;
        }
        Ok(())
    }
}
