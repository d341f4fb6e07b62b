//! Commit, merge and synchronization algorithms over one forest and history

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::conflict::ConflictResolver;
use crate::forest::{Forest, PlantedValueTree};
use crate::history::{Commit, History, HistoryError};
use crate::repositable::{ForestHarvester, ForestPlanter, Repositable};
use crate::tree::{CommitIdentifier, ValueTree, ValueTreeIdentity, ValueTreePath, ValueTreeReference};

use super::{RepositoryError, REMOTE_REPOSITORY_IDENTIFIER};

/// How child references that were not rewritten by a commit are resolved
#[derive(Clone, Copy)]
enum Repoint<'a> {
    /// Keep references that exist in the forest, else resolve from a commit
    KeepExisting(&'a str),
    /// Always resolve the version visible from a commit
    VisibleFrom(&'a str),
}

/// Everything guarded by a repository's lock.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RepositoryState {
    pub forest: Forest,
    pub history: History,
}

impl RepositoryState {
    pub fn new(repository_identifier: &str) -> Self {
        Self {
            forest: Forest::new(),
            history: History::new(repository_identifier),
        }
    }

    /// Reference of the newest version of `identity` reachable from `commit`.
    pub fn reference_as_of(
        &self,
        identity: &ValueTreeIdentity,
        commit: &str,
    ) -> Result<Option<ValueTreeReference>, HistoryError> {
        let mut found = None;
        self.history.visit_predecessors(commit, |candidate| {
            let reference =
                ValueTreeReference::new(identity.clone(), Some(candidate.identifier.clone()));
            if self.forest.contains(&reference) {
                found = Some(reference);
                false
            } else {
                true
            }
        })?;
        Ok(found)
    }

    fn tree_as_of(
        &self,
        identity: &ValueTreeIdentity,
        commit: &str,
    ) -> Result<Option<&ValueTree>, HistoryError> {
        Ok(self
            .reference_as_of(identity, commit)?
            .and_then(|reference| self.forest.get(&reference)))
    }

    /// Harvest the value under `reference`, stamping `head` as the head it
    /// was fetched against.
    pub fn harvest<T: Repositable>(
        &self,
        reference: &ValueTreeReference,
        head: &CommitIdentifier,
    ) -> Result<T, RepositoryError> {
        let stamped = self.forest.planted(reference.clone()).map(|tree| {
            let mut tree = tree.clone();
            tree.metadata.head_when_fetched = Some(head.clone());
            tree
        });
        Ok(ForestHarvester::harvest(&stamped)?)
    }

    pub fn fetch_value<T: Repositable>(
        &self,
        identity: &ValueTreeIdentity,
    ) -> Result<Option<T>, RepositoryError> {
        let head = match self.history.head() {
            Some(head) => head.clone(),
            None => return Ok(None),
        };
        let reference = match self.reference_as_of(identity, &head)? {
            Some(reference) => reference,
            None => return Ok(None),
        };
        match self.forest.get(&reference) {
            Some(tree) if !tree.metadata.is_deleted => Ok(Some(self.harvest(&reference, &head)?)),
            _ => Ok(None),
        }
    }

    fn repoint_children(
        &self,
        tree: &mut ValueTree,
        commit: &str,
        written: &HashSet<ValueTreeIdentity>,
        mode: Repoint<'_>,
    ) -> Result<(), HistoryError> {
        let mut targets = HashMap::new();
        for child in tree.child_references() {
            let target = if written.contains(&child.identity) {
                child.at(commit)
            } else {
                let resolved = match mode {
                    Repoint::KeepExisting(_) if self.forest.contains(&child) => Some(child.clone()),
                    Repoint::KeepExisting(from) | Repoint::VisibleFrom(from) => {
                        self.reference_as_of(&child.identity, from)?
                    }
                };
                resolved.unwrap_or_else(|| child.clone())
            };
            targets.insert(child, target);
        }
        tree.update_child_references(|child| {
            targets.get(child).cloned().unwrap_or_else(|| child.clone())
        });
        Ok(())
    }

    /// Copy of `tree` as written by `commit`.
    fn written_copy(
        &self,
        mut tree: ValueTree,
        commit: &Commit,
        written: &HashSet<ValueTreeIdentity>,
        mode: Repoint<'_>,
    ) -> Result<ValueTree, HistoryError> {
        tree.metadata.commit_identifier = Some(commit.identifier.clone());
        tree.metadata.head_when_fetched = None;
        self.repoint_children(&mut tree, &commit.identifier, written, mode)?;
        Ok(tree)
    }

    /// Current head, merging `commit` into it first when it forked a
    /// detached head.
    fn settle(
        &mut self,
        commit: &Commit,
        resolver: &dyn ConflictResolver,
    ) -> Result<CommitIdentifier, RepositoryError> {
        if self.history.head() == Some(&commit.identifier) {
            return Ok(commit.identifier.clone());
        }
        log::debug!("Commit {} forked a detached head, merging", commit.identifier);
        Ok(self.merge_head(&commit.identifier, resolver)?.identifier)
    }

    fn harvest_settled<T: Repositable>(
        &self,
        identity: &ValueTreeIdentity,
        head: &CommitIdentifier,
    ) -> Result<T, RepositoryError> {
        let reference = self.reference_as_of(identity, head)?.ok_or_else(|| {
            RepositoryError::MissingValueTree(ValueTreeReference::new(
                identity.clone(),
                Some(head.clone()),
            ))
        })?;
        self.harvest(&reference, head)
    }

    pub fn commit_value<T: Repositable>(
        &mut self,
        value: &mut T,
        resolver: &dyn ConflictResolver,
    ) -> Result<(), RepositoryError> {
        let planted = ForestPlanter::planted(&*value);
        let fetched_root = planted.root().clone();

        match value.metadata().head_when_fetched.clone() {
            Some(base) if self.forest.contains(&fetched_root) => {
                self.commit_update(value, &planted, &base, resolver)
            }
            _ => self.commit_new_value(value, &planted),
        }
    }

    fn commit_new_value<T: Repositable>(
        &mut self,
        value: &mut T,
        planted: &PlantedValueTree<Forest>,
    ) -> Result<(), RepositoryError> {
        let commit = self.history.commit_new_head(None)?;
        let written: HashSet<ValueTreeIdentity> =
            planted.references().map(|reference| reference.identity).collect();

        let mut copies = Vec::new();
        for path in planted.paths() {
            let tree = match path.last().and_then(|reference| planted.forest().get(reference)) {
                Some(tree) => tree.clone(),
                None => continue,
            };
            let mut copy = self.written_copy(
                tree,
                &commit,
                &written,
                Repoint::KeepExisting(&commit.identifier),
            )?;
            copy.metadata.ancestry = parent_identities(&path).collect();
            copy.metadata.timestamp = commit.timestamp;
            copies.push(copy);
        }
        for copy in copies {
            self.forest.update(copy);
        }

        log::debug!(
            "Committed new value {} at {}",
            planted.root().identity,
            commit.identifier
        );
        let root = planted.root().at(&commit.identifier);
        *value = self.harvest(&root, &commit.identifier)?;
        Ok(())
    }

    fn commit_update<T: Repositable>(
        &mut self,
        value: &mut T,
        planted: &PlantedValueTree<Forest>,
        base: &CommitIdentifier,
        resolver: &dyn ConflictResolver,
    ) -> Result<(), RepositoryError> {
        let identity = planted.root().identity.clone();
        let old_root = self
            .reference_as_of(&identity, base)?
            .unwrap_or_else(|| planted.root().clone());
        let root_ancestry = self
            .forest
            .get(&old_root)
            .map(|tree| tree.metadata.ancestry.clone())
            .unwrap_or_default();

        let old_tree = self.forest.planted(old_root.clone());
        let old_nodes: HashMap<ValueTreeIdentity, &ValueTree> = old_tree
            .trees()
            .map(|tree| (tree.identity(), tree))
            .collect();

        let mut new_nodes: Vec<(ValueTreePath, &ValueTree)> = Vec::new();
        let mut seen = HashSet::new();
        for path in planted.paths() {
            if let Some(tree) = path.last().and_then(|reference| planted.forest().get(reference)) {
                if seen.insert(tree.identity()) {
                    new_nodes.push((path, tree));
                }
            }
        }

        // Content edits; `changed` adds the ancestors that only repoint
        let mut modified: HashSet<ValueTreeIdentity> = HashSet::new();
        let mut changed: HashSet<ValueTreeIdentity> = HashSet::new();
        for (path, tree) in &new_nodes {
            let is_changed = match old_nodes.get(&tree.identity()) {
                None => true,
                Some(old) => !tree.is_equivalent(old),
            };
            if is_changed {
                modified.insert(tree.identity());
                changed.extend(path.iter().map(|reference| reference.identity.clone()));
            }
        }

        let mut orphaned: Vec<ValueTree> = old_nodes
            .iter()
            .filter(|(identity, _)| !seen.contains(*identity))
            .map(|(_, tree)| (*tree).clone())
            .collect();
        orphaned.sort_by_key(|tree| tree.identity());

        if changed.is_empty() && orphaned.is_empty() {
            log::debug!("Commit of {} is a no-op", identity);
            return Ok(());
        }

        let mut rewrites: Vec<ValueTree> = Vec::new();
        for (path, tree) in &new_nodes {
            if !changed.contains(&tree.identity()) {
                continue;
            }
            let mut tree = (*tree).clone();
            tree.metadata.ancestry = root_ancestry
                .iter()
                .cloned()
                .chain(parent_identities(path))
                .collect();
            if let Some(old) = old_nodes.get(&tree.identity()) {
                if !modified.contains(&tree.identity()) {
                    tree.metadata.timestamp = old.metadata.timestamp;
                }
            }
            rewrites.push(tree);
        }
        for mut tree in orphaned {
            tree.metadata.is_deleted = true;
            modified.insert(tree.identity());
            rewrites.push(tree);
        }
        for ancestor in &root_ancestry {
            if let Some(tree) = self.tree_as_of(ancestor, base)? {
                rewrites.push(tree.clone());
            }
        }

        let commit = self.history.commit_new_head(Some(base))?;
        let written: HashSet<ValueTreeIdentity> = rewrites.iter().map(ValueTree::identity).collect();
        let mut copies = Vec::with_capacity(rewrites.len());
        for tree in rewrites {
            let mut copy = self.written_copy(tree, &commit, &written, Repoint::KeepExisting(base))?;
            // repointing alone is not a write for last-write-wins
            if modified.contains(&copy.identity()) {
                copy.metadata.timestamp = commit.timestamp;
            }
            copies.push(copy);
        }
        for copy in copies {
            self.forest.update(copy);
        }
        log::debug!(
            "Committed {} value trees for {} at {}",
            written.len(),
            identity,
            commit.identifier
        );

        let head = self.settle(&commit, resolver)?;
        *value = self.harvest_settled(&identity, &head)?;
        Ok(())
    }

    pub fn delete_value<T: Repositable>(
        &mut self,
        value: &mut T,
        resolver: &dyn ConflictResolver,
    ) -> Result<(), RepositoryError> {
        self.commit_value(value, resolver)?;

        let identity = value.identity();
        let base = value.metadata().head_when_fetched.clone().ok_or_else(|| {
            RepositoryError::MissingValueTree(ValueTreeReference::new(identity.clone(), None))
        })?;
        let root = self.reference_as_of(&identity, &base)?.ok_or_else(|| {
            RepositoryError::MissingValueTree(ValueTreeReference::new(
                identity.clone(),
                Some(base.clone()),
            ))
        })?;

        let commit = self.history.commit_new_head(Some(&base))?;
        let subtree: Vec<ValueTree> = self.forest.planted(root.clone()).trees().cloned().collect();
        let written: HashSet<ValueTreeIdentity> = subtree.iter().map(ValueTree::identity).collect();
        let mut copies = Vec::with_capacity(subtree.len());
        for tree in subtree {
            copies.push(self.written_copy(tree, &commit, &written, Repoint::KeepExisting(&base))?);
        }
        for copy in copies {
            self.forest.update(copy);
        }
        self.forest
            .delete_subtree(&root.at(&commit.identifier), commit.timestamp);
        log::debug!(
            "Deleted {} ({} value trees) at {}",
            identity,
            written.len(),
            commit.identifier
        );

        let head = self.settle(&commit, resolver)?;
        *value = self.harvest_settled(&identity, &head)?;
        Ok(())
    }

    /// Merge a detached or remote head into the live head.
    ///
    /// Entities written on the other side since the common ancestor are
    /// compared with the local version: missing or unchanged-since-base
    /// local versions take theirs, diverged versions go through `resolver`.
    /// Every taken entity and its ancestors are written under the merge
    /// commit so that child references repoint to the merged versions.
    pub fn merge_head(
        &mut self,
        other: &CommitIdentifier,
        resolver: &dyn ConflictResolver,
    ) -> Result<Commit, RepositoryError> {
        let head = self
            .history
            .head()
            .cloned()
            .ok_or_else(|| HistoryError::MergeError {
                reason: "No local head".to_string(),
            })?;
        if !self.history.is_mergeable(other) {
            return Err(HistoryError::MergeError {
                reason: format!("{} is not a detached or remote head", other),
            }
            .into());
        }

        let base = self.history.greatest_common_ancestor(&head, other)?;
        let base_ancestors = match &base {
            Some(base) => self.history.ancestors(base)?,
            None => HashSet::new(),
        };
        let head_ancestors = self.history.ancestors(&head)?;
        let their_commits: HashSet<CommitIdentifier> = self
            .history
            .ancestors(other)?
            .difference(&head_ancestors)
            .cloned()
            .collect();

        let candidates: BTreeSet<ValueTreeIdentity> = self
            .forest
            .iter()
            .filter(|tree| {
                tree.metadata
                    .commit_identifier
                    .as_ref()
                    .map_or(false, |commit| their_commits.contains(commit))
            })
            .map(ValueTree::identity)
            .collect();

        let mut taken: BTreeMap<ValueTreeIdentity, ValueTree> = BTreeMap::new();
        let mut ancestry: BTreeSet<ValueTreeIdentity> = BTreeSet::new();
        for identity in &candidates {
            let theirs = match self.tree_as_of(identity, other)? {
                Some(theirs) => theirs,
                None => continue,
            };
            let mine = self.tree_as_of(identity, &head)?;
            let resolved = match mine {
                None => theirs.clone(),
                Some(mine) if mine.is_equivalent(theirs) => continue,
                Some(mine)
                    if mine
                        .metadata
                        .commit_identifier
                        .as_ref()
                        .map_or(false, |commit| base_ancestors.contains(commit)) =>
                {
                    theirs.clone()
                }
                Some(mine) => {
                    let resolved = resolver.resolve(mine, theirs);
                    if resolved.is_equivalent(mine) {
                        continue;
                    }
                    resolved
                }
            };

            ancestry.extend(resolved.metadata.ancestry.iter().cloned());
            if let Some(mine) = mine {
                ancestry.extend(mine.metadata.ancestry.iter().cloned());
            }
            taken.insert(identity.clone(), resolved);
        }

        for identity in ancestry {
            if taken.contains_key(&identity) {
                continue;
            }
            let tree = match self.tree_as_of(&identity, &head)? {
                Some(tree) => Some(tree),
                None => self.tree_as_of(&identity, other)?,
            };
            if let Some(tree) = tree {
                let tree = tree.clone();
                taken.insert(identity, tree);
            }
        }

        let commit = self.history.merge(other)?;
        let written: HashSet<ValueTreeIdentity> = taken.keys().cloned().collect();
        let mut copies = Vec::with_capacity(taken.len());
        for tree in taken.into_values() {
            copies.push(self.written_copy(
                tree,
                &commit,
                &written,
                Repoint::VisibleFrom(&commit.identifier),
            )?);
        }
        for copy in copies {
            self.forest.update(copy);
        }
        self.propagate_tombstones(&commit, &written)?;

        log::debug!(
            "Merged {} into {} as {} ({} value trees)",
            other,
            head,
            commit.identifier,
            written.len()
        );
        Ok(commit)
    }

    /// Tombstone everything still reachable below the nodes `commit` wrote
    /// as deleted.
    ///
    /// A merge can pair one side's deletion with children the other side
    /// added meanwhile. Reachable nodes are copied under `commit` first so
    /// older versions stay intact.
    fn propagate_tombstones(
        &mut self,
        commit: &Commit,
        written: &HashSet<ValueTreeIdentity>,
    ) -> Result<(), HistoryError> {
        let mut roots: Vec<(ValueTreeReference, DateTime<Utc>)> = written
            .iter()
            .map(|identity| identity.reference_at(&commit.identifier))
            .filter_map(|reference| {
                let tree = self.forest.get(&reference)?;
                tree.metadata
                    .is_deleted
                    .then(|| (reference.clone(), tree.metadata.timestamp))
            })
            .collect();
        if roots.is_empty() {
            return Ok(());
        }
        roots.sort();

        let mut subtree: Vec<ValueTree> = Vec::new();
        let mut reached: HashSet<ValueTreeIdentity> = HashSet::new();
        for (root, _) in &roots {
            let planted = self.forest.planted(root.clone());
            for tree in planted.trees() {
                if reached.insert(tree.identity()) {
                    subtree.push(tree.clone());
                }
            }
        }

        let rewritten: HashSet<ValueTreeIdentity> = written.union(&reached).cloned().collect();
        let mut copies = Vec::with_capacity(subtree.len());
        for tree in subtree {
            copies.push(self.written_copy(
                tree,
                commit,
                &rewritten,
                Repoint::VisibleFrom(&commit.identifier),
            )?);
        }
        for copy in copies {
            self.forest.update(copy);
        }
        for (root, timestamp) in &roots {
            self.forest.delete_subtree(root, *timestamp);
        }

        log::debug!(
            "Merge {} tombstoned {} value trees below deleted nodes",
            commit.identifier,
            reached.len()
        );
        Ok(())
    }

    /// Value trees written by this repository's own commits at or after
    /// `since`, oldest commit first, with the timestamp to resume from.
    pub fn changes_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> (Vec<ValueTree>, DateTime<Utc>) {
        let repository_identifier = self.history.repository_identifier();
        let commits: HashMap<&str, &Commit> = self
            .history
            .commits()
            .filter(|commit| commit.repository_identifier == repository_identifier)
            .filter(|commit| since.map_or(true, |since| commit.timestamp >= since))
            .map(|commit| (commit.identifier.as_str(), commit))
            .collect();

        let mut changes: Vec<(&Commit, &ValueTree)> = self
            .forest
            .iter()
            .filter_map(|tree| {
                let commit = commits.get(tree.metadata.commit_identifier.as_deref()?)?;
                Some((*commit, tree))
            })
            .collect();
        changes.sort_by_key(|(commit, tree)| {
            (commit.timestamp, commit.identifier.clone(), tree.identity())
        });

        let cursor = commits
            .values()
            .map(|commit| commit.timestamp)
            .max()
            .or(since)
            .unwrap_or_default();
        let trees = changes.into_iter().map(|(_, tree)| tree.clone()).collect();
        (trees, cursor)
    }

    /// Integrate value trees pushed by another repository.
    ///
    /// Trees equivalent to, or losing against, the local version are
    /// dropped; the rest are recorded under a remote head and merged.
    /// Returns the merge commit, or `None` when nothing was new.
    pub fn pull(
        &mut self,
        trees: Vec<ValueTree>,
        resolver: &dyn ConflictResolver,
    ) -> Result<Option<Commit>, RepositoryError> {
        if trees.is_empty() {
            return Ok(None);
        }

        let mut incoming: BTreeMap<ValueTreeIdentity, ValueTree> = BTreeMap::new();
        for tree in trees {
            match incoming.entry(tree.identity()) {
                Entry::Vacant(entry) => {
                    entry.insert(tree);
                }
                Entry::Occupied(mut entry) => {
                    let resolved = resolver.resolve(entry.get(), &tree);
                    entry.insert(resolved);
                }
            }
        }

        let head = match self.history.head() {
            Some(head) => head.clone(),
            None => self.history.commit_new_head(None)?.identifier,
        };

        let mut accepted: BTreeMap<ValueTreeIdentity, ValueTree> = BTreeMap::new();
        for (identity, theirs) in incoming {
            let keep = match self.tree_as_of(&identity, &head)? {
                None => true,
                Some(mine) => {
                    !mine.is_equivalent(&theirs)
                        && !resolver.resolve(mine, &theirs).is_equivalent(mine)
                }
            };
            if keep {
                accepted.insert(identity, theirs);
            }
        }
        if accepted.is_empty() {
            log::debug!("Pull into {} brought nothing new", self.history.repository_identifier());
            return Ok(None);
        }

        let remote = Commit::new(REMOTE_REPOSITORY_IDENTIFIER, None, Utc::now());
        self.history.record_remote_head(remote.clone())?;
        let written: HashSet<ValueTreeIdentity> = accepted.keys().cloned().collect();
        let mut copies = Vec::with_capacity(accepted.len());
        for tree in accepted.into_values() {
            copies.push(self.written_copy(tree, &remote, &written, Repoint::KeepExisting(&head))?);
        }
        for copy in copies {
            self.forest.update(copy);
        }

        let merge = self.merge_head(&remote.identifier, resolver)?;
        Ok(Some(merge))
    }

    /// Check that every stored tree belongs to a known commit.
    pub fn validate(&self) -> Result<(), RepositoryError> {
        self.history
            .validate()
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;
        for tree in self.forest.iter() {
            match &tree.metadata.commit_identifier {
                Some(commit) if self.history.fetch_commit(commit).is_some() => {}
                _ => {
                    return Err(RepositoryError::Corrupt(format!(
                        "value tree {} has no known commit",
                        tree.reference()
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Identities above the last node of a path, root first.
fn parent_identities(path: &ValueTreePath) -> impl Iterator<Item = ValueTreeIdentity> + '_ {
    path[..path.len().saturating_sub(1)]
        .iter()
        .map(|reference| reference.identity.clone())
}
