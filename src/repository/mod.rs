//! Monolithic repository
//!
//! A repository owns one forest and one history behind a single lock and
//! implements the commit/fetch/delete cycle on top of them. Values carry
//! the head they were fetched against, so a commit based on an outdated
//! head is detected as version skew: it forks a detached head which is then
//! merged back with the repository's conflict resolver.

mod persistence;
mod state;

pub use persistence::{ForestSerializer, JsonForestSerializer};

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::RepositoryConfig;
use crate::conflict::{ConflictResolver, LastWriteWins};
use crate::forest::Forest;
use crate::history::{Commit, History, HistoryError};
use crate::repositable::{HarvestError, Repositable};
use crate::tree::{CommitIdentifier, ValueTree, ValueTreeIdentity, ValueTreeReference};

use persistence::RepositorySnapshot;
use state::RepositoryState;

/// Repository identifier recorded on commits that hold pulled value trees.
///
/// Such commits are never pushed back out.
pub const REMOTE_REPOSITORY_IDENTIFIER: &str = "remote";

/// Errors related to repository operations
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Harvest error: {0}")]
    Harvest(#[from] HarvestError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Missing value tree: {0}")]
    MissingValueTree(ValueTreeReference),

    #[error("Repository lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Corrupt repository state: {0}")]
    Corrupt(String),
}

/// Read/write access to repositable values.
pub trait LocalRepository {
    /// The value visible at the current head, or `None` if it never
    /// existed or has been deleted.
    fn fetch_value<T: Repositable>(&self, identifier: &str) -> Result<Option<T>, RepositoryError>;

    /// Store `value` and everything it contains. On return `value` reflects
    /// the stored state and the head it can be committed against next.
    fn commit<T: Repositable>(&self, value: &mut T) -> Result<(), RepositoryError>;

    /// Commit pending edits, then tombstone `value` and its whole subtree.
    fn delete<T: Repositable>(&self, value: &mut T) -> Result<(), RepositoryError>;
}

/// A repository holding all of its state in memory.
pub struct MonolithicRepository {
    unique_identifier: String,
    state: Mutex<RepositoryState>,
    resolver: Box<dyn ConflictResolver>,
    store_path: Option<PathBuf>,
}

impl MonolithicRepository {
    /// Empty repository resolving conflicts with [`LastWriteWins`]
    pub fn new(unique_identifier: impl Into<String>) -> Self {
        Self::with_resolver(unique_identifier, LastWriteWins)
    }

    pub fn with_resolver(
        unique_identifier: impl Into<String>,
        resolver: impl ConflictResolver + 'static,
    ) -> Self {
        let unique_identifier = unique_identifier.into();
        Self {
            state: Mutex::new(RepositoryState::new(&unique_identifier)),
            unique_identifier,
            resolver: Box::new(resolver),
            store_path: None,
        }
    }

    /// Open a repository as configured.
    ///
    /// An existing snapshot at `store_path` is loaded; otherwise the
    /// repository starts empty, named by `identifier` or a fresh UUID.
    pub fn open(config: &RepositoryConfig) -> Result<Self, RepositoryError> {
        let mut repository = match &config.store_path {
            Some(path) if path.exists() => Self::load_json(path)?,
            _ => Self::new(
                config
                    .identifier
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ),
        };

        if let Some(identifier) = &config.identifier {
            if identifier != &repository.unique_identifier {
                return Err(RepositoryError::Corrupt(format!(
                    "store holds repository {}, expected {}",
                    repository.unique_identifier, identifier
                )));
            }
        }
        repository.store_path = config.store_path.clone();
        Ok(repository)
    }

    pub fn unique_identifier(&self) -> &str {
        &self.unique_identifier
    }

    fn lock(&self) -> Result<MutexGuard<'_, RepositoryState>, RepositoryError> {
        self.state.lock().map_err(|_| RepositoryError::LockPoisoned)
    }

    pub fn head(&self) -> Result<Option<CommitIdentifier>, RepositoryError> {
        Ok(self.lock()?.history.head().cloned())
    }

    /// Snapshot of the commit history
    pub fn history(&self) -> Result<History, RepositoryError> {
        Ok(self.lock()?.history.clone())
    }

    /// Snapshot of every stored value tree
    pub fn forest(&self) -> Result<Forest, RepositoryError> {
        Ok(self.lock()?.forest.clone())
    }

    /// The tree of an entity visible at the current head, tombstones
    /// included.
    pub fn value_tree(
        &self,
        identity: &ValueTreeIdentity,
    ) -> Result<Option<ValueTree>, RepositoryError> {
        let state = self.lock()?;
        let head = match state.history.head() {
            Some(head) => head.clone(),
            None => return Ok(None),
        };
        Ok(state
            .reference_as_of(identity, &head)?
            .and_then(|reference| state.forest.get(&reference).cloned()))
    }

    /// Merge a detached or remote head into the live head.
    pub fn merge_head(&self, other: &CommitIdentifier) -> Result<Commit, RepositoryError> {
        self.lock()?.merge_head(other, self.resolver.as_ref())
    }

    /// Value trees this repository wrote at or after `since`, and the
    /// timestamp to continue from.
    pub fn changes_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<(Vec<ValueTree>, DateTime<Utc>), RepositoryError> {
        Ok(self.lock()?.changes_since(since))
    }

    /// Integrate value trees from another repository, returning the merge
    /// commit if anything changed.
    pub fn pull_trees(&self, trees: Vec<ValueTree>) -> Result<Option<Commit>, RepositoryError> {
        self.lock()?.pull(trees, self.resolver.as_ref())
    }

    /// Write a JSON snapshot of the whole repository.
    pub fn save_json(&self, path: &Path) -> Result<(), RepositoryError> {
        let snapshot = {
            let state = self.lock()?;
            RepositorySnapshot {
                unique_identifier: self.unique_identifier.clone(),
                forest: state.forest.clone(),
                history: state.history.clone(),
            }
        };
        persistence::write_json(path, &snapshot)
    }

    /// Load a repository from a JSON snapshot.
    ///
    /// Malformed or inconsistent snapshots are rejected as a whole.
    pub fn load_json(path: &Path) -> Result<Self, RepositoryError> {
        let snapshot: RepositorySnapshot = persistence::read_json(path)?;
        if snapshot.history.repository_identifier() != snapshot.unique_identifier {
            return Err(RepositoryError::Corrupt(format!(
                "history belongs to {}, not {}",
                snapshot.history.repository_identifier(),
                snapshot.unique_identifier
            )));
        }
        let state = RepositoryState {
            forest: snapshot.forest,
            history: snapshot.history,
        };
        state.validate()?;

        let mut repository = Self::new(snapshot.unique_identifier);
        repository.state = Mutex::new(state);
        Ok(repository)
    }

    /// Save to the configured store path, if any.
    pub fn persist(&self) -> Result<(), RepositoryError> {
        match &self.store_path {
            Some(path) => self.save_json(path),
            None => Ok(()),
        }
    }

    /// Write every stored value tree with `serializer`.
    pub fn export_forest<S: ForestSerializer>(
        &self,
        serializer: &S,
        path: &Path,
    ) -> Result<(), RepositoryError> {
        let forest = self.forest()?;
        serializer.save(&forest, path)
    }
}

impl LocalRepository for MonolithicRepository {
    fn fetch_value<T: Repositable>(&self, identifier: &str) -> Result<Option<T>, RepositoryError> {
        let identity = ValueTreeIdentity::new(identifier, T::REPOSITED_TYPE);
        self.lock()?.fetch_value(&identity)
    }

    fn commit<T: Repositable>(&self, value: &mut T) -> Result<(), RepositoryError> {
        self.lock()?.commit_value(value, self.resolver.as_ref())
    }

    fn delete<T: Repositable>(&self, value: &mut T) -> Result<(), RepositoryError> {
        self.lock()?.delete_value(value, self.resolver.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositable::fixtures::{Person, Pet};
    use crate::tree::{Primitive, Property};

    fn make_family() -> Person {
        let mut ada = Person::new("Ada", 36);
        ada.pets = vec![Pet::new("Rex"), Pet::new("Tom")];
        ada.best_friend = Some(Box::new(Person::new("Charles", 40)));
        ada
    }

    fn commit_count(repository: &MonolithicRepository) -> usize {
        repository.history().unwrap().len()
    }

    #[test]
    fn test_commit_new_value_and_fetch() {
        let repository = MonolithicRepository::new("repo");
        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();

        let head = repository.head().unwrap().unwrap();
        assert_eq!(ada.metadata.commit_identifier.as_ref(), Some(&head));
        assert_eq!(ada.metadata.head_when_fetched.as_ref(), Some(&head));
        assert_eq!(ada.pets[0].metadata.head_when_fetched.as_ref(), Some(&head));

        let fetched: Person = repository
            .fetch_value(&ada.metadata.unique_identifier)
            .unwrap()
            .unwrap();
        assert_eq!(fetched.name, "Ada");
        assert_eq!(fetched.pet_names(), vec!["Rex", "Tom"]);
        assert_eq!(fetched.best_friend.unwrap().name, "Charles");
        assert_eq!(repository.forest().unwrap().len(), 4);
    }

    #[test]
    fn test_ancestry_recorded_on_commit() {
        let repository = MonolithicRepository::new("repo");
        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();

        assert!(ada.metadata.ancestry.is_empty());
        assert_eq!(ada.pets[1].metadata.ancestry, vec![ada.identity()]);
    }

    #[test]
    fn test_fetch_unknown_value() {
        let repository = MonolithicRepository::new("repo");
        assert!(repository.fetch_value::<Person>("nobody").unwrap().is_none());

        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();
        assert!(repository.fetch_value::<Person>("nobody").unwrap().is_none());
        // same identifier, different type
        assert!(repository
            .fetch_value::<Pet>(&ada.metadata.unique_identifier)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unmodified_commit_is_a_no_op() {
        let repository = MonolithicRepository::new("repo");
        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();
        let forest = repository.forest().unwrap();
        let commits = commit_count(&repository);

        let mut fetched: Person = repository
            .fetch_value(&ada.metadata.unique_identifier)
            .unwrap()
            .unwrap();
        let before = fetched.metadata.clone();
        repository.commit(&mut fetched).unwrap();

        assert_eq!(commit_count(&repository), commits);
        assert_eq!(repository.forest().unwrap(), forest);
        assert_eq!(fetched.metadata, before);
    }

    #[test]
    fn test_update_rewrites_changed_path_only() {
        let repository = MonolithicRepository::new("repo");
        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();
        let first = repository.head().unwrap().unwrap();

        ada.pets[0].name = "Rexy".to_string();
        repository.commit(&mut ada).unwrap();
        let second = repository.head().unwrap().unwrap();

        assert_ne!(first, second);
        assert_eq!(ada.metadata.commit_identifier.as_ref(), Some(&second));
        assert_eq!(ada.pets[0].metadata.commit_identifier.as_ref(), Some(&second));
        assert_eq!(ada.pets[1].metadata.commit_identifier.as_ref(), Some(&first));
        assert_eq!(
            ada.best_friend.as_ref().unwrap().metadata.commit_identifier.as_ref(),
            Some(&first)
        );
        assert_eq!(ada.pets[0].name, "Rexy");
        // 4 original trees plus rewritten root and pet
        assert_eq!(repository.forest().unwrap().len(), 6);
    }

    #[test]
    fn test_fast_forward_never_consults_resolver() {
        struct Panicking;
        impl ConflictResolver for Panicking {
            fn resolve(&self, _mine: &ValueTree, _theirs: &ValueTree) -> ValueTree {
                panic!("resolver called on a fast-forward commit");
            }
        }

        let repository = MonolithicRepository::with_resolver("repo", Panicking);
        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();
        for age in 37..40 {
            ada.age = age;
            repository.commit(&mut ada).unwrap();
        }
        let fetched: Person = repository
            .fetch_value(&ada.metadata.unique_identifier)
            .unwrap()
            .unwrap();
        assert_eq!(fetched.age, 39);
        assert!(repository.history().unwrap().detached_heads().is_empty());
    }

    #[test]
    fn test_removed_child_is_tombstoned() {
        let repository = MonolithicRepository::new("repo");
        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();
        let tom = ada.pets.pop().unwrap();

        repository.commit(&mut ada).unwrap();
        assert_eq!(ada.pet_names(), vec!["Rex"]);
        assert!(repository
            .fetch_value::<Pet>(&tom.metadata.unique_identifier)
            .unwrap()
            .is_none());

        let tombstone = repository.value_tree(&tom.identity()).unwrap().unwrap();
        assert!(tombstone.metadata.is_deleted);
        assert_eq!(tombstone.metadata.commit_identifier, repository.head().unwrap());
    }

    #[test]
    fn test_added_child_gets_ancestry() {
        let repository = MonolithicRepository::new("repo");
        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();

        ada.pets.push(Pet::new("Kit"));
        repository.commit(&mut ada).unwrap();
        assert_eq!(ada.pet_names(), vec!["Rex", "Tom", "Kit"]);
        assert_eq!(ada.pets[2].metadata.ancestry, vec![ada.identity()]);
        assert_eq!(ada.pets[2].metadata.commit_identifier, repository.head().unwrap());
    }

    #[test]
    fn test_committing_nested_value_repoints_parent() {
        let repository = MonolithicRepository::new("repo");
        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();

        let mut rex: Pet = repository
            .fetch_value(&ada.pets[0].metadata.unique_identifier)
            .unwrap()
            .unwrap();
        rex.name = "Rexford".to_string();
        repository.commit(&mut rex).unwrap();

        let fetched: Person = repository
            .fetch_value(&ada.metadata.unique_identifier)
            .unwrap()
            .unwrap();
        assert_eq!(fetched.pet_names(), vec!["Rexford", "Tom"]);
        assert_eq!(fetched.metadata.commit_identifier, repository.head().unwrap());
    }

    #[test]
    fn test_stale_commit_forks_and_merges() {
        let repository = MonolithicRepository::new("repo");
        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();

        let mut stale: Person = repository
            .fetch_value(&ada.metadata.unique_identifier)
            .unwrap()
            .unwrap();

        ada.pets[0].name = "Rexy".to_string();
        repository.commit(&mut ada).unwrap();

        stale.age = 99;
        repository.commit(&mut stale).unwrap();

        let history = repository.history().unwrap();
        assert!(history.detached_heads().is_empty());
        let head = history.fetch_commit(history.head().unwrap()).unwrap();
        assert!(head.is_merge());

        let fetched: Person = repository
            .fetch_value(&ada.metadata.unique_identifier)
            .unwrap()
            .unwrap();
        assert_eq!(fetched.pet_names(), vec!["Rexy", "Tom"]);
        assert_eq!(stale.metadata.head_when_fetched, repository.head().unwrap());
    }

    #[test]
    fn test_delete_tombstones_whole_subtree() {
        let repository = MonolithicRepository::new("repo");
        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();

        ada.nickname = Some("Countess".to_string());
        repository.delete(&mut ada).unwrap();

        assert!(ada.metadata.is_deleted);
        assert!(ada.pets.iter().all(|pet| pet.metadata.is_deleted));
        assert_eq!(ada.nickname.as_deref(), Some("Countess"));

        assert!(repository
            .fetch_value::<Person>(&ada.metadata.unique_identifier)
            .unwrap()
            .is_none());
        for pet in &ada.pets {
            assert!(repository
                .fetch_value::<Pet>(&pet.metadata.unique_identifier)
                .unwrap()
                .is_none());
        }
        let friend = ada.best_friend.as_ref().unwrap();
        assert!(repository
            .fetch_value::<Person>(&friend.metadata.unique_identifier)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_delete_keeps_previous_versions() {
        let repository = MonolithicRepository::new("repo");
        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();
        let first = ada.metadata.commit_identifier.clone().unwrap();

        repository.delete(&mut ada).unwrap();
        let forest = repository.forest().unwrap();
        let original = forest.get(&ada.identity().reference_at(first)).unwrap();
        assert!(!original.metadata.is_deleted);
    }

    #[test]
    fn test_merge_head_rejects_unknown_heads() {
        let repository = MonolithicRepository::new("repo");
        assert!(matches!(
            repository.merge_head(&"nope".to_string()),
            Err(RepositoryError::History(HistoryError::MergeError { .. }))
        ));
    }

    #[test]
    fn test_changes_since_and_pull_between_repositories() {
        let a = MonolithicRepository::new("a");
        let b = MonolithicRepository::new("b");
        let mut ada = make_family();
        a.commit(&mut ada).unwrap();

        let (trees, cursor) = a.changes_since(None).unwrap();
        assert_eq!(trees.len(), 4);
        assert!(b.pull_trees(trees.clone()).unwrap().is_some());
        // redelivery is a no-op
        let commits = commit_count(&b);
        assert!(b.pull_trees(trees).unwrap().is_none());
        assert_eq!(commit_count(&b), commits);

        let fetched: Person = b.fetch_value(&ada.metadata.unique_identifier).unwrap().unwrap();
        assert_eq!(fetched.pet_names(), vec!["Rex", "Tom"]);

        // only b's own commits are pushed, never the remote head holding the pulled trees
        let history = b.history().unwrap();
        let (outgoing, _) = b.changes_since(None).unwrap();
        assert_eq!(outgoing.len(), 4);
        assert!(outgoing.iter().all(|tree| {
            let commit = tree.metadata.commit_identifier.as_ref().unwrap();
            history.fetch_commit(commit).unwrap().repository_identifier == "b"
        }));

        let (again, next) = a.changes_since(Some(cursor)).unwrap();
        assert_eq!(next, cursor);
        assert_eq!(again.len(), 4);
    }

    #[test]
    fn test_pull_resolves_conflicts_last_write_wins() {
        let a = MonolithicRepository::new("a");
        let b = MonolithicRepository::new("b");
        let mut ada = make_family();
        a.commit(&mut ada).unwrap();
        let (trees, _) = a.changes_since(None).unwrap();
        b.pull_trees(trees).unwrap();

        let mut on_b: Person = b.fetch_value(&ada.metadata.unique_identifier).unwrap().unwrap();
        ada.age = 50;
        a.commit(&mut ada).unwrap();
        on_b.age = 60;
        b.commit(&mut on_b).unwrap();

        let (from_a, _) = a.changes_since(None).unwrap();
        let (from_b, _) = b.changes_since(None).unwrap();
        b.pull_trees(from_a).unwrap();
        a.pull_trees(from_b).unwrap();

        for repository in [&a, &b] {
            let fetched: Person = repository
                .fetch_value(&ada.metadata.unique_identifier)
                .unwrap()
                .unwrap();
            assert_eq!(fetched.age, 60);
        }
    }

    #[test]
    fn test_pull_rewrites_parent_of_changed_child() {
        let a = MonolithicRepository::new("a");
        let b = MonolithicRepository::new("b");
        let mut ada = make_family();
        a.commit(&mut ada).unwrap();
        let (trees, cursor) = a.changes_since(None).unwrap();
        b.pull_trees(trees).unwrap();

        ada.pets[1].name = "Thomas".to_string();
        a.commit(&mut ada).unwrap();
        let (trees, _) = a.changes_since(Some(cursor)).unwrap();
        b.pull_trees(trees).unwrap();

        let fetched: Person = b.fetch_value(&ada.metadata.unique_identifier).unwrap().unwrap();
        assert_eq!(fetched.pet_names(), vec!["Rex", "Thomas"]);
    }

    #[test]
    fn test_type_mismatch_in_store_surfaces_as_error() {
        let repository = MonolithicRepository::new("repo");
        let mut ada = make_family();
        repository.commit(&mut ada).unwrap();

        {
            let mut state = repository.lock().unwrap();
            let reference = ada
                .identity()
                .reference_at(ada.metadata.commit_identifier.clone().unwrap());
            let mut tree = state.forest.get(&reference).unwrap().clone();
            tree.set("age", Property::Primitive(Primitive::Bool(true)));
            state.forest.update(tree);
        }

        let result = repository.fetch_value::<Person>(&ada.metadata.unique_identifier);
        assert!(matches!(
            result,
            Err(RepositoryError::Harvest(HarvestError::TypeMismatch { .. }))
        ));
    }
}
