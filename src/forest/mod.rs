//! Multi-version value tree store
//!
//! A forest maps every versioned reference to its snapshot. It is a flat
//! key/value store: structure only exists through the references recorded in
//! each tree's properties, and all structural logic lives in callers.

mod planted;

pub use planted::{ForestRanger, PlantedValueTree};

use std::borrow::Borrow;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tree::{ValueTree, ValueTreeIdentity, ValueTreeReference};

/// Mapping from versioned reference to value tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ValueTree>", into = "Vec<ValueTree>")]
pub struct Forest {
    trees: HashMap<ValueTreeReference, ValueTree>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference: &ValueTreeReference) -> Option<&ValueTree> {
        self.trees.get(reference)
    }

    pub fn contains(&self, reference: &ValueTreeReference) -> bool {
        self.trees.contains_key(reference)
    }

    /// Insert or overwrite a tree under its own reference.
    pub fn update(&mut self, tree: ValueTree) {
        self.trees.insert(tree.reference(), tree);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValueTree> {
        self.trees.values()
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Every stored version of an entity
    pub fn versions_of<'a>(
        &'a self,
        identity: &'a ValueTreeIdentity,
    ) -> impl Iterator<Item = &'a ValueTree> + 'a {
        self.trees
            .iter()
            .filter(move |(reference, _)| &reference.identity == identity)
            .map(|(_, tree)| tree)
    }

    /// Rooted view over this forest
    pub fn planted(&self, root: ValueTreeReference) -> PlantedValueTree<&Forest> {
        PlantedValueTree::new(self, root)
    }

    /// Tombstone every node reachable from `root`.
    ///
    /// Entries are marked deleted in place and stamped with `timestamp`;
    /// nothing is removed.
    pub fn delete_subtree(&mut self, root: &ValueTreeReference, timestamp: DateTime<Utc>) {
        let reachable: Vec<ValueTreeReference> = self.planted(root.clone()).references().collect();
        for reference in reachable {
            if let Some(tree) = self.trees.get_mut(&reference) {
                tree.metadata.is_deleted = true;
                tree.metadata.timestamp = timestamp;
            }
        }
    }

    /// Copy every node of a rooted view into this forest.
    pub fn insert_subtree<F: Borrow<Forest>>(&mut self, planted: &PlantedValueTree<F>) {
        for reference in planted.references() {
            if let Some(tree) = planted.forest().get(&reference) {
                self.update(tree.clone());
            }
        }
    }
}

impl From<Vec<ValueTree>> for Forest {
    fn from(trees: Vec<ValueTree>) -> Self {
        let mut forest = Forest::new();
        for tree in trees {
            forest.update(tree);
        }
        forest
    }
}

impl From<Forest> for Vec<ValueTree> {
    fn from(forest: Forest) -> Self {
        let mut trees: Vec<ValueTree> = forest.trees.into_values().collect();
        trees.sort_by_key(|tree| tree.reference());
        trees
    }
}

impl FromIterator<ValueTree> for Forest {
    fn from_iter<I: IntoIterator<Item = ValueTree>>(iter: I) -> Self {
        let mut forest = Forest::new();
        for tree in iter {
            forest.update(tree);
        }
        forest
    }
}
