//! Value trees
//!
//! A value tree is the flattened snapshot of one repositable value at one
//! version. Nested values are not embedded; they appear as references to
//! other value trees, so a whole object graph becomes a flat set of trees
//! that a [`Forest`](crate::forest::Forest) can store side by side.

mod metadata;
mod property;

pub use metadata::Metadata;
pub use property::{Primitive, Property};

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Identifier of a commit in a repository history
pub type CommitIdentifier = String;

/// Identifies a logical entity across all of its versions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueTreeIdentity {
    pub unique_identifier: String,
    pub reposited_type: String,
}

impl ValueTreeIdentity {
    pub fn new(unique_identifier: impl Into<String>, reposited_type: impl Into<String>) -> Self {
        Self {
            unique_identifier: unique_identifier.into(),
            reposited_type: reposited_type.into(),
        }
    }

    /// Reference to this entity's version written by `commit_identifier`
    pub fn reference_at(&self, commit_identifier: impl Into<CommitIdentifier>) -> ValueTreeReference {
        ValueTreeReference::new(self.clone(), Some(commit_identifier.into()))
    }
}

impl fmt::Display for ValueTreeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.reposited_type, self.unique_identifier)
    }
}

/// Addresses one version of an entity.
///
/// A reference without a commit identifier addresses an uncommitted,
/// in-memory version.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueTreeReference {
    pub identity: ValueTreeIdentity,
    pub commit_identifier: Option<CommitIdentifier>,
}

impl ValueTreeReference {
    pub fn new(identity: ValueTreeIdentity, commit_identifier: Option<CommitIdentifier>) -> Self {
        Self {
            identity,
            commit_identifier,
        }
    }

    /// The same entity at another version
    pub fn at(&self, commit_identifier: impl Into<CommitIdentifier>) -> Self {
        Self {
            identity: self.identity.clone(),
            commit_identifier: Some(commit_identifier.into()),
        }
    }
}

impl fmt::Display for ValueTreeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.commit_identifier {
            Some(commit) => write!(f, "{}@{}", self.identity, commit),
            None => write!(f, "{}@uncommitted", self.identity),
        }
    }
}

/// Chain of references from a root to a node, root first.
pub type ValueTreePath = Vec<ValueTreeReference>;

/// Flattened snapshot of a single value.
///
/// Properties keep the order in which they were written, which is the order
/// traversals visit children in. Equality ignores that order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueTree {
    pub reposited_type: String,
    pub metadata: Metadata,
    pub properties_by_name: IndexMap<String, Property>,
}

impl ValueTree {
    pub fn new(reposited_type: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            reposited_type: reposited_type.into(),
            metadata,
            properties_by_name: IndexMap::new(),
        }
    }

    pub fn identity(&self) -> ValueTreeIdentity {
        ValueTreeIdentity::new(
            self.metadata.unique_identifier.clone(),
            self.reposited_type.clone(),
        )
    }

    /// Reference under which this tree is stored in a forest
    pub fn reference(&self) -> ValueTreeReference {
        ValueTreeReference::new(self.identity(), self.metadata.commit_identifier.clone())
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties_by_name.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, property: Property) {
        self.properties_by_name.insert(name.into(), property);
    }

    /// All child references in property order.
    pub fn child_references(&self) -> Vec<ValueTreeReference> {
        self.properties_by_name
            .values()
            .flat_map(|property| property.references().iter().cloned())
            .collect()
    }

    /// Rewrite every child reference in place.
    pub fn update_child_references<F>(&mut self, mut transform: F)
    where
        F: FnMut(&ValueTreeReference) -> ValueTreeReference,
    {
        for property in self.properties_by_name.values_mut() {
            property.update_references(&mut transform);
        }
    }

    /// Same content, ignoring version bookkeeping.
    ///
    /// Compares type, identity, deletion and properties, with child
    /// references compared by identity only. Timestamps, commit identifiers
    /// and ancestry are not considered.
    pub fn is_equivalent(&self, other: &ValueTree) -> bool {
        self.reposited_type == other.reposited_type
            && self.metadata.unique_identifier == other.metadata.unique_identifier
            && self.metadata.is_deleted == other.metadata.is_deleted
            && self.properties_by_name.len() == other.properties_by_name.len()
            && self.properties_by_name.iter().all(|(name, property)| {
                other
                    .properties_by_name
                    .get(name)
                    .map_or(false, |theirs| property.is_equivalent(theirs))
            })
    }
}
