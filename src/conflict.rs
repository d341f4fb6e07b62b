//! Conflict resolution between diverged versions of one entity

use crate::tree::ValueTree;

/// Policy deciding the merged version of two diverged value trees.
///
/// Called during synchronization and head merges, never by ordinary commits
/// on a single line of history. Implementations must be deterministic and
/// symmetric so that peers resolving the same pair in either order agree.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, mine: &ValueTree, theirs: &ValueTree) -> ValueTree;
}

/// Keeps the version with the latest timestamp.
///
/// Equal timestamps are ordered by commit identifier. Deletion is sticky: if
/// either side is a tombstone the result is one too.
#[derive(Clone, Copy, Debug, Default)]
pub struct LastWriteWins;

impl ConflictResolver for LastWriteWins {
    fn resolve(&self, mine: &ValueTree, theirs: &ValueTree) -> ValueTree {
        let mine_key = (&mine.metadata.timestamp, &mine.metadata.commit_identifier);
        let theirs_key = (&theirs.metadata.timestamp, &theirs.metadata.commit_identifier);

        let mut resolved = if theirs_key > mine_key {
            theirs.clone()
        } else {
            mine.clone()
        };
        resolved.metadata.is_deleted = mine.metadata.is_deleted || theirs.metadata.is_deleted;
        resolved
    }
}
