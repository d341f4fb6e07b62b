//! Impeller - local-first value-tree repositories
//!
//! Application values implement [`Repositable`] and are flattened into
//! value trees, stored side by side in a [`Forest`] and versioned by a
//! commit [`History`]. A [`MonolithicRepository`] ties both together, and an
//! [`Exchange`] keeps several repositories in sync with cursor-based
//! push/pull rounds.

pub mod config;
pub mod conflict;
pub mod exchange;
pub mod forest;
pub mod history;
pub mod repositable;
pub mod repository;
pub mod tree;

pub use config::{ExchangeConfig, RepositoryConfig};
pub use conflict::{ConflictResolver, LastWriteWins};
pub use exchange::{Cursor, Exchangable, Exchange, ExchangeError};
pub use forest::{Forest, PlantedValueTree};
pub use history::{Commit, History, HistoryError};
pub use repositable::{HarvestError, PropertyReader, PropertyWriter, Repositable};
pub use repository::{LocalRepository, MonolithicRepository, RepositoryError};
pub use tree::{Metadata, ValueTree, ValueTreeIdentity, ValueTreeReference};
