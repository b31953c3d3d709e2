//! # Stashes
//!
//! A stash sits between a controller and a persister and decides how much of
//! a bucket lives in memory:
//! - `NoStash`: nothing, every call reaches the persister
//! - `LocalMemoryStash`: the whole bucket, with key and unique-key indexes
//! - `PartialStash`: the most recently modified entities, promoted on miss
//!
//! ## Ownership
//!
//! Exactly one original exists per `(bucket, id)`. Originals are shared as
//! `Arc<RwLock<T>>` so merges preserve identity; callers only ever receive
//! detached clones. Index state sits behind one lock per stash and is never
//! held across persister I/O.

mod index;
mod local_memory;
mod mirror;
mod no_stash;
mod partial;

pub use local_memory::LocalMemoryStash;
pub use no_stash::NoStash;
pub use partial::PartialStash;

use crate::controller::ModelHooks;
use crate::filtering::{FilterCache, FilterChain};
use crate::model::{KeyField, Model};
use crate::persister::Persister;
use crate::tickets::Tickets;
use crate::types::{DataError, FieldValue, ModelId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A live in-memory original.
pub type Shared<T> = Arc<RwLock<T>>;

/// Which stash implementation a bucket uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum StashKind {
    #[serde(rename = "none")]
    NoStash,
    #[default]
    #[serde(rename = "memory")]
    LocalMemory,
    #[serde(rename = "partial")]
    Partial,
}

impl fmt::Display for StashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStash => f.write_str("none"),
            Self::LocalMemory => f.write_str("memory"),
            Self::Partial => f.write_str("partial"),
        }
    }
}

/// Everything a stash needs from its registration.
#[derive(Clone)]
pub struct StashContext<T: Model> {
    pub bucket: String,
    pub persister: Arc<dyn Persister<T>>,
    pub hooks: Arc<dyn ModelHooks<T>>,
    pub tickets: Arc<dyn Tickets>,
    pub filter_cache: Arc<FilterCache>,
    pub keys: Vec<KeyField>,
    /// Skip the boot load. Memory-backed lookups then only see entities
    /// saved or loaded since; persister-backed queries are unaffected.
    pub lightweight_mode: bool,
}

impl<T: Model> StashContext<T> {
    fn validate(&self) -> Result<(), DataError> {
        if self.bucket.trim().is_empty() {
            return Err(DataError::Config(
                "a stash cannot be created for an empty bucket name".to_string(),
            ));
        }
        Ok(())
    }

    fn key_names(&self, unique: bool) -> Vec<String> {
        self.keys
            .iter()
            .filter(|k| k.unique == unique)
            .map(|k| k.name.clone())
            .collect()
    }

    fn unique_key(&self, name: &str) -> Result<&KeyField, DataError> {
        self.keys
            .iter()
            .find(|k| k.unique && k.name == name)
            .ok_or_else(|| {
                DataError::Config(format!(
                    "no unique key named {} on bucket {}",
                    name, self.bucket
                ))
            })
    }

    fn plain_key(&self, name: &str) -> Result<&KeyField, DataError> {
        self.keys
            .iter()
            .find(|k| !k.unique && k.name == name)
            .ok_or_else(|| {
                DataError::Config(format!("no key named {} on bucket {}", name, self.bucket))
            })
    }
}

/// The in-memory caching and synchronization layer of one bucket.
pub trait Stash<T: Model>: Send + Sync {
    fn bucket(&self) -> &str;

    fn kind(&self) -> StashKind;

    fn key_fields(&self) -> Vec<String>;

    fn unique_fields(&self) -> Vec<String>;

    /// Merge the non-null values of `item` into its original. Returns whether anything changed.
    fn sync(&self, item: &T) -> Result<bool, DataError>;

    /// A clone of the current original of `item`, or of `item` itself.
    fn detach(&self, item: &T) -> T;

    /// Insert or update. On insert the assigned id is written back into `item`.
    fn save(&self, item: &mut T) -> Result<(), DataError>;

    fn hard_delete(&self, item: &T) -> Result<(), DataError>;

    fn load_all(&self) -> Result<(), DataError>;

    /// Merge a stored copy into memory. Returns whether anything changed.
    fn load_item(&self, item: T) -> Result<bool, DataError>;

    fn load_for_id(&self, id: ModelId) -> Result<bool, DataError>;

    /// Drop an entity from memory after it vanished from storage.
    fn unload(&self, id: ModelId) -> bool;

    /// Every entity in memory, in load order.
    fn items(&self) -> Result<Vec<T>, DataError>;

    fn reset(&self) -> Result<(), DataError>;

    fn on_pre_read(&self);

    /// The freshest known copy of `item`, reloading it when storage is newer.
    fn reload_if_newer(&self, item: &T) -> Result<T, DataError>;

    fn for_id(&self, id: ModelId) -> Result<Option<T>, DataError>;

    fn original_for_id(&self, id: ModelId) -> Result<Option<Shared<T>>, DataError>;

    fn for_unique_key(&self, key: &str, value: &FieldValue) -> Result<Option<T>, DataError>;

    fn list_for_key(&self, key: &str, value: &FieldValue) -> Result<Vec<T>, DataError>;

    fn count_for_key(&self, key: &str, value: &FieldValue) -> Result<usize, DataError>;

    fn filter_chain(&self) -> Result<FilterChain<T>, DataError>;

    /// A chain over an explicit subset. Not cached: the subset is not part of the key.
    fn filter_chain_of(&self, subset: Vec<T>) -> FilterChain<T> {
        FilterChain::new(self.bucket(), subset)
    }

    fn filter_by_key(&self, key: &str, value: &FieldValue) -> Result<FilterChain<T>, DataError>;

    /// Number of originals currently held in memory.
    fn in_memory_count(&self) -> usize;
}
