//! # Persisters
//!
//! A persister owns the storage medium of one bucket. Stashes call it for
//! every read they cannot answer from memory and for every write.
//!
//! Implementations:
//! - `MemoryPersister`: in-process map, counts its fetches
//! - `JsonFilePersister` / `TomlFilePersister`: one `<id>.<ext>` file per
//!   entity, with an optional folder watcher
//! - `RedbPersister` (in `storage`): rows in an embedded redb database

mod file;
mod memory;

pub use file::{FileFormat, FilePersister, JsonFilePersister, JsonFormat, TomlFilePersister, TomlFormat};
pub use memory::MemoryPersister;

use crate::filtering::FilterChain;
use crate::model::Model;
use crate::stash::Stash;
use crate::types::{DataError, FieldValue, ModelId};
use std::collections::BTreeMap;
use std::sync::Weak;

/// What a persister learns about its bucket when the registry wires it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersisterContext {
    pub bucket: String,
    pub writable: bool,
}

/// Storage-medium abstraction for one bucket.
pub trait Persister<T: Model>: Send + Sync {
    /// Called once by the registry before the stash loads.
    fn init(&self, _context: &PersisterContext) -> Result<(), DataError> {
        Ok(())
    }

    fn fetch_all(&self) -> Result<Vec<T>, DataError>;

    /// The `limit` most recently modified entities, newest first.
    fn fetch_recent(&self, limit: usize) -> Result<Vec<T>, DataError> {
        let mut items = self.fetch_all()?;
        items.sort_by(|a, b| b.last_modified_millis().cmp(&a.last_modified_millis()));
        items.truncate(limit);
        Ok(items)
    }

    fn fetch_one(&self, id: ModelId) -> Result<Option<T>, DataError>;

    /// Write the whole entity. The entity always carries an id.
    fn persist(&self, item: &T) -> Result<(), DataError>;

    /// Write an existing entity whose `changed` fields differ from the stored copy.
    fn update(&self, item: &T, _changed: &BTreeMap<String, FieldValue>) -> Result<(), DataError> {
        self.persist(item)
    }

    fn hard_delete(&self, item: &T) -> Result<(), DataError>;

    /// Start feeding external changes into `stash`. The persister must not
    /// keep the stash alive.
    fn attach_watcher(&self, _stash: Weak<dyn Stash<T>>) -> Result<(), DataError> {
        Ok(())
    }

    fn stop_watcher(&self) {}

    fn is_watching(&self) -> bool {
        false
    }

    /// Invoked before every stash read.
    fn on_pre_read(&self) {}

    /// A fresher stored copy of `item`, if the medium holds one.
    fn reload_if_newer(&self, _item: &T) -> Result<Option<T>, DataError> {
        Ok(None)
    }

    /// The persister's own query path. The default filters `fetch_all` in memory.
    fn filter_chain(&self, bucket: &str) -> Result<FilterChain<T>, DataError> {
        Ok(FilterChain::new(bucket, self.fetch_all()?))
    }

    fn is_db_backed(&self) -> bool {
        false
    }
}
