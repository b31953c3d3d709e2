//! # redb-backed Persister
//!
//! Buckets stored in a single embedded redb database, providing:
//! - ACID transactions per write
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! ## Layout
//!
//! Each bucket owns three tables:
//! - `<bucket>.rows`: id -> postcard-encoded entity
//! - `<bucket>.row_updated_at`: id -> last write in millis
//! - `<bucket>.recent`: (updated_at, id) -> (), ordered for `fetch_recent`
//!
//! A shared `metadata` table holds registry-wide counters such as the
//! persisted ticket sequence.

use crate::model::Model;
use crate::persister::{Persister, PersisterContext};
use crate::primitives::now_millis;
use crate::tickets::Tickets;
use crate::types::{DataError, ModelId};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_TICKET: &str = "next_ticket";

// =============================================================================
// STORE
// =============================================================================

/// One redb database file shared by every redb-backed bucket of a registry.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DataError::Io(e.to_string()))?;
        }
        let db = Database::create(&path).map_err(|e| DataError::Io(e.to_string()))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| DataError::Io(e.to_string()))?;
        let _ = write_txn
            .open_table(METADATA)
            .map_err(|e| DataError::Io(e.to_string()))?;
        write_txn
            .commit()
            .map_err(|e| DataError::Io(e.to_string()))?;

        debug!(path = %path.display(), "opened redb store");
        Ok(Self { db, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// PERSISTER
// =============================================================================

/// Rows of one bucket inside a shared [`RedbStore`].
pub struct RedbPersister<T> {
    store: Arc<RedbStore>,
    rows_table: String,
    updated_table: String,
    recent_table: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for RedbPersister<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbPersister")
            .field("store", &self.store.path)
            .field("rows_table", &self.rows_table)
            .finish_non_exhaustive()
    }
}

impl<T: Model + Serialize + DeserializeOwned> RedbPersister<T> {
    #[must_use]
    pub fn new(store: Arc<RedbStore>, bucket: &str) -> Self {
        Self {
            store,
            rows_table: format!("{}.rows", bucket),
            updated_table: format!("{}.row_updated_at", bucket),
            recent_table: format!("{}.recent", bucket),
            _marker: PhantomData,
        }
    }

    fn rows(&self) -> TableDefinition<'_, u64, &'static [u8]> {
        TableDefinition::new(&self.rows_table)
    }

    fn updated(&self) -> TableDefinition<'_, u64, u64> {
        TableDefinition::new(&self.updated_table)
    }

    fn recent(&self) -> TableDefinition<'_, (u64, u64), ()> {
        TableDefinition::new(&self.recent_table)
    }

    /// Number of stored rows.
    pub fn row_count(&self) -> Result<u64, DataError> {
        let read_txn = self
            .store
            .db
            .begin_read()
            .map_err(|e| DataError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(self.rows())
            .map_err(|e| DataError::Io(e.to_string()))?;
        table.len().map_err(|e| DataError::Io(e.to_string()))
    }

    fn decode(&self, bytes: &[u8], updated_at: Option<u64>) -> Result<T, DataError> {
        let mut item: T =
            postcard::from_bytes(bytes).map_err(|e| DataError::Serialization(e.to_string()))?;
        if let Some(millis) = updated_at {
            item.set_last_modified_millis(millis);
        }
        Ok(item)
    }

    fn fetch_ids(&self, ids: &[u64]) -> Result<Vec<T>, DataError> {
        let read_txn = self
            .store
            .db
            .begin_read()
            .map_err(|e| DataError::Io(e.to_string()))?;
        let rows = read_txn
            .open_table(self.rows())
            .map_err(|e| DataError::Io(e.to_string()))?;
        let updated = read_txn
            .open_table(self.updated())
            .map_err(|e| DataError::Io(e.to_string()))?;

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(data) = rows.get(*id).map_err(|e| DataError::Io(e.to_string()))? else {
                continue;
            };
            let updated_at = updated
                .get(*id)
                .map_err(|e| DataError::Io(e.to_string()))?
                .map(|v| v.value());
            items.push(self.decode(data.value(), updated_at)?);
        }
        Ok(items)
    }
}

impl<T: Model + Serialize + DeserializeOwned> Persister<T> for RedbPersister<T> {
    fn init(&self, context: &PersisterContext) -> Result<(), DataError> {
        let write_txn = self
            .store
            .db
            .begin_write()
            .map_err(|e| DataError::Io(e.to_string()))?;
        let _ = write_txn
            .open_table(self.rows())
            .map_err(|e| DataError::Io(e.to_string()))?;
        let _ = write_txn
            .open_table(self.updated())
            .map_err(|e| DataError::Io(e.to_string()))?;
        let _ = write_txn
            .open_table(self.recent())
            .map_err(|e| DataError::Io(e.to_string()))?;
        write_txn
            .commit()
            .map_err(|e| DataError::Io(e.to_string()))?;
        debug!(bucket = %context.bucket, "redb tables ready");
        Ok(())
    }

    fn fetch_all(&self) -> Result<Vec<T>, DataError> {
        let read_txn = self
            .store
            .db
            .begin_read()
            .map_err(|e| DataError::Io(e.to_string()))?;
        let rows = read_txn
            .open_table(self.rows())
            .map_err(|e| DataError::Io(e.to_string()))?;
        let updated = read_txn
            .open_table(self.updated())
            .map_err(|e| DataError::Io(e.to_string()))?;

        let mut items = Vec::new();
        for entry in rows.iter().map_err(|e| DataError::Io(e.to_string()))? {
            let (key, value) = entry.map_err(|e| DataError::Io(e.to_string()))?;
            let updated_at = updated
                .get(key.value())
                .map_err(|e| DataError::Io(e.to_string()))?
                .map(|v| v.value());
            items.push(self.decode(value.value(), updated_at)?);
        }
        Ok(items)
    }

    fn fetch_recent(&self, limit: usize) -> Result<Vec<T>, DataError> {
        let ids: Vec<u64> = {
            let read_txn = self
                .store
                .db
                .begin_read()
                .map_err(|e| DataError::Io(e.to_string()))?;
            let recent = read_txn
                .open_table(self.recent())
                .map_err(|e| DataError::Io(e.to_string()))?;
            let mut ids = Vec::new();
            for entry in recent
                .iter()
                .map_err(|e| DataError::Io(e.to_string()))?
                .rev()
                .take(limit)
            {
                let (key, _) = entry.map_err(|e| DataError::Io(e.to_string()))?;
                let (_updated_at, id) = key.value();
                ids.push(id);
            }
            ids
        };
        self.fetch_ids(&ids)
    }

    fn fetch_one(&self, id: ModelId) -> Result<Option<T>, DataError> {
        Ok(self.fetch_ids(&[id.0])?.into_iter().next())
    }

    fn persist(&self, item: &T) -> Result<(), DataError> {
        let id = item
            .id()
            .ok_or_else(|| DataError::Usage("cannot persist an item without an id".to_string()))?;
        let bytes =
            postcard::to_allocvec(item).map_err(|e| DataError::Serialization(e.to_string()))?;
        let updated_at = match item.last_modified_millis() {
            0 => now_millis(),
            millis => millis,
        };

        let write_txn = self
            .store
            .db
            .begin_write()
            .map_err(|e| DataError::Io(e.to_string()))?;
        {
            let mut rows = write_txn
                .open_table(self.rows())
                .map_err(|e| DataError::Io(e.to_string()))?;
            let mut updated = write_txn
                .open_table(self.updated())
                .map_err(|e| DataError::Io(e.to_string()))?;
            let mut recent = write_txn
                .open_table(self.recent())
                .map_err(|e| DataError::Io(e.to_string()))?;

            let previous = updated
                .insert(id.0, updated_at)
                .map_err(|e| DataError::Io(e.to_string()))?
                .map(|v| v.value());
            if let Some(previous) = previous {
                recent
                    .remove((previous, id.0))
                    .map_err(|e| DataError::Io(e.to_string()))?;
            }
            recent
                .insert((updated_at, id.0), ())
                .map_err(|e| DataError::Io(e.to_string()))?;
            rows.insert(id.0, bytes.as_slice())
                .map_err(|e| DataError::Io(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| DataError::Io(e.to_string()))?;
        Ok(())
    }

    fn hard_delete(&self, item: &T) -> Result<(), DataError> {
        let Some(id) = item.id() else {
            return Ok(());
        };
        let write_txn = self
            .store
            .db
            .begin_write()
            .map_err(|e| DataError::Io(e.to_string()))?;
        {
            let mut rows = write_txn
                .open_table(self.rows())
                .map_err(|e| DataError::Io(e.to_string()))?;
            let mut updated = write_txn
                .open_table(self.updated())
                .map_err(|e| DataError::Io(e.to_string()))?;
            let mut recent = write_txn
                .open_table(self.recent())
                .map_err(|e| DataError::Io(e.to_string()))?;

            rows.remove(id.0)
                .map_err(|e| DataError::Io(e.to_string()))?;
            let previous = updated
                .remove(id.0)
                .map_err(|e| DataError::Io(e.to_string()))?
                .map(|v| v.value());
            if let Some(previous) = previous {
                recent
                    .remove((previous, id.0))
                    .map_err(|e| DataError::Io(e.to_string()))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| DataError::Io(e.to_string()))?;
        Ok(())
    }

    fn reload_if_newer(&self, item: &T) -> Result<Option<T>, DataError> {
        let Some(id) = item.id() else {
            return Ok(None);
        };
        let stored_at = {
            let read_txn = self
                .store
                .db
                .begin_read()
                .map_err(|e| DataError::Io(e.to_string()))?;
            let updated = read_txn
                .open_table(self.updated())
                .map_err(|e| DataError::Io(e.to_string()))?;
            updated
                .get(id.0)
                .map_err(|e| DataError::Io(e.to_string()))?
                .map(|v| v.value())
        };
        match stored_at {
            Some(millis) if millis > item.last_modified_millis() => self.fetch_one(id),
            _ => Ok(None),
        }
    }

    fn is_db_backed(&self) -> bool {
        true
    }
}

// =============================================================================
// TICKETS
// =============================================================================

/// A ticket sequence persisted in the store's metadata table.
#[derive(Debug)]
pub struct RedbTickets {
    store: Arc<RedbStore>,
}

impl RedbTickets {
    #[must_use]
    pub fn new(store: Arc<RedbStore>) -> Self {
        Self { store }
    }
}

impl Tickets for RedbTickets {
    fn next_id(&self) -> Result<ModelId, DataError> {
        let write_txn = self
            .store
            .db
            .begin_write()
            .map_err(|e| DataError::Io(e.to_string()))?;
        let ticket = {
            let mut table = write_txn
                .open_table(METADATA)
                .map_err(|e| DataError::Io(e.to_string()))?;
            let ticket = table
                .get(NEXT_TICKET)
                .map_err(|e| DataError::Io(e.to_string()))?
                .map(|v| v.value())
                .unwrap_or(1);
            table
                .insert(NEXT_TICKET, ticket.saturating_add(1))
                .map_err(|e| DataError::Io(e.to_string()))?;
            ticket
        };
        write_txn
            .commit()
            .map_err(|e| DataError::Io(e.to_string()))?;
        Ok(ModelId(ticket))
    }
}
