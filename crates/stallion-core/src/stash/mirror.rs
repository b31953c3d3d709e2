use super::index::MemoryIndex;
use super::{Shared, StashContext};
use crate::model::{Model, changed_values, clone_into};
use crate::primitives::now_millis;
use crate::types::{DataError, FieldValue, ModelId};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{trace, warn};

/// In-memory originals plus their indexes, shared by the local-memory and
/// partial stashes.
///
/// Lock order is always index first, then the original.
pub(crate) struct Mirror<T: Model> {
    pub(crate) ctx: StashContext<T>,
    index: RwLock<MemoryIndex<T>>,
}

impl<T: Model> Mirror<T> {
    pub(crate) fn new(ctx: StashContext<T>, with_keys: bool) -> Result<Self, DataError> {
        ctx.validate()?;
        ctx.filter_cache.init_bucket(&ctx.bucket);
        let index = MemoryIndex::new(&ctx.keys, with_keys);
        Ok(Self {
            ctx,
            index: RwLock::new(index),
        })
    }

    pub(crate) fn bucket(&self) -> &str {
        &self.ctx.bucket
    }

    pub(crate) fn len(&self) -> usize {
        self.index.read().len()
    }

    pub(crate) fn contains(&self, id: ModelId) -> bool {
        self.index.read().get(id).is_some()
    }

    pub(crate) fn original(&self, id: ModelId) -> Option<Shared<T>> {
        self.index.read().get(id).cloned()
    }

    pub(crate) fn get_clone(&self, id: ModelId) -> Option<T> {
        let index = self.index.read();
        index.get(id).map(|original| original.read().clone())
    }

    pub(crate) fn clones(&self) -> Vec<T> {
        let index = self.index.read();
        index.ordered().map(|original| original.read().clone()).collect()
    }

    pub(crate) fn clones_of(&self, ids: &[ModelId]) -> Vec<T> {
        let index = self.index.read();
        ids.iter()
            .filter_map(|id| index.get(*id))
            .map(|original| original.read().clone())
            .collect()
    }

    pub(crate) fn key_ids(&self, key: &str, value: &FieldValue) -> Result<Vec<ModelId>, DataError> {
        self.index.read().key_ids(key, value)
    }

    pub(crate) fn unique_clone(&self, key: &str, value: &FieldValue) -> Result<Option<T>, DataError> {
        let index = self.index.read();
        let Some(id) = index.unique_id(key, value)? else {
            return Ok(None);
        };
        Ok(index.get(id).map(|original| original.read().clone()))
    }

    pub(crate) fn detach(&self, item: &T) -> T {
        item.id()
            .and_then(|id| self.get_clone(id))
            .unwrap_or_else(|| item.clone())
    }

    pub(crate) fn clear(&self) {
        let mut index = self.index.write();
        let fresh = index.emptied();
        *index = fresh;
    }

    pub(crate) fn invalidate(&self) {
        self.ctx.filter_cache.clear_bucket(&self.ctx.bucket);
    }

    // =========================================================================
    // LOADING
    // =========================================================================

    /// Merge a stored copy into its original, or register it fresh.
    ///
    /// The post-load hook runs on the incoming copy before any lock is taken,
    /// so hooks may read the stash.
    pub(crate) fn load_item(&self, mut item: T) -> Result<bool, DataError> {
        let Some(id) = item.id() else {
            warn!(bucket = %self.ctx.bucket, "skipping loaded item without an id");
            return Ok(false);
        };
        item.set_bucket(&self.ctx.bucket);
        self.ctx.hooks.on_post_load_item(&mut item);

        let mut index = self.index.write();
        if let Some(original) = index.get(id).cloned() {
            let mut current = original.write();
            index.unindex(id, &current);
            let merged = clone_into(&item, &mut current, false);
            index.index(id, &current);
            let changed = !merged?.is_empty();
            if changed {
                trace!(bucket = %self.ctx.bucket, %id, "merged loaded item");
            }
            return Ok(changed);
        }

        let original = Arc::new(RwLock::new(item));
        {
            let current = original.read();
            index.index(id, &current);
        }
        index.register(id, original);
        trace!(bucket = %self.ctx.bucket, %id, "registered loaded item");
        Ok(true)
    }

    pub(crate) fn sync(&self, item: &T) -> Result<bool, DataError> {
        let Some(id) = item.id() else {
            return Ok(false);
        };
        let mut index = self.index.write();
        let Some(original) = index.get(id).cloned() else {
            return Ok(false);
        };
        let mut current = original.write();
        index.unindex(id, &current);
        let merged = clone_into(item, &mut current, false);
        index.index(id, &current);
        Ok(!merged?.is_empty())
    }

    pub(crate) fn unload(&self, id: ModelId) -> bool {
        let removed = self.index.write().remove(id).is_some();
        if removed {
            self.invalidate();
        }
        removed
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Save through memory: update the original if one exists, else insert.
    pub(crate) fn save(&self, item: &mut T) -> Result<(), DataError> {
        item.set_bucket(&self.ctx.bucket);
        item.set_last_modified_millis(now_millis());
        match item.id().and_then(|id| self.original(id)) {
            Some(original) => self.update_existing(item, &original)?,
            None => self.insert_new(item)?,
        }
        self.invalidate();
        Ok(())
    }

    /// Save an entity that exists in storage but not in memory, then promote it.
    pub(crate) fn save_cold(&self, item: &mut T, stored: &T) -> Result<(), DataError> {
        item.set_bucket(&self.ctx.bucket);
        item.set_last_modified_millis(now_millis());
        let changes = changed_values(item, stored);
        self.ctx.persister.update(item, &changes)?;
        self.load_item(item.clone())?;
        self.invalidate();
        Ok(())
    }

    fn insert_new(&self, item: &mut T) -> Result<(), DataError> {
        let id = match item.id() {
            Some(id) => id,
            None => {
                let id = self.ctx.tickets.next_id()?;
                item.set_id(id);
                item.set_new_insert(true);
                id
            }
        };

        // Phase 1: check and pre-register atomically.
        let original = Arc::new(RwLock::new(item.clone()));
        {
            let mut index = self.index.write();
            if let Some(raced) = index.get(id).cloned() {
                drop(index);
                item.set_new_insert(false);
                return self.update_existing(item, &raced);
            }
            index.pre_register(id, Arc::clone(&original));
        }

        // Phase 2: persist without holding the index.
        let snapshot = original.read().clone();
        if let Err(e) = self.ctx.persister.persist(&snapshot) {
            self.index.write().rollback(id, &original);
            item.set_new_insert(false);
            return Err(e);
        }

        // Phase 3: register and index.
        let registered = {
            let mut index = self.index.write();
            let mut current = original.write();
            current.set_new_insert(false);
            index.index(id, &current);
            let registered = current.clone();
            drop(current);
            index.register(id, original);
            registered
        };
        item.set_new_insert(false);
        trace!(bucket = %self.ctx.bucket, %id, "inserted");

        // A save that merged into the pending original may have reached
        // storage before our snapshot did.
        let missed = changed_values(&registered, &snapshot);
        if !missed.is_empty() {
            trace!(bucket = %self.ctx.bucket, %id, changed = missed.len(), "re-persisting raced insert");
            self.ctx.persister.update(&registered, &missed)?;
        }
        Ok(())
    }

    fn update_existing(&self, item: &T, original: &Shared<T>) -> Result<(), DataError> {
        let Some(id) = item.id() else {
            return Err(DataError::Usage("cannot update an item without an id".to_string()));
        };
        let (snapshot, changes) = {
            let mut index = self.index.write();
            let mut current = original.write();
            let changes = changed_values(item, &current);
            index.unindex(id, &current);
            let merged = clone_into(item, &mut current, true);
            index.index(id, &current);
            merged?;
            (current.clone(), changes)
        };
        self.ctx.persister.update(&snapshot, &changes)?;
        trace!(bucket = %self.ctx.bucket, %id, changed = changes.len(), "updated");
        Ok(())
    }

    pub(crate) fn hard_delete(&self, item: &T) -> Result<(), DataError> {
        self.ctx.persister.hard_delete(item)?;
        if let Some(id) = item.id() {
            let removed = self.index.write().remove(id);
            if let Some(original) = removed {
                let mut current = original.write();
                clone_into(item, &mut current, false)?;
                current.set_deleted(true);
            }
        }
        self.invalidate();
        Ok(())
    }
}
