use super::mirror::Mirror;
use super::{Shared, Stash, StashContext, StashKind};
use crate::filtering::FilterChain;
use crate::model::Model;
use crate::types::{DataError, FieldValue, ModelId};
use std::sync::Arc;
use tracing::debug;

/// Full mirror of a bucket with primary, key and unique-key indexes.
pub struct LocalMemoryStash<T: Model> {
    mirror: Mirror<T>,
}

impl<T: Model> LocalMemoryStash<T> {
    /// Fails with `Config` when the bucket name is empty.
    pub fn new(ctx: StashContext<T>) -> Result<Self, DataError> {
        Ok(Self {
            mirror: Mirror::new(ctx, true)?,
        })
    }
}

impl<T: Model> Stash<T> for LocalMemoryStash<T> {
    fn bucket(&self) -> &str {
        self.mirror.bucket()
    }

    fn kind(&self) -> StashKind {
        StashKind::LocalMemory
    }

    fn key_fields(&self) -> Vec<String> {
        self.mirror.ctx.key_names(false)
    }

    fn unique_fields(&self) -> Vec<String> {
        self.mirror.ctx.key_names(true)
    }

    fn sync(&self, item: &T) -> Result<bool, DataError> {
        self.mirror.sync(item)
    }

    fn detach(&self, item: &T) -> T {
        self.mirror.detach(item)
    }

    fn save(&self, item: &mut T) -> Result<(), DataError> {
        self.mirror.save(item)
    }

    fn hard_delete(&self, item: &T) -> Result<(), DataError> {
        self.mirror.hard_delete(item)
    }

    fn load_all(&self) -> Result<(), DataError> {
        if self.mirror.ctx.lightweight_mode {
            debug!(bucket = self.bucket(), "lightweight mode, skipping load_all");
            return Ok(());
        }
        let items = self.mirror.ctx.persister.fetch_all()?;
        let fetched = items.len();
        for item in items {
            self.mirror.load_item(item)?;
        }
        debug!(bucket = self.bucket(), fetched, "loaded bucket");
        Ok(())
    }

    fn load_item(&self, item: T) -> Result<bool, DataError> {
        let changed = self.mirror.load_item(item)?;
        if changed {
            self.mirror.invalidate();
        }
        Ok(changed)
    }

    fn load_for_id(&self, id: ModelId) -> Result<bool, DataError> {
        match self.mirror.ctx.persister.fetch_one(id)? {
            Some(item) => self.load_item(item),
            None => Ok(false),
        }
    }

    fn unload(&self, id: ModelId) -> bool {
        self.mirror.unload(id)
    }

    fn items(&self) -> Result<Vec<T>, DataError> {
        self.on_pre_read();
        Ok(self.mirror.clones())
    }

    fn reset(&self) -> Result<(), DataError> {
        self.mirror.clear();
        self.load_all()?;
        self.mirror.invalidate();
        Ok(())
    }

    fn on_pre_read(&self) {
        self.mirror.ctx.persister.on_pre_read();
    }

    fn reload_if_newer(&self, item: &T) -> Result<T, DataError> {
        if let Some(fresh) = self.mirror.ctx.persister.reload_if_newer(item)? {
            self.load_item(fresh)?;
        }
        Ok(self.mirror.detach(item))
    }

    fn for_id(&self, id: ModelId) -> Result<Option<T>, DataError> {
        self.on_pre_read();
        Ok(self.mirror.get_clone(id))
    }

    fn original_for_id(&self, id: ModelId) -> Result<Option<Shared<T>>, DataError> {
        Ok(self.mirror.original(id))
    }

    fn for_unique_key(&self, key: &str, value: &FieldValue) -> Result<Option<T>, DataError> {
        self.on_pre_read();
        self.mirror.unique_clone(key, value)
    }

    fn list_for_key(&self, key: &str, value: &FieldValue) -> Result<Vec<T>, DataError> {
        self.on_pre_read();
        let ids = self.mirror.key_ids(key, value)?;
        Ok(self.mirror.clones_of(&ids))
    }

    fn count_for_key(&self, key: &str, value: &FieldValue) -> Result<usize, DataError> {
        Ok(self.mirror.key_ids(key, value)?.len())
    }

    fn filter_chain(&self) -> Result<FilterChain<T>, DataError> {
        self.on_pre_read();
        let cache = Arc::clone(&self.mirror.ctx.filter_cache);
        let generation = cache.generation(self.bucket());
        Ok(FilterChain::new(self.bucket(), self.mirror.clones()).with_cache_at(cache, generation))
    }

    fn filter_by_key(&self, key: &str, value: &FieldValue) -> Result<FilterChain<T>, DataError> {
        self.on_pre_read();
        let ids = self.mirror.key_ids(key, value)?;
        Ok(self.filter_chain_of(self.mirror.clones_of(&ids)))
    }

    fn in_memory_count(&self) -> usize {
        self.mirror.len()
    }
}
