use super::{Shared, Stash, StashContext, StashKind};
use crate::filtering::FilterChain;
use crate::model::Model;
use crate::primitives::now_millis;
use crate::types::{DataError, FieldValue, ModelId};
use parking_lot::RwLock;
use std::sync::Arc;

/// Pass-through stash: holds nothing, every call reaches the persister.
pub struct NoStash<T: Model> {
    ctx: StashContext<T>,
}

impl<T: Model> NoStash<T> {
    pub fn new(ctx: StashContext<T>) -> Result<Self, DataError> {
        ctx.validate()?;
        ctx.filter_cache.init_bucket(&ctx.bucket);
        Ok(Self { ctx })
    }

    fn persister_chain(&self) -> Result<FilterChain<T>, DataError> {
        self.ctx.persister.filter_chain(&self.ctx.bucket)
    }
}

impl<T: Model> Stash<T> for NoStash<T> {
    fn bucket(&self) -> &str {
        &self.ctx.bucket
    }

    fn kind(&self) -> StashKind {
        StashKind::NoStash
    }

    fn key_fields(&self) -> Vec<String> {
        self.ctx.key_names(false)
    }

    fn unique_fields(&self) -> Vec<String> {
        self.ctx.key_names(true)
    }

    fn sync(&self, _item: &T) -> Result<bool, DataError> {
        Ok(false)
    }

    fn detach(&self, item: &T) -> T {
        item.clone()
    }

    fn save(&self, item: &mut T) -> Result<(), DataError> {
        item.set_bucket(&self.ctx.bucket);
        item.set_last_modified_millis(now_millis());
        if item.id().is_none() {
            item.set_id(self.ctx.tickets.next_id()?);
        }
        self.ctx.persister.persist(item)?;
        self.ctx.filter_cache.clear_bucket(&self.ctx.bucket);
        Ok(())
    }

    fn hard_delete(&self, item: &T) -> Result<(), DataError> {
        self.ctx.persister.hard_delete(item)?;
        self.ctx.filter_cache.clear_bucket(&self.ctx.bucket);
        Ok(())
    }

    fn load_all(&self) -> Result<(), DataError> {
        Ok(())
    }

    fn load_item(&self, _item: T) -> Result<bool, DataError> {
        Ok(false)
    }

    fn load_for_id(&self, _id: ModelId) -> Result<bool, DataError> {
        Ok(false)
    }

    fn unload(&self, _id: ModelId) -> bool {
        false
    }

    fn items(&self) -> Result<Vec<T>, DataError> {
        Err(DataError::Usage(format!(
            "items() is not available for bucket {} without a stash; use a filter chain",
            self.ctx.bucket
        )))
    }

    fn reset(&self) -> Result<(), DataError> {
        self.ctx.filter_cache.clear_bucket(&self.ctx.bucket);
        Ok(())
    }

    fn on_pre_read(&self) {}

    fn reload_if_newer(&self, item: &T) -> Result<T, DataError> {
        Ok(self
            .ctx
            .persister
            .reload_if_newer(item)?
            .unwrap_or_else(|| item.clone()))
    }

    fn for_id(&self, id: ModelId) -> Result<Option<T>, DataError> {
        self.ctx.persister.fetch_one(id)
    }

    fn original_for_id(&self, id: ModelId) -> Result<Option<Shared<T>>, DataError> {
        Ok(self
            .ctx
            .persister
            .fetch_one(id)?
            .map(|item| Arc::new(RwLock::new(item))))
    }

    fn for_unique_key(&self, key: &str, value: &FieldValue) -> Result<Option<T>, DataError> {
        let field = self.ctx.unique_key(key)?;
        let chain = self.persister_chain()?.include_deleted();
        let chain = if field.case_insensitive {
            chain.filter_ignore_case(key, value.clone())
        } else {
            chain.filter(key, value.clone())
        };
        Ok(chain.first())
    }

    fn list_for_key(&self, key: &str, value: &FieldValue) -> Result<Vec<T>, DataError> {
        Ok(self.filter_by_key(key, value)?.include_deleted().all())
    }

    fn count_for_key(&self, key: &str, value: &FieldValue) -> Result<usize, DataError> {
        Ok(self.filter_by_key(key, value)?.include_deleted().count())
    }

    fn filter_chain(&self) -> Result<FilterChain<T>, DataError> {
        let cache = Arc::clone(&self.ctx.filter_cache);
        let generation = cache.generation(self.bucket());
        Ok(self.persister_chain()?.with_cache_at(cache, generation))
    }

    fn filter_by_key(&self, key: &str, value: &FieldValue) -> Result<FilterChain<T>, DataError> {
        self.ctx.plain_key(key)?;
        Ok(self.filter_chain()?.filter(key, value.clone()))
    }

    fn in_memory_count(&self) -> usize {
        0
    }
}
