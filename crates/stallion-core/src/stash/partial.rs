use super::mirror::Mirror;
use super::{Shared, Stash, StashContext, StashKind};
use crate::filtering::FilterChain;
use crate::model::Model;
use crate::primitives::DEFAULT_PARTIAL_LIMIT;
use crate::types::{DataError, FieldValue, ModelId};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};

/// Bounded mirror of the most recently modified entities of a bucket.
///
/// Primary-key and unique-key misses fall through to the persister and
/// promote the result into memory. Key-field queries always go to the
/// persister. Nothing is evicted.
pub struct PartialStash<T: Model> {
    mirror: Mirror<T>,
    limit: usize,
}

impl<T: Model> PartialStash<T> {
    pub fn new(ctx: StashContext<T>) -> Result<Self, DataError> {
        Self::with_limit(ctx, DEFAULT_PARTIAL_LIMIT)
    }

    pub fn with_limit(ctx: StashContext<T>, limit: usize) -> Result<Self, DataError> {
        Ok(Self {
            mirror: Mirror::new(ctx, false)?,
            limit,
        })
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn persister_chain(&self) -> Result<FilterChain<T>, DataError> {
        self.mirror.ctx.persister.filter_chain(self.bucket())
    }

    fn promote(&self, item: T) -> Result<Option<T>, DataError> {
        let Some(id) = item.id() else {
            return Ok(Some(item));
        };
        self.mirror.load_item(item.clone())?;
        trace!(bucket = self.bucket(), %id, "promoted");
        Ok(self.mirror.get_clone(id).or(Some(item)))
    }
}

impl<T: Model> Stash<T> for PartialStash<T> {
    fn bucket(&self) -> &str {
        self.mirror.bucket()
    }

    fn kind(&self) -> StashKind {
        StashKind::Partial
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
        if let Some(id) = item.id() {
            if !self.mirror.contains(id) {
                if let Some(stored) = self.mirror.ctx.persister.fetch_one(id)? {
                    return self.mirror.save_cold(item, &stored);
                }
            }
        }
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
        let items = self.mirror.ctx.persister.fetch_recent(self.limit)?;
        let mut loaded = 0usize;
        for item in items.into_iter().take(self.limit) {
            self.mirror.load_item(item)?;
            loaded += 1;
        }
        debug!(bucket = self.bucket(), loaded, limit = self.limit, "loaded recent items");
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
        Err(DataError::Usage(format!(
            "items() is not available on the partial stash of bucket {}; use a filter chain",
            self.bucket()
        )))
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
        if let Some(hit) = self.mirror.get_clone(id) {
            return Ok(Some(hit));
        }
        match self.mirror.ctx.persister.fetch_one(id)? {
            Some(item) => self.promote(item),
            None => Ok(None),
        }
    }

    fn original_for_id(&self, id: ModelId) -> Result<Option<Shared<T>>, DataError> {
        if let Some(original) = self.mirror.original(id) {
            return Ok(Some(original));
        }
        Ok(self
            .mirror
            .ctx
            .persister
            .fetch_one(id)?
            .map(|item| Arc::new(RwLock::new(item))))
    }

    fn for_unique_key(&self, key: &str, value: &FieldValue) -> Result<Option<T>, DataError> {
        self.on_pre_read();
        if let Some(hit) = self.mirror.unique_clone(key, value)? {
            return Ok(Some(hit));
        }
        let field = self.mirror.ctx.unique_key(key)?;
        let chain = self.persister_chain()?.use_cache(false).include_deleted();
        let chain = if field.case_insensitive {
            chain.filter_ignore_case(key, value.clone())
        } else {
            chain.filter(key, value.clone())
        };
        match chain.first() {
            Some(item) => self.promote(item),
            None => Ok(None),
        }
    }

    fn list_for_key(&self, key: &str, value: &FieldValue) -> Result<Vec<T>, DataError> {
        Ok(self.filter_by_key(key, value)?.include_deleted().all())
    }

    fn count_for_key(&self, key: &str, value: &FieldValue) -> Result<usize, DataError> {
        Ok(self.filter_by_key(key, value)?.include_deleted().count())
    }

    fn filter_chain(&self) -> Result<FilterChain<T>, DataError> {
        self.on_pre_read();
        let cache = Arc::clone(&self.mirror.ctx.filter_cache);
        let generation = cache.generation(self.bucket());
        Ok(self.persister_chain()?.with_cache_at(cache, generation))
    }

    fn filter_by_key(&self, key: &str, value: &FieldValue) -> Result<FilterChain<T>, DataError> {
        self.mirror.ctx.plain_key(key)?;
        Ok(self.filter_chain()?.filter(key, value.clone()))
    }

    fn in_memory_count(&self) -> usize {
        self.mirror.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::NoHooks;
    use crate::filtering::FilterCache;
    use crate::model::{KeyField, MappedModel};
    use crate::persister::{MemoryPersister, Persister};
    use crate::tickets::SequenceTickets;
    use std::time::Duration;

    fn article(id: u64, millis: u64) -> MappedModel {
        let mut m = MappedModel::new()
            .with("slug", format!("slug-{}", id))
            .with("author", if id % 2 == 0 { "even" } else { "odd" });
        m.meta.id = Some(ModelId(id));
        m.meta.last_modified_millis = millis;
        m
    }

    fn setup(count: u64, limit: usize) -> (Arc<MemoryPersister<MappedModel>>, PartialStash<MappedModel>) {
        let persister = Arc::new(MemoryPersister::with_items(
            (1..=count).map(|id| article(id, id * 10)),
        ));
        let ctx = StashContext {
            bucket: "articles".to_string(),
            persister: Arc::clone(&persister) as Arc<dyn Persister<MappedModel>>,
            hooks: Arc::new(NoHooks),
            tickets: Arc::new(SequenceTickets::starting_at(1_000)),
            filter_cache: Arc::new(FilterCache::new(Duration::from_secs(60))),
            keys: vec![KeyField::key("author"), KeyField::unique("slug")],
            lightweight_mode: false,
        };
        let stash = PartialStash::with_limit(ctx, limit).expect("stash");
        stash.load_all().expect("load");
        (persister, stash)
    }

    #[test]
    fn loads_most_recent_within_limit() {
        let (_, stash) = setup(10, 3);
        assert_eq!(stash.in_memory_count(), 3);
        assert!(stash.mirror.contains(ModelId(10)));
        assert!(stash.mirror.contains(ModelId(8)));
        assert!(!stash.mirror.contains(ModelId(7)));
    }

    #[test]
    fn for_id_miss_promotes() {
        let (persister, stash) = setup(10, 3);
        let before = persister.fetch_one_calls();
        let found = stash.for_id(ModelId(2)).expect("read").expect("present");
        assert_eq!(found.id(), Some(ModelId(2)));
        assert_eq!(persister.fetch_one_calls(), before + 1);

        let _ = stash.for_id(ModelId(2)).expect("read");
        assert_eq!(persister.fetch_one_calls(), before + 1);
        assert_eq!(stash.in_memory_count(), 4);
    }

    #[test]
    fn original_for_id_does_not_promote() {
        let (_, stash) = setup(10, 3);
        assert!(stash.original_for_id(ModelId(1)).expect("read").is_some());
        assert_eq!(stash.in_memory_count(), 3);
    }

    #[test]
    fn unique_miss_falls_through_and_promotes() {
        let (_, stash) = setup(10, 3);
        let found = stash
            .for_unique_key("slug", &"slug-1".into())
            .expect("lookup")
            .expect("present");
        assert_eq!(found.id(), Some(ModelId(1)));
        assert!(stash.mirror.contains(ModelId(1)));
    }

    #[test]
    fn key_queries_go_to_persister() {
        let (_, stash) = setup(10, 3);
        assert_eq!(stash.count_for_key("author", &"even".into()).expect("count"), 5);
        assert!(matches!(
            stash.list_for_key("slug", &"x".into()),
            Err(DataError::Config(_))
        ));
    }

    #[test]
    fn key_lookups_include_soft_deleted_cold_entities() {
        let (persister, stash) = setup(10, 3);
        let mut tombstone = article(1, 10);
        tombstone.meta.deleted = true;
        persister.persist(&tombstone).expect("persist");

        assert_eq!(stash.count_for_key("author", &"odd".into()).expect("count"), 5);
        assert_eq!(stash.list_for_key("author", &"odd".into()).expect("list").len(), 5);
        let found = stash
            .for_unique_key("slug", &"slug-1".into())
            .expect("lookup")
            .expect("present");
        assert!(found.is_deleted());
        assert_eq!(
            stash
                .filter_by_key("author", &"odd".into())
                .expect("chain")
                .count(),
            4
        );
    }

    #[test]
    fn items_is_usage_error() {
        let (_, stash) = setup(2, 3);
        assert!(matches!(stash.items(), Err(DataError::Usage(_))));
    }

    #[test]
    fn saving_cold_entity_promotes_it() {
        let (persister, stash) = setup(10, 3);
        let mut cold = article(1, 10).with("title", "updated");
        stash.save(&mut cold).expect("save");
        assert!(stash.mirror.contains(ModelId(1)));
        let stored = persister.stored(ModelId(1)).expect("stored");
        assert_eq!(stored.get("title"), Some(&FieldValue::from("updated")));
    }

    #[test]
    fn new_entity_gets_ticket() {
        let (_, stash) = setup(2, 3);
        let mut fresh = MappedModel::new().with("slug", "new");
        stash.save(&mut fresh).expect("save");
        assert_eq!(fresh.id(), Some(ModelId(1_000)));
        assert_eq!(stash.in_memory_count(), 3);
    }
}
