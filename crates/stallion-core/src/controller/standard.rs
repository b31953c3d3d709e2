use super::{ModelController, ModelHooks, ReadOnlyWrapper};
use crate::filtering::FilterChain;
use crate::model::Model;
use crate::stash::{Shared, Stash, StashKind};
use crate::types::{DataError, FieldValue, ModelId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// The default controller: hooks around writes, reads straight from the stash.
pub struct StandardModelController<T: Model> {
    bucket: String,
    stash: Arc<dyn Stash<T>>,
    hooks: Arc<dyn ModelHooks<T>>,
    writable: bool,
    audit_trail: bool,
}

impl<T: Model> std::fmt::Debug for StandardModelController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardModelController")
            .field("bucket", &self.bucket)
            .field("stash", &self.stash.kind())
            .field("writable", &self.writable)
            .field("audit_trail", &self.audit_trail)
            .finish()
    }
}

impl<T: Model> StandardModelController<T> {
    #[must_use]
    pub fn new(stash: Arc<dyn Stash<T>>, hooks: Arc<dyn ModelHooks<T>>) -> Self {
        Self {
            bucket: stash.bucket().to_string(),
            stash,
            hooks,
            writable: true,
            audit_trail: false,
        }
    }

    #[must_use]
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    #[must_use]
    pub fn audit_trail(mut self, enabled: bool) -> Self {
        self.audit_trail = enabled;
        self
    }

    #[must_use]
    pub fn stash(&self) -> &Arc<dyn Stash<T>> {
        &self.stash
    }

    /// Wrap this controller so that every write fails with `Usage`.
    #[must_use]
    pub fn read_only(self: &Arc<Self>) -> ReadOnlyWrapper<T> {
        ReadOnlyWrapper::new(Arc::clone(self) as Arc<dyn ModelController<T>>)
    }

    /// Build an unsaved entity of this bucket from a field map.
    pub fn new_model(&self, values: &BTreeMap<String, FieldValue>) -> Result<T, DataError>
    where
        T: Default,
    {
        let mut item = T::default();
        item.set_bucket(&self.bucket);
        for (name, value) in values {
            item.set_field(name, value.clone())?;
        }
        Ok(item)
    }

    fn ensure_writable(&self, operation: &str) -> Result<(), DataError> {
        if self.writable {
            Ok(())
        } else {
            Err(DataError::Usage(format!(
                "{} is not allowed: bucket {} is not writable",
                operation, self.bucket
            )))
        }
    }
}

impl<T: Model> ModelController<T> for StandardModelController<T> {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn stash_kind(&self) -> StashKind {
        self.stash.kind()
    }

    fn key_fields(&self) -> Vec<String> {
        self.stash.key_fields()
    }

    fn unique_fields(&self) -> Vec<String> {
        self.stash.unique_fields()
    }

    fn detach(&self, item: &T) -> Result<T, DataError> {
        Ok(self.stash.detach(item))
    }

    fn save(&self, item: &mut T) -> Result<(), DataError> {
        self.ensure_writable("save")?;
        let created = match item.id() {
            Some(id) => self.for_id_with_deleted(id)?.is_none(),
            None => true,
        };

        if created {
            self.hooks.on_pre_create_prepare(item);
            self.hooks.on_pre_save_prepare(item);
            self.hooks.on_pre_create_validate(item)?;
            self.hooks.on_pre_save_validate(item)?;
            self.stash.save(item)?;
            self.hooks.on_post_create(item);
        } else {
            self.hooks.on_pre_save_prepare(item);
            self.hooks.on_pre_save_validate(item)?;
            self.stash.save(item)?;
            self.hooks.on_post_save(item);
        }

        if self.audit_trail {
            self.hooks.on_post_save_audit(&self.bucket, item, created);
        }
        Ok(())
    }

    fn update_values(
        &self,
        item: &mut T,
        values: &BTreeMap<String, FieldValue>,
    ) -> Result<(), DataError> {
        self.ensure_writable("update_values")?;
        for (name, value) in values {
            item.set_field(name, value.clone())?;
        }
        self.save(item)
    }

    fn soft_delete(&self, item: &mut T) -> Result<(), DataError> {
        self.ensure_writable("soft_delete")?;
        item.set_deleted(true);
        self.save(item)
    }

    fn hard_delete(&self, item: &T) -> Result<(), DataError> {
        self.ensure_writable("hard_delete")?;
        debug!(bucket = %self.bucket, id = ?item.id(), "hard delete");
        self.stash.hard_delete(item)
    }

    fn for_id(&self, id: ModelId) -> Result<Option<T>, DataError> {
        Ok(self.stash.for_id(id)?.filter(|item| !item.is_deleted()))
    }

    fn for_id_with_deleted(&self, id: ModelId) -> Result<Option<T>, DataError> {
        self.stash.for_id(id)
    }

    fn original_for_id(&self, id: ModelId) -> Result<Option<Shared<T>>, DataError> {
        self.stash.original_for_id(id)
    }

    fn for_unique_key(&self, key: &str, value: &FieldValue) -> Result<Option<T>, DataError> {
        Ok(self
            .stash
            .for_unique_key(key, value)?
            .filter(|item| !item.is_deleted()))
    }

    fn list_for_key(&self, key: &str, value: &FieldValue) -> Result<Vec<T>, DataError> {
        let mut items = self.stash.list_for_key(key, value)?;
        items.retain(|item| !item.is_deleted());
        Ok(items)
    }

    fn count_for_key(&self, key: &str, value: &FieldValue) -> Result<usize, DataError> {
        Ok(self.list_for_key(key, value)?.len())
    }

    fn filter_chain(&self) -> Result<FilterChain<T>, DataError> {
        self.stash.filter_chain()
    }

    fn filter_by_key(&self, key: &str, value: &FieldValue) -> Result<FilterChain<T>, DataError> {
        self.stash.filter_by_key(key, value)
    }

    fn reset(&self) -> Result<(), DataError> {
        self.stash.reset()
    }

    fn in_memory_count(&self) -> usize {
        self.stash.in_memory_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::NoHooks;
    use crate::filtering::FilterCache;
    use crate::model::{KeyField, MappedModel};
    use crate::persister::{MemoryPersister, Persister};
    use crate::stash::{LocalMemoryStash, StashContext};
    use crate::tickets::SequenceTickets;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
    }

    impl ModelHooks<MappedModel> for Recorder {
        fn on_pre_create_prepare(&self, _item: &mut MappedModel) {
            self.calls.lock().push("pre_create_prepare");
        }
        fn on_pre_save_prepare(&self, item: &mut MappedModel) {
            self.calls.lock().push("pre_save_prepare");
            if item.get("slug").is_none() {
                if let Some(FieldValue::Text(title)) = item.get("title").cloned() {
                    item.values
                        .insert("slug".into(), title.to_lowercase().replace(' ', "-").into());
                }
            }
        }
        fn on_pre_create_validate(&self, _item: &MappedModel) -> Result<(), DataError> {
            self.calls.lock().push("pre_create_validate");
            Ok(())
        }
        fn on_pre_save_validate(&self, item: &MappedModel) -> Result<(), DataError> {
            self.calls.lock().push("pre_save_validate");
            if item.get("title").is_none() {
                return Err(DataError::Validation("title is required".into()));
            }
            Ok(())
        }
        fn on_post_create(&self, _item: &MappedModel) {
            self.calls.lock().push("post_create");
        }
        fn on_post_save(&self, _item: &MappedModel) {
            self.calls.lock().push("post_save");
        }
    }

    fn controller(
        hooks: Arc<dyn ModelHooks<MappedModel>>,
    ) -> (
        Arc<MemoryPersister<MappedModel>>,
        StandardModelController<MappedModel>,
    ) {
        let persister = Arc::new(MemoryPersister::new());
        let ctx = StashContext {
            bucket: "articles".to_string(),
            persister: Arc::clone(&persister) as Arc<dyn Persister<MappedModel>>,
            hooks: Arc::clone(&hooks),
            tickets: Arc::new(SequenceTickets::default()),
            filter_cache: Arc::new(FilterCache::new(Duration::from_secs(60))),
            keys: vec![KeyField::unique("slug")],
            lightweight_mode: false,
        };
        let stash: Arc<dyn Stash<MappedModel>> =
            Arc::new(LocalMemoryStash::new(ctx).expect("stash"));
        (persister, StandardModelController::new(stash, hooks))
    }

    #[test]
    fn hook_order_on_create_then_update() {
        let hooks = Arc::new(Recorder::default());
        let (_, controller) = controller(Arc::clone(&hooks) as Arc<dyn ModelHooks<MappedModel>>);

        let mut item = MappedModel::new().with("title", "Hello World");
        controller.save(&mut item).expect("save");
        assert_eq!(
            *hooks.calls.lock(),
            vec![
                "pre_create_prepare",
                "pre_save_prepare",
                "pre_create_validate",
                "pre_save_validate",
                "post_create"
            ]
        );
        assert_eq!(item.get("slug"), Some(&FieldValue::from("hello-world")));

        hooks.calls.lock().clear();
        controller.save(&mut item).expect("save");
        assert_eq!(
            *hooks.calls.lock(),
            vec!["pre_save_prepare", "pre_save_validate", "post_save"]
        );
    }

    #[test]
    fn validation_failure_aborts_save() {
        let hooks = Arc::new(Recorder::default());
        let (persister, controller) =
            controller(Arc::clone(&hooks) as Arc<dyn ModelHooks<MappedModel>>);
        let mut item = MappedModel::new().with("body", "no title");
        assert!(matches!(
            controller.save(&mut item),
            Err(DataError::Validation(_))
        ));
        assert!(persister.is_empty());
        assert!(item.id().is_none());
    }

    #[test]
    fn soft_delete_hides_from_for_id() {
        let (_, controller) = controller(Arc::new(NoHooks));
        let mut item = MappedModel::new().with("title", "x");
        controller.save(&mut item).expect("save");
        let id = item.id().expect("id");

        controller.soft_delete(&mut item).expect("delete");
        assert!(controller.for_id(id).expect("read").is_none());
        assert!(controller.for_id_with_deleted(id).expect("read").is_some());
        assert!(matches!(
            controller.for_id_or_not_found(id),
            Err(DataError::NotFound { .. })
        ));
        assert!(controller.all().expect("all").is_empty());
    }

    #[test]
    fn soft_delete_hides_from_key_lookups() {
        let (_, controller) = controller(Arc::new(NoHooks));
        let mut item = MappedModel::new().with("title", "x").with("slug", "x");
        controller.save(&mut item).expect("save");
        let slug = FieldValue::from("x");
        assert_eq!(controller.count_for_key("slug", &slug).expect("count"), 1);

        controller.soft_delete(&mut item).expect("delete");
        assert!(controller.for_unique_key("slug", &slug).expect("lookup").is_none());
        assert!(controller.list_for_key("slug", &slug).expect("list").is_empty());
        assert_eq!(controller.count_for_key("slug", &slug).expect("count"), 0);
        assert!(controller.filter_by_key("slug", &slug).expect("chain").is_empty());

        // The stash itself still indexes the tombstone.
        let raw = controller
            .stash()
            .for_unique_key("slug", &slug)
            .expect("lookup")
            .expect("indexed");
        assert!(raw.is_deleted());
    }

    #[test]
    fn non_writable_rejects_writes() {
        let (_, controller) = controller(Arc::new(NoHooks));
        let controller = controller.writable(false);
        let mut item = MappedModel::new().with("title", "x");
        assert!(matches!(controller.save(&mut item), Err(DataError::Usage(_))));
    }

    #[test]
    fn update_values_and_new_model() {
        let (_, controller) = controller(Arc::new(NoHooks));
        let mut values = BTreeMap::new();
        values.insert("title".to_string(), FieldValue::from("draft"));
        let mut item = controller.new_model(&values).expect("model");
        assert_eq!(item.bucket(), "articles");
        controller.save(&mut item).expect("save");

        let mut changes = BTreeMap::new();
        changes.insert("title".to_string(), FieldValue::from("final"));
        controller.update_values(&mut item, &changes).expect("update");
        let stored = controller
            .for_id_or_not_found(item.id().expect("id"))
            .expect("read");
        assert_eq!(stored.get("title"), Some(&FieldValue::from("final")));
    }
}
