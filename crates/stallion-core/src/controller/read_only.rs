use super::ModelController;
use crate::filtering::FilterChain;
use crate::model::Model;
use crate::stash::{Shared, StashKind};
use crate::types::{DataError, FieldValue, ModelId};
use std::collections::BTreeMap;
use std::sync::Arc;

const READ_ONLY: &str = "This controller is wrapped to be read-only.";

fn read_only() -> DataError {
    DataError::Usage(READ_ONLY.to_string())
}

/// Forwards reads to the wrapped controller and rejects every write.
pub struct ReadOnlyWrapper<T: Model> {
    inner: Arc<dyn ModelController<T>>,
}

impl<T: Model> ReadOnlyWrapper<T> {
    #[must_use]
    pub fn new(inner: Arc<dyn ModelController<T>>) -> Self {
        Self { inner }
    }
}

impl<T: Model> ModelController<T> for ReadOnlyWrapper<T> {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn stash_kind(&self) -> StashKind {
        self.inner.stash_kind()
    }

    fn key_fields(&self) -> Vec<String> {
        self.inner.key_fields()
    }

    fn unique_fields(&self) -> Vec<String> {
        self.inner.unique_fields()
    }

    fn detach(&self, _item: &T) -> Result<T, DataError> {
        Err(read_only())
    }

    fn save(&self, _item: &mut T) -> Result<(), DataError> {
        Err(read_only())
    }

    fn update_values(
        &self,
        _item: &mut T,
        _values: &BTreeMap<String, FieldValue>,
    ) -> Result<(), DataError> {
        Err(read_only())
    }

    fn soft_delete(&self, _item: &mut T) -> Result<(), DataError> {
        Err(read_only())
    }

    fn hard_delete(&self, _item: &T) -> Result<(), DataError> {
        Err(read_only())
    }

    fn for_id(&self, id: ModelId) -> Result<Option<T>, DataError> {
        self.inner.for_id(id)
    }

    fn for_id_with_deleted(&self, id: ModelId) -> Result<Option<T>, DataError> {
        self.inner.for_id_with_deleted(id)
    }

    fn original_for_id(&self, id: ModelId) -> Result<Option<Shared<T>>, DataError> {
        self.inner.original_for_id(id)
    }

    fn for_unique_key(&self, key: &str, value: &FieldValue) -> Result<Option<T>, DataError> {
        self.inner.for_unique_key(key, value)
    }

    fn list_for_key(&self, key: &str, value: &FieldValue) -> Result<Vec<T>, DataError> {
        self.inner.list_for_key(key, value)
    }

    fn count_for_key(&self, key: &str, value: &FieldValue) -> Result<usize, DataError> {
        self.inner.count_for_key(key, value)
    }

    fn filter_chain(&self) -> Result<FilterChain<T>, DataError> {
        self.inner.filter_chain()
    }

    fn filter_by_key(&self, key: &str, value: &FieldValue) -> Result<FilterChain<T>, DataError> {
        self.inner.filter_by_key(key, value)
    }

    fn reset(&self) -> Result<(), DataError> {
        Err(read_only())
    }

    fn in_memory_count(&self) -> usize {
        self.inner.in_memory_count()
    }
}
