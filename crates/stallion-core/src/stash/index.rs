use super::Shared;
use crate::model::{KeyField, Model};
use crate::types::{DataError, FieldValue, ModelId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

/// Primary, key and unique-key indexes of an in-memory stash.
///
/// Pre-registered originals are reachable by id but not listed in `order`
/// until their first persist succeeds.
pub(crate) struct MemoryIndex<T> {
    order: Vec<ModelId>,
    listed: BTreeSet<ModelId>,
    by_id: BTreeMap<ModelId, Shared<T>>,
    keys: BTreeMap<String, BTreeMap<FieldValue, BTreeSet<ModelId>>>,
    unique: BTreeMap<String, BTreeMap<FieldValue, ModelId>>,
    case_insensitive: BTreeSet<String>,
}

impl<T: Model> MemoryIndex<T> {
    /// Index maps exist for every declared field before the first load.
    /// With `with_keys` false only unique fields are indexed.
    pub(crate) fn new(fields: &[KeyField], with_keys: bool) -> Self {
        let mut keys = BTreeMap::new();
        let mut unique = BTreeMap::new();
        let mut case_insensitive = BTreeSet::new();
        for field in fields {
            if field.unique {
                unique.insert(field.name.clone(), BTreeMap::new());
            } else if with_keys {
                keys.insert(field.name.clone(), BTreeMap::new());
            }
            if field.case_insensitive {
                case_insensitive.insert(field.name.clone());
            }
        }
        Self {
            order: Vec::new(),
            listed: BTreeSet::new(),
            by_id: BTreeMap::new(),
            keys,
            unique,
            case_insensitive,
        }
    }

    /// An empty index with the same declared fields.
    pub(crate) fn emptied(&self) -> Self {
        Self {
            order: Vec::new(),
            listed: BTreeSet::new(),
            by_id: BTreeMap::new(),
            keys: self.keys.keys().map(|k| (k.clone(), BTreeMap::new())).collect(),
            unique: self.unique.keys().map(|k| (k.clone(), BTreeMap::new())).collect(),
            case_insensitive: self.case_insensitive.clone(),
        }
    }

    pub(crate) fn get(&self, id: ModelId) -> Option<&Shared<T>> {
        self.by_id.get(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn ordered(&self) -> impl Iterator<Item = &Shared<T>> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub(crate) fn pre_register(&mut self, id: ModelId, original: Shared<T>) {
        self.by_id.insert(id, original);
    }

    /// Undo a pre-registration, unless another original replaced it meanwhile.
    pub(crate) fn rollback(&mut self, id: ModelId, original: &Shared<T>) {
        if self
            .by_id
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, original))
            && !self.listed.contains(&id)
        {
            self.by_id.remove(&id);
        }
    }

    pub(crate) fn register(&mut self, id: ModelId, original: Shared<T>) {
        self.by_id.insert(id, original);
        if self.listed.insert(id) {
            self.order.push(id);
        }
    }

    /// Remove an entity from every index. Returns its original.
    pub(crate) fn remove(&mut self, id: ModelId) -> Option<Shared<T>> {
        let original = self.by_id.remove(&id)?;
        {
            let item = original.read();
            self.unindex(id, &item);
        }
        if self.listed.remove(&id) {
            self.order.retain(|listed| *listed != id);
        }
        Some(original)
    }

    fn normalized(&self, name: &str, value: &FieldValue) -> FieldValue {
        if self.case_insensitive.contains(name) {
            value.folded()
        } else {
            value.clone()
        }
    }

    pub(crate) fn index(&mut self, id: ModelId, item: &T) {
        let bucket = item.bucket().to_string();
        let names: Vec<String> = self.keys.keys().cloned().collect();
        for name in names {
            let value = item.value_of(&name);
            if value.is_null() {
                continue;
            }
            let value = self.normalized(&name, &value);
            if let Some(map) = self.keys.get_mut(&name) {
                map.entry(value).or_default().insert(id);
            }
        }

        let names: Vec<String> = self.unique.keys().cloned().collect();
        for name in names {
            let value = item.value_of(&name);
            if value.is_null() {
                continue;
            }
            let value = self.normalized(&name, &value);
            if let Some(map) = self.unique.get_mut(&name) {
                if let Some(previous) = map.insert(value.clone(), id) {
                    if previous != id {
                        warn!(
                            bucket = %bucket,
                            key = %name,
                            %value,
                            previous = %previous,
                            current = %id,
                            "unique key collision, last write wins"
                        );
                    }
                }
            }
        }
    }

    pub(crate) fn unindex(&mut self, id: ModelId, item: &T) {
        let names: Vec<String> = self.keys.keys().cloned().collect();
        for name in names {
            let value = self.normalized(&name, &item.value_of(&name));
            if let Some(map) = self.keys.get_mut(&name) {
                if let Some(ids) = map.get_mut(&value) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        map.remove(&value);
                    }
                }
            }
        }

        let names: Vec<String> = self.unique.keys().cloned().collect();
        for name in names {
            let value = self.normalized(&name, &item.value_of(&name));
            if let Some(map) = self.unique.get_mut(&name) {
                if map.get(&value) == Some(&id) {
                    map.remove(&value);
                }
            }
        }
    }

    /// Ids indexed under `value`. Unknown key names are a configuration error.
    pub(crate) fn key_ids(&self, name: &str, value: &FieldValue) -> Result<Vec<ModelId>, DataError> {
        let map = self
            .keys
            .get(name)
            .ok_or_else(|| DataError::Config(format!("no key named {}", name)))?;
        Ok(map
            .get(&self.normalized(name, value))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    pub(crate) fn unique_id(&self, name: &str, value: &FieldValue) -> Result<Option<ModelId>, DataError> {
        let map = self
            .unique
            .get(name)
            .ok_or_else(|| DataError::Config(format!("no unique key named {}", name)))?;
        Ok(map.get(&self.normalized(name, value)).copied())
    }
}
