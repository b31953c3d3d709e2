use super::Persister;
use crate::model::Model;
use crate::types::{DataError, ModelId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-process persister backed by an ordered map.
///
/// Every read path bumps a counter so callers can tell whether a lookup was
/// answered by the stash or fell through to storage.
#[derive(Debug, Default)]
pub struct MemoryPersister<T> {
    rows: RwLock<BTreeMap<ModelId, T>>,
    fetch_all_calls: AtomicUsize,
    fetch_one_calls: AtomicUsize,
    persist_calls: AtomicUsize,
}

impl<T: Model> MemoryPersister<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            fetch_all_calls: AtomicUsize::new(0),
            fetch_one_calls: AtomicUsize::new(0),
            persist_calls: AtomicUsize::new(0),
        }
    }

    /// Seed the store. Items without an id are skipped.
    #[must_use]
    pub fn with_items(items: impl IntoIterator<Item = T>) -> Self {
        let persister = Self::new();
        {
            let mut rows = persister.rows.write();
            for item in items {
                if let Some(id) = item.id() {
                    rows.insert(id, item);
                }
            }
        }
        persister
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Number of `fetch_all`/`fetch_recent`/`filter_chain` scans so far.
    #[must_use]
    pub fn fetch_all_calls(&self) -> usize {
        self.fetch_all_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn fetch_one_calls(&self) -> usize {
        self.fetch_one_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }

    /// Stored copy, bypassing the counters.
    #[must_use]
    pub fn stored(&self, id: ModelId) -> Option<T> {
        self.rows.read().get(&id).cloned()
    }
}

impl<T: Model> Persister<T> for MemoryPersister<T> {
    fn fetch_all(&self) -> Result<Vec<T>, DataError> {
        self.fetch_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.read().values().cloned().collect())
    }

    fn fetch_one(&self, id: ModelId) -> Result<Option<T>, DataError> {
        self.fetch_one_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.read().get(&id).cloned())
    }

    fn persist(&self, item: &T) -> Result<(), DataError> {
        let id = item
            .id()
            .ok_or_else(|| DataError::Usage("cannot persist an item without an id".to_string()))?;
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        self.rows.write().insert(id, item.clone());
        Ok(())
    }

    fn hard_delete(&self, item: &T) -> Result<(), DataError> {
        if let Some(id) = item.id() {
            self.rows.write().remove(&id);
        }
        Ok(())
    }

    fn reload_if_newer(&self, item: &T) -> Result<Option<T>, DataError> {
        let Some(id) = item.id() else {
            return Ok(None);
        };
        Ok(self
            .rows
            .read()
            .get(&id)
            .filter(|stored| stored.last_modified_millis() > item.last_modified_millis())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MappedModel;

    fn row(id: u64, millis: u64) -> MappedModel {
        let mut m = MappedModel::new().with("n", id as i64);
        m.meta.id = Some(ModelId(id));
        m.meta.last_modified_millis = millis;
        m
    }

    #[test]
    fn fetch_recent_orders_newest_first() {
        let persister = MemoryPersister::with_items(vec![row(1, 10), row(2, 30), row(3, 20)]);
        let recent = persister.fetch_recent(2).expect("fetch");
        let ids: Vec<_> = recent.iter().filter_map(|m| m.meta.id).collect();
        assert_eq!(ids, vec![ModelId(2), ModelId(3)]);
        assert_eq!(persister.fetch_all_calls(), 1);
    }

    #[test]
    fn persist_requires_id() {
        let persister = MemoryPersister::<MappedModel>::new();
        assert!(matches!(
            persister.persist(&MappedModel::new()),
            Err(DataError::Usage(_))
        ));
        persister.persist(&row(5, 1)).expect("persist");
        assert_eq!(persister.len(), 1);
    }

    #[test]
    fn reload_if_newer_compares_timestamps() {
        let persister = MemoryPersister::with_items(vec![row(1, 50)]);
        assert!(persister.reload_if_newer(&row(1, 50)).expect("reload").is_none());
        assert!(persister.reload_if_newer(&row(1, 40)).expect("reload").is_some());
    }

    #[test]
    fn hard_delete_removes_row() {
        let persister = MemoryPersister::with_items(vec![row(1, 1)]);
        persister.hard_delete(&row(1, 1)).expect("delete");
        assert!(persister.is_empty());
    }
}
