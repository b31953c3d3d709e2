//! # Model Controllers
//!
//! The public face of a bucket. A controller runs the lifecycle hooks around
//! every write and forwards reads to its stash.
//!
//! ## Save protocol
//!
//! ```text
//! new:      pre_create_prepare → pre_save_prepare → pre_create_validate
//!           → pre_save_validate → stash.save → post_create
//! existing: pre_save_prepare → pre_save_validate → stash.save → post_save
//! ```
//!
//! Existence is decided by `for_id_with_deleted`, so re-saving a
//! soft-deleted entity counts as an update.

mod read_only;
mod standard;

pub use read_only::ReadOnlyWrapper;
pub use standard::StandardModelController;

use crate::filtering::{FilterChain, FilterOperator};
use crate::model::Model;
use crate::stash::{Shared, StashKind};
use crate::types::{DataError, FieldValue, ModelId};
use std::collections::BTreeMap;
use tracing::info;

// =============================================================================
// HOOKS
// =============================================================================

/// Lifecycle callbacks of one bucket. Every method defaults to a no-op.
///
/// `on_post_load_item` runs on the loaded copy before it is merged into
/// memory and holds no stash lock, so it may read the same bucket.
pub trait ModelHooks<T: Model>: Send + Sync {
    fn on_pre_create_prepare(&self, _item: &mut T) {}

    fn on_pre_save_prepare(&self, _item: &mut T) {}

    fn on_pre_create_validate(&self, _item: &T) -> Result<(), DataError> {
        Ok(())
    }

    fn on_pre_save_validate(&self, _item: &T) -> Result<(), DataError> {
        Ok(())
    }

    fn on_post_create(&self, _item: &T) {}

    fn on_post_save(&self, _item: &T) {}

    /// Runs after `on_post_create`/`on_post_save` on buckets registered with an audit trail.
    fn on_post_save_audit(&self, bucket: &str, item: &T, created: bool) {
        info!(
            target: "stallion_core::audit",
            bucket,
            id = ?item.id(),
            created,
            deleted = item.is_deleted(),
            "entity saved"
        );
    }

    fn on_post_load_item(&self, _item: &mut T) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<T: Model> ModelHooks<T> for NoHooks {}

// =============================================================================
// CONTROLLER TRAIT
// =============================================================================

/// Read and write surface of a bucket.
pub trait ModelController<T: Model>: Send + Sync {
    fn bucket(&self) -> &str;

    fn is_writable(&self) -> bool;

    fn stash_kind(&self) -> StashKind;

    fn key_fields(&self) -> Vec<String>;

    fn unique_fields(&self) -> Vec<String>;

    /// A clone of the current in-memory state of `item`.
    fn detach(&self, item: &T) -> Result<T, DataError>;

    fn save(&self, item: &mut T) -> Result<(), DataError>;

    /// Apply `values` to `item` and save it.
    fn update_values(
        &self,
        item: &mut T,
        values: &BTreeMap<String, FieldValue>,
    ) -> Result<(), DataError>;

    /// Set the deleted flag and save through the hooks.
    fn soft_delete(&self, item: &mut T) -> Result<(), DataError>;

    /// Remove from storage and memory, bypassing the hooks.
    fn hard_delete(&self, item: &T) -> Result<(), DataError>;

    /// Soft-deleted entities are hidden.
    fn for_id(&self, id: ModelId) -> Result<Option<T>, DataError>;

    fn for_id_with_deleted(&self, id: ModelId) -> Result<Option<T>, DataError>;

    fn for_id_or_not_found(&self, id: ModelId) -> Result<T, DataError> {
        self.for_id(id)?.ok_or_else(|| DataError::NotFound {
            bucket: self.bucket().to_string(),
        })
    }

    fn original_for_id(&self, id: ModelId) -> Result<Option<Shared<T>>, DataError>;

    /// Soft-deleted entities are hidden.
    fn for_unique_key(&self, key: &str, value: &FieldValue) -> Result<Option<T>, DataError>;

    fn for_unique_key_or_not_found(&self, key: &str, value: &FieldValue) -> Result<T, DataError> {
        self.for_unique_key(key, value)?
            .ok_or_else(|| DataError::NotFound {
                bucket: self.bucket().to_string(),
            })
    }

    /// Soft-deleted entities are hidden.
    fn list_for_key(&self, key: &str, value: &FieldValue) -> Result<Vec<T>, DataError>;

    /// Length of `list_for_key`.
    fn count_for_key(&self, key: &str, value: &FieldValue) -> Result<usize, DataError>;

    /// Every entity that is not soft-deleted.
    fn all(&self) -> Result<Vec<T>, DataError> {
        Ok(self.filter_chain()?.all())
    }

    fn filter_chain(&self) -> Result<FilterChain<T>, DataError>;

    fn filter(&self, name: &str, value: FieldValue) -> Result<FilterChain<T>, DataError> {
        Ok(self.filter_chain()?.filter(name, value))
    }

    fn filter_by(
        &self,
        name: &str,
        value: FieldValue,
        op: FilterOperator,
    ) -> Result<FilterChain<T>, DataError> {
        Ok(self.filter_chain()?.filter_by(name, value, op))
    }

    fn filter_by_key(&self, key: &str, value: &FieldValue) -> Result<FilterChain<T>, DataError>;

    fn reset(&self) -> Result<(), DataError>;

    fn in_memory_count(&self) -> usize;
}
