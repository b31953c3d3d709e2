//! # Model Contract
//!
//! Every entity stored in a bucket implements [`Model`]. The trait exposes the
//! built-in metadata (id, bucket, deleted flag, last-modified timestamp and
//! the transient new-insert marker) through an embedded [`ModelMeta`], plus a
//! small field accessor surface (`field`, `set_field`, `field_names`) that the
//! stash indexes, the merge routine and the filter chain work through.
//!
//! [`MappedModel`] is the schema-less implementation used for buckets that
//! are declared in configuration rather than in code.

use crate::types::{DataError, FieldValue, ModelId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Name under which filters and indexes address the id.
pub const FIELD_ID: &str = "id";
/// Name under which filters address the soft-delete flag.
pub const FIELD_DELETED: &str = "deleted";
/// Name under which filters address the last-modified timestamp.
pub const FIELD_LAST_MODIFIED: &str = "last_modified_millis";

// =============================================================================
// METADATA
// =============================================================================

/// Built-in attributes carried by every model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMeta {
    /// Assigned by tickets on first save when absent.
    #[serde(default)]
    pub id: Option<ModelId>,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub last_modified_millis: u64,
    /// Set while the first persist of a freshly ticketed entity is in flight.
    #[serde(skip)]
    pub new_insert: bool,
}

impl ModelMeta {
    #[must_use]
    pub fn with_id(id: ModelId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }
}

/// A secondary index declared on a bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyField {
    pub name: String,
    /// Unique fields map one value to one entity; key fields map a value to a set.
    pub unique: bool,
    /// Text values are lower-cased on index and lookup. Only meaningful for unique fields.
    pub case_insensitive: bool,
}

impl KeyField {
    /// A non-unique key field.
    #[must_use]
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: false,
            case_insensitive: false,
        }
    }

    /// A unique field with exact matching.
    #[must_use]
    pub fn unique(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: true,
            case_insensitive: false,
        }
    }

    /// A unique field whose text values are compared lower-cased.
    #[must_use]
    pub fn unique_case_insensitive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: true,
            case_insensitive: true,
        }
    }
}

// =============================================================================
// MODEL TRAIT
// =============================================================================

/// The entity contract.
///
/// `field` returns `None` for names the model does not declare; a declared
/// field without a value returns `Some(FieldValue::Null)`.
pub trait Model: Clone + Send + Sync + 'static {
    fn meta(&self) -> &ModelMeta;

    fn meta_mut(&mut self) -> &mut ModelMeta;

    /// Names of the declared data fields, excluding the built-in metadata.
    fn field_names(&self) -> Vec<String>;

    fn field(&self, name: &str) -> Option<FieldValue>;

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), DataError>;

    /// Indexes declared by the model type itself. Registrations may add more.
    fn declared_keys() -> Vec<KeyField>
    where
        Self: Sized,
    {
        Vec::new()
    }

    fn id(&self) -> Option<ModelId> {
        self.meta().id
    }

    fn set_id(&mut self, id: ModelId) {
        self.meta_mut().id = Some(id);
    }

    fn bucket(&self) -> &str {
        &self.meta().bucket
    }

    fn set_bucket(&mut self, bucket: &str) {
        if self.meta().bucket != bucket {
            self.meta_mut().bucket = bucket.to_string();
        }
    }

    fn is_deleted(&self) -> bool {
        self.meta().deleted
    }

    fn set_deleted(&mut self, deleted: bool) {
        self.meta_mut().deleted = deleted;
    }

    fn last_modified_millis(&self) -> u64 {
        self.meta().last_modified_millis
    }

    fn set_last_modified_millis(&mut self, millis: u64) {
        self.meta_mut().last_modified_millis = millis;
    }

    fn is_new_insert(&self) -> bool {
        self.meta().new_insert
    }

    fn set_new_insert(&mut self, new_insert: bool) {
        self.meta_mut().new_insert = new_insert;
    }

    /// Resolve a field by name, including the built-in metadata names.
    /// Unknown names resolve to `Null`.
    fn value_of(&self, name: &str) -> FieldValue {
        match name {
            FIELD_ID => self.id().into(),
            FIELD_DELETED => FieldValue::Bool(self.is_deleted()),
            FIELD_LAST_MODIFIED => FieldValue::Int(self.last_modified_millis() as i64),
            _ => self.field(name).unwrap_or_default(),
        }
    }
}

// =============================================================================
// MERGE
// =============================================================================

fn merged_field_names<T: Model>(source: &T, dest: &T) -> BTreeSet<String> {
    source
        .field_names()
        .into_iter()
        .chain(dest.field_names())
        .collect()
}

/// Copy every field of `source` into `dest`, except the id and bucket.
///
/// Null values are only copied when `copy_nulls` is true. Returns the names
/// of the fields whose value actually changed (built-in names included).
pub fn clone_into<T: Model>(
    source: &T,
    dest: &mut T,
    copy_nulls: bool,
) -> Result<Vec<String>, DataError> {
    let mut changed = Vec::new();
    for name in merged_field_names(source, dest) {
        let value = source.field(&name).unwrap_or_default();
        if value.is_null() && !copy_nulls {
            continue;
        }
        if dest.field(&name).unwrap_or_default() == value {
            continue;
        }
        dest.set_field(&name, value)?;
        changed.push(name);
    }

    if source.is_deleted() != dest.is_deleted() {
        dest.set_deleted(source.is_deleted());
        changed.push(FIELD_DELETED.to_string());
    }

    let millis = source.last_modified_millis();
    if (millis != 0 || copy_nulls) && millis != dest.last_modified_millis() {
        dest.set_last_modified_millis(millis);
        changed.push(FIELD_LAST_MODIFIED.to_string());
    }

    Ok(changed)
}

/// Fields of `updated` that differ from `original`, with their new values.
#[must_use]
pub fn changed_values<T: Model>(updated: &T, original: &T) -> BTreeMap<String, FieldValue> {
    let mut changes = BTreeMap::new();
    for name in merged_field_names(updated, original) {
        let value = updated.field(&name).unwrap_or_default();
        if original.field(&name).unwrap_or_default() != value {
            changes.insert(name, value);
        }
    }
    if updated.is_deleted() != original.is_deleted() {
        changes.insert(
            FIELD_DELETED.to_string(),
            FieldValue::Bool(updated.is_deleted()),
        );
    }
    changes
}

// =============================================================================
// MAPPED MODEL
// =============================================================================

/// A schema-less model backed by an ordered map of field values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedModel {
    #[serde(default)]
    pub meta: ModelMeta,
    #[serde(default)]
    pub values: BTreeMap<String, FieldValue>,
}

impl MappedModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let value = value.into();
        let name = name.into();
        if value.is_null() {
            self.values.remove(&name);
        } else {
            self.values.insert(name, value);
        }
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }
}

impl Model for MappedModel {
    fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ModelMeta {
        &mut self.meta
    }

    fn field_names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        self.values.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), DataError> {
        if value.is_null() {
            self.values.remove(name);
        } else {
            self.values.insert(name.to_string(), value);
        }
        Ok(())
    }
}
