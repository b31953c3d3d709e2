//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the data layer:
//! - Entity identifiers (`ModelId`)
//! - Field values used by accessors, indexes and filters (`FieldValue`)
//! - Error types (`DataError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique identifier of an entity within its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(pub u64);

impl ModelId {
    /// Get the raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// FIELD VALUES
// =============================================================================

/// A single field value as seen by indexes and filters.
///
/// The derived ordering is `Null < Bool < Int < Text`, then by content.
/// Human-readable formats (JSON, TOML) render plain scalars; binary formats
/// use a tagged representation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FieldValue {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Normalize a value for a case-insensitive index: text is lower-cased,
    /// everything else is returned unchanged.
    #[must_use]
    pub fn folded(&self) -> Self {
        match self {
            Self::Text(s) => Self::Text(s.to_lowercase()),
            other => other.clone(),
        }
    }

    /// Convert an untyped filter value into the type of `target`.
    ///
    /// Values that cannot be converted are returned unchanged and will
    /// simply fail to match.
    #[must_use]
    pub fn coerce_to(&self, target: &FieldValue) -> Self {
        match (self, target) {
            (Self::Text(s), Self::Int(_)) => s
                .trim()
                .parse::<i64>()
                .map(Self::Int)
                .unwrap_or_else(|_| self.clone()),
            (Self::Text(s), Self::Bool(_)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Self::Bool(true),
                "false" | "0" | "no" => Self::Bool(false),
                _ => self.clone(),
            },
            (Self::Int(i), Self::Bool(_)) if *i == 0 || *i == 1 => Self::Bool(*i == 1),
            (Self::Int(i), Self::Text(_)) => Self::Text(i.to_string()),
            (Self::Bool(b), Self::Text(_)) => Self::Text(b.to_string()),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<ModelId> for FieldValue {
    fn from(value: ModelId) -> Self {
        Self::Int(value.0 as i64)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Plain scalar form used by human-readable formats.
#[derive(Deserialize)]
#[serde(untagged)]
enum PlainValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

/// Tagged form used by binary formats such as postcard.
#[derive(Serialize, Deserialize)]
#[serde(rename = "FieldValue")]
enum TaggedValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            return match self {
                Self::Null => serializer.serialize_unit(),
                Self::Bool(b) => serializer.serialize_bool(*b),
                Self::Int(i) => serializer.serialize_i64(*i),
                Self::Text(s) => serializer.serialize_str(s),
            };
        }
        let tagged = match self {
            Self::Null => TaggedValue::Null,
            Self::Bool(b) => TaggedValue::Bool(*b),
            Self::Int(i) => TaggedValue::Int(*i),
            Self::Text(s) => TaggedValue::Text(s.clone()),
        };
        tagged.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            return Ok(match PlainValue::deserialize(deserializer)? {
                PlainValue::Null => Self::Null,
                PlainValue::Bool(b) => Self::Bool(b),
                PlainValue::Int(i) => Self::Int(i),
                PlainValue::Text(s) => Self::Text(s),
            });
        }
        Ok(match TaggedValue::deserialize(deserializer)? {
            TaggedValue::Null => Self::Null,
            TaggedValue::Bool(b) => Self::Bool(b),
            TaggedValue::Int(i) => Self::Int(i),
            TaggedValue::Text(s) => Self::Text(s),
        })
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Error types for data access operations.
///
/// Configuration and usage errors describe programming mistakes and are
/// never caught inside this crate. I/O and serialization failures are
/// propagated to the caller without retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// Invalid registration or unknown index name.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation that is not supported on this stash or controller.
    #[error("Usage error: {0}")]
    Usage(String),

    /// No entity matched an `*_or_not_found` lookup.
    #[error("No item found in bucket {bucket}")]
    NotFound { bucket: String },

    /// A validate hook rejected the entity.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// `set_field` was called with a name the model does not declare.
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O or storage engine error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// TESTS
// =============================================================================
