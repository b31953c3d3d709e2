//! # Settings
//!
//! Registry-wide configuration plus the list of buckets declared in
//! configuration. The types are plain serde structs; the binary reads them
//! from a TOML file.
//!
//! ```toml
//! node_number = 1
//! data_dir = "data"
//!
//! [[buckets]]
//! name = "articles"
//! persister = "json"
//! unique_keys = ["slug"]
//! keys = ["author"]
//! ```

use crate::model::KeyField;
use crate::primitives::{
    DEFAULT_FILTER_CACHE_CAPACITY, DEFAULT_FILTER_CACHE_TTL_SECS, DEFAULT_PARTIAL_LIMIT,
    DEFAULT_WATCH_INTERVAL_MILLIS, MAX_NODE_NUMBER,
};
use crate::stash::StashKind;
use crate::types::DataError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// 2020-01-01T00:00:00Z, the default epoch of time-based tickets.
pub const DEFAULT_APP_CREATED_MILLIS: u64 = 1_577_836_800_000;

/// Storage medium of a configured bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersisterKind {
    #[default]
    Json,
    Toml,
    Redb,
    Memory,
}

impl fmt::Display for PersisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Toml => f.write_str("toml"),
            Self::Redb => f.write_str("redb"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Where new ids come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketSource {
    #[default]
    Time,
    Redb,
}

/// One `[[buckets]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    pub name: String,
    pub stash: StashKind,
    pub persister: PersisterKind,
    /// Folder of a json or toml bucket. Defaults to `<data_dir>/<name>`.
    pub path: Option<PathBuf>,
    pub keys: Vec<String>,
    pub unique_keys: Vec<String>,
    pub case_insensitive_keys: Vec<String>,
    pub partial_limit: usize,
    pub watch: bool,
    pub writable: bool,
    pub audit_trail: bool,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            stash: StashKind::default(),
            persister: PersisterKind::default(),
            path: None,
            keys: Vec::new(),
            unique_keys: Vec::new(),
            case_insensitive_keys: Vec::new(),
            partial_limit: DEFAULT_PARTIAL_LIMIT,
            watch: false,
            writable: true,
            audit_trail: false,
        }
    }
}

impl BucketConfig {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declared indexes in registration form.
    #[must_use]
    pub fn key_fields(&self) -> Vec<KeyField> {
        self.keys
            .iter()
            .map(KeyField::key)
            .chain(self.unique_keys.iter().map(KeyField::unique))
            .chain(
                self.case_insensitive_keys
                    .iter()
                    .map(KeyField::unique_case_insensitive),
            )
            .collect()
    }
}

/// Registry-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Last digit of every time-based ticket, 0..=9.
    pub node_number: u64,
    pub app_created_millis: u64,
    /// Skip `load_all` when buckets register.
    pub lightweight_mode: bool,
    pub filter_cache_ttl_secs: u64,
    /// Cached filter results kept per bucket.
    pub filter_cache_capacity: usize,
    pub data_dir: PathBuf,
    pub watch_interval_millis: u64,
    pub tickets: TicketSource,
    pub buckets: Vec<BucketConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node_number: 1,
            app_created_millis: DEFAULT_APP_CREATED_MILLIS,
            lightweight_mode: false,
            filter_cache_ttl_secs: DEFAULT_FILTER_CACHE_TTL_SECS,
            filter_cache_capacity: DEFAULT_FILTER_CACHE_CAPACITY,
            data_dir: PathBuf::from("data"),
            watch_interval_millis: DEFAULT_WATCH_INTERVAL_MILLIS,
            tickets: TicketSource::default(),
            buckets: Vec::new(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn filter_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.filter_cache_ttl_secs)
    }

    #[must_use]
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_millis)
    }

    /// Folder of a file-backed bucket.
    #[must_use]
    pub fn bucket_path(&self, bucket: &BucketConfig) -> PathBuf {
        bucket
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(&bucket.name))
    }

    /// The shared redb database file.
    #[must_use]
    pub fn redb_path(&self) -> PathBuf {
        self.data_dir.join("stallion.redb")
    }

    #[must_use]
    pub fn bucket(&self, name: &str) -> Option<&BucketConfig> {
        self.buckets.iter().find(|b| b.name == name)
    }

    pub fn validate(&self) -> Result<(), DataError> {
        if self.node_number > MAX_NODE_NUMBER {
            return Err(DataError::Config(format!(
                "node_number must be between 0 and {}, got {}",
                MAX_NODE_NUMBER, self.node_number
            )));
        }

        if self.filter_cache_capacity == 0 {
            return Err(DataError::Config(
                "filter_cache_capacity must be at least 1".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for bucket in &self.buckets {
            if bucket.name.trim().is_empty() {
                return Err(DataError::Config(
                    "every configured bucket needs a name".to_string(),
                ));
            }
            if !seen.insert(bucket.name.as_str()) {
                return Err(DataError::Config(format!(
                    "bucket {} is configured twice",
                    bucket.name
                )));
            }
            if bucket.stash == StashKind::Partial && bucket.partial_limit == 0 {
                return Err(DataError::Config(format!(
                    "bucket {} uses a partial stash with a limit of 0",
                    bucket.name
                )));
            }
        }
        Ok(())
    }
}
