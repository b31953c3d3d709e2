//! # Data Access Registry
//!
//! The explicit owner of every registered bucket. Registration wires the
//! triple (persister, stash, controller) of one bucket, loads it, and starts
//! its watcher when asked to.
//!
//! ## Registration
//!
//! ```text
//! validate → reserve bucket + path (one lock) → persister.init
//!          → build stash by kind → build controller → load_all
//!          → attach watcher → publish
//! ```
//!
//! The reservation is released again when any later step fails, so a
//! failed registration leaves no trace.
//!
//! Controllers are stored type-erased; [`DataAccessRegistry::controller`]
//! recovers the typed handle and fails with `Usage` when the requested model
//! type does not match the registered one.

use crate::controller::{
    ModelController, ModelHooks, NoHooks, ReadOnlyWrapper, StandardModelController,
};
use crate::filtering::FilterCache;
use crate::model::{KeyField, MappedModel, Model};
use crate::persister::{
    JsonFilePersister, MemoryPersister, Persister, PersisterContext, TomlFilePersister,
};
use crate::settings::{BucketConfig, PersisterKind, Settings, TicketSource};
use crate::stash::{LocalMemoryStash, NoStash, PartialStash, Stash, StashContext, StashKind};
use crate::storage::{RedbPersister, RedbStore, RedbTickets};
use crate::tickets::{Tickets, TimeBasedTickets};
use crate::types::DataError;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// REGISTRATION
// =============================================================================

/// Everything needed to wire one bucket.
pub struct Registration<T: Model> {
    bucket: String,
    path: Option<PathBuf>,
    persister: Option<Arc<dyn Persister<T>>>,
    stash: StashKind,
    partial_limit: Option<usize>,
    keys: Vec<KeyField>,
    hooks: Arc<dyn ModelHooks<T>>,
    writable: bool,
    watch: bool,
    audit_trail: bool,
}

impl<T: Model> Registration<T> {
    /// Start a registration. The model's declared keys are included.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: None,
            persister: None,
            stash: StashKind::default(),
            partial_limit: None,
            keys: T::declared_keys(),
            hooks: Arc::new(NoHooks),
            writable: true,
            watch: false,
            audit_trail: false,
        }
    }

    /// Backing path of the bucket. Two buckets may not share one. When the
    /// bucket name is empty it is taken from the last path component.
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn persister(mut self, persister: Arc<dyn Persister<T>>) -> Self {
        self.persister = Some(persister);
        self
    }

    #[must_use]
    pub fn stash(mut self, kind: StashKind) -> Self {
        self.stash = kind;
        self
    }

    #[must_use]
    pub fn partial_limit(mut self, limit: usize) -> Self {
        self.partial_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn key(mut self, name: impl Into<String>) -> Self {
        self.keys.push(KeyField::key(name));
        self
    }

    #[must_use]
    pub fn unique_key(mut self, name: impl Into<String>) -> Self {
        self.keys.push(KeyField::unique(name));
        self
    }

    #[must_use]
    pub fn unique_key_case_insensitive(mut self, name: impl Into<String>) -> Self {
        self.keys.push(KeyField::unique_case_insensitive(name));
        self
    }

    #[must_use]
    pub fn keys(mut self, keys: impl IntoIterator<Item = KeyField>) -> Self {
        self.keys.extend(keys);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn ModelHooks<T>>) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Feed external changes of the backing medium into the stash.
    #[must_use]
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    #[must_use]
    pub fn audit_trail(mut self, enabled: bool) -> Self {
        self.audit_trail = enabled;
        self
    }

    fn resolved_bucket(&self) -> String {
        if !self.bucket.trim().is_empty() {
            return self.bucket.clone();
        }
        self.path
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_default()
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Summary of one registered bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketStatus {
    pub bucket: String,
    pub stash: StashKind,
    pub in_memory: usize,
    pub writable: bool,
    pub watching: bool,
    pub db_backed: bool,
    pub path: Option<PathBuf>,
}

/// The untyped side of a registered bucket.
trait BucketHandle: Send + Sync {
    fn status(&self) -> BucketStatus;

    fn reset(&self) -> Result<(), DataError>;

    fn stop_watcher(&self);
}

struct Wired<T: Model> {
    controller: Arc<dyn ModelController<T>>,
    persister: Arc<dyn Persister<T>>,
    path: Option<PathBuf>,
}

impl<T: Model> BucketHandle for Wired<T> {
    fn status(&self) -> BucketStatus {
        BucketStatus {
            bucket: self.controller.bucket().to_string(),
            stash: self.controller.stash_kind(),
            in_memory: self.controller.in_memory_count(),
            writable: self.controller.is_writable(),
            watching: self.persister.is_watching(),
            db_backed: self.persister.is_db_backed(),
            path: self.path.clone(),
        }
    }

    fn reset(&self) -> Result<(), DataError> {
        self.controller.reset()
    }

    fn stop_watcher(&self) {
        self.persister.stop_watcher();
    }
}

struct Entry {
    /// An `Arc<dyn ModelController<T>>` behind `Any`.
    controller: Arc<dyn Any + Send + Sync>,
    handle: Arc<dyn BucketHandle>,
    path: Option<PathBuf>,
}

#[derive(Default)]
struct RegistryState {
    entries: BTreeMap<String, Entry>,
    /// Buckets whose registration is in flight.
    pending: BTreeSet<String>,
    /// Backing path -> owning bucket, pending registrations included.
    paths: BTreeMap<PathBuf, String>,
}

impl RegistryState {
    fn release(&mut self, bucket: &str, path: Option<&Path>) {
        self.pending.remove(bucket);
        if let Some(path) = path {
            self.paths.remove(path);
        }
    }
}

fn normalized(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Owns the buckets of one application.
pub struct DataAccessRegistry {
    settings: Settings,
    tickets: Arc<dyn Tickets>,
    filter_cache: Arc<FilterCache>,
    redb: Mutex<Option<Arc<RedbStore>>>,
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for DataAccessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccessRegistry")
            .field("buckets", &self.buckets())
            .field("tickets", &self.tickets)
            .finish_non_exhaustive()
    }
}

impl DataAccessRegistry {
    /// Create a registry with the ticket source named in `settings`.
    pub fn new(settings: Settings) -> Result<Self, DataError> {
        settings.validate()?;
        let redb = Mutex::new(None);
        let tickets: Arc<dyn Tickets> = match settings.tickets {
            TicketSource::Time => Arc::new(TimeBasedTickets::new(
                settings.app_created_millis,
                settings.node_number,
            )?),
            TicketSource::Redb => {
                let store = Arc::new(RedbStore::open(settings.redb_path())?);
                *redb.lock() = Some(Arc::clone(&store));
                Arc::new(RedbTickets::new(store))
            }
        };
        Ok(Self::assemble(settings, tickets, redb))
    }

    /// Create a registry with an explicit ticket source.
    pub fn with_tickets(settings: Settings, tickets: Arc<dyn Tickets>) -> Result<Self, DataError> {
        settings.validate()?;
        Ok(Self::assemble(settings, tickets, Mutex::new(None)))
    }

    fn assemble(
        settings: Settings,
        tickets: Arc<dyn Tickets>,
        redb: Mutex<Option<Arc<RedbStore>>>,
    ) -> Self {
        let filter_cache = Arc::new(FilterCache::with_capacity(
            settings.filter_cache_ttl(),
            settings.filter_cache_capacity,
        ));
        Self {
            settings,
            tickets,
            filter_cache,
            redb,
            state: Mutex::new(RegistryState::default()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn tickets(&self) -> Arc<dyn Tickets> {
        Arc::clone(&self.tickets)
    }

    #[must_use]
    pub fn filter_cache(&self) -> Arc<FilterCache> {
        Arc::clone(&self.filter_cache)
    }

    /// The shared redb database, opened on first use.
    pub fn redb_store(&self) -> Result<Arc<RedbStore>, DataError> {
        let mut guard = self.redb.lock();
        if let Some(store) = guard.as_ref() {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(RedbStore::open(self.settings.redb_path())?);
        *guard = Some(Arc::clone(&store));
        Ok(store)
    }

    /// Wire and load a bucket, returning its controller.
    pub fn register<T: Model>(
        &self,
        registration: Registration<T>,
    ) -> Result<Arc<dyn ModelController<T>>, DataError> {
        let bucket = registration.resolved_bucket();
        if bucket.trim().is_empty() {
            return Err(DataError::Config(
                "a bucket needs a name or a backing path".to_string(),
            ));
        }
        let persister = registration.persister.clone().ok_or_else(|| {
            DataError::Config(format!("bucket {} has no persister", bucket))
        })?;
        let path = registration.path.as_deref().map(normalized);

        {
            let mut state = self.state.lock();
            if state.entries.contains_key(&bucket) || state.pending.contains(&bucket) {
                return Err(DataError::Config(format!(
                    "bucket {} is already registered",
                    bucket
                )));
            }
            if let Some(path) = &path {
                if let Some(owner) = state.paths.get(path) {
                    return Err(DataError::Config(format!(
                        "path {} is already used by bucket {}",
                        path.display(),
                        owner
                    )));
                }
                state.paths.insert(path.clone(), bucket.clone());
            }
            state.pending.insert(bucket.clone());
        }

        match self.wire(&bucket, registration, persister, path.clone()) {
            Ok((entry, controller)) => {
                let mut state = self.state.lock();
                state.pending.remove(&bucket);
                state.entries.insert(bucket.clone(), entry);
                info!(bucket = %bucket, "bucket registered");
                Ok(controller)
            }
            Err(e) => {
                self.state.lock().release(&bucket, path.as_deref());
                warn!(bucket = %bucket, error = %e, "bucket registration failed");
                Err(e)
            }
        }
    }

    fn wire<T: Model>(
        &self,
        bucket: &str,
        registration: Registration<T>,
        persister: Arc<dyn Persister<T>>,
        path: Option<PathBuf>,
    ) -> Result<(Entry, Arc<dyn ModelController<T>>), DataError> {
        persister.init(&PersisterContext {
            bucket: bucket.to_string(),
            writable: registration.writable,
        })?;

        let ctx = StashContext {
            bucket: bucket.to_string(),
            persister: Arc::clone(&persister),
            hooks: Arc::clone(&registration.hooks),
            tickets: Arc::clone(&self.tickets),
            filter_cache: Arc::clone(&self.filter_cache),
            keys: registration.keys.clone(),
            lightweight_mode: self.settings.lightweight_mode,
        };
        let stash: Arc<dyn Stash<T>> = match registration.stash {
            StashKind::NoStash => Arc::new(NoStash::new(ctx)?),
            StashKind::LocalMemory => Arc::new(LocalMemoryStash::new(ctx)?),
            StashKind::Partial => match registration.partial_limit {
                Some(limit) => Arc::new(PartialStash::with_limit(ctx, limit)?),
                None => Arc::new(PartialStash::new(ctx)?),
            },
        };

        let controller: Arc<dyn ModelController<T>> = Arc::new(
            StandardModelController::new(Arc::clone(&stash), registration.hooks)
                .writable(registration.writable)
                .audit_trail(registration.audit_trail),
        );

        stash.load_all()?;
        debug!(
            bucket,
            stash = %stash.kind(),
            loaded = stash.in_memory_count(),
            "bucket loaded"
        );

        if registration.watch {
            persister.attach_watcher(Arc::downgrade(&stash))?;
        }

        let handle: Arc<dyn BucketHandle> = Arc::new(Wired {
            controller: Arc::clone(&controller),
            persister,
            path: path.clone(),
        });
        let entry = Entry {
            controller: Arc::new(Arc::clone(&controller)),
            handle,
            path,
        };
        Ok((entry, controller))
    }

    /// Remove a bucket and stop its watcher. Returns whether it existed.
    pub fn deregister(&self, bucket: &str) -> bool {
        let entry = {
            let mut state = self.state.lock();
            let Some(entry) = state.entries.remove(bucket) else {
                return false;
            };
            if let Some(path) = &entry.path {
                state.paths.remove(path);
            }
            entry
        };
        entry.handle.stop_watcher();
        self.filter_cache.clear_bucket(bucket);
        debug!(bucket, "bucket deregistered");
        true
    }

    /// The typed controller of `bucket`.
    pub fn controller<T: Model>(
        &self,
        bucket: &str,
    ) -> Result<Arc<dyn ModelController<T>>, DataError> {
        let erased = {
            let state = self.state.lock();
            let entry = state.entries.get(bucket).ok_or_else(|| {
                DataError::Config(format!("bucket {} is not registered", bucket))
            })?;
            Arc::clone(&entry.controller)
        };
        erased
            .downcast::<Arc<dyn ModelController<T>>>()
            .map(|typed| Arc::clone(&*typed))
            .map_err(|_| {
                DataError::Usage(format!(
                    "bucket {} is registered with a different model type",
                    bucket
                ))
            })
    }

    /// The controller of `bucket` wrapped so that every write fails.
    pub fn read_only<T: Model>(&self, bucket: &str) -> Result<ReadOnlyWrapper<T>, DataError> {
        Ok(ReadOnlyWrapper::new(self.controller::<T>(bucket)?))
    }

    #[must_use]
    pub fn buckets(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    #[must_use]
    pub fn contains(&self, bucket: &str) -> bool {
        self.state.lock().entries.contains_key(bucket)
    }

    fn handles(&self) -> Vec<Arc<dyn BucketHandle>> {
        self.state
            .lock()
            .entries
            .values()
            .map(|entry| Arc::clone(&entry.handle))
            .collect()
    }

    /// One summary per bucket, ordered by bucket name.
    #[must_use]
    pub fn status(&self) -> Vec<BucketStatus> {
        self.handles().iter().map(|handle| handle.status()).collect()
    }

    /// Reset every bucket. Stops at the first failure.
    pub fn reset_all(&self) -> Result<(), DataError> {
        for handle in self.handles() {
            handle.reset()?;
        }
        self.filter_cache.clear_all();
        Ok(())
    }

    /// Stop every watcher, drop every bucket and clear the filter cache.
    pub fn shutdown(&self) {
        let entries = std::mem::take(&mut *self.state.lock());
        for entry in entries.entries.values() {
            entry.handle.stop_watcher();
        }
        self.filter_cache.clear_all();
        info!(buckets = entries.entries.len(), "registry shut down");
    }

    /// Register every bucket declared in the settings as a [`MappedModel`]
    /// bucket. Returns the number of buckets registered.
    pub fn load_and_hydrate(&self) -> Result<usize, DataError> {
        let configs = self.settings.buckets.clone();
        for config in &configs {
            self.register(self.configured_registration(config)?)?;
        }
        Ok(configs.len())
    }

    fn configured_registration(
        &self,
        config: &BucketConfig,
    ) -> Result<Registration<MappedModel>, DataError> {
        let mut registration = Registration::<MappedModel>::new(config.name.clone())
            .stash(config.stash)
            .partial_limit(config.partial_limit)
            .keys(config.key_fields())
            .writable(config.writable)
            .watch(config.watch)
            .audit_trail(config.audit_trail);

        registration = match config.persister {
            PersisterKind::Json => {
                let folder = self.settings.bucket_path(config);
                let persister = JsonFilePersister::<MappedModel>::new(folder.clone())
                    .with_watch_interval(self.settings.watch_interval());
                registration.path(folder).persister(Arc::new(persister))
            }
            PersisterKind::Toml => {
                let folder = self.settings.bucket_path(config);
                let persister = TomlFilePersister::<MappedModel>::new(folder.clone())
                    .with_watch_interval(self.settings.watch_interval());
                registration.path(folder).persister(Arc::new(persister))
            }
            PersisterKind::Redb => registration.persister(Arc::new(RedbPersister::<MappedModel>::new(
                self.redb_store()?,
                &config.name,
            ))),
            PersisterKind::Memory => registration.persister(Arc::new(MemoryPersister::new())),
        };
        Ok(registration)
    }
}

impl Drop for DataAccessRegistry {
    fn drop(&mut self) {
        for entry in self.state.get_mut().entries.values() {
            entry.handle.stop_watcher();
        }
    }
}
