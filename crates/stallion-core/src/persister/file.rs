use super::{Persister, PersisterContext};
use crate::model::Model;
use crate::primitives::DEFAULT_WATCH_INTERVAL_MILLIS;
use crate::stash::Stash;
use crate::types::{DataError, ModelId};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

// =============================================================================
// FORMATS
// =============================================================================

/// Text encoding of one entity file.
pub trait FileFormat: Send + Sync + 'static {
    const EXTENSION: &'static str;

    fn encode<T: Serialize>(item: &T) -> Result<String, DataError>;

    fn decode<T: DeserializeOwned>(content: &str) -> Result<T, DataError>;
}

/// Pretty-printed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl FileFormat for JsonFormat {
    const EXTENSION: &'static str = "json";

    fn encode<T: Serialize>(item: &T) -> Result<String, DataError> {
        serde_json::to_string_pretty(item).map_err(|e| DataError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(content: &str) -> Result<T, DataError> {
        serde_json::from_str(content).map_err(|e| DataError::Serialization(e.to_string()))
    }
}

/// TOML. Null values have no TOML form and are left out of the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlFormat;

fn strip_nulls(value: serde_json::Value) -> Option<serde_json::Value> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Object(map) => Some(serde_json::Value::Object(
            map.into_iter()
                .filter_map(|(k, v)| strip_nulls(v).map(|v| (k, v)))
                .collect(),
        )),
        serde_json::Value::Array(items) => Some(serde_json::Value::Array(
            items.into_iter().filter_map(strip_nulls).collect(),
        )),
        other => Some(other),
    }
}

impl FileFormat for TomlFormat {
    const EXTENSION: &'static str = "toml";

    fn encode<T: Serialize>(item: &T) -> Result<String, DataError> {
        let value =
            serde_json::to_value(item).map_err(|e| DataError::Serialization(e.to_string()))?;
        let value = strip_nulls(value).unwrap_or(serde_json::Value::Null);
        toml::to_string_pretty(&value).map_err(|e| DataError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(content: &str) -> Result<T, DataError> {
        toml::from_str(content).map_err(|e| DataError::Serialization(e.to_string()))
    }
}

// =============================================================================
// PERSISTER
// =============================================================================

/// One `<id>.json` file per entity.
pub type JsonFilePersister<T> = FilePersister<T, JsonFormat>;

/// One `<id>.toml` file per entity.
pub type TomlFilePersister<T> = FilePersister<T, TomlFormat>;

struct FolderWatcher {
    // Dropping the OS watcher closes the event channel and ends the thread.
    watcher: RecommendedWatcher,
    handle: JoinHandle<()>,
}

/// One file per entity under a bucket folder, encoded by `F`.
///
/// The file mtime is the entity's `last_modified_millis`: it is stamped on
/// persist and read back on fetch.
pub struct FilePersister<T, F> {
    folder: PathBuf,
    watch_interval: Duration,
    watcher: Mutex<Option<FolderWatcher>>,
    _marker: PhantomData<fn() -> (T, F)>,
}

impl<T, F: FileFormat> std::fmt::Debug for FilePersister<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePersister")
            .field("format", &F::EXTENSION)
            .field("folder", &self.folder)
            .field("watch_interval", &self.watch_interval)
            .field("watching", &self.watcher.lock().is_some())
            .finish()
    }
}

impl<T: Model + Serialize + DeserializeOwned, F: FileFormat> FilePersister<T, F> {
    #[must_use]
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            watch_interval: Duration::from_millis(DEFAULT_WATCH_INTERVAL_MILLIS),
            watcher: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    /// Quiet period over which watcher events are coalesced before they are applied.
    #[must_use]
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }

    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    #[must_use]
    pub fn path_for(&self, id: ModelId) -> PathBuf {
        self.folder.join(format!("{}.{}", id, F::EXTENSION))
    }
}

impl<T, F> FilePersister<T, F> {
    fn shutdown_watcher(&self) {
        let Some(FolderWatcher { watcher, handle }) = self.watcher.lock().take() else {
            return;
        };
        drop(watcher);
        // The last stash handle may be released on the watcher thread itself.
        if handle.thread().id() != std::thread::current().id() {
            let _ = handle.join();
        }
    }
}

impl<T, F> Drop for FilePersister<T, F> {
    fn drop(&mut self) {
        self.shutdown_watcher();
    }
}

// =============================================================================
// FILE HELPERS
// =============================================================================

fn file_millis(path: &Path) -> Result<u64, DataError> {
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| DataError::Io(format!("{}: {}", path.display(), e)))?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0))
}

fn id_from_path(path: &Path) -> Option<ModelId> {
    path.file_stem()?.to_str()?.parse::<u64>().ok().map(ModelId)
}

fn is_entity_file<F: FileFormat>(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.')
        && !name.contains(".#")
        && path.extension().and_then(|e| e.to_str()) == Some(F::EXTENSION)
}

fn entity_files<F: FileFormat>(folder: &Path) -> Result<Vec<PathBuf>, DataError> {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DataError::Io(format!("{}: {}", folder.display(), e))),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| DataError::Io(e.to_string()))?.path();
        if path.is_file() && is_entity_file::<F>(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_entity<T: Model + DeserializeOwned, F: FileFormat>(
    path: &Path,
) -> Result<Option<T>, DataError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DataError::Io(format!("{}: {}", path.display(), e))),
    };
    let mut item: T = F::decode(&content).map_err(|e| match e {
        DataError::Serialization(msg) => {
            DataError::Serialization(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })?;
    if item.id().is_none() {
        if let Some(id) = id_from_path(path) {
            item.set_id(id);
        }
    }
    item.set_last_modified_millis(file_millis(path)?);
    Ok(Some(item))
}

// =============================================================================
// WATCHER
// =============================================================================

/// Bring one changed path into the stash: reload it if the file exists,
/// unload the entity otherwise.
fn apply_change<T: Model + DeserializeOwned, F: FileFormat>(
    path: &Path,
    stash: &dyn Stash<T>,
) -> Result<(), DataError> {
    let Some(id) = id_from_path(path) else {
        return Ok(());
    };
    match read_entity::<T, F>(path)? {
        Some(item) => {
            trace!(bucket = stash.bucket(), %id, "file changed");
            stash.load_item(item)?;
        }
        None => {
            trace!(bucket = stash.bucket(), %id, "file removed");
            stash.unload(id);
        }
    }
    Ok(())
}

fn watch_loop<T: Model + DeserializeOwned, F: FileFormat>(
    folder: PathBuf,
    quiet_period: Duration,
    events: Receiver<notify::Result<notify::Event>>,
    stash: Weak<dyn Stash<T>>,
) {
    // Blocks until the first event of a burst; fails once the watcher is dropped.
    while let Ok(first) = events.recv() {
        let mut changed = BTreeSet::new();
        let mut collect = |event: notify::Result<notify::Event>| match event {
            Ok(event) => changed.extend(
                event
                    .paths
                    .into_iter()
                    .filter(|path| is_entity_file::<F>(path)),
            ),
            Err(e) => warn!(folder = %folder.display(), error = %e, "watch event failed"),
        };
        collect(first);
        loop {
            match events.recv_timeout(quiet_period) {
                Ok(event) => collect(event),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        let Some(stash) = stash.upgrade() else {
            break;
        };
        for path in &changed {
            // A half-written file fails to decode; its next write event retries it.
            if let Err(e) = apply_change::<T, F>(path, stash.as_ref()) {
                warn!(path = %path.display(), error = %e, "could not apply file change");
            }
        }
    }
    debug!(folder = %folder.display(), "folder watcher stopped");
}

// =============================================================================
// PERSISTER IMPLEMENTATION
// =============================================================================

impl<T: Model + Serialize + DeserializeOwned, F: FileFormat> Persister<T> for FilePersister<T, F> {
    fn init(&self, context: &PersisterContext) -> Result<(), DataError> {
        if self.folder.is_dir() {
            return Ok(());
        }
        if !context.writable {
            return Err(DataError::Config(format!(
                "folder {} for read-only bucket {} does not exist",
                self.folder.display(),
                context.bucket
            )));
        }
        fs::create_dir_all(&self.folder)
            .map_err(|e| DataError::Io(format!("{}: {}", self.folder.display(), e)))
    }

    fn fetch_all(&self) -> Result<Vec<T>, DataError> {
        let mut items = Vec::new();
        for path in entity_files::<F>(&self.folder)? {
            if let Some(item) = read_entity::<T, F>(&path)? {
                items.push(item);
            }
        }
        items.sort_by(|a, b| b.last_modified_millis().cmp(&a.last_modified_millis()));
        Ok(items)
    }

    fn fetch_one(&self, id: ModelId) -> Result<Option<T>, DataError> {
        read_entity::<T, F>(&self.path_for(id))
    }

    fn persist(&self, item: &T) -> Result<(), DataError> {
        let id = item
            .id()
            .ok_or_else(|| DataError::Usage("cannot persist an item without an id".to_string()))?;
        let content = F::encode(item)?;

        let path = self.path_for(id);
        let tmp = self.folder.join(format!(".{}.{}.tmp", id, F::EXTENSION));
        fs::write(&tmp, content)
            .map_err(|e| DataError::Io(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path).map_err(|e| DataError::Io(format!("{}: {}", path.display(), e)))?;

        let millis = item.last_modified_millis();
        if millis > 0 {
            let file = fs::File::options()
                .write(true)
                .open(&path)
                .map_err(|e| DataError::Io(e.to_string()))?;
            file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_millis(millis))
                .map_err(|e| DataError::Io(e.to_string()))?;
        }
        Ok(())
    }

    fn hard_delete(&self, item: &T) -> Result<(), DataError> {
        let Some(id) = item.id() else {
            return Ok(());
        };
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DataError::Io(e.to_string())),
        }
    }

    fn attach_watcher(&self, stash: Weak<dyn Stash<T>>) -> Result<(), DataError> {
        let mut guard = self.watcher.lock();
        if guard.is_some() {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel();
        let mut watcher =
            notify::recommended_watcher(tx).map_err(|e| DataError::Io(e.to_string()))?;
        watcher
            .watch(&self.folder, RecursiveMode::NonRecursive)
            .map_err(|e| DataError::Io(format!("{}: {}", self.folder.display(), e)))?;

        let folder = self.folder.clone();
        let quiet_period = self.watch_interval;
        let handle = std::thread::Builder::new()
            .name("stallion-watch".to_string())
            .spawn(move || watch_loop::<T, F>(folder, quiet_period, rx, stash))
            .map_err(|e| DataError::Io(e.to_string()))?;
        debug!(folder = %self.folder.display(), format = F::EXTENSION, "folder watcher started");
        *guard = Some(FolderWatcher { watcher, handle });
        Ok(())
    }

    fn stop_watcher(&self) {
        self.shutdown_watcher();
    }

    fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }

    fn reload_if_newer(&self, item: &T) -> Result<Option<T>, DataError> {
        let Some(id) = item.id() else {
            return Ok(None);
        };
        let path = self.path_for(id);
        if !path.is_file() || file_millis(&path)? <= item.last_modified_millis() {
            return Ok(None);
        }
        read_entity::<T, F>(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::NoHooks;
    use crate::filtering::FilterCache;
    use crate::model::{KeyField, MappedModel};
    use crate::stash::{LocalMemoryStash, StashContext};
    use crate::tickets::SequenceTickets;
    use crate::types::FieldValue;
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::tempdir;

    fn row(id: u64, millis: u64) -> MappedModel {
        let mut m = MappedModel::new().with("title", format!("t{}", id));
        m.meta.id = Some(ModelId(id));
        m.meta.last_modified_millis = millis;
        m
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        condition()
    }

    #[test]
    fn persist_then_fetch_keeps_mtime() {
        let dir = tempdir().expect("Failed to create temp dir");
        let persister = JsonFilePersister::<MappedModel>::new(dir.path());
        persister.persist(&row(7, 1_700_000_000_000)).expect("persist");

        assert!(dir.path().join("7.json").is_file());
        let loaded = persister.fetch_one(ModelId(7)).expect("fetch").expect("exists");
        assert_eq!(loaded.last_modified_millis(), 1_700_000_000_000);
        assert_eq!(loaded.get("title"), Some(&FieldValue::from("t7")));
        assert!(persister.reload_if_newer(&loaded).expect("reload").is_none());
    }

    #[test]
    fn fetch_all_skips_hidden_and_foreign_files() {
        let dir = tempdir().expect("Failed to create temp dir");
        let persister = JsonFilePersister::<MappedModel>::new(dir.path());
        persister.persist(&row(1, 1_700_000_000_000)).expect("persist");
        persister.persist(&row(2, 1_700_000_001_000)).expect("persist");
        fs::write(dir.path().join(".hidden.json"), "{}").expect("write");
        fs::write(dir.path().join("notes.txt"), "x").expect("write");
        fs::write(dir.path().join("3.toml"), "").expect("write");

        let items = persister.fetch_all().expect("fetch");
        let ids: Vec<_> = items.iter().filter_map(|m| m.id()).collect();
        assert_eq!(ids, vec![ModelId(2), ModelId(1)]);
    }

    #[test]
    fn id_taken_from_file_name_when_missing() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("42.json"), r#"{"values":{"title":"x"}}"#).expect("write");
        let persister = JsonFilePersister::<MappedModel>::new(dir.path());
        let item = persister.fetch_one(ModelId(42)).expect("fetch").expect("exists");
        assert_eq!(item.id(), Some(ModelId(42)));
    }

    #[test]
    fn reload_if_newer_detects_external_write() {
        let dir = tempdir().expect("Failed to create temp dir");
        let persister = JsonFilePersister::<MappedModel>::new(dir.path());
        persister.persist(&row(3, 1_700_000_000_000)).expect("persist");
        let stale = row(3, 1_600_000_000_000);
        assert!(persister.reload_if_newer(&stale).expect("reload").is_some());
    }

    #[test]
    fn read_only_bucket_requires_existing_folder() {
        let dir = tempdir().expect("Failed to create temp dir");
        let missing = dir.path().join("missing");
        let persister = JsonFilePersister::<MappedModel>::new(&missing);
        let context = PersisterContext {
            bucket: "articles".into(),
            writable: false,
        };
        assert!(matches!(persister.init(&context), Err(DataError::Config(_))));

        let context = PersisterContext {
            bucket: "articles".into(),
            writable: true,
        };
        persister.init(&context).expect("init");
        assert!(missing.is_dir());
    }

    #[test]
    fn hard_delete_is_idempotent() {
        let dir = tempdir().expect("Failed to create temp dir");
        let persister = JsonFilePersister::<MappedModel>::new(dir.path());
        persister.persist(&row(9, 1_700_000_000_000)).expect("persist");
        persister.hard_delete(&row(9, 0)).expect("delete");
        persister.hard_delete(&row(9, 0)).expect("delete again");
        assert!(persister.fetch_one(ModelId(9)).expect("fetch").is_none());
    }

    #[test]
    fn toml_files_round_trip_without_nulls() {
        let dir = tempdir().expect("Failed to create temp dir");
        let persister = TomlFilePersister::<MappedModel>::new(dir.path());
        let mut item = row(5, 1_700_000_000_000)
            .with("views", 12)
            .with("published", true);
        item.values.insert("author".to_string(), FieldValue::Null);
        persister.persist(&item).expect("persist");

        let text = fs::read_to_string(dir.path().join("5.toml")).expect("read");
        assert!(text.contains("views = 12"));
        assert!(!text.contains("author"));

        let loaded = persister.fetch_one(ModelId(5)).expect("fetch").expect("exists");
        assert_eq!(loaded.get("title"), Some(&FieldValue::from("t5")));
        assert_eq!(loaded.get("views"), Some(&FieldValue::Int(12)));
        assert_eq!(loaded.get("published"), Some(&FieldValue::Bool(true)));
        assert_eq!(loaded.value_of("author"), FieldValue::Null);
        assert_eq!(loaded.last_modified_millis(), 1_700_000_000_000);
        assert_eq!(persister.fetch_all().expect("fetch").len(), 1);
    }

    #[test]
    fn toml_watcher_loads_and_unloads_external_files() {
        let dir = tempdir().expect("Failed to create temp dir");
        let persister = Arc::new(
            TomlFilePersister::<MappedModel>::new(dir.path())
                .with_watch_interval(Duration::from_millis(20)),
        );
        let stash: Arc<dyn Stash<MappedModel>> = Arc::new(
            LocalMemoryStash::new(StashContext {
                bucket: "notes".to_string(),
                persister: Arc::clone(&persister) as Arc<dyn Persister<MappedModel>>,
                hooks: Arc::new(NoHooks),
                tickets: Arc::new(SequenceTickets::default()),
                filter_cache: Arc::new(FilterCache::new(Duration::from_secs(60))),
                keys: vec![KeyField::key("title")],
                lightweight_mode: false,
            })
            .expect("stash"),
        );
        persister
            .attach_watcher(Arc::downgrade(&stash))
            .expect("watch");
        assert!(persister.is_watching());

        // Written by another process: a temp file renamed into place.
        let tmp = dir.path().join(".incoming");
        fs::write(&tmp, "[values]\ntitle = \"external\"\n").expect("write");
        fs::rename(&tmp, dir.path().join("11.toml")).expect("rename");
        assert!(wait_until(|| stash
            .for_id(ModelId(11))
            .expect("read")
            .is_some_and(|m| m.get("title") == Some(&FieldValue::from("external")))));

        fs::remove_file(dir.path().join("11.toml")).expect("remove");
        assert!(wait_until(|| stash.in_memory_count() == 0));

        persister.stop_watcher();
        assert!(!persister.is_watching());
    }
}
