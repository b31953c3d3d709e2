//! Shared fixtures for the integration tests.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stallion_core::{
    DataError, FieldValue, FilterCache, KeyField, LocalMemoryStash, MemoryPersister, Model,
    ModelId, ModelMeta, NoHooks, PartialStash, Persister, SequenceTickets, Stash, StashContext,
};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

/// A typed model with a unique slug and a non-unique author key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub meta: ModelMeta,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub published: bool,
}

impl Article {
    pub fn new(title: &str, slug: &str) -> Self {
        Self {
            title: title.to_string(),
            slug: slug.to_string(),
            ..Self::default()
        }
    }

    pub fn by(mut self, author: &str) -> Self {
        self.author = Some(author.to_string());
        self
    }

    pub fn with_views(mut self, views: i64) -> Self {
        self.views = views;
        self
    }
}

fn text(name: &str, value: FieldValue) -> Result<String, DataError> {
    match value {
        FieldValue::Text(s) => Ok(s),
        other => Err(DataError::Validation(format!(
            "{} expects text, got {}",
            name, other
        ))),
    }
}

impl Model for Article {
    fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ModelMeta {
        &mut self.meta
    }

    fn field_names(&self) -> Vec<String> {
        ["title", "slug", "author", "views", "published"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "title" => Some(self.title.clone().into()),
            "slug" => Some(self.slug.clone().into()),
            "author" => Some(self.author.clone().into()),
            "views" => Some(self.views.into()),
            "published" => Some(self.published.into()),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), DataError> {
        match name {
            "title" => self.title = text(name, value)?,
            "slug" => self.slug = text(name, value)?,
            "author" => {
                self.author = match value {
                    FieldValue::Null => None,
                    other => Some(text(name, other)?),
                }
            }
            "views" => self.views = value.coerce_to(&FieldValue::Int(0)).as_int().unwrap_or(0),
            "published" => {
                self.published = value
                    .coerce_to(&FieldValue::Bool(false))
                    .as_bool()
                    .unwrap_or(false)
            }
            _ => return Err(DataError::UnknownField(name.to_string())),
        }
        Ok(())
    }

    fn declared_keys() -> Vec<KeyField> {
        vec![KeyField::unique("slug"), KeyField::key("author")]
    }
}

pub fn stash_context(
    bucket: &str,
    persister: Arc<dyn Persister<Article>>,
) -> StashContext<Article> {
    StashContext {
        bucket: bucket.to_string(),
        persister,
        hooks: Arc::new(NoHooks),
        tickets: Arc::new(SequenceTickets::default()),
        filter_cache: Arc::new(FilterCache::new(Duration::from_secs(60))),
        keys: Article::declared_keys(),
        lightweight_mode: false,
    }
}

pub fn memory_stash() -> (Arc<MemoryPersister<Article>>, LocalMemoryStash<Article>) {
    let persister = Arc::new(MemoryPersister::new());
    let stash = LocalMemoryStash::new(stash_context(
        "articles",
        Arc::clone(&persister) as Arc<dyn Persister<Article>>,
    ))
    .expect("stash");
    (persister, stash)
}

/// A persister holding `count` articles, the highest id modified last.
pub fn seeded_persister(count: u64) -> Arc<MemoryPersister<Article>> {
    let items = (1..=count).map(|i| {
        let mut article = Article::new(&format!("Article {}", i), &format!("article-{}", i));
        article.set_id(stallion_core::ModelId(i));
        article.set_last_modified_millis(1_000 + i);
        article
    });
    Arc::new(MemoryPersister::with_items(items))
}

pub fn partial_stash(
    persister: &Arc<MemoryPersister<Article>>,
    limit: usize,
) -> PartialStash<Article> {
    let stash = PartialStash::with_limit(
        stash_context("archive", Arc::clone(persister) as Arc<dyn Persister<Article>>),
        limit,
    )
    .expect("stash");
    stash.load_all().expect("load");
    stash
}

// =============================================================================
// PERSISTERS WITH CONTROLLED FAILURE AND TIMING
// =============================================================================

/// Holds the first `persist` call until the test releases it.
pub struct GatedPersister {
    inner: MemoryPersister<Article>,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl GatedPersister {
    /// Returns the persister, a receiver signalled once the first persist
    /// is blocked, and the sender that lets it continue.
    pub fn new() -> (Arc<Self>, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let persister = Arc::new(Self {
            inner: MemoryPersister::new(),
            gate: Mutex::new(Some((entered_tx, release_rx))),
        });
        (persister, entered_rx, release_tx)
    }

    pub fn row_count(&self) -> usize {
        self.inner.len()
    }

    pub fn stored(&self, id: ModelId) -> Option<Article> {
        self.inner.stored(id)
    }
}

impl Persister<Article> for GatedPersister {
    fn fetch_all(&self) -> Result<Vec<Article>, DataError> {
        self.inner.fetch_all()
    }

    fn fetch_one(&self, id: ModelId) -> Result<Option<Article>, DataError> {
        self.inner.fetch_one(id)
    }

    fn persist(&self, item: &Article) -> Result<(), DataError> {
        let gate = self.gate.lock().take();
        if let Some((entered, release)) = gate {
            entered.send(()).expect("test is waiting");
            release
                .recv_timeout(Duration::from_secs(5))
                .expect("released");
        }
        self.inner.persist(item)
    }

    fn hard_delete(&self, item: &Article) -> Result<(), DataError> {
        self.inner.hard_delete(item)
    }
}

/// Rejects every write.
#[derive(Default)]
pub struct FailingPersister;

impl Persister<Article> for FailingPersister {
    fn fetch_all(&self) -> Result<Vec<Article>, DataError> {
        Ok(Vec::new())
    }

    fn fetch_one(&self, _id: ModelId) -> Result<Option<Article>, DataError> {
        Ok(None)
    }

    fn persist(&self, _item: &Article) -> Result<(), DataError> {
        Err(DataError::Io("disk full".to_string()))
    }

    fn hard_delete(&self, _item: &Article) -> Result<(), DataError> {
        Err(DataError::Io("disk full".to_string()))
    }
}
