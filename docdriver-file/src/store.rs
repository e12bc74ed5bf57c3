//! File-backed storage for a single collection.
//!
//! A [`FileStore`] keeps the live documents of one collection in memory and mirrors every
//! write into an append-only log file (see [`crate::persistence`]). Opening a store
//! replays and compacts that file.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};
use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use tokio::fs::File;
use tracing::{debug, info};
use uuid::Uuid;

use docdriver_core::{
    backend::{CollectionStore, CollectionStoreOpener},
    document::INTERNAL_ID_FIELD,
    error::{DriverError, DriverResult},
    query::{Expr, Query},
};

use crate::{
    evaluator::{DocumentEvaluator, Projection, SortOrder},
    persistence,
};

/// Default fraction of unreadable log lines tolerated when opening a collection file.
pub const DEFAULT_CORRUPT_ALERT_THRESHOLD: f64 = 0.1;


/// Options controlling how a [`FileStore`] persists its log.
#[derive(Debug, Clone, PartialEq)]
pub struct FileStoreOptions {
    /// Force every appended write down to disk before the operation completes.
    pub sync_writes: bool,
    /// Fraction of unreadable lines above which opening the file fails.
    pub corrupt_alert_threshold: f64,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            sync_writes: false,
            corrupt_alert_threshold: DEFAULT_CORRUPT_ALERT_THRESHOLD,
        }
    }
}

#[derive(Debug)]
struct StoreState {
    /// Live documents keyed by insertion sequence; iteration order is store order.
    documents: BTreeMap<u64, Document>,
    /// Internal `_id` to insertion sequence.
    sequences: HashMap<String, u64>,
    next_sequence: u64,
    log: File,
}

impl StoreState {
    fn new(documents: Vec<Document>, log: File) -> Self {
        let mut state = Self {
            documents: BTreeMap::new(),
            sequences: HashMap::new(),
            next_sequence: 0,
            log,
        };

        for document in documents {
            state.put_new(document);
        }

        state
    }

    fn put_new(&mut self, document: Document) {
        if let Some(id) = document.get(INTERNAL_ID_FIELD).and_then(Bson::as_str) {
            self.sequences.insert(id.to_string(), self.next_sequence);
        }
        self.documents.insert(self.next_sequence, document);
        self.next_sequence += 1;
    }

    fn matching(&self, filter: Option<&Expr>) -> DriverResult<Vec<(u64, &Document)>> {
        let mut matched = Vec::new();

        for (sequence, document) in &self.documents {
            if DocumentEvaluator::matches(document, filter)? {
                matched.push((*sequence, document));
            }
        }

        Ok(matched)
    }
}


/// Thread-safe, file-backed document storage for one collection.
///
/// Reads share an async read-write lock; writes take it exclusively, append their log
/// lines, and only then change the in-memory state. Writes to one collection are
/// therefore serialized in the order they acquire the lock.
///
/// # Example
///
/// ```ignore
/// use docdriver_file::{FileStore, FileStoreOptions};
/// use docdriver_core::backend::CollectionStore;
/// use bson::doc;
///
/// let store = FileStore::open("data/users.db", FileStoreOptions::default()).await?;
/// let stored = store.insert(doc! { "name": "Alice" }).await?;
/// assert!(stored.contains_key("_id"));
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    options: FileStoreOptions,
    state: RwLock<StoreState>,
}

impl FileStore {
    /// Opens the collection file at `path`, creating it if needed.
    ///
    /// The log is replayed and then compacted.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Storage`] when more than `corrupt_alert_threshold` of the
    /// file's records are unreadable, and [`DriverError::Io`] on file system errors.
    pub async fn open(path: impl AsRef<Path>, options: FileStoreOptions) -> DriverResult<Self> {
        let path = path.as_ref().to_path_buf();
        let replay = persistence::replay(&path).await?;

        if replay.lines > 0 {
            let rate = replay.corrupt as f64 / replay.lines as f64;

            if rate > options.corrupt_alert_threshold {
                return Err(DriverError::Storage(format!(
                    "{} of {} records in {} are unreadable, above the {} threshold",
                    replay.corrupt,
                    replay.lines,
                    path.display(),
                    options.corrupt_alert_threshold,
                )));
            }
        }

        persistence::rewrite(&path, &replay.documents, options.sync_writes).await?;
        let log = persistence::open_append(&path).await?;

        debug!(path = %path.display(), documents = replay.documents.len(), "opened collection file");

        Ok(Self {
            path,
            options,
            state: RwLock::new(StoreState::new(replay.documents, log)),
        })
    }

    /// Creates a builder for opening stores with custom options.
    pub fn builder() -> FileStoreOpener {
        FileStoreOpener::default()
    }

    /// Path of the collection file backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the collection file with one record per live document.
    pub async fn compact(&self) -> DriverResult<()> {
        let mut state = self.state.write().await;

        persistence::rewrite(&self.path, state.documents.values(), self.options.sync_writes).await?;
        state.log = persistence::open_append(&self.path).await?;

        info!(path = %self.path.display(), documents = state.documents.len(), "compacted collection file");

        Ok(())
    }
}

#[async_trait]
impl CollectionStore for FileStore {
    async fn count(&self, filter: Option<&Expr>) -> DriverResult<u64> {
        let state = self.state.read().await;

        Ok(state.matching(filter)?.len() as u64)
    }

    async fn find(&self, query: &Query) -> DriverResult<Vec<Document>> {
        let sort = query
            .sort
            .as_ref()
            .map(SortOrder::from_directive)
            .transpose()?;
        let projection = query
            .projection
            .as_ref()
            .map(Projection::from_directive)
            .transpose()?;

        let mut documents = {
            let state = self.state.read().await;

            state
                .matching(query.filter.as_ref())?
                .into_iter()
                .map(|(_, document)| document.clone())
                .collect::<Vec<_>>()
        };

        if let Some(sort) = &sort {
            documents.sort_by(|a, b| sort.compare(a, b));
        }

        Ok(documents
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|document| match &projection {
                Some(projection) => projection.apply(document),
                None => document,
            })
            .collect())
    }

    async fn insert(&self, mut document: Document) -> DriverResult<Document> {
        let mut state = self.state.write().await;

        let id = match document.get(INTERNAL_ID_FIELD) {
            Some(Bson::String(id)) => id.clone(),
            Some(_) => {
                return Err(DriverError::InvalidDocument(format!(
                    "{INTERNAL_ID_FIELD} must be a string"
                )));
            }
            None => {
                let id = Uuid::new_v4().simple().to_string();
                document.insert(INTERNAL_ID_FIELD, id.clone());
                id
            }
        };

        if state.sequences.contains_key(&id) {
            return Err(DriverError::Storage(format!(
                "a record with {INTERNAL_ID_FIELD} {id} already exists in {}",
                self.path.display()
            )));
        }

        let line = persistence::encode_put(&document)?;
        persistence::append(&mut state.log, &line, self.options.sync_writes).await?;
        state.put_new(document.clone());

        Ok(document)
    }

    async fn update_one(&self, internal_id: &str, mut replacement: Document) -> DriverResult<u64> {
        let mut state = self.state.write().await;

        let Some(sequence) = state.sequences.get(internal_id).copied() else {
            return Ok(0);
        };

        replacement.insert(INTERNAL_ID_FIELD, internal_id);

        let line = persistence::encode_put(&replacement)?;
        persistence::append(&mut state.log, &line, self.options.sync_writes).await?;
        state.documents.insert(sequence, replacement);

        Ok(1)
    }

    async fn remove(&self, filter: Option<&Expr>, multi: bool) -> DriverResult<u64> {
        let mut state = self.state.write().await;

        let mut removed = Vec::new();
        for (sequence, document) in state.matching(filter)? {
            if let Some(id) = document.get(INTERNAL_ID_FIELD).and_then(Bson::as_str) {
                removed.push((sequence, id.to_string()));
            }
            if !multi {
                break;
            }
        }

        if removed.is_empty() {
            return Ok(0);
        }

        let mut lines = String::new();
        for (_, id) in &removed {
            lines.push_str(&persistence::encode_deleted(id)?);
        }
        persistence::append(&mut state.log, &lines, self.options.sync_writes).await?;

        for (sequence, id) in &removed {
            state.documents.remove(sequence);
            state.sequences.remove(id);
        }

        Ok(removed.len() as u64)
    }

    async fn flush(&self) -> DriverResult<()> {
        let mut state = self.state.write().await;

        state.log.sync_all().await?;

        Ok(())
    }
}


/// Opens [`FileStore`]s with a fixed set of options.
///
/// This is the [`CollectionStoreOpener`] the driver uses by default.
///
/// # Example
///
/// ```ignore
/// use docdriver_file::FileStore;
/// use docdriver_core::backend::CollectionStoreOpener;
///
/// let opener = FileStore::builder().sync_writes(true);
/// let store = opener.open(Path::new("data/users.db")).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct FileStoreOpener {
    options: FileStoreOptions,
}

impl FileStoreOpener {
    /// Creates an opener using the given options.
    pub fn new(options: FileStoreOptions) -> Self {
        Self { options }
    }

    /// Forces every appended write down to disk.
    pub fn sync_writes(mut self, sync_writes: bool) -> Self {
        self.options.sync_writes = sync_writes;
        self
    }

    /// Sets the tolerated fraction of unreadable records.
    pub fn corrupt_alert_threshold(mut self, threshold: f64) -> Self {
        self.options.corrupt_alert_threshold = threshold;
        self
    }

    /// Options applied to every store this opener creates.
    pub fn options(&self) -> &FileStoreOptions {
        &self.options
    }
}

#[async_trait]
impl CollectionStoreOpener for FileStoreOpener {
    type Store = FileStore;

    async fn open(&self, path: &Path) -> DriverResult<Self::Store> {
        FileStore::open(path, self.options.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docdriver_core::query::{Filter, parse_filter};

    async fn open_store(dir: &Path) -> FileStore {
        FileStore::open(dir.join("tests.db"), FileStoreOptions::default())
            .await
            .expect("FileStore::open should succeed")
    }

    fn number(document: &Document, field: &str) -> f64 {
        match document.get(field) {
            Some(Bson::Int32(value)) => *value as f64,
            Some(Bson::Int64(value)) => *value as f64,
            Some(Bson::Double(value)) => *value,
            other => panic!("expected a number for {field}, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_creates_the_file() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let store = open_store(temp_dir.path()).await;

        assert!(store.path().exists());
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_assigns_internal_id() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let store = open_store(temp_dir.path()).await;

        let stored = store.insert(doc! { "a": 1 }).await.expect("insert should succeed");
        let id = stored.get(INTERNAL_ID_FIELD).and_then(Bson::as_str).expect("has _id");

        assert!(!id.is_empty());
        assert_eq!(store.find(&Query::new()).await.unwrap(), vec![stored.clone()]);

        let duplicate = store.insert(stored).await;
        assert!(matches!(duplicate, Err(DriverError::Storage(_))));
    }

    #[tokio::test]
    async fn test_find_sorts_skips_limits_and_projects() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let store = open_store(temp_dir.path()).await;

        for a in [3, 1, 4, 2] {
            store.insert(doc! { "a": a, "b": "x" }).await.unwrap();
        }

        let query = Query::builder()
            .sort(doc! { "a": -1 })
            .offset(1)
            .limit(2)
            .projection(doc! { "a": 1, "_id": 0 })
            .build();

        let documents = store.find(&query).await.unwrap();

        assert_eq!(documents, vec![doc! { "a": 3 }, doc! { "a": 2 }]);
    }

    #[tokio::test]
    async fn test_find_without_sort_keeps_insertion_order() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let store = open_store(temp_dir.path()).await;

        for a in [3, 1, 2] {
            store.insert(doc! { "a": a }).await.unwrap();
        }

        let order = store
            .find(&Query::new())
            .await
            .unwrap()
            .iter()
            .map(|document| number(document, "a"))
            .collect::<Vec<_>>();

        assert_eq!(order, vec![3.0, 1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_update_one_keeps_position_and_internal_id() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let store = open_store(temp_dir.path()).await;

        let first = store.insert(doc! { "a": 1 }).await.unwrap();
        store.insert(doc! { "a": 2 }).await.unwrap();
        let id = first.get_str(INTERNAL_ID_FIELD).unwrap().to_string();

        assert_eq!(store.update_one(&id, doc! { "a": 10, "_id": "forged" }).await.unwrap(), 1);
        assert_eq!(store.update_one("missing", doc! { "a": 0 }).await.unwrap(), 0);

        let documents = store.find(&Query::new()).await.unwrap();
        assert_eq!(documents[0], doc! { "a": 10, "_id": id.as_str() });
    }

    #[tokio::test]
    async fn test_remove_single_and_multi() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let store = open_store(temp_dir.path()).await;

        for a in [1, 2, 3, 4] {
            store.insert(doc! { "a": a, "even": a % 2 == 0 }).await.unwrap();
        }

        let odd = Filter::eq("even", false);
        assert_eq!(store.remove(Some(&odd), false).await.unwrap(), 1);
        assert_eq!(store.count(Some(&odd)).await.unwrap(), 1);

        assert_eq!(store.remove(None, true).await.unwrap(), 3);
        assert_eq!(store.remove(None, true).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");

        {
            let store = open_store(temp_dir.path()).await;
            let kept = store.insert(doc! { "name": "kept" }).await.unwrap();
            store.insert(doc! { "name": "dropped" }).await.unwrap();

            let id = kept.get_str(INTERNAL_ID_FIELD).unwrap().to_string();
            store.update_one(&id, doc! { "name": "kept", "version": 2 }).await.unwrap();

            let dropped = parse_filter(&doc! { "name": "dropped" }).unwrap();
            store.remove(dropped.as_ref(), true).await.unwrap();
            store.flush().await.unwrap();
        }

        let store = open_store(temp_dir.path()).await;
        let documents = store.find(&Query::new()).await.unwrap();

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].get_str("name").unwrap(), "kept");
        assert_eq!(number(&documents[0], "version"), 2.0);

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_open_fails_above_corruption_threshold() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let path = temp_dir.path().join("tests.db");
        let good = persistence::encode_put(&doc! { "_id": "a", "n": 1 }).unwrap();
        tokio::fs::write(&path, format!("{good}garbage\n")).await.unwrap();

        let strict = FileStore::open(&path, FileStoreOptions::default()).await;
        assert!(matches!(strict, Err(DriverError::Storage(_))));

        let lenient = FileStore::builder()
            .corrupt_alert_threshold(0.5)
            .open(&path)
            .await
            .expect("open should tolerate one bad line in two");
        assert_eq!(lenient.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_compact_rewrites_log() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let store = open_store(temp_dir.path()).await;

        let stored = store.insert(doc! { "a": 1 }).await.unwrap();
        let id = stored.get_str(INTERNAL_ID_FIELD).unwrap().to_string();
        for n in 2..5 {
            store.update_one(&id, doc! { "a": n }).await.unwrap();
        }

        store.compact().await.expect("compact should succeed");
        store.insert(doc! { "a": 9 }).await.unwrap();

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
