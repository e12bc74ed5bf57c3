//! Lazily-opened, cached collection handles.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use docdriver_core::{
    backend::{CollectionStore, CollectionStoreOpener},
    error::{DriverError, DriverResult},
};

/// File extension of collection files.
pub const COLLECTION_FILE_EXTENSION: &str = "db";

type HandleCell<S> = Arc<OnceCell<Arc<S>>>;


/// Checks that a collection id maps onto a file directly inside the data directory.
pub fn validate_collection_id(collection_id: &str) -> DriverResult<()> {
    let invalid = collection_id.is_empty()
        || collection_id == "."
        || collection_id == ".."
        || collection_id.contains(['/', '\\', '\0']);

    if invalid {
        return Err(DriverError::InvalidCollectionId(collection_id.to_string()));
    }

    Ok(())
}

/// Maps collection ids to their open store handles and owns the lifecycle gate.
///
/// Handles are created on first use. Concurrent first uses of the same id share a single
/// open; a failed open is not remembered, so the next call tries again.
///
/// Handles dropped by [`close`](Self::close) are remembered weakly. While an operation
/// still holds one, the next resolve of that id reuses it instead of opening the file a
/// second time, since opening compacts the file by renaming over it.
#[derive(Debug)]
pub struct ConnectionRegistry<O: CollectionStoreOpener> {
    data_directory: PathBuf,
    opener: O,
    closing: AtomicBool,
    handles: Mutex<HashMap<String, HandleCell<O::Store>>>,
    retired: Mutex<HashMap<String, Weak<O::Store>>>,
}

impl<O: CollectionStoreOpener> ConnectionRegistry<O> {
    /// Creates an open registry with no cached handles.
    pub fn new(data_directory: impl Into<PathBuf>, opener: O) -> Self {
        Self {
            data_directory: data_directory.into(),
            opener,
            closing: AtomicBool::new(false),
            handles: Mutex::new(HashMap::new()),
            retired: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_directory(&self) -> &Path {
        &self.data_directory
    }

    /// Path of the file backing `collection_id`.
    pub fn collection_path(&self, collection_id: &str) -> PathBuf {
        self.data_directory
            .join(format!("{collection_id}.{COLLECTION_FILE_EXTENSION}"))
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Fails with [`DriverError::DriverClosed`] while the registry is closing.
    pub fn ensure_open(&self) -> DriverResult<()> {
        if self.is_closing() {
            return Err(DriverError::DriverClosed);
        }

        Ok(())
    }

    /// Returns the handle for `collection_id`, opening the collection file on first use.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::DriverClosed`] while closing,
    /// [`DriverError::InvalidCollectionId`] for ids that cannot name a file, and any
    /// error raised while creating the data directory or opening the file.
    pub async fn resolve(&self, collection_id: &str) -> DriverResult<Arc<O::Store>> {
        self.ensure_open()?;
        validate_collection_id(collection_id)?;

        let cell = self
            .handles
            .lock()
            .entry(collection_id.to_string())
            .or_default()
            .clone();

        let store = Arc::clone(
            cell.get_or_try_init(|| self.open_store(collection_id))
                .await?,
        );

        // A close() that ran while this handle was opening has already drained its cell.
        let cached = self
            .handles
            .lock()
            .get(collection_id)
            .is_some_and(|current| Arc::ptr_eq(current, &cell));
        if !cached {
            self.retire(collection_id, &store);
        }

        Ok(store)
    }

    fn retire(&self, collection_id: &str, store: &Arc<O::Store>) {
        self.retired
            .lock()
            .insert(collection_id.to_string(), Arc::downgrade(store));
    }

    async fn open_store(&self, collection_id: &str) -> DriverResult<Arc<O::Store>> {
        let in_use = self
            .retired
            .lock()
            .remove(collection_id)
            .and_then(|store| store.upgrade());
        if let Some(store) = in_use {
            debug!(collection = collection_id, "reusing collection handle still held by an operation");
            return Ok(store);
        }

        tokio::fs::create_dir_all(&self.data_directory).await?;

        let path = self.collection_path(collection_id);
        let store = self.opener.open(&path).await?;

        debug!(collection = collection_id, path = %path.display(), "opened collection");

        Ok(Arc::new(store))
    }

    /// Ids of the collections with an open handle.
    pub fn collections(&self) -> Vec<String> {
        let mut ids = self
            .handles
            .lock()
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();

        ids.sort();
        ids
    }

    /// Leaves the closing state. Handles are reopened lazily.
    pub fn open(&self) {
        self.closing.store(false, Ordering::SeqCst);
    }

    /// Enters the closing state, drops every cached handle and flushes it.
    ///
    /// Operations that already resolved a handle finish on it, and a reopen hands that
    /// same handle out again until they are done. Every handle is flushed even when one
    /// fails; the first failure is returned.
    pub async fn close(&self) -> DriverResult<()> {
        self.closing.store(true, Ordering::SeqCst);

        let drained = self.handles.lock().drain().collect::<Vec<_>>();
        self.retired.lock().retain(|_, store| store.strong_count() > 0);
        let mut result = Ok(());

        for (collection_id, cell) in drained {
            let Some(store) = cell.get() else {
                continue;
            };
            self.retire(&collection_id, store);

            if let Err(err) = store.flush().await {
                warn!(collection = %collection_id, error = %err, "failed to flush collection on close");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docdriver_file::{FileStore, FileStoreOpener};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct CountingOpener {
        inner: FileStoreOpener,
        opens: AtomicUsize,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl CollectionStoreOpener for CountingOpener {
        type Store = FileStore;

        async fn open(&self, path: &Path) -> DriverResult<Self::Store> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;

            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Err(DriverError::Storage("simulated open failure".to_string()));
            }

            self.inner.open(path).await
        }
    }

    #[test]
    fn test_validate_collection_id() {
        assert!(validate_collection_id("users").is_ok());
        assert!(validate_collection_id("users.archive").is_ok());

        for id in ["", ".", "..", "a/b", "a\\b", "a\0b"] {
            assert!(matches!(
                validate_collection_id(id),
                Err(DriverError::InvalidCollectionId(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_resolve_is_single_flight() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let registry = ConnectionRegistry::new(temp_dir.path().join("nested"), CountingOpener::default());

        let handles = futures::future::try_join_all((0..8).map(|_| registry.resolve("users")))
            .await
            .expect("resolve should succeed");

        assert_eq!(registry.opener.opens.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|handle| Arc::ptr_eq(handle, &handles[0])));
        assert_eq!(registry.collections(), vec!["users".to_string()]);
        assert!(registry.collection_path("users").exists());
    }

    #[tokio::test]
    async fn test_failed_open_is_retried() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let opener = CountingOpener {
            failures_left: AtomicUsize::new(1),
            ..CountingOpener::default()
        };
        let registry = ConnectionRegistry::new(temp_dir.path(), opener);

        assert!(registry.resolve("users").await.is_err());
        assert!(registry.collections().is_empty());

        registry.resolve("users").await.expect("second resolve should succeed");
        assert_eq!(registry.opener.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_gates_and_drains() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let registry = ConnectionRegistry::new(temp_dir.path(), CountingOpener::default());

        let first = registry.resolve("users").await.unwrap();
        registry.close().await.expect("close should succeed");

        assert!(registry.is_closing());
        assert!(registry.collections().is_empty());
        assert!(matches!(registry.resolve("users").await, Err(DriverError::DriverClosed)));

        drop(first);
        registry.open();
        registry.resolve("users").await.unwrap();

        assert_eq!(registry.opener.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reopen_reuses_handle_still_in_use() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let registry = ConnectionRegistry::new(temp_dir.path(), CountingOpener::default());

        let held = registry.resolve("users").await.unwrap();
        held.insert(bson::doc! { "n": 1 }).await.unwrap();

        registry.close().await.unwrap();
        registry.open();
        let reopened = registry.resolve("users").await.unwrap();

        assert!(Arc::ptr_eq(&held, &reopened));
        assert_eq!(registry.opener.opens.load(Ordering::SeqCst), 1);

        held.insert(bson::doc! { "n": 2 }).await.unwrap();
        drop(held);
        drop(reopened);

        registry.close().await.unwrap();
        registry.open();
        let fresh = registry.resolve("users").await.unwrap();

        assert_eq!(registry.opener.opens.load(Ordering::SeqCst), 2);
        assert_eq!(fresh.count(None).await.unwrap(), 2);
    }
}
