//! Collection store abstraction for the driver.
//!
//! This module defines the traits that separate the driver from the storage engine that
//! actually persists a collection.
//!
//! # Overview
//!
//! A [`CollectionStore`] is a handle onto one collection's backing storage. It owns the
//! storage-internal `_id` of every record, evaluates filters, and serializes its own
//! writes. A [`CollectionStoreOpener`] creates (or opens) a store for a given file path,
//! and is what the driver's connection registry calls on first access to a collection.
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync`: the driver shares one store handle between all
//! concurrent operations on the same collection, and issues independent per-document
//! updates concurrently.
//!
//! # Examples
//!
//! ```ignore
//! use docdriver_core::backend::{CollectionStore, CollectionStoreOpener};
//! use docdriver_core::query::{Filter, Query};
//! use bson::doc;
//!
//! let store = opener.open(Path::new("/var/data/users.db")).await?;
//! store.insert(doc! { "name": "Alice" }).await?;
//!
//! let matches = store
//!     .find(&Query::builder().filter(Filter::eq("name", "Alice")).build())
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Document;
use std::{fmt::Debug, path::Path, sync::Arc};

use crate::{
    error::DriverResult,
    query::{Expr, Query},
};

/// Abstract interface for the storage behind a single collection.
///
/// Every document returned by a store carries the store's internal `_id`
/// ([`INTERNAL_ID_FIELD`](crate::document::INTERNAL_ID_FIELD)); callers strip it before
/// handing documents outward.
#[async_trait]
pub trait CollectionStore: Send + Sync + Debug {
    /// Counts the documents matching `filter` (`None` matches all).
    async fn count(&self, filter: Option<&Expr>) -> DriverResult<u64>;

    /// Returns the documents selected by `query`, in store order unless a sort directive
    /// is given. The offset is applied before the limit.
    async fn find(&self, query: &Query) -> DriverResult<Vec<Document>>;

    /// Inserts a document, assigning it an internal `_id`, and returns the stored record.
    async fn insert(&self, document: Document) -> DriverResult<Document>;

    /// Replaces the record with internal id `internal_id` by `replacement`.
    ///
    /// Returns the number of records replaced (`0` if the record is gone).
    async fn update_one(&self, internal_id: &str, replacement: Document) -> DriverResult<u64>;

    /// Removes the documents matching `filter`, or only the first one unless `multi` is set.
    ///
    /// Returns the number of records removed.
    async fn remove(&self, filter: Option<&Expr>, multi: bool) -> DriverResult<u64>;

    /// Forces every completed write down to durable storage.
    async fn flush(&self) -> DriverResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<S> CollectionStore for Arc<S>
where
    S: CollectionStore + ?Sized,
{
    async fn count(&self, filter: Option<&Expr>) -> DriverResult<u64> {
        (**self).count(filter).await
    }

    async fn find(&self, query: &Query) -> DriverResult<Vec<Document>> {
        (**self).find(query).await
    }

    async fn insert(&self, document: Document) -> DriverResult<Document> {
        (**self).insert(document).await
    }

    async fn update_one(&self, internal_id: &str, replacement: Document) -> DriverResult<u64> {
        (**self)
            .update_one(internal_id, replacement)
            .await
    }

    async fn remove(&self, filter: Option<&Expr>, multi: bool) -> DriverResult<u64> {
        (**self).remove(filter, multi).await
    }

    async fn flush(&self) -> DriverResult<()> {
        (**self).flush().await
    }
}

/// Factory trait for opening the store behind a collection file.
///
/// Opening must create the file when it does not exist yet; collections are provisioned
/// implicitly on first access.
#[async_trait]
pub trait CollectionStoreOpener: Send + Sync + Debug {
    type Store: CollectionStore + 'static;

    async fn open(&self, path: &Path) -> DriverResult<Self::Store>;
}
