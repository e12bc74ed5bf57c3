//! The driver: CRUD verbs over independent, lazily-opened collections.
//!
//! # Example
//!
//! ```ignore
//! use docdriver::prelude::*;
//! use bson::doc;
//!
//! let driver = Driver::new(DriverConfig::new("./data")).await?;
//!
//! let created = driver.post("users", doc! { "name": "Alice" }).await?;
//! let everyone = driver
//!     .get("users", None, GetOptions::new().order(["asc(name)"]).limit(10))
//!     .await?;
//! let Changes { changes } = driver.patch("users", doc! { "active": true }, None).await?;
//! ```

use std::sync::Arc;
use bson::Document;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use docdriver_core::{
    backend::{CollectionStore, CollectionStoreOpener},
    document::{generate_id, internal_id, merge_fields, replace_fields, strip_internal, with_identity},
    error::DriverResult,
    query::Query,
};
use docdriver_file::FileStoreOpener;

use crate::{
    collection::CollectionRef,
    config::DriverConfig,
    registry::ConnectionRegistry,
    translate::{parse_order, parse_projection, parse_query},
};

/// Number of documents affected by a put, patch or del.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
    pub changes: u64,
}

impl Changes {
    pub fn new(changes: u64) -> Self {
        Self { changes }
    }
}

/// Optional parameters of [`Driver::get`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Fields to return. `id` is always included; empty means every field.
    pub fields: Vec<String>,
    /// Sort tokens shaped `asc(field)` or `desc(field)`, most significant first.
    pub order: Vec<String>,
    /// Maximum number of documents to return. `None` or `0` means no limit.
    pub limit: Option<usize>,
    /// Number of matching documents to skip before the limit applies.
    pub skip: Option<usize>,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = order.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    fn to_query(&self, filter: Option<&Document>) -> DriverResult<Query> {
        let mut builder = Query::builder().maybe_filter(parse_query(filter)?);

        if let Some(sort) = parse_order(&self.order)? {
            builder = builder.sort(sort);
        }
        if let Some(projection) = parse_projection(&self.fields) {
            builder = builder.projection(projection);
        }
        if let Some(skip) = self.skip.filter(|skip| *skip > 0) {
            builder = builder.offset(skip);
        }
        if let Some(limit) = self.limit.filter(|limit| *limit > 0) {
            builder = builder.limit(limit);
        }

        Ok(builder.build())
    }
}


/// Builder for a [`Driver`].
///
/// By default every collection is opened as a [`FileStore`](docdriver_file::FileStore)
/// configured from the [`DriverConfig`]; [`with_opener`](Self::with_opener) swaps in
/// another [`CollectionStoreOpener`].
#[derive(Debug)]
pub struct DriverBuilder<O: CollectionStoreOpener = FileStoreOpener> {
    config: DriverConfig,
    opener: O,
}

impl<O: CollectionStoreOpener> DriverBuilder<O> {
    /// Replaces the opener used for collection files.
    pub fn with_opener<P: CollectionStoreOpener>(self, opener: P) -> DriverBuilder<P> {
        DriverBuilder {
            config: self.config,
            opener,
        }
    }

    /// Validates the configuration and creates the data directory.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Initialization`](crate::DriverError::Initialization) for an invalid configuration and
    /// [`DriverError::Io`](crate::DriverError::Io) when the data directory cannot be created.
    pub async fn build(self) -> DriverResult<Driver<O>> {
        self.config.validate()?;

        let data_directory = self.config.data_directory();
        if let Err(err) = tokio::fs::create_dir_all(data_directory).await {
            error!(data_directory = %data_directory.display(), error = %err, "could not create data directory");
            return Err(err.into());
        }

        info!(data_directory = %data_directory.display(), "driver ready");

        Ok(Driver {
            registry: ConnectionRegistry::new(data_directory, self.opener),
            config: self.config,
        })
    }
}


/// A storage driver over a directory of collection files.
///
/// The driver starts open. [`close`](Self::close) makes every operation fail with
/// [`DriverError::DriverClosed`](crate::DriverError::DriverClosed) until [`open`](Self::open) is called again.
#[derive(Debug)]
pub struct Driver<O: CollectionStoreOpener = FileStoreOpener> {
    config: DriverConfig,
    registry: ConnectionRegistry<O>,
}

impl Driver<FileStoreOpener> {
    /// Creates a builder that opens collections as files configured from `config`.
    pub fn builder(config: DriverConfig) -> DriverBuilder<FileStoreOpener> {
        DriverBuilder {
            opener: config.store_opener(),
            config,
        }
    }

    /// Builds a driver with the default file store.
    pub async fn new(config: DriverConfig) -> DriverResult<Self> {
        Self::builder(config).build().await
    }
}

impl<O: CollectionStoreOpener> Driver<O> {
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Returns a handle binding `collection_id` to the CRUD verbs.
    pub fn collection<'a>(&'a self, collection_id: &str) -> CollectionRef<'a, O> {
        CollectionRef::new(collection_id.to_string(), self)
    }

    /// Ids of the collections currently holding an open handle.
    pub fn collections(&self) -> Vec<String> {
        self.registry.collections()
    }

    pub fn is_closing(&self) -> bool {
        self.registry.is_closing()
    }

    /// Makes the driver accept operations again.
    pub fn open(&self) {
        self.registry.open();
        info!("driver opened");
    }

    /// Makes every subsequent operation fail with [`DriverError::DriverClosed`](crate::DriverError::DriverClosed) and
    /// releases the cached collection handles after flushing them.
    pub async fn close(&self) -> DriverResult<()> {
        let result = self.registry.close().await;
        info!("driver closed");
        result
    }

    async fn resolve(&self, collection_id: &str) -> DriverResult<Arc<O::Store>> {
        self.registry.resolve(collection_id).await
    }

    /// Counts the documents of `collection_id` matching `query`.
    pub async fn count(&self, collection_id: &str, query: Option<&Document>) -> DriverResult<u64> {
        self.registry.ensure_open()?;
        let filter = parse_query(query)?;

        self.resolve(collection_id).await?.count(filter.as_ref()).await
    }

    /// Returns the documents of `collection_id` matching `query`.
    ///
    /// Documents come back in insertion order unless `options.order` is given. `skip`
    /// applies before `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidSortDirection`](crate::DriverError::InvalidSortDirection) or [`DriverError::InvalidSortToken`](crate::DriverError::InvalidSortToken)
    /// for bad sort tokens, [`DriverError::InvalidQuery`](crate::DriverError::InvalidQuery) for a bad filter, and any store
    /// failure unchanged.
    pub async fn get(
        &self,
        collection_id: &str,
        query: Option<&Document>,
        options: GetOptions,
    ) -> DriverResult<Vec<Document>> {
        self.registry.ensure_open()?;
        let query = options.to_query(query)?;

        let documents = self.resolve(collection_id).await?.find(&query).await?;

        Ok(documents.into_iter().map(strip_internal).collect())
    }

    /// Inserts `document` under a newly generated `id` and returns the inserted record.
    ///
    /// A caller-supplied `id` is replaced and a caller-supplied `_id` is dropped.
    pub async fn post(&self, collection_id: &str, document: Document) -> DriverResult<Document> {
        self.registry.ensure_open()?;
        let record = with_identity(document, generate_id());

        self.resolve(collection_id).await?.insert(record.clone()).await?;

        Ok(record)
    }

    /// Replaces the fields of every document matching `query` with those of `document`,
    /// keeping each match's `id`.
    pub async fn put(
        &self,
        collection_id: &str,
        document: Document,
        query: Option<&Document>,
    ) -> DriverResult<Changes> {
        self.update_matches(collection_id, query, |existing| replace_fields(existing, &document))
            .await
    }

    /// Writes the top-level fields of `document` over every document matching `query`.
    pub async fn patch(
        &self,
        collection_id: &str,
        document: Document,
        query: Option<&Document>,
    ) -> DriverResult<Changes> {
        self.update_matches(collection_id, query, |existing| merge_fields(existing, &document))
            .await
    }

    /// Removes every document matching `query`.
    pub async fn del(&self, collection_id: &str, query: Option<&Document>) -> DriverResult<Changes> {
        self.registry.ensure_open()?;
        let filter = parse_query(query)?;

        let removed = self
            .resolve(collection_id)
            .await?
            .remove(filter.as_ref(), true)
            .await?;

        Ok(Changes::new(removed))
    }

    /// Finds the matches of `query` and issues one update per match, all awaited as a batch.
    async fn update_matches<F>(
        &self,
        collection_id: &str,
        query: Option<&Document>,
        rewrite: F,
    ) -> DriverResult<Changes>
    where
        F: Fn(&Document) -> Document,
    {
        self.registry.ensure_open()?;
        let filter = parse_query(query)?;

        let store = self.resolve(collection_id).await?;
        let matches = store
            .find(&Query::builder().maybe_filter(filter).build())
            .await?;

        let updates = matches
            .iter()
            .map(|existing| Ok((internal_id(existing)?, rewrite(existing))))
            .collect::<DriverResult<Vec<_>>>()?;

        try_join_all(
            updates
                .into_iter()
                .map(|(id, replacement)| store.update_one(id, replacement)),
        )
        .await?;

        Ok(Changes::new(matches.len() as u64))
    }
}
