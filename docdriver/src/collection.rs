//! A borrowed handle binding one collection id to the driver's CRUD verbs.
//!
//! # Example
//!
//! ```ignore
//! let users = driver.collection("users");
//!
//! users.post(doc! { "name": "Alice" }).await?;
//! let total = users.count(None).await?;
//! ```

use bson::Document;

use docdriver_core::{backend::CollectionStoreOpener, error::DriverResult};

use crate::driver::{Changes, Driver, GetOptions};

/// A collection of a [`Driver`], addressed by id.
///
/// Every call goes through the driver, so the lifecycle gate and the identity rules
/// apply unchanged.
#[derive(Debug)]
pub struct CollectionRef<'a, O: CollectionStoreOpener> {
    id: String,
    driver: &'a Driver<O>,
}

impl<'a, O: CollectionStoreOpener> CollectionRef<'a, O> {
    pub(crate) fn new(id: String, driver: &'a Driver<O>) -> Self {
        Self { id, driver }
    }

    /// Returns the id of this collection.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn count(&self, query: Option<&Document>) -> DriverResult<u64> {
        self.driver.count(&self.id, query).await
    }

    pub async fn get(&self, query: Option<&Document>, options: GetOptions) -> DriverResult<Vec<Document>> {
        self.driver.get(&self.id, query, options).await
    }

    pub async fn post(&self, document: Document) -> DriverResult<Document> {
        self.driver.post(&self.id, document).await
    }

    pub async fn put(&self, document: Document, query: Option<&Document>) -> DriverResult<Changes> {
        self.driver.put(&self.id, document, query).await
    }

    pub async fn patch(&self, document: Document, query: Option<&Document>) -> DriverResult<Changes> {
        self.driver.patch(&self.id, document, query).await
    }

    pub async fn del(&self, query: Option<&Document>) -> DriverResult<Changes> {
        self.driver.del(&self.id, query).await
    }
}
