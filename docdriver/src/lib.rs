//! A storage driver exposing CRUD over independent, file-backed document collections.
//!
//! Each collection is an open-schema set of documents stored in its own file,
//! `<dataDirectory>/<collectionId>.db`, created on first access. The driver translates
//! generic query parameters (filter document, field allow-list, `asc(field)` /
//! `desc(field)` sort tokens, skip and limit) into operations on that collection's store.
//!
//! # Features
//!
//! - **Lazy collections** - A collection's file is opened once, on first use, and cached
//! - **Identity handling** - `post` assigns a UUID `id`; `put` and `patch` never change it
//! - **Replace or merge** - `put` replaces every match's fields, `patch` merges top-level fields
//! - **Lifecycle gate** - `close` rejects operations with [`DriverError::DriverClosed`] until `open`
//!
//! # Quick Start
//!
//! ```ignore
//! use docdriver::prelude::*;
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> DriverResult<()> {
//!     let driver = Driver::new(DriverConfig::new("./data")).await?;
//!
//!     driver.post("tests", doc! { "a": 1, "b": "yes" }).await?;
//!     driver.post("tests", doc! { "a": 2, "b": "yes" }).await?;
//!
//!     let Changes { changes } = driver.patch("tests", doc! { "b": "no" }, Some(&doc! { "a": 2 })).await?;
//!     assert_eq!(changes, 1);
//!
//!     let sorted = driver
//!         .get("tests", None, GetOptions::new().fields(["a"]).order(["desc(a)"]))
//!         .await?;
//!     println!("{sorted:?}");
//!
//!     driver.close().await
//! }
//! ```
//!
//! # Configuration
//!
//! [`DriverConfig`] deserializes from JSON with camelCase keys:
//!
//! ```ignore
//! let config = DriverConfig::from_json_str(r#"{ "dataDirectory": "./data", "syncWrites": true }"#)?;
//! let driver = Driver::builder(config).build().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docdriver;

pub mod collection;
pub mod config;
pub mod driver;
pub mod prelude;
pub mod registry;
pub mod translate;

pub use docdriver_core::{backend, document, error, query};
pub use docdriver_core::error::{DriverError, DriverResult};

pub use collection::CollectionRef;
pub use config::DriverConfig;
pub use driver::{Changes, Driver, DriverBuilder, GetOptions};

// Re-export BSON types for convenience
pub use bson;

/// The file-backed collection store.
pub mod file {
    pub use docdriver_file::{DEFAULT_CORRUPT_ALERT_THRESHOLD, FileStore, FileStoreOpener, FileStoreOptions};
}
