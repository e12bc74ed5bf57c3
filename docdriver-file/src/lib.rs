//! File-backed collection store for docdriver.
//!
//! This crate provides the storage engine behind every collection the driver manages:
//! one append-only JSON log file per collection, replayed into memory when the file is
//! opened and compacted on open.
//!
//! # Features
//!
//! - **One file per collection** - Each store owns exactly one log file
//! - **Async I/O** - File access goes through tokio, so no operation blocks its caller's thread
//! - **Serialized writes** - Writes to one collection take an async write lock; reads share it
//! - **Full query support** - Filtering, composite sorting, projection, and pagination
//! - **Corruption tolerance** - Unreadable records are skipped up to a configurable threshold
//!
//! # Quick Start
//!
//! ```ignore
//! use docdriver_file::FileStore;
//! use docdriver_core::{backend::{CollectionStore, CollectionStoreOpener}, query::Query};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FileStore::builder().open(Path::new("data/users.db")).await?;
//!
//!     store.insert(doc! { "name": "Alice" }).await?;
//!     let everyone = store.find(&Query::new()).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docdriver_file;

mod evaluator;
mod persistence;
pub mod store;

pub use store::{DEFAULT_CORRUPT_ALERT_THRESHOLD, FileStore, FileStoreOpener, FileStoreOptions};
