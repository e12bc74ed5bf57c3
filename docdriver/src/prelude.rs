//! Convenient re-exports of commonly used types from docdriver.
//!
//! ```ignore
//! use docdriver::prelude::*;
//! ```

pub use docdriver_core::{
    backend::{CollectionStore, CollectionStoreOpener},
    document::{document_from_json, document_to_json, from_document, to_document},
    query::{Expr, FieldOp, Filter, Query, QueryBuilder},
    error::{DriverError, DriverResult},
};
pub use docdriver_file::{FileStore, FileStoreOpener, FileStoreOptions};

pub use crate::{
    collection::CollectionRef,
    config::DriverConfig,
    driver::{Changes, Driver, DriverBuilder, GetOptions},
};
