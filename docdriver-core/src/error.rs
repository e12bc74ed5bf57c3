//! Error types and result types for driver operations.
//!
//! Every fallible operation in the driver and its stores returns a [`DriverResult<T>`].
//! Store failures are surfaced unchanged; the driver never retries.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;
use thiserror::Error;

/// Represents all possible errors raised by the driver or an underlying collection store.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The driver is closing. Calling `open()` makes it usable again.
    #[error("Driver is closed")]
    DriverClosed,
    /// A sort token named a direction other than `asc` or `desc`.
    #[error("Sort must be \"asc\" or \"desc\" but was \"{0}\"")]
    InvalidSortDirection(String),
    /// A sort token was not shaped like `direction(field)`.
    #[error("Invalid sort token: {0}")]
    InvalidSortToken(String),
    /// The filter document could not be interpreted.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// The collection id cannot be mapped onto a store file.
    #[error("Invalid collection id: {0:?}")]
    InvalidCollectionId(String),
    /// The document is not a mapping or violates an identity rule.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during driver construction or configuration.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An error reported by the underlying collection store.
    #[error("Storage error: {0}")]
    Storage(String),
    /// An I/O error raised while touching the data directory or a store file.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl DriverError {
    /// Returns `true` for failures that originate in the storage layer.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, DriverError::Storage(_) | DriverError::Io(_))
    }
}

/// A specialized `Result` type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

impl From<BsonError> for DriverError {
    fn from(err: BsonError) -> Self {
        DriverError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DriverError {
    fn from(err: SerdeJsonError) -> Self {
        DriverError::Serialization(err.to_string())
    }
}
