//! Document representation and identity helpers.
//!
//! Documents are open schemas: an ordered [`bson::Document`] mapping field names to tagged
//! values. Every document handed back to a caller carries a public `id` string and never
//! the store's internal `_id`.
//!
//! The helpers here implement the field-level semantics of the CRUD verbs:
//!
//! - [`with_identity`] - stamp a freshly generated identity onto a new document
//! - [`replace_fields`] - full replacement that keeps the existing identity (put)
//! - [`merge_fields`] - top-level merge that keeps the existing identity (patch)
//! - [`strip_internal`] - drop the store-internal identifier before returning a document

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DriverError, DriverResult};

/// Name of the public identity field present on every document.
pub const ID_FIELD: &str = "id";

/// Name of the identifier a collection store keys its records by.
pub const INTERNAL_ID_FIELD: &str = "_id";

/// Generates a new public document identity (a hyphenated UUID v4 string).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Returns `true` for the identity fields callers are not allowed to set directly.
fn is_identity_field(field: &str) -> bool {
    field == ID_FIELD || field == INTERNAL_ID_FIELD
}

/// Builds the record inserted by `post`: the caller's fields followed by the given `id`.
///
/// A caller-supplied `id` is overridden and a caller-supplied `_id` is discarded.
pub fn with_identity(document: Document, id: impl Into<String>) -> Document {
    let mut record = document
        .into_iter()
        .filter(|(key, _)| !is_identity_field(key))
        .collect::<Document>();

    record.insert(ID_FIELD, Bson::String(id.into()));
    record
}

/// Builds the replacement for a `put`: every field of `replacement`, plus the `id`
/// of `existing`. Identity fields carried by `replacement` are ignored.
pub fn replace_fields(existing: &Document, replacement: &Document) -> Document {
    let mut record = replacement
        .iter()
        .filter(|(key, _)| !is_identity_field(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect::<Document>();

    if let Some(id) = existing.get(ID_FIELD) {
        record.insert(ID_FIELD, id.clone());
    }

    record
}

/// Builds the result of a `patch`: `existing` with every top-level field of `patch`
/// written over it. Nested documents are replaced, not merged, and identity is kept.
pub fn merge_fields(existing: &Document, patch: &Document) -> Document {
    let mut record = existing.clone();

    for (key, value) in patch.iter().filter(|(key, _)| !is_identity_field(key)) {
        record.insert(key.clone(), value.clone());
    }

    record
}

/// Removes the store-internal identifier from a document.
pub fn strip_internal(mut document: Document) -> Document {
    document.remove(INTERNAL_ID_FIELD);
    document
}

/// Reads the store-internal identifier of a stored document.
///
/// # Errors
///
/// Returns [`DriverError::Storage`] if the store handed back a record without one.
pub fn internal_id(document: &Document) -> DriverResult<&str> {
    document
        .get(INTERNAL_ID_FIELD)
        .and_then(Bson::as_str)
        .ok_or_else(|| DriverError::Storage(format!("record is missing its {INTERNAL_ID_FIELD} field")))
}

/// Converts any serializable value into a document.
///
/// # Errors
///
/// Returns an error if serialization fails or the value does not serialize to a mapping.
pub fn to_document<T: Serialize>(value: &T) -> DriverResult<Document> {
    match serialize_to_bson(value)? {
        Bson::Document(document) => Ok(document),
        other => Err(DriverError::InvalidDocument(format!(
            "expected a mapping but got {:?}",
            other.element_type()
        ))),
    }
}

/// Converts a document into a typed value.
///
/// # Errors
///
/// Returns an error if the document does not match the shape of `T`.
pub fn from_document<T: DeserializeOwned>(document: Document) -> DriverResult<T> {
    Ok(deserialize_from_bson(Bson::Document(document))?)
}

/// Converts a JSON object into a document.
///
/// # Errors
///
/// Returns [`DriverError::InvalidDocument`] if `value` is not a JSON object.
pub fn document_from_json(value: Value) -> DriverResult<Document> {
    if !value.is_object() {
        return Err(DriverError::InvalidDocument("expected a JSON object".to_string()));
    }

    Ok(serde_json::from_value(value)?)
}

/// Converts a document into a JSON value.
pub fn document_to_json(document: &Document) -> DriverResult<Value> {
    Ok(serde_json::to_value(document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde::Deserialize;

    #[test]
    fn test_with_identity_overrides_caller_id() {
        let record = with_identity(doc! { "a": 1, "id": "mine", "_id": "internal" }, "generated");

        assert_eq!(record, doc! { "a": 1, "id": "generated" });
    }

    #[test]
    fn test_generate_id_is_unique() {
        let first = generate_id();
        let second = generate_id();

        assert!(!first.is_empty());
        assert_ne!(first, second);
    }

    #[test]
    fn test_replace_fields_keeps_existing_id() {
        let existing = doc! { "_id": "x1", "a": 1, "b": "yes", "id": "keep" };
        let record = replace_fields(&existing, &doc! { "b": "no", "id": "forged" });

        assert_eq!(record, doc! { "b": "no", "id": "keep" });
    }

    #[test]
    fn test_merge_fields_is_top_level_only() {
        let existing = doc! { "a": 1, "nested": { "x": 1, "y": 2 }, "id": "keep" };
        let record = merge_fields(&existing, &doc! { "nested": { "x": 5 }, "c": true, "id": "forged" });

        assert_eq!(record, doc! { "a": 1, "nested": { "x": 5 }, "id": "keep", "c": true });
    }

    #[test]
    fn test_strip_internal() {
        let stripped = strip_internal(doc! { "_id": "x1", "id": "abc" });

        assert_eq!(stripped, doc! { "id": "abc" });
        assert!(internal_id(&stripped).is_err());
    }

    #[test]
    fn test_typed_round_trip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Note {
            title: String,
            pinned: bool,
        }

        let note = Note { title: "hello".to_string(), pinned: true };
        let document = to_document(&note).expect("serializes");

        assert_eq!(document, doc! { "title": "hello", "pinned": true });
        assert_eq!(from_document::<Note>(document).expect("deserializes"), note);
    }

    #[test]
    fn test_document_from_json_rejects_non_objects() {
        let result = document_from_json(serde_json::json!([1, 2, 3]));

        assert!(matches!(result, Err(DriverError::InvalidDocument(_))));
    }
}
