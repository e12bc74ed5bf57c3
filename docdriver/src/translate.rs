//! Translation of the driver's abstract query parameters into store directives.
//!
//! - Sort tokens such as `asc(name)` / `desc(age)` become a sort directive
//!   (`{ "name": 1, "age": -1 }`), applied field by field as a composite comparator.
//! - A field allow-list becomes an inclusion projection that always carries `id`.
//! - A filter document becomes the expression tree stores evaluate.

use std::str::FromStr;
use bson::{Bson, Document};

use docdriver_core::{
    document::ID_FIELD,
    error::{DriverError, DriverResult},
    query::{Expr, parse_filter},
};

/// Sort direction named by a sort token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// Value of this direction in a store sort directive.
    pub fn as_directive(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

impl FromStr for SortDirection {
    type Err = DriverError;

    fn from_str(direction: &str) -> Result<Self, Self::Err> {
        match direction {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(DriverError::InvalidSortDirection(other.to_string())),
        }
    }
}

/// A single parsed sort token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// The field to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl FromStr for Sort {
    type Err = DriverError;

    /// Parses a `direction(field)` token.
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let malformed = || DriverError::InvalidSortToken(token.to_string());

        let (direction, rest) = token.split_once('(').ok_or_else(malformed)?;
        let field = rest.strip_suffix(')').ok_or_else(malformed)?;

        if field.is_empty() {
            return Err(malformed());
        }

        Ok(Sort {
            field: field.to_string(),
            direction: direction.parse()?,
        })
    }
}

/// Builds a sort directive from ordered sort tokens.
///
/// A later token for an already-listed field overrides its direction but keeps its
/// position. Returns `None` when there are no tokens.
///
/// # Errors
///
/// Returns [`DriverError::InvalidSortDirection`] when a direction is not `asc` or `desc`,
/// and [`DriverError::InvalidSortToken`] when a token is not shaped like `direction(field)`.
pub fn parse_order<S: AsRef<str>>(tokens: &[S]) -> DriverResult<Option<Document>> {
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut directive = Document::new();

    for token in tokens {
        let sort = token.as_ref().parse::<Sort>()?;
        directive.insert(sort.field, Bson::Int32(sort.direction.as_directive()));
    }

    Ok(Some(directive))
}

/// Builds an inclusion projection from a field allow-list, adding `id` when missing.
///
/// Returns `None` for an empty list, which selects every field.
pub fn parse_projection<S: AsRef<str>>(fields: &[S]) -> Option<Document> {
    if fields.is_empty() {
        return None;
    }

    let mut projection = fields
        .iter()
        .map(|field| (field.as_ref().to_string(), Bson::Int32(1)))
        .collect::<Document>();

    if !projection.contains_key(ID_FIELD) {
        projection.insert(ID_FIELD, Bson::Int32(1));
    }

    Some(projection)
}

/// Parses an optional filter document. An absent or empty query matches everything.
pub fn parse_query(query: Option<&Document>) -> DriverResult<Option<Expr>> {
    match query {
        Some(query) => parse_filter(query),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_parse_order_builds_composite_directive() {
        let directive = parse_order(&["desc(b)", "asc(a)"]).unwrap();

        assert_eq!(directive, Some(doc! { "b": -1, "a": 1 }));
        assert_eq!(parse_order::<&str>(&[]).unwrap(), None);
    }

    #[test]
    fn test_parse_order_override_keeps_first_position() {
        let directive = parse_order(&["asc(a)", "asc(b)", "desc(a)"]).unwrap().unwrap();

        assert_eq!(directive.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(directive.get_i32("a").unwrap(), -1);
    }

    #[test]
    fn test_parse_order_rejects_unknown_direction() {
        let err = parse_order(&["sideways(a)"]).unwrap_err();

        assert!(matches!(&err, DriverError::InvalidSortDirection(direction) if direction == "sideways"));
        assert_eq!(err.to_string(), "Sort must be \"asc\" or \"desc\" but was \"sideways\"");
    }

    #[test]
    fn test_parse_order_rejects_malformed_tokens() {
        for token in ["asc", "asc(a", "asc()", "a)"] {
            assert!(matches!(
                parse_order(&[token]),
                Err(DriverError::InvalidSortToken(_))
            ));
        }
    }

    #[test]
    fn test_parse_projection_appends_id() {
        assert_eq!(parse_projection(&["a"]), Some(doc! { "a": 1, "id": 1 }));
        assert_eq!(parse_projection(&["id", "a"]), Some(doc! { "id": 1, "a": 1 }));
        assert_eq!(parse_projection::<String>(&[]), None);
    }

    #[test]
    fn test_parse_query() {
        assert_eq!(parse_query(None).unwrap(), None);
        assert_eq!(parse_query(Some(&doc! {})).unwrap(), None);
        assert!(parse_query(Some(&doc! { "a": 2 })).unwrap().is_some());
        assert!(matches!(
            parse_query(Some(&doc! { "$where": "1" })),
            Err(DriverError::InvalidQuery(_))
        ));
    }
}
