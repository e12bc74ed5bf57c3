//! Query expression evaluation and value ordering for file-backed collections.
//!
//! This module provides the evaluation engine for filter expressions, the composite
//! comparator used for sort directives, and the projection applied to query results.

use std::{cmp::Ordering, collections::HashMap};
use bson::{Bson, Document, datetime::DateTime};

use docdriver_core::{
    document::INTERNAL_ID_FIELD,
    error::{DriverError, DriverResult},
    query::{Expr, FieldOp, QueryVisitor},
};


/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that `Int32(1)`, `Int64(1)` and `Double(1.0)`
/// compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Any other BSON value (object ids, binaries, decimals, ...), compared by exact equality
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a (possibly dotted) field path inside a document.
///
/// Numeric segments index into arrays, so `"tags.0"` addresses the first tag.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None => 0,
        Some(Bson::Null) => 1,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => 2,
        Some(Bson::String(_)) => 3,
        Some(Bson::Boolean(_)) => 4,
        Some(Bson::DateTime(_)) => 5,
        Some(Bson::Array(_)) => 6,
        Some(Bson::Document(_)) => 7,
        Some(_) => 8,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

/// Total order over optional values used by sort directives.
///
/// Values of different types order as: missing < null < numbers < strings < booleans
/// < datetimes < arrays < documents.
pub(crate) fn compare_values(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let by_rank = type_rank(left).cmp(&type_rank(right));
    if by_rank != Ordering::Equal {
        return by_rank;
    }

    match (left, right) {
        (Some(Bson::String(a)), Some(Bson::String(b))) => a.cmp(b),
        (Some(Bson::Boolean(a)), Some(Bson::Boolean(b))) => a.cmp(b),
        (Some(Bson::DateTime(a)), Some(Bson::DateTime(b))) => a.cmp(b),
        (Some(Bson::Array(a)), Some(Bson::Array(b))) => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| compare_values(Some(x), Some(y)))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Some(Bson::Document(a)), Some(Bson::Document(b))) => a
            .iter()
            .zip(b.iter())
            .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| compare_values(Some(va), Some(vb))))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Some(a), Some(b)) => match (as_number(a), as_number(b)) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            _ => Ordering::Equal,
        },
        _ => Ordering::Equal,
    }
}

/// Composite comparator built from a sort directive (`{ field: 1 | -1, ... }`).
pub(crate) struct SortOrder {
    keys: Vec<(String, bool)>,
}

impl SortOrder {
    pub fn from_directive(directive: &Document) -> DriverResult<Self> {
        let keys = directive
            .iter()
            .map(|(field, order)| {
                let descending = match as_number(order) {
                    Some(order) if order > 0.0 => false,
                    Some(order) if order < 0.0 => true,
                    _ => {
                        return Err(DriverError::InvalidQuery(format!(
                            "sort order for {field} must be 1 or -1"
                        )));
                    }
                };

                Ok((field.clone(), descending))
            })
            .collect::<DriverResult<Vec<_>>>()?;

        Ok(Self { keys })
    }

    pub fn compare(&self, left: &Document, right: &Document) -> Ordering {
        for (field, descending) in &self.keys {
            let ordering = compare_values(lookup(left, field), lookup(right, field));

            if ordering != Ordering::Equal {
                return if *descending { ordering.reverse() } else { ordering };
            }
        }

        Ordering::Equal
    }
}

/// Projection built from a directive (`{ field: 1, ... }` or `{ field: 0, ... }`).
///
/// The internal `_id` is kept unless the directive explicitly excludes it.
pub(crate) struct Projection {
    fields: Vec<String>,
    include: bool,
    keep_internal_id: bool,
}

impl Projection {
    pub fn from_directive(directive: &Document) -> DriverResult<Self> {
        let mut keep_internal_id = true;
        let mut included = Vec::new();
        let mut excluded = Vec::new();

        for (field, marker) in directive {
            let include = match marker {
                Bson::Boolean(flag) => *flag,
                other => as_number(other).map(|n| n != 0.0).ok_or_else(|| {
                    DriverError::InvalidQuery(format!("projection marker for {field} must be 0 or 1"))
                })?,
            };

            if field == INTERNAL_ID_FIELD {
                keep_internal_id = include;
            } else if include {
                included.push(field.clone());
            } else {
                excluded.push(field.clone());
            }
        }

        if !included.is_empty() && !excluded.is_empty() {
            return Err(DriverError::InvalidQuery(
                "projection cannot both include and exclude fields".to_string(),
            ));
        }

        let include = !included.is_empty();

        Ok(Self {
            fields: if include { included } else { excluded },
            include,
            keep_internal_id,
        })
    }

    pub fn apply(&self, document: Document) -> Document {
        let mut projected = if self.include {
            let mut projected = Document::new();
            if let Some(id) = document.get(INTERNAL_ID_FIELD) {
                projected.insert(INTERNAL_ID_FIELD, id.clone());
            }
            for field in &self.fields {
                if let Some(value) = lookup(&document, field) {
                    insert_path(&mut projected, field, value.clone());
                }
            }
            projected
        } else {
            let mut projected = document;
            for field in &self.fields {
                remove_path(&mut projected, field);
            }
            projected
        };

        if !self.keep_internal_id {
            projected.remove(INTERNAL_ID_FIELD);
        }

        projected
    }
}

/// Writes `value` at a dotted `path`, creating intermediate documents as needed.
fn insert_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                insert_path(inner, rest, value);
            }
        }
    }
}

/// Removes the value at a dotted `path`, if every parent along it is a document.
fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}


pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DriverResult<bool> {
        self.visit_expr(expr)
    }

    /// Evaluates `filter` against `document`; `None` matches every document.
    pub fn matches(document: &'a Document, filter: Option<&Expr>) -> DriverResult<bool> {
        match filter {
            Some(expr) => DocumentEvaluator::new(document).evaluate(expr),
            None => Ok(true),
        }
    }

    fn equals(field_value: &Bson, value: &Bson) -> bool {
        let expected = Comparable::from(value);

        if Comparable::from(field_value) == expected {
            return true;
        }

        match field_value {
            Bson::Array(items) if !matches!(value, Bson::Array(_)) => items
                .iter()
                .any(|item| Comparable::from(item) == expected),
            _ => false,
        }
    }

    fn compares(field_value: &Bson, op: &FieldOp, value: &Bson) -> bool {
        let satisfies = |candidate: &Bson| {
            match Comparable::from(candidate).partial_cmp(&Comparable::from(value)) {
                Some(ordering) => match op {
                    FieldOp::Gt => ordering == Ordering::Greater,
                    FieldOp::Gte => ordering != Ordering::Less,
                    FieldOp::Lt => ordering == Ordering::Less,
                    FieldOp::Lte => ordering != Ordering::Greater,
                    _ => false,
                },
                None => false,
            }
        };

        match field_value {
            Bson::Array(items) => items.iter().any(satisfies),
            _ => satisfies(field_value),
        }
    }

    fn any_of(field_value: &Bson, values: &Bson) -> bool {
        match values {
            Bson::Array(values) => values
                .iter()
                .any(|value| Self::equals(field_value, value)),
            single_value => Self::equals(field_value, single_value),
        }
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DriverError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let field_value = lookup(self.document, field);

        Ok(match (op, field_value) {
            (FieldOp::Ne, None) | (FieldOp::NoneOf, None) => true,
            (_, None) => false,
            (FieldOp::Eq, Some(field_value)) => Self::equals(field_value, value),
            (FieldOp::Ne, Some(field_value)) => !Self::equals(field_value, value),
            (FieldOp::AnyOf, Some(field_value)) => Self::any_of(field_value, value),
            (FieldOp::NoneOf, Some(field_value)) => !Self::any_of(field_value, value),
            (FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte, Some(field_value)) => {
                Self::compares(field_value, op, value)
            }
        })
    }
}
