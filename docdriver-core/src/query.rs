//! Query construction and filtering API for collection stores.
//!
//! Callers describe which documents an operation targets with a filter document in the
//! familiar operator syntax (`{ "age": { "$gte": 18 } }`). [`parse_filter`] turns such a
//! document into an [`Expr`] tree, which stores evaluate through the [`QueryVisitor`]
//! pattern.
//!
//! # Filter syntax
//!
//! - Implicit equality: `{ "status": "active" }`
//! - Dotted paths into nested documents: `{ "address.city": "Oslo" }`
//! - Comparison: `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`
//! - Membership: `$in`, `$nin` (array operand)
//! - Existence: `$exists` (boolean operand)
//! - Logical: `$and`, `$or` (array of filter documents), `$not` (filter document)
//!
//! An empty filter document matches every document.
//!
//! # Query Building
//!
//! ```ignore
//! use docdriver_core::query::{Query, Filter};
//! use bson::doc;
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("name", "Alice"))
//!     .sort(doc! { "created_at": -1 })
//!     .offset(10)
//!     .limit(10)
//!     .build();
//! ```

use bson::{Bson, Document};

use crate::error::{DriverError, DriverResult};

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to (an array field also matches when one of its elements is equal).
    Eq,
    /// Not equal to. Matches documents where the field is missing.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Field equals any of the values in the array operand.
    AnyOf,
    /// Field equals none of the values in the array operand.
    NoneOf,
}

impl FieldOp {
    /// Maps an operator key such as `$gte` to its [`FieldOp`].
    pub fn from_operator(operator: &str) -> Option<Self> {
        Some(match operator {
            "$eq" => FieldOp::Eq,
            "$ne" => FieldOp::Ne,
            "$gt" => FieldOp::Gt,
            "$gte" => FieldOp::Gte,
            "$lt" => FieldOp::Lt,
            "$lte" => FieldOp::Lte,
            "$in" => FieldOp::AnyOf,
            "$nin" => FieldOp::NoneOf,
            _ => return None,
        })
    }
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates.
///
/// # Example
///
/// ```ignore
/// use docdriver_core::query::Filter;
///
/// let expr = Filter::and(vec![
///     Filter::eq("status", "active"),
///     Filter::gt("age", 18),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match; an empty list matches everything).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match; an empty list matches nothing).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field name (or dotted path) to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

/// Parses a filter document into an expression tree.
///
/// Returns `Ok(None)` for an empty document, which matches every document.
///
/// # Errors
///
/// Returns [`DriverError::InvalidQuery`] for unknown operators, operands of the wrong
/// type, or fields that mix operators with plain values.
pub fn parse_filter(filter: &Document) -> DriverResult<Option<Expr>> {
    let mut exprs = Vec::with_capacity(filter.len());

    for (key, value) in filter {
        match key.as_str() {
            "$and" => exprs.push(Expr::And(parse_filter_list(key, value)?)),
            "$or" => exprs.push(Expr::Or(parse_filter_list(key, value)?)),
            "$not" => {
                let inner = value
                    .as_document()
                    .ok_or_else(|| DriverError::InvalidQuery("$not expects a filter document".to_string()))?;

                exprs.push(parse_filter(inner)?.unwrap_or(Expr::And(vec![])).not());
            }
            operator if operator.starts_with('$') => {
                return Err(DriverError::InvalidQuery(format!("unknown top-level operator {operator}")));
            }
            field => exprs.extend(parse_field(field, value)?),
        }
    }

    Ok(match exprs.len() {
        0 => None,
        1 => exprs.pop(),
        _ => Some(Expr::And(exprs)),
    })
}

fn parse_filter_list(operator: &str, value: &Bson) -> DriverResult<Vec<Expr>> {
    let items = value
        .as_array()
        .ok_or_else(|| DriverError::InvalidQuery(format!("{operator} expects an array of filter documents")))?;

    items
        .iter()
        .map(|item| match item.as_document() {
            Some(filter) => Ok(parse_filter(filter)?.unwrap_or(Expr::And(vec![]))),
            None => Err(DriverError::InvalidQuery(format!("{operator} expects an array of filter documents"))),
        })
        .collect()
}

fn parse_field(field: &str, value: &Bson) -> DriverResult<Vec<Expr>> {
    let operators = match value.as_document() {
        Some(operators) if operators.keys().any(|key| key.starts_with('$')) => operators,
        _ => return Ok(vec![Expr::field(field.to_string(), FieldOp::Eq, value.clone())]),
    };

    if !operators.keys().all(|key| key.starts_with('$')) {
        return Err(DriverError::InvalidQuery(format!(
            "field {field} mixes operators with plain values"
        )));
    }

    operators
        .iter()
        .map(|(operator, operand)| {
            if operator == "$exists" {
                return match operand {
                    Bson::Boolean(should_exist) => Ok(Expr::Exists(field.to_string(), *should_exist)),
                    _ => Err(DriverError::InvalidQuery(format!("$exists on {field} expects a boolean"))),
                };
            }

            let op = FieldOp::from_operator(operator)
                .ok_or_else(|| DriverError::InvalidQuery(format!("unknown operator {operator} on {field}")))?;

            if matches!(op, FieldOp::AnyOf | FieldOp::NoneOf) && operand.as_array().is_none() {
                return Err(DriverError::InvalidQuery(format!("{operator} on {field} expects an array")));
            }

            Ok(Expr::field(field.to_string(), op, operand.clone()))
        })
        .collect()
}

/// A structured query handed to a collection store.
///
/// The sort and projection directives are store-native mappings:
///
/// - `sort`: field → `1` (ascending) or `-1` (descending), applied in key order
/// - `projection`: field → `1` (include) or `0` (exclude)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Optional filter expression to match documents.
    pub filter: Option<Expr>,
    /// Optional composite sort directive.
    pub sort: Option<Document>,
    /// Optional projection directive.
    pub projection: Option<Document>,
    /// Number of documents to skip (applied before `limit`).
    pub offset: Option<usize>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
}

impl Query {
    /// Creates a new empty query matching every document.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Matches documents where the field is greater than the specified value.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Matches documents where the field is greater than or equal to the specified value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Matches documents where the field is less than the specified value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Matches documents where the field is less than or equal to the specified value.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the field exists.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field does not exist.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Combines multiple expressions such that all must match.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines multiple expressions such that any can match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the field equals any of the given values.
    pub fn any_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, Bson::Array(values.into_iter().map(Into::into).collect()))
    }

    /// Matches documents where the field equals none of the given values.
    pub fn none_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, Bson::Array(values.into_iter().map(Into::into).collect()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the filter expression for this query.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Sets or clears the filter expression.
    pub fn maybe_filter(mut self, filter: Option<Expr>) -> Self {
        self.query.filter = filter;
        self
    }

    /// Sets the composite sort directive.
    pub fn sort(mut self, sort: Document) -> Self {
        self.query.sort = Some(sort);
        self
    }

    /// Sets the projection directive.
    pub fn projection(mut self, projection: Document) -> Self {
        self.query.projection = Some(projection);
        self
    }

    /// Sets the number of documents to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<DriverError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc};

    #[test]
    fn test_empty_filter_matches_everything() {
        assert_eq!(parse_filter(&doc! {}).unwrap(), None);
    }

    #[test]
    fn test_implicit_equality() {
        assert_eq!(parse_filter(&doc! { "a": 2 }).unwrap(), Some(Filter::eq("a", 2)));
    }

    #[test]
    fn test_multiple_fields_combine_with_and() {
        let expr = parse_filter(&doc! { "a": 2, "b": "yes" }).unwrap();

        assert_eq!(expr, Some(Filter::and(vec![Filter::eq("a", 2), Filter::eq("b", "yes")])));
    }

    #[test]
    fn test_operators() {
        let expr = parse_filter(&doc! { "age": { "$gte": 18, "$lt": 65 }, "tag": { "$in": ["x", "y"] } }).unwrap();

        assert_eq!(
            expr,
            Some(Filter::and(vec![
                Filter::gte("age", 18),
                Filter::lt("age", 65),
                Filter::any_of("tag", ["x", "y"]),
            ]))
        );
    }

    #[test]
    fn test_logical_operators() {
        let expr = parse_filter(&doc! {
            "$or": [{ "a": 1 }, { "a": { "$exists": false } }],
            "$not": { "b": "no" },
        })
        .unwrap();

        assert_eq!(
            expr,
            Some(Filter::and(vec![
                Filter::or(vec![Filter::eq("a", 1), Filter::not_exists("a")]),
                Filter::eq("b", "no").not(),
            ]))
        );
    }

    #[test]
    fn test_nested_document_equality() {
        let expr = parse_filter(&doc! { "point": { "x": 1 } }).unwrap();

        assert_eq!(expr, Some(Filter::eq("point", bson!({ "x": 1 }))));
    }

    #[test]
    fn test_rejects_unknown_operator() {
        assert!(matches!(
            parse_filter(&doc! { "a": { "$near": 1 } }),
            Err(DriverError::InvalidQuery(_))
        ));
        assert!(matches!(
            parse_filter(&doc! { "$where": "true" }),
            Err(DriverError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_operands() {
        assert!(parse_filter(&doc! { "a": { "$in": 1 } }).is_err());
        assert!(parse_filter(&doc! { "a": { "$exists": "yes" } }).is_err());
        assert!(parse_filter(&doc! { "$or": { "a": 1 } }).is_err());
        assert!(parse_filter(&doc! { "a": { "$gt": 1, "b": 2 } }).is_err());
    }
}
