//! Core types shared by the docdriver storage driver and its collection stores.
//!
//! This crate provides:
//!
//! - **Document model** ([`document`]) - Open-schema documents and the identity rules of the CRUD verbs
//! - **Store abstraction** ([`backend`]) - Traits implemented by per-collection storage engines
//! - **Query and filtering API** ([`query`]) - Filter-document parsing and the expression tree stores evaluate
//! - **Error handling** ([`error`]) - The error taxonomy shared by the driver and its stores
//!
//! # Example
//!
//! ```ignore
//! use docdriver_core::{document::with_identity, query::parse_filter};
//! use bson::doc;
//!
//! let record = with_identity(doc! { "name": "Alice" }, "3f0c...");
//! let filter = parse_filter(&doc! { "name": "Alice" })?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docdriver_core;

pub mod backend;
pub mod document;
pub mod error;
pub mod query;
