//! FILENAME: store/src/lib.rs
//!
//! Relational plumbing shared by the list engine:
//!
//! - `domain`: typed column and table definitions with DDL rendering.
//! - `sql`: structured SELECT assembly (joins, parameterized predicates,
//!   order terms) rendered once.
//! - `db`: connection wrapper with cached statements and nesting-aware
//!   transactions.
//! - `tracker`: instance-id allocation and leak accounting.

pub mod db;
pub mod domain;
pub mod error;
pub mod sql;
pub mod tracker;

pub use db::Db;
pub use domain::{Domain, DomainKind, TableDefinition, PK_ID};
pub use error::StoreError;
pub use sql::{Join, JoinKind, OrderTerm, Predicate, SelectBuilder};
pub use tracker::InstanceTracker;
