//! FILENAME: booklist-engine/src/lib.rs
//!
//! Hierarchical book-list engine.
//!
//! A list is materialized from the library tables into a disposable,
//! per-instance table: leaf rows are books, interior rows are synthesized
//! group headers (author, series, ...), stored in hierarchy pre-order so a
//! node's subtree is a contiguous row-id range. On top of that table the
//! engine offers expand/collapse with durable per-bookshelf state, windowed
//! reading of the visible rows, and leaf navigation.
//!
//! Layering, bottom to top:
//!
//! - [`schema`]: the library tables and shared node columns.
//! - [`style`] / `groups`: list configuration and per-group build recipes.
//! - [`builder`]: composes the query plan for a style, scope and filter set.
//! - `aggregation`: streaming group-header synthesis.
//! - [`materializer`]: builds the list table; the [`Booklist`] instance API.
//! - `state`: in-table flags plus the durable node-state table.
//! - [`cursor`] / [`navigator`]: windowed reading and leaf traversal.

mod aggregation;
mod groups;
mod state;

pub mod builder;
pub mod cursor;
pub mod error;
pub mod materializer;
pub mod navigator;
pub mod node;
pub mod schema;
pub mod style;

pub use builder::BooklistBuilder;
pub use cursor::{
    BooklistWindow, Page, PageSource, RowRef, DEFAULT_CACHED_PAGES, DEFAULT_PAGE_SIZE,
};
pub use error::{BooklistError, Result};
pub use materializer::Booklist;
pub use state::clear_saved_node_state;
pub use navigator::BookNavigator;
pub use node::{BooklistNode, NodeNextState};
pub use style::{Filter, GroupKind, ListStyle, RebuildMode};
