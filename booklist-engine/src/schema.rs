//! FILENAME: booklist-engine/src/schema.rs
//!
//! Library schema: the source tables the list engine reads, plus the column
//! names shared between the materialized list table and the durable
//! node-state table. The engine never writes to the library tables;
//! `create_library_schema` exists for tests and demos.

use once_cell::sync::Lazy;
use store::{Db, Domain, DomainKind, StoreError, TableDefinition};

// ============================================================================
// COLUMN NAMES
// ============================================================================

// Library columns.
pub const TITLE: &str = "title";
pub const TITLE_OB: &str = "title_ob";
pub const BOOK_UUID: &str = "uuid";
pub const BOOK: &str = "book";

// Node columns, shared by the list table and the durable state table.
pub const NODE_KEY: &str = "node_key";
pub const NODE_LEVEL: &str = "node_level";
pub const NODE_GROUP: &str = "node_group";
pub const NODE_EXPANDED: &str = "node_expanded";
pub const NODE_VISIBLE: &str = "node_visible";

/// Separator between `prefix=value` segments of a node key.
pub const KEY_SEPARATOR: char = '/';

// ============================================================================
// TABLES
// ============================================================================

pub static TBL_BOOKS: Lazy<TableDefinition> = Lazy::new(|| {
    TableDefinition::new("books", "b")
        .with_primary_key()
        .add_domains([
            Domain::new(TITLE, DomainKind::Text).not_null(),
            // Precomputed order-by variant of the title (articles stripped,
            // case folded). Used verbatim for sorting.
            Domain::new(TITLE_OB, DomainKind::Text).not_null().with_default("''"),
            Domain::new(BOOK_UUID, DomainKind::Text).not_null(),
            Domain::new("isbn", DomainKind::Text),
            Domain::new("publisher", DomainKind::Integer),
            Domain::new("genre", DomainKind::Text),
            Domain::new("language", DomainKind::Text),
            Domain::new("location", DomainKind::Text),
            Domain::new("format", DomainKind::Text),
            Domain::new("rating", DomainKind::Real).not_null().with_default("0"),
            Domain::new("read", DomainKind::Boolean).not_null().with_default("0"),
            Domain::new("date_published", DomainKind::Date),
            Domain::new("date_added", DomainKind::Date),
        ])
});

pub static TBL_AUTHORS: Lazy<TableDefinition> = Lazy::new(|| {
    TableDefinition::new("authors", "a")
        .with_primary_key()
        .add_domains([
            Domain::new("family_name", DomainKind::Text).not_null(),
            Domain::new("given_names", DomainKind::Text).not_null().with_default("''"),
            Domain::new("is_complete", DomainKind::Boolean).not_null().with_default("0"),
        ])
});

pub static TBL_SERIES: Lazy<TableDefinition> = Lazy::new(|| {
    TableDefinition::new("series", "s")
        .with_primary_key()
        .add_domains([
            Domain::new("series_title", DomainKind::Text).not_null(),
            Domain::new("is_complete", DomainKind::Boolean).not_null().with_default("0"),
        ])
});

pub static TBL_PUBLISHERS: Lazy<TableDefinition> = Lazy::new(|| {
    TableDefinition::new("publishers", "p")
        .with_primary_key()
        .add_domain(Domain::new("publisher_name", DomainKind::Text).not_null())
});

pub static TBL_BOOK_AUTHOR: Lazy<TableDefinition> = Lazy::new(|| {
    TableDefinition::new("book_author", "ba").add_domains([
        Domain::new(BOOK, DomainKind::Integer).not_null(),
        Domain::new("author", DomainKind::Integer).not_null(),
        Domain::new("position", DomainKind::Integer).not_null().with_default("1"),
    ])
});

pub static TBL_BOOK_SERIES: Lazy<TableDefinition> = Lazy::new(|| {
    TableDefinition::new("book_series", "bs").add_domains([
        Domain::new(BOOK, DomainKind::Integer).not_null(),
        Domain::new("series", DomainKind::Integer).not_null(),
        Domain::new("series_num", DomainKind::Text),
        Domain::new("position", DomainKind::Integer).not_null().with_default("1"),
    ])
});

pub static TBL_BOOKSHELVES: Lazy<TableDefinition> = Lazy::new(|| {
    TableDefinition::new("bookshelves", "sh")
        .with_primary_key()
        .add_domain(Domain::new("shelf_name", DomainKind::Text).not_null())
});

pub static TBL_BOOK_BOOKSHELF: Lazy<TableDefinition> = Lazy::new(|| {
    TableDefinition::new("book_bookshelf", "bb").add_domains([
        Domain::new(BOOK, DomainKind::Integer).not_null(),
        Domain::new("bookshelf", DomainKind::Integer).not_null(),
    ])
});

pub static TBL_LOAN: Lazy<TableDefinition> = Lazy::new(|| {
    TableDefinition::new("loan", "l").add_domains([
        Domain::new(BOOK, DomainKind::Integer).not_null(),
        Domain::new("loanee", DomainKind::Text).not_null(),
    ])
});

/// The durable (cross-rebuild) node-state table.
pub static TBL_NODE_STATE: Lazy<TableDefinition> = Lazy::new(|| {
    TableDefinition::new("book_list_node_state", "ns")
        .with_primary_key()
        .add_domains([
            Domain::new("bookshelf_id", DomainKind::Integer).not_null(),
            Domain::new("style_id", DomainKind::Integer).not_null(),
            Domain::new(NODE_KEY, DomainKind::Text).not_null(),
            Domain::new(NODE_LEVEL, DomainKind::Integer).not_null(),
            Domain::new(NODE_GROUP, DomainKind::Integer).not_null(),
            Domain::new(NODE_EXPANDED, DomainKind::Boolean).not_null().with_default("0"),
            Domain::new(NODE_VISIBLE, DomainKind::Boolean).not_null().with_default("0"),
        ])
});

// ============================================================================
// SCHEMA CREATION
// ============================================================================

/// Create all library tables. Intended for tests, demos and fresh databases.
pub fn create_library_schema(db: &Db) -> Result<(), StoreError> {
    for table in [
        &*TBL_BOOKS,
        &*TBL_AUTHORS,
        &*TBL_SERIES,
        &*TBL_PUBLISHERS,
        &*TBL_BOOK_AUTHOR,
        &*TBL_BOOK_SERIES,
        &*TBL_BOOKSHELVES,
        &*TBL_BOOK_BOOKSHELF,
        &*TBL_LOAN,
    ] {
        db.conn().execute_batch(&table.create_sql(true)?)?;
    }
    db.conn().execute_batch(
        &TBL_BOOK_AUTHOR.create_index_sql("book", false, &[BOOK, "author"]),
    )?;
    db.conn().execute_batch(
        &TBL_BOOK_SERIES.create_index_sql("book", false, &[BOOK, "series"]),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_schema_creates() {
        let db = Db::open_in_memory().unwrap();
        create_library_schema(&db).unwrap();
        // Re-running must be harmless.
        create_library_schema(&db).unwrap();
        let count = db
            .query_i64(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='books'",
                [],
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
