//! FILENAME: tests/common/mod.rs
//! Shared fixtures: an in-memory library with a small, known data set.
#![allow(dead_code)]

use std::sync::Arc;

use booklist_engine::schema::create_library_schema;
use store::{Db, InstanceTracker};

pub struct LibraryFixture {
    pub db: Db,
    pub tracker: Arc<InstanceTracker>,
}

impl LibraryFixture {
    pub fn new() -> Self {
        Self::from_db(Db::open_in_memory().unwrap())
    }

    pub fn from_db(db: Db) -> Self {
        create_library_schema(&db).unwrap();
        LibraryFixture {
            db,
            tracker: Arc::new(InstanceTracker::new()),
        }
    }

    /// Two authors, ten books: books 1..=5 by author 1, 6..=10 by author 2.
    pub fn with_two_authors_ten_books() -> Self {
        let fixture = Self::new();
        fixture.seed_two_authors_ten_books();
        fixture
    }

    pub fn seed_two_authors_ten_books(&self) {
        self.insert_author(1, "Asimov", "Isaac");
        self.insert_author(2, "Clarke", "Arthur");
        for book in 1..=10i64 {
            self.insert_book(book, &format!("Book {book:02}"));
            self.link_author(book, if book <= 5 { 1 } else { 2 }, 1);
        }
    }

    pub fn insert_author(&self, id: i64, family: &str, given: &str) {
        self.db
            .conn()
            .execute(
                "INSERT INTO authors (_id,family_name,given_names) VALUES (?,?,?)",
                (id, family, given),
            )
            .unwrap();
    }

    pub fn insert_book(&self, id: i64, title: &str) {
        self.db
            .conn()
            .execute(
                "INSERT INTO books (_id,title,title_ob,uuid) VALUES (?,?,?,?)",
                (id, title, title.to_lowercase(), format!("uuid-{id}")),
            )
            .unwrap();
    }

    pub fn link_author(&self, book: i64, author: i64, position: i64) {
        self.db
            .conn()
            .execute(
                "INSERT INTO book_author (book,author,position) VALUES (?,?,?)",
                (book, author, position),
            )
            .unwrap();
    }

    pub fn insert_series(&self, id: i64, title: &str) {
        self.db
            .conn()
            .execute(
                "INSERT INTO series (_id,series_title) VALUES (?,?)",
                (id, title),
            )
            .unwrap();
    }

    pub fn link_series(&self, book: i64, series: i64, num: &str) {
        self.db
            .conn()
            .execute(
                "INSERT INTO book_series (book,series,series_num) VALUES (?,?,?)",
                (book, series, num),
            )
            .unwrap();
    }

    pub fn insert_shelf(&self, id: i64, name: &str) {
        self.db
            .conn()
            .execute(
                "INSERT INTO bookshelves (_id,shelf_name) VALUES (?,?)",
                (id, name),
            )
            .unwrap();
    }

    pub fn put_on_shelf(&self, book: i64, shelf: i64) {
        self.db
            .conn()
            .execute(
                "INSERT INTO book_bookshelf (book,bookshelf) VALUES (?,?)",
                (book, shelf),
            )
            .unwrap();
    }

    pub fn mark_read(&self, book: i64) {
        self.db
            .conn()
            .execute("UPDATE books SET read=1 WHERE _id=?", [book])
            .unwrap();
    }

    pub fn loan(&self, book: i64, to: &str) {
        self.db
            .conn()
            .execute("INSERT INTO loan (book,loanee) VALUES (?,?)", (book, to))
            .unwrap();
    }

    /// `(level, key, group, visible)` of every list row, in row-id order.
    pub fn list_rows(&self, table: &str) -> Vec<(i64, String, i64, bool)> {
        let mut stmt = self
            .db
            .conn()
            .prepare(&format!(
                "SELECT node_level,node_key,node_group,node_visible FROM {table} ORDER BY _id"
            ))
            .unwrap();
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .unwrap();
        rows.map(|r| r.unwrap()).collect()
    }
}
