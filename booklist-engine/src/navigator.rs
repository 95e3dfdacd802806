//! FILENAME: booklist-engine/src/navigator.rs
//!
//! Leaf-to-leaf traversal. Moves first/last/next/previous over the book rows
//! of the list in row-id order, skipping other placements of the currently
//! positioned book so a book listed under two authors is not visited twice in
//! a row.

use rusqlite::OptionalExtension;

use crate::error::Result;
use crate::materializer::Booklist;
use crate::schema::{BOOK, NODE_GROUP};
use crate::style::GroupKind;

pub struct BookNavigator<'a, 'db> {
    list: &'a Booklist<'db>,
    row_id: Option<i64>,
    book_id: i64,
}

impl<'a, 'db> BookNavigator<'a, 'db> {
    pub fn new(list: &'a Booklist<'db>) -> Self {
        BookNavigator {
            list,
            row_id: None,
            book_id: 0,
        }
    }

    /// Position on a known leaf row, e.g. the book a caller has open.
    pub fn position_at(&mut self, row_id: i64, book_id: i64) {
        self.row_id = Some(row_id);
        self.book_id = book_id;
    }

    pub fn current_row_id(&self) -> Option<i64> {
        self.row_id
    }

    /// The book at the current position; 0 when not positioned.
    pub fn current_book_id(&self) -> i64 {
        self.book_id
    }

    pub fn move_first(&mut self) -> Result<bool> {
        let found = self.query(
            &format!(
                "SELECT _id,{BOOK} FROM {} WHERE {NODE_GROUP}=? ORDER BY _id LIMIT 1",
                self.list.table_name()
            ),
            (GroupKind::Book.code(),),
        )?;
        Ok(self.apply(found))
    }

    pub fn move_last(&mut self) -> Result<bool> {
        let found = self.query(
            &format!(
                "SELECT _id,{BOOK} FROM {} WHERE {NODE_GROUP}=? ORDER BY _id DESC LIMIT 1",
                self.list.table_name()
            ),
            (GroupKind::Book.code(),),
        )?;
        Ok(self.apply(found))
    }

    /// Move to the next book row, skipping rows for the current book.
    pub fn move_next(&mut self) -> Result<bool> {
        let found = self.query(
            &format!(
                "SELECT _id,{BOOK} FROM {} \
                 WHERE {NODE_GROUP}=? AND _id>? AND {BOOK}<>? ORDER BY _id LIMIT 1",
                self.list.table_name()
            ),
            (
                GroupKind::Book.code(),
                self.row_id.unwrap_or(0),
                self.book_id,
            ),
        )?;
        Ok(self.apply(found))
    }

    /// Move to the previous book row, skipping rows for the current book.
    pub fn move_prev(&mut self) -> Result<bool> {
        let found = self.query(
            &format!(
                "SELECT _id,{BOOK} FROM {} \
                 WHERE {NODE_GROUP}=? AND _id<? AND {BOOK}<>? ORDER BY _id DESC LIMIT 1",
                self.list.table_name()
            ),
            (
                GroupKind::Book.code(),
                self.row_id.unwrap_or(i64::MAX),
                self.book_id,
            ),
        )?;
        Ok(self.apply(found))
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Option<(i64, i64)>> {
        let mut stmt = self.list.db().conn().prepare_cached(sql)?;
        Ok(stmt
            .query_row(params, |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?)
    }

    fn apply(&mut self, found: Option<(i64, i64)>) -> bool {
        match found {
            Some((row_id, book_id)) => {
                self.row_id = Some(row_id);
                self.book_id = book_id;
                true
            }
            None => false,
        }
    }
}
