//! FILENAME: store/src/db.rs
//!
//! Connection wrapper. Adds three things over a raw `rusqlite::Connection`:
//! cached prepared statements for the hot statement set, nesting-aware
//! transactions (an inner `with_transaction` participates in the outer one;
//! only the outermost call commits or rolls back), and small utilities the
//! list engine needs (collation probe, ANALYZE).

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, Params};

use crate::error::StoreError;

// ============================================================================
// DB
// ============================================================================

/// A single SQLite connection. Not `Sync`; one connection per thread.
pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let db = Db { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory_with_flags(OpenFlags::default())?;
        let db = Db { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA foreign_keys=ON;",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Run `f` inside a transaction. When a transaction is already open the
    /// closure simply joins it; otherwise one is opened here, committed on
    /// `Ok` and rolled back on `Err`.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Db) -> Result<T, E>,
    {
        if self.in_transaction() {
            return f(self);
        }
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| E::from(StoreError::Sql(e)))?;
        match f(self) {
            Ok(value) => {
                self.conn
                    .execute_batch("COMMIT")
                    .map_err(|e| E::from(StoreError::Sql(e)))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    log::error!("rollback failed: {rollback}");
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Statement helpers (cached)
    // ------------------------------------------------------------------------

    /// Execute a non-SELECT statement through the statement cache, returning
    /// the affected row count.
    pub fn exec<P: Params>(&self, sql: &str, params: P) -> Result<usize, StoreError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params)?)
    }

    /// Single-value integer query (COUNT and friends).
    pub fn query_i64<P: Params>(&self, sql: &str, params: P) -> Result<i64, StoreError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.query_row(params, |row| row.get(0))?)
    }

    /// Single-value integer query returning `None` on an empty result.
    pub fn query_opt_i64<P: Params>(&self, sql: &str, params: P) -> Result<Option<i64>, StoreError> {
        use rusqlite::OptionalExtension;
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.query_row(params, |row| row.get(0)).optional()?)
    }

    /// All values of the first column, as raw SQLite values.
    pub fn query_column<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Value>, StoreError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, Value>(0))?;
        let mut out = Vec::new();
        for value in rows {
            out.push(value?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------------
    // Utilities
    // ------------------------------------------------------------------------

    /// Probe whether the connection's default text ordering distinguishes
    /// case. Binary collation sorts all uppercase before lowercase.
    pub fn collation_is_case_sensitive(&self) -> Result<bool, StoreError> {
        self.conn.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS collation_probe (t text);\
             DELETE FROM collation_probe;",
        )?;
        for value in ["b", "a", "C"] {
            self.conn
                .execute("INSERT INTO collation_probe(t) VALUES (?1)", [value])?;
        }
        let first: String =
            self.conn
                .query_row("SELECT t FROM collation_probe ORDER BY t", [], |row| {
                    row.get(0)
                })?;
        self.conn.execute_batch("DROP TABLE collation_probe")?;
        Ok(first == "C")
    }

    /// Refresh the query planner statistics for one table.
    pub fn analyze(&self, table: &str) -> Result<(), StoreError> {
        self.conn.execute_batch(&format!("ANALYZE {table}"))?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
