//! FILENAME: booklist-engine/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BooklistError {
    #[error("storage error: {0}")]
    Store(#[from] store::StoreError),

    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("saved node state was inconsistent and has been cleared")]
    NodeStateConflict,
}

pub type Result<T> = std::result::Result<T, BooklistError>;
