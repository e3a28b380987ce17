//! # Store Error Types Module
//!
//! Error types for the local store. Unique-constraint violations are split out
//! as [`DbError::Conflict`] so a racing merge can be retried instead of
//! failing the run.

use crate::error::Error as CrateError;
use thiserror::Error;

/// Error type for database operations
#[derive(Debug, Error)]
pub enum DbError {
    /// LibSQL error
    #[error("LibSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// SQL query error
    #[error("SQL query error: {0}")]
    Query(String),

    /// Schema error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Data error
    #[error("Data error: {0}")]
    Data(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Unique constraint violated by a concurrent writer
    #[error("Unique constraint conflict: {0}")]
    Conflict(String),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl DbError {
    /// Classify a failed statement, separating unique-constraint violations
    pub fn query(context: &str, err: libsql::Error) -> Self {
        let message = err.to_string();
        if message.contains("UNIQUE constraint failed") {
            DbError::Conflict(format!("{}: {}", context, message))
        } else {
            DbError::Query(format!("{}: {}", context, message))
        }
    }
}

impl From<DbError> for CrateError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict(_) => CrateError::StorageConflict(err.to_string()),
            DbError::NotFound(_) => CrateError::Config(err.to_string()),
            _ => CrateError::Database(err.to_string()),
        }
    }
}
