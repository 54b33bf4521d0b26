//! Custom error types for the common library
//!
//! This module defines the storage error type shared by the tracking core
//! and the tracker service.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred while creating the schema
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

impl DatabaseError {
    /// Whether the failure happened before any statement reached the server.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            DatabaseError::Connection(_)
                | DatabaseError::Query(SqlxError::PoolTimedOut)
                | DatabaseError::Query(SqlxError::PoolClosed)
                | DatabaseError::Query(SqlxError::Io(_))
        )
    }
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_counts_as_connectivity() {
        assert!(DatabaseError::Query(SqlxError::PoolTimedOut).is_connectivity());
        assert!(!DatabaseError::Query(SqlxError::RowNotFound).is_connectivity());
        assert!(!DatabaseError::Migration("boom".to_string()).is_connectivity());
    }

    #[test]
    fn messages_carry_context() {
        let err = DatabaseError::Configuration("missing host".to_string());
        assert_eq!(
            err.to_string(),
            "Database configuration error: missing host"
        );
    }
}
