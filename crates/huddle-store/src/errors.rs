//! Error types for directory lookups.

use thiserror::Error;

/// Errors that can occur while querying the directory.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },
}

/// Convenience type alias for directory results.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_converts() {
        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(err.to_string().starts_with("sqlite error"));
    }

    #[test]
    fn migration_display() {
        let err = StoreError::Migration {
            message: "v1 failed".into(),
        };
        assert_eq!(err.to_string(), "migration error: v1 failed");
    }
}
