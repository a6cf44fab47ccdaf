//! Record store error types.

use thiserror::Error;

/// Record store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/hms-api.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// The sparse unique index on the business key rejected a write.
    #[error("duplicate business key '{business_id}' in '{entity}'")]
    DuplicateKey { entity: String, business_id: String },

    /// A stored row could not be decoded into a record.
    #[error("corrupt record in '{entity}': {message}")]
    Corrupt { entity: String, message: String },
}
