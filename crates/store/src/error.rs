use common::ErrorClass;
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A named lock could not be acquired within the configured timeout.
    ///
    /// Classified as transient: the holder is expected to finish, so the
    /// whole unit of work can simply be retried.
    #[error("Timed out acquiring lock {name}")]
    LockTimeout { name: String },

    /// The in-process lock table was poisoned by a panicking thread.
    #[error("Lock manager poisoned: {0}")]
    LockPoisoned(String),

    /// A uniqueness or optimistic concurrency check failed at write time.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back to a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::LockTimeout { .. }
            | StoreError::LockPoisoned(_)
            | StoreError::Database(_)
            | StoreError::Migration(_) => ErrorClass::Transient,
            StoreError::Conflict(_) => ErrorClass::Conflict,
            StoreError::Serialization(_) | StoreError::Corrupt(_) => ErrorClass::Validation,
        }
    }

    /// Returns true for uniqueness and version conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
