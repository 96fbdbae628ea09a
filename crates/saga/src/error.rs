//! Saga error types.

use common::ErrorClass;
use store::StoreError;
use thiserror::Error;

/// Errors that stop the orchestrator from driving a saga.
///
/// Activity failures are not errors at this level: they are recorded in the
/// saga log and drive the saga towards compensation.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Saga log or repository failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No saga with the given id exists.
    #[error("Saga not found: {0}")]
    NotFound(String),

    /// Another process advanced the saga first.
    #[error("Saga {0} was modified concurrently")]
    ConcurrentModification(String),

    /// A completion hook failed; the saga stays in its current step.
    #[error("Saga hook failed: {0}")]
    Hook(String),

    /// A stored record cannot be interpreted as a saga.
    #[error("Invalid saga record: {0}")]
    InvalidRecord(String),
}

impl SagaError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SagaError::Store(e) => e.class(),
            SagaError::NotFound(_) => ErrorClass::Validation,
            SagaError::ConcurrentModification(_) => ErrorClass::Conflict,
            SagaError::Hook(_) => ErrorClass::Transient,
            SagaError::Serialization(_) | SagaError::InvalidRecord(_) => ErrorClass::Validation,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
