use common::ErrorClass;
use store::StoreError;
use thiserror::Error;

/// Errors raised when handing a delivery to the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// The broker may or may not have accepted the message.
    #[error("Publish not acknowledged: {0}")]
    NotAcknowledged(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::Unavailable(_) | TransportError::NotAcknowledged(_) => {
                ErrorClass::Transient
            }
            TransportError::Serialization(_) => ErrorClass::Validation,
        }
    }
}

/// Errors raised while consuming a delivery.
///
/// The class decides what the transport does with the message: retriable
/// errors are redelivered, everything else is dead-lettered.
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("Malformed {event_type} payload: {message}")]
    Malformed { event_type: String, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Handler failed: {message}")]
    Handler { class: ErrorClass, message: String },
}

impl ConsumeError {
    pub fn malformed(event_type: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ConsumeError::Malformed {
            event_type: event_type.into(),
            message: err.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ConsumeError::Malformed { .. } | ConsumeError::Validation(_) => ErrorClass::Validation,
            ConsumeError::Store(e) => e.class(),
            ConsumeError::Handler { class, .. } => *class,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.class().is_retriable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_is_permanent() {
        let err = ConsumeError::malformed("user_created", "missing field `login`");
        assert_eq!(err.class(), ErrorClass::Validation);
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_store_errors_keep_their_class() {
        let err = ConsumeError::from(StoreError::LockTimeout {
            name: "account_1".to_string(),
        });
        assert!(err.is_retriable());
        let err = ConsumeError::from(StoreError::Conflict("dup".to_string()));
        assert_eq!(err.class(), ErrorClass::Conflict);
    }
}
