use serde::{Deserialize, Serialize};

/// Coarse classification of a failure, shared by every layer.
///
/// The class decides what happens next: retriable classes go back through
/// the retry policy, the others terminate the operation immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed input or a missing aggregate. Never retried.
    Validation,
    /// A business rule rejected the operation (insufficient funds, duplicates).
    Conflict,
    /// Infrastructure failure such as a transport or database error.
    Transient,
    /// The operation did not finish within its deadline.
    Timeout,
}

impl ErrorClass {
    /// Returns true if an operation failing with this class may be retried.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::Conflict => "conflict",
            ErrorClass::Transient => "transient",
            ErrorClass::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_and_timeout_are_retriable() {
        assert!(!ErrorClass::Validation.is_retriable());
        assert!(!ErrorClass::Conflict.is_retriable());
        assert!(ErrorClass::Transient.is_retriable());
        assert!(ErrorClass::Timeout.is_retriable());
    }

    #[test]
    fn test_serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorClass::Validation).unwrap();
        assert_eq!(json, "\"validation\"");
    }
}
