//! Saga step machine.

use serde::{Deserialize, Serialize};

/// The step a saga is at.
///
/// ```text
/// ReserveProducts ──► ProcessPayment ──► SendNotification ──► Done
///        │                  │
///        ▼                  ▼
///      Failed ◄──────── Compensating
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    #[default]
    ReserveProducts,
    ProcessPayment,
    SendNotification,
    /// A step failed after earlier steps committed; undoing them.
    Compensating,
    /// All steps completed (terminal). The notification may have failed.
    Done,
    /// The saga failed (terminal).
    Failed,
}

impl SagaStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStep::Done | SagaStep::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::ReserveProducts => "reserve_products",
            SagaStep::ProcessPayment => "process_payment",
            SagaStep::SendNotification => "send_notification",
            SagaStep::Compensating => "compensating",
            SagaStep::Done => "done",
            SagaStep::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_step_is_reserve() {
        assert_eq!(SagaStep::default(), SagaStep::ReserveProducts);
    }

    #[test]
    fn test_terminal_steps() {
        assert!(!SagaStep::ReserveProducts.is_terminal());
        assert!(!SagaStep::ProcessPayment.is_terminal());
        assert!(!SagaStep::SendNotification.is_terminal());
        assert!(!SagaStep::Compensating.is_terminal());
        assert!(SagaStep::Done.is_terminal());
        assert!(SagaStep::Failed.is_terminal());
    }

    #[test]
    fn test_serialized_name_matches_as_str() {
        for step in [SagaStep::ProcessPayment, SagaStep::Compensating, SagaStep::Done] {
            let json = serde_json::to_value(step).unwrap();
            assert_eq!(json, serde_json::Value::String(step.as_str().to_string()));
        }
    }
}
