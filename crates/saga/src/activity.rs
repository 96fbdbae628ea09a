//! The closed set of activities and the capability that executes them.

use async_trait::async_trait;
use common::ErrorClass;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Every operation the saga can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Activity {
    ReserveProducts,
    ReleaseProducts,
    ProcessPayment,
    RefundPayment,
    SendOrderCreatedNotification,
}

impl Activity {
    /// The activity that semantically undoes this one, if any.
    pub fn compensation(&self) -> Option<Activity> {
        match self {
            Activity::ReserveProducts => Some(Activity::ReleaseProducts),
            Activity::ProcessPayment => Some(Activity::RefundPayment),
            Activity::SendOrderCreatedNotification => None,
            Activity::ReleaseProducts | Activity::RefundPayment => None,
        }
    }

    pub fn is_compensation(&self) -> bool {
        matches!(self, Activity::ReleaseProducts | Activity::RefundPayment)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Activity::ReserveProducts => "ReserveProducts",
            Activity::ReleaseProducts => "ReleaseProducts",
            Activity::ProcessPayment => "ProcessPayment",
            Activity::RefundPayment => "RefundPayment",
            Activity::SendOrderCreatedNotification => "SendOrderCreatedNotification",
        }
    }
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One invocation of an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRequest {
    pub activity: Activity,
    pub saga_id: String,
    /// Identical for every attempt of the same activity in the same saga.
    /// Executors use it to make re-invocation harmless.
    pub idempotency_key: String,
    pub input: Value,
}

impl ActivityRequest {
    pub fn new(activity: Activity, saga_id: &str, input: Value) -> Self {
        Self {
            activity,
            saga_id: saga_id.to_string(),
            idempotency_key: format!("{saga_id}/{}", activity.name()),
            input,
        }
    }

    /// Decodes the input; a mismatch is a validation failure.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, ActivityError> {
        serde_json::from_value(self.input.clone()).map_err(|e| {
            ActivityError::validation(format!("invalid {} input: {e}", self.activity))
        })
    }
}

/// A classified activity failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{class} failure: {message}")]
pub struct ActivityError {
    pub class: ErrorClass,
    pub message: String,
}

impl ActivityError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Validation, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Conflict, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Timeout, message)
    }

    pub fn is_retriable(&self) -> bool {
        self.class.is_retriable()
    }
}

/// Executes activities on behalf of the orchestrator.
///
/// Implementations must tolerate being called again with the same
/// idempotency key after a timeout or crash.
#[async_trait]
pub trait ActivityExecutor: Send + Sync + 'static {
    async fn execute(&self, request: ActivityRequest) -> Result<Value, ActivityError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_forward_activity_with_side_effects_has_compensation() {
        assert_eq!(
            Activity::ReserveProducts.compensation(),
            Some(Activity::ReleaseProducts)
        );
        assert_eq!(
            Activity::ProcessPayment.compensation(),
            Some(Activity::RefundPayment)
        );
        assert_eq!(Activity::SendOrderCreatedNotification.compensation(), None);
        assert!(Activity::ReleaseProducts.compensation().is_none());
    }

    #[test]
    fn test_idempotency_key_is_stable() {
        let a = ActivityRequest::new(Activity::ProcessPayment, "order_1", json!({}));
        let b = ActivityRequest::new(Activity::ProcessPayment, "order_1", json!({"x": 1}));
        assert_eq!(a.idempotency_key, "order_1/ProcessPayment");
        assert_eq!(a.idempotency_key, b.idempotency_key);
    }

    #[test]
    fn test_bad_input_is_validation_error() {
        let request = ActivityRequest::new(Activity::ProcessPayment, "s", json!("nope"));
        let err = request.input::<Vec<u32>>().unwrap_err();
        assert_eq!(err.class, ErrorClass::Validation);
        assert!(!err.is_retriable());
    }
}
