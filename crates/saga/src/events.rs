//! Saga transitions.

use chrono::{DateTime, Utc};
use common::ErrorClass;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::activity::{Activity, ActivityError};
use crate::order_fulfillment::CreateOrderParams;

/// Every change to a [`SagaInstance`](crate::SagaInstance) is one of these.
///
/// The orchestrator applies an event to a copy of the instance, persists the
/// result and only then adopts it, so the saga log always holds the state
/// the next step will start from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    Started {
        saga_id: String,
        saga_type: String,
        params: CreateOrderParams,
        started_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    },

    /// An attempt of an activity is about to be made.
    AttemptStarted { activity: Activity, attempt: u32 },

    /// A forward activity completed; the saga moves to the next step.
    ActivityCompleted { activity: Activity, result: Value },

    /// A forward activity failed for good.
    ActivityFailed {
        activity: Activity,
        class: ErrorClass,
        message: String,
    },

    /// The notification failed; the saga still completes.
    NotificationFailed { class: ErrorClass, message: String },

    CompensationCompleted { activity: Activity },

    /// A compensation failed; it is kept as pending for a later retry.
    CompensationFailed {
        activity: Activity,
        class: ErrorClass,
        message: String,
    },

    /// An operator asked to retry a pending compensation.
    CompensationRetried { activity: Activity },

    /// Compensation finished; the saga is failed.
    Failed { failed_at: DateTime<Utc> },
}

impl SagaEvent {
    pub fn activity_failed(activity: Activity, error: &ActivityError) -> Self {
        SagaEvent::ActivityFailed {
            activity,
            class: error.class,
            message: error.message.clone(),
        }
    }

    pub fn compensation_failed(activity: Activity, error: &ActivityError) -> Self {
        SagaEvent::CompensationFailed {
            activity,
            class: error.class,
            message: error.message.clone(),
        }
    }

    pub fn notification_failed(error: &ActivityError) -> Self {
        SagaEvent::NotificationFailed {
            class: error.class,
            message: error.message.clone(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::Started { .. } => "Started",
            SagaEvent::AttemptStarted { .. } => "AttemptStarted",
            SagaEvent::ActivityCompleted { .. } => "ActivityCompleted",
            SagaEvent::ActivityFailed { .. } => "ActivityFailed",
            SagaEvent::NotificationFailed { .. } => "NotificationFailed",
            SagaEvent::CompensationCompleted { .. } => "CompensationCompleted",
            SagaEvent::CompensationFailed { .. } => "CompensationFailed",
            SagaEvent::CompensationRetried { .. } => "CompensationRetried",
            SagaEvent::Failed { .. } => "Failed",
        }
    }
}
