//! Saga instance state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::ErrorClass;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use store::SagaRecord;

use crate::activity::Activity;
use crate::error::SagaError;
use crate::events::SagaEvent;
use crate::order_fulfillment::{self, CreateOrderParams};
use crate::state::SagaStep;

/// Why a saga failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaFailure {
    pub step: SagaStep,
    pub activity: Activity,
    pub class: ErrorClass,
    pub message: String,
}

/// A compensation that could not be completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCompensation {
    pub activity: Activity,
    pub class: ErrorClass,
    pub message: String,
}

/// The durable state of one create-order saga.
///
/// Built exclusively by applying [`SagaEvent`]s and persisted as the payload
/// of a [`SagaRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    saga_id: String,
    saga_type: String,
    params: CreateOrderParams,
    step: SagaStep,
    /// Attempts made so far, per activity.
    attempts: BTreeMap<Activity, u32>,
    results: BTreeMap<Activity, Value>,
    /// Forward activities that completed, in execution order.
    completed: Vec<Activity>,
    compensated: Vec<Activity>,
    pending_compensations: Vec<PendingCompensation>,
    failure: Option<SagaFailure>,
    notification_error: Option<String>,
    started_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl SagaInstance {
    /// Creates the instance described by a `Started` event.
    pub fn start(event: SagaEvent) -> Result<Self, SagaError> {
        match event {
            SagaEvent::Started {
                saga_id,
                saga_type,
                params,
                started_at,
                deadline,
            } => Ok(Self {
                saga_id,
                saga_type,
                params,
                step: SagaStep::ReserveProducts,
                attempts: BTreeMap::new(),
                results: BTreeMap::new(),
                completed: Vec::new(),
                compensated: Vec::new(),
                pending_compensations: Vec::new(),
                failure: None,
                notification_error: None,
                started_at,
                deadline,
                finished_at: None,
            }),
            other => Err(SagaError::InvalidRecord(format!(
                "saga must begin with Started, got {}",
                other.event_type()
            ))),
        }
    }

    pub fn apply(&mut self, event: SagaEvent) {
        match event {
            // Only valid as the first event; see `start`.
            SagaEvent::Started { .. } => {}
            SagaEvent::AttemptStarted { activity, attempt } => {
                self.attempts.insert(activity, attempt);
            }
            SagaEvent::ActivityCompleted { activity, result } => {
                self.results.insert(activity, result);
                if !self.completed.contains(&activity) {
                    self.completed.push(activity);
                }
                if let Some(next) = order_fulfillment::step_after(activity) {
                    self.step = next;
                    if next.is_terminal() {
                        self.finished_at = Some(Utc::now());
                    }
                }
            }
            SagaEvent::ActivityFailed {
                activity,
                class,
                message,
            } => {
                self.failure = Some(SagaFailure {
                    step: self.step,
                    activity,
                    class,
                    message,
                });
                // Compensating with nothing outstanding proceeds straight to
                // Failed.
                self.step = SagaStep::Compensating;
            }
            SagaEvent::NotificationFailed { class, message } => {
                self.notification_error = Some(format!("{class}: {message}"));
                self.step = SagaStep::Done;
                self.finished_at = Some(Utc::now());
            }
            SagaEvent::CompensationCompleted { activity } => {
                self.pending_compensations.retain(|p| p.activity != activity);
                if !self.compensated.contains(&activity) {
                    self.compensated.push(activity);
                }
            }
            SagaEvent::CompensationFailed {
                activity,
                class,
                message,
            } => {
                self.pending_compensations.retain(|p| p.activity != activity);
                self.pending_compensations.push(PendingCompensation {
                    activity,
                    class,
                    message,
                });
            }
            SagaEvent::CompensationRetried { activity } => {
                self.attempts.remove(&activity);
            }
            SagaEvent::Failed { failed_at } => {
                self.step = SagaStep::Failed;
                self.finished_at = Some(failed_at);
            }
        }
    }

    /// Compensations still to be attempted, in reverse completion order.
    ///
    /// Compensations that already failed are excluded; they are retried
    /// explicitly.
    pub fn outstanding_compensations(&self) -> Vec<Activity> {
        self.completed
            .iter()
            .rev()
            .filter_map(|activity| activity.compensation())
            .filter(|comp| {
                !self.compensated.contains(comp)
                    && !self.pending_compensations.iter().any(|p| p.activity == *comp)
            })
            .collect()
    }

    /// Serializes the instance into a saga log record.
    pub fn to_record(&self, version: i64) -> Result<SagaRecord, SagaError> {
        Ok(SagaRecord {
            saga_id: self.saga_id.clone(),
            saga_type: self.saga_type.clone(),
            step: self.step.as_str().to_string(),
            terminal: self.step.is_terminal(),
            payload: serde_json::to_value(self)?,
            version,
            created_at: self.started_at,
            updated_at: Utc::now(),
        })
    }

    pub fn from_record(record: &SagaRecord) -> Result<Self, SagaError> {
        if record.saga_type != order_fulfillment::SAGA_TYPE {
            return Err(SagaError::InvalidRecord(format!(
                "saga {} has unsupported type {}",
                record.saga_id, record.saga_type
            )));
        }
        Ok(serde_json::from_value(record.payload.clone())?)
    }
}

// Query methods
impl SagaInstance {
    pub fn saga_id(&self) -> &str {
        &self.saga_id
    }

    pub fn params(&self) -> &CreateOrderParams {
        &self.params
    }

    pub fn step(&self) -> SagaStep {
        self.step
    }

    pub fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }

    pub fn attempts(&self, activity: Activity) -> u32 {
        self.attempts.get(&activity).copied().unwrap_or(0)
    }

    pub fn result(&self, activity: Activity) -> Option<&Value> {
        self.results.get(&activity)
    }

    pub fn completed_activities(&self) -> &[Activity] {
        &self.completed
    }

    pub fn compensated_activities(&self) -> &[Activity] {
        &self.compensated
    }

    pub fn pending_compensations(&self) -> &[PendingCompensation] {
        &self.pending_compensations
    }

    pub fn failure(&self) -> Option<&SagaFailure> {
        self.failure.as_ref()
    }

    pub fn notification_error(&self) -> Option<&str> {
        self.notification_error.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }
}
