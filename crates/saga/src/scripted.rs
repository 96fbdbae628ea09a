//! In-memory activity executor for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::activity::{Activity, ActivityError, ActivityExecutor, ActivityRequest};

#[derive(Debug, Default)]
struct ScriptState {
    scripted: HashMap<Activity, VecDeque<Result<Value, ActivityError>>>,
    failures: HashMap<Activity, ActivityError>,
    delays: HashMap<Activity, Duration>,
    requests: Vec<ActivityRequest>,
}

/// Executor whose outcomes are set up by the test.
///
/// Every call is recorded. Scripted outcomes are consumed first, then a
/// persistent failure if one is set, and otherwise the activity succeeds
/// (`true`, or `null` for the notification).
#[derive(Debug, Clone, Default)]
pub struct ScriptedActivities {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedActivities {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues outcomes for the next calls of an activity.
    pub fn script(&self, activity: Activity, outcomes: Vec<Result<Value, ActivityError>>) {
        self.lock()
            .scripted
            .entry(activity)
            .or_default()
            .extend(outcomes);
    }

    /// Makes every further call of an activity fail.
    pub fn set_fail(&self, activity: Activity, error: ActivityError) {
        self.lock().failures.insert(activity, error);
    }

    pub fn clear_fail(&self, activity: Activity) {
        self.lock().failures.remove(&activity);
    }

    /// Delays every call of an activity.
    pub fn set_delay(&self, activity: Activity, delay: Duration) {
        self.lock().delays.insert(activity, delay);
    }

    /// The activities called so far, in call order.
    pub fn calls(&self) -> Vec<Activity> {
        self.lock().requests.iter().map(|r| r.activity).collect()
    }

    pub fn call_count(&self, activity: Activity) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.activity == activity)
            .count()
    }

    pub fn requests(&self) -> Vec<ActivityRequest> {
        self.lock().requests.clone()
    }
}

#[async_trait]
impl ActivityExecutor for ScriptedActivities {
    async fn execute(&self, request: ActivityRequest) -> Result<Value, ActivityError> {
        let activity = request.activity;
        let (outcome, delay) = {
            let mut state = self.lock();
            state.requests.push(request);
            let outcome = match state.scripted.get_mut(&activity).and_then(VecDeque::pop_front) {
                Some(outcome) => outcome,
                None => match state.failures.get(&activity) {
                    Some(error) => Err(error.clone()),
                    None if activity == Activity::SendOrderCreatedNotification => Ok(Value::Null),
                    None => Ok(Value::Bool(true)),
                },
            };
            (outcome, state.delays.get(&activity).copied())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(activity: Activity) -> ActivityRequest {
        ActivityRequest::new(activity, "order_1", json!({}))
    }

    #[tokio::test]
    async fn test_defaults_succeed() {
        let activities = ScriptedActivities::new();

        let reserved = activities
            .execute(request(Activity::ReserveProducts))
            .await
            .unwrap();
        let notified = activities
            .execute(request(Activity::SendOrderCreatedNotification))
            .await
            .unwrap();

        assert_eq!(reserved, json!(true));
        assert_eq!(notified, Value::Null);
        assert_eq!(
            activities.calls(),
            vec![
                Activity::ReserveProducts,
                Activity::SendOrderCreatedNotification
            ]
        );
    }

    #[tokio::test]
    async fn test_script_then_failure() {
        let activities = ScriptedActivities::new();
        activities.script(
            Activity::ProcessPayment,
            vec![Err(ActivityError::transient("connection reset"))],
        );
        activities.set_fail(Activity::ProcessPayment, ActivityError::conflict("declined"));

        let first = activities.execute(request(Activity::ProcessPayment)).await;
        let second = activities.execute(request(Activity::ProcessPayment)).await;

        assert!(first.unwrap_err().is_retriable());
        assert!(!second.unwrap_err().is_retriable());
        assert_eq!(activities.call_count(Activity::ProcessPayment), 2);
    }
}
