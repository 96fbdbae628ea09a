//! Saga orchestrator for the create-order saga.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use store::{RepositoryProvider, Store, UnitOfWork};
use tokio::task::JoinHandle;

use crate::activity::{Activity, ActivityError, ActivityExecutor, ActivityRequest};
use crate::aggregate::SagaInstance;
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::hooks::{NoopHooks, SagaHooks};
use crate::order_fulfillment::{self, CreateOrderParams};
use crate::policy::ActivityOptions;
use crate::state::SagaStep;

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaOptions {
    /// Applied to every activity, forward or compensating.
    pub activity: ActivityOptions,
    /// Budget for the whole saga, checked before every forward attempt.
    pub saga_timeout: Duration,
}

impl Default for SagaOptions {
    fn default() -> Self {
        Self {
            activity: ActivityOptions::default(),
            saga_timeout: Duration::from_secs(600),
        }
    }
}

/// A saga instance together with the version it was loaded at.
struct Tracked {
    instance: SagaInstance,
    version: i64,
}

/// Marks a saga as driven by this process until dropped.
struct RunningGuard {
    running: Arc<Mutex<HashSet<String>>>,
    saga_id: String,
}

impl RunningGuard {
    fn acquire(running: &Arc<Mutex<HashSet<String>>>, saga_id: &str) -> Option<Self> {
        let mut set = running.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(saga_id.to_string()) {
            return None;
        }
        Some(Self {
            running: Arc::clone(running),
            saga_id: saga_id.to_string(),
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut set = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.saga_id);
    }
}

/// Drives create-order sagas to completion.
///
/// Steps run strictly in order: reserve products, process payment, send the
/// notification. Each transition is saved to the saga log before the next
/// activity is invoked, and saves use optimistic concurrency, so a saga
/// advanced by another process is never overwritten. After a restart,
/// [`resume_unfinished`](Self::resume_unfinished) continues every saga from
/// its last saved step.
///
/// When reservation or payment fails for good, the completed steps are
/// compensated in reverse order and the saga ends `Failed`. A failing
/// notification is recorded and the saga still ends `Done`.
pub struct SagaOrchestrator<S, E, H = NoopHooks>
where
    S: Store,
    E: ActivityExecutor,
    H: SagaHooks,
{
    uow: UnitOfWork<S>,
    executor: Arc<E>,
    hooks: Arc<H>,
    options: Arc<SagaOptions>,
    running: Arc<Mutex<HashSet<String>>>,
}

impl<S, E, H> Clone for SagaOrchestrator<S, E, H>
where
    S: Store,
    E: ActivityExecutor,
    H: SagaHooks,
{
    fn clone(&self) -> Self {
        Self {
            uow: self.uow.clone(),
            executor: Arc::clone(&self.executor),
            hooks: Arc::clone(&self.hooks),
            options: Arc::clone(&self.options),
            running: Arc::clone(&self.running),
        }
    }
}

impl<S, E, H> SagaOrchestrator<S, E, H>
where
    S: Store,
    E: ActivityExecutor,
    H: SagaHooks,
{
    pub fn new(store: S, executor: Arc<E>, hooks: Arc<H>, options: SagaOptions) -> Self {
        Self {
            uow: UnitOfWork::new(store),
            executor,
            hooks,
            options: Arc::new(options),
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn options(&self) -> &SagaOptions {
        &self.options
    }

    /// Records a new saga inside the caller's unit of work.
    ///
    /// Returns false without writing anything if a saga with this id
    /// already exists. The saga does not run until [`run`](Self::run) or
    /// [`spawn`](Self::spawn) is called after the caller commits.
    pub async fn start_in(
        &self,
        repos: &mut dyn RepositoryProvider,
        saga_id: &str,
        params: CreateOrderParams,
    ) -> Result<bool> {
        if repos.sagas().find(saga_id).await?.is_some() {
            tracing::debug!(saga_id, "Saga already started");
            return Ok(false);
        }

        let started_at = Utc::now();
        let deadline = chrono::Duration::from_std(self.options.saga_timeout)
            .ok()
            .and_then(|timeout| started_at.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let instance = SagaInstance::start(SagaEvent::Started {
            saga_id: saga_id.to_string(),
            saga_type: order_fulfillment::SAGA_TYPE.to_string(),
            params,
            started_at,
            deadline,
        })?;
        repos.sagas().insert(instance.to_record(1)?).await?;

        tracing::info!(saga_id, %deadline, "Saga started");
        metrics::counter!("saga_started_total").increment(1);
        Ok(true)
    }

    /// Records a new saga in its own unit of work.
    ///
    /// Starting an existing saga is a no-op that returns false.
    pub async fn start(&self, saga_id: &str, params: CreateOrderParams) -> Result<bool> {
        let this = self.clone();
        let id = saga_id.to_string();
        let started = self
            .uow
            .execute(move |repos| Box::pin(async move { this.start_in(repos, &id, params).await }))
            .await;

        match started {
            // Lost a race against a concurrent start.
            Err(SagaError::Store(e)) if e.is_conflict() => Ok(false),
            other => other,
        }
    }

    /// Starts the saga if needed and drives it to a terminal step.
    pub async fn execute(&self, saga_id: &str, params: CreateOrderParams) -> Result<SagaInstance> {
        self.start(saga_id, params).await?;
        self.run(saga_id).await
    }

    /// Drives a saga from its saved step until it is `Done` or `Failed`.
    ///
    /// If this process is already driving the saga, the saved state is
    /// returned without running anything.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, saga_id: &str) -> Result<SagaInstance> {
        let Some(_guard) = RunningGuard::acquire(&self.running, saga_id) else {
            tracing::debug!("Saga is already running");
            return self
                .get_saga(saga_id)
                .await?
                .ok_or_else(|| SagaError::NotFound(saga_id.to_string()));
        };

        let mut tracked = self
            .load(saga_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(saga_id.to_string()))?;
        if tracked.instance.is_terminal() {
            return Ok(tracked.instance);
        }

        loop {
            match tracked.instance.step() {
                SagaStep::ReserveProducts
                | SagaStep::ProcessPayment
                | SagaStep::SendNotification => {
                    self.advance(&mut tracked).await?
                }
                SagaStep::Compensating => self.compensate(&mut tracked).await?,
                SagaStep::Done | SagaStep::Failed => break,
            }
        }

        record_outcome(&tracked.instance);
        Ok(tracked.instance)
    }

    /// Runs the saga on a background task.
    pub fn spawn(&self, saga_id: &str) -> JoinHandle<Result<SagaInstance>> {
        let this = self.clone();
        let saga_id = saga_id.to_string();
        tokio::spawn(async move {
            let result = this.run(&saga_id).await;
            if let Err(e) = &result {
                tracing::error!(saga_id, error = %e, "Saga run aborted");
            }
            result
        })
    }

    /// Spawns a run for every saga that has not reached a terminal step.
    #[tracing::instrument(skip(self))]
    pub async fn resume_unfinished(&self) -> Result<Vec<JoinHandle<Result<SagaInstance>>>> {
        let records = self
            .uow
            .execute(|repos| Box::pin(async move { repos.sagas().find_unfinished().await }))
            .await?;

        let handles: Vec<_> = records
            .into_iter()
            .filter(|record| record.saga_type == order_fulfillment::SAGA_TYPE)
            .map(|record| {
                tracing::info!(saga_id = %record.saga_id, step = %record.step, "Resuming saga");
                self.spawn(&record.saga_id)
            })
            .collect();

        tracing::info!(count = handles.len(), "Resumed unfinished sagas");
        Ok(handles)
    }

    /// Attempts every pending compensation of a saga again.
    ///
    /// Each one gets a fresh retry budget. Compensations that fail again
    /// stay pending.
    #[tracing::instrument(skip(self))]
    pub async fn retry_pending_compensations(&self, saga_id: &str) -> Result<SagaInstance> {
        let _guard = RunningGuard::acquire(&self.running, saga_id)
            .ok_or_else(|| SagaError::ConcurrentModification(saga_id.to_string()))?;

        let mut tracked = self
            .load(saga_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(saga_id.to_string()))?;

        let pending: Vec<Activity> = tracked
            .instance
            .pending_compensations()
            .iter()
            .map(|p| p.activity)
            .collect();
        for activity in pending {
            self.transition(&mut tracked, SagaEvent::CompensationRetried { activity })
                .await?;
            self.compensate_one(&mut tracked, activity).await?;
        }

        Ok(tracked.instance)
    }

    pub async fn get_saga(&self, saga_id: &str) -> Result<Option<SagaInstance>> {
        Ok(self.load(saga_id).await?.map(|tracked| tracked.instance))
    }

    async fn load(&self, saga_id: &str) -> Result<Option<Tracked>> {
        let id = saga_id.to_string();
        let record = self
            .uow
            .execute(move |repos| Box::pin(async move { repos.sagas().find(&id).await }))
            .await?;

        record
            .map(|record| {
                Ok(Tracked {
                    instance: SagaInstance::from_record(&record)?,
                    version: record.version,
                })
            })
            .transpose()
    }

    /// Applies an event and saves the result before adopting it.
    async fn transition(&self, tracked: &mut Tracked, event: SagaEvent) -> Result<()> {
        tracing::debug!(
            saga_id = tracked.instance.saga_id(),
            event = event.event_type(),
            "Saga transition"
        );

        let mut next = tracked.instance.clone();
        next.apply(event);
        let expected = tracked.version;
        let record = next.to_record(expected + 1)?;

        let saved = self
            .uow
            .execute(move |repos| {
                Box::pin(async move { repos.sagas().save(record, expected).await })
            })
            .await;
        match saved {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                return Err(SagaError::ConcurrentModification(next.saga_id().to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        tracked.instance = next;
        tracked.version = expected + 1;
        Ok(())
    }

    /// Runs the activity of the current forward step.
    async fn advance(&self, tracked: &mut Tracked) -> Result<()> {
        let step = tracked.instance.step();
        let activity = order_fulfillment::activity_for(step).ok_or_else(|| {
            SagaError::InvalidRecord(format!("step {step} has no forward activity"))
        })?;

        match self.perform(tracked, activity, true).await? {
            Ok(result) => {
                if activity == Activity::ProcessPayment {
                    self.hooks
                        .payment_succeeded(tracked.instance.params().order_id)
                        .await?;
                }
                tracing::info!(%activity, "Saga activity completed");
                self.transition(tracked, SagaEvent::ActivityCompleted { activity, result })
                    .await
            }
            Err(error) if activity == Activity::SendOrderCreatedNotification => {
                tracing::warn!(
                    %activity,
                    error = %error,
                    "Notification failed, order stays created"
                );
                self.transition(tracked, SagaEvent::notification_failed(&error))
                    .await
            }
            Err(error) => {
                tracing::error!(%activity, error = %error, "Saga activity failed");
                self.transition(tracked, SagaEvent::activity_failed(activity, &error))
                    .await
            }
        }
    }

    /// Compensates completed steps in reverse order, then fails the saga.
    async fn compensate(&self, tracked: &mut Tracked) -> Result<()> {
        for activity in tracked.instance.outstanding_compensations() {
            self.compensate_one(tracked, activity).await?;
        }

        let reason = tracked
            .instance
            .failure()
            .map(|failure| failure.message.clone())
            .unwrap_or_else(|| "saga failed".to_string());
        self.hooks
            .payment_failed(tracked.instance.params().order_id, &reason)
            .await?;

        self.transition(
            tracked,
            SagaEvent::Failed {
                failed_at: Utc::now(),
            },
        )
        .await
    }

    async fn compensate_one(&self, tracked: &mut Tracked, activity: Activity) -> Result<()> {
        tracing::warn!(%activity, "Running compensation");
        metrics::counter!("saga_compensations_total", "activity" => activity.name()).increment(1);

        match self.perform(tracked, activity, false).await? {
            Ok(_) => {
                self.transition(tracked, SagaEvent::CompensationCompleted { activity })
                    .await
            }
            Err(error) => {
                tracing::error!(%activity, error = %error, "Compensation failed, left pending");
                self.transition(tracked, SagaEvent::compensation_failed(activity, &error))
                    .await
            }
        }
    }

    /// Invokes an activity under its timeout and retry policy.
    ///
    /// The outer result carries orchestration failures; the inner one is
    /// the final outcome of the activity. A `false` result counts as a
    /// conflict failure.
    async fn perform(
        &self,
        tracked: &mut Tracked,
        activity: Activity,
        enforce_deadline: bool,
    ) -> Result<std::result::Result<Value, ActivityError>> {
        let policy = &self.options.activity.retry_policy;
        let maximum_attempts = policy.maximum_attempts.max(1);
        let input = order_fulfillment::input_for(activity, tracked.instance.params())?;

        // Attempts are recorded before the call and outcomes only after it,
        // so a started attempt left by a crashed run has an unknown outcome
        // and may have committed. When no budget or time is left for a fresh
        // attempt, it is asked once more under the same idempotency key.
        let spent = tracked.instance.attempts(activity);
        let out_of_time = enforce_deadline && Utc::now() >= tracked.instance.deadline();
        if spent > 0 && (spent >= maximum_attempts || out_of_time) {
            tracing::warn!(
                %activity,
                attempt = spent,
                "Re-invoking interrupted attempt to learn its outcome"
            );
            let request = ActivityRequest::new(activity, tracked.instance.saga_id(), input);
            return Ok(self.invoke(activity, request).await);
        }

        loop {
            let attempt = tracked.instance.attempts(activity) + 1;
            if enforce_deadline && Utc::now() >= tracked.instance.deadline() {
                return Ok(Err(ActivityError::timeout(format!(
                    "saga deadline {} exceeded before {activity}",
                    tracked.instance.deadline()
                ))));
            }

            self.transition(tracked, SagaEvent::AttemptStarted { activity, attempt })
                .await?;

            let request =
                ActivityRequest::new(activity, tracked.instance.saga_id(), input.clone());
            match self.invoke(activity, request).await {
                Err(error) if error.is_retriable() && attempt < maximum_attempts => {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(%activity, attempt, ?delay, error = %error, "Retrying activity");
                    metrics::counter!("saga_step_retries_total", "activity" => activity.name())
                        .increment(1);
                    tokio::time::sleep(delay).await;
                }
                outcome => return Ok(outcome),
            }
        }
    }

    /// Calls the executor once under the start-to-close timeout.
    async fn invoke(
        &self,
        activity: Activity,
        request: ActivityRequest,
    ) -> std::result::Result<Value, ActivityError> {
        let timeout = self.options.activity.start_to_close_timeout;
        match tokio::time::timeout(timeout, self.executor.execute(request)).await {
            Ok(Ok(Value::Bool(false))) => {
                Err(ActivityError::conflict(format!("{activity} was rejected")))
            }
            Ok(outcome) => outcome,
            Err(_) => Err(ActivityError::timeout(format!(
                "{activity} did not finish within {timeout:?}"
            ))),
        }
    }
}

fn record_outcome(instance: &SagaInstance) {
    if let Some(finished_at) = instance.finished_at() {
        let elapsed = (finished_at - instance.started_at())
            .to_std()
            .unwrap_or_default();
        metrics::histogram!("saga_duration_seconds").record(elapsed.as_secs_f64());
    }

    match instance.step() {
        SagaStep::Done => {
            metrics::counter!("saga_completed").increment(1);
            tracing::info!(saga_id = instance.saga_id(), "Saga completed");
        }
        SagaStep::Failed => {
            metrics::counter!("saga_failed").increment(1);
            let failure = instance.failure();
            tracing::error!(
                saga_id = instance.saga_id(),
                step = ?failure.map(|f| f.step),
                class = ?failure.map(|f| f.class),
                pending_compensations = instance.pending_compensations().len(),
                "Saga failed"
            );
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, ProductId, UserId};
    use domain::Money;
    use store::InMemoryStore;

    use crate::order_fulfillment::SagaItem;
    use crate::scripted::ScriptedActivities;

    fn orchestrator() -> (
        SagaOrchestrator<InMemoryStore, ScriptedActivities>,
        ScriptedActivities,
    ) {
        let activities = ScriptedActivities::new();
        let orchestrator = SagaOrchestrator::new(
            InMemoryStore::new(),
            Arc::new(activities.clone()),
            Arc::new(NoopHooks),
            SagaOptions::default(),
        );
        (orchestrator, activities)
    }

    fn params() -> CreateOrderParams {
        CreateOrderParams {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            items: vec![SagaItem {
                product_id: ProductId::new(),
                quantity: 1,
            }],
            total_price: Money::new(100),
        }
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (orchestrator, activities) = orchestrator();
        let params = params();

        assert!(orchestrator.start("order_1", params.clone()).await.unwrap());
        assert!(!orchestrator.start("order_1", params).await.unwrap());
        assert!(activities.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_unknown_saga() {
        let (orchestrator, _) = orchestrator();
        let result = orchestrator.run("order_missing").await;
        assert!(matches!(result, Err(SagaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_transitions_are_persisted() {
        let (orchestrator, _) = orchestrator();
        let saga = orchestrator.execute("order_1", params()).await.unwrap();

        let stored = orchestrator.get_saga("order_1").await.unwrap().unwrap();
        assert_eq!(stored, saga);
        assert_eq!(stored.step(), SagaStep::Done);
        assert_eq!(stored.attempts(Activity::ProcessPayment), 1);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let (orchestrator, _) = orchestrator();
        orchestrator.start("order_1", params()).await.unwrap();

        let mut stale = orchestrator.load("order_1").await.unwrap().unwrap();
        let mut fresh = orchestrator.load("order_1").await.unwrap().unwrap();
        orchestrator
            .transition(
                &mut fresh,
                SagaEvent::AttemptStarted {
                    activity: Activity::ReserveProducts,
                    attempt: 1,
                },
            )
            .await
            .unwrap();

        let result = orchestrator
            .transition(
                &mut stale,
                SagaEvent::AttemptStarted {
                    activity: Activity::ReserveProducts,
                    attempt: 1,
                },
            )
            .await;
        assert!(matches!(result, Err(SagaError::ConcurrentModification(_))));
    }

    #[test]
    fn test_running_guard_is_exclusive() {
        let running = Arc::new(Mutex::new(HashSet::new()));
        let guard = RunningGuard::acquire(&running, "order_1");
        assert!(guard.is_some());
        assert!(RunningGuard::acquire(&running, "order_1").is_none());

        drop(guard);
        assert!(RunningGuard::acquire(&running, "order_1").is_some());
    }
}
