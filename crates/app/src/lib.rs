//! Order fulfillment service.
//!
//! Wires the application services, the create-order saga, the outbox
//! dispatcher and the event consumers together, and exposes order and
//! account endpoints over HTTP with structured logging (tracing) and
//! Prometheus metrics.

pub mod activities;
pub mod config;
pub mod error;
pub mod handlers;
pub mod notifier;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use messaging::{EventConsumer, InMemoryBroker, OutboxDispatcher};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::SagaOrchestrator;
use store::Store;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use activities::ServiceActivities;
use config::Config;
use handlers::{
    NOTIFICATION_EVENTS_BINDINGS, NOTIFICATION_EVENTS_QUEUE, NotificationEventsHandler,
    ORDER_EVENTS_BINDINGS, ORDER_EVENTS_QUEUE, OrderEventsHandler,
};
use notifier::Notifier;
use services::{AccountAppService, OrderAppService, PaymentResultHandler};

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store, N: Notifier> {
    pub orders: OrderAppService<S, ServiceActivities<S, N>>,
    pub accounts: AccountAppService<S>,
    pub app_id: String,
}

impl<S: Store, N: Notifier> AppState<S, N> {
    /// Builds the services and the create-order saga over one store.
    pub fn new(store: S, notifier: Arc<N>, config: &Config) -> Self {
        let activities = Arc::new(ServiceActivities::new(store.clone(), notifier));
        let hooks = Arc::new(PaymentResultHandler::new(store.clone()));
        let saga = SagaOrchestrator::new(store.clone(), activities, hooks, config.saga_options());

        Self {
            orders: OrderAppService::new(store.clone(), saga),
            accounts: AccountAppService::new(store),
            app_id: config.app_id.clone(),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store, N: Notifier>(
    state: Arc<AppState<S, N>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health::<S, N>))
        .route("/orders", post(routes::orders::create::<S, N>))
        .route("/orders/{id}", get(routes::orders::get::<S, N>))
        .route("/orders/{id}/saga", get(routes::orders::saga_status::<S, N>))
        .route(
            "/orders/{id}/saga/compensations",
            post(routes::orders::retry_compensations::<S, N>),
        )
        .route("/accounts", post(routes::accounts::create::<S, N>))
        .route("/accounts/{id}", get(routes::accounts::get::<S, N>))
        .route(
            "/accounts/{id}/balance",
            put(routes::accounts::update_balance::<S, N>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Declares the service queues on `broker` and spawns the outbox dispatcher
/// and both event consumers. Every task stops when `shutdown` turns true.
pub async fn start_workers<S: Store>(
    store: S,
    broker: &InMemoryBroker,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    broker
        .declare_queue(ORDER_EVENTS_QUEUE, ORDER_EVENTS_BINDINGS)
        .await;
    broker
        .declare_queue(NOTIFICATION_EVENTS_QUEUE, NOTIFICATION_EVENTS_BINDINGS)
        .await;

    let dispatcher = OutboxDispatcher::new(
        store.clone(),
        Arc::new(broker.clone()),
        config.dispatcher_config(),
    );
    let order_events = broker.consumer(
        ORDER_EVENTS_QUEUE,
        Arc::new(EventConsumer::new(store.clone(), OrderEventsHandler::new())),
        config.max_redeliveries,
    );
    let notification_events = broker.consumer(
        NOTIFICATION_EVENTS_QUEUE,
        Arc::new(EventConsumer::new(store, NotificationEventsHandler::new())),
        config.max_redeliveries,
    );

    tracing::info!(
        exchange = broker.exchange(),
        "Starting outbox dispatcher and event consumers"
    );
    vec![
        tokio::spawn(dispatcher.run(shutdown.clone())),
        tokio::spawn(order_events.run(shutdown.clone())),
        tokio::spawn(notification_events.run(shutdown)),
    ]
}
