//! Order placement and status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, ProductId, UserId};
use domain::{DomainError, Order};
use saga::SagaInstance;
use serde::{Deserialize, Serialize};
use store::Store;

use crate::AppState;
use crate::error::ServiceError;
use crate::notifier::Notifier;
use crate::services::{CreateOrderCommand, RequestedItem};

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: String,
    pub saga_id: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub user_id: String,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_price: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub price: i64,
}

#[derive(Serialize)]
pub struct SagaStatusResponse {
    pub saga_id: String,
    pub step: &'static str,
    pub completed_activities: Vec<&'static str>,
    pub failure: Option<FailureResponse>,
    pub pending_compensations: Vec<FailureResponse>,
    pub notification_error: Option<String>,
}

#[derive(Serialize)]
pub struct FailureResponse {
    pub activity: &'static str,
    pub class: &'static str,
    pub message: String,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id().to_string(),
            user_id: order.user_id().to_string(),
            status: order.status().to_string(),
            items: order
                .items()
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    price: item.price.amount(),
                })
                .collect(),
            total_price: order.total_price().amount(),
            cancel_reason: order.cancel_reason().map(String::from),
        }
    }
}

impl From<&SagaInstance> for SagaStatusResponse {
    fn from(saga: &SagaInstance) -> Self {
        Self {
            saga_id: saga.saga_id().to_string(),
            step: saga.step().as_str(),
            completed_activities: saga
                .completed_activities()
                .iter()
                .map(|activity| activity.name())
                .collect(),
            failure: saga.failure().map(|failure| FailureResponse {
                activity: failure.activity.name(),
                class: failure.class.as_str(),
                message: failure.message.clone(),
            }),
            pending_compensations: saga
                .pending_compensations()
                .iter()
                .map(|pending| FailureResponse {
                    activity: pending.activity.name(),
                    class: pending.class.as_str(),
                    message: pending.message.clone(),
                })
                .collect(),
            notification_error: saga.notification_error().map(String::from),
        }
    }
}

// -- Handlers --

/// POST /orders: place an order and start its saga.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store, N: Notifier>(
    State(state): State<Arc<AppState<S, N>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ServiceError> {
    let user_id: UserId = parse_id("user_id", &req.user_id)?;
    let items = req
        .items
        .iter()
        .map(|item| {
            Ok(RequestedItem {
                product_id: parse_id::<ProductId>("product_id", &item.product_id)?,
                quantity: item.quantity,
            })
        })
        .collect::<Result<Vec<_>, ServiceError>>()?;

    let placed = state
        .orders
        .create_order(CreateOrderCommand { user_id, items })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(OrderCreatedResponse {
            order_id: placed.order_id.to_string(),
            saga_id: placed.saga_id,
            status: domain::OrderStatus::Created.to_string(),
        }),
    ))
}

/// GET /orders/{id}: load an order by id.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store, N: Notifier>(
    State(state): State<Arc<AppState<S, N>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ServiceError> {
    let order_id: OrderId = parse_id("order_id", &id)?;
    let order = state
        .orders
        .get_order(order_id)
        .await?
        .ok_or(DomainError::OrderNotFound(order_id))?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/{id}/saga: progress of the order's saga.
#[tracing::instrument(skip(state))]
pub async fn saga_status<S: Store, N: Notifier>(
    State(state): State<Arc<AppState<S, N>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ServiceError> {
    let order_id: OrderId = parse_id("order_id", &id)?;
    let saga = state
        .orders
        .get_saga(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("saga for order {order_id}")))?;
    Ok(Json(SagaStatusResponse::from(&saga)))
}

/// POST /orders/{id}/saga/compensations: retry compensations left pending.
#[tracing::instrument(skip(state))]
pub async fn retry_compensations<S: Store, N: Notifier>(
    State(state): State<Arc<AppState<S, N>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ServiceError> {
    let order_id: OrderId = parse_id("order_id", &id)?;
    let saga = state
        .orders
        .saga()
        .retry_pending_compensations(&saga::order_fulfillment::saga_id(order_id))
        .await?;
    Ok(Json(SagaStatusResponse::from(&saga)))
}

pub(crate) fn parse_id<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> Result<T, ServiceError> {
    value
        .parse()
        .map_err(|_| DomainError::invalid_id(field, value).into())
}
