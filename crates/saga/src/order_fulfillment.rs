//! The create-order saga definition: parameters, step order and inputs.

use common::{OrderId, ProductId, UserId};
use domain::Money;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::activity::Activity;
use crate::state::SagaStep;

/// The saga type identifier stored in the saga log.
pub const SAGA_TYPE: &str = "create_order";

/// Saga id of the run that fulfills an order.
pub fn saga_id(order_id: OrderId) -> String {
    format!("order_{order_id}")
}

/// A line item as the product service sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Input the saga was started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderParams {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub items: Vec<SagaItem>,
    pub total_price: Money,
}

/// Input of ReserveProducts and ReleaseProducts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductsInput {
    pub items: Vec<SagaItem>,
}

/// Input of ProcessPayment and RefundPayment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInput {
    pub user_id: UserId,
    pub amount: Money,
}

/// Input of SendOrderCreatedNotification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationInput {
    pub user_id: UserId,
    pub order_id: OrderId,
}

/// The forward activity run at a step, if the step runs one.
pub fn activity_for(step: SagaStep) -> Option<Activity> {
    match step {
        SagaStep::ReserveProducts => Some(Activity::ReserveProducts),
        SagaStep::ProcessPayment => Some(Activity::ProcessPayment),
        SagaStep::SendNotification => Some(Activity::SendOrderCreatedNotification),
        SagaStep::Compensating | SagaStep::Done | SagaStep::Failed => None,
    }
}

/// The step reached once `activity` completes.
pub fn step_after(activity: Activity) -> Option<SagaStep> {
    match activity {
        Activity::ReserveProducts => Some(SagaStep::ProcessPayment),
        Activity::ProcessPayment => Some(SagaStep::SendNotification),
        Activity::SendOrderCreatedNotification => Some(SagaStep::Done),
        Activity::ReleaseProducts | Activity::RefundPayment => None,
    }
}

/// Builds the JSON input of an activity from the saga parameters.
pub fn input_for(activity: Activity, params: &CreateOrderParams) -> serde_json::Result<Value> {
    match activity {
        Activity::ReserveProducts | Activity::ReleaseProducts => {
            serde_json::to_value(ProductsInput {
                items: params.items.clone(),
            })
        }
        Activity::ProcessPayment | Activity::RefundPayment => serde_json::to_value(PaymentInput {
            user_id: params.user_id,
            amount: params.total_price,
        }),
        Activity::SendOrderCreatedNotification => serde_json::to_value(NotificationInput {
            user_id: params.user_id,
            order_id: params.order_id,
        }),
    }
}
