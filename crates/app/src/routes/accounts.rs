//! Account endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::UserId;
use domain::{Account, DomainError, Money};
use serde::{Deserialize, Serialize};
use store::Store;

use super::orders::parse_id;
use crate::AppState;
use crate::error::ServiceError;
use crate::notifier::Notifier;

#[derive(Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: String,
    pub balance: i64,
}

#[derive(Deserialize)]
pub struct UpdateBalanceRequest {
    pub balance: i64,
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub user_id: String,
    pub balance: i64,
    pub updated_at: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            user_id: account.user_id.to_string(),
            balance: account.balance.amount(),
            updated_at: account.updated_at.to_rfc3339(),
        }
    }
}

/// POST /accounts
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store, N: Notifier>(
    State(state): State<Arc<AppState<S, N>>>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ServiceError> {
    let user_id: UserId = parse_id("user_id", &req.user_id)?;
    let account = state
        .accounts
        .create_account(user_id, Money::new(req.balance))
        .await?;
    Ok((StatusCode::CREATED, Json(AccountResponse::from(&account))))
}

/// GET /accounts/{user_id}
#[tracing::instrument(skip(state))]
pub async fn get<S: Store, N: Notifier>(
    State(state): State<Arc<AppState<S, N>>>,
    Path(id): Path<String>,
) -> Result<Json<AccountResponse>, ServiceError> {
    let user_id: UserId = parse_id("user_id", &id)?;
    let account = state
        .accounts
        .get_account(user_id)
        .await?
        .ok_or(DomainError::AccountNotFound(user_id))?;
    Ok(Json(AccountResponse::from(&account)))
}

/// PUT /accounts/{user_id}/balance
#[tracing::instrument(skip(state, req))]
pub async fn update_balance<S: Store, N: Notifier>(
    State(state): State<Arc<AppState<S, N>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateBalanceRequest>,
) -> Result<Json<AccountResponse>, ServiceError> {
    let user_id: UserId = parse_id("user_id", &id)?;
    let account = state
        .accounts
        .update_balance(user_id, Money::new(req.balance))
        .await?;
    Ok(Json(AccountResponse::from(&account)))
}
