//! Service error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ErrorClass;
use domain::DomainError;
use saga::SagaError;
use store::StoreError;
use thiserror::Error;

/// Errors returned by the application services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Saga(#[from] SagaError),

    /// The request itself is malformed.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl ServiceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::Domain(e) => e.class(),
            ServiceError::Store(e) => e.class(),
            ServiceError::Saga(e) => e.class(),
            ServiceError::BadRequest(_) | ServiceError::NotFound(_) => ErrorClass::Validation,
            ServiceError::AlreadyExists(_) => ErrorClass::Conflict,
        }
    }

    fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServiceError::NotFound(_)
                | ServiceError::Domain(
                    DomainError::UserNotFound(_)
                        | DomainError::ProductNotFound(_)
                        | DomainError::OrderNotFound(_)
                        | DomainError::AccountNotFound(_)
                )
                | ServiceError::Saga(SagaError::NotFound(_))
        )
    }

    pub fn status_code(&self) -> StatusCode {
        if self.is_not_found() {
            return StatusCode::NOT_FOUND;
        }
        match self.class() {
            ErrorClass::Validation => StatusCode::BAD_REQUEST,
            ErrorClass::Conflict => StatusCode::CONFLICT,
            ErrorClass::Transient | ErrorClass::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string(), "class": self.class() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::UserId;
    use domain::{AccountError, Money};

    #[test]
    fn test_status_codes_follow_error_class() {
        let missing = ServiceError::from(DomainError::UserNotFound(UserId::new()));
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let funds = ServiceError::from(DomainError::from(AccountError::InsufficientFunds {
            balance: Money::new(50),
            requested: Money::new(100),
        }));
        assert_eq!(funds.status_code(), StatusCode::CONFLICT);

        let bad = ServiceError::BadRequest("no items".to_string());
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);

        let timeout = ServiceError::from(StoreError::LockTimeout {
            name: "order_1".to_string(),
        });
        assert_eq!(timeout.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
