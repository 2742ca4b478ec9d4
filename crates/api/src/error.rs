//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use paymount_billing::BillingError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Validation errors
    #[error("{0}")]
    Validation(String),
    #[error("Invalid webhook signature")]
    InvalidSignature,
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    // Resource errors
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),

    // Billing errors
    #[error("Subscription required")]
    SubscriptionRequired,

    // Internal errors
    #[error("webhook not configured")]
    WebhookNotConfigured,
    #[error("processing failed")]
    ProcessingFailed,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) | ApiError::InvalidSignature | ApiError::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::SubscriptionRequired => StatusCode::FORBIDDEN,
            ApiError::WebhookNotConfigured | ApiError::ProcessingFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({ "error": self.to_string() }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(msg) => ApiError::Validation(msg),
            BillingError::InvalidPayload(msg) => ApiError::InvalidPayload(msg),
            BillingError::WebhookSignatureInvalid => ApiError::InvalidSignature,
            BillingError::CustomerNotFound(user) => {
                ApiError::NotFound(format!("Customer not found for user {}", user))
            }
            BillingError::Conflict(msg) => ApiError::Conflict(msg),
            BillingError::PaymentRequired => ApiError::SubscriptionRequired,
            BillingError::Config(msg) => {
                tracing::error!(error = %msg, "Billing misconfigured");
                ApiError::WebhookNotConfigured
            }
            err @ (BillingError::StripeApi(_)
            | BillingError::Database(_)
            | BillingError::Internal(_)) => {
                tracing::error!(error = %err, "Billing operation failed");
                ApiError::ProcessingFailed
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
