//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Validation(String),

    #[error("Resource already exists: {0}")]
    Conflict(String),

    /// The access gate refused the request; no qualifying subscription.
    #[error("Subscription required")]
    PaymentRequired,
}

impl BillingError {
    /// Errors caused by the caller's input rather than by this service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::Validation(_)
                | BillingError::InvalidPayload(_)
                | BillingError::WebhookSignatureInvalid
                | BillingError::CustomerNotFound(_)
                | BillingError::PaymentRequired
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // PostgreSQL unique violation
            if db_err.code().as_deref() == Some("23505") {
                return BillingError::Conflict(db_err.message().to_string());
            }
        }
        BillingError::Database(err.to_string())
    }
}

impl From<paymount_shared::SharedError> for BillingError {
    fn from(err: paymount_shared::SharedError) -> Self {
        BillingError::Validation(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
