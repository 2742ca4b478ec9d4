//! Checkout sessions

use std::collections::HashMap;
use std::sync::Arc;

use paymount_shared::CheckoutMode;
use serde::Deserialize;

use crate::client::{CheckoutSessionRequest, PaymentProcessor, CHECKOUT_SESSION_ID_PLACEHOLDER};
use crate::config::BillingConfig;
use crate::customer::CustomerService;
use crate::error::{BillingError, BillingResult};

/// Input for [`CheckoutService::create_checkout`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub price_id: Option<String>,
    #[serde(default)]
    pub mode: CheckoutMode,
    pub metadata: Option<HashMap<String, String>>,
}

/// Checkout service for creating hosted checkout sessions
#[derive(Clone)]
pub struct CheckoutService {
    config: Arc<BillingConfig>,
    customers: CustomerService,
    processor: Arc<dyn PaymentProcessor>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl CheckoutService {
    pub fn new(
        config: Arc<BillingConfig>,
        customers: CustomerService,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        Self {
            config,
            customers,
            processor,
        }
    }

    /// Create a checkout session and return the URL to redirect the user to
    pub async fn create_checkout(&self, request: CheckoutRequest) -> BillingResult<String> {
        let email = present(&request.email);
        let price_id = present(&request.price_id);

        let (user_id, email, price_id) = match (request.user_id, email, price_id) {
            (Some(user_id), Some(email), Some(price_id)) => (user_id, email, price_id),
            _ => {
                let mut missing = Vec::new();
                if request.user_id.is_none() {
                    missing.push("user_id");
                }
                if email.is_none() {
                    missing.push("email");
                }
                if price_id.is_none() {
                    missing.push("price_id");
                }
                return Err(BillingError::Validation(format!(
                    "required fields missing: {}",
                    missing.join(", ")
                )));
            }
        };

        let customer = if self.config.pay.auto_create_customer {
            self.customers.get_or_create_customer(user_id, email).await?
        } else {
            self.customers
                .get_customer(user_id)
                .await?
                .ok_or_else(|| BillingError::CustomerNotFound(user_id.to_string()))?
        };

        let mut metadata = request.metadata.unwrap_or_default();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("price_id".to_string(), price_id.to_string());

        let session = CheckoutSessionRequest {
            user_id,
            processor_customer_id: customer.processor_customer_id,
            price_id: price_id.to_string(),
            mode: request.mode,
            success_url: format!(
                "{}?session_id={}",
                self.config.url_for(&self.config.pay.success_path),
                CHECKOUT_SESSION_ID_PLACEHOLDER
            ),
            cancel_url: self.config.url_for(&self.config.pay.cancel_path),
            metadata,
        };

        self.processor.create_checkout_session(&session).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::client::DevProcessor;
    use crate::memory_store::MemoryBillingStore;
    use crate::store::BillingStore;

    fn request(user_id: Option<i64>, email: Option<&str>, price_id: Option<&str>) -> CheckoutRequest {
        CheckoutRequest {
            user_id,
            email: email.map(str::to_string),
            price_id: price_id.map(str::to_string),
            ..Default::default()
        }
    }

    fn service_with(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        processor: Arc<dyn PaymentProcessor>,
    ) -> CheckoutService {
        let config = Arc::new(config);
        let customers = CustomerService::new(config.clone(), store, processor.clone());
        CheckoutService::new(config, customers, processor)
    }

    fn dev_service() -> CheckoutService {
        service_with(
            BillingConfig::dev("http://localhost:8000"),
            Arc::new(MemoryBillingStore::new()),
            Arc::new(DevProcessor::new("http://localhost:8000")),
        )
    }

    #[tokio::test]
    async fn test_missing_fields_are_named() {
        let err = dev_service()
            .create_checkout(request(Some(1), None, Some("")))
            .await
            .unwrap_err();

        match err {
            BillingError::Validation(msg) => {
                assert!(msg.contains("required"));
                assert!(msg.contains("email"));
                assert!(msg.contains("price_id"));
                assert!(!msg.contains("user_id"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dev_checkout_returns_success_url() {
        let url = dev_service()
            .create_checkout(request(Some(42), Some("a@example.com"), Some("price_basic")))
            .await
            .unwrap();

        assert_eq!(url, "http://localhost:8000/pay/success?session_id=cs_dev_42");
    }

    #[tokio::test]
    async fn test_unknown_customer_without_auto_create() {
        let mut config = BillingConfig::dev("http://localhost:8000");
        config.pay.auto_create_customer = false;
        let service = service_with(
            config,
            Arc::new(MemoryBillingStore::new()),
            Arc::new(DevProcessor::new("http://localhost:8000")),
        );

        let err = service
            .create_checkout(request(Some(7), Some("a@example.com"), Some("price_basic")))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::CustomerNotFound(_)));
    }

    /// Processor that records the checkout request it was given
    #[derive(Default)]
    struct RecordingProcessor {
        last: Mutex<Option<CheckoutSessionRequest>>,
    }

    #[async_trait]
    impl PaymentProcessor for RecordingProcessor {
        async fn create_customer(&self, user_id: i64, _email: &str) -> BillingResult<String> {
            Ok(format!("cus_{user_id}"))
        }

        async fn delete_customer(&self, _id: &str) -> BillingResult<()> {
            Ok(())
        }

        async fn create_checkout_session(
            &self,
            request: &CheckoutSessionRequest,
        ) -> BillingResult<String> {
            *self.last.lock().unwrap() = Some(request.clone());
            Ok("https://checkout.stripe.com/c/pay/cs_test_1".to_string())
        }

        async fn create_portal_session(&self, _id: &str, _return_url: &str) -> BillingResult<String> {
            Ok("https://billing.stripe.com/p/session/test".to_string())
        }
    }

    #[tokio::test]
    async fn test_live_checkout_builds_session_request() {
        let processor = Arc::new(RecordingProcessor::default());
        let service = service_with(
            BillingConfig::live("sk_test_x", "https://shop.example.com"),
            Arc::new(MemoryBillingStore::new()),
            processor.clone(),
        );

        let mut metadata = HashMap::new();
        metadata.insert("campaign".to_string(), "spring".to_string());
        metadata.insert("user_id".to_string(), "spoofed".to_string());

        let url = service
            .create_checkout(CheckoutRequest {
                user_id: Some(5),
                email: Some("a@example.com".to_string()),
                price_id: Some("price_pro".to_string()),
                mode: CheckoutMode::Payment,
                metadata: Some(metadata),
            })
            .await
            .unwrap();
        assert_eq!(url, "https://checkout.stripe.com/c/pay/cs_test_1");

        let sent = processor.last.lock().unwrap().clone().unwrap();
        assert_eq!(sent.processor_customer_id, "cus_5");
        assert_eq!(sent.mode, CheckoutMode::Payment);
        assert_eq!(
            sent.success_url,
            "https://shop.example.com/pay/success?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(sent.cancel_url, "https://shop.example.com/pay/cancel");
        assert_eq!(sent.metadata["user_id"], "5");
        assert_eq!(sent.metadata["price_id"], "price_pro");
        assert_eq!(sent.metadata["campaign"], "spring");
    }
}
