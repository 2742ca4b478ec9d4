//! Payment processor seam
//!
//! [`StripeProcessor`] talks to Stripe; [`DevProcessor`] produces deterministic
//! synthetic ids and URLs so the whole add-on runs without credentials.

use std::collections::HashMap;

use async_trait::async_trait;
use paymount_shared::CheckoutMode;
use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionMode, Client, CreateBillingPortalSession,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCustomer, Customer, CustomerId,
};

use crate::error::{BillingError, BillingResult};

/// Placeholder the processor replaces with the real checkout session id
pub const CHECKOUT_SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// Everything needed to open a hosted checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub user_id: i64,
    pub processor_customer_id: String,
    pub price_id: String,
    pub mode: CheckoutMode,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

/// Operations the billing core needs from a payment processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a processor customer; returns its id
    async fn create_customer(&self, user_id: i64, email: &str) -> BillingResult<String>;

    /// Best-effort removal of a customer created by a lost race
    async fn delete_customer(&self, processor_customer_id: &str) -> BillingResult<()>;

    /// Create a hosted checkout session; returns the redirect URL
    async fn create_checkout_session(&self, request: &CheckoutSessionRequest)
        -> BillingResult<String>;

    /// Create a self-service portal session; returns the redirect URL
    async fn create_portal_session(
        &self,
        processor_customer_id: &str,
        return_url: &str,
    ) -> BillingResult<String>;
}

fn parse_customer_id(id: &str) -> BillingResult<CustomerId> {
    id.parse::<CustomerId>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))
}

/// Live processor backed by the Stripe API
#[derive(Clone)]
pub struct StripeProcessor {
    client: Client,
}

impl StripeProcessor {
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: Client::new(secret_key),
        }
    }
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn create_customer(&self, user_id: i64, email: &str) -> BillingResult<String> {
        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());

        let params = CreateCustomer {
            email: Some(email),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(&self.client, params).await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer.id,
            "Created Stripe customer"
        );

        Ok(customer.id.to_string())
    }

    async fn delete_customer(&self, processor_customer_id: &str) -> BillingResult<()> {
        let customer_id = parse_customer_id(processor_customer_id)?;
        Customer::delete(&self.client, &customer_id).await?;

        tracing::info!(customer_id = %customer_id, "Deleted Stripe customer");
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<String> {
        let customer_id = parse_customer_id(&request.processor_customer_id)?;

        let mode = match request.mode {
            CheckoutMode::Payment => CheckoutSessionMode::Payment,
            CheckoutMode::Subscription => CheckoutSessionMode::Subscription,
        };

        let params = CreateCheckoutSession {
            customer: Some(customer_id),
            mode: Some(mode),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(request.price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            }]),
            success_url: Some(&request.success_url),
            cancel_url: Some(&request.cancel_url),
            metadata: Some(request.metadata.clone()),
            ..Default::default()
        };

        let session = CheckoutSession::create(&self.client, params).await?;

        tracing::info!(
            user_id = %request.user_id,
            session_id = %session.id,
            price_id = %request.price_id,
            mode = %request.mode,
            "Created checkout session"
        );

        session
            .url
            .ok_or_else(|| BillingError::StripeApi("Checkout session has no URL".to_string()))
    }

    async fn create_portal_session(
        &self,
        processor_customer_id: &str,
        return_url: &str,
    ) -> BillingResult<String> {
        let customer_id = parse_customer_id(processor_customer_id)?;

        let mut params = CreateBillingPortalSession::new(customer_id);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(&self.client, params).await?;

        tracing::info!(
            customer_id = %session.customer,
            "Created billing portal session"
        );

        Ok(session.url)
    }
}

/// Credential-free processor used in dev mode
#[derive(Debug, Clone)]
pub struct DevProcessor {
    app_url: String,
}

impl DevProcessor {
    pub fn new(app_url: impl Into<String>) -> Self {
        Self {
            app_url: app_url.into(),
        }
    }

    pub fn customer_id_for(user_id: i64) -> String {
        format!("cus_dev_{user_id}")
    }

    pub fn session_id_for(user_id: i64) -> String {
        format!("cs_dev_{user_id}")
    }

    pub fn subscription_id_for(user_id: i64) -> String {
        format!("sub_dev_{user_id}")
    }
}

#[async_trait]
impl PaymentProcessor for DevProcessor {
    async fn create_customer(&self, user_id: i64, _email: &str) -> BillingResult<String> {
        Ok(Self::customer_id_for(user_id))
    }

    async fn delete_customer(&self, _processor_customer_id: &str) -> BillingResult<()> {
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<String> {
        Ok(request.success_url.replace(
            CHECKOUT_SESSION_ID_PLACEHOLDER,
            &Self::session_id_for(request.user_id),
        ))
    }

    async fn create_portal_session(
        &self,
        processor_customer_id: &str,
        _return_url: &str,
    ) -> BillingResult<String> {
        Ok(format!(
            "{}/pay/portal-dev?customer={}",
            self.app_url, processor_customer_id
        ))
    }
}
