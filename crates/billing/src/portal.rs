//! Self-service billing portal

use std::sync::Arc;

use crate::client::PaymentProcessor;
use crate::config::BillingConfig;
use crate::customer::CustomerService;
use crate::error::BillingResult;

/// Portal service for processor billing portal sessions
#[derive(Clone)]
pub struct PortalService {
    config: Arc<BillingConfig>,
    customers: CustomerService,
    processor: Arc<dyn PaymentProcessor>,
}

impl PortalService {
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

    /// Create a portal session for the user's customer.
    ///
    /// Returns `None` when the user has no customer link; the portal never
    /// creates one.
    pub async fn create_portal(
        &self,
        user_id: i64,
        return_url: Option<&str>,
    ) -> BillingResult<Option<String>> {
        let Some(customer) = self.customers.get_customer(user_id).await? else {
            tracing::info!(user_id = %user_id, "Portal requested for unknown customer");
            return Ok(None);
        };

        let return_url = return_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| self.config.app_url());

        let url = self
            .processor
            .create_portal_session(&customer.processor_customer_id, return_url)
            .await?;

        Ok(Some(url))
    }
}
