//! Subscription access gate

use std::sync::Arc;

use paymount_shared::SubscriptionStatus;
use serde::Serialize;
use time::OffsetDateTime;

use crate::client::DevProcessor;
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::models::SubscriptionRecord;
use crate::store::BillingStore;

/// Price id carried by synthetic dev-mode subscriptions
pub const DEV_PRICE_ID: &str = "price_dev";

/// A request that passed the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantedAccess {
    pub user_id: i64,
    pub subscription: SubscriptionRecord,
    /// true when the subscription was fabricated in dev mode
    pub synthetic: bool,
}

/// Decides whether a user holds a qualifying subscription. Read-only.
#[derive(Clone)]
pub struct AccessGate {
    config: Arc<BillingConfig>,
    store: Arc<dyn BillingStore>,
}

impl AccessGate {
    pub fn new(config: Arc<BillingConfig>, store: Arc<dyn BillingStore>) -> Self {
        Self { config, store }
    }

    /// Grant or deny access for an already-resolved user id
    pub async fn authorize(&self, user_id: Option<i64>) -> BillingResult<GrantedAccess> {
        let Some(user_id) = user_id else {
            tracing::debug!("Access denied: no user id");
            return Err(BillingError::PaymentRequired);
        };

        if self.config.is_dev_mode() {
            return Ok(GrantedAccess {
                user_id,
                subscription: dev_subscription(user_id),
                synthetic: true,
            });
        }

        let Some(customer) = self.store.find_customer_by_user(user_id).await? else {
            tracing::info!(user_id = %user_id, "Access denied: no customer");
            return Err(BillingError::PaymentRequired);
        };

        let subscription = self
            .store
            .find_subscription_with_status(customer.id, &self.config.pay.allowed_statuses)
            .await?;

        match subscription {
            Some(subscription) => Ok(GrantedAccess {
                user_id,
                subscription,
                synthetic: false,
            }),
            None => {
                tracing::info!(user_id = %user_id, "Access denied: no qualifying subscription");
                Err(BillingError::PaymentRequired)
            }
        }
    }
}

fn dev_subscription(user_id: i64) -> SubscriptionRecord {
    let now = OffsetDateTime::now_utc();
    SubscriptionRecord {
        id: 0,
        customer_id: 0,
        processor_subscription_id: DevProcessor::subscription_id_for(user_id),
        processor_price_id: DEV_PRICE_ID.to_string(),
        status: SubscriptionStatus::Active,
        current_period_start: Some(now),
        current_period_end: None,
        cancel_at: None,
        created_at: now,
        updated_at: now,
    }
}
