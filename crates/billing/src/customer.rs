//! Customer resolution
//!
//! Maps an internal user id to exactly one processor customer.

use std::sync::Arc;

use crate::client::PaymentProcessor;
use crate::config::BillingConfig;
use crate::error::BillingResult;
use crate::models::CustomerLink;
use crate::store::{BillingStore, NewCustomerLink};

/// Customer service for linking users to processor customers
#[derive(Clone)]
pub struct CustomerService {
    config: Arc<BillingConfig>,
    store: Arc<dyn BillingStore>,
    processor: Arc<dyn PaymentProcessor>,
}

impl CustomerService {
    pub fn new(
        config: Arc<BillingConfig>,
        store: Arc<dyn BillingStore>,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        Self {
            config,
            store,
            processor,
        }
    }

    /// Look up the customer link for a user
    pub async fn get_customer(&self, user_id: i64) -> BillingResult<Option<CustomerLink>> {
        self.store.find_customer_by_user(user_id).await
    }

    /// Return the user's customer link, creating the processor customer and
    /// the link on first use. An existing link is returned unchanged.
    pub async fn get_or_create_customer(
        &self,
        user_id: i64,
        email: &str,
    ) -> BillingResult<CustomerLink> {
        if let Some(existing) = self.store.find_customer_by_user(user_id).await? {
            return Ok(existing);
        }

        let processor_customer_id = self.processor.create_customer(user_id, email).await?;

        let insert = self
            .store
            .insert_customer(NewCustomerLink {
                user_id,
                email: email.to_string(),
                processor_customer_id: processor_customer_id.clone(),
            })
            .await?;

        if insert.created {
            tracing::info!(
                user_id = %user_id,
                customer_id = %insert.link.processor_customer_id,
                dev_mode = self.config.is_dev_mode(),
                "Linked processor customer"
            );
            return Ok(insert.link);
        }

        // A concurrent call linked the user first
        if insert.link.processor_customer_id != processor_customer_id {
            tracing::warn!(
                user_id = %user_id,
                kept_customer_id = %insert.link.processor_customer_id,
                orphan_customer_id = %processor_customer_id,
                "Lost customer creation race, discarding orphan"
            );

            if !self.config.is_dev_mode() {
                if let Err(e) = self.processor.delete_customer(&processor_customer_id).await {
                    tracing::warn!(
                        orphan_customer_id = %processor_customer_id,
                        error = %e,
                        "Failed to delete orphaned processor customer"
                    );
                }
            }
        }

        Ok(insert.link)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::client::{CheckoutSessionRequest, DevProcessor};
    use crate::error::BillingError;
    use crate::memory_store::MemoryBillingStore;

    fn dev_service(store: Arc<MemoryBillingStore>) -> CustomerService {
        let config = Arc::new(BillingConfig::dev("http://localhost:8000"));
        CustomerService::new(config, store, Arc::new(DevProcessor::new("http://localhost:8000")))
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let store = Arc::new(MemoryBillingStore::new());
        let service = dev_service(store.clone());

        let first = service.get_or_create_customer(42, "a@example.com").await.unwrap();
        let second = service.get_or_create_customer(42, "new@example.com").await.unwrap();

        assert_eq!(first.processor_customer_id, "cus_dev_42");
        assert_eq!(first, second);
        assert_eq!(second.email, "a@example.com");
        assert_eq!(store.counts().unwrap().0, 1);
    }

    #[tokio::test]
    async fn test_get_customer_is_read_only() {
        let store = Arc::new(MemoryBillingStore::new());
        let service = dev_service(store.clone());

        assert!(service.get_customer(1).await.unwrap().is_none());
        assert_eq!(store.counts().unwrap().0, 0);
    }

    /// Processor that hands out a fresh id per call and records deletions
    struct CountingProcessor {
        created: AtomicUsize,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PaymentProcessor for CountingProcessor {
        async fn create_customer(&self, _user_id: i64, _email: &str) -> BillingResult<String> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("cus_live_{n}"))
        }

        async fn delete_customer(&self, id: &str) -> BillingResult<()> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn create_checkout_session(
            &self,
            _request: &CheckoutSessionRequest,
        ) -> BillingResult<String> {
            Err(BillingError::Internal("unused".to_string()))
        }

        async fn create_portal_session(&self, _id: &str, _return_url: &str) -> BillingResult<String> {
            Err(BillingError::Internal("unused".to_string()))
        }
    }

    /// Store whose lookup misses, as if a concurrent writer linked the user
    /// between our read and our insert
    struct RacingStore {
        inner: MemoryBillingStore,
    }

    #[async_trait]
    impl BillingStore for RacingStore {
        async fn find_customer_by_user(&self, _user_id: i64) -> BillingResult<Option<CustomerLink>> {
            Ok(None)
        }
        async fn find_customer_by_processor_id(
            &self,
            id: &str,
        ) -> BillingResult<Option<CustomerLink>> {
            self.inner.find_customer_by_processor_id(id).await
        }
        async fn insert_customer(
            &self,
            new: NewCustomerLink,
        ) -> BillingResult<crate::store::CustomerInsert> {
            self.inner.insert_customer(new).await
        }
        async fn find_subscription(
            &self,
            id: &str,
        ) -> BillingResult<Option<crate::models::SubscriptionRecord>> {
            self.inner.find_subscription(id).await
        }
        async fn find_subscription_with_status(
            &self,
            customer_id: i64,
            statuses: &[paymount_shared::SubscriptionStatus],
        ) -> BillingResult<Option<crate::models::SubscriptionRecord>> {
            self.inner.find_subscription_with_status(customer_id, statuses).await
        }
        async fn update_subscription(
            &self,
            update: &crate::store::SubscriptionUpdate,
        ) -> BillingResult<Option<crate::models::SubscriptionRecord>> {
            self.inner.update_subscription(update).await
        }
        async fn set_subscription_status(
            &self,
            id: &str,
            status: paymount_shared::SubscriptionStatus,
        ) -> BillingResult<Option<crate::models::SubscriptionRecord>> {
            self.inner.set_subscription_status(id, status).await
        }
        async fn record_checkout(
            &self,
            completion: &crate::store::CheckoutCompletion,
            policy: crate::config::PaymentReplayPolicy,
        ) -> BillingResult<crate::store::CheckoutRecorded> {
            self.inner.record_checkout(completion, policy).await
        }
        async fn mark_payment_refunded(
            &self,
            intent: &str,
        ) -> BillingResult<Vec<crate::models::PaymentRecord>> {
            self.inner.mark_payment_refunded(intent).await
        }
        async fn payments_for_customer(
            &self,
            customer_id: i64,
        ) -> BillingResult<Vec<crate::models::PaymentRecord>> {
            self.inner.payments_for_customer(customer_id).await
        }
    }

    async fn racing_store() -> Arc<RacingStore> {
        let inner = MemoryBillingStore::new();
        inner
            .insert_customer(NewCustomerLink {
                user_id: 9,
                email: "winner@example.com".to_string(),
                processor_customer_id: "cus_winner".to_string(),
            })
            .await
            .unwrap();
        Arc::new(RacingStore { inner })
    }

    fn counting_processor() -> Arc<CountingProcessor> {
        Arc::new(CountingProcessor {
            created: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_lost_race_returns_winner_and_deletes_orphan() {
        let processor = counting_processor();
        let config = Arc::new(BillingConfig::live("sk_test_x", "http://localhost:8000"));
        let service = CustomerService::new(config, racing_store().await, processor.clone());

        let link = service.get_or_create_customer(9, "loser@example.com").await.unwrap();

        assert_eq!(link.processor_customer_id, "cus_winner");
        assert_eq!(link.email, "winner@example.com");
        assert_eq!(*processor.deleted.lock().unwrap(), vec!["cus_live_0".to_string()]);
    }

    #[tokio::test]
    async fn test_lost_race_in_dev_mode_skips_delete() {
        let processor = counting_processor();
        let config = Arc::new(BillingConfig::dev("http://localhost:8000"));
        let service = CustomerService::new(config, racing_store().await, processor.clone());

        let link = service.get_or_create_customer(9, "loser@example.com").await.unwrap();

        assert_eq!(link.processor_customer_id, "cus_winner");
        assert!(processor.deleted.lock().unwrap().is_empty());
    }
}
