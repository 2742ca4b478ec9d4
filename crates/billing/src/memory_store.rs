//! In-memory implementation of [`BillingStore`]
//!
//! Intended for tests and local development. A single mutex guards all
//! three tables, so every call is trivially atomic.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use paymount_shared::{CheckoutMode, PaymentStatus, SubscriptionStatus};
use time::OffsetDateTime;

use crate::config::PaymentReplayPolicy;
use crate::error::{BillingError, BillingResult};
use crate::models::{CustomerLink, PaymentRecord, SubscriptionRecord};
use crate::store::{
    BillingStore, CheckoutCompletion, CheckoutRecorded, CustomerInsert, NewCustomerLink,
    SubscriptionUpdate,
};

#[derive(Default)]
struct Tables {
    customers: Vec<CustomerLink>,
    subscriptions: Vec<SubscriptionRecord>,
    payments: Vec<PaymentRecord>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Billing store that keeps everything in process memory
#[derive(Default)]
pub struct MemoryBillingStore {
    tables: Mutex<Tables>,
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> BillingResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| BillingError::Internal("billing store lock poisoned".to_string()))
    }

    /// Number of stored customers, subscriptions and payments
    pub fn counts(&self) -> BillingResult<(usize, usize, usize)> {
        let tables = self.lock()?;
        Ok((
            tables.customers.len(),
            tables.subscriptions.len(),
            tables.payments.len(),
        ))
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn find_customer_by_user(&self, user_id: i64) -> BillingResult<Option<CustomerLink>> {
        let tables = self.lock()?;
        Ok(tables
            .customers
            .iter()
            .find(|c| c.user_id == user_id)
            .cloned())
    }

    async fn find_customer_by_processor_id(
        &self,
        processor_customer_id: &str,
    ) -> BillingResult<Option<CustomerLink>> {
        let tables = self.lock()?;
        Ok(tables
            .customers
            .iter()
            .find(|c| c.processor_customer_id == processor_customer_id)
            .cloned())
    }

    async fn insert_customer(&self, new: NewCustomerLink) -> BillingResult<CustomerInsert> {
        let mut tables = self.lock()?;

        if let Some(existing) = tables.customers.iter().find(|c| c.user_id == new.user_id) {
            return Ok(CustomerInsert {
                link: existing.clone(),
                created: false,
            });
        }

        if tables
            .customers
            .iter()
            .any(|c| c.processor_customer_id == new.processor_customer_id)
        {
            return Err(BillingError::Conflict(format!(
                "processor customer {} is linked to another user",
                new.processor_customer_id
            )));
        }

        let link = CustomerLink {
            id: tables.next_id(),
            user_id: new.user_id,
            email: new.email,
            processor_customer_id: new.processor_customer_id,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.customers.push(link.clone());

        Ok(CustomerInsert {
            link,
            created: true,
        })
    }

    async fn find_subscription(
        &self,
        processor_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let tables = self.lock()?;
        Ok(tables
            .subscriptions
            .iter()
            .find(|s| s.processor_subscription_id == processor_subscription_id)
            .cloned())
    }

    async fn find_subscription_with_status(
        &self,
        customer_id: i64,
        statuses: &[SubscriptionStatus],
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let tables = self.lock()?;
        Ok(tables
            .subscriptions
            .iter()
            .filter(|s| s.customer_id == customer_id && statuses.contains(&s.status))
            .max_by_key(|s| s.updated_at)
            .cloned())
    }

    async fn update_subscription(
        &self,
        update: &SubscriptionUpdate,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let mut tables = self.lock()?;
        let Some(sub) = tables
            .subscriptions
            .iter_mut()
            .find(|s| s.processor_subscription_id == update.processor_subscription_id)
        else {
            return Ok(None);
        };

        if let Some(status) = update.status {
            if !sub.status.is_terminal() {
                sub.status = status;
            }
        }
        if let Some(start) = update.current_period_start {
            sub.current_period_start = Some(start);
        }
        if let Some(end) = update.current_period_end {
            sub.current_period_end = Some(end);
        }
        sub.cancel_at = update.cancel_at;
        sub.updated_at = OffsetDateTime::now_utc();

        Ok(Some(sub.clone()))
    }

    async fn set_subscription_status(
        &self,
        processor_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let mut tables = self.lock()?;
        let Some(sub) = tables
            .subscriptions
            .iter_mut()
            .find(|s| s.processor_subscription_id == processor_subscription_id)
        else {
            return Ok(None);
        };

        if !sub.status.is_terminal() {
            sub.status = status;
            sub.updated_at = OffsetDateTime::now_utc();
        }

        Ok(Some(sub.clone()))
    }

    async fn record_checkout(
        &self,
        completion: &CheckoutCompletion,
        policy: PaymentReplayPolicy,
    ) -> BillingResult<CheckoutRecorded> {
        let mut tables = self.lock()?;

        let Some(customer_id) = tables
            .customers
            .iter()
            .find(|c| c.processor_customer_id == completion.processor_customer_id)
            .map(|c| c.id)
        else {
            return Ok(CheckoutRecorded::UnknownCustomer);
        };

        let now = OffsetDateTime::now_utc();

        let mut subscription = None;
        if completion.mode == CheckoutMode::Subscription {
            if let Some(sub_id) = &completion.processor_subscription_id {
                let exists = tables
                    .subscriptions
                    .iter()
                    .any(|s| &s.processor_subscription_id == sub_id);
                if !exists {
                    let record = SubscriptionRecord {
                        id: tables.next_id(),
                        customer_id,
                        processor_subscription_id: sub_id.clone(),
                        processor_price_id: completion.processor_price_id.clone(),
                        status: SubscriptionStatus::Active,
                        current_period_start: None,
                        current_period_end: None,
                        cancel_at: None,
                        created_at: now,
                        updated_at: now,
                    };
                    tables.subscriptions.push(record.clone());
                    subscription = Some(record);
                }
            }
        }

        let duplicate = match (policy, &completion.processor_session_id) {
            (PaymentReplayPolicy::DedupeBySession, Some(session_id)) => tables
                .payments
                .iter()
                .any(|p| p.processor_session_id.as_ref() == Some(session_id)),
            _ => false,
        };

        let payment = if duplicate {
            None
        } else {
            let record = PaymentRecord {
                id: tables.next_id(),
                customer_id,
                processor_session_id: completion.processor_session_id.clone(),
                processor_payment_intent_id: completion.processor_payment_intent_id.clone(),
                amount_cents: completion.amount_cents,
                currency: completion.currency.clone(),
                status: PaymentStatus::Completed,
                mode: completion.mode,
                created_at: now,
            };
            tables.payments.push(record.clone());
            Some(record)
        };

        Ok(CheckoutRecorded::Recorded {
            customer_id,
            subscription,
            payment,
        })
    }

    async fn mark_payment_refunded(
        &self,
        processor_payment_intent_id: &str,
    ) -> BillingResult<Vec<PaymentRecord>> {
        let mut tables = self.lock()?;
        let mut touched = Vec::new();
        for payment in tables.payments.iter_mut().filter(|p| {
            p.processor_payment_intent_id.as_deref() == Some(processor_payment_intent_id)
        }) {
            payment.status = PaymentStatus::Refunded;
            touched.push(payment.clone());
        }
        Ok(touched)
    }

    async fn payments_for_customer(&self, customer_id: i64) -> BillingResult<Vec<PaymentRecord>> {
        let tables = self.lock()?;
        Ok(tables
            .payments
            .iter()
            .filter(|p| p.customer_id == customer_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_link(user_id: i64, processor_id: &str) -> NewCustomerLink {
        NewCustomerLink {
            user_id,
            email: format!("user{user_id}@example.com"),
            processor_customer_id: processor_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_customer_keeps_first_writer() {
        let store = MemoryBillingStore::new();
        let first = store.insert_customer(new_link(1, "cus_a")).await.unwrap();
        assert!(first.created);

        let second = store.insert_customer(new_link(1, "cus_b")).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.link.processor_customer_id, "cus_a");
        assert_eq!(store.counts().unwrap(), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_processor_id_clash_is_conflict() {
        let store = MemoryBillingStore::new();
        store.insert_customer(new_link(1, "cus_a")).await.unwrap();
        let err = store.insert_customer(new_link(2, "cus_a")).await.unwrap_err();
        assert!(matches!(err, BillingError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_refund_touches_all_rows_for_intent() {
        let store = MemoryBillingStore::new();
        store.insert_customer(new_link(1, "cus_a")).await.unwrap();
        let completion = CheckoutCompletion {
            processor_customer_id: "cus_a".to_string(),
            processor_session_id: Some("cs_1".to_string()),
            processor_payment_intent_id: Some("pi_1".to_string()),
            mode: CheckoutMode::Payment,
            processor_subscription_id: None,
            processor_price_id: "unknown".to_string(),
            amount_cents: 500,
            currency: "usd".to_string(),
        };
        for _ in 0..2 {
            store
                .record_checkout(&completion, PaymentReplayPolicy::RecordEveryDelivery)
                .await
                .unwrap();
        }

        let refunded = store.mark_payment_refunded("pi_1").await.unwrap();
        assert_eq!(refunded.len(), 2);
        assert!(refunded.iter().all(|p| p.status == PaymentStatus::Refunded));
        assert!(store.mark_payment_refunded("pi_other").await.unwrap().is_empty());
    }
}
