//! Storage seam for billing records
//!
//! Every mutating method is one transactional unit: either all of its effects
//! are persisted or none are. Lookups that find nothing return `Ok(None)`;
//! callers decide whether that is an error.

use async_trait::async_trait;
use paymount_shared::{CheckoutMode, SubscriptionStatus};
use time::OffsetDateTime;

use crate::config::PaymentReplayPolicy;
use crate::error::BillingResult;
use crate::models::{CustomerLink, PaymentRecord, SubscriptionRecord};

/// Customer link about to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomerLink {
    pub user_id: i64,
    pub email: String,
    pub processor_customer_id: String,
}

/// Result of an insert-if-absent on `user_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerInsert {
    pub link: CustomerLink,
    /// false when another writer already owned the `user_id`
    pub created: bool,
}

/// Facts carried by a `checkout.session.completed` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutCompletion {
    pub processor_customer_id: String,
    pub processor_session_id: Option<String>,
    pub processor_payment_intent_id: Option<String>,
    pub mode: CheckoutMode,
    pub processor_subscription_id: Option<String>,
    pub processor_price_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// What recording a checkout completion changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutRecorded {
    /// No customer link for the processor customer; nothing written
    UnknownCustomer,
    Recorded {
        customer_id: i64,
        /// Newly inserted subscription, if any
        subscription: Option<SubscriptionRecord>,
        /// None when the replay policy skipped the insert
        payment: Option<PaymentRecord>,
    },
}

/// Field overwrite from a `customer.subscription.updated` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub processor_subscription_id: String,
    /// None leaves the status unchanged
    pub status: Option<SubscriptionStatus>,
    /// None leaves the period start unchanged
    pub current_period_start: Option<OffsetDateTime>,
    /// None leaves the period end unchanged
    pub current_period_end: Option<OffsetDateTime>,
    /// Always written; None clears it
    pub cancel_at: Option<OffsetDateTime>,
}

/// Persistence for customer links, subscriptions and payments.
#[async_trait]
pub trait BillingStore: Send + Sync {
    // Customer links

    async fn find_customer_by_user(&self, user_id: i64) -> BillingResult<Option<CustomerLink>>;

    async fn find_customer_by_processor_id(
        &self,
        processor_customer_id: &str,
    ) -> BillingResult<Option<CustomerLink>>;

    /// Atomically insert the link unless one already exists for `user_id`,
    /// returning whichever row owns the `user_id` afterwards.
    async fn insert_customer(&self, new: NewCustomerLink) -> BillingResult<CustomerInsert>;

    // Subscriptions

    async fn find_subscription(
        &self,
        processor_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>>;

    /// Any subscription of the customer whose status is in `statuses`
    async fn find_subscription_with_status(
        &self,
        customer_id: i64,
        statuses: &[SubscriptionStatus],
    ) -> BillingResult<Option<SubscriptionRecord>>;

    /// Apply an update; None when the subscription is unknown.
    /// A canceled subscription keeps its status.
    async fn update_subscription(
        &self,
        update: &SubscriptionUpdate,
    ) -> BillingResult<Option<SubscriptionRecord>>;

    /// None when the subscription is unknown; a canceled subscription is left as is
    async fn set_subscription_status(
        &self,
        processor_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> BillingResult<Option<SubscriptionRecord>>;

    // Payments

    /// Resolve the customer, insert the subscription if new, and insert the
    /// payment subject to `policy`, all in one transaction.
    async fn record_checkout(
        &self,
        completion: &CheckoutCompletion,
        policy: PaymentReplayPolicy,
    ) -> BillingResult<CheckoutRecorded>;

    /// Mark every payment with this intent refunded; returns the rows touched
    async fn mark_payment_refunded(
        &self,
        processor_payment_intent_id: &str,
    ) -> BillingResult<Vec<PaymentRecord>>;

    async fn payments_for_customer(&self, customer_id: i64) -> BillingResult<Vec<PaymentRecord>>;
}
