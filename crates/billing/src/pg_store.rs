//! PostgreSQL implementation of [`BillingStore`]
//!
//! Expects the tables from `migrations/` to exist. The pool is supplied by the
//! host; each mutating call runs in its own transaction, which rolls back if
//! dropped before commit.

use async_trait::async_trait;
use paymount_shared::{CheckoutMode, PaymentStatus, SubscriptionStatus};
use sqlx::PgPool;

use crate::config::PaymentReplayPolicy;
use crate::error::{BillingError, BillingResult};
use crate::models::{CustomerLink, PaymentRecord, SubscriptionRecord};
use crate::store::{
    BillingStore, CheckoutCompletion, CheckoutRecorded, CustomerInsert, NewCustomerLink,
    SubscriptionUpdate,
};

const CUSTOMER_COLUMNS: &str = "id, user_id, email, processor_customer_id, created_at";

const SUBSCRIPTION_COLUMNS: &str = "id, customer_id, processor_subscription_id, \
    processor_price_id, status, current_period_start, current_period_end, cancel_at, \
    created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, customer_id, processor_session_id, \
    processor_payment_intent_id, amount_cents, currency, status, mode, created_at";

/// Billing store backed by the host's Postgres pool
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn find_customer_by_user(&self, user_id: i64) -> BillingResult<Option<CustomerLink>> {
        let customer = sqlx::query_as::<_, CustomerLink>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM billing_customers WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    async fn find_customer_by_processor_id(
        &self,
        processor_customer_id: &str,
    ) -> BillingResult<Option<CustomerLink>> {
        let customer = sqlx::query_as::<_, CustomerLink>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM billing_customers WHERE processor_customer_id = $1"
        ))
        .bind(processor_customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    async fn insert_customer(&self, new: NewCustomerLink) -> BillingResult<CustomerInsert> {
        // Untargeted: concurrent dev-mode calls share one processor id and
        // must clash quietly on either unique index.
        let inserted = sqlx::query_as::<_, CustomerLink>(&format!(
            r#"
            INSERT INTO billing_customers (user_id, email, processor_customer_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            RETURNING {CUSTOMER_COLUMNS}
            "#
        ))
        .bind(new.user_id)
        .bind(&new.email)
        .bind(&new.processor_customer_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(link) = inserted {
            return Ok(CustomerInsert {
                link,
                created: true,
            });
        }

        // No row for this user: the processor id belongs to someone else
        let existing = self.find_customer_by_user(new.user_id).await?.ok_or_else(|| {
            BillingError::Conflict(format!(
                "processor customer {} is linked to another user",
                new.processor_customer_id
            ))
        })?;

        Ok(CustomerInsert {
            link: existing,
            created: false,
        })
    }

    async fn find_subscription(
        &self,
        processor_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let subscription = sqlx::query_as::<_, SubscriptionRecord>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM billing_subscriptions \
             WHERE processor_subscription_id = $1"
        ))
        .bind(processor_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn find_subscription_with_status(
        &self,
        customer_id: i64,
        statuses: &[SubscriptionStatus],
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let subscription = sqlx::query_as::<_, SubscriptionRecord>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM billing_subscriptions
            WHERE customer_id = $1 AND status = ANY($2)
            ORDER BY updated_at DESC
            LIMIT 1
            "#
        ))
        .bind(customer_id)
        .bind(&statuses)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn update_subscription(
        &self,
        update: &SubscriptionUpdate,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let subscription = sqlx::query_as::<_, SubscriptionRecord>(&format!(
            r#"
            UPDATE billing_subscriptions SET
                status = CASE WHEN status = 'canceled' THEN status ELSE COALESCE($2, status) END,
                current_period_start = COALESCE($3, current_period_start),
                current_period_end = COALESCE($4, current_period_end),
                cancel_at = $5,
                updated_at = NOW()
            WHERE processor_subscription_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(&update.processor_subscription_id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.current_period_start)
        .bind(update.current_period_end)
        .bind(update.cancel_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn set_subscription_status(
        &self,
        processor_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let subscription = sqlx::query_as::<_, SubscriptionRecord>(&format!(
            r#"
            UPDATE billing_subscriptions SET
                status = CASE WHEN status = 'canceled' THEN status ELSE $2 END,
                updated_at = CASE WHEN status = 'canceled' THEN updated_at ELSE NOW() END
            WHERE processor_subscription_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(processor_subscription_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn record_checkout(
        &self,
        completion: &CheckoutCompletion,
        policy: PaymentReplayPolicy,
    ) -> BillingResult<CheckoutRecorded> {
        let mut tx = self.pool.begin().await?;

        let customer = sqlx::query_as::<_, CustomerLink>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM billing_customers WHERE processor_customer_id = $1"
        ))
        .bind(&completion.processor_customer_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(customer) = customer else {
            return Ok(CheckoutRecorded::UnknownCustomer);
        };

        let mut subscription = None;
        if completion.mode == CheckoutMode::Subscription {
            if let Some(sub_id) = &completion.processor_subscription_id {
                // The unique index is the existence guard
                subscription = sqlx::query_as::<_, SubscriptionRecord>(&format!(
                    r#"
                    INSERT INTO billing_subscriptions
                        (customer_id, processor_subscription_id, processor_price_id, status)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (processor_subscription_id) DO NOTHING
                    RETURNING {SUBSCRIPTION_COLUMNS}
                    "#
                ))
                .bind(customer.id)
                .bind(sub_id)
                .bind(&completion.processor_price_id)
                .bind(SubscriptionStatus::Active.as_str())
                .fetch_optional(&mut *tx)
                .await?;
            }
        }

        let dedupe_session = match (policy, &completion.processor_session_id) {
            (PaymentReplayPolicy::DedupeBySession, Some(session_id)) => Some(session_id),
            _ => None,
        };

        let payment = match dedupe_session {
            Some(session_id) => {
                // Serialize concurrent deliveries of the same session
                sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::BIGINT)")
                    .bind(session_id)
                    .execute(&mut *tx)
                    .await?;

                sqlx::query_as::<_, PaymentRecord>(&format!(
                    r#"
                    INSERT INTO billing_payments
                        (customer_id, processor_session_id, processor_payment_intent_id,
                         amount_cents, currency, status, mode)
                    SELECT $1::BIGINT, $2::TEXT, $3::TEXT, $4::BIGINT, $5::TEXT, $6::TEXT, $7::TEXT
                    WHERE NOT EXISTS (
                        SELECT 1 FROM billing_payments WHERE processor_session_id = $2::TEXT
                    )
                    RETURNING {PAYMENT_COLUMNS}
                    "#
                ))
                .bind(customer.id)
                .bind(&completion.processor_session_id)
                .bind(&completion.processor_payment_intent_id)
                .bind(completion.amount_cents)
                .bind(&completion.currency)
                .bind(PaymentStatus::Completed.as_str())
                .bind(completion.mode.as_str())
                .fetch_optional(&mut *tx)
                .await?
            }
            None => Some(
                sqlx::query_as::<_, PaymentRecord>(&format!(
                    r#"
                    INSERT INTO billing_payments
                        (customer_id, processor_session_id, processor_payment_intent_id,
                         amount_cents, currency, status, mode)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    RETURNING {PAYMENT_COLUMNS}
                    "#
                ))
                .bind(customer.id)
                .bind(&completion.processor_session_id)
                .bind(&completion.processor_payment_intent_id)
                .bind(completion.amount_cents)
                .bind(&completion.currency)
                .bind(PaymentStatus::Completed.as_str())
                .bind(completion.mode.as_str())
                .fetch_one(&mut *tx)
                .await?,
            ),
        };

        tx.commit().await?;

        Ok(CheckoutRecorded::Recorded {
            customer_id: customer.id,
            subscription,
            payment,
        })
    }

    async fn mark_payment_refunded(
        &self,
        processor_payment_intent_id: &str,
    ) -> BillingResult<Vec<PaymentRecord>> {
        let payments = sqlx::query_as::<_, PaymentRecord>(&format!(
            r#"
            UPDATE billing_payments SET status = $2
            WHERE processor_payment_intent_id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(processor_payment_intent_id)
        .bind(PaymentStatus::Refunded.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    async fn payments_for_customer(&self, customer_id: i64) -> BillingResult<Vec<PaymentRecord>> {
        let payments = sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM billing_payments WHERE customer_id = $1 ORDER BY id"
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }
}
