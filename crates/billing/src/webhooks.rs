//! Stripe webhook handling
//!
//! Verifies processor notifications and reconciles local billing records
//! with them. Deliveries may be replayed, reordered, or refer to rows that do
//! not exist locally; every handler tolerates all three. Lookups that miss
//! are logged no-ops, so the processor gets a 200 and stops retrying.

use std::str::FromStr;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use paymount_shared::{CheckoutMode, SubscriptionStatus};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{
    ChargeObject, CheckoutSessionObject, InvoiceObject, SubscriptionObject, WebhookEvent,
    WebhookEventKind,
};
use crate::store::{BillingStore, CheckoutCompletion, CheckoutRecorded, SubscriptionUpdate};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed delivery, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

const DEFAULT_CURRENCY: &str = "usd";
const UNKNOWN_PRICE: &str = "unknown";

/// What a delivery did to local state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Local records were changed
    Applied,
    /// A handled event type that changed nothing
    Ignored { reason: String },
    /// An event type this handler does not act on
    Unhandled { event_type: String },
}

impl WebhookOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }
}

/// Verify a `Stripe-Signature` header (`t=<ts>,v1=<hex>[,v1=<hex>...]`)
/// against the raw payload. `now` is the current unix time in seconds.
pub fn verify_signature(payload: &str, header: &str, secret: &str, now: i64) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if signatures.is_empty() {
        tracing::warn!("Missing v1 signature in signature header");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    if now.abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("Invalid webhook signing secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    let expected = mac.finalize().into_bytes();

    let matched = signatures
        .iter()
        .any(|candidate| bool::from(expected.as_slice().ct_eq(candidate.as_slice())));

    if matched {
        Ok(())
    } else {
        tracing::warn!("Webhook signature mismatch");
        Err(BillingError::WebhookSignatureInvalid)
    }
}

fn timestamp(field: &str, secs: Option<i64>) -> Option<OffsetDateTime> {
    let secs = secs?;
    match OffsetDateTime::from_unix_timestamp(secs) {
        Ok(ts) => Some(ts),
        Err(e) => {
            tracing::warn!(field = field, value = secs, error = %e, "Ignoring out-of-range timestamp");
            None
        }
    }
}

/// Webhook handler for processor events
#[derive(Clone)]
pub struct WebhookHandler {
    config: Arc<BillingConfig>,
    store: Arc<dyn BillingStore>,
}

impl WebhookHandler {
    pub fn new(config: Arc<BillingConfig>, store: Arc<dyn BillingStore>) -> Self {
        Self { config, store }
    }

    /// Verify and parse a webhook delivery.
    ///
    /// In dev mode the signature is not checked.
    pub fn verify_event(&self, payload: &str, signature: Option<&str>) -> BillingResult<WebhookEvent> {
        if !self.config.is_dev_mode() {
            let secret = self.config.webhook_signing_secret().ok_or_else(|| {
                tracing::error!("STRIPE_WEBHOOK_SECRET not configured; rejecting webhook");
                BillingError::Config("webhook signing secret not configured".to_string())
            })?;

            let signature = signature.ok_or_else(|| {
                tracing::warn!("Webhook delivered without a signature header");
                BillingError::WebhookSignatureInvalid
            })?;

            let now = OffsetDateTime::now_utc().unix_timestamp();
            verify_signature(payload, signature, secret, now)?;
        }

        WebhookEvent::from_json(payload)
    }

    /// Verify a delivery and apply it to local state
    pub async fn handle(
        &self,
        payload: &str,
        signature: Option<&str>,
    ) -> BillingResult<WebhookOutcome> {
        let event = self.verify_event(payload, signature)?;
        let kind = event.kind();

        tracing::info!(
            event_id = ?event.id,
            event_type = %kind,
            "Processing webhook event"
        );

        let result = match &kind {
            WebhookEventKind::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event.object()?).await
            }
            WebhookEventKind::SubscriptionUpdated => {
                self.handle_subscription_updated(event.object()?).await
            }
            WebhookEventKind::SubscriptionDeleted => {
                self.handle_subscription_deleted(event.object()?).await
            }
            WebhookEventKind::InvoicePaymentFailed => {
                self.handle_payment_failed(event.object()?).await
            }
            WebhookEventKind::ChargeRefunded => self.handle_charge_refunded(event.object()?).await,
            WebhookEventKind::Other(event_type) => {
                tracing::info!(event_type = %event_type, "Unhandled webhook event type");
                Ok(WebhookOutcome::Unhandled {
                    event_type: event_type.clone(),
                })
            }
        };

        match &result {
            Err(e) if e.is_client_error() => tracing::warn!(
                event_id = ?event.id,
                event_type = %kind,
                error = %e,
                "Rejected webhook event payload"
            ),
            Err(e) => tracing::error!(
                event_id = ?event.id,
                event_type = %kind,
                error = %e,
                "Failed to process webhook event"
            ),
            Ok(_) => {}
        }

        result
    }

    async fn handle_checkout_completed(
        &self,
        session: CheckoutSessionObject,
    ) -> BillingResult<WebhookOutcome> {
        let Some(customer_id) = session.customer_id() else {
            tracing::warn!(session_id = ?session.id, "Checkout session has no customer");
            return Ok(WebhookOutcome::ignored("checkout session has no customer"));
        };

        let mode = match session.mode.as_deref() {
            None => CheckoutMode::Payment,
            Some(raw) => CheckoutMode::from_str(raw).unwrap_or_else(|_| {
                tracing::warn!(session_id = ?session.id, mode = %raw, "Unknown checkout mode");
                CheckoutMode::Payment
            }),
        };

        let completion = CheckoutCompletion {
            processor_customer_id: customer_id.to_string(),
            processor_session_id: session.id.clone(),
            processor_payment_intent_id: session.payment_intent_id().map(str::to_string),
            mode,
            processor_subscription_id: session.subscription_id().map(str::to_string),
            processor_price_id: session
                .metadata_value("price_id")
                .unwrap_or(UNKNOWN_PRICE)
                .to_string(),
            amount_cents: session.amount_total.unwrap_or(0),
            currency: session
                .currency
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        };

        match self
            .store
            .record_checkout(&completion, self.config.pay.payment_replay)
            .await?
        {
            CheckoutRecorded::UnknownCustomer => {
                tracing::warn!(
                    customer_id = %customer_id,
                    session_id = ?session.id,
                    "Checkout completed for unknown customer"
                );
                Ok(WebhookOutcome::ignored("unknown customer"))
            }
            CheckoutRecorded::Recorded {
                customer_id: local_customer_id,
                subscription,
                payment,
            } => {
                if let Some(sub) = &subscription {
                    tracing::info!(
                        customer_id = local_customer_id,
                        subscription_id = %sub.processor_subscription_id,
                        price_id = %sub.processor_price_id,
                        "Subscription created from checkout"
                    );
                }
                match &payment {
                    Some(p) => tracing::info!(
                        customer_id = local_customer_id,
                        session_id = ?p.processor_session_id,
                        amount_cents = p.amount_cents,
                        currency = %p.currency,
                        "Payment recorded"
                    ),
                    None => tracing::info!(
                        customer_id = local_customer_id,
                        session_id = ?session.id,
                        "Payment already recorded for session, skipping"
                    ),
                }

                if subscription.is_none() && payment.is_none() {
                    Ok(WebhookOutcome::ignored("checkout already recorded"))
                } else {
                    Ok(WebhookOutcome::Applied)
                }
            }
        }
    }

    async fn handle_subscription_updated(
        &self,
        sub: SubscriptionObject,
    ) -> BillingResult<WebhookOutcome> {
        let Some(subscription_id) = sub.id.as_deref().filter(|id| !id.is_empty()) else {
            tracing::warn!("Subscription update without an id");
            return Ok(WebhookOutcome::ignored("subscription has no id"));
        };

        let status = match sub.status.as_deref() {
            None => None,
            Some(raw) => match SubscriptionStatus::from_str(raw) {
                Ok(status) => Some(status),
                Err(_) => {
                    tracing::warn!(
                        subscription_id = %subscription_id,
                        status = %raw,
                        "Unknown subscription status, leaving status unchanged"
                    );
                    None
                }
            },
        };

        let update = SubscriptionUpdate {
            processor_subscription_id: subscription_id.to_string(),
            status,
            current_period_start: timestamp("current_period_start", sub.current_period_start),
            current_period_end: timestamp("current_period_end", sub.current_period_end),
            cancel_at: timestamp("cancel_at", sub.cancel_at),
        };

        match self.store.update_subscription(&update).await? {
            Some(record)
                if record.status.is_terminal() && status.is_some_and(|s| s != record.status) =>
            {
                tracing::warn!(
                    subscription_id = %subscription_id,
                    requested = ?status,
                    "Status change for canceled subscription ignored"
                );
                Ok(WebhookOutcome::ignored("subscription already canceled"))
            }
            Some(record) => {
                tracing::info!(
                    subscription_id = %subscription_id,
                    status = %record.status,
                    "Subscription updated"
                );
                Ok(WebhookOutcome::Applied)
            }
            None => {
                tracing::warn!(
                    subscription_id = %subscription_id,
                    "Update for unknown subscription"
                );
                Ok(WebhookOutcome::ignored("unknown subscription"))
            }
        }
    }

    async fn handle_subscription_deleted(
        &self,
        sub: SubscriptionObject,
    ) -> BillingResult<WebhookOutcome> {
        let Some(subscription_id) = sub.id.as_deref().filter(|id| !id.is_empty()) else {
            tracing::warn!("Subscription deletion without an id");
            return Ok(WebhookOutcome::ignored("subscription has no id"));
        };

        self.set_status(subscription_id, SubscriptionStatus::Canceled)
            .await
    }

    async fn handle_payment_failed(&self, invoice: InvoiceObject) -> BillingResult<WebhookOutcome> {
        let Some(subscription_id) = invoice.subscription_id() else {
            tracing::warn!(invoice_id = ?invoice.id, "Payment failed for invoice without subscription");
            return Ok(WebhookOutcome::ignored("invoice has no subscription"));
        };

        self.set_status(subscription_id, SubscriptionStatus::PastDue)
            .await
    }

    async fn handle_charge_refunded(&self, charge: ChargeObject) -> BillingResult<WebhookOutcome> {
        let Some(payment_intent) = charge.payment_intent_id() else {
            tracing::info!(charge_id = ?charge.id, "Refunded charge has no payment intent");
            return Ok(WebhookOutcome::ignored("charge has no payment intent"));
        };

        let refunded = self.store.mark_payment_refunded(payment_intent).await?;
        if refunded.is_empty() {
            tracing::info!(
                payment_intent = %payment_intent,
                "No local payment for refunded charge"
            );
            return Ok(WebhookOutcome::ignored("unknown payment"));
        }

        tracing::info!(
            payment_intent = %payment_intent,
            payments = refunded.len(),
            "Payment marked refunded"
        );
        Ok(WebhookOutcome::Applied)
    }

    async fn set_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> BillingResult<WebhookOutcome> {
        match self
            .store
            .set_subscription_status(subscription_id, status)
            .await?
        {
            Some(record) if record.status != status => {
                tracing::warn!(
                    subscription_id = %subscription_id,
                    current = %record.status,
                    requested = %status,
                    "Status change for canceled subscription ignored"
                );
                Ok(WebhookOutcome::ignored("subscription already canceled"))
            }
            Some(_) => {
                tracing::info!(
                    subscription_id = %subscription_id,
                    status = %status,
                    "Subscription status changed"
                );
                Ok(WebhookOutcome::Applied)
            }
            None => {
                tracing::warn!(
                    subscription_id = %subscription_id,
                    status = %status,
                    "Status change for unknown subscription"
                );
                Ok(WebhookOutcome::ignored("unknown subscription"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use paymount_shared::PaymentStatus;
    use serde_json::json;

    use super::*;
    use crate::config::PaymentReplayPolicy;
    use crate::memory_store::MemoryBillingStore;
    use crate::store::NewCustomerLink;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &str, ts: i64, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{ts}.{payload}").as_bytes());
        format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    async fn dev_handler(policy: PaymentReplayPolicy) -> (WebhookHandler, Arc<MemoryBillingStore>) {
        let mut config = BillingConfig::dev("http://localhost:8000");
        config.pay.payment_replay = policy;
        let store = Arc::new(MemoryBillingStore::new());
        store
            .insert_customer(NewCustomerLink {
                user_id: 1,
                email: "a@example.com".to_string(),
                processor_customer_id: "cus_1".to_string(),
            })
            .await
            .unwrap();
        (WebhookHandler::new(Arc::new(config), store.clone()), store)
    }

    fn event(event_type: &str, object: serde_json::Value) -> String {
        json!({"id": "evt_1", "type": event_type, "data": {"object": object}}).to_string()
    }

    fn checkout_completed() -> String {
        event(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": "cus_1",
                "mode": "subscription",
                "subscription": "sub_1",
                "payment_intent": "pi_1",
                "amount_total": 2900,
                "currency": "eur",
                "metadata": {"user_id": "1", "price_id": "price_pro"}
            }),
        )
    }

    #[test]
    fn test_signature_accepts_any_matching_v1() {
        let payload = r#"{"type":"x"}"#;
        let good = sign(payload, 1_000, SECRET);
        let header = format!("t=1000,v1=deadbeef,{}", good.trim_start_matches("t=1000,"));
        assert!(verify_signature(payload, &header, SECRET, 1_000).is_ok());
    }

    #[test]
    fn test_signature_rejections() {
        let payload = r#"{"type":"x"}"#;
        let header = sign(payload, 1_000, SECRET);

        let wrong_secret = verify_signature(payload, &header, "whsec_other", 1_000);
        assert!(matches!(wrong_secret, Err(BillingError::WebhookSignatureInvalid)));

        let tampered = verify_signature(r#"{"type":"y"}"#, &header, SECRET, 1_000);
        assert!(matches!(tampered, Err(BillingError::WebhookSignatureInvalid)));

        let stale = verify_signature(payload, &header, SECRET, 1_000 + SIGNATURE_TOLERANCE_SECS + 1);
        assert!(matches!(stale, Err(BillingError::WebhookSignatureInvalid)));

        let garbage = verify_signature(payload, "garbage", SECRET, 1_000);
        assert!(matches!(garbage, Err(BillingError::WebhookSignatureInvalid)));

        let extreme = verify_signature(payload, "t=-9223372036854775808,v1=00", SECRET, 1_000);
        assert!(matches!(extreme, Err(BillingError::WebhookSignatureInvalid)));

        let future = verify_signature(payload, "t=9223372036854775807,v1=00", SECRET, -1_000);
        assert!(matches!(future, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[tokio::test]
    async fn test_live_mode_requires_secret_and_signature() {
        let store = Arc::new(MemoryBillingStore::new());
        let payload = event("ping", json!({}));

        let no_secret = WebhookHandler::new(
            Arc::new(BillingConfig::live("sk_test_x", "http://localhost:8000")),
            store.clone(),
        );
        assert!(matches!(
            no_secret.handle(&payload, None).await,
            Err(BillingError::Config(_))
        ));

        let live = WebhookHandler::new(
            Arc::new(
                BillingConfig::live("sk_test_x", "http://localhost:8000").with_webhook_secret(SECRET),
            ),
            store,
        );
        assert!(matches!(
            live.handle(&payload, None).await,
            Err(BillingError::WebhookSignatureInvalid)
        ));

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let outcome = live
            .handle(&payload, Some(&sign(&payload, now, SECRET)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Unhandled {
                event_type: "ping".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_checkout_completed_creates_subscription_and_payment() {
        let (handler, store) = dev_handler(PaymentReplayPolicy::RecordEveryDelivery).await;

        let outcome = handler.handle(&checkout_completed(), None).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Applied);

        let sub = store.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.processor_price_id, "price_pro");

        let payments = store.payments_for_customer(sub.customer_id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Completed);
        assert_eq!(payments[0].amount_cents, 2900);
        assert_eq!(payments[0].currency, "eur");
        assert_eq!(payments[0].mode, CheckoutMode::Subscription);
        assert_eq!(payments[0].processor_payment_intent_id.as_deref(), Some("pi_1"));
    }

    #[tokio::test]
    async fn test_checkout_replay_records_every_delivery() {
        let (handler, store) = dev_handler(PaymentReplayPolicy::RecordEveryDelivery).await;
        handler.handle(&checkout_completed(), None).await.unwrap();
        handler.handle(&checkout_completed(), None).await.unwrap();

        assert_eq!(store.counts().unwrap(), (1, 1, 2));
    }

    #[tokio::test]
    async fn test_checkout_replay_dedupes_by_session() {
        let (handler, store) = dev_handler(PaymentReplayPolicy::DedupeBySession).await;
        handler.handle(&checkout_completed(), None).await.unwrap();
        let outcome = handler.handle(&checkout_completed(), None).await.unwrap();

        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
        assert_eq!(store.counts().unwrap(), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_checkout_defaults_for_sparse_session() {
        let (handler, store) = dev_handler(PaymentReplayPolicy::RecordEveryDelivery).await;
        let payload = event(
            "checkout.session.completed",
            json!({"id": "cs_2", "customer": "cus_1"}),
        );
        handler.handle(&payload, None).await.unwrap();

        let payments = store.payments_for_customer(1).await.unwrap();
        assert_eq!(payments[0].amount_cents, 0);
        assert_eq!(payments[0].currency, "usd");
        assert_eq!(payments[0].mode, CheckoutMode::Payment);
        assert_eq!(store.counts().unwrap().1, 0);
    }

    #[tokio::test]
    async fn test_checkout_for_unknown_customer_is_noop() {
        let (handler, store) = dev_handler(PaymentReplayPolicy::RecordEveryDelivery).await;
        let payload = event(
            "checkout.session.completed",
            json!({"id": "cs_3", "customer": "cus_nobody", "amount_total": 100}),
        );
        let outcome = handler.handle(&payload, None).await.unwrap();

        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
        assert_eq!(store.counts().unwrap(), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_subscription_updated_overwrites_fields() {
        let (handler, store) = dev_handler(PaymentReplayPolicy::RecordEveryDelivery).await;
        handler.handle(&checkout_completed(), None).await.unwrap();

        let with_cancel = event(
            "customer.subscription.updated",
            json!({
                "id": "sub_1",
                "status": "trialing",
                "current_period_start": 1_700_000_000,
                "current_period_end": 1_702_592_000,
                "cancel_at": 1_702_592_000
            }),
        );
        handler.handle(&with_cancel, None).await.unwrap();
        let sub = store.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Trialing);
        assert_eq!(sub.current_period_end.unwrap().unix_timestamp(), 1_702_592_000);
        assert!(sub.cancel_at.is_some());

        let without_cancel = event(
            "customer.subscription.updated",
            json!({"id": "sub_1", "status": "not_a_status"}),
        );
        handler.handle(&without_cancel, None).await.unwrap();
        let sub = store.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Trialing);
        assert_eq!(sub.current_period_start.unwrap().unix_timestamp(), 1_700_000_000);
        assert_eq!(sub.cancel_at, None);
    }

    #[tokio::test]
    async fn test_update_for_unknown_subscription_is_noop() {
        let (handler, store) = dev_handler(PaymentReplayPolicy::RecordEveryDelivery).await;
        let payload = event(
            "customer.subscription.updated",
            json!({"id": "sub_missing", "status": "active"}),
        );
        let outcome = handler.handle(&payload, None).await.unwrap();

        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
        assert_eq!(store.counts().unwrap(), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_deleted_and_payment_failed_set_status() {
        let (handler, store) = dev_handler(PaymentReplayPolicy::RecordEveryDelivery).await;
        handler.handle(&checkout_completed(), None).await.unwrap();

        let failed = event("invoice.payment_failed", json!({"id": "in_1", "subscription": "sub_1"}));
        handler.handle(&failed, None).await.unwrap();
        let sub = store.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);

        let deleted = event("customer.subscription.deleted", json!({"id": "sub_1"}));
        handler.handle(&deleted, None).await.unwrap();
        let sub = store.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);

        let no_sub = event("invoice.payment_failed", json!({"id": "in_2"}));
        assert!(matches!(
            handler.handle(&no_sub, None).await.unwrap(),
            WebhookOutcome::Ignored { .. }
        ));
    }

    #[tokio::test]
    async fn test_canceled_subscription_ignores_stale_events() {
        let (handler, store) = dev_handler(PaymentReplayPolicy::RecordEveryDelivery).await;
        handler.handle(&checkout_completed(), None).await.unwrap();

        let deleted = event("customer.subscription.deleted", json!({"id": "sub_1"}));
        handler.handle(&deleted, None).await.unwrap();

        let stale = event(
            "customer.subscription.updated",
            json!({"id": "sub_1", "status": "active", "current_period_end": 1_800_000_000}),
        );
        assert!(matches!(
            handler.handle(&stale, None).await.unwrap(),
            WebhookOutcome::Ignored { .. }
        ));

        let failed = event("invoice.payment_failed", json!({"id": "in_1", "subscription": "sub_1"}));
        assert!(matches!(
            handler.handle(&failed, None).await.unwrap(),
            WebhookOutcome::Ignored { .. }
        ));

        let sub = store.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);

        // Repeated deletion is still idempotent
        assert_eq!(handler.handle(&deleted, None).await.unwrap(), WebhookOutcome::Applied);
    }

    #[tokio::test]
    async fn test_charge_refunded_marks_payment() {
        let (handler, store) = dev_handler(PaymentReplayPolicy::RecordEveryDelivery).await;
        handler.handle(&checkout_completed(), None).await.unwrap();

        let refund = event("charge.refunded", json!({"id": "ch_1", "payment_intent": "pi_1"}));
        assert_eq!(handler.handle(&refund, None).await.unwrap(), WebhookOutcome::Applied);

        let payments = store.payments_for_customer(1).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Refunded);

        let unknown = event("charge.refunded", json!({"id": "ch_2", "payment_intent": "pi_x"}));
        assert!(matches!(
            handler.handle(&unknown, None).await.unwrap(),
            WebhookOutcome::Ignored { .. }
        ));
    }

    #[tokio::test]
    async fn test_dev_mode_acknowledges_event_without_data() {
        let (handler, store) = dev_handler(PaymentReplayPolicy::RecordEveryDelivery).await;
        let outcome = handler.handle(r#"{"id":"evt_1","type":"ping"}"#, None).await.unwrap();

        assert_eq!(
            outcome,
            WebhookOutcome::Unhandled {
                event_type: "ping".to_string()
            }
        );
        assert_eq!(store.counts().unwrap(), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_dev_mode_rejects_malformed_body() {
        let (handler, _) = dev_handler(PaymentReplayPolicy::RecordEveryDelivery).await;
        assert!(matches!(
            handler.handle("{not json", None).await,
            Err(BillingError::InvalidPayload(_))
        ));
    }
}
