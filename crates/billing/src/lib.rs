// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Paymount Billing Module
//!
//! HTTP-agnostic core of the billing add-on: checkout, portal, webhook
//! reconciliation and subscription gating, backed by Stripe.
//!
//! ## Features
//!
//! - **Config**: dev/live mode resolved once from credentials
//! - **Customers**: one processor customer per internal user
//! - **Checkout / Portal**: hosted session URLs
//! - **Webhooks**: verify and reconcile processor events into local records
//! - **Access gate**: allow users holding a qualifying subscription
//!
//! Without a Stripe secret key everything runs in dev mode with
//! deterministic synthetic ids and no network access.

pub mod access;
pub mod checkout;
pub mod client;
pub mod config;
pub mod customer;
pub mod error;
pub mod events;
pub mod memory_store;
pub mod models;
pub mod pg_store;
pub mod portal;
pub mod store;
pub mod webhooks;

use std::sync::Arc;

use sqlx::PgPool;

// Access
pub use access::{AccessGate, GrantedAccess, DEV_PRICE_ID};

// Checkout
pub use checkout::{CheckoutRequest, CheckoutService};

// Client
pub use client::{CheckoutSessionRequest, DevProcessor, PaymentProcessor, StripeProcessor};

// Config
pub use config::{
    BillingConfig, BillingMode, PayConfig, PaymentReplayPolicy, UserIdSource, DEFAULT_APP_URL,
};

// Customer
pub use customer::CustomerService;

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{WebhookEvent, WebhookEventKind};

// Models
pub use models::{CustomerLink, EntityDescription, PaymentRecord, SubscriptionRecord, ENTITIES};

// Portal
pub use portal::PortalService;

// Store
pub use memory_store::MemoryBillingStore;
pub use pg_store::PgBillingStore;
pub use store::BillingStore;

// Webhooks
pub use webhooks::{verify_signature, WebhookHandler, WebhookOutcome};

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub access: AccessGate,
    pub checkout: CheckoutService,
    pub customer: CustomerService,
    pub portal: PortalService,
    pub webhooks: WebhookHandler,
    config: Arc<BillingConfig>,
}

impl BillingService {
    /// Create a billing service, choosing the processor from the config mode
    pub fn new(config: BillingConfig, store: Arc<dyn BillingStore>) -> Self {
        let processor: Arc<dyn PaymentProcessor> = match config.secret_key() {
            Some(secret_key) => Arc::new(StripeProcessor::new(secret_key)),
            None => Arc::new(DevProcessor::new(config.app_url())),
        };
        Self::with_processor(config, store, processor)
    }

    /// Create a billing service with an explicit processor
    pub fn with_processor(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        let config = Arc::new(config);

        tracing::info!(
            mode = ?config.mode(),
            app_url = %config.app_url(),
            "Billing service initialised"
        );

        let customer = CustomerService::new(config.clone(), store.clone(), processor.clone());

        Self {
            access: AccessGate::new(config.clone(), store.clone()),
            checkout: CheckoutService::new(config.clone(), customer.clone(), processor.clone()),
            portal: PortalService::new(config.clone(), customer.clone(), processor),
            webhooks: WebhookHandler::new(config.clone(), store),
            customer,
            config,
        }
    }

    /// Create a billing service from environment variables on the host's pool
    pub fn from_env(pool: PgPool) -> Self {
        Self::new(
            BillingConfig::from_env(),
            Arc::new(PgBillingStore::new(pool)),
        )
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }
}
