//! Billing configuration
//!
//! Everything is resolved once, at construction, into a [`BillingConfig`]
//! value that is handed to every service. Business logic never reads the
//! process environment itself.

use paymount_shared::SubscriptionStatus;

/// Default base URL used for redirects when `APP_URL` is not set
pub const DEFAULT_APP_URL: &str = "http://localhost:8000";

/// Whether processor credentials are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingMode {
    /// No secret key: every processor interaction is replaced with
    /// deterministic synthetic values.
    Dev,
    /// Real Stripe credentials are configured.
    Live,
}

/// What to do when a `checkout.session.completed` delivery is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentReplayPolicy {
    /// Insert a Payment row for every delivery (one row per delivery, audit style).
    #[default]
    RecordEveryDelivery,
    /// Skip the insert when a Payment for the same checkout session already exists.
    DedupeBySession,
}

/// One place a request may carry the internal user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIdSource {
    Query(String),
    Header(String),
    Cookie(String),
}

impl UserIdSource {
    /// Query `user_id`, then header `x-user-id`, then cookie `user_id`
    pub fn default_order() -> Vec<UserIdSource> {
        vec![
            UserIdSource::Query("user_id".to_string()),
            UserIdSource::Header("x-user-id".to_string()),
            UserIdSource::Cookie("user_id".to_string()),
        ]
    }
}

/// Route paths and gating behaviour
#[derive(Debug, Clone)]
pub struct PayConfig {
    pub success_path: String,
    pub cancel_path: String,
    pub webhook_path: String,
    /// Requests under this prefix get JSON denials instead of an HTML redirect
    pub api_prefix: String,
    /// Create processor customers on first checkout
    pub auto_create_customer: bool,
    /// Subscription statuses that pass the access gate
    pub allowed_statuses: Vec<SubscriptionStatus>,
    pub payment_replay: PaymentReplayPolicy,
    /// Consulted in order after any explicit user id
    pub identity_sources: Vec<UserIdSource>,
}

impl Default for PayConfig {
    fn default() -> Self {
        Self {
            success_path: "/pay/success".to_string(),
            cancel_path: "/pay/cancel".to_string(),
            webhook_path: "/pay/webhook".to_string(),
            api_prefix: "/api".to_string(),
            auto_create_customer: true,
            allowed_statuses: vec![SubscriptionStatus::Active, SubscriptionStatus::Trialing],
            payment_replay: PaymentReplayPolicy::default(),
            identity_sources: UserIdSource::default_order(),
        }
    }
}

impl PayConfig {
    pub fn allows(&self, status: SubscriptionStatus) -> bool {
        self.allowed_statuses.contains(&status)
    }
}

/// Resolved billing configuration
#[derive(Debug, Clone)]
pub struct BillingConfig {
    mode: BillingMode,
    secret_key: Option<String>,
    publishable_key: Option<String>,
    webhook_secret: Option<String>,
    app_url: String,
    pub pay: PayConfig,
}

impl BillingConfig {
    /// Dev-mode configuration: no processor credentials
    pub fn dev(app_url: impl Into<String>) -> Self {
        Self::build(None, app_url.into())
    }

    /// Live-mode configuration with a Stripe secret key
    pub fn live(secret_key: impl Into<String>, app_url: impl Into<String>) -> Self {
        Self::build(Some(secret_key.into()), app_url.into())
    }

    fn build(secret_key: Option<String>, app_url: String) -> Self {
        let secret_key = secret_key.filter(|k| !k.is_empty());
        let mode = if secret_key.is_some() {
            BillingMode::Live
        } else {
            BillingMode::Dev
        };
        Self {
            mode,
            secret_key,
            publishable_key: None,
            webhook_secret: None,
            app_url: app_url.trim_end_matches('/').to_string(),
            pay: PayConfig::default(),
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup (environment, file, test map)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let app_url = non_empty("APP_URL").unwrap_or_else(|| DEFAULT_APP_URL.to_string());

        let mut config = Self::build(non_empty("STRIPE_SECRET_KEY"), app_url);
        config.publishable_key = non_empty("STRIPE_PUBLISHABLE_KEY");
        config.webhook_secret = non_empty("STRIPE_WEBHOOK_SECRET");
        config
    }

    pub fn with_publishable_key(mut self, key: impl Into<String>) -> Self {
        self.publishable_key = Some(key.into()).filter(|k| !k.is_empty());
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into()).filter(|s| !s.is_empty());
        self
    }

    pub fn with_pay_config(mut self, pay: PayConfig) -> Self {
        self.pay = pay;
        self
    }

    pub fn mode(&self) -> BillingMode {
        self.mode
    }

    pub fn is_dev_mode(&self) -> bool {
        self.mode == BillingMode::Dev
    }

    pub fn secret_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    pub fn publishable_key(&self) -> Option<&str> {
        self.publishable_key.as_deref()
    }

    pub fn webhook_signing_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    pub fn app_url(&self) -> &str {
        &self.app_url
    }

    /// Absolute URL for a path served by the host application
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.app_url, path)
    }
}
