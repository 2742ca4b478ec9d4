//! Webhook event envelope and typed payloads
//!
//! Only the fields the reconciler reads are modelled, and all of them are
//! optional: processor payloads evolve and a missing field must degrade to a
//! default or a logged no-op rather than a decode failure.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{BillingError, BillingResult};

/// Notification posted by the processor
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub type_: String,
    pub created: Option<i64>,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    #[serde(default = "empty_object")]
    pub object: serde_json::Value,
}

impl Default for EventData {
    fn default() -> Self {
        Self {
            object: empty_object(),
        }
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Event types the reconciler acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    CheckoutSessionCompleted,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaymentFailed,
    ChargeRefunded,
    Other(String),
}

impl WebhookEventKind {
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            "charge.refunded" => Self::ChargeRefunded,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::CheckoutSessionCompleted => "checkout.session.completed",
            Self::SubscriptionUpdated => "customer.subscription.updated",
            Self::SubscriptionDeleted => "customer.subscription.deleted",
            Self::InvoicePaymentFailed => "invoice.payment_failed",
            Self::ChargeRefunded => "charge.refunded",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for WebhookEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WebhookEvent {
    /// Decode an event from a raw request body
    pub fn from_json(payload: &str) -> BillingResult<Self> {
        serde_json::from_str(payload).map_err(|e| BillingError::InvalidPayload(e.to_string()))
    }

    pub fn kind(&self) -> WebhookEventKind {
        WebhookEventKind::parse(&self.type_)
    }

    /// Decode `data.object` into a typed payload
    pub fn object<T: DeserializeOwned>(&self) -> BillingResult<T> {
        T::deserialize(&self.data.object).map_err(|e| {
            BillingError::InvalidPayload(format!("{} object: {}", self.type_, e))
        })
    }
}

/// A reference that is either a bare id or an expanded object carrying one
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ExpandableId {
    Id(String),
    Object { id: String },
}

impl ExpandableId {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) | Self::Object { id } => id,
        }
    }
}

fn id_of(value: &Option<ExpandableId>) -> Option<&str> {
    value.as_ref().map(ExpandableId::id).filter(|id| !id.is_empty())
}

/// `checkout.session.completed` payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: Option<String>,
    pub customer: Option<ExpandableId>,
    pub mode: Option<String>,
    pub subscription: Option<ExpandableId>,
    pub payment_intent: Option<ExpandableId>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

impl CheckoutSessionObject {
    pub fn customer_id(&self) -> Option<&str> {
        id_of(&self.customer)
    }

    pub fn subscription_id(&self) -> Option<&str> {
        id_of(&self.subscription)
    }

    pub fn payment_intent_id(&self) -> Option<&str> {
        id_of(&self.payment_intent)
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// `customer.subscription.*` payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionObject {
    pub id: Option<String>,
    pub status: Option<String>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub cancel_at: Option<i64>,
}

/// `invoice.*` payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceObject {
    pub id: Option<String>,
    pub customer: Option<ExpandableId>,
    pub subscription: Option<ExpandableId>,
}

impl InvoiceObject {
    pub fn subscription_id(&self) -> Option<&str> {
        id_of(&self.subscription)
    }
}

/// `charge.*` payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargeObject {
    pub id: Option<String>,
    pub payment_intent: Option<ExpandableId>,
}

impl ChargeObject {
    pub fn payment_intent_id(&self) -> Option<&str> {
        id_of(&self.payment_intent)
    }
}
