//! Persisted billing entities
//!
//! The host application owns the database. This module owns the shape: the
//! record types, their row mappings, and [`EntityDescription`]s a host can use
//! to check or generate its own schema. `migrations/` holds the matching SQL.

use paymount_shared::{CheckoutMode, PaymentStatus, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::OffsetDateTime;

/// Link between an internal user and a processor customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CustomerLink {
    pub id: i64,
    pub user_id: i64,
    pub email: String,
    pub processor_customer_id: String,
    pub created_at: OffsetDateTime,
}

/// Local mirror of a processor subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: i64,
    pub customer_id: i64,
    pub processor_subscription_id: String,
    pub processor_price_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A completed (or refunded) checkout payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: i64,
    pub customer_id: i64,
    pub processor_session_id: Option<String>,
    pub processor_payment_intent_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub mode: CheckoutMode,
    pub created_at: OffsetDateTime,
}

fn decode_text<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = paymount_shared::SharedError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl<'r> sqlx::FromRow<'r, PgRow> for SubscriptionRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            processor_subscription_id: row.try_get("processor_subscription_id")?,
            processor_price_id: row.try_get("processor_price_id")?,
            status: decode_text(row, "status")?,
            current_period_start: row.try_get("current_period_start")?,
            current_period_end: row.try_get("current_period_end")?,
            cancel_at: row.try_get("cancel_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for PaymentRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            processor_session_id: row.try_get("processor_session_id")?,
            processor_payment_intent_id: row.try_get("processor_payment_intent_id")?,
            amount_cents: row.try_get("amount_cents")?,
            currency: row.try_get("currency")?,
            status: decode_text(row, "status")?,
            mode: decode_text(row, "mode")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

// =============================================================================
// Entity descriptions
// =============================================================================

/// Column type, in database-neutral terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Integer,
    Text,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub unique: bool,
    pub indexed: bool,
    /// `table.column` this field references
    pub references: Option<&'static str>,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldDescription {
    FieldDescription {
        name,
        kind,
        nullable: false,
        unique: false,
        indexed: false,
        references: None,
    }
}

impl FieldDescription {
    const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    const fn unique(mut self) -> Self {
        self.unique = true;
        self.indexed = true;
        self
    }

    const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    const fn references(mut self, target: &'static str) -> Self {
        self.references = Some(target);
        self
    }
}

/// Table a host must provide for one billing entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescription {
    pub table: &'static str,
    pub fields: &'static [FieldDescription],
}

impl EntityDescription {
    pub fn field(&self, name: &str) -> Option<&FieldDescription> {
        self.fields.iter().find(|f| f.name == name)
    }
}

pub const CUSTOMER_ENTITY: EntityDescription = EntityDescription {
    table: "billing_customers",
    fields: &[
        field("id", FieldKind::Id),
        field("user_id", FieldKind::Integer).unique(),
        field("email", FieldKind::Text),
        field("processor_customer_id", FieldKind::Text).unique(),
        field("created_at", FieldKind::Timestamp),
    ],
};

pub const SUBSCRIPTION_ENTITY: EntityDescription = EntityDescription {
    table: "billing_subscriptions",
    fields: &[
        field("id", FieldKind::Id),
        field("customer_id", FieldKind::Integer).references("billing_customers.id"),
        field("processor_subscription_id", FieldKind::Text).unique(),
        field("processor_price_id", FieldKind::Text),
        field("status", FieldKind::Text),
        field("current_period_start", FieldKind::Timestamp).nullable(),
        field("current_period_end", FieldKind::Timestamp).nullable(),
        field("cancel_at", FieldKind::Timestamp).nullable(),
        field("created_at", FieldKind::Timestamp),
        field("updated_at", FieldKind::Timestamp),
    ],
};

pub const PAYMENT_ENTITY: EntityDescription = EntityDescription {
    table: "billing_payments",
    fields: &[
        field("id", FieldKind::Id),
        field("customer_id", FieldKind::Integer).references("billing_customers.id"),
        field("processor_session_id", FieldKind::Text).nullable().indexed(),
        field("processor_payment_intent_id", FieldKind::Text).nullable().indexed(),
        field("amount_cents", FieldKind::Integer),
        field("currency", FieldKind::Text),
        field("status", FieldKind::Text),
        field("mode", FieldKind::Text),
        field("created_at", FieldKind::Timestamp),
    ],
};

/// All billing entities, in creation order
pub const ENTITIES: [EntityDescription; 3] = [CUSTOMER_ENTITY, SUBSCRIPTION_ENTITY, PAYMENT_ENTITY];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_link_uniqueness() {
        let user_id = CUSTOMER_ENTITY.field("user_id").unwrap();
        assert!(user_id.unique);
        let processor_id = CUSTOMER_ENTITY.field("processor_customer_id").unwrap();
        assert!(processor_id.unique);
        assert!(!CUSTOMER_ENTITY.field("email").unwrap().unique);
    }

    #[test]
    fn test_foreign_keys_point_at_customers() {
        for entity in [SUBSCRIPTION_ENTITY, PAYMENT_ENTITY] {
            let fk = entity.field("customer_id").unwrap();
            assert_eq!(fk.references, Some("billing_customers.id"));
        }
    }

    #[test]
    fn test_payment_ids_are_not_unique() {
        let session = PAYMENT_ENTITY.field("processor_session_id").unwrap();
        assert!(session.nullable);
        assert!(session.indexed);
        assert!(!session.unique);
    }

    #[test]
    fn test_entities_created_parent_first() {
        assert_eq!(ENTITIES[0].table, "billing_customers");
        assert!(ENTITIES.iter().all(|e| e.field("id").is_some()));
    }
}
