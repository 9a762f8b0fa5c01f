use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::payments::types::{PaymentMethod, PaymentState, ProviderName};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Ledger entry for one payment link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub provider: ProviderName,
    pub provider_payment_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub state: PaymentState,
    pub checkout_url: String,
    pub qr_code: Option<String>,
    pub description: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub due_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_method: Option<PaymentMethod>,
    pub metadata: JsonValue,
    pub conversation_ref: Option<String>,
    pub contact_ref: Option<String>,
    pub external_reference: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which column tied a pending payment to a webhook reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchedBy {
    ConversationRef,
    ContactRef,
    Id,
}

impl Payment {
    pub fn matched_by(&self, reference: &str) -> Option<MatchedBy> {
        if self.conversation_ref.as_deref() == Some(reference) {
            Some(MatchedBy::ConversationRef)
        } else if self.contact_ref.as_deref() == Some(reference) {
            Some(MatchedBy::ContactRef)
        } else if self.id.to_string() == reference {
            Some(MatchedBy::Id)
        } else {
            None
        }
    }
}

/// Raw `payments` row; enum columns are stored as text.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub state: String,
    pub checkout_url: String,
    pub qr_code: Option<String>,
    pub description: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub due_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_method: Option<String>,
    pub metadata: JsonValue,
    pub conversation_ref: Option<String>,
    pub contact_ref: Option<String>,
    pub external_reference: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let corrupt = |column: &str, value: &str| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("payment {} has invalid {}: {}", row.id, column, value),
            })
        };
        let provider =
            ProviderName::from_str(&row.provider).map_err(|_| corrupt("provider", &row.provider))?;
        let state = PaymentState::from_str(&row.state).map_err(|_| corrupt("state", &row.state))?;

        Ok(Payment {
            id: row.id,
            provider,
            provider_payment_id: row.provider_payment_id,
            amount: row.amount,
            currency: row.currency,
            state,
            checkout_url: row.checkout_url,
            qr_code: row.qr_code,
            description: row.description,
            customer_name: row.customer_name,
            customer_email: row.customer_email,
            customer_phone: row.customer_phone,
            due_at: row.due_at,
            paid_at: row.paid_at,
            payment_method: row.payment_method.as_deref().map(PaymentMethod::from_stored),
            metadata: row.metadata,
            conversation_ref: row.conversation_ref,
            contact_ref: row.contact_ref,
            external_reference: row.external_reference,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct PaymentItem {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
}

/// One inbound webhook delivery, stored verbatim before any parsing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookRecord {
    pub id: Uuid,
    pub provider: String,
    pub event_name: Option<String>,
    pub raw_payload: String,
    pub processed: bool,
    pub payment_id: Option<Uuid>,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookRecord {
    pub provider: String,
    pub event_name: Option<String>,
    pub raw_payload: String,
}

/// A requested state change. Stores apply it only while the payment is still in one of
/// `target.allowed_predecessors()`.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub target: PaymentState,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_method: Option<PaymentMethod>,
}

impl StateTransition {
    pub fn to(target: PaymentState) -> Self {
        Self {
            target,
            paid_at: None,
            payment_method: None,
        }
    }

    pub fn allowed_from(&self) -> &'static [PaymentState] {
        self.target.allowed_predecessors()
    }

    pub fn allowed_from_labels(&self) -> Vec<String> {
        self.allowed_from()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect()
    }
}

pub const DEFAULT_QUERY_LIMIT: i64 = 50;
pub const MAX_QUERY_LIMIT: i64 = 500;

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_QUERY_LIMIT)
        .clamp(1, MAX_QUERY_LIMIT)
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub state: Option<PaymentState>,
    pub provider: Option<ProviderName>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.state.map_or(true, |s| payment.state == s)
            && self.provider.map_or(true, |p| payment.provider == p)
            && self.created_from.map_or(true, |from| payment.created_at >= from)
            && self.created_to.map_or(true, |to| payment.created_at <= to)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WebhookFilter {
    pub processed: Option<bool>,
    pub provider: Option<String>,
    pub limit: Option<i64>,
}

impl WebhookFilter {
    pub fn matches(&self, record: &WebhookRecord) -> bool {
        self.processed.map_or(true, |p| record.processed == p)
            && self
                .provider
                .as_deref()
                .map_or(true, |p| record.provider == p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_defaulted_and_clamped() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), 500);
        assert_eq!(clamp_limit(Some(25)), 25);
    }

    #[test]
    fn refund_transition_accepts_settled_states() {
        let transition = StateTransition::to(PaymentState::Refunded);
        assert!(transition.allowed_from().contains(&PaymentState::Paid));
        assert!(!transition.allowed_from().contains(&PaymentState::Refunded));
        assert_eq!(StateTransition::to(PaymentState::Paid).allowed_from_labels(), vec!["pending"]);
    }
}
