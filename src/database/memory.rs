//! In-process ledger with the same contract as the Postgres repositories.
//!
//! Used when the service runs with `SKIP_EXTERNALS=true` and by the integration tests. The
//! conditional transition is a check-and-set under one write lock, which gives the same
//! single-winner guarantee as the guarded `UPDATE`.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    clamp_limit, NewWebhookRecord, Payment, PaymentFilter, PaymentItem, StateTransition,
    WebhookFilter, WebhookRecord,
};
use crate::database::repository::{PaymentStore, WebhookStore};
use crate::payments::types::{PaymentState, ProviderName};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    payments: HashMap<Uuid, Payment>,
    items: Vec<PaymentItem>,
    webhooks: HashMap<Uuid, WebhookRecord>,
}

#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    pub async fn webhook_count(&self) -> usize {
        self.state.read().await.webhooks.len()
    }
}

fn newest_first<T, F>(values: &mut [T], key: F)
where
    F: Fn(&T) -> chrono::DateTime<Utc>,
{
    values.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl PaymentStore for InMemoryLedger {
    async fn insert_payment(&self, payment: &Payment) -> Result<Payment, DatabaseError> {
        let mut state = self.state.write().await;
        if state.payments.contains_key(&payment.id) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "payments_pkey".to_string(),
            }));
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(payment.clone())
    }

    async fn insert_items(&self, items: &[PaymentItem]) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        state.items.extend(items.iter().cloned());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn find_items(&self, payment_id: Uuid) -> Result<Vec<PaymentItem>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .items
            .iter()
            .filter(|item| item.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn find_by_provider_payment_id(
        &self,
        provider: ProviderName,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let state = self.state.read().await;
        let mut matches: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| {
                p.provider == provider
                    && p.provider_payment_id.as_deref() == Some(provider_payment_id)
            })
            .cloned()
            .collect();
        newest_first(&mut matches, |p| p.created_at);
        Ok(matches.into_iter().next())
    }

    async fn find_pending_by_reference(
        &self,
        provider: ProviderName,
        reference: &str,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError> {
        let state = self.state.read().await;
        let mut matches: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| {
                p.provider == provider
                    && p.state == PaymentState::Pending
                    && p.matched_by(reference).is_some()
            })
            .cloned()
            .collect();
        newest_first(&mut matches, |p| p.created_at);
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }

    async fn find_pending_by_external_reference(
        &self,
        provider: ProviderName,
        external_reference: &str,
    ) -> Result<Vec<Payment>, DatabaseError> {
        let state = self.state.read().await;
        let mut matches: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| {
                p.provider == provider
                    && p.state == PaymentState::Pending
                    && p.external_reference == external_reference
            })
            .cloned()
            .collect();
        newest_first(&mut matches, |p| p.created_at);
        Ok(matches)
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: &StateTransition,
    ) -> Result<Option<Payment>, DatabaseError> {
        let mut state = self.state.write().await;
        let Some(payment) = state.payments.get_mut(&id) else {
            return Ok(None);
        };
        if !transition.allowed_from().contains(&payment.state) {
            return Ok(None);
        }

        payment.state = transition.target;
        if transition.paid_at.is_some() {
            payment.paid_at = transition.paid_at;
        }
        if transition.payment_method.is_some() {
            payment.payment_method = transition.payment_method;
        }
        payment.updated_at = Utc::now();
        Ok(Some(payment.clone()))
    }

    async fn query(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, DatabaseError> {
        let state = self.state.read().await;
        let mut matches: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        newest_first(&mut matches, |p| p.created_at);
        matches.truncate(clamp_limit(filter.limit) as usize);
        Ok(matches)
    }
}

#[async_trait]
impl WebhookStore for InMemoryLedger {
    async fn insert_webhook(&self, record: NewWebhookRecord) -> Result<WebhookRecord, DatabaseError> {
        let stored = WebhookRecord {
            id: Uuid::new_v4(),
            provider: record.provider,
            event_name: record.event_name,
            raw_payload: record.raw_payload,
            processed: false,
            payment_id: None,
            error: None,
            received_at: Utc::now(),
            processed_at: None,
        };
        self.state
            .write()
            .await
            .webhooks
            .insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn mark_processed(
        &self,
        id: Uuid,
        event_name: Option<&str>,
        payment_id: Option<Uuid>,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        let record = state
            .webhooks
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("WebhookRecord", id))?;
        record.processed = true;
        if let Some(name) = event_name {
            record.event_name = Some(name.to_string());
        }
        if payment_id.is_some() {
            record.payment_id = payment_id;
        }
        record.error = None;
        record.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        event_name: Option<&str>,
        payment_id: Option<Uuid>,
        error: &str,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        let record = state
            .webhooks
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("WebhookRecord", id))?;
        if let Some(name) = event_name {
            record.event_name = Some(name.to_string());
        }
        if payment_id.is_some() {
            record.payment_id = payment_id;
        }
        record.error = Some(error.to_string());
        Ok(())
    }

    async fn find_webhook(&self, id: Uuid) -> Result<Option<WebhookRecord>, DatabaseError> {
        Ok(self.state.read().await.webhooks.get(&id).cloned())
    }

    async fn list_webhooks(
        &self,
        filter: &WebhookFilter,
    ) -> Result<Vec<WebhookRecord>, DatabaseError> {
        let state = self.state.read().await;
        let mut matches: Vec<WebhookRecord> = state
            .webhooks
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        newest_first(&mut matches, |r| r.received_at);
        matches.truncate(clamp_limit(filter.limit) as usize);
        Ok(matches)
    }
}

#[cfg(test)]
pub(crate) fn sample_payment(provider: ProviderName, conversation_ref: &str) -> Payment {
    use bigdecimal::BigDecimal;

    let now = Utc::now();
    Payment {
        id: Uuid::new_v4(),
        provider,
        provider_payment_id: Some(format!("vendor-{}", conversation_ref)),
        amount: BigDecimal::from(1000),
        currency: "ARS".to_string(),
        state: PaymentState::Pending,
        checkout_url: "https://checkout.example.com/pay".to_string(),
        qr_code: None,
        description: "Curso".to_string(),
        customer_name: "Ana".to_string(),
        customer_email: None,
        customer_phone: None,
        due_at: now + chrono::Duration::days(7),
        paid_at: None,
        payment_method: None,
        metadata: serde_json::json!({}),
        conversation_ref: Some(conversation_ref.to_string()),
        contact_ref: None,
        external_reference: conversation_ref.to_string(),
        created_by: None,
        created_at: now,
        updated_at: now,
    }
}
