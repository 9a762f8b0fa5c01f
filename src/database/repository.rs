use crate::database::error::DatabaseError;
use crate::database::models::{
    NewWebhookRecord, Payment, PaymentFilter, PaymentItem, StateTransition, WebhookFilter,
    WebhookRecord,
};
use crate::payments::types::ProviderName;
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence contract for the payment ledger.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> Result<Payment, DatabaseError>;

    async fn insert_items(&self, items: &[PaymentItem]) -> Result<(), DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError>;

    async fn find_items(&self, payment_id: Uuid) -> Result<Vec<PaymentItem>, DatabaseError>;

    async fn find_by_provider_payment_id(
        &self,
        provider: ProviderName,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Pending payments of `provider` whose conversation ref, contact ref or id equals
    /// `reference`, newest first.
    async fn find_pending_by_reference(
        &self,
        provider: ProviderName,
        reference: &str,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError>;

    /// Pending payments of `provider` issued under `external_reference`, newest first.
    async fn find_pending_by_external_reference(
        &self,
        provider: ProviderName,
        external_reference: &str,
    ) -> Result<Vec<Payment>, DatabaseError>;

    /// Conditional write: applied only while the stored state is one of
    /// `transition.allowed_from()`. Returns the updated row, or `None` when the guard failed.
    async fn transition(
        &self,
        id: Uuid,
        transition: &StateTransition,
    ) -> Result<Option<Payment>, DatabaseError>;

    async fn query(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, DatabaseError>;
}

/// Persistence contract for raw webhook deliveries.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn insert_webhook(&self, record: NewWebhookRecord) -> Result<WebhookRecord, DatabaseError>;

    async fn mark_processed(
        &self,
        id: Uuid,
        event_name: Option<&str>,
        payment_id: Option<Uuid>,
    ) -> Result<(), DatabaseError>;

    async fn mark_failed(
        &self,
        id: Uuid,
        event_name: Option<&str>,
        payment_id: Option<Uuid>,
        error: &str,
    ) -> Result<(), DatabaseError>;

    async fn find_webhook(&self, id: Uuid) -> Result<Option<WebhookRecord>, DatabaseError>;

    async fn list_webhooks(&self, filter: &WebhookFilter)
        -> Result<Vec<WebhookRecord>, DatabaseError>;
}
