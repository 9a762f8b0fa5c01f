#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use http::HeaderMap;
use paylink_gateway::api::AppState;
use paylink_gateway::database::memory::InMemoryLedger;
use paylink_gateway::database::models::Payment;
use paylink_gateway::payments::error::{PaymentError, PaymentResult};
use paylink_gateway::payments::provider::PaymentProvider;
use paylink_gateway::payments::registry::ProviderRegistry;
use paylink_gateway::payments::types::{
    CanonicalWebhookEvent, CustomerContact, LinkRequest, LinkResult, PaymentIntent,
    PaymentState, ProviderName, StatusResult,
};
use paylink_gateway::services::notification::NotificationDispatcher;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use uuid::Uuid;
use wiremock::MockServer;

/// Scriptable adapter. Webhook bodies look like
/// `{"reference": "...", "vendor_id": "...", "payment_id": "...", "state": "paid", "amount": "10"}`.
pub struct MockProvider {
    pub name: ProviderName,
    pub configured: bool,
    pub vendor_status: String,
    pub created: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: ProviderName) -> Self {
        Self {
            name,
            configured: true,
            vendor_status: "approved".to_string(),
            created: AtomicUsize::new(0),
        }
    }

    pub fn unconfigured(name: ProviderName) -> Self {
        Self {
            configured: false,
            ..Self::new(name)
        }
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn create_payment_link(&self, request: LinkRequest) -> PaymentResult<LinkResult> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LinkResult {
            id: request.payment_id,
            provider_payment_id: format!("mock_{}", n),
            checkout_url: format!("https://pay.example.com/mock_{}", n),
            qr_code: None,
            amount: request.amount,
            due_at: request.due_at,
            raw: json!({ "id": format!("mock_{}", n) }),
        })
    }

    async fn verify_payment(&self, _provider_payment_id: &str) -> PaymentResult<StatusResult> {
        let state = if self.vendor_status == "approved" {
            PaymentState::Paid
        } else {
            PaymentState::Pending
        };
        Ok(StatusResult {
            state,
            vendor_status: self.vendor_status.clone(),
            amount: None,
            payment_method: None,
            raw: json!({ "status": self.vendor_status }),
        })
    }

    async fn parse_webhook(
        &self,
        body: &[u8],
        _headers: &HeaderMap,
    ) -> PaymentResult<CanonicalWebhookEvent> {
        let payload: JsonValue = serde_json::from_slice(body)
            .map_err(|e| PaymentError::parse("mock", e.to_string()))?;
        let correlation_id = payload["reference"]
            .as_str()
            .ok_or_else(|| PaymentError::parse("mock", "missing reference"))?
            .to_string();
        let state = payload["state"]
            .as_str()
            .map(PaymentState::from_str)
            .transpose()?;

        Ok(CanonicalWebhookEvent {
            provider: self.name,
            correlation_id,
            provider_payment_id: payload["vendor_id"].as_str().map(str::to_string),
            payment_id: payload["payment_id"]
                .as_str()
                .and_then(|id| Uuid::parse_str(id).ok()),
            event_name: payload["event"].as_str().unwrap_or("mock.event").to_string(),
            state,
            amount: payload["amount"]
                .as_str()
                .and_then(|a| BigDecimal::from_str(a).ok()),
            payment_method: None,
            payload,
        })
    }

    async fn cancel_payment(&self, _provider_payment_id: &str) -> PaymentResult<bool> {
        Ok(true)
    }
}

pub fn registry_with(providers: Vec<Arc<dyn PaymentProvider>>) -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::from_providers(providers))
}

pub fn state_with(
    registry: Arc<ProviderRegistry>,
    ledger: &InMemoryLedger,
    notifier: NotificationDispatcher,
) -> AppState {
    AppState::new(
        registry,
        Arc::new(ledger.clone()),
        Arc::new(ledger.clone()),
        Arc::new(notifier),
        7,
        None,
    )
}

pub fn intent(provider: &str, amount: &str) -> PaymentIntent {
    PaymentIntent {
        provider: provider.to_string(),
        amount: BigDecimal::from_str(amount).unwrap(),
        currency: "ARS".to_string(),
        description: "Consulta".to_string(),
        customer: CustomerContact {
            name: "Ana Diaz".to_string(),
            email: Some("ana@example.com".to_string()),
            phone: None,
        },
        items: vec![],
        conversation_ref: None,
        contact_ref: None,
        due_days: None,
        metadata: None,
        created_by: None,
    }
}

/// A pending payment row built directly, for tests that need exact timestamps.
pub fn pending_payment(provider: ProviderName, created_at: DateTime<Utc>) -> Payment {
    let id = Uuid::new_v4();
    Payment {
        id,
        provider,
        provider_payment_id: Some(format!("vendor_{}", id.simple())),
        amount: BigDecimal::from(250),
        currency: "ARS".to_string(),
        state: PaymentState::Pending,
        checkout_url: "https://pay.example.com/x".to_string(),
        qr_code: None,
        description: "Turno".to_string(),
        customer_name: "Luis Gomez".to_string(),
        customer_email: None,
        customer_phone: None,
        due_at: created_at + Duration::days(7),
        paid_at: None,
        payment_method: None,
        metadata: json!({}),
        conversation_ref: None,
        contact_ref: None,
        external_reference: id.to_string(),
        created_by: None,
        created_at,
        updated_at: created_at,
    }
}

/// Paid notifications go out on a background task; wait until `expected` of them reached
/// the receiver at `path`, so mock expectations are checked after delivery.
pub async fn wait_for_requests(server: &MockServer, path: &str, expected: usize) {
    for _ in 0..100 {
        let seen = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == path)
            .count();
        if seen >= expected {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    panic!("expected {} request(s) to {} in time", expected, path);
}
