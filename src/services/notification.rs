use crate::database::models::Payment;
use crate::payments::types::{PaymentMethod, ProviderName};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Body POSTed to the downstream notification endpoint when a payment becomes paid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaidNotification {
    pub payment_id: Uuid,
    pub conversation_ref: Option<String>,
    pub contact_ref: Option<String>,
    pub external_reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: String,
    pub provider: ProviderName,
    pub payment_method: Option<PaymentMethod>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<&Payment> for PaidNotification {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id,
            conversation_ref: payment.conversation_ref.clone(),
            contact_ref: payment.contact_ref.clone(),
            external_reference: payment.external_reference.clone(),
            amount: payment.amount.clone(),
            currency: payment.currency.clone(),
            description: payment.description.clone(),
            provider: payment.provider,
            payment_method: payment.payment_method,
            paid_at: payment.paid_at,
        }
    }
}

/// Fire-once webhook to the downstream system. Failures are logged, never retried.
pub struct NotificationDispatcher {
    client: Client,
    url: Option<String>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            url: url.filter(|u| !u.trim().is_empty()),
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(5))
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Send the paid notification on a background task so the caller never waits on the
    /// receiver.
    pub fn dispatch_paid(self: &Arc<Self>, payment: Payment) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.notify_paid(&payment).await })
    }

    pub async fn notify_paid(&self, payment: &Payment) {
        let Some(url) = self.url.as_deref() else {
            debug!(payment_id = %payment.id, "no notification url configured; skipping");
            return;
        };

        let body = PaidNotification::from(payment);
        let result = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!(payment_id = %payment.id, "paid notification delivered");
            }
            Ok(response) => {
                warn!(
                    payment_id = %payment.id,
                    status = %response.status(),
                    "paid notification rejected by receiver"
                );
            }
            Err(e) => {
                warn!(
                    payment_id = %payment.id,
                    error = %e,
                    "paid notification failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::sample_payment;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_payment_summary_once() {
        let server = MockServer::start().await;
        let payment = sample_payment(ProviderName::Stripe, "conv-n");
        Mock::given(method("POST"))
            .and(path("/notify"))
            .and(body_partial_json(serde_json::json!({
                "payment_id": payment.id,
                "conversation_ref": "conv-n",
                "provider": "stripe"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = NotificationDispatcher::new(
            Some(format!("{}/notify", server.uri())),
            Duration::from_secs(2),
        );
        dispatcher.notify_paid(&payment).await;
    }

    #[tokio::test]
    async fn receiver_errors_are_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = NotificationDispatcher::new(Some(server.uri()), Duration::from_secs(2));
        dispatcher
            .notify_paid(&sample_payment(ProviderName::Paypal, "conv-x"))
            .await;
    }

    #[tokio::test]
    async fn dispatch_returns_before_a_slow_receiver_answers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Arc::new(NotificationDispatcher::new(
            Some(server.uri()),
            Duration::from_secs(2),
        ));
        let handle = dispatcher.dispatch_paid(sample_payment(ProviderName::Stripe, "conv-s"));
        assert!(!handle.is_finished());
        handle.await.unwrap();
    }

    #[test]
    fn blank_url_disables_dispatch() {
        assert!(!NotificationDispatcher::new(Some("  ".to_string()), Duration::from_secs(1))
            .is_enabled());
    }
}
