use http::HeaderMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::models::{MatchedBy, NewWebhookRecord, Payment};
use crate::database::repository::{PaymentStore, WebhookStore};
use crate::error::AppError;
use crate::payments::error::PaymentError;
use crate::payments::registry::ProviderRegistry;
use crate::payments::types::{CanonicalWebhookEvent, ProviderName};
use crate::services::ledger::{check_amount, PaymentLedgerService, TransitionOutcome};

/// How many pending candidates the reference fallback inspects.
const FALLBACK_SCAN_LIMIT: i64 = 20;

/// Keys vendors use for the event name, checked in order before parsing.
const EVENT_NAME_KEYS: [&str; 5] = ["type", "event_type", "action", "event", "topic"];

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(ProviderName),
    #[error("Payload rejected: {0}")]
    Rejected(#[from] PaymentError),
    #[error("Unresolved: {0}")]
    Unresolved(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Processing error: {0}")]
    Processing(#[from] AppError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    Noop,
    Failed,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Noop => "noop",
            WebhookOutcome::Failed => "failed",
        }
    }
}

/// Summary of one delivery, returned to the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookReport {
    pub webhook_id: Option<Uuid>,
    pub outcome: WebhookOutcome,
    pub payment_id: Option<Uuid>,
    pub error: Option<String>,
}

/// Outcome of matching an event to a ledger row.
#[derive(Debug, Clone)]
pub enum Resolution {
    Found(Payment),
    Unresolved(String),
}

pub struct WebhookProcessor {
    registry: Arc<ProviderRegistry>,
    ledger: Arc<PaymentLedgerService>,
    payments: Arc<dyn PaymentStore>,
    webhooks: Arc<dyn WebhookStore>,
}

impl WebhookProcessor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        ledger: Arc<PaymentLedgerService>,
        payments: Arc<dyn PaymentStore>,
        webhooks: Arc<dyn WebhookStore>,
    ) -> Self {
        Self {
            registry,
            ledger,
            payments,
            webhooks,
        }
    }

    /// Persist, parse, resolve and apply one delivery. Never fails: every problem ends up
    /// in the stored record and in the returned report.
    pub async fn process_webhook(
        &self,
        provider: ProviderName,
        body: &[u8],
        headers: &HeaderMap,
    ) -> WebhookReport {
        let record = match self
            .webhooks
            .insert_webhook(NewWebhookRecord {
                provider: provider.as_str().to_string(),
                event_name: peek_event_name(body),
                raw_payload: storable_payload(body),
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(provider = %provider, error = %e, "failed to persist webhook delivery");
                return WebhookReport {
                    webhook_id: None,
                    outcome: WebhookOutcome::Failed,
                    payment_id: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let mut event_name = record.event_name.clone();
        let mut payment_id = None;
        let result = self
            .reconcile(provider, body, headers, &mut event_name, &mut payment_id)
            .await;

        match result {
            Ok(outcome) => {
                if let Err(e) = self
                    .webhooks
                    .mark_processed(record.id, event_name.as_deref(), payment_id)
                    .await
                {
                    error!(webhook_id = %record.id, error = %e, "failed to mark webhook processed");
                }
                info!(
                    webhook_id = %record.id,
                    provider = %provider,
                    event = event_name.as_deref().unwrap_or("unknown"),
                    payment_id = ?payment_id,
                    outcome = outcome.as_str(),
                    "webhook processed"
                );
                WebhookReport {
                    webhook_id: Some(record.id),
                    outcome,
                    payment_id,
                    error: None,
                }
            }
            Err(err) => {
                let message = err.to_string();
                warn!(
                    webhook_id = %record.id,
                    provider = %provider,
                    event = event_name.as_deref().unwrap_or("unknown"),
                    error = %message,
                    "webhook processing failed"
                );
                if let Err(e) = self
                    .webhooks
                    .mark_failed(record.id, event_name.as_deref(), payment_id, &message)
                    .await
                {
                    error!(webhook_id = %record.id, error = %e, "failed to record webhook failure");
                }
                WebhookReport {
                    webhook_id: Some(record.id),
                    outcome: WebhookOutcome::Failed,
                    payment_id,
                    error: Some(message),
                }
            }
        }
    }

    async fn reconcile(
        &self,
        provider: ProviderName,
        body: &[u8],
        headers: &HeaderMap,
        event_name: &mut Option<String>,
        payment_id: &mut Option<Uuid>,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let adapter = self
            .registry
            .get(provider)
            .ok_or(WebhookProcessorError::ProviderNotConfigured(provider))?;

        let event = adapter.parse_webhook(body, headers).await?;
        *event_name = Some(event.event_name.clone());

        let payment = match self.resolve(&event).await? {
            Resolution::Found(payment) => payment,
            Resolution::Unresolved(reason) if event.state.is_none() => {
                info!(
                    provider = %provider,
                    event = %event.event_name,
                    reason = %reason,
                    "stateless event for unknown payment; nothing to apply"
                );
                return Ok(WebhookOutcome::Noop);
            }
            Resolution::Unresolved(reason) => {
                return Err(WebhookProcessorError::Unresolved(reason));
            }
        };
        *payment_id = Some(payment.id);

        if let Some(observed) = &event.amount {
            check_amount(&payment, observed);
        }

        let Some(target) = event.state else {
            return Ok(WebhookOutcome::Noop);
        };

        let outcome = self
            .ledger
            .apply_transition(&payment, target, event.payment_method)
            .await?;
        Ok(match outcome {
            TransitionOutcome::Applied(_) => WebhookOutcome::Applied,
            TransitionOutcome::Noop(_) => WebhookOutcome::Noop,
        })
    }

    /// Find the payment an event refers to.
    ///
    /// A ledger id echoed back by the vendor wins, in any state. Then exact vendor-id
    /// matches (first the event's vendor id, then its correlation id). Otherwise the newest
    /// pending payment whose conversation ref, contact ref or id equals the correlation id
    /// is chosen.
    pub async fn resolve(
        &self,
        event: &CanonicalWebhookEvent,
    ) -> Result<Resolution, WebhookProcessorError> {
        if let Some(id) = event.payment_id {
            match self.payments.find_by_id(id).await? {
                Some(payment) if payment.provider == event.provider => {
                    return Ok(Resolution::Found(payment));
                }
                _ => warn!(
                    provider = %event.provider,
                    payment_id = %id,
                    "event names a payment this provider does not own; trying vendor ids"
                ),
            }
        }

        let exact_candidates = [
            event.provider_payment_id.as_deref(),
            Some(event.correlation_id.as_str()),
        ];
        for candidate in exact_candidates.into_iter().flatten() {
            if let Some(payment) = self
                .payments
                .find_by_provider_payment_id(event.provider, candidate)
                .await?
            {
                return Ok(Resolution::Found(payment));
            }
        }

        let pending = self
            .payments
            .find_pending_by_reference(event.provider, &event.correlation_id, FALLBACK_SCAN_LIMIT)
            .await?;
        Ok(select_reference_match(pending, &event.correlation_id))
    }
}

/// Pick the newest candidate. If the newest rows share a creation time but were matched
/// through different columns, the match is ambiguous and nothing is chosen.
pub fn select_reference_match(mut candidates: Vec<Payment>, reference: &str) -> Resolution {
    candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let Some(newest) = candidates.first() else {
        return Resolution::Unresolved(format!("no payment matches reference {}", reference));
    };

    let tied_columns: HashSet<MatchedBy> = candidates
        .iter()
        .take_while(|p| p.created_at == newest.created_at)
        .filter_map(|p| p.matched_by(reference))
        .collect();
    if tied_columns.len() > 1 {
        return Resolution::Unresolved(format!(
            "reference {} matches several payments created at the same time",
            reference
        ));
    }

    Resolution::Found(newest.clone())
}

/// Raw body as text for the audit column. Invalid UTF-8 is replaced and NUL bytes, which
/// Postgres text cannot hold, are escaped so the delivery is always stored.
pub fn storable_payload(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.contains('\0') {
        text.replace('\0', "\\u0000")
    } else {
        text.into_owned()
    }
}

/// Best-effort event name read straight from the raw body, before any adapter runs.
pub fn peek_event_name(body: &[u8]) -> Option<String> {
    let payload: JsonValue = serde_json::from_slice(body).ok()?;
    EVENT_NAME_KEYS
        .iter()
        .find_map(|key| payload.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}
