//! Payment ledger service: the only component that writes payment state.
//!
//! Every state change, whether it comes from an operator cancel, an on-demand verify or a
//! webhook, goes through [`PaymentLedgerService::apply_transition`], which relies on the
//! store's conditional update to make concurrent and duplicate attempts collapse into a
//! single transition.

use crate::database::models::{Payment, PaymentFilter, PaymentItem, StateTransition};
use crate::database::repository::PaymentStore;
use crate::error::{AppError, AppResult};
use crate::payments::registry::ProviderRegistry;
use crate::payments::types::{
    LineItem, LinkRequest, Money, PaymentIntent, PaymentMethod, PaymentState, ProviderName,
    StatusResult,
};
use bigdecimal::{BigDecimal, Zero};
use chrono::{Duration, Utc};
use regex::Regex;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::notification::NotificationDispatcher;

pub const DEFAULT_DUE_DAYS: u32 = 7;
const MAX_DUE_DAYS: u32 = 365;

fn is_iso_currency(code: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Z]{3}$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(code))
}

/// Result of a guarded state change.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The write happened; carries the updated payment.
    Applied(Payment),
    /// The guard rejected the write (already transitioned, or not a legal move); carries
    /// the payment as currently stored.
    Noop(Payment),
}

impl TransitionOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            TransitionOutcome::Applied(p) | TransitionOutcome::Noop(p) => p,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            TransitionOutcome::Applied(p) | TransitionOutcome::Noop(p) => p,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransitionOutcome::Applied(_) => "applied",
            TransitionOutcome::Noop(_) => "noop",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub outcome: TransitionOutcome,
    pub vendor_status: String,
}

pub struct PaymentLedgerService {
    registry: Arc<ProviderRegistry>,
    payments: Arc<dyn PaymentStore>,
    notifier: Arc<NotificationDispatcher>,
    default_due_days: u32,
}

impl PaymentLedgerService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        payments: Arc<dyn PaymentStore>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            registry,
            payments,
            notifier,
            default_due_days: DEFAULT_DUE_DAYS,
        }
    }

    pub fn with_default_due_days(mut self, days: u32) -> Self {
        self.default_due_days = days.clamp(1, MAX_DUE_DAYS);
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Issue a vendor payment link and record it as `pending`.
    pub async fn create(&self, intent: PaymentIntent) -> AppResult<Payment> {
        let provider = ProviderName::from_str(&intent.provider)?;
        let currency = intent.currency.trim().to_uppercase();
        validate_intent(&intent, &currency)?;

        let adapter = self.registry.get(provider).ok_or_else(|| AppError::NotFound {
            entity: "Provider".to_string(),
            id: provider.to_string(),
        })?;

        let due_days = intent.due_days.unwrap_or(self.default_due_days);
        let due_at = Utc::now() + Duration::days(i64::from(due_days));
        let payment_id = Uuid::new_v4();
        let external_reference = external_reference(&intent, payment_id);

        let link = adapter
            .create_payment_link(LinkRequest {
                payment_id,
                external_reference: external_reference.clone(),
                amount: Money {
                    amount: intent.amount.clone(),
                    currency: currency.clone(),
                },
                description: intent.description.clone(),
                customer: intent.customer.clone(),
                items: intent.items.clone(),
                due_at,
                metadata: intent.metadata.clone(),
            })
            .await?;

        let now = Utc::now();
        let payment = Payment {
            id: payment_id,
            provider,
            provider_payment_id: Some(link.provider_payment_id.clone()),
            amount: intent.amount,
            currency,
            state: PaymentState::Pending,
            checkout_url: link.checkout_url,
            qr_code: link.qr_code,
            description: intent.description,
            customer_name: intent.customer.name,
            customer_email: intent.customer.email,
            customer_phone: intent.customer.phone,
            due_at: link.due_at,
            paid_at: None,
            payment_method: None,
            metadata: intent.metadata.unwrap_or_else(|| serde_json::json!({})),
            conversation_ref: non_blank(intent.conversation_ref),
            contact_ref: non_blank(intent.contact_ref),
            external_reference,
            created_by: intent.created_by,
            created_at: now,
            updated_at: now,
        };

        // The vendor link exists from here on; a local failure cannot be rolled back.
        let stored = self.payments.insert_payment(&payment).await.map_err(|e| {
            error!(
                payment_id = %payment_id,
                provider = %provider,
                provider_payment_id = %link.provider_payment_id,
                error = %e,
                "payment created at vendor but ledger write failed"
            );
            AppError::LedgerWriteFailedAfterExternalCreate {
                provider: provider.to_string(),
                provider_payment_id: link.provider_payment_id.clone(),
                message: e.to_string(),
            }
        })?;

        let items = build_items(payment_id, &intent.items);
        if let Err(e) = self.payments.insert_items(&items).await {
            error!(
                payment_id = %payment_id,
                error = %e,
                "payment stored but line items could not be written"
            );
            return Err(AppError::LedgerWriteFailedAfterExternalCreate {
                provider: provider.to_string(),
                provider_payment_id: link.provider_payment_id,
                message: e.to_string(),
            });
        }

        info!(
            payment_id = %stored.id,
            provider = %provider,
            external_reference = %stored.external_reference,
            amount = %stored.amount,
            currency = %stored.currency,
            "payment link created"
        );
        self.supersede_pending(&stored).await;
        Ok(stored)
    }

    /// Cancel older pending payments issued under the same provider and external reference,
    /// leaving `current` as the only cancellable one. Failures are logged; the new link
    /// already exists and is returned regardless.
    async fn supersede_pending(&self, current: &Payment) {
        let previous = match self
            .payments
            .find_pending_by_external_reference(current.provider, &current.external_reference)
            .await
        {
            Ok(previous) => previous,
            Err(e) => {
                warn!(
                    payment_id = %current.id,
                    error = %e,
                    "could not look up earlier pending payments to supersede"
                );
                return;
            }
        };

        for older in previous.into_iter().filter(|p| p.id != current.id) {
            if let (Some(adapter), Some(vendor_id)) = (
                self.registry.get(older.provider),
                older.provider_payment_id.as_deref(),
            ) {
                if let Err(e) = adapter.cancel_payment(vendor_id).await {
                    warn!(
                        payment_id = %older.id,
                        error = %e,
                        "vendor cancel of superseded payment failed; cancelling locally"
                    );
                }
            }
            match self
                .apply_transition(&older, PaymentState::Cancelled, None)
                .await
            {
                Ok(outcome) => info!(
                    payment_id = %older.id,
                    superseded_by = %current.id,
                    outcome = outcome.label(),
                    "earlier pending payment superseded"
                ),
                Err(e) => warn!(
                    payment_id = %older.id,
                    error = %e,
                    "failed to supersede earlier pending payment"
                ),
            }
        }
    }

    pub async fn get(&self, payment_id: Uuid) -> AppResult<Payment> {
        self.payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                entity: "Payment".to_string(),
                id: payment_id.to_string(),
            })
    }

    pub async fn items(&self, payment_id: Uuid) -> AppResult<Vec<PaymentItem>> {
        self.get(payment_id).await?;
        Ok(self.payments.find_items(payment_id).await?)
    }

    pub async fn query(&self, filter: PaymentFilter) -> AppResult<Vec<Payment>> {
        Ok(self.payments.query(&filter).await?)
    }

    /// Operator cancel; only pending payments can be cancelled.
    pub async fn cancel(&self, payment_id: Uuid) -> AppResult<Payment> {
        let payment = self.get(payment_id).await?;
        if payment.state != PaymentState::Pending {
            return Err(AppError::InvalidTransition {
                payment_id,
                from: payment.state,
                to: PaymentState::Cancelled,
            });
        }

        match (
            self.registry.get(payment.provider),
            payment.provider_payment_id.as_deref(),
        ) {
            (Some(adapter), Some(vendor_id)) => match adapter.cancel_payment(vendor_id).await {
                Ok(cancelled) => info!(
                    payment_id = %payment_id,
                    provider = %payment.provider,
                    cancelled,
                    "vendor cancel attempted"
                ),
                Err(e) => warn!(
                    payment_id = %payment_id,
                    provider = %payment.provider,
                    error = %e,
                    "vendor cancel failed; cancelling locally"
                ),
            },
            _ => warn!(
                payment_id = %payment_id,
                provider = %payment.provider,
                "no adapter or vendor id for cancel; cancelling locally"
            ),
        }

        match self
            .apply_transition(&payment, PaymentState::Cancelled, None)
            .await?
        {
            TransitionOutcome::Applied(updated) => Ok(updated),
            TransitionOutcome::Noop(current) => Err(AppError::InvalidTransition {
                payment_id,
                from: current.state,
                to: PaymentState::Cancelled,
            }),
        }
    }

    /// Poll the vendor for the current status and apply it like a webhook would.
    pub async fn verify(&self, payment_id: Uuid) -> AppResult<VerifyResult> {
        let payment = self.get(payment_id).await?;
        let adapter = self
            .registry
            .get(payment.provider)
            .ok_or_else(|| AppError::Configuration {
                provider: payment.provider.to_string(),
                message: "provider is not configured".to_string(),
            })?;
        let vendor_id = payment
            .provider_payment_id
            .clone()
            .ok_or_else(|| AppError::Validation {
                message: "payment has no vendor identifier to verify".to_string(),
                field: Some("provider_payment_id".to_string()),
            })?;

        let status: StatusResult = adapter.verify_payment(&vendor_id).await?;
        if let Some(observed) = &status.amount {
            check_amount(&payment, observed);
        }

        let outcome = if status.state == payment.state {
            TransitionOutcome::Noop(payment)
        } else {
            self.apply_transition(&payment, status.state, status.payment_method)
                .await?
        };
        info!(
            payment_id = %payment_id,
            vendor_status = %status.vendor_status,
            outcome = outcome.label(),
            "payment verified against vendor"
        );

        Ok(VerifyResult {
            outcome,
            vendor_status: status.vendor_status,
        })
    }

    /// The single enforcement point of the transition table.
    ///
    /// The store writes only if the row is still in one of `target.allowed_predecessors()`,
    /// so two racing callers cannot both succeed. A paid notification is sent only by the
    /// caller whose write landed.
    pub async fn apply_transition(
        &self,
        payment: &Payment,
        target: PaymentState,
        payment_method: Option<PaymentMethod>,
    ) -> AppResult<TransitionOutcome> {
        if !payment.state.can_transition_to(target) {
            return Ok(TransitionOutcome::Noop(payment.clone()));
        }

        let transition = StateTransition {
            target,
            paid_at: (target == PaymentState::Paid).then(Utc::now),
            payment_method,
        };

        match self.payments.transition(payment.id, &transition).await? {
            Some(updated) => {
                info!(
                    payment_id = %updated.id,
                    provider = %updated.provider,
                    from = %payment.state,
                    to = %target,
                    "payment state transitioned"
                );
                if target == PaymentState::Paid {
                    self.notifier.dispatch_paid(updated.clone());
                }
                Ok(TransitionOutcome::Applied(updated))
            }
            None => {
                let current = self.get(payment.id).await?;
                info!(
                    payment_id = %payment.id,
                    state = %current.state,
                    requested = %target,
                    "transition not applied; payment already moved"
                );
                Ok(TransitionOutcome::Noop(current))
            }
        }
    }
}

/// Log when a vendor reports a different amount. The ledger amount is never overwritten.
pub fn check_amount(payment: &Payment, observed: &BigDecimal) -> bool {
    if observed != &payment.amount {
        warn!(
            payment_id = %payment.id,
            ledger_amount = %payment.amount,
            vendor_amount = %observed,
            "vendor amount differs from ledger amount"
        );
        return false;
    }
    true
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Reference handed to the vendor: conversation ref, else contact ref, else the payment id.
pub fn external_reference(intent: &PaymentIntent, payment_id: Uuid) -> String {
    non_blank(intent.conversation_ref.clone())
        .or_else(|| non_blank(intent.contact_ref.clone()))
        .unwrap_or_else(|| payment_id.to_string())
}

fn validation(message: impl Into<String>, field: &str) -> AppError {
    AppError::Validation {
        message: message.into(),
        field: Some(field.to_string()),
    }
}

fn validate_intent(intent: &PaymentIntent, currency: &str) -> AppResult<()> {
    if intent.amount <= BigDecimal::zero() {
        return Err(validation("amount must be greater than zero", "amount"));
    }
    if !is_iso_currency(currency) {
        return Err(validation(
            "currency must be a three-letter ISO-4217 code",
            "currency",
        ));
    }
    if intent.description.trim().is_empty() {
        return Err(validation("description is required", "description"));
    }
    if intent.customer.name.trim().is_empty() {
        return Err(validation("customer name is required", "customer.name"));
    }
    if let Some(days) = intent.due_days {
        if !(1..=MAX_DUE_DAYS).contains(&days) {
            return Err(validation(
                format!("due_days must be between 1 and {}", MAX_DUE_DAYS),
                "due_days",
            ));
        }
    }
    for item in &intent.items {
        if item.name.trim().is_empty() {
            return Err(validation("item name is required", "items.name"));
        }
        if item.quantity <= 0 {
            return Err(validation("item quantity must be positive", "items.quantity"));
        }
        if item.unit_amount <= BigDecimal::zero() {
            return Err(validation(
                "item unit_amount must be greater than zero",
                "items.unit_amount",
            ));
        }
    }
    Ok(())
}

fn build_items(payment_id: Uuid, items: &[LineItem]) -> Vec<PaymentItem> {
    let now = Utc::now();
    items
        .iter()
        .map(|item| PaymentItem {
            id: Uuid::new_v4(),
            payment_id,
            name: item.name.clone(),
            quantity: item.quantity,
            unit_amount: item.unit_amount.clone(),
            created_at: now,
        })
        .collect()
}
