use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    CanonicalWebhookEvent, LinkRequest, LinkResult, Money, PaymentMethod, PaymentState,
    ProviderName, StatusResult,
};
use crate::payments::utils::{
    decode, hmac_sha256_hex, lookup_state, non_empty_env, secure_eq, PaymentHttpClient,
};
use async_trait::async_trait;
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const PROVIDER: &str = "stripe";
const SIGNATURE_HEADER: &str = "stripe-signature";
const REFERENCE_KEY: &str = "referencia_externa";
const PAYMENT_ID_KEY: &str = "payment_id";

const SESSION_STATUS: &[(&str, PaymentState)] = &[
    ("open", PaymentState::Pending),
    ("complete", PaymentState::Paid),
    ("expired", PaymentState::Expired),
];

const EVENT_STATES: &[(&str, PaymentState)] = &[
    ("checkout.session.completed", PaymentState::Paid),
    ("checkout.session.async_payment_succeeded", PaymentState::Paid),
    ("checkout.session.expired", PaymentState::Expired),
    ("charge.refunded", PaymentState::Refunded),
];

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub success_url: String,
    pub cancel_url: String,
    pub timeout_secs: u64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            base_url: "https://api.stripe.com/v1".to_string(),
            success_url: "https://example.com/payments/success".to_string(),
            cancel_url: "https://example.com/payments/cancel".to_string(),
            timeout_secs: 15,
        }
    }
}

impl StripeConfig {
    pub fn from_env(timeout_secs: u64) -> Self {
        let defaults = Self::default();
        Self {
            secret_key: non_empty_env("STRIPE_SECRET_KEY"),
            webhook_secret: non_empty_env("STRIPE_WEBHOOK_SECRET"),
            base_url: non_empty_env("STRIPE_BASE_URL").unwrap_or(defaults.base_url),
            success_url: non_empty_env("STRIPE_SUCCESS_URL").unwrap_or(defaults.success_url),
            cancel_url: non_empty_env("STRIPE_CANCEL_URL").unwrap_or(defaults.cancel_url),
            timeout_secs,
        }
    }
}

pub struct StripeProvider {
    config: StripeConfig,
    http: PaymentHttpClient,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn secret_key(&self) -> PaymentResult<&str> {
        self.config
            .secret_key
            .as_deref()
            .ok_or_else(|| PaymentError::not_configured(PROVIDER))
    }

    fn checkout_form(&self, request: &LinkRequest) -> PaymentResult<Vec<(String, String)>> {
        let currency = request.amount.currency.to_lowercase();
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.config.success_url.clone()),
            ("cancel_url".to_string(), self.config.cancel_url.clone()),
            (
                "client_reference_id".to_string(),
                request.external_reference.clone(),
            ),
            (
                format!("metadata[{}]", REFERENCE_KEY),
                request.external_reference.clone(),
            ),
            (
                format!("metadata[{}]", PAYMENT_ID_KEY),
                request.payment_id.to_string(),
            ),
            (
                format!("payment_intent_data[metadata][{}]", REFERENCE_KEY),
                request.external_reference.clone(),
            ),
            (
                format!("payment_intent_data[metadata][{}]", PAYMENT_ID_KEY),
                request.payment_id.to_string(),
            ),
        ];

        if request.items.is_empty() {
            form.extend(line_item(
                0,
                &request.description,
                1,
                request.amount.to_minor_units()?,
                &currency,
            ));
        } else {
            for (idx, item) in request.items.iter().enumerate() {
                let unit = Money {
                    amount: item.unit_amount.clone(),
                    currency: currency.clone(),
                };
                form.extend(line_item(
                    idx,
                    &item.name,
                    item.quantity,
                    unit.to_minor_units()?,
                    &currency,
                ));
            }
        }

        if let Some(email) = request.customer.email.as_deref().filter(|e| !e.is_empty()) {
            form.push(("customer_email".to_string(), email.to_string()));
        }
        Ok(form)
    }
}

fn line_item(
    idx: usize,
    name: &str,
    quantity: i32,
    unit_minor: i64,
    currency: &str,
) -> Vec<(String, String)> {
    let prefix = format!("line_items[{}]", idx);
    vec![
        (format!("{}[quantity]", prefix), quantity.to_string()),
        (
            format!("{}[price_data][currency]", prefix),
            currency.to_string(),
        ),
        (
            format!("{}[price_data][unit_amount]", prefix),
            unit_minor.to_string(),
        ),
        (
            format!("{}[price_data][product_data][name]", prefix),
            name.to_string(),
        ),
    ]
}

/// Check a `Stripe-Signature` header against the raw body.
///
/// Accepts Stripe's `t=<ts>,v1=<hex>[,v1=<hex>]` form (signed content `<ts>.<body>`) as well
/// as a bare hex digest of the body.
pub fn verify_stripe_signature(body: &[u8], header: &str, secret: &str) -> bool {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value.trim()),
            Some(("v1", value)) => candidates.push(value.trim()),
            _ => {}
        }
    }

    let (signed, candidates) = match timestamp {
        Some(ts) if !candidates.is_empty() => {
            let mut signed = Vec::with_capacity(ts.len() + 1 + body.len());
            signed.extend_from_slice(ts.as_bytes());
            signed.push(b'.');
            signed.extend_from_slice(body);
            (signed, candidates)
        }
        _ => (body.to_vec(), vec![header.trim()]),
    };

    let Some(expected) = hmac_sha256_hex(secret.as_bytes(), &signed) else {
        return false;
    };
    candidates.iter().any(|candidate| {
        secure_eq(
            expected.as_bytes(),
            candidate.to_ascii_lowercase().as_bytes(),
        )
    })
}

fn method_from_types(types: &[String]) -> Option<PaymentMethod> {
    types.first().map(|t| match t.as_str() {
        "card" => PaymentMethod::Card,
        "customer_balance" | "us_bank_account" | "sepa_debit" | "bacs_debit" => {
            PaymentMethod::BankTransfer
        }
        "oxxo" | "boleto" | "konbini" => PaymentMethod::Cash,
        "link" | "paypal" | "cashapp" => PaymentMethod::Wallet,
        _ => PaymentMethod::Other,
    })
}

fn session_state(session: &StripeSession) -> PaymentState {
    let state = lookup_state(SESSION_STATUS, session.status.as_deref().unwrap_or(""));
    // A completed session with a delayed method (boleto, bank debit) is not paid yet.
    if state == PaymentState::Paid
        && !matches!(
            session.payment_status.as_deref(),
            Some("paid") | Some("no_payment_required")
        )
    {
        return PaymentState::Pending;
    }
    state
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Stripe
    }

    fn is_configured(&self) -> bool {
        self.config.secret_key.is_some()
    }

    async fn create_payment_link(&self, request: LinkRequest) -> PaymentResult<LinkResult> {
        let secret = self.secret_key()?;
        request.amount.validate_positive("amount")?;
        let form = self.checkout_form(&request)?;

        let raw: JsonValue = self
            .http
            .request_form(&self.endpoint("/checkout/sessions"), Some(secret), &form)
            .await?;
        let session: StripeSession = decode(PROVIDER, &raw)
            .map_err(|e| PaymentError::unavailable(PROVIDER, e.to_string()))?;
        let checkout_url = session.url.clone().ok_or_else(|| {
            PaymentError::unavailable(PROVIDER, "checkout session returned without url")
        })?;
        info!(
            payment_id = %request.payment_id,
            session_id = %session.id,
            "stripe checkout session created"
        );

        Ok(LinkResult {
            id: request.payment_id,
            provider_payment_id: session.id,
            checkout_url,
            qr_code: None,
            amount: request.amount,
            due_at: request.due_at,
            raw,
        })
    }

    async fn verify_payment(&self, provider_payment_id: &str) -> PaymentResult<StatusResult> {
        let secret = self.secret_key()?;
        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/checkout/sessions/{}", provider_payment_id)),
                Some(secret),
                None,
                &[],
            )
            .await?;
        let session: StripeSession = decode(PROVIDER, &raw)?;

        Ok(StatusResult {
            state: session_state(&session),
            vendor_status: format!(
                "{}/{}",
                session.status.as_deref().unwrap_or("unknown"),
                session.payment_status.as_deref().unwrap_or("unknown")
            ),
            amount: session
                .amount_total
                .map(|minor| Money::from_minor_units(minor, session.currency_code()).amount),
            payment_method: method_from_types(&session.payment_method_types),
            raw,
        })
    }

    async fn parse_webhook(
        &self,
        body: &[u8],
        headers: &HeaderMap,
    ) -> PaymentResult<CanonicalWebhookEvent> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if let (Some(secret), Some(signature)) = (self.config.webhook_secret.as_deref(), signature)
        {
            if !verify_stripe_signature(body, signature, secret) {
                return Err(PaymentError::SignatureInvalid {
                    provider: PROVIDER.to_string(),
                    message: "Stripe-Signature does not match payload".to_string(),
                });
            }
        } else if self.config.webhook_secret.is_some() {
            warn!("stripe webhook received without signature header; accepting unverified");
        }

        let payload: JsonValue = serde_json::from_slice(body)
            .map_err(|e| PaymentError::parse(PROVIDER, format!("invalid JSON body: {}", e)))?;
        let event: StripeEvent = decode(PROVIDER, &payload)?;
        let object: StripeSession = serde_json::from_value(event.data.object.clone())
            .unwrap_or_default();

        let correlation_id = object
            .metadata
            .get(REFERENCE_KEY)
            .cloned()
            .or_else(|| object.client_reference_id.clone())
            .or_else(|| (!object.id.is_empty()).then(|| object.id.clone()))
            .ok_or_else(|| PaymentError::parse(PROVIDER, "event carries no reference"))?;

        let state = EVENT_STATES
            .iter()
            .find(|(name, _)| *name == event.event_type)
            .map(|(_, state)| *state);
        let minor = object.amount_total.or(object.amount);
        // Charges inherit the payment intent metadata, so refunds carry the ledger id too.
        let payment_id = object
            .metadata
            .get(PAYMENT_ID_KEY)
            .and_then(|id| Uuid::parse_str(id).ok());
        let provider_payment_id = if event.event_type.starts_with("checkout.session.") {
            Some(object.id.clone()).filter(|id| !id.is_empty())
        } else {
            None
        };

        Ok(CanonicalWebhookEvent {
            provider: ProviderName::Stripe,
            correlation_id,
            provider_payment_id,
            payment_id,
            event_name: event.event_type,
            state,
            amount: minor.map(|m| Money::from_minor_units(m, object.currency_code()).amount),
            payment_method: method_from_types(&object.payment_method_types),
            payload,
        })
    }

    async fn cancel_payment(&self, provider_payment_id: &str) -> PaymentResult<bool> {
        let secret = self.secret_key()?;
        let session: StripeSession = self
            .http
            .request_form(
                &self.endpoint(&format!("/checkout/sessions/{}/expire", provider_payment_id)),
                Some(secret),
                &[],
            )
            .await?;
        Ok(session.status.as_deref() == Some("expired"))
    }
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    data: StripeEventData,
}

#[derive(Debug, Default, Deserialize)]
struct StripeEventData {
    #[serde(default)]
    object: JsonValue,
}

/// Fields shared by checkout sessions and charges that the adapter reads.
#[derive(Debug, Default, Deserialize)]
struct StripeSession {
    #[serde(default)]
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    payment_method_types: Vec<String>,
    #[serde(default)]
    currency: Option<String>,
}

impl StripeSession {
    fn currency_code(&self) -> String {
        self.currency.as_deref().unwrap_or_default().to_uppercase()
    }
}
