use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    CanonicalWebhookEvent, LinkRequest, LinkResult, PaymentMethod, PaymentState, ProviderName,
    StatusResult,
};
use crate::payments::utils::{
    decimal_from_json, decode, lookup_state, non_empty_env, PaymentHttpClient,
};
use async_trait::async_trait;
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PROVIDER: &str = "paypal";

/// Tokens are refreshed this long before PayPal says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const ORDER_STATUS: &[(&str, PaymentState)] = &[
    ("CREATED", PaymentState::Pending),
    ("SAVED", PaymentState::Pending),
    ("APPROVED", PaymentState::Pending),
    ("PAYER_ACTION_REQUIRED", PaymentState::Pending),
    ("COMPLETED", PaymentState::Paid),
    ("VOIDED", PaymentState::Cancelled),
];

/// Buyer approved the order; funds move only once the order is captured.
const ORDER_APPROVED_EVENT: &str = "CHECKOUT.ORDER.APPROVED";

const EVENT_STATES: &[(&str, PaymentState)] = &[
    ("CHECKOUT.ORDER.COMPLETED", PaymentState::Paid),
    ("PAYMENT.CAPTURE.COMPLETED", PaymentState::Paid),
    ("PAYMENT.CAPTURE.REFUNDED", PaymentState::Refunded),
    ("PAYMENT.CAPTURE.REVERSED", PaymentState::Refunded),
    ("CHECKOUT.ORDER.VOIDED", PaymentState::Cancelled),
];

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for PaypalConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            base_url: "https://api-m.paypal.com".to_string(),
            timeout_secs: 15,
        }
    }
}

impl PaypalConfig {
    pub fn from_env(timeout_secs: u64) -> Self {
        Self {
            client_id: non_empty_env("PAYPAL_CLIENT_ID"),
            client_secret: non_empty_env("PAYPAL_CLIENT_SECRET"),
            base_url: non_empty_env("PAYPAL_BASE_URL")
                .unwrap_or_else(|| Self::default().base_url),
            timeout_secs,
        }
    }
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct PaypalProvider {
    config: PaypalConfig,
    http: PaymentHttpClient,
    token: Mutex<Option<CachedToken>>,
}

impl PaypalProvider {
    pub fn new(config: PaypalConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Bearer token for the next call, fetched with client credentials when the cached one
    /// is missing or about to expire.
    async fn access_token(&self) -> PaymentResult<String> {
        let (Some(client_id), Some(client_secret)) = (
            self.config.client_id.as_deref(),
            self.config.client_secret.as_deref(),
        ) else {
            return Err(PaymentError::not_configured(PROVIDER));
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(token.access_token.clone());
            }
        }

        let request = self
            .http
            .client()
            .post(self.endpoint("/v1/oauth2/token"))
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")]);
        let fresh: PaypalToken = self.http.send(request).await?;
        debug!(expires_in = fresh.expires_in, "paypal access token refreshed");

        let access_token = fresh.access_token.clone();
        *cached = Some(CachedToken {
            access_token: fresh.access_token,
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
        });
        Ok(access_token)
    }

    async fn call(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> PaymentResult<JsonValue> {
        let token = self.access_token().await?;
        self.http
            .request_json(method, &self.endpoint(path), Some(&token), body, &[])
            .await
    }

    async fn fetch_order(&self, order_id: &str) -> PaymentResult<(PaypalOrder, JsonValue)> {
        let raw = self
            .call(
                reqwest::Method::GET,
                &format!("/v2/checkout/orders/{}", order_id),
                None,
            )
            .await?;
        Ok((decode(PROVIDER, &raw)?, raw))
    }

    /// Capture an approved order. The request id is derived from the order, so repeated
    /// deliveries replay the same capture instead of charging twice. When the capture call
    /// fails the order is re-read, which covers orders captured by an earlier attempt.
    async fn capture_order(&self, order_id: &str) -> PaymentResult<(PaypalOrder, JsonValue)> {
        let token = self.access_token().await?;
        let request_id = format!("capture-{}", order_id);
        let captured = self
            .http
            .request_json::<JsonValue>(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v2/checkout/orders/{}/capture", order_id)),
                Some(&token),
                Some(&serde_json::json!({})),
                &[("PayPal-Request-Id", request_id.as_str())],
            )
            .await;

        match captured {
            Ok(raw) => {
                info!(order_id = %order_id, "paypal order captured");
                Ok((decode(PROVIDER, &raw)?, raw))
            }
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "paypal capture failed; re-reading order");
                self.fetch_order(order_id).await
            }
        }
    }
}

#[async_trait]
impl PaymentProvider for PaypalProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Paypal
    }

    fn is_configured(&self) -> bool {
        self.config.client_id.is_some() && self.config.client_secret.is_some()
    }

    async fn create_payment_link(&self, request: LinkRequest) -> PaymentResult<LinkResult> {
        request.amount.validate_positive("amount")?;
        let payload = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.payment_id.to_string(),
                "custom_id": request.external_reference,
                "description": request.description,
                "amount": {
                    "currency_code": request.amount.currency,
                    "value": request.amount.decimal_string(),
                },
            }],
        });

        let raw = self
            .call(reqwest::Method::POST, "/v2/checkout/orders", Some(&payload))
            .await?;
        let order: PaypalOrder = decode(PROVIDER, &raw)
            .map_err(|e| PaymentError::unavailable(PROVIDER, e.to_string()))?;
        let checkout_url = order
            .links
            .iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href.clone())
            .ok_or_else(|| PaymentError::unavailable(PROVIDER, "order returned without approve link"))?;
        info!(
            payment_id = %request.payment_id,
            order_id = %order.id,
            "paypal order created"
        );

        Ok(LinkResult {
            id: request.payment_id,
            provider_payment_id: order.id,
            checkout_url,
            qr_code: None,
            amount: request.amount,
            due_at: request.due_at,
            raw,
        })
    }

    async fn verify_payment(&self, provider_payment_id: &str) -> PaymentResult<StatusResult> {
        let (mut order, mut raw) = self.fetch_order(provider_payment_id).await?;
        if order.status.as_deref() == Some("APPROVED") {
            (order, raw) = self.capture_order(provider_payment_id).await?;
        }
        let vendor_status = order.status.clone().unwrap_or_default();

        Ok(StatusResult {
            state: lookup_state(ORDER_STATUS, &vendor_status),
            vendor_status,
            amount: order
                .purchase_units
                .first()
                .and_then(|unit| unit.amount.as_ref())
                .and_then(|amount| decimal_from_json(&amount.value)),
            payment_method: Some(PaymentMethod::Wallet),
            raw,
        })
    }

    async fn parse_webhook(
        &self,
        body: &[u8],
        _headers: &HeaderMap,
    ) -> PaymentResult<CanonicalWebhookEvent> {
        let payload: JsonValue = serde_json::from_slice(body)
            .map_err(|e| PaymentError::parse(PROVIDER, format!("invalid JSON body: {}", e)))?;
        let event: PaypalEvent = decode(PROVIDER, &payload)?;
        let resource = event.resource;
        let first_unit = resource.purchase_units.first();

        let correlation_id = resource
            .custom_id
            .clone()
            .or_else(|| first_unit.and_then(|u| u.custom_id.clone()))
            .or_else(|| Some(resource.id.clone()))
            .filter(|c| !c.is_empty())
            .ok_or_else(|| PaymentError::parse(PROVIDER, "event carries no reference"))?;

        let order_id = if event.event_type.starts_with("CHECKOUT.ORDER.") {
            Some(resource.id.clone())
        } else {
            resource
                .supplementary_data
                .as_ref()
                .and_then(|s| s.related_ids.order_id.clone())
        };
        let provider_payment_id = order_id.filter(|id| !id.is_empty());

        let mut state = EVENT_STATES
            .iter()
            .find(|(name, _)| *name == event.event_type)
            .map(|(_, state)| *state);
        if event.event_type == ORDER_APPROVED_EVENT && !resource.id.is_empty() {
            match self.capture_order(&resource.id).await {
                Ok((order, _)) => {
                    state = order
                        .status
                        .as_deref()
                        .map(|s| lookup_state(ORDER_STATUS, s));
                }
                Err(err) => warn!(
                    order_id = %resource.id,
                    error = %err,
                    "paypal capture after approval failed; event carries no state"
                ),
            }
        }
        let payment_id = first_unit
            .and_then(|u| u.reference_id.as_deref())
            .and_then(|id| Uuid::parse_str(id).ok());
        let amount = resource
            .amount
            .as_ref()
            .or_else(|| first_unit.and_then(|u| u.amount.as_ref()))
            .and_then(|a| decimal_from_json(&a.value));

        Ok(CanonicalWebhookEvent {
            provider: ProviderName::Paypal,
            correlation_id,
            provider_payment_id,
            payment_id,
            event_name: event.event_type,
            state,
            amount,
            payment_method: Some(PaymentMethod::Wallet),
            payload,
        })
    }

    async fn cancel_payment(&self, _provider_payment_id: &str) -> PaymentResult<bool> {
        // Uncaptured orders simply lapse.
        Ok(true)
    }
}

#[derive(Debug, Deserialize)]
struct PaypalToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Default, Deserialize)]
struct PaypalLink {
    #[serde(default)]
    href: String,
    #[serde(default)]
    rel: String,
}

#[derive(Debug, Default, Deserialize)]
struct PaypalAmount {
    #[serde(default)]
    value: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
struct PaypalPurchaseUnit {
    #[serde(default)]
    reference_id: Option<String>,
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    amount: Option<PaypalAmount>,
}

#[derive(Debug, Default, Deserialize)]
struct PaypalOrder {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    links: Vec<PaypalLink>,
    #[serde(default)]
    purchase_units: Vec<PaypalPurchaseUnit>,
}

#[derive(Debug, Default, Deserialize)]
struct PaypalRelatedIds {
    #[serde(default)]
    order_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PaypalSupplementaryData {
    #[serde(default)]
    related_ids: PaypalRelatedIds,
}

#[derive(Debug, Default, Deserialize)]
struct PaypalResource {
    #[serde(default)]
    id: String,
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    amount: Option<PaypalAmount>,
    #[serde(default)]
    purchase_units: Vec<PaypalPurchaseUnit>,
    #[serde(default)]
    supplementary_data: Option<PaypalSupplementaryData>,
}

#[derive(Debug, Default, Deserialize)]
struct PaypalEvent {
    #[serde(default)]
    event_type: String,
    #[serde(default)]
    resource: PaypalResource,
}
