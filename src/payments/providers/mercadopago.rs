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
use bigdecimal::ToPrimitive;
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const PROVIDER: &str = "mercadopago";

const PAYMENT_STATUS: &[(&str, PaymentState)] = &[
    ("approved", PaymentState::Paid),
    ("pending", PaymentState::Pending),
    ("authorized", PaymentState::Pending),
    ("in_process", PaymentState::Pending),
    ("in_mediation", PaymentState::Pending),
    ("rejected", PaymentState::Pending),
    ("cancelled", PaymentState::Cancelled),
    ("refunded", PaymentState::Refunded),
    ("charged_back", PaymentState::Refunded),
];

#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub access_token: Option<String>,
    pub base_url: String,
    /// Public base of this service; used to build `notification_url`.
    pub public_base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for MercadoPagoConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            base_url: "https://api.mercadopago.com".to_string(),
            public_base_url: None,
            timeout_secs: 15,
        }
    }
}

impl MercadoPagoConfig {
    pub fn from_env(timeout_secs: u64) -> Self {
        Self {
            access_token: non_empty_env("MERCADOPAGO_ACCESS_TOKEN"),
            base_url: non_empty_env("MERCADOPAGO_BASE_URL")
                .unwrap_or_else(|| Self::default().base_url),
            public_base_url: non_empty_env("PUBLIC_BASE_URL"),
            timeout_secs,
        }
    }
}

pub struct MercadoPagoProvider {
    config: MercadoPagoConfig,
    http: PaymentHttpClient,
}

impl MercadoPagoProvider {
    pub fn new(config: MercadoPagoConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn token(&self) -> PaymentResult<&str> {
        self.config
            .access_token
            .as_deref()
            .ok_or_else(|| PaymentError::not_configured(PROVIDER))
    }

    async fn fetch_payment(&self, payment_id: &str) -> PaymentResult<(MpPayment, JsonValue)> {
        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/payments/{}", payment_id)),
                Some(self.token()?),
                None,
                &[],
            )
            .await?;
        Ok((decode(PROVIDER, &raw)?, raw))
    }

    /// Newest vendor payment for `external_reference` that was made against the ledger
    /// payment `ledger_id`. Siblings sharing the reference are skipped.
    async fn latest_payment_for(
        &self,
        external_reference: &str,
        ledger_id: Uuid,
    ) -> PaymentResult<Option<(MpPayment, JsonValue)>> {
        let request = self
            .http
            .client()
            .get(self.endpoint("/v1/payments/search"))
            .bearer_auth(self.token()?)
            .query(&[
                ("external_reference", external_reference),
                ("sort", "date_created"),
                ("criteria", "desc"),
            ]);
        let search: MpSearch = self.http.send(request).await?;
        for raw in search.results {
            let payment: MpPayment = decode(PROVIDER, &raw)?;
            if payment.ledger_id() == Some(ledger_id) {
                return Ok(Some((payment, raw)));
            }
        }
        Ok(None)
    }
}

fn method_from_type(payment_type_id: Option<&str>) -> Option<PaymentMethod> {
    payment_type_id.map(|t| match t {
        "credit_card" | "debit_card" | "prepaid_card" => PaymentMethod::Card,
        "bank_transfer" => PaymentMethod::BankTransfer,
        "ticket" | "atm" => PaymentMethod::Cash,
        "account_money" | "digital_wallet" | "digital_currency" => PaymentMethod::Wallet,
        _ => PaymentMethod::Other,
    })
}

/// The id of the resource a notification points at, from either notification format.
fn notified_payment_id(notification: &MpNotification) -> Option<String> {
    let from_data = notification.data.as_ref().and_then(|d| match &d.id {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    });
    from_data.or_else(|| {
        notification
            .resource
            .as_deref()
            .and_then(|r| r.trim_end_matches('/').rsplit('/').next())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

#[async_trait]
impl PaymentProvider for MercadoPagoProvider {
    fn name(&self) -> ProviderName {
        ProviderName::MercadoPago
    }

    fn is_configured(&self) -> bool {
        self.config.access_token.is_some()
    }

    async fn create_payment_link(&self, request: LinkRequest) -> PaymentResult<LinkResult> {
        let token = self.token()?;
        request.amount.validate_positive("amount")?;

        let items: Vec<JsonValue> = if request.items.is_empty() {
            vec![serde_json::json!({
                "title": request.description,
                "quantity": 1,
                "unit_price": request.amount.amount.to_f64(),
                "currency_id": request.amount.currency,
            })]
        } else {
            request
                .items
                .iter()
                .map(|item| {
                    serde_json::json!({
                        "title": item.name,
                        "quantity": item.quantity,
                        "unit_price": item.unit_amount.to_f64(),
                        "currency_id": request.amount.currency,
                    })
                })
                .collect()
        };

        let mut payload = serde_json::json!({
            "items": items,
            "external_reference": request.external_reference,
            "payer": {
                "name": request.customer.name,
                "email": request.customer.email,
            },
            "expires": true,
            "expiration_date_to": request.due_at.to_rfc3339(),
            "metadata": {"payment_id": request.payment_id.to_string()},
        });
        if let Some(base) = &self.config.public_base_url {
            payload["notification_url"] =
                JsonValue::String(format!("{}/webhooks/mercadopago", base.trim_end_matches('/')));
        }

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/checkout/preferences"),
                Some(token),
                Some(&payload),
                &[],
            )
            .await?;
        let preference: MpPreference = decode(PROVIDER, &raw)
            .map_err(|e| PaymentError::unavailable(PROVIDER, e.to_string()))?;
        let checkout_url = preference.init_point.clone().ok_or_else(|| {
            PaymentError::unavailable(PROVIDER, "preference returned without init_point")
        })?;
        info!(
            payment_id = %request.payment_id,
            preference_id = %preference.id,
            "mercadopago preference created"
        );

        Ok(LinkResult {
            id: request.payment_id,
            provider_payment_id: preference.id,
            checkout_url,
            qr_code: None,
            amount: request.amount,
            due_at: request.due_at,
            raw,
        })
    }

    async fn verify_payment(&self, provider_payment_id: &str) -> PaymentResult<StatusResult> {
        let preference: MpPreference = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/checkout/preferences/{}", provider_payment_id)),
                Some(self.token()?),
                None,
                &[],
            )
            .await?;

        let ledger_id = ledger_id_from(&preference.metadata);
        let (Some(reference), Some(ledger_id)) = (
            preference.external_reference.filter(|r| !r.is_empty()),
            ledger_id,
        ) else {
            return Ok(StatusResult {
                state: PaymentState::Pending,
                vendor_status: "no_reference".to_string(),
                amount: None,
                payment_method: None,
                raw: JsonValue::Null,
            });
        };

        match self.latest_payment_for(&reference, ledger_id).await? {
            Some((payment, raw)) => {
                let vendor_status = payment.status.clone().unwrap_or_default();
                Ok(StatusResult {
                    state: lookup_state(PAYMENT_STATUS, &vendor_status),
                    vendor_status,
                    amount: payment.transaction_amount.as_ref().and_then(decimal_from_json),
                    payment_method: method_from_type(payment.payment_type_id.as_deref()),
                    raw,
                })
            }
            None => Ok(StatusResult {
                state: PaymentState::Pending,
                vendor_status: "no_payment".to_string(),
                amount: None,
                payment_method: None,
                raw: JsonValue::Null,
            }),
        }
    }

    async fn parse_webhook(
        &self,
        body: &[u8],
        _headers: &HeaderMap,
    ) -> PaymentResult<CanonicalWebhookEvent> {
        let payload: JsonValue = serde_json::from_slice(body)
            .map_err(|e| PaymentError::parse(PROVIDER, format!("invalid JSON body: {}", e)))?;
        let notification: MpNotification = decode(PROVIDER, &payload)?;
        let payment_id = notified_payment_id(&notification)
            .ok_or_else(|| PaymentError::parse(PROVIDER, "notification carries no resource id"))?;
        let event_name = notification
            .action
            .clone()
            .or_else(|| notification.kind.clone())
            .or_else(|| notification.topic.clone())
            .unwrap_or_else(|| "payment".to_string());

        let topic = notification
            .kind
            .as_deref()
            .or(notification.topic.as_deref())
            .unwrap_or("payment");
        if topic != "payment" {
            return Ok(CanonicalWebhookEvent {
                provider: ProviderName::MercadoPago,
                correlation_id: payment_id,
                provider_payment_id: None,
                payment_id: None,
                event_name,
                state: None,
                amount: None,
                payment_method: None,
                payload,
            });
        }

        // Notifications only carry an id; state and reference come from the payment itself.
        match self.fetch_payment(&payment_id).await {
            Ok((payment, _)) => {
                let state = payment
                    .status
                    .as_deref()
                    .map(|s| lookup_state(PAYMENT_STATUS, s));
                let ledger_id = payment.ledger_id();
                let correlation_id = match ledger_id {
                    Some(id) => id.to_string(),
                    None => payment
                        .external_reference
                        .clone()
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| payment_id.clone()),
                };
                Ok(CanonicalWebhookEvent {
                    provider: ProviderName::MercadoPago,
                    correlation_id,
                    provider_payment_id: None,
                    payment_id: ledger_id,
                    event_name,
                    state,
                    amount: payment.transaction_amount.as_ref().and_then(decimal_from_json),
                    payment_method: method_from_type(payment.payment_type_id.as_deref()),
                    payload,
                })
            }
            Err(err) => {
                warn!(
                    payment_ref = %payment_id,
                    error = %err,
                    "mercadopago payment lookup failed; event carries no state"
                );
                Ok(CanonicalWebhookEvent {
                    provider: ProviderName::MercadoPago,
                    correlation_id: payment_id,
                    provider_payment_id: None,
                    payment_id: None,
                    event_name,
                    state: None,
                    amount: None,
                    payment_method: None,
                    payload,
                })
            }
        }
    }

    async fn cancel_payment(&self, _provider_payment_id: &str) -> PaymentResult<bool> {
        // Preferences have no void endpoint; they lapse at `expiration_date_to`.
        Ok(true)
    }
}

#[derive(Debug, Deserialize)]
struct MpPreference {
    #[serde(default)]
    id: String,
    #[serde(default)]
    init_point: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    metadata: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
struct MpPayment {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    transaction_amount: Option<JsonValue>,
    #[serde(default)]
    payment_type_id: Option<String>,
    #[serde(default)]
    metadata: JsonValue,
}

impl MpPayment {
    fn ledger_id(&self) -> Option<Uuid> {
        ledger_id_from(&self.metadata)
    }
}

/// Ledger id stored in preference metadata at creation and copied by Mercado Pago onto
/// every payment made against that preference.
fn ledger_id_from(metadata: &JsonValue) -> Option<Uuid> {
    metadata
        .get("payment_id")
        .and_then(JsonValue::as_str)
        .and_then(|id| Uuid::parse_str(id).ok())
}

#[derive(Debug, Default, Deserialize)]
struct MpSearch {
    #[serde(default)]
    results: Vec<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
struct MpNotification {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    resource: Option<String>,
    #[serde(default)]
    data: Option<MpNotificationData>,
}

#[derive(Debug, Default, Deserialize)]
struct MpNotificationData {
    #[serde(default)]
    id: JsonValue,
}
