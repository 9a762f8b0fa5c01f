use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    CanonicalWebhookEvent, LinkRequest, LinkResult, PaymentMethod, PaymentState, ProviderName,
    StatusResult,
};
use crate::payments::utils::{
    decimal_from_json, decode, hmac_sha256_hex, lookup_state, non_empty_env, PaymentHttpClient,
};
use async_trait::async_trait;
use bigdecimal::ToPrimitive;
use chrono::{SecondsFormat, Utc};
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

const PROVIDER: &str = "dlocal";

const PAYMENT_STATUS: &[(&str, PaymentState)] = &[
    ("PENDING", PaymentState::Pending),
    ("PAID", PaymentState::Paid),
    ("REJECTED", PaymentState::Pending),
    ("CANCELLED", PaymentState::Cancelled),
    ("EXPIRED", PaymentState::Expired),
    ("REFUNDED", PaymentState::Refunded),
];

#[derive(Debug, Clone)]
pub struct DlocalConfig {
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub base_url: String,
    pub country: String,
    pub public_base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DlocalConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            secret_key: None,
            base_url: "https://api.dlocalgo.com".to_string(),
            country: "AR".to_string(),
            public_base_url: None,
            timeout_secs: 15,
        }
    }
}

impl DlocalConfig {
    pub fn from_env(timeout_secs: u64) -> Self {
        let defaults = Self::default();
        Self {
            api_key: non_empty_env("DLOCAL_API_KEY"),
            secret_key: non_empty_env("DLOCAL_SECRET_KEY"),
            base_url: non_empty_env("DLOCAL_BASE_URL").unwrap_or(defaults.base_url),
            country: non_empty_env("DLOCAL_COUNTRY").unwrap_or(defaults.country),
            public_base_url: non_empty_env("PUBLIC_BASE_URL"),
            timeout_secs,
        }
    }
}

/// `Authorization` value for an outbound request stamped with `timestamp`.
pub fn sign_request(api_key: &str, secret_key: &str, timestamp: &str) -> Option<String> {
    let digest = hmac_sha256_hex(
        secret_key.as_bytes(),
        format!("{}{}", api_key, timestamp).as_bytes(),
    )?;
    Some(format!("V2-HMAC-SHA256, Signature: {}", digest))
}

pub struct DlocalProvider {
    config: DlocalConfig,
    http: PaymentHttpClient,
}

impl DlocalProvider {
    pub fn new(config: DlocalConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Signed headers for one request; every call gets a fresh timestamp.
    fn signed_headers(&self) -> PaymentResult<Vec<(&'static str, String)>> {
        let (Some(api_key), Some(secret)) = (
            self.config.api_key.as_deref(),
            self.config.secret_key.as_deref(),
        ) else {
            return Err(PaymentError::not_configured(PROVIDER));
        };
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let authorization = sign_request(api_key, secret, &timestamp).ok_or_else(|| {
            PaymentError::ConfigurationError {
                provider: PROVIDER.to_string(),
                message: "secret key cannot be used as an HMAC key".to_string(),
            }
        })?;
        Ok(vec![
            ("X-Date", timestamp),
            ("X-Login", api_key.to_string()),
            ("Authorization", authorization),
        ])
    }

    async fn call(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> PaymentResult<JsonValue> {
        let headers = self.signed_headers()?;
        let borrowed: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.http
            .request_json(method, &self.endpoint(path), None, body, &borrowed)
            .await
    }

    async fn fetch_payment(&self, payment_id: &str) -> PaymentResult<DlocalPayment> {
        let raw = self
            .call(
                reqwest::Method::GET,
                &format!("/v1/payments/{}", payment_id),
                None,
            )
            .await?;
        decode(PROVIDER, &raw)
    }
}

fn method_from_type(payment_type: Option<&str>) -> Option<PaymentMethod> {
    payment_type.map(|t| match t.to_ascii_uppercase().as_str() {
        "CARD" | "CREDIT_CARD" | "DEBIT_CARD" => PaymentMethod::Card,
        "BANK_TRANSFER" | "DIRECT" => PaymentMethod::BankTransfer,
        "TICKET" | "CASH" => PaymentMethod::Cash,
        "WALLET" => PaymentMethod::Wallet,
        _ => PaymentMethod::Other,
    })
}

#[async_trait]
impl PaymentProvider for DlocalProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Dlocal
    }

    fn is_configured(&self) -> bool {
        self.config.api_key.is_some() && self.config.secret_key.is_some()
    }

    async fn create_payment_link(&self, request: LinkRequest) -> PaymentResult<LinkResult> {
        request.amount.validate_positive("amount")?;
        let mut payload = serde_json::json!({
            "amount": request.amount.amount.to_f64(),
            "currency": request.amount.currency,
            "country": self.config.country,
            "order_id": request.external_reference,
            "description": request.description,
            "payer": {
                "name": request.customer.name,
                "email": request.customer.email,
                "phone": request.customer.phone,
            },
        });
        if let Some(base) = &self.config.public_base_url {
            payload["notification_url"] =
                JsonValue::String(format!("{}/webhooks/dlocal", base.trim_end_matches('/')));
        }

        let raw = self
            .call(reqwest::Method::POST, "/v1/payments", Some(&payload))
            .await?;
        let payment: DlocalPayment = decode(PROVIDER, &raw)
            .map_err(|e| PaymentError::unavailable(PROVIDER, e.to_string()))?;
        let checkout_url = payment.redirect_url.clone().ok_or_else(|| {
            PaymentError::unavailable(PROVIDER, "payment returned without redirect_url")
        })?;
        info!(
            payment_id = %request.payment_id,
            dlocal_id = %payment.id,
            "dlocal payment created"
        );

        Ok(LinkResult {
            id: request.payment_id,
            provider_payment_id: payment.id,
            checkout_url,
            qr_code: None,
            amount: request.amount,
            due_at: request.due_at,
            raw,
        })
    }

    async fn verify_payment(&self, provider_payment_id: &str) -> PaymentResult<StatusResult> {
        let raw = self
            .call(
                reqwest::Method::GET,
                &format!("/v1/payments/{}", provider_payment_id),
                None,
            )
            .await?;
        let payment: DlocalPayment = decode(PROVIDER, &raw)?;
        let vendor_status = payment.status.clone().unwrap_or_default();

        Ok(StatusResult {
            state: lookup_state(PAYMENT_STATUS, &vendor_status),
            vendor_status,
            amount: payment.amount.as_ref().and_then(decimal_from_json),
            payment_method: method_from_type(payment.payment_type.as_deref()),
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
        let notification: DlocalPayment = decode(PROVIDER, &payload)?;
        let payment_id = Some(notification.id.clone())
            .filter(|id| !id.is_empty())
            .or_else(|| notification.payment_id.clone())
            .ok_or_else(|| PaymentError::parse(PROVIDER, "notification carries no payment_id"))?;

        let details = if notification.status.is_some() {
            notification
        } else {
            match self.fetch_payment(&payment_id).await {
                Ok(fetched) => fetched,
                Err(err) => {
                    warn!(
                        payment_ref = %payment_id,
                        error = %err,
                        "dlocal payment lookup failed; event carries no state"
                    );
                    notification
                }
            }
        };

        let state = details
            .status
            .as_deref()
            .map(|s| lookup_state(PAYMENT_STATUS, s));
        let correlation_id = details
            .order_id
            .clone()
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| payment_id.clone());

        Ok(CanonicalWebhookEvent {
            provider: ProviderName::Dlocal,
            correlation_id,
            provider_payment_id: Some(payment_id),
            payment_id: None,
            event_name: details
                .status
                .clone()
                .map(|s| format!("payment.{}", s.to_ascii_lowercase()))
                .unwrap_or_else(|| "payment.notification".to_string()),
            state,
            amount: details.amount.as_ref().and_then(decimal_from_json),
            payment_method: method_from_type(details.payment_type.as_deref()),
            payload,
        })
    }

    async fn cancel_payment(&self, _provider_payment_id: &str) -> PaymentResult<bool> {
        Ok(true)
    }
}

#[derive(Debug, Default, Deserialize)]
struct DlocalPayment {
    #[serde(default)]
    id: String,
    #[serde(default)]
    payment_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    amount: Option<JsonValue>,
    #[serde(default)]
    redirect_url: Option<String>,
    #[serde(default)]
    payment_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> DlocalProvider {
        DlocalProvider::new(DlocalConfig {
            api_key: Some("key_1".to_string()),
            secret_key: Some("secret_1".to_string()),
            base_url: base_url.to_string(),
            ..DlocalConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn request_signature_covers_key_and_timestamp() {
        let ts = "2026-03-01T12:00:00.000Z";
        let auth = sign_request("key_1", "secret_1", ts).unwrap();
        let expected = hmac_sha256_hex(b"secret_1", b"key_12026-03-01T12:00:00.000Z").unwrap();
        assert_eq!(auth, format!("V2-HMAC-SHA256, Signature: {}", expected));
        assert_ne!(auth, sign_request("key_1", "secret_1", "other").unwrap());
    }

    #[test]
    fn needs_both_keys_to_be_configured() {
        let half = DlocalProvider::new(DlocalConfig {
            api_key: Some("key_1".to_string()),
            ..DlocalConfig::default()
        })
        .unwrap();
        assert!(!half.is_configured());
        assert!(provider("http://localhost").is_configured());
    }

    #[tokio::test]
    async fn notification_with_status_needs_no_lookup() {
        let body = br#"{"payment_id":"DP-1","status":"PAID","order_id":"conv-9"}"#;
        let event = provider("http://127.0.0.1:9")
            .parse_webhook(body, &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(event.correlation_id, "conv-9");
        assert_eq!(event.provider_payment_id.as_deref(), Some("DP-1"));
        assert_eq!(event.state, Some(PaymentState::Paid));
    }

    #[tokio::test]
    async fn notification_without_status_is_enriched_with_signed_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/DP-2"))
            .and(header("X-Login", "key_1"))
            .and(header_exists("X-Date"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "DP-2",
                "status": "EXPIRED",
                "order_id": "contact-3",
                "amount": 99.9
            })))
            .expect(1)
            .mount(&server)
            .await;

        let event = provider(&server.uri())
            .parse_webhook(br#"{"payment_id":"DP-2"}"#, &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(event.state, Some(PaymentState::Expired));
        assert_eq!(event.correlation_id, "contact-3");
    }
}
