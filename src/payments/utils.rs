use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::PaymentState;
use bigdecimal::BigDecimal;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Thin wrapper around `reqwest` shared by every vendor adapter.
///
/// Requests are never retried here; timeouts, transport failures, non-2xx answers and
/// undecodable bodies all surface as `ProviderUnavailable`.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                PaymentError::unavailable(provider, format!("failed to initialize HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            provider,
            timeout,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut request = self.client.request(method, url);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }
        for (k, v) in additional_headers {
            request = request.header(*k, *v);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }
        self.send(request).await
    }

    pub async fn request_form<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer_token: Option<&str>,
        form: &[(String, String)],
    ) -> PaymentResult<T> {
        let mut request = self.client.post(url);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }
        request = request.form(form);
        self.send(request).await
    }

    pub async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> PaymentResult<T> {
        let response = request.timeout(self.timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                PaymentError::unavailable(self.provider, "provider request timed out")
            } else {
                PaymentError::unavailable(self.provider, format!("provider request failed: {}", e))
            }
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(
                provider = self.provider,
                status = %status,
                "provider returned non-success status"
            );
            return Err(PaymentError::unavailable(
                self.provider,
                format!("HTTP {}: {}", status, truncate(&text, 512)),
            ));
        }

        serde_json::from_str::<T>(&text).map_err(|e| {
            PaymentError::unavailable(
                self.provider,
                format!("invalid provider JSON response: {}", e),
            )
        })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Environment variable with surrounding whitespace removed; blank counts as unset.
pub fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Deserialize an already-parsed vendor document into a typed record.
pub fn decode<T: DeserializeOwned>(provider: &str, value: &JsonValue) -> PaymentResult<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| PaymentError::parse(provider, format!("unexpected payload shape: {}", e)))
}

/// Vendors send amounts either as JSON numbers or as decimal strings.
pub fn decimal_from_json(value: &JsonValue) -> Option<BigDecimal> {
    match value {
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Map a vendor status through a static table. Unknown statuses fall back to `pending`.
pub fn lookup_state(table: &[(&str, PaymentState)], vendor_status: &str) -> PaymentState {
    table
        .iter()
        .find(|(status, _)| status.eq_ignore_ascii_case(vendor_status.trim()))
        .map(|(_, state)| *state)
        .unwrap_or(PaymentState::Pending)
}

pub fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> Option<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_hex_matches_known_digest() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let signature = hmac_sha256_hex(b"whsec_test", payload).unwrap();
        assert_eq!(signature.len(), 64);
        assert_eq!(hmac_sha256_hex(b"whsec_test", payload), Some(signature.clone()));
        assert_ne!(hmac_sha256_hex(b"whsec_other", payload), Some(signature));
    }

    #[test]
    fn decimal_from_json_accepts_numbers_and_strings() {
        assert_eq!(
            decimal_from_json(&serde_json::json!(1000)),
            Some(BigDecimal::from(1000))
        );
        assert_eq!(
            decimal_from_json(&serde_json::json!("12.50")),
            BigDecimal::from_str("12.50").ok()
        );
        assert_eq!(decimal_from_json(&serde_json::json!(null)), None);
    }

    #[test]
    fn unknown_vendor_status_maps_to_pending() {
        let table = [("approved", PaymentState::Paid)];
        assert_eq!(lookup_state(&table, "APPROVED"), PaymentState::Paid);
        assert_eq!(lookup_state(&table, "whatever"), PaymentState::Pending);
    }
}
