use crate::payments::error::PaymentError;
use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Stripe,
    MercadoPago,
    Dlocal,
    Paypal,
}

impl ProviderName {
    pub const ALL: [ProviderName; 4] = [
        ProviderName::Stripe,
        ProviderName::MercadoPago,
        ProviderName::Dlocal,
        ProviderName::Paypal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Stripe => "stripe",
            ProviderName::MercadoPago => "mercadopago",
            ProviderName::Dlocal => "dlocal",
            ProviderName::Paypal => "paypal",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stripe" => Ok(ProviderName::Stripe),
            "mercadopago" | "mercado_pago" | "mercado-pago" => Ok(ProviderName::MercadoPago),
            "dlocal" | "dlocalgo" | "dlocal_go" => Ok(ProviderName::Dlocal),
            "paypal" => Ok(ProviderName::Paypal),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Canonical payment state shared by every provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Paid,
    Cancelled,
    Expired,
    Refunded,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Paid => "paid",
            PaymentState::Cancelled => "cancelled",
            PaymentState::Expired => "expired",
            PaymentState::Refunded => "refunded",
        }
    }

    /// States a payment may be in for a transition into `self` to be legal.
    ///
    /// `pending` moves to `paid`, `cancelled` or `expired`; `refunded` is reachable from
    /// every other state; nothing ever moves back to `pending`.
    pub fn allowed_predecessors(&self) -> &'static [PaymentState] {
        match self {
            PaymentState::Pending => &[],
            PaymentState::Paid | PaymentState::Cancelled | PaymentState::Expired => {
                &[PaymentState::Pending]
            }
            PaymentState::Refunded => &[
                PaymentState::Pending,
                PaymentState::Paid,
                PaymentState::Cancelled,
                PaymentState::Expired,
            ],
        }
    }

    pub fn can_transition_to(&self, target: PaymentState) -> bool {
        target.allowed_predecessors().contains(self)
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentState {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentState::Pending),
            "paid" => Ok(PaymentState::Paid),
            "cancelled" | "canceled" => Ok(PaymentState::Cancelled),
            "expired" => Ok(PaymentState::Expired),
            "refunded" => Ok(PaymentState::Refunded),
            _ => Err(PaymentError::ValidationError {
                message: format!("unknown payment state: {}", value),
                field: Some("state".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Cash,
    Wallet,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Other => "other",
        }
    }

    /// Lenient parse used for stored values; anything unrecognised is `Other`.
    pub fn from_stored(value: &str) -> Self {
        match value {
            "card" => PaymentMethod::Card,
            "bank_transfer" => PaymentMethod::BankTransfer,
            "cash" => PaymentMethod::Cash,
            "wallet" => PaymentMethod::Wallet,
            _ => PaymentMethod::Other,
        }
    }
}

/// ISO-4217 codes that have no minor unit at card processors.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

pub fn is_zero_decimal_currency(currency: &str) -> bool {
    ZERO_DECIMAL_CURRENCIES
        .iter()
        .any(|code| code.eq_ignore_ascii_case(currency.trim()))
}

fn minor_unit_factor(currency: &str) -> BigDecimal {
    if is_zero_decimal_currency(currency) {
        BigDecimal::from(1)
    } else {
        BigDecimal::from(100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        if self.amount <= BigDecimal::zero() {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }

    /// Amount in the currency's smallest unit, as expected by vendors that bill in minor
    /// units. Zero-decimal currencies are billed in whole units.
    pub fn to_minor_units(&self) -> Result<i64, PaymentError> {
        (&self.amount * minor_unit_factor(&self.currency))
            .round(0)
            .to_i64()
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("amount {} is out of range", self.amount),
                field: Some("amount".to_string()),
            })
    }

    pub fn from_minor_units(minor: i64, currency: impl Into<String>) -> Self {
        let currency = currency.into();
        Self {
            amount: BigDecimal::from(minor) / minor_unit_factor(&currency),
            currency,
        }
    }

    /// Two-decimal string representation (`"1000.00"`).
    pub fn decimal_string(&self) -> String {
        self.amount.round(2).with_scale(2).to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerContact {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    pub unit_amount: BigDecimal,
}

fn default_quantity() -> i32 {
    1
}

/// Inbound request to create a payment link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub provider: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: String,
    pub customer: CustomerContact,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub conversation_ref: Option<String>,
    #[serde(default)]
    pub contact_ref: Option<String>,
    #[serde(default)]
    pub due_days: Option<u32>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// What an adapter receives when asked to create a vendor-side link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRequest {
    pub payment_id: Uuid,
    pub external_reference: String,
    pub amount: Money,
    pub description: String,
    pub customer: CustomerContact,
    pub items: Vec<LineItem>,
    pub due_at: DateTime<Utc>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkResult {
    pub id: Uuid,
    pub provider_payment_id: String,
    pub checkout_url: String,
    pub qr_code: Option<String>,
    pub amount: Money,
    pub due_at: DateTime<Utc>,
    pub raw: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub state: PaymentState,
    pub vendor_status: String,
    pub amount: Option<BigDecimal>,
    pub payment_method: Option<PaymentMethod>,
    pub raw: JsonValue,
}

/// Provider-independent view of one webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalWebhookEvent {
    pub provider: ProviderName,
    pub correlation_id: String,
    pub provider_payment_id: Option<String>,
    /// Ledger id echoed back through vendor metadata; resolves regardless of state.
    pub payment_id: Option<Uuid>,
    pub event_name: String,
    pub state: Option<PaymentState>,
    pub amount: Option<BigDecimal>,
    pub payment_method: Option<PaymentMethod>,
    pub payload: JsonValue,
}
