//! Unified error handling for the payment gateway
//!
//! Every layer raises its own error type (`PaymentError`, `DatabaseError`) and converts it
//! into `AppError`, which knows its HTTP status, machine code and client-facing message.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::payments::types::PaymentState;

/// Machine-readable error codes returned to API clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Client errors (4xx)
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "INVALID_TRANSITION")]
    InvalidTransition,
    #[serde(rename = "SIGNATURE_INVALID")]
    SignatureInvalid,
    #[serde(rename = "PARSE_ERROR")]
    ParseError,

    // Vendor side (502, 503)
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "PROVIDER_UNAVAILABLE")]
    ProviderUnavailable,

    // Internal (500)
    #[serde(rename = "LEDGER_DIVERGENCE")]
    LedgerDivergence,
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Unified application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Bad input on a create/query request
    Validation {
        message: String,
        field: Option<String>,
    },
    /// Entity (payment, provider, webhook record) does not exist
    NotFound { entity: String, id: String },
    /// Requested state change is not allowed from the current state
    InvalidTransition {
        payment_id: Uuid,
        from: PaymentState,
        to: PaymentState,
    },
    /// Webhook signature did not verify
    SignatureInvalid { provider: String },
    /// Vendor payload could not be understood
    Parse { provider: String, message: String },
    /// Provider exists but is missing credentials
    Configuration { provider: String, message: String },
    /// Vendor API timed out, refused or answered with an error
    ProviderUnavailable { provider: String, message: String },
    /// Vendor link exists but the ledger row could not be written
    LedgerWriteFailedAfterExternalCreate {
        provider: String,
        provider_payment_id: String,
        message: String,
    },
    /// Store failure
    Database { message: String, is_retryable: bool },
}

impl AppError {
    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::InvalidTransition { .. } => 409, // Conflict
            AppError::SignatureInvalid { .. } => 401,
            AppError::Parse { .. } => 422, // Unprocessable Entity
            AppError::Configuration { .. } => 503,
            AppError::ProviderUnavailable { .. } => 502, // Bad Gateway
            AppError::LedgerWriteFailedAfterExternalCreate { .. } => 500,
            AppError::Database { .. } => 500,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            AppError::SignatureInvalid { .. } => ErrorCode::SignatureInvalid,
            AppError::Parse { .. } => ErrorCode::ParseError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::ProviderUnavailable { .. } => ErrorCode::ProviderUnavailable,
            AppError::LedgerWriteFailedAfterExternalCreate { .. } => ErrorCode::LedgerDivergence,
            AppError::Database { .. } => ErrorCode::DatabaseError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation { message, field } => match field {
                Some(field) => format!("Invalid '{}': {}", field, message),
                None => message.clone(),
            },
            AppError::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
            AppError::InvalidTransition {
                payment_id,
                from,
                to,
            } => format!(
                "Payment '{}' cannot move from {} to {}",
                payment_id, from, to
            ),
            AppError::SignatureInvalid { provider } => {
                format!("Webhook signature from {} did not verify", provider)
            }
            AppError::Parse { provider, message } => {
                format!("Could not parse {} payload: {}", provider, message)
            }
            AppError::Configuration { provider, .. } => {
                format!("Payment provider ({}) is not configured", provider)
            }
            AppError::ProviderUnavailable { provider, .. } => format!(
                "Payment provider ({}) is temporarily unavailable. Please try again",
                provider
            ),
            AppError::LedgerWriteFailedAfterExternalCreate {
                provider,
                provider_payment_id,
                ..
            } => format!(
                "Payment link {} was created at {} but could not be recorded. Please contact support",
                provider_payment_id, provider
            ),
            AppError::Database { .. } => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::ProviderUnavailable { .. } => true,
            AppError::Database { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Operator-facing detail the client message hides.
            AppError::ProviderUnavailable { provider, message }
            | AppError::Configuration { provider, message } => {
                write!(f, "{}: {}", provider, message)
            }
            AppError::LedgerWriteFailedAfterExternalCreate {
                provider,
                provider_payment_id,
                message,
            } => write!(
                f,
                "ledger write failed after {} created {}: {}",
                provider, provider_payment_id, message
            ),
            AppError::Database { message, .. } => write!(f, "database error: {}", message),
            _ => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

// Note: From<DatabaseError> lives in database/error.rs and From<PaymentError> in
// payments/error.rs, next to the types they convert.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
