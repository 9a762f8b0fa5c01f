use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Provider not configured: provider={provider}, message={message}")]
    ConfigurationError { provider: String, message: String },

    #[error("Provider unavailable: provider={provider}, message={message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("Webhook signature invalid: provider={provider}, message={message}")]
    SignatureInvalid { provider: String, message: String },

    #[error("Webhook parse error: provider={provider}, message={message}")]
    ParseError { provider: String, message: String },
}

impl PaymentError {
    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::ProviderUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn parse(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::ParseError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn not_configured(provider: impl Into<String>) -> Self {
        let provider = provider.into();
        PaymentError::ConfigurationError {
            message: format!("credentials for {} are missing", provider),
            provider,
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::AppError;

        match err {
            PaymentError::ValidationError { message, field } => {
                AppError::Validation { message, field }
            }
            PaymentError::ConfigurationError { provider, message } => {
                AppError::Configuration { provider, message }
            }
            PaymentError::ProviderUnavailable { provider, message } => {
                AppError::ProviderUnavailable { provider, message }
            }
            PaymentError::SignatureInvalid { provider, .. } => {
                AppError::SignatureInvalid { provider }
            }
            PaymentError::ParseError { provider, message } => AppError::Parse { provider, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn converts_into_app_error_kinds() {
        let err: AppError = PaymentError::unavailable("dlocal", "HTTP 503").into();
        assert!(matches!(err, AppError::ProviderUnavailable { ref provider, .. } if provider == "dlocal"));

        let err: AppError = PaymentError::not_configured("stripe").into();
        assert!(matches!(err, AppError::Configuration { .. }));

        let err: AppError = PaymentError::SignatureInvalid {
            provider: "stripe".to_string(),
            message: "mismatch".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::SignatureInvalid { .. }));
    }
}
