use crate::payments::error::PaymentResult;
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{
    DlocalConfig, DlocalProvider, MercadoPagoConfig, MercadoPagoProvider, PaypalConfig,
    PaypalProvider, StripeConfig, StripeProvider,
};
use crate::payments::types::ProviderName;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub http_timeout_secs: u64,
    pub stripe: StripeConfig,
    pub mercadopago: MercadoPagoConfig,
    pub dlocal: DlocalConfig,
    pub paypal: PaypalConfig,
}

impl ProvidersConfig {
    pub fn from_env() -> Self {
        let http_timeout_secs = std::env::var("PAYMENT_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(15);

        Self {
            http_timeout_secs,
            stripe: StripeConfig::from_env(http_timeout_secs),
            mercadopago: MercadoPagoConfig::from_env(http_timeout_secs),
            dlocal: DlocalConfig::from_env(http_timeout_secs),
            paypal: PaypalConfig::from_env(http_timeout_secs),
        }
    }
}

/// Immutable set of adapters whose credentials are present.
///
/// Built once at startup and shared through `Arc`; nothing is added or removed afterwards.
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderName, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &ProvidersConfig) -> PaymentResult<Self> {
        let candidates: Vec<Arc<dyn PaymentProvider>> = vec![
            Arc::new(StripeProvider::new(config.stripe.clone())?),
            Arc::new(MercadoPagoProvider::new(config.mercadopago.clone())?),
            Arc::new(DlocalProvider::new(config.dlocal.clone())?),
            Arc::new(PaypalProvider::new(config.paypal.clone())?),
        ];
        Ok(Self::from_providers(candidates))
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::from_config(&ProvidersConfig::from_env())
    }

    /// Register every adapter that reports itself configured; the rest are dropped.
    pub fn from_providers(candidates: Vec<Arc<dyn PaymentProvider>>) -> Self {
        let mut providers = BTreeMap::new();
        for provider in candidates {
            let name = provider.name();
            if provider.is_configured() {
                info!(provider = %name, "payment provider registered");
                providers.insert(name, provider);
            } else {
                warn!(provider = %name, "payment provider not configured; skipping");
            }
        }
        Self { providers }
    }

    pub fn get(&self, name: ProviderName) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.get(&name).cloned()
    }

    pub fn list_available(&self) -> Vec<ProviderName> {
        self.providers.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }
}
