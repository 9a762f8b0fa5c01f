use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CanonicalWebhookEvent, LinkRequest, LinkResult, ProviderName, StatusResult,
};
use async_trait::async_trait;
use http::HeaderMap;

/// Contract every vendor adapter fulfils.
///
/// Adapters are stateless translators: they never touch the ledger and they perform at
/// most one outbound call per operation (plus an auth-token fetch where the vendor needs
/// one).
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// True when every credential the adapter needs is present.
    fn is_configured(&self) -> bool;

    async fn create_payment_link(&self, request: LinkRequest) -> PaymentResult<LinkResult>;

    async fn verify_payment(&self, provider_payment_id: &str) -> PaymentResult<StatusResult>;

    /// Verify (where the vendor supports it) and normalize one webhook delivery.
    async fn parse_webhook(
        &self,
        body: &[u8],
        headers: &HeaderMap,
    ) -> PaymentResult<CanonicalWebhookEvent>;

    /// Ask the vendor to void the link. Vendors without a void endpoint report `true`.
    async fn cancel_payment(&self, provider_payment_id: &str) -> PaymentResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::PaymentError;
    use crate::payments::types::{CustomerContact, Money, PaymentState};
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use uuid::Uuid;

    struct MockProvider;

    #[async_trait]
    impl PaymentProvider for MockProvider {
        fn name(&self) -> ProviderName {
            ProviderName::Stripe
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn create_payment_link(&self, request: LinkRequest) -> PaymentResult<LinkResult> {
            Ok(LinkResult {
                id: request.payment_id,
                provider_payment_id: "cs_mock".to_string(),
                checkout_url: "https://example.com/pay".to_string(),
                qr_code: None,
                amount: request.amount,
                due_at: request.due_at,
                raw: serde_json::json!({}),
            })
        }

        async fn verify_payment(&self, provider_payment_id: &str) -> PaymentResult<StatusResult> {
            Ok(StatusResult {
                state: PaymentState::Paid,
                vendor_status: format!("complete:{}", provider_payment_id),
                amount: None,
                payment_method: None,
                raw: serde_json::json!({}),
            })
        }

        async fn parse_webhook(
            &self,
            _body: &[u8],
            _headers: &HeaderMap,
        ) -> PaymentResult<CanonicalWebhookEvent> {
            Err(PaymentError::parse("stripe", "mock cannot parse"))
        }

        async fn cancel_payment(&self, _provider_payment_id: &str) -> PaymentResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_provider() {
        let provider: Box<dyn PaymentProvider> = Box::new(MockProvider);
        let link = provider
            .create_payment_link(LinkRequest {
                payment_id: Uuid::new_v4(),
                external_reference: "ref-1".to_string(),
                amount: Money {
                    amount: BigDecimal::from(1000),
                    currency: "ARS".to_string(),
                },
                description: "Curso".to_string(),
                customer: CustomerContact {
                    name: "Ana".to_string(),
                    email: None,
                    phone: None,
                },
                items: vec![],
                due_at: Utc::now(),
                metadata: None,
            })
            .await
            .expect("link creation should succeed");
        assert_eq!(link.provider_payment_id, "cs_mock");

        let status = provider.verify_payment("cs_mock").await.unwrap();
        assert_eq!(status.state, PaymentState::Paid);

        let err = provider
            .parse_webhook(b"{}", &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ParseError { .. }));
        assert!(provider.cancel_payment("cs_mock").await.unwrap());
    }
}
