//! Payment ledger endpoints: create, read, query, cancel and verify payments.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::database::models::{Payment, PaymentFilter, PaymentItem, WebhookFilter, WebhookRecord};
use crate::error::{AppError, AppResult};
use crate::payments::types::{PaymentIntent, PaymentState, ProviderName};

#[derive(Debug, Default, Deserialize)]
pub struct PaymentQueryParams {
    pub state: Option<String>,
    pub provider: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl PaymentQueryParams {
    fn into_filter(self) -> AppResult<PaymentFilter> {
        let state = self
            .state
            .as_deref()
            .map(PaymentState::from_str)
            .transpose()?;
        let provider = self
            .provider
            .as_deref()
            .map(ProviderName::from_str)
            .transpose()?;

        Ok(PaymentFilter {
            state,
            provider,
            created_from: self.from,
            created_to: self.to,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookQueryParams {
    pub processed: Option<bool>,
    pub provider: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PaymentDetailResponse {
    pub payment: Payment,
    pub items: Vec<PaymentItem>,
}

#[derive(Debug, Serialize)]
pub struct PaymentListResponse {
    pub payments: Vec<Payment>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub payment: Payment,
    pub vendor_status: String,
    pub outcome: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderName>,
}

#[derive(Debug, Serialize)]
pub struct WebhookListResponse {
    pub webhooks: Vec<WebhookRecord>,
    pub count: usize,
}

/// POST /api/payments
pub async fn create_payment(
    State(state): State<AppState>,
    Json(intent): Json<PaymentIntent>,
) -> AppResult<impl IntoResponse> {
    let payment = state.ledger.create(intent).await?;
    info!(
        payment_id = %payment.id,
        provider = %payment.provider,
        "payment link created"
    );
    Ok((StatusCode::CREATED, Json(payment)))
}

/// GET /api/payments
pub async fn list_payments(
    State(state): State<AppState>,
    Query(params): Query<PaymentQueryParams>,
) -> AppResult<Json<PaymentListResponse>> {
    let payments = state.ledger.query(params.into_filter()?).await?;
    Ok(Json(PaymentListResponse {
        count: payments.len(),
        payments,
    }))
}

/// GET /api/payments/{id}
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<PaymentDetailResponse>> {
    let payment_id = parse_payment_id(&id)?;
    let payment = state.ledger.get(payment_id).await?;
    let items = state.ledger.items(payment_id).await?;
    Ok(Json(PaymentDetailResponse { payment, items }))
}

/// POST /api/payments/{id}/cancel
pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Payment>> {
    let payment = state.ledger.cancel(parse_payment_id(&id)?).await?;
    Ok(Json(payment))
}

/// POST /api/payments/{id}/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<VerifyResponse>> {
    let result = state.ledger.verify(parse_payment_id(&id)?).await?;
    let outcome = result.outcome.label();
    Ok(Json(VerifyResponse {
        payment: result.outcome.into_payment(),
        vendor_status: result.vendor_status,
        outcome,
    }))
}

/// GET /api/providers
pub async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: state.registry.list_available(),
    })
}

/// GET /api/webhooks
pub async fn list_webhooks(
    State(state): State<AppState>,
    Query(params): Query<WebhookQueryParams>,
) -> AppResult<Json<WebhookListResponse>> {
    let provider = params
        .provider
        .as_deref()
        .map(ProviderName::from_str)
        .transpose()?
        .map(|p| p.as_str().to_string());

    let webhooks = state
        .webhooks
        .list_webhooks(&WebhookFilter {
            processed: params.processed,
            provider,
            limit: params.limit,
        })
        .await?;
    Ok(Json(WebhookListResponse {
        count: webhooks.len(),
        webhooks,
    }))
}

fn parse_payment_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation {
        message: format!("'{}' is not a valid payment id", raw),
        field: Some("id".to_string()),
    })
}
