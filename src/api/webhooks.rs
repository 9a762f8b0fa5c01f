use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::str::FromStr;
use tracing::{info, warn};

use super::AppState;
use crate::payments::types::ProviderName;

/// POST /webhooks/{provider}
///
/// Unknown provider segments get a 404. Everything else is acknowledged with 200 so the
/// vendor stops retrying; failures are kept on the stored delivery record.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provider = match ProviderName::from_str(&provider) {
        Ok(provider) => provider,
        Err(_) => {
            warn!(provider = %provider, "webhook for unknown provider");
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"status": "unknown_provider"})),
            )
                .into_response();
        }
    };

    info!(provider = %provider, bytes = body.len(), "received webhook");
    let report = state
        .processor
        .process_webhook(provider, &body, &headers)
        .await;

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "outcome": report.outcome,
            "webhook_id": report.webhook_id,
        })),
    )
        .into_response()
}
