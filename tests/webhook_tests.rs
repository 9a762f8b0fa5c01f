mod common;

use axum::body::{to_bytes, Body};
use bigdecimal::BigDecimal;
use http::{Request, StatusCode};
use paylink_gateway::api::{router, AppState};
use paylink_gateway::database::memory::InMemoryLedger;
use paylink_gateway::database::models::WebhookFilter;
use paylink_gateway::database::repository::{PaymentStore, WebhookStore};
use paylink_gateway::payments::provider::PaymentProvider;
use paylink_gateway::payments::providers::{StripeConfig, StripeProvider};
use paylink_gateway::payments::types::{PaymentMethod, PaymentState, ProviderName};
use paylink_gateway::payments::utils::hmac_sha256_hex;
use paylink_gateway::services::notification::NotificationDispatcher;
use paylink_gateway::services::webhook_processor::WebhookOutcome;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WEBHOOK_SECRET: &str = "whsec_test_secret";

struct Harness {
    server: MockServer,
    ledger: InMemoryLedger,
    state: AppState,
}

async fn stripe_harness() -> Harness {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_1",
            "url": "https://checkout.stripe.test/c/pay/cs_1",
            "status": "open",
            "payment_status": "unpaid"
        })))
        .mount(&server)
        .await;

    let stripe = StripeProvider::new(StripeConfig {
        secret_key: Some("sk_test_123".to_string()),
        webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        base_url: server.uri(),
        ..StripeConfig::default()
    })
    .unwrap();
    let registry = common::registry_with(vec![Arc::new(stripe) as Arc<dyn PaymentProvider>]);

    let ledger = InMemoryLedger::new();
    let notifier = NotificationDispatcher::new(
        Some(format!("{}/notify", server.uri())),
        Duration::from_secs(2),
    );
    let state = common::state_with(registry, &ledger, notifier);

    Harness {
        server,
        ledger,
        state,
    }
}

fn signed_headers(body: &[u8], secret: &str) -> String {
    let timestamp = "1767225600";
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(body);
    let signature = hmac_sha256_hex(secret.as_bytes(), &signed).unwrap();
    format!("t={},v1={}", timestamp, signature)
}

fn completed_event() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_1",
                "object": "checkout.session",
                "status": "complete",
                "payment_status": "paid",
                "amount_total": 100000,
                "metadata": { "referencia_externa": "conv-42" },
                "payment_method_types": ["card"]
            }
        }
    }))
    .unwrap()
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, JsonValue) {
    let response = router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    (status, body)
}

async fn create_stripe_payment(state: &AppState) -> Uuid {
    let request = Request::post("/api/payments")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "provider": "stripe",
                "amount": "1000",
                "currency": "ARS",
                "description": "Consulta nutricional",
                "customer": { "name": "Ana Diaz", "email": "ana@example.com" },
                "conversation_ref": "conv-42"
            })
            .to_string(),
        ))
        .unwrap();
    let (status, body) = send(state, request).await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["state"], "pending");
    assert_eq!(body["provider_payment_id"], "cs_1");
    Uuid::parse_str(body["id"].as_str().unwrap()).unwrap()
}

fn webhook_request(body: Vec<u8>, signature: &str) -> Request<Body> {
    Request::post("/webhooks/stripe")
        .header("content-type", "application/json")
        .header("stripe-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn stripe_checkout_completed_marks_payment_paid() {
    let harness = stripe_harness().await;
    Mock::given(method("POST"))
        .and(path("/notify"))
        .and(body_partial_json(json!({
            "conversation_ref": "conv-42",
            "provider": "stripe",
            "currency": "ARS"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&harness.server)
        .await;

    let payment_id = create_stripe_payment(&harness.state).await;

    let body = completed_event();
    let signature = signed_headers(&body, WEBHOOK_SECRET);
    let (status, response) = send(&harness.state, webhook_request(body, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "ok");
    assert_eq!(response["outcome"], "applied");
    common::wait_for_requests(&harness.server, "/notify", 1).await;

    let payment = harness
        .ledger
        .find_by_id(payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.state, PaymentState::Paid);
    assert_eq!(payment.amount, BigDecimal::from(1000));
    assert_eq!(payment.payment_method, Some(PaymentMethod::Card));
    assert!(payment.paid_at.is_some());

    let records = harness
        .ledger
        .list_webhooks(&WebhookFilter::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].processed);
    assert_eq!(records[0].payment_id, Some(payment_id));
    assert_eq!(
        records[0].event_name.as_deref(),
        Some("checkout.session.completed")
    );
}

#[tokio::test]
async fn duplicate_delivery_transitions_and_notifies_once() {
    let harness = stripe_harness().await;
    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&harness.server)
        .await;

    let payment_id = create_stripe_payment(&harness.state).await;
    let body = completed_event();
    let signature = signed_headers(&body, WEBHOOK_SECRET);

    let (_, first) = send(&harness.state, webhook_request(body.clone(), &signature)).await;
    let (status, second) = send(&harness.state, webhook_request(body, &signature)).await;

    assert_eq!(first["outcome"], "applied");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["outcome"], "noop");
    assert_eq!(harness.ledger.webhook_count().await, 2);
    common::wait_for_requests(&harness.server, "/notify", 1).await;

    let records = harness
        .ledger
        .list_webhooks(&WebhookFilter::default())
        .await
        .unwrap();
    assert!(records.iter().all(|r| r.processed));
    assert!(records.iter().all(|r| r.payment_id == Some(payment_id)));
}

#[tokio::test]
async fn concurrent_deliveries_apply_exactly_once() {
    let harness = stripe_harness().await;
    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&harness.server)
        .await;

    create_stripe_payment(&harness.state).await;
    let body = completed_event();
    let mut headers = http::HeaderMap::new();
    headers.insert(
        "stripe-signature",
        signed_headers(&body, WEBHOOK_SECRET).parse().unwrap(),
    );

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let processor = harness.state.processor.clone();
            let body = body.clone();
            let headers = headers.clone();
            tokio::spawn(async move {
                processor
                    .process_webhook(ProviderName::Stripe, &body, &headers)
                    .await
            })
        })
        .collect();

    let mut applied = 0;
    for report in futures::future::join_all(tasks).await {
        let report = report.unwrap();
        assert_ne!(report.outcome, WebhookOutcome::Failed);
        if report.outcome == WebhookOutcome::Applied {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(harness.ledger.webhook_count().await, 4);
    common::wait_for_requests(&harness.server, "/notify", 1).await;
}

#[tokio::test]
async fn bad_signature_is_recorded_as_failed() {
    let harness = stripe_harness().await;
    let payment_id = create_stripe_payment(&harness.state).await;

    let body = completed_event();
    let signature = signed_headers(&body, "whsec_wrong");
    let (status, response) = send(&harness.state, webhook_request(body, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["outcome"], "failed");

    let payment = harness
        .ledger
        .find_by_id(payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.state, PaymentState::Pending);

    let unprocessed = harness
        .ledger
        .list_webhooks(&WebhookFilter {
            processed: Some(false),
            ..WebhookFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(unprocessed.len(), 1);
    assert!(unprocessed[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("signature"));
}

#[tokio::test]
async fn unknown_provider_segment_is_not_found() {
    let harness = stripe_harness().await;
    let request = Request::post("/webhooks/bitpay")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = send(&harness.state, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(harness.ledger.webhook_count().await, 0);
}

#[tokio::test]
async fn unconfigured_provider_delivery_is_kept_as_failed() {
    let harness = stripe_harness().await;
    let request = Request::post("/webhooks/paypal")
        .body(Body::from(r#"{"event_type":"CHECKOUT.ORDER.APPROVED"}"#))
        .unwrap();
    let (status, response) = send(&harness.state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["outcome"], "failed");

    let records = harness
        .ledger
        .list_webhooks(&WebhookFilter::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provider, "paypal");
    assert_eq!(
        records[0].event_name.as_deref(),
        Some("CHECKOUT.ORDER.APPROVED")
    );
    assert!(!records[0].processed);
}

#[tokio::test]
async fn stateless_event_is_processed_without_transition() {
    let harness = stripe_harness().await;
    let payment_id = create_stripe_payment(&harness.state).await;

    let body = serde_json::to_vec(&json!({
        "type": "customer.created",
        "data": { "object": { "id": "cus_1", "object": "customer" } }
    }))
    .unwrap();
    let signature = signed_headers(&body, WEBHOOK_SECRET);
    let (_, response) = send(&harness.state, webhook_request(body, &signature)).await;
    assert_eq!(response["outcome"], "noop");

    let payment = harness
        .ledger
        .find_by_id(payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.state, PaymentState::Pending);

    let (status, listing) = send(
        &harness.state,
        Request::get("/api/webhooks?processed=true")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["count"], 1);
}

#[tokio::test]
async fn payment_read_query_and_cancel_over_http() {
    let harness = stripe_harness().await;
    let payment_id = create_stripe_payment(&harness.state).await;

    let (status, detail) = send(
        &harness.state,
        Request::get(format!("/api/payments/{}", payment_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["payment"]["external_reference"], "conv-42");
    assert_eq!(detail["items"].as_array().map(Vec::len), Some(0));

    let (_, pending) = send(
        &harness.state,
        Request::get("/api/payments?state=pending&provider=stripe")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(pending["count"], 1);

    // The vendor expire call is not mocked; the payment is still cancelled locally.
    let cancel = || {
        Request::post(format!("/api/payments/{}/cancel", payment_id))
            .body(Body::empty())
            .unwrap()
    };
    let (status, cancelled) = send(&harness.state, cancel()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["state"], "cancelled");

    let (status, rejected) = send(&harness.state, cancel()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(rejected["error"], "INVALID_TRANSITION");

    let (_, paid) = send(
        &harness.state,
        Request::get("/api/payments?state=paid")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(paid["count"], 0);
}

#[tokio::test]
async fn stripe_link_without_references_is_paid_through_generated_id() {
    let harness = stripe_harness().await;
    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&harness.server)
        .await;

    let request = Request::post("/api/payments")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "provider": "stripe",
                "amount": "1000",
                "currency": "ARS",
                "description": "Curso X",
                "customer": { "name": "Ana" }
            })
            .to_string(),
        ))
        .unwrap();
    let (status, created) = send(&harness.state, request).await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", created);
    assert_eq!(created["state"], "pending");
    assert!(!created["checkout_url"].as_str().unwrap_or_default().is_empty());
    let generated_id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["external_reference"], generated_id.as_str());

    let body = serde_json::to_vec(&json!({
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_1",
            "metadata": { "referencia_externa": generated_id },
            "amount_total": 100000
        } }
    }))
    .unwrap();
    let signature = signed_headers(&body, WEBHOOK_SECRET);
    let (status, response) = send(&harness.state, webhook_request(body, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["outcome"], "applied");
    common::wait_for_requests(&harness.server, "/notify", 1).await;

    let payment = harness
        .ledger
        .find_by_id(Uuid::parse_str(&generated_id).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.state, PaymentState::Paid);
    assert_eq!(payment.amount, BigDecimal::from(1000));
}

#[tokio::test]
async fn charge_refund_after_checkout_resolves_to_the_paid_payment() {
    let harness = stripe_harness().await;
    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.server)
        .await;

    let payment_id = create_stripe_payment(&harness.state).await;
    let body = completed_event();
    let signature = signed_headers(&body, WEBHOOK_SECRET);
    let (_, paid) = send(&harness.state, webhook_request(body, &signature)).await;
    assert_eq!(paid["outcome"], "applied");

    let refund = serde_json::to_vec(&json!({
        "type": "charge.refunded",
        "data": { "object": {
            "id": "ch_1",
            "object": "charge",
            "amount": 100000,
            "currency": "ars",
            "payment_intent": "pi_1",
            "metadata": {
                "referencia_externa": "conv-42",
                "payment_id": payment_id.to_string()
            }
        } }
    }))
    .unwrap();
    let signature = signed_headers(&refund, WEBHOOK_SECRET);
    let (status, response) = send(&harness.state, webhook_request(refund, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["outcome"], "applied");

    let payment = harness
        .ledger
        .find_by_id(payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.state, PaymentState::Refunded);
}

#[tokio::test]
async fn slow_notification_receiver_does_not_hold_the_webhook_response() {
    let harness = stripe_harness().await;
    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1500)))
        .expect(1)
        .mount(&harness.server)
        .await;

    create_stripe_payment(&harness.state).await;
    let body = completed_event();
    let signature = signed_headers(&body, WEBHOOK_SECRET);

    let started = std::time::Instant::now();
    let (status, response) = send(&harness.state, webhook_request(body, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["outcome"], "applied");
    assert!(started.elapsed() < Duration::from_millis(1000));

    common::wait_for_requests(&harness.server, "/notify", 1).await;
}
