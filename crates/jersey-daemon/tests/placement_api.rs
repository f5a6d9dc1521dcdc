//! Handler and router tests against an on-disk `SQLite` store.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::response::IntoResponse;
use axum::Json;
use jersey_core::lifecycle::CreatePlacement;
use jersey_core::placement::{CancelReason, ImageRef, PlacementId, PlacementStatus};
use jersey_core::{JerseyConfig, PlacementEngine};
use jersey_daemon::api::{
    CheckoutBody, ListQuery, cancel_placement, canvas, checkout, create_placement,
    list_placements, router,
};
use jersey_daemon::diagnostics;
use jersey_daemon::error::ApiError;
use jersey_daemon::payment::MockPaymentGateway;
use jersey_daemon::state::{AppState, Secrets, SharedState};
use jersey_daemon::store::{SqliteDeliveryStore, SqlitePlacementStore, open_connection};
use jersey_daemon::webhook::{SIGNATURE_HEADER, WebhookError, compute_signature, handle_webhook};
use secrecy::SecretString;
use serde_json::json;
use tempfile::TempDir;

const WEBHOOK_SECRET: &str = "whsec_integration_secret";
const ADMIN_TOKEN: &str = "admin-token-0123456789";

struct Harness {
    _dir: TempDir,
    state: SharedState,
    gateway: Arc<MockPaymentGateway>,
}

fn harness_with(secrets: Secrets) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = JerseyConfig::default();
    config.store.path = dir.path().join("placements.db");
    config.server.public_url = "https://jersey.example".to_string();

    let conn = open_connection(&config.store.path).unwrap();
    let engine = PlacementEngine::new(
        Arc::new(SqlitePlacementStore::new(Arc::clone(&conn))),
        config.tiers.clone(),
    );
    let gateway = Arc::new(MockPaymentGateway::new());
    let state = AppState::new(
        config,
        engine,
        Arc::clone(&gateway) as _,
        Arc::new(SqliteDeliveryStore::new(conn)),
        secrets,
    );
    Harness {
        _dir: dir,
        state,
        gateway,
    }
}

fn harness() -> Harness {
    harness_with(Secrets {
        gateway_key: Some(SecretString::from("sk_test_0123456789abcdef")),
        webhook_secret: Some(SecretString::from(WEBHOOK_SECRET)),
        admin_token: Some(SecretString::from(ADMIN_TOKEN)),
    })
}

fn draft(side: &str, tier: &str) -> CreatePlacement {
    CreatePlacement {
        side: side.to_string(),
        tier: tier.to_string(),
        x: 0.25,
        y: 0.4,
        width_fraction: Some(0.08),
        rotation_degrees: Some(-30.0),
        image: ImageRef {
            url: "https://img.example/logo.png".to_string(),
            storage_id: "logo-1".to_string(),
        },
    }
}

async fn create(h: &Harness, side: &str, tier: &str) -> PlacementId {
    let Json(created) = create_placement(State(h.state.clone()), Ok(Json(draft(side, tier))))
        .await
        .unwrap();
    created.placement_id
}

async fn start_checkout(h: &Harness, id: &PlacementId, tier: &str) -> Result<String, ApiError> {
    let body = CheckoutBody {
        placement_id: id.to_string(),
        tier: tier.to_string(),
    };
    checkout(State(h.state.clone()), Ok(Json(body)))
        .await
        .map(|Json(r)| r.redirect_url)
}

fn signed_headers(body: &[u8], secret: &str) -> HeaderMap {
    let t = chrono::Utc::now().timestamp();
    let sig = compute_signature(secret.as_bytes(), t, body).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(
        SIGNATURE_HEADER,
        HeaderValue::from_str(&format!("t={t},v1={sig}")).unwrap(),
    );
    headers
}

fn event(event_id: &str, event_type: &str, object: serde_json::Value) -> Bytes {
    Bytes::from(
        serde_json::to_vec(&json!({
            "id": event_id,
            "type": event_type,
            "data": { "object": object },
        }))
        .unwrap(),
    )
}

fn completed(event_id: &str, id: &PlacementId) -> Bytes {
    completed_session(event_id, id, "cs_mock_0")
}

fn completed_session(event_id: &str, id: &PlacementId, session_id: &str) -> Bytes {
    event(
        event_id,
        "checkout.session.completed",
        json!({
            "id": session_id,
            "client_reference_id": id.as_str(),
            "customer_details": { "email": "buyer@example.com" },
            "amount_total": 1000,
            "currency": "USD",
        }),
    )
}

async fn deliver(h: &Harness, body: Bytes) -> Result<serde_json::Value, WebhookError> {
    let headers = signed_headers(&body, WEBHOOK_SECRET);
    handle_webhook(State(h.state.clone()), headers, body)
        .await
        .map(|Json(v)| v)
}

async fn live_ids(h: &Harness, side: &str) -> Vec<String> {
    let Json(list) = list_placements(
        State(h.state.clone()),
        Query(ListQuery {
            side: Some(side.to_string()),
        }),
    )
    .await
    .unwrap();
    list.items.into_iter().map(|v| v.id.to_string()).collect()
}

#[tokio::test]
async fn test_purchase_flow_makes_placement_live() {
    let h = harness();
    let id = create(&h, "back", "medium").await;
    assert!(live_ids(&h, "back").await.is_empty());

    let url = start_checkout(&h, &id, "medium").await.unwrap();
    assert!(url.contains(id.as_str()));
    let pending = h.state.engine.get(&id).unwrap();
    assert_eq!(pending.checkout_session_id.as_deref(), Some("cs_mock_0"));

    let ack = deliver(&h, completed("evt_1", &id)).await.unwrap();
    assert_eq!(ack["received"], true);

    let paid = h.state.engine.get(&id).unwrap();
    assert_eq!(paid.status, PlacementStatus::Paid);
    assert!(paid.live);
    let settlement = paid.settlement.unwrap();
    assert_eq!(settlement.payer_email, "buyer@example.com");
    assert_eq!(settlement.currency, "usd");
    assert_eq!(live_ids(&h, "back").await, vec![id.to_string()]);
    assert!(live_ids(&h, "front").await.is_empty());
}

#[tokio::test]
async fn test_list_wire_shape_is_camel_case() {
    let h = harness();
    let id = create(&h, "front", "small").await;
    deliver(&h, completed("evt_shape", &id)).await.unwrap();

    let Json(list) = list_placements(State(h.state.clone()), Query(ListQuery::default()))
        .await
        .unwrap();
    let value = serde_json::to_value(&list).unwrap();
    let item = &value["items"][0];
    assert_eq!(item["id"], id.as_str());
    assert_eq!(item["side"], "front");
    assert_eq!(item["tier"], "small");
    assert_eq!(item["zIndex"], 1);
    assert!((item["widthFraction"].as_f64().unwrap() - 0.06).abs() < 1e-12);
    assert!((item["rotationDegrees"].as_f64().unwrap() - 330.0).abs() < 1e-9);
    assert_eq!(item["imageReference"]["storageId"], "logo-1");
}

#[tokio::test]
async fn test_list_rejects_unknown_side() {
    let h = harness();
    let err = list_placements(
        State(h.state.clone()),
        Query(ListQuery {
            side: Some("sleeve".to_string()),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_validation_errors_are_400_with_reason() {
    let h = harness();
    let err = create_placement(State(h.state.clone()), Ok(Json(draft("sleeve", "small"))))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation { field: "side", .. }));

    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(value["error"].as_str().unwrap().contains("side"));
}

#[tokio::test]
async fn test_create_malformed_json_is_400() {
    let h = harness();
    let request = Request::builder()
        .method("POST")
        .uri("/api/create-placement")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"side\": \"front\", "))
        .unwrap();
    let payload = Json::<CreatePlacement>::from_request(request, &()).await;
    let err = create_placement(State(h.state.clone()), payload)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_z_index_increments_per_side_on_disk() {
    let h = harness();
    for expected in 1..=3 {
        let Json(created) =
            create_placement(State(h.state.clone()), Ok(Json(draft("back", "large"))))
                .await
                .unwrap();
        assert_eq!(created.z_index, expected);
    }
    let Json(front) =
        create_placement(State(h.state.clone()), Ok(Json(draft("front", "large"))))
            .await
            .unwrap();
    assert_eq!(front.z_index, 1);
}

#[tokio::test]
async fn test_checkout_tier_mismatch_is_rejected() {
    let h = harness();
    let id = create(&h, "front", "small").await;
    let err = start_checkout(&h, &id, "large").await.unwrap_err();
    assert!(matches!(err, ApiError::Validation { field: "tier", .. }));
    assert_eq!(h.gateway.sessions_created(), 0);
}

#[tokio::test]
async fn test_checkout_unknown_placement_is_404() {
    let h = harness();
    let err = start_checkout(&h, &PlacementId::new("PLC-missing"), "small")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_checkout_gateway_failure_is_502_and_stores_nothing() {
    let h = harness();
    let id = create(&h, "front", "small").await;
    h.gateway.set_failing(true);

    let err = start_checkout(&h, &id, "small").await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(h.state.engine.get(&id).unwrap().checkout_session_id, None);

    h.gateway.set_failing(false);
    start_checkout(&h, &id, "small").await.unwrap();
}

#[tokio::test]
async fn test_checkout_on_paid_placement_conflicts() {
    let h = harness();
    let id = create(&h, "front", "small").await;
    deliver(&h, completed("evt_paid", &id)).await.unwrap();
    let err = start_checkout(&h, &id, "small").await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_webhook_duplicate_delivery_is_acknowledged_once() {
    let h = harness();
    let id = create(&h, "back", "small").await;

    let first = deliver(&h, completed("evt_dup", &id)).await.unwrap();
    assert_eq!(first["duplicate"], false);
    let settled = h.state.engine.get(&id).unwrap();

    let second = deliver(&h, completed("evt_dup", &id)).await.unwrap();
    assert_eq!(second["duplicate"], true);
    assert_eq!(h.state.engine.get(&id).unwrap(), settled);

    // A redelivery under a new event id is an idempotent replay.
    deliver(&h, completed("evt_dup_2", &id)).await.unwrap();
    assert_eq!(h.state.engine.get(&id).unwrap(), settled);
}

#[tokio::test]
async fn test_webhook_after_cancel_stays_cancelled() {
    let h = harness();
    let id = create(&h, "back", "small").await;
    h.state
        .engine
        .cancel(&id, CancelReason::Requested)
        .unwrap();

    deliver(&h, completed("evt_late", &id)).await.unwrap();
    let stored = h.state.engine.get(&id).unwrap();
    assert_eq!(stored.status, PlacementStatus::Cancelled);
    assert!(!stored.live);
}

#[tokio::test]
async fn test_webhook_expired_session_cancels_placement() {
    let h = harness();
    let id = create(&h, "front", "medium").await;
    let body = event(
        "evt_exp",
        "checkout.session.expired",
        json!({ "id": "cs_mock_9", "metadata": { "placement_id": id.as_str() } }),
    );
    deliver(&h, body).await.unwrap();

    let stored = h.state.engine.get(&id).unwrap();
    assert_eq!(stored.status, PlacementStatus::Cancelled);
    assert_eq!(stored.cancel_reason, Some(CancelReason::CheckoutExpired));
}

#[tokio::test]
async fn test_expiry_of_superseded_checkout_keeps_placement_payable() {
    let h = harness();
    let id = create(&h, "front", "large").await;
    start_checkout(&h, &id, "large").await.unwrap();
    start_checkout(&h, &id, "large").await.unwrap();
    assert_eq!(
        h.state.engine.get(&id).unwrap().checkout_session_id.as_deref(),
        Some("cs_mock_1")
    );

    let stale_expiry = event(
        "evt_exp_old",
        "checkout.session.expired",
        json!({ "id": "cs_mock_0", "client_reference_id": id.as_str() }),
    );
    deliver(&h, stale_expiry).await.unwrap();
    assert_eq!(h.state.engine.get(&id).unwrap().status, PlacementStatus::Pending);

    deliver(&h, completed_session("evt_paid_new", &id, "cs_mock_1"))
        .await
        .unwrap();
    let stored = h.state.engine.get(&id).unwrap();
    assert_eq!(stored.status, PlacementStatus::Paid);
    assert!(stored.live);
    assert_eq!(stored.settlement.unwrap().transaction_ref, "cs_mock_1");
}

#[tokio::test]
async fn test_expiry_of_attached_checkout_cancels() {
    let h = harness();
    let id = create(&h, "back", "small").await;
    start_checkout(&h, &id, "small").await.unwrap();

    let expiry = event(
        "evt_exp_live",
        "checkout.session.expired",
        json!({ "id": "cs_mock_0", "client_reference_id": id.as_str() }),
    );
    deliver(&h, expiry).await.unwrap();
    let stored = h.state.engine.get(&id).unwrap();
    assert_eq!(stored.status, PlacementStatus::Cancelled);
    assert_eq!(stored.cancel_reason, Some(CancelReason::CheckoutExpired));
}

#[tokio::test]
async fn test_webhook_ignores_other_events_and_missing_reference() {
    let h = harness();
    let ignored = event("evt_other", "invoice.paid", json!({ "id": "in_1" }));
    assert_eq!(deliver(&h, ignored).await.unwrap()["received"], true);

    let unreferenced = event(
        "evt_noref",
        "checkout.session.completed",
        json!({ "id": "cs_1", "amount_total": 500, "currency": "usd" }),
    );
    assert_eq!(deliver(&h, unreferenced).await.unwrap()["received"], true);
}

#[tokio::test]
async fn test_webhook_unknown_placement_is_acknowledged() {
    let h = harness();
    let body = completed("evt_ghost", &PlacementId::new("PLC-ghost"));
    assert_eq!(deliver(&h, body).await.unwrap()["received"], true);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let h = harness();
    let id = create(&h, "front", "small").await;
    let body = completed("evt_forged", &id);
    let headers = signed_headers(&body, "whsec_wrong");

    let err = handle_webhook(State(h.state.clone()), headers, body)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.state.engine.get(&id).unwrap().status, PlacementStatus::Pending);

    let err = handle_webhook(
        State(h.state.clone()),
        HeaderMap::new(),
        completed("evt_unsigned", &id),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WebhookError::MissingSignature));
}

#[tokio::test]
async fn test_webhook_malformed_payload_is_400() {
    let h = harness();
    let body = Bytes::from_static(b"{\"id\": 12}");
    let err = deliver(&h, body).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_disabled_without_secret() {
    let h = harness_with(Secrets::default());
    let body = event("evt_x", "invoice.paid", json!({}));
    let err = deliver(&h, body).await.unwrap_err();
    assert!(matches!(err, WebhookError::Disabled));
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    headers
}

#[tokio::test]
async fn test_admin_cancel_requires_token() {
    let h = harness();
    let id = create(&h, "front", "small").await;

    let err = cancel_placement(State(h.state.clone()), Path(id.to_string()), HeaderMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

    let err = cancel_placement(
        State(h.state.clone()),
        Path(id.to_string()),
        bearer("admin-token-wrong"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

    let admin_cancel = || {
        cancel_placement(
            State(h.state.clone()),
            Path(id.to_string()),
            bearer(ADMIN_TOKEN),
        )
    };
    let Json(first) = admin_cancel().await.unwrap();
    assert!(!first.already_cancelled);
    let Json(second) = admin_cancel().await.unwrap();
    assert!(second.already_cancelled);
    assert_eq!(second.status, PlacementStatus::Cancelled);
}

#[tokio::test]
async fn test_admin_cancel_of_paid_placement_conflicts() {
    let h = harness();
    let id = create(&h, "front", "small").await;
    deliver(&h, completed("evt_admin", &id)).await.unwrap();
    let err = cancel_placement(State(h.state.clone()), Path(id.to_string()), bearer(ADMIN_TOKEN))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_admin_routes_hidden_without_token() {
    let h = harness_with(Secrets::default());
    let id = create(&h, "front", "small").await;
    let err = cancel_placement(State(h.state.clone()), Path(id.to_string()), bearer("anything"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_canvas_reports_frame_and_tier_bounds() {
    let h = harness();
    let Json(view) = canvas(State(h.state.clone())).await;
    assert_eq!(view.frame, h.state.config.canvas.frame);
    assert_eq!(view.tiers.len(), 3);
    let small = &view.tiers[0];
    let bounds = h.state.engine.tiers().bounds(jersey_core::geometry::Tier::Small);
    assert!((small.max_width - bounds.max_width()).abs() < f64::EPSILON);
    assert!((small.default_width - bounds.default_width()).abs() < f64::EPSILON);
    assert_eq!(small.price_cents, 500);
    assert!(view.tiers.windows(2).all(|w| w[0].max_width < w[1].max_width));
}

#[tokio::test]
async fn test_router_serves_every_route_over_http() {
    let h = harness();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = router(h.state.clone());
    let server = tokio::spawn(async move { axum::serve(listener, app).await });
    let client = reqwest::Client::new();

    let canvas: serde_json::Value = client
        .get(format!("{base}/api/canvas"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(canvas["tiers"][2]["tier"], "large");
    assert!(canvas["maxStageWidth"].as_f64().unwrap() > 0.0);

    let malformed = client
        .post(format!("{base}/api/create-placement"))
        .header(header::CONTENT_TYPE, "application/json")
        .body("{\"side\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), reqwest::StatusCode::BAD_REQUEST);
    let error: serde_json::Value = malformed.json().await.unwrap();
    assert!(error["error"].is_string());

    let created: serde_json::Value = client
        .post(format!("{base}/api/create-placement"))
        .json(&draft("back", "medium"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = PlacementId::new(created["placementId"].as_str().unwrap());
    assert_eq!(created["zIndex"], 1);

    let redirect: serde_json::Value = client
        .post(format!("{base}/api/checkout"))
        .json(&json!({ "placementId": id.as_str(), "tier": "medium" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(redirect["redirectUrl"].as_str().unwrap().contains(id.as_str()));

    let body = completed("evt_http", &id);
    let signature = signed_headers(&body, WEBHOOK_SECRET);
    let ack = client
        .post(format!("{base}/api/webhook"))
        .header(SIGNATURE_HEADER, signature[SIGNATURE_HEADER].to_str().unwrap())
        .body(body.to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(ack.status(), reqwest::StatusCode::OK);

    let live: serde_json::Value = client
        .get(format!("{base}/api/placements?side=back"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(live["items"][0]["id"], id.as_str());

    let cancel = client
        .post(format!("{base}/api/placements/{id}/cancel"))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(cancel.status(), reqwest::StatusCode::CONFLICT);

    let debug = client
        .get(format!("{base}/api/debug-env"))
        .send()
        .await
        .unwrap();
    assert_eq!(debug.status(), reqwest::StatusCode::OK);

    server.abort();
}

#[tokio::test]
async fn test_debug_env_masks_secrets() {
    let h = harness();
    let report = diagnostics::report(&h.state);
    assert_eq!(report["STRIPE_SECRET_KEY"], "sk_tes…cdef");
    assert_eq!(report["STRIPE_WEBHOOK_SECRET"], "whsec_…cret");
    assert_eq!(report["tiers.small.price_id"], diagnostics::MISSING);
    assert_eq!(report["payment.gateway"], "mock");
    assert!(report.values().all(|v| !v.contains(WEBHOOK_SECRET)));

    let bare = harness_with(Secrets::default());
    let report = diagnostics::report(&bare.state);
    assert_eq!(report["JERSEY_ADMIN_TOKEN"], diagnostics::MISSING);
}

#[tokio::test]
async fn test_paid_placement_survives_reopen() {
    let h = harness();
    let id = create(&h, "back", "large").await;
    deliver(&h, completed("evt_persist", &id)).await.unwrap();

    let conn = open_connection(&h.state.config.store.path).unwrap();
    let reopened = PlacementEngine::new(
        Arc::new(SqlitePlacementStore::new(conn)),
        h.state.config.tiers.clone(),
    );
    let live = reopened.list_live(jersey_core::placement::Side::Back).unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, id);
    assert_eq!(live[0], h.state.engine.get(&id).unwrap());
}
