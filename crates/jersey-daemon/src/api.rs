//! Placement HTTP API.
//!
//! # Routes
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/api/canvas` | Canvas frame and tier bounds |
//! | GET | `/api/placements?side=` | Live layers for one side |
//! | POST | `/api/create-placement` | Submit a draft |
//! | POST | `/api/checkout` | Start payment for a pending placement |
//! | POST | `/api/webhook` | Gateway callbacks |
//! | POST | `/api/placements/{id}/cancel` | Operator cancel |
//! | GET | `/api/debug-env` | Masked diagnostics |
//!
//! # Contracts
//!
//! - [CTR-AP001] Every error body is `{"error": ...}`; malformed JSON is a
//!   400, never axum's default 415/422.
//! - [CTR-AP002] The checkout session id is stored on the placement before
//!   the redirect URL is returned.
//! - [CTR-AP003] Operator routes answer 404 when no admin token is
//!   configured and compare bearer tokens in constant time.
//! - [CTR-AP004] Store calls run on the blocking pool, never on an async
//!   worker thread.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, header};
use axum::routing::{get, post};
use axum::{Json, Router};
use jersey_core::geometry::{CanvasFrame, Tier};
use jersey_core::lifecycle::{
    CancelOutcome, CreatePlacement, CreatedPlacement, LifecycleError,
};
use jersey_core::placement::{
    CancelReason, ImageRef, Placement, PlacementId, PlacementStatus, Side,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::diagnostics::debug_env;
use crate::error::ApiError;
use crate::payment::CheckoutRequest;
use crate::state::SharedState;
use crate::webhook::handle_webhook;

/// Builds the service router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/canvas", get(canvas))
        .route("/api/placements", get(list_placements))
        .route("/api/create-placement", post(create_placement))
        .route("/api/checkout", post(checkout))
        .route("/api/webhook", post(handle_webhook))
        .route("/api/placements/{id}/cancel", post(cancel_placement))
        .route("/api/debug-env", get(debug_env))
        .with_state(state)
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Runs a synchronous engine call on the blocking pool (CTR-AP004).
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, LifecycleError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("spawn_blocking failed: {e}")))?
        .map_err(ApiError::from)
}

/// Width bounds and price of one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierView {
    /// The tier.
    pub tier: Tier,
    /// Smallest width fraction.
    pub min_width: f64,
    /// Largest width fraction.
    pub max_width: f64,
    /// Width of a freshly loaded image.
    pub default_width: f64,
    /// Price in minor currency units.
    pub price_cents: i64,
}

/// Response of `GET /api/canvas`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasView {
    /// Frame defining the normalized coordinate space.
    pub frame: CanvasFrame,
    /// Upper bound on the rendered stage width in pixels.
    pub max_stage_width: f64,
    /// ISO currency of every price.
    pub currency: String,
    /// Every tier, smallest first.
    pub tiers: Vec<TierView>,
}

/// `GET /api/canvas`.
pub async fn canvas(State(state): State<SharedState>) -> Json<CanvasView> {
    let table = state.engine.tiers();
    let tiers = Tier::ALL
        .into_iter()
        .map(|tier| {
            let bounds = table.bounds(tier);
            TierView {
                tier,
                min_width: bounds.min_width(),
                max_width: bounds.max_width(),
                default_width: bounds.default_width(),
                price_cents: table.spec(tier).price_cents,
            }
        })
        .collect();
    Json(CanvasView {
        frame: state.config.canvas.frame,
        max_stage_width: state.config.canvas.max_stage_width,
        currency: state.config.payment.currency.clone(),
        tiers,
    })
}

/// Query string of `GET /api/placements`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// `front` (default) or `back`.
    #[serde(default)]
    pub side: Option<String>,
}

/// One live layer as served to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementView {
    /// Placement id.
    pub id: PlacementId,
    /// Jersey side.
    pub side: Side,
    /// Purchased tier.
    pub tier: Tier,
    /// Left edge, fraction of canvas width.
    pub x: f64,
    /// Top edge, fraction of canvas height.
    pub y: f64,
    /// Width, fraction of canvas width.
    pub width_fraction: f64,
    /// Clockwise rotation in `[0, 360)`.
    pub rotation_degrees: f64,
    /// Paint order within the side.
    pub z_index: i64,
    /// Uploaded image.
    pub image_reference: ImageRef,
}

impl From<Placement> for PlacementView {
    fn from(p: Placement) -> Self {
        Self {
            id: p.id,
            side: p.side,
            tier: p.tier,
            x: p.geometry.x,
            y: p.geometry.y,
            width_fraction: p.geometry.width_fraction,
            rotation_degrees: p.geometry.rotation_degrees,
            z_index: p.z_index,
            image_reference: p.image,
        }
    }
}

/// Response of `GET /api/placements`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementList {
    /// Live layers in paint order.
    pub items: Vec<PlacementView>,
}

/// `GET /api/placements`.
pub async fn list_placements(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<PlacementList>, ApiError> {
    let side = match query.side.as_deref() {
        None | Some("") => Side::Front,
        Some(raw) => raw.parse::<Side>().map_err(|e| ApiError::Validation {
            field: "side",
            reason: e.to_string(),
        })?,
    };
    let engine = state.engine.clone();
    let items = run_blocking(move || engine.list_live(side))
        .await?
        .into_iter()
        .map(PlacementView::from)
        .collect();
    Ok(Json(PlacementList { items }))
}

/// `POST /api/create-placement`.
pub async fn create_placement(
    State(state): State<SharedState>,
    payload: Result<Json<CreatePlacement>, JsonRejection>,
) -> Result<Json<CreatedPlacement>, ApiError> {
    let request = json_body(payload)?;
    let engine = state.engine.clone();
    Ok(Json(run_blocking(move || engine.create(request)).await?))
}

/// Body of `POST /api/checkout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    /// Placement returned by create.
    pub placement_id: String,
    /// Tier the buyer is paying for; must match the placement.
    pub tier: String,
}

/// Response of `POST /api/checkout`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    /// Hosted checkout page.
    pub redirect_url: String,
}

/// `POST /api/checkout`.
pub async fn checkout(
    State(state): State<SharedState>,
    payload: Result<Json<CheckoutBody>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let body = json_body(payload)?;
    if body.placement_id.trim().is_empty() {
        return Err(ApiError::Validation {
            field: "placementId",
            reason: "must not be empty".to_string(),
        });
    }
    let tier = body.tier.parse::<Tier>().map_err(|e| ApiError::Validation {
        field: "tier",
        reason: e.to_string(),
    })?;

    let placement_id = PlacementId::new(body.placement_id);
    let placement = {
        let engine = state.engine.clone();
        let id = placement_id.clone();
        run_blocking(move || engine.get(&id)).await?
    };
    if placement.tier != tier {
        return Err(ApiError::Validation {
            field: "tier",
            reason: format!("placement was created as {}", placement.tier),
        });
    }
    if placement.status != PlacementStatus::Pending {
        return Err(ApiError::Conflict(format!(
            "placement {placement_id} is {}",
            placement.status
        )));
    }

    let request = CheckoutRequest::new(
        placement_id.clone(),
        tier,
        state.engine.tiers().spec(tier).clone(),
        &state.config.payment.currency,
        &state.config.server.public_url,
    );
    let session = state.gateway.create_checkout(&request).await?;

    // CTR-AP002
    {
        let engine = state.engine.clone();
        let id = placement_id.clone();
        let session_id = session.id.clone();
        run_blocking(move || engine.attach_checkout(&id, &session_id)).await?;
    }
    info!(
        placement_id = %placement_id,
        tier = %tier,
        session_id = %session.id,
        gateway = state.gateway.name(),
        "checkout started"
    );
    Ok(Json(CheckoutResponse {
        redirect_url: session.url,
    }))
}

/// Response of `POST /api/placements/{id}/cancel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    /// The cancelled placement.
    pub placement_id: PlacementId,
    /// Always `cancelled`.
    pub status: PlacementStatus,
    /// `true` if the placement was already cancelled.
    pub already_cancelled: bool,
}

fn authorize_admin(state: &SharedState, headers: &HeaderMap) -> Result<(), ApiError> {
    // CTR-AP003
    let Some(expected) = state.secrets.admin_token.as_ref() else {
        return Err(ApiError::NotFound("not found".to_string()));
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;
    let matches: bool = presented
        .as_bytes()
        .ct_eq(expected.expose_secret().as_bytes())
        .into();
    if matches {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// `POST /api/placements/{id}/cancel`.
pub async fn cancel_placement(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CancelResponse>, ApiError> {
    authorize_admin(&state, &headers)?;
    let placement_id = PlacementId::new(id);
    let engine = state.engine.clone();
    let id = placement_id.clone();
    let outcome = run_blocking(move || engine.cancel(&id, CancelReason::Requested)).await?;
    Ok(Json(CancelResponse {
        placement_id,
        status: PlacementStatus::Cancelled,
        already_cancelled: outcome == CancelOutcome::AlreadyCancelled,
    }))
}
