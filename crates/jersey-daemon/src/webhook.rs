//! Signed payment-gateway webhook.
//!
//! The gateway delivers checkout events at least once, possibly out of order.
//! Each delivery is authenticated, de-duplicated by event id, then mapped
//! onto an idempotent lifecycle command.
//!
//! # Signature scheme
//!
//! ```text
//! Stripe-Signature: t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]
//! v1 = HMAC-SHA256(secret, "<t>.<raw body>")
//! ```
//!
//! # Contracts
//!
//! - [CTR-WH001] The body is verified before it is parsed. Any `v1` entry
//!   may match; comparison is constant-time.
//! - [CTR-WH002] Error responses never expose internal details.
//! - [CTR-WH003] An event id is recorded as processed only after its command
//!   succeeded, so a failed delivery is re-applied when the gateway retries.
//! - [CTR-WH004] Unknown event types are acknowledged and ignored.
//! - [CTR-WH005] An expiry cancels only when it names the checkout session
//!   attached to the placement; expiries of superseded sessions are ignored.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use jersey_core::lifecycle::{
    CancelOutcome, ConfirmOutcome, ExpireOutcome, LifecycleError, PaymentConfirmation,
};
use jersey_core::placement::PlacementId;
use jersey_core::store::StoreError;
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::state::SharedState;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Event confirming a completed checkout.
pub const EVENT_CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Event reporting an abandoned checkout.
pub const EVENT_CHECKOUT_EXPIRED: &str = "checkout.session.expired";

/// Errors that can occur during webhook processing.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// No signing secret is configured.
    #[error("webhook handler is disabled")]
    Disabled,

    /// The signature header is missing.
    #[error("missing signature header")]
    MissingSignature,

    /// The signature header has an invalid format.
    #[error("invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    /// No signature in the header matches the body.
    #[error("invalid signature")]
    InvalidSignature,

    /// The signed timestamp is outside the tolerance window.
    #[error("signature timestamp {timestamp} outside tolerance")]
    TimestampOutOfTolerance {
        /// The signed timestamp.
        timestamp: i64,
    },

    /// The request payload could not be parsed.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Internal error; the gateway should retry.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WebhookError {
    /// Returns the HTTP status code for this error.
    ///
    /// - Disabled: 404 Not Found
    /// - Missing/invalid/stale signature: 401 Unauthorized
    /// - Invalid payload: 400 Bad Request
    /// - Internal: 500 Internal Server Error
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Disabled => StatusCode::NOT_FOUND,
            Self::MissingSignature
            | Self::InvalidSignatureFormat(_)
            | Self::InvalidSignature
            | Self::TimestampOutOfTolerance { .. } => StatusCode::UNAUTHORIZED,
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        // CTR-WH002
        let status = self.status_code();
        let body = match &self {
            Self::Disabled => "Not Found",
            Self::MissingSignature => "Missing signature",
            Self::InvalidSignatureFormat(_) => "Invalid signature format",
            Self::InvalidSignature | Self::TimestampOutOfTolerance { .. } => "Invalid signature",
            Self::InvalidPayload(_) => "Invalid payload",
            Self::Internal(_) => "Internal server error",
        };

        (status, body).into_response()
    }
}

impl From<StoreError> for WebhookError {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Remembers which gateway event ids have been fully processed.
pub trait DeliveryIdStore: Send + Sync {
    /// Returns `true` if `event_id` was already processed.
    fn is_processed(&self, event_id: &str) -> Result<bool, StoreError>;

    /// Records `event_id` as processed. Recording twice is a no-op.
    fn mark_processed(&self, event_id: &str) -> Result<(), StoreError>;
}

/// In-memory [`DeliveryIdStore`] for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryIdStore {
    seen: Mutex<HashSet<String>>,
}

impl InMemoryDeliveryIdStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeliveryIdStore for InMemoryDeliveryIdStore {
    fn is_processed(&self, event_id: &str) -> Result<bool, StoreError> {
        let seen = self.seen.lock().map_err(|_| StoreError::Backend {
            message: "delivery store lock poisoned".to_string(),
        })?;
        Ok(seen.contains(event_id))
    }

    fn mark_processed(&self, event_id: &str) -> Result<(), StoreError> {
        let mut seen = self.seen.lock().map_err(|_| StoreError::Backend {
            message: "delivery store lock poisoned".to_string(),
        })?;
        seen.insert(event_id.to_string());
        Ok(())
    }
}

/// Parsed `Stripe-Signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Signed unix timestamp.
    pub timestamp: i64,
    /// Decoded `v1` signatures.
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses `t=<unix>,v1=<hex>[,...]`. Unknown schemes are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::InvalidSignatureFormat`] if the timestamp or
    /// every `v1` entry is missing, or an entry is not valid hex.
    pub fn parse(header: &str) -> Result<Self, WebhookError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        WebhookError::InvalidSignatureFormat("timestamp is not an integer".into())
                    })?);
                },
                "v1" => {
                    let bytes = hex::decode(value).map_err(|_| {
                        WebhookError::InvalidSignatureFormat("signature is not hex".into())
                    })?;
                    signatures.push(bytes);
                },
                _ => {},
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| WebhookError::InvalidSignatureFormat("missing timestamp".into()))?;
        if signatures.is_empty() {
            return Err(WebhookError::InvalidSignatureFormat(
                "missing v1 signature".into(),
            ));
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Computes the hex `v1` signature of `body` signed at `timestamp`.
///
/// # Errors
///
/// Returns [`WebhookError::Internal`] if the secret is rejected as an HMAC key.
pub fn compute_signature(
    secret: &[u8],
    timestamp: i64,
    body: &[u8],
) -> Result<String, WebhookError> {
    signature_bytes(secret, timestamp, body).map(hex::encode)
}

fn signature_bytes(
    secret: &[u8],
    timestamp: i64,
    body: &[u8],
) -> Result<Vec<u8>, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|err| WebhookError::Internal(format!("invalid webhook secret: {err}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verifies a delivery signature against `secret`.
///
/// # Errors
///
/// Returns a signature error if the header is malformed, the timestamp is
/// more than `tolerance_secs` away from `now`, or no `v1` entry matches.
pub fn verify_signature(
    secret: &[u8],
    header: &str,
    body: &[u8],
    now: i64,
    tolerance_secs: u64,
) -> Result<(), WebhookError> {
    let parsed = SignatureHeader::parse(header)?;
    if now.abs_diff(parsed.timestamp) > tolerance_secs {
        return Err(WebhookError::TimestampOutOfTolerance {
            timestamp: parsed.timestamp,
        });
    }

    let expected = signature_bytes(secret, parsed.timestamp, body)?;
    let matched = parsed
        .signatures
        .iter()
        .fold(false, |acc, candidate| acc | bool::from(expected.ct_eq(candidate)));
    if matched {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

#[derive(Debug, Deserialize)]
struct GatewayEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
}

impl CheckoutSessionObject {
    fn placement_id(&self) -> Option<PlacementId> {
        self.client_reference_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| {
                self.metadata
                    .as_ref()
                    .and_then(|m| m.get("placement_id"))
                    .map(String::as_str)
                    .filter(|id| !id.is_empty())
            })
            .map(PlacementId::from)
    }

    fn payer_email(&self) -> Option<String> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.clone())
            .or_else(|| self.customer_email.clone())
    }
}

/// What a delivery resulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A completed checkout was applied (or was a replay).
    Confirmed(ConfirmOutcome),
    /// An expired checkout cancelled its placement (or was a replay).
    Cancelled(CancelOutcome),
    /// The event carried nothing to act on.
    Ignored,
    /// The event id had already been processed.
    Duplicate,
}

/// Authenticates and applies one delivery.
///
/// # Errors
///
/// Returns [`WebhookError`] for authentication and payload failures, and
/// [`WebhookError::Internal`] when the store fails.
pub fn process_delivery(
    state: &SharedState,
    signature: Option<&str>,
    body: &[u8],
    now: i64,
) -> Result<WebhookOutcome, WebhookError> {
    let secret = state.secrets.webhook_secret.as_ref().ok_or(WebhookError::Disabled)?;
    let signature = signature.ok_or(WebhookError::MissingSignature)?;
    if let Err(e) = verify_signature(
        secret.expose_secret().as_bytes(),
        signature,
        body,
        now,
        state.config.payment.signature_tolerance_secs,
    ) {
        warn!(error = %e, "webhook signature rejected");
        return Err(e);
    }

    let event: GatewayEvent =
        serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    // CTR-WH003
    if state.deliveries.is_processed(&event.id)? {
        debug!(event_id = %event.id, "duplicate webhook delivery acknowledged");
        return Ok(WebhookOutcome::Duplicate);
    }

    let outcome = match event.event_type.as_str() {
        EVENT_CHECKOUT_COMPLETED => on_checkout_completed(state, &event)?,
        EVENT_CHECKOUT_EXPIRED => on_checkout_expired(state, &event)?,
        other => {
            debug!(event_id = %event.id, event_type = other, "webhook event ignored");
            WebhookOutcome::Ignored
        },
    };

    state.deliveries.mark_processed(&event.id)?;
    Ok(outcome)
}

fn session_object(event: &GatewayEvent) -> Result<CheckoutSessionObject, WebhookError> {
    serde_json::from_value(event.data.object.clone())
        .map_err(|e| WebhookError::InvalidPayload(e.to_string()))
}

fn on_checkout_completed(
    state: &SharedState,
    event: &GatewayEvent,
) -> Result<WebhookOutcome, WebhookError> {
    let session = session_object(event)?;
    let Some(placement_id) = session.placement_id() else {
        warn!(
            event_id = %event.id,
            session_id = %session.id,
            "completed checkout carries no placement id"
        );
        return Ok(WebhookOutcome::Ignored);
    };

    let confirmation = PaymentConfirmation {
        placement_id,
        payer_email: session.payer_email(),
        amount_cents: session.amount_total.unwrap_or(0),
        currency: session
            .currency
            .clone()
            .unwrap_or_else(|| state.config.payment.currency.clone()),
        transaction_ref: session.id.clone(),
    };
    let outcome = state
        .engine
        .confirm(&confirmation)
        .map_err(|e| WebhookError::Internal(e.to_string()))?;
    info!(
        event_id = %event.id,
        placement_id = %confirmation.placement_id,
        outcome = ?outcome,
        "checkout completion processed"
    );
    Ok(WebhookOutcome::Confirmed(outcome))
}

fn on_checkout_expired(
    state: &SharedState,
    event: &GatewayEvent,
) -> Result<WebhookOutcome, WebhookError> {
    let session = session_object(event)?;
    let Some(placement_id) = session.placement_id() else {
        return Ok(WebhookOutcome::Ignored);
    };

    // CTR-WH005
    match state.engine.expire_checkout(&placement_id, &session.id) {
        Ok(ExpireOutcome::Cancelled(outcome)) => Ok(WebhookOutcome::Cancelled(outcome)),
        Ok(ExpireOutcome::Superseded) => Ok(WebhookOutcome::Ignored),
        Err(LifecycleError::NotFound { .. }) => {
            warn!(placement_id = %placement_id, "expired checkout for unknown placement");
            Ok(WebhookOutcome::Ignored)
        },
        Err(LifecycleError::Conflict { state: status, .. }) => {
            debug!(placement_id = %placement_id, status = %status, "expired checkout ignored");
            Ok(WebhookOutcome::Ignored)
        },
        Err(e) => Err(WebhookError::Internal(e.to_string())),
    }
}

/// `POST /api/webhook`.
pub async fn handle_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, WebhookError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let now = chrono::Utc::now().timestamp();
    let outcome = tokio::task::spawn_blocking(move || {
        process_delivery(&state, signature.as_deref(), &body, now)
    })
    .await
    .map_err(|e| WebhookError::Internal(format!("spawn_blocking failed: {e}")))??;
    Ok(Json(serde_json::json!({
        "received": true,
        "duplicate": outcome == WebhookOutcome::Duplicate,
    })))
}
