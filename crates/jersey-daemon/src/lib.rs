//! jersey-daemon - Jersey Canvas Placement Service
//!
//! This library serves the shared canvas over HTTP: it persists placements in
//! `SQLite`, starts hosted checkouts, reconciles signed payment webhooks and
//! periodically cancels abandoned drafts. All placement semantics live in
//! `jersey_core`; this crate only adapts them to I/O.
//!
//! # Modules
//!
//! - [`api`]: Router and placement handlers
//! - [`webhook`]: Signature verification and event reconciliation
//! - [`payment`]: Checkout gateway trait and implementations
//! - [`store`]: `SQLite` placement and delivery-id stores
//! - [`sweeper`]: Stale pending placement cancellation
//! - [`diagnostics`]: Masked configuration report
//! - [`state`]: Shared handler state
//! - [`error`]: HTTP error mapping

pub mod api;
pub mod diagnostics;
pub mod error;
pub mod payment;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use jersey_core::{JerseyConfig, PlacementEngine};
use tracing::{info, warn};

use crate::payment::{DisabledGateway, PaymentError, PaymentGateway, StripeCheckoutGateway};
use crate::state::{AppState, Secrets, SharedState};
use crate::store::{SqliteDeliveryStore, SqlitePlacementStore};

/// Errors raised while assembling the service.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The store could not be opened.
    #[error("failed to open placement store: {0}")]
    Store(#[from] jersey_core::store::StoreError),

    /// The payment gateway could not be constructed.
    #[error("failed to initialize payment gateway: {0}")]
    Gateway(#[from] PaymentError),
}

/// Builds the gateway selected by the available secrets.
///
/// Without a secret key checkout is disabled but the rest of the service
/// runs.
pub fn build_gateway(
    config: &JerseyConfig,
    secrets: &Secrets,
) -> Result<Arc<dyn PaymentGateway>, PaymentError> {
    let Some(key) = secrets.gateway_key.clone() else {
        warn!(
            env = %config.payment.secret_key_env,
            "gateway secret key not set; checkout is disabled"
        );
        return Ok(Arc::new(DisabledGateway));
    };
    let gateway = StripeCheckoutGateway::new_with_api_base(
        key,
        config.payment.api_base.clone(),
        Duration::from_secs(config.payment.request_timeout_secs),
    )?;
    Ok(Arc::new(gateway))
}

/// Opens the `SQLite` store named in `config` and assembles the handler state.
pub fn build_state(config: JerseyConfig, secrets: Secrets) -> Result<SharedState, StartupError> {
    let conn = store::open_connection(&config.store.path)?;
    info!(path = %config.store.path.display(), "placement store opened");

    let engine = PlacementEngine::new(
        Arc::new(SqlitePlacementStore::new(Arc::clone(&conn))),
        config.tiers.clone(),
    );
    let deliveries = Arc::new(SqliteDeliveryStore::new(conn));
    let gateway = build_gateway(&config, &secrets)?;
    if secrets.webhook_secret.is_none() {
        warn!(
            env = %config.payment.webhook_secret_env,
            "webhook secret not set; webhook deliveries will be rejected"
        );
    }

    Ok(AppState::new(config, engine, gateway, deliveries, secrets))
}
