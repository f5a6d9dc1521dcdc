//! Shared daemon state.
//!
//! One [`AppState`] is built at startup and handed to every handler behind an
//! `Arc`. Nothing in it is mutated after construction; the store and the
//! delivery-id store carry their own synchronization.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jersey_core::{JerseyConfig, PlacementEngine};
use secrecy::SecretString;

use crate::payment::PaymentGateway;
use crate::webhook::DeliveryIdStore;

/// Shared daemon state.
pub type SharedState = Arc<AppState>;

/// Secrets read from the environment at startup.
#[derive(Debug, Default, Clone)]
pub struct Secrets {
    /// Gateway API secret key.
    pub gateway_key: Option<SecretString>,
    /// Webhook signing secret. The webhook is disabled without it.
    pub webhook_secret: Option<SecretString>,
    /// Operator bearer token. Operator routes answer 404 without it.
    pub admin_token: Option<SecretString>,
}

impl Secrets {
    /// Reads every secret named in `config` from the process environment.
    /// Unset and blank variables count as missing.
    #[must_use]
    pub fn from_env(config: &JerseyConfig) -> Self {
        Self {
            gateway_key: read_secret(&config.payment.secret_key_env),
            webhook_secret: read_secret(&config.payment.webhook_secret_env),
            admin_token: read_secret(&config.admin.token_env),
        }
    }
}

fn read_secret(name: &str) -> Option<SecretString> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(SecretString::from)
}

/// Everything a request handler needs.
pub struct AppState {
    /// Placement lifecycle engine.
    pub engine: PlacementEngine,
    /// Checkout session factory.
    pub gateway: Arc<dyn PaymentGateway>,
    /// Processed webhook event ids.
    pub deliveries: Arc<dyn DeliveryIdStore>,
    /// Environment secrets.
    pub secrets: Secrets,
    /// Validated configuration.
    pub config: JerseyConfig,
    /// Time the daemon started.
    pub started_at: DateTime<Utc>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("engine", &self.engine)
            .field("gateway", &self.gateway.name())
            .field("secrets", &self.secrets)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Bundles the collaborators into a shareable state handle.
    #[must_use]
    pub fn new(
        config: JerseyConfig,
        engine: PlacementEngine,
        gateway: Arc<dyn PaymentGateway>,
        deliveries: Arc<dyn DeliveryIdStore>,
        secrets: Secrets,
    ) -> SharedState {
        Arc::new(Self {
            engine,
            gateway,
            deliveries,
            secrets,
            config,
            started_at: Utc::now(),
        })
    }
}
