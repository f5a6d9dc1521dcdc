//! Configuration parsing and management.
//!
//! The service reads a single TOML file (conventionally `jersey.toml`). Every
//! section is optional and falls back to working defaults, so an empty file
//! is a valid configuration. Secrets are never stored in the file: the
//! `*_env` keys name environment variables the daemon reads at startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::geometry::{CanvasFrame, DEFAULT_MAX_STAGE_WIDTH, GeometryError, TierTable};

/// Top-level service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JerseyConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Canvas frame and stage limits.
    #[serde(default)]
    pub canvas: CanvasConfig,

    /// Tier caps, scale range and prices.
    #[serde(default)]
    pub tiers: TierTable,

    /// Payment gateway settings.
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Placement store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Stale-pending sweeper settings.
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Operator endpoint settings.
    #[serde(default)]
    pub admin: AdminConfig,
}

impl JerseyConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails [`Self::validate`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks cross-field constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Geometry`] for an unusable tier table or frame
    /// and [`ConfigError::Validation`] for any other rejected value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tiers.validate()?;
        self.canvas.frame.validate()?;
        if !self.canvas.max_stage_width.is_finite() || self.canvas.max_stage_width <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "canvas.max_stage_width {} must be positive",
                self.canvas.max_stage_width
            )));
        }
        if self.sweeper.enabled && self.sweeper.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sweeper.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.payment.currency.len() != 3
            || !self.payment.currency.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(ConfigError::Validation(format!(
                "payment.currency {:?} must be a three-letter ISO code",
                self.payment.currency
            )));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Public origin of the site, used to build checkout return URLs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: default_public_url(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

/// Canvas frame and stage limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanvasConfig {
    /// Upper bound on the rendered stage width in pixels.
    #[serde(default = "default_max_stage_width")]
    pub max_stage_width: f64,

    /// Frame dimensions defining the normalized coordinate space.
    #[serde(default)]
    pub frame: CanvasFrame,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            max_stage_width: DEFAULT_MAX_STAGE_WIDTH,
            frame: CanvasFrame::default(),
        }
    }
}

const fn default_max_stage_width() -> f64 {
    DEFAULT_MAX_STAGE_WIDTH
}

/// Payment gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentConfig {
    /// Gateway API origin.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the gateway secret key.
    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,

    /// Environment variable holding the webhook signing secret.
    #[serde(default = "default_webhook_secret_env")]
    pub webhook_secret_env: String,

    /// ISO currency code for checkout sessions.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Maximum age of a signed webhook delivery, in seconds.
    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: u64,

    /// Timeout for gateway API calls, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            secret_key_env: default_secret_key_env(),
            webhook_secret_env: default_webhook_secret_env(),
            currency: default_currency(),
            signature_tolerance_secs: default_signature_tolerance_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_secret_key_env() -> String {
    "STRIPE_SECRET_KEY".to_string()
}

fn default_webhook_secret_env() -> String {
    "STRIPE_WEBHOOK_SECRET".to_string()
}

fn default_currency() -> String {
    "usd".to_string()
}

const fn default_signature_tolerance_secs() -> u64 {
    300
}

const fn default_request_timeout_secs() -> u64 {
    10
}

/// Placement store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// `SQLite` database path.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("jersey.db")
}

/// Stale-pending sweeper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweeperConfig {
    /// Run the sweeper at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,

    /// Age after which a pending placement is cancelled, in seconds.
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval_secs(),
            pending_timeout_secs: default_pending_timeout_secs(),
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_sweep_interval_secs() -> u64 {
    300
}

const fn default_pending_timeout_secs() -> u64 {
    // Checkout sessions expire after 24 hours at the gateway.
    24 * 60 * 60
}

/// Operator endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    /// Environment variable holding the operator bearer token. Operator
    /// endpoints are disabled when the variable is unset.
    #[serde(default = "default_admin_token_env")]
    pub token_env: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            token_env: default_admin_token_env(),
        }
    }
}

fn default_admin_token_env() -> String {
    "JERSEY_ADMIN_TOKEN".to_string()
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Tier table or canvas frame rejected.
    #[error("invalid geometry configuration: {0}")]
    Geometry(#[from] GeometryError),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
