//! Hosted checkout sessions.
//!
//! Checkout creation sits behind [`PaymentGateway`] so handlers can be
//! exercised without network access.
//!
//! ```text
//! PaymentGateway (trait)
//!     |
//!     +-- StripeCheckoutGateway   form-encoded POST /v1/checkout/sessions
//!     +-- DisabledGateway         no secret key configured
//!     +-- MockPaymentGateway      deterministic sessions for tests
//! ```
//!
//! The gateway secret key stays in a `SecretString` and is only exposed when
//! the bearer header is built.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jersey_core::geometry::{Tier, TierSpec};
use jersey_core::placement::PlacementId;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Errors from a payment gateway.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PaymentError {
    /// No gateway credentials are configured.
    #[error("payment gateway not configured")]
    NotConfigured,

    /// A gateway input was rejected before any call was made.
    #[error("invalid gateway input {field}: {reason}")]
    InvalidInput {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The gateway call failed or returned a non-success status.
    #[error("gateway HTTP error (status {status:?}): {message}")]
    Http {
        /// HTTP status, when a response was received.
        status: Option<u16>,
        /// Transport or response detail.
        message: String,
    },

    /// The gateway answered with an unusable body.
    #[error("invalid gateway response: {message}")]
    InvalidResponse {
        /// Decode detail.
        message: String,
    },
}

/// What to sell in a checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Placement being paid for; becomes the correlation token.
    pub placement_id: PlacementId,
    /// Purchased tier.
    pub tier: Tier,
    /// Price configuration for the tier.
    pub price: TierSpec,
    /// Lowercase ISO currency code.
    pub currency: String,
    /// Redirect after successful payment.
    pub success_url: String,
    /// Redirect after an abandoned payment.
    pub cancel_url: String,
}

impl CheckoutRequest {
    /// Builds a request with the return URLs derived from `public_url`.
    #[must_use]
    pub fn new(
        placement_id: PlacementId,
        tier: Tier,
        price: TierSpec,
        currency: &str,
        public_url: &str,
    ) -> Self {
        let base = public_url.trim_end_matches('/');
        Self {
            placement_id,
            tier,
            price,
            currency: currency.to_ascii_lowercase(),
            success_url: format!("{base}/success?sid={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{base}/cancel"),
        }
    }

    /// Form fields for the checkout-session endpoint.
    #[must_use]
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("mode".to_string(), "payment".to_string()),
            (
                "client_reference_id".to_string(),
                self.placement_id.to_string(),
            ),
            (
                "metadata[placement_id]".to_string(),
                self.placement_id.to_string(),
            ),
            ("metadata[tier]".to_string(), self.tier.to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
        ];
        match &self.price.price_id {
            Some(price_id) => {
                fields.push(("line_items[0][price]".to_string(), price_id.clone()));
            },
            None => {
                fields.push((
                    "line_items[0][price_data][currency]".to_string(),
                    self.currency.clone(),
                ));
                fields.push((
                    "line_items[0][price_data][unit_amount]".to_string(),
                    self.price.price_cents.to_string(),
                ));
                fields.push((
                    "line_items[0][price_data][product_data][name]".to_string(),
                    format!("Jersey logo placement ({})", self.tier),
                ));
            },
        }
        fields
    }
}

/// A created checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    /// Gateway session identifier.
    pub id: String,
    /// Hosted page the buyer is redirected to.
    pub url: String,
}

/// Creates hosted checkout sessions.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a checkout session for `request`.
    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    /// Returns the gateway name.
    fn name(&self) -> &'static str;
}

/// Stripe Checkout over the REST API.
pub struct StripeCheckoutGateway {
    secret_key: SecretString,
    api_base: String,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for StripeCheckoutGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeCheckoutGateway")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl StripeCheckoutGateway {
    /// Creates a gateway against the public Stripe API.
    ///
    /// # Errors
    ///
    /// See [`Self::new_with_api_base`].
    pub fn new(secret_key: SecretString, timeout: Duration) -> Result<Self, PaymentError> {
        Self::new_with_api_base(secret_key, DEFAULT_STRIPE_API_BASE, timeout)
    }

    /// Creates a gateway against an explicit API origin.
    ///
    /// # Errors
    ///
    /// Returns an error when the key or origin is empty, or the HTTP client
    /// cannot be initialized.
    pub fn new_with_api_base(
        secret_key: SecretString,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PaymentError> {
        if secret_key.expose_secret().trim().is_empty() {
            return Err(PaymentError::InvalidInput {
                field: "secret_key",
                reason: "must not be empty".to_string(),
            });
        }
        let api_base = api_base.into();
        if api_base.trim().is_empty() {
            return Err(PaymentError::InvalidInput {
                field: "api_base",
                reason: "must not be empty".to_string(),
            });
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|error| PaymentError::Http {
                status: None,
                message: error.to_string(),
            })?;

        Ok(Self {
            secret_key,
            api_base,
            http_client,
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeCheckoutGateway {
    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        #[derive(Debug, Deserialize)]
        struct SessionResponse {
            id: String,
            url: Option<String>,
        }

        let endpoint = format!(
            "{}/v1/checkout/sessions",
            self.api_base.trim_end_matches('/')
        );
        let response = self
            .http_client
            .post(endpoint)
            .bearer_auth(self.secret_key.expose_secret())
            .form(&request.form_fields())
            .send()
            .await
            .map_err(|error| PaymentError::Http {
                status: None,
                message: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read checkout response body".to_string());
            return Err(PaymentError::Http {
                status: Some(status.as_u16()),
                message,
            });
        }

        let payload: SessionResponse =
            response
                .json()
                .await
                .map_err(|error| PaymentError::InvalidResponse {
                    message: error.to_string(),
                })?;
        let url = payload.url.ok_or_else(|| PaymentError::InvalidResponse {
            message: "checkout session has no url".to_string(),
        })?;

        debug!(
            placement_id = %request.placement_id,
            session_id = %payload.id,
            "checkout session created"
        );
        Ok(CheckoutSession {
            id: payload.id,
            url,
        })
    }

    fn name(&self) -> &'static str {
        "stripe"
    }
}

/// Gateway used when no secret key is configured. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn create_checkout(
        &self,
        _request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        Err(PaymentError::NotConfigured)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Mock gateway for testing.
///
/// Issues `cs_mock_<n>` sessions without network calls. [`Self::set_failing`]
/// makes subsequent calls fail with an HTTP 503.
#[derive(Debug, Default)]
pub struct MockPaymentGateway {
    counter: AtomicU64,
    failing: AtomicBool,
}

impl MockPaymentGateway {
    /// Creates a new mock gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles failure injection.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of sessions issued so far.
    #[must_use]
    pub fn sessions_created(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PaymentError::Http {
                status: Some(503),
                message: "mock gateway unavailable".to_string(),
            });
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("cs_mock_{n}");
        Ok(CheckoutSession {
            url: format!(
                "https://checkout.mock/{id}?ref={}",
                request.placement_id
            ),
            id,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
