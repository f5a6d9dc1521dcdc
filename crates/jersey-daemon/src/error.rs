//! HTTP error mapping for the placement API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jersey_core::LifecycleError;
use thiserror::Error;
use tracing::{error, warn};

use crate::payment::PaymentError;

/// Errors returned by API handlers.
///
/// Bodies are `{"error": "<message>"}`. Validation and conflict messages are
/// shown to the caller; store and gateway details are logged and replaced
/// with a generic message.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body could not be decoded.
    #[error("malformed request: {0}")]
    BadRequest(String),

    /// A field failed validation.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Missing or wrong operator credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// The addressed resource does not exist, or the route is disabled.
    #[error("{0}")]
    NotFound(String),

    /// The resource's state does not allow the request.
    #[error("{0}")]
    Conflict(String),

    /// The payment gateway failed; the caller may retry.
    #[error("payment gateway error: {0}")]
    Gateway(#[from] PaymentError),

    /// The store failed; the caller may retry.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Gateway(_) => "payment gateway unavailable, try again".to_string(),
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Validation { field, reason } => Self::Validation { field, reason },
            LifecycleError::NotFound { .. } => Self::NotFound(e.to_string()),
            LifecycleError::Conflict { .. } => Self::Conflict(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::Gateway(e) => warn!(error = %e, "payment gateway call failed"),
            Self::Internal(e) => error!(error = %e, "request failed"),
            _ => {},
        }
        let body = serde_json::json!({ "error": self.public_message() });
        (status, Json(body)).into_response()
    }
}
