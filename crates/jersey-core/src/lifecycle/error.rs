//! Lifecycle error types.

use thiserror::Error;

use crate::placement::PlacementStatus;
use crate::store::StoreError;

/// Errors from placement lifecycle operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    /// A request field failed validation.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// The offending field, as named on the wire.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// No placement has the given id.
    #[error("placement not found: {placement_id}")]
    NotFound {
        /// The missing placement.
        placement_id: String,
    },

    /// The placement's status does not allow the operation.
    #[error("cannot {operation} placement {placement_id} in state {state}")]
    Conflict {
        /// The placement.
        placement_id: String,
        /// Its current status.
        state: PlacementStatus,
        /// The rejected operation.
        operation: &'static str,
    },

    /// The store failed; the caller may retry.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// Returns `true` if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    pub(super) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}
