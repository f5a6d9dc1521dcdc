//! Transform controller error types.

use thiserror::Error;

use super::TransformState;

/// Errors returned when the controller is driven out of order or fed
/// unusable input.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum TransformError {
    /// The operation needs a loaded image but the controller is not editing.
    #[error("cannot {operation} in state {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the controller was in.
        state: TransformState,
    },

    /// The image's natural aspect ratio is not positive and finite.
    #[error("invalid image aspect ratio: {aspect}")]
    InvalidAspect {
        /// The rejected aspect ratio.
        aspect: f64,
    },

    /// The image reference is missing a URL or storage id.
    #[error("invalid image reference: {reason}")]
    InvalidImage {
        /// What was missing.
        reason: String,
    },

    /// A gesture carried a NaN or infinite coordinate, size or angle.
    #[error("cannot {operation} with non-finite input")]
    NonFiniteInput {
        /// The rejected operation.
        operation: &'static str,
    },
}
