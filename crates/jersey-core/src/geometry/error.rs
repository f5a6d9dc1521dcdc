//! Geometry module error types.

use thiserror::Error;

/// Errors raised while parsing tiers or validating geometry configuration.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum GeometryError {
    /// The string does not name a tier.
    #[error("unknown tier: {value}")]
    UnknownTier {
        /// The rejected value.
        value: String,
    },

    /// The configured tier table cannot produce usable bounds.
    #[error("invalid tier table: {reason}")]
    InvalidTierTable {
        /// Why the table was rejected.
        reason: String,
    },

    /// The canvas frame has a non-positive or non-finite dimension.
    #[error("invalid canvas frame {width}x{height}")]
    InvalidFrame {
        /// Configured frame width.
        width: f64,
        /// Configured frame height.
        height: f64,
    },
}
