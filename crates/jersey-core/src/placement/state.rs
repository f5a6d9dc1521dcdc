//! Placement record types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{LogoGeometry, Tier};

/// Prefix of every placement identifier.
const PLACEMENT_ID_PREFIX: &str = "PLC-";

/// Errors from parsing placement enums.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PlacementError {
    /// The string does not name a jersey side.
    #[error("unknown side: {value}")]
    UnknownSide {
        /// The rejected value.
        value: String,
    },

    /// The string does not name a placement status.
    #[error("unknown placement status: {value}")]
    UnknownStatus {
        /// The rejected value.
        value: String,
    },

    /// The string does not name a cancellation reason.
    #[error("unknown cancel reason: {value}")]
    UnknownCancelReason {
        /// The rejected value.
        value: String,
    },
}

/// Side of the jersey a placement lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Front of the jersey.
    Front,
    /// Back of the jersey.
    Back,
}

impl Side {
    /// Both sides.
    pub const ALL: [Self; 2] = [Self::Front, Self::Back];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Back => "back",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "front" => Ok(Self::Front),
            "back" => Ok(Self::Back),
            _ => Err(PlacementError::UnknownSide {
                value: s.to_string(),
            }),
        }
    }
}

/// Payment lifecycle status.
///
/// ```text
/// Pending --confirm--> Paid (live)
/// Pending --cancel---> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementStatus {
    /// Draft submitted, payment not yet confirmed.
    Pending,
    /// Payment confirmed; terminal.
    Paid,
    /// Abandoned; terminal.
    Cancelled,
}

impl PlacementStatus {
    /// Returns the stored name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns `true` for states no transition leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }
}

impl fmt::Display for PlacementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlacementStatus {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(PlacementError::UnknownStatus {
                value: s.to_string(),
            }),
        }
    }
}

/// Why a placement was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Explicit cancellation by an operator or the buyer.
    Requested,
    /// The payment gateway reported the checkout session expired.
    CheckoutExpired,
    /// Swept after sitting in `pending` past the timeout window.
    Stale,
}

impl CancelReason {
    /// Returns the stored name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::CheckoutExpired => "checkout_expired",
            Self::Stale => "stale",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CancelReason {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "checkout_expired" => Ok(Self::CheckoutExpired),
            "stale" => Ok(Self::Stale),
            _ => Err(PlacementError::UnknownCancelReason {
                value: s.to_string(),
            }),
        }
    }
}

/// Opaque placement identifier, also used as the payment correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlacementId(String);

impl PlacementId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{PLACEMENT_ID_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    /// Wraps an existing identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlacementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlacementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Reference to an image uploaded to the external blob host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    /// Public URL of the image.
    pub url: String,
    /// Blob-host identifier of the image.
    pub storage_id: String,
}

/// Settlement metadata recorded when payment is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Payer contact email; empty when the gateway did not provide one.
    pub payer_email: String,
    /// Amount paid in minor currency units.
    pub amount_cents: i64,
    /// ISO currency code, lowercase.
    pub currency: String,
    /// External transaction reference (checkout session id).
    pub transaction_ref: String,
    /// When the confirmation was applied.
    pub settled_at: DateTime<Utc>,
}

/// Sort key that orders placements for painting.
pub type PaintOrderKey = (i64, DateTime<Utc>, u64);

/// One logo placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    /// Identity and correlation key.
    pub id: PlacementId,
    /// Jersey side.
    pub side: Side,
    /// Purchased tier.
    pub tier: Tier,
    /// Normalized geometry; width is already clamped to the tier.
    pub geometry: LogoGeometry,
    /// Uploaded image.
    pub image: ImageRef,
    /// Paint order within the side.
    pub z_index: i64,
    /// Lifecycle status.
    pub status: PlacementStatus,
    /// Visible to all viewers.
    pub live: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Store-assigned insertion sequence; final ordering tie-break.
    pub sequence: u64,
    /// Checkout session correlated with this placement.
    pub checkout_session_id: Option<String>,
    /// When the most recent checkout session was attached.
    #[serde(default)]
    pub checkout_started_at: Option<DateTime<Utc>>,
    /// Present once the placement is paid.
    pub settlement: Option<Settlement>,
    /// Present once the placement is cancelled.
    pub cancel_reason: Option<CancelReason>,
}

impl Placement {
    /// Key used to order placements for painting.
    #[must_use]
    pub const fn paint_order_key(&self) -> PaintOrderKey {
        (self.z_index, self.created_at, self.sequence)
    }

    /// Most recent lifecycle activity: the latest checkout start, otherwise
    /// creation.
    #[must_use]
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.checkout_started_at
            .map_or(self.created_at, |started| started.max(self.created_at))
    }

    /// Returns `true` if other clients may see this placement.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.live && matches!(self.status, PlacementStatus::Paid)
    }
}

/// Sorts placements ascending by `(z_index, created_at, sequence)`.
pub fn sort_by_paint_order(placements: &mut [Placement]) {
    placements.sort_by_key(Placement::paint_order_key);
}
