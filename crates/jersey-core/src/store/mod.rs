//! Placement store contract.
//!
//! The lifecycle engine talks to persistence only through
//! [`PlacementStore`]. Implementations must provide per-record atomicity and
//! nothing more; in particular no multi-record transactions are assumed.
//!
//! # Contracts
//!
//! - [CTR-ST001] [`PlacementStore::insert`] assigns `z_index = max_z(side) + 1`
//!   atomically with the insert, so concurrent submissions on the same side
//!   never observe the same maximum.
//! - [CTR-ST002] [`PlacementStore::query`] returns records sorted ascending by
//!   `(z_index, created_at, sequence)`.
//! - [CTR-ST003] [`PlacementStore::compare_and_update`] applies the patch only
//!   if the stored status equals the expected status, as one atomic step.
//! - [CTR-ST004] A failed call leaves the stored record unchanged.

mod memory;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::InMemoryPlacementStore;

use crate::geometry::{LogoGeometry, Tier};
use crate::placement::{
    CancelReason, ImageRef, Placement, PlacementId, PlacementStatus, Settlement, Side,
};

/// Errors from a store backend. Always treated as transient by callers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("store backend error: {message}")]
    Backend {
        /// Backend-specific description.
        message: String,
    },

    /// A stored record could not be decoded.
    #[error("corrupt placement record {placement_id}: {reason}")]
    Corrupt {
        /// The record that failed to decode.
        placement_id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The record addressed by an update does not exist.
    #[error("placement not found: {placement_id}")]
    NotFound {
        /// The missing placement.
        placement_id: String,
    },
}

/// Fields supplied when inserting a new placement.
///
/// The store assigns `id`, `z_index`, `created_at` and `sequence`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPlacement {
    /// Jersey side.
    pub side: Side,
    /// Purchased tier.
    pub tier: Tier,
    /// Clamped geometry.
    pub geometry: LogoGeometry,
    /// Uploaded image.
    pub image: ImageRef,
}

/// Partial update applied to an existing placement.
///
/// `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementPatch {
    /// New status.
    pub status: Option<PlacementStatus>,
    /// New live flag.
    pub live: Option<bool>,
    /// New checkout correlation token.
    pub checkout_session_id: Option<String>,
    /// When that checkout session was attached.
    pub checkout_started_at: Option<DateTime<Utc>>,
    /// Settlement metadata.
    pub settlement: Option<Settlement>,
    /// Cancellation reason.
    pub cancel_reason: Option<CancelReason>,
}

impl PlacementPatch {
    /// Applies the patch to an in-memory record.
    pub fn apply_to(&self, placement: &mut Placement) {
        if let Some(status) = self.status {
            placement.status = status;
        }
        if let Some(live) = self.live {
            placement.live = live;
        }
        if let Some(session) = &self.checkout_session_id {
            placement.checkout_session_id = Some(session.clone());
        }
        if let Some(started) = self.checkout_started_at {
            placement.checkout_started_at = Some(started);
        }
        if let Some(settlement) = &self.settlement {
            placement.settlement = Some(settlement.clone());
        }
        if let Some(reason) = self.cancel_reason {
            placement.cancel_reason = Some(reason);
        }
    }
}

/// Filter for [`PlacementStore::query`]. `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementQuery {
    /// Restrict to one side.
    pub side: Option<Side>,
    /// Restrict by live flag.
    pub live: Option<bool>,
    /// Restrict by status.
    pub status: Option<PlacementStatus>,
    /// Only records created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Only records whose [`Placement::last_activity_at`] is strictly before
    /// this instant.
    pub idle_before: Option<DateTime<Utc>>,
}

impl PlacementQuery {
    /// Live placements on `side`.
    #[must_use]
    pub const fn live_on(side: Side) -> Self {
        Self {
            side: Some(side),
            live: Some(true),
            status: Some(PlacementStatus::Paid),
            created_before: None,
            idle_before: None,
        }
    }

    /// Returns `true` if `placement` satisfies the filter.
    #[must_use]
    pub fn matches(&self, placement: &Placement) -> bool {
        self.side.is_none_or(|side| placement.side == side)
            && self.live.is_none_or(|live| placement.live == live)
            && self.status.is_none_or(|status| placement.status == status)
            && self
                .created_before
                .is_none_or(|cutoff| placement.created_at < cutoff)
            && self
                .idle_before
                .is_none_or(|cutoff| placement.last_activity_at() < cutoff)
    }
}

/// Persistence boundary for placements.
pub trait PlacementStore: Send + Sync {
    /// Inserts a new `pending`, not-live placement and assigns its id,
    /// z-index, creation time and sequence (CTR-ST001).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the write fails.
    fn insert(&self, new: NewPlacement) -> Result<Placement, StoreError>;

    /// Loads a placement by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails or the record is corrupt.
    fn get(&self, id: &PlacementId) -> Result<Option<Placement>, StoreError>;

    /// Applies `patch` unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    fn update(&self, id: &PlacementId, patch: &PlacementPatch) -> Result<(), StoreError>;

    /// Applies `patch` only if the record's status is `expected`
    /// (CTR-ST003). Returns whether the patch was applied.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn compare_and_update(
        &self,
        id: &PlacementId,
        expected: PlacementStatus,
        patch: &PlacementPatch,
    ) -> Result<bool, StoreError>;

    /// Returns matching placements in paint order (CTR-ST002).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn query(&self, filter: &PlacementQuery) -> Result<Vec<Placement>, StoreError>;

    /// Highest z-index on `side`, or `0` if the side has no placements.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn max_z(&self, side: Side) -> Result<i64, StoreError>;
}
