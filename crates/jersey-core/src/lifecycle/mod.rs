//! Placement payment lifecycle.
//!
//! [`PlacementEngine`] takes a placement from an unpaid draft to a confirmed,
//! ordered, immutable live layer. Payment confirmation arrives from an
//! external gateway with at-least-once, possibly out-of-order delivery, so
//! every transition is guarded by the placement's current status rather than
//! by delivery bookkeeping.
//!
//! ```text
//!             confirm
//!   Pending ----------> Paid (live)
//!      |
//!      +--------------> Cancelled
//!     cancel / expire / stale
//! ```
//!
//! # Invariants
//!
//! - [INV-LC001] `live` is set only by the `Pending -> Paid` transition and is
//!   never cleared.
//! - [INV-LC002] Confirming twice has the same effect as confirming once; the
//!   settlement recorded by the first confirmation is kept.
//! - [INV-LC003] A cancelled placement never becomes live.
//! - [INV-LC004] Every transition is a single
//!   [`PlacementStore::compare_and_update`] guarded on `Pending`, so
//!   concurrent deliveries cannot both win.
//! - [INV-LC005] Only the expiry of the attached checkout session cancels a
//!   placement, and the stale sweep measures idleness from the latest
//!   checkout start, so a session the buyer can still pay is never orphaned.

mod error;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use error::LifecycleError;

use crate::geometry::{LogoGeometry, Tier, TierTable, clamp_width, normalize_rotation};
use crate::placement::{
    CancelReason, ImageRef, Placement, PlacementId, PlacementStatus, Settlement, Side,
};
use crate::store::{NewPlacement, PlacementPatch, PlacementQuery, PlacementStore};
use crate::transform::PlacementDraft;

/// A draft submission.
///
/// Side and tier are carried as strings so an unknown value is reported as a
/// field validation failure instead of a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlacement {
    /// `front` or `back`.
    pub side: String,
    /// `small`, `medium` or `large`.
    pub tier: String,
    /// Left edge, fraction of canvas width.
    pub x: f64,
    /// Top edge, fraction of canvas height.
    pub y: f64,
    /// Requested width; defaults to the tier's default width.
    #[serde(default)]
    pub width_fraction: Option<f64>,
    /// Requested rotation; defaults to `0`.
    #[serde(default)]
    pub rotation_degrees: Option<f64>,
    /// Uploaded image.
    #[serde(rename = "imageReference")]
    pub image: ImageRef,
}

impl From<PlacementDraft> for CreatePlacement {
    fn from(draft: PlacementDraft) -> Self {
        Self {
            side: draft.side.to_string(),
            tier: draft.tier.to_string(),
            x: draft.geometry.x,
            y: draft.geometry.y,
            width_fraction: Some(draft.geometry.width_fraction),
            rotation_degrees: Some(draft.geometry.rotation_degrees),
            image: draft.image,
        }
    }
}

/// Result of a successful [`PlacementEngine::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPlacement {
    /// Identity of the new placement.
    pub placement_id: PlacementId,
    /// Paint order assigned by the store.
    pub z_index: i64,
}

/// A payment confirmation reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    /// Placement the payment is for.
    pub placement_id: PlacementId,
    /// Payer contact email, if the gateway collected one.
    pub payer_email: Option<String>,
    /// Amount paid in minor currency units.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Gateway transaction reference.
    pub transaction_ref: String,
}

/// Why a confirmation was dropped without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No placement has the confirmed id.
    UnknownPlacement,
    /// The placement was cancelled before payment was confirmed.
    Cancelled,
}

impl DiscardReason {
    /// Returns the log name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownPlacement => "unknown_placement",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome of [`PlacementEngine::confirm`]. None of these is an error to the
/// caller: the delivery is acknowledged in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The placement moved to `Paid` and went live.
    Applied,
    /// The placement was already paid; nothing changed.
    AlreadyPaid,
    /// The confirmation was dropped.
    Discarded {
        /// Why it was dropped.
        reason: DiscardReason,
    },
}

/// Outcome of a successful [`PlacementEngine::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The placement moved to `Cancelled`.
    Cancelled,
    /// The placement was already cancelled; nothing changed.
    AlreadyCancelled,
}

/// Outcome of a successful [`PlacementEngine::expire_checkout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// The expired session was the attached one; the placement is cancelled.
    Cancelled(CancelOutcome),
    /// A newer checkout session is attached; nothing changed.
    Superseded,
}

/// Drives placements through their payment lifecycle.
#[derive(Clone)]
pub struct PlacementEngine {
    store: Arc<dyn PlacementStore>,
    tiers: TierTable,
}

impl std::fmt::Debug for PlacementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementEngine")
            .field("tiers", &self.tiers)
            .finish_non_exhaustive()
    }
}

impl PlacementEngine {
    /// Creates an engine over `store` using `tiers` for width bounds.
    #[must_use]
    pub fn new(store: Arc<dyn PlacementStore>, tiers: TierTable) -> Self {
        Self { store, tiers }
    }

    /// The tier table in use.
    #[must_use]
    pub const fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// Validates and persists a new `Pending`, not-live placement.
    pub fn create(&self, request: CreatePlacement) -> Result<CreatedPlacement, LifecycleError> {
        let side: Side = request
            .side
            .parse()
            .map_err(|_| LifecycleError::validation("side", "must be front or back"))?;
        let tier: Tier = request
            .tier
            .parse()
            .map_err(|_| LifecycleError::validation("tier", "must be small, medium or large"))?;
        if !request.x.is_finite() {
            return Err(LifecycleError::validation("x", "must be a finite number"));
        }
        if !request.y.is_finite() {
            return Err(LifecycleError::validation("y", "must be a finite number"));
        }
        if request.width_fraction.is_some_and(|w| !w.is_finite()) {
            return Err(LifecycleError::validation(
                "widthFraction",
                "must be a finite number",
            ));
        }
        if request.rotation_degrees.is_some_and(|r| !r.is_finite()) {
            return Err(LifecycleError::validation(
                "rotationDegrees",
                "must be a finite number",
            ));
        }
        validate_image(&request.image)?;

        let bounds = self.tiers.bounds(tier);
        let width = clamp_width(
            &bounds,
            request.width_fraction.unwrap_or_else(|| bounds.default_width()),
        );
        let geometry = LogoGeometry {
            x: request.x,
            y: request.y,
            width_fraction: width,
            rotation_degrees: normalize_rotation(request.rotation_degrees.unwrap_or(0.0)),
        };

        let placement = self.store.insert(NewPlacement {
            side,
            tier,
            geometry,
            image: request.image,
        })?;
        info!(
            placement_id = %placement.id,
            side = %side,
            tier = %tier,
            z_index = placement.z_index,
            width_fraction = width,
            "placement created"
        );
        Ok(CreatedPlacement {
            placement_id: placement.id,
            z_index: placement.z_index,
        })
    }

    /// Loads a placement.
    pub fn get(&self, id: &PlacementId) -> Result<Placement, LifecycleError> {
        self.store
            .get(id)?
            .ok_or_else(|| LifecycleError::NotFound {
                placement_id: id.to_string(),
            })
    }

    /// Stores the payment correlation token on a `Pending` placement and
    /// records when checkout started. A later call replaces both.
    pub fn attach_checkout(
        &self,
        id: &PlacementId,
        session_id: &str,
    ) -> Result<(), LifecycleError> {
        if session_id.trim().is_empty() {
            return Err(LifecycleError::validation("sessionId", "must not be empty"));
        }
        let patch = PlacementPatch {
            checkout_session_id: Some(session_id.to_string()),
            checkout_started_at: Some(Utc::now()),
            ..PlacementPatch::default()
        };
        if self
            .store
            .compare_and_update(id, PlacementStatus::Pending, &patch)?
        {
            debug!(placement_id = %id, session_id, "checkout session attached");
            return Ok(());
        }
        let current = self.get(id)?;
        Err(LifecycleError::Conflict {
            placement_id: id.to_string(),
            state: current.status,
            operation: "attach checkout to",
        })
    }

    /// Applies a payment confirmation. Safe under re-delivery and
    /// out-of-order delivery.
    pub fn confirm(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmOutcome, LifecycleError> {
        let id = &confirmation.placement_id;
        let Some(current) = self.store.get(id)? else {
            return Ok(discard(id, DiscardReason::UnknownPlacement));
        };
        if current.status == PlacementStatus::Pending {
            let patch = PlacementPatch {
                status: Some(PlacementStatus::Paid),
                live: Some(true),
                settlement: Some(Settlement {
                    payer_email: confirmation.payer_email.clone().unwrap_or_default(),
                    amount_cents: confirmation.amount_cents,
                    currency: confirmation.currency.to_ascii_lowercase(),
                    transaction_ref: confirmation.transaction_ref.clone(),
                    settled_at: Utc::now(),
                }),
                ..PlacementPatch::default()
            };
            if self
                .store
                .compare_and_update(id, PlacementStatus::Pending, &patch)?
            {
                info!(
                    placement_id = %id,
                    side = %current.side,
                    amount_cents = confirmation.amount_cents,
                    transaction_ref = %confirmation.transaction_ref,
                    "placement paid and live"
                );
                return Ok(ConfirmOutcome::Applied);
            }
        }

        // Either it was already settled, or a concurrent transition won the
        // guard; classify by what is stored now.
        let status = self
            .store
            .get(id)?
            .map_or(current.status, |p| p.status);
        match status {
            PlacementStatus::Paid => {
                debug!(placement_id = %id, "confirmation replay ignored");
                Ok(ConfirmOutcome::AlreadyPaid)
            },
            PlacementStatus::Cancelled => Ok(discard(id, DiscardReason::Cancelled)),
            PlacementStatus::Pending => Err(LifecycleError::Conflict {
                placement_id: id.to_string(),
                state: status,
                operation: "confirm",
            }),
        }
    }

    /// Cancels a `Pending` placement. Cancelling an already cancelled
    /// placement is a no-op.
    pub fn cancel(
        &self,
        id: &PlacementId,
        reason: CancelReason,
    ) -> Result<CancelOutcome, LifecycleError> {
        let patch = PlacementPatch {
            status: Some(PlacementStatus::Cancelled),
            cancel_reason: Some(reason),
            ..PlacementPatch::default()
        };
        if self
            .store
            .compare_and_update(id, PlacementStatus::Pending, &patch)?
        {
            info!(placement_id = %id, reason = %reason, "placement cancelled");
            return Ok(CancelOutcome::Cancelled);
        }

        let current = self.get(id)?;
        match current.status {
            PlacementStatus::Cancelled => {
                debug!(placement_id = %id, "cancel replay ignored");
                Ok(CancelOutcome::AlreadyCancelled)
            },
            state => Err(LifecycleError::Conflict {
                placement_id: id.to_string(),
                state,
                operation: "cancel",
            }),
        }
    }

    /// Cancels a `Pending` placement because checkout session `session_id`
    /// expired.
    ///
    /// An expiry for a session other than the one currently attached is
    /// reported as [`ExpireOutcome::Superseded`] and changes nothing: the
    /// buyer started a newer checkout that can still be paid.
    pub fn expire_checkout(
        &self,
        id: &PlacementId,
        session_id: &str,
    ) -> Result<ExpireOutcome, LifecycleError> {
        let current = self.get(id)?;
        let superseded = current
            .checkout_session_id
            .as_deref()
            .filter(|attached| *attached != session_id);
        if let Some(attached) = superseded {
            debug!(
                placement_id = %id,
                expired_session = session_id,
                attached_session = attached,
                "expiry of superseded checkout ignored"
            );
            return Ok(ExpireOutcome::Superseded);
        }
        self.cancel(id, CancelReason::CheckoutExpired)
            .map(ExpireOutcome::Cancelled)
    }

    /// Cancels every `Pending` placement with no lifecycle activity since
    /// `cutoff`. Activity is creation or the latest checkout start, so a
    /// buyer who is paying right now is never swept. Returns how many were
    /// cancelled.
    pub fn cancel_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<usize, LifecycleError> {
        let stale = self.store.query(&PlacementQuery {
            status: Some(PlacementStatus::Pending),
            idle_before: Some(cutoff),
            ..PlacementQuery::default()
        })?;
        let patch = PlacementPatch {
            status: Some(PlacementStatus::Cancelled),
            cancel_reason: Some(CancelReason::Stale),
            ..PlacementPatch::default()
        };

        let mut cancelled = 0;
        for placement in &stale {
            if self
                .store
                .compare_and_update(&placement.id, PlacementStatus::Pending, &patch)?
            {
                debug!(placement_id = %placement.id, "stale placement cancelled");
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(cancelled, cutoff = %cutoff, "stale pending placements swept");
        }
        Ok(cancelled)
    }

    /// Live placements on `side`, in paint order.
    pub fn list_live(&self, side: Side) -> Result<Vec<Placement>, LifecycleError> {
        let mut items = self.store.query(&PlacementQuery::live_on(side))?;
        items.retain(Placement::is_visible);
        Ok(items)
    }

    /// Highest z-index on `side`, or `0` when the side is empty.
    pub fn max_z_index(&self, side: Side) -> Result<i64, LifecycleError> {
        Ok(self.store.max_z(side)?)
    }

    /// The z-index the next placement on `side` would receive.
    pub fn next_z_index(&self, side: Side) -> Result<i64, LifecycleError> {
        Ok(self.max_z_index(side)? + 1)
    }
}

fn discard(id: &PlacementId, reason: DiscardReason) -> ConfirmOutcome {
    warn!(
        placement_id = %id,
        reason = reason.as_str(),
        "payment confirmation discarded"
    );
    ConfirmOutcome::Discarded { reason }
}

fn validate_image(image: &ImageRef) -> Result<(), LifecycleError> {
    let url = image.url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    if rest.is_none_or(str::is_empty) {
        return Err(LifecycleError::validation(
            "imageReference.url",
            "must be an http(s) URL",
        ));
    }
    if image.storage_id.trim().is_empty() {
        return Err(LifecycleError::validation(
            "imageReference.storageId",
            "must not be empty",
        ));
    }
    Ok(())
}
