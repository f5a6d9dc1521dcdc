//! Placement entity and paint ordering.
//!
//! A [`Placement`] is one purchased (or in-flight) logo on one side of the
//! jersey. Placements are never deleted; abandoned ones are marked
//! [`PlacementStatus::Cancelled`].
//!
//! # Invariants
//!
//! - [INV-PL001] `live == true` implies `status == Paid`.
//! - [INV-PL002] A placement is visible to other clients iff `live == true`.
//! - [INV-PL003] Within a side, [`PaintOrderKey`] is a strict total order:
//!   `(z_index, created_at, sequence)`. Higher keys paint above lower ones.

mod state;

pub use state::{
    CancelReason, ImageRef, PaintOrderKey, Placement, PlacementError, PlacementId,
    PlacementStatus, Settlement, Side, sort_by_paint_order,
};
