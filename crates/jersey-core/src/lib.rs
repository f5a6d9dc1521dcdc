//! jersey-core - Shared Jersey Canvas Placement Engine
//!
//! This library holds everything about a logo placement that does not need
//! I/O: the normalized geometry model and tier bounds, the client-local
//! transform controller, the placement entity and its paint order, the
//! store contract, and the payment lifecycle state machine.
//!
//! # Modules
//!
//! - [`geometry`]: Normalized coordinates, tier bounds and width clamping
//! - [`transform`]: Drag/resize/rotate controller for an unsubmitted logo
//! - [`canvas`]: Layer composition of live placements and the local session
//! - [`placement`]: Placement record, status and paint ordering
//! - [`store`]: Persistence contract and an in-memory implementation
//! - [`lifecycle`]: Create, confirm and cancel transitions
//! - [`config`]: TOML configuration for the service

pub mod canvas;
pub mod config;
pub mod geometry;
pub mod lifecycle;
pub mod placement;
pub mod store;
pub mod transform;

pub use config::{ConfigError, JerseyConfig};
pub use lifecycle::{LifecycleError, PlacementEngine};
