//! Resolution-independent placement geometry.
//!
//! Every stored position and width is a fraction of the canvas frame, so the
//! same placement renders identically on any client regardless of the pixel
//! size of its stage. Conversion to pixels is a single multiplication by the
//! rendered dimension.
//!
//! # Conventions
//!
//! - `x` and `widthFraction` are fractions of the canvas **width**.
//! - `y` is a fraction of the canvas **height**.
//! - `(x, y)` is the top-left anchor of the logo before rotation.
//! - Height is never stored: it follows from the width and the image's
//!   natural aspect ratio (see [`height_fraction`]).
//! - Only width is bounded per tier. Position is deliberately left
//!   unclamped, so a logo may be dragged partially or fully off-canvas.
//!
//! All functions here are pure and total: they never panic, and non-finite
//! input is mapped to a documented fallback instead of propagating NaN.

mod error;
pub mod tier;


use serde::{Deserialize, Serialize};

pub use error::GeometryError;
pub use tier::{Tier, TierBounds, TierSpec, TierTable, DEFAULT_SCALE};

/// Default canvas frame width in template units.
pub const DEFAULT_FRAME_WIDTH: f64 = 2000.0;

/// Default canvas frame height in template units.
pub const DEFAULT_FRAME_HEIGHT: f64 = 2400.0;

/// Default upper bound on the rendered stage width, in pixels.
pub const DEFAULT_MAX_STAGE_WIDTH: f64 = 1000.0;

/// Fixed aspect ratio of the shared canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasFrame {
    /// Frame width in template units.
    pub width: f64,
    /// Frame height in template units.
    pub height: f64,
}

impl Default for CanvasFrame {
    fn default() -> Self {
        Self {
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
        }
    }
}

impl CanvasFrame {
    /// Width divided by height.
    #[must_use]
    pub fn aspect(&self) -> f64 {
        self.width / self.height
    }

    /// Ensures both dimensions are positive and finite.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidFrame`] otherwise.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let ok = self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0;
        if ok {
            Ok(())
        } else {
            Err(GeometryError::InvalidFrame {
                width: self.width,
                height: self.height,
            })
        }
    }
}

/// Pixel dimensions of a rendered stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageSize {
    /// Rendered width in pixels.
    pub width: f64,
    /// Rendered height in pixels.
    pub height: f64,
}

impl StageSize {
    /// Creates a stage of explicit size.
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Fits the frame into a container: width is capped at
    /// `max_stage_width`, height follows the frame aspect.
    #[must_use]
    pub fn fit(container_width: f64, frame: CanvasFrame, max_stage_width: f64) -> Self {
        let width = if container_width.is_finite() && container_width > 0.0 {
            container_width.min(max_stage_width)
        } else {
            0.0
        };
        Self {
            width,
            height: width * frame.height / frame.width,
        }
    }
}

/// Geometry of one logo in normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoGeometry {
    /// Left edge, fraction of canvas width.
    pub x: f64,
    /// Top edge, fraction of canvas height.
    pub y: f64,
    /// Long-side width, fraction of canvas width.
    pub width_fraction: f64,
    /// Clockwise rotation in degrees, `[0, 360)`.
    pub rotation_degrees: f64,
}

/// Converts a pixel offset into a fraction of `canvas_dimension`.
///
/// A non-positive or non-finite dimension yields `0.0`.
#[must_use]
pub fn to_normalized(pixel: f64, canvas_dimension: f64) -> f64 {
    if !canvas_dimension.is_finite() || canvas_dimension <= 0.0 {
        return 0.0;
    }
    pixel / canvas_dimension
}

/// Converts a fraction of `canvas_dimension` back into pixels.
#[must_use]
pub fn to_pixel(fraction: f64, canvas_dimension: f64) -> f64 {
    fraction * canvas_dimension
}

/// Clamps a requested width into the tier's bounds.
///
/// Computes `max(min(requested, cap * max_scale), cap * min_scale)`. NaN maps
/// to the lower bound; infinities map to the matching end of the range.
#[must_use]
pub fn clamp_width(bounds: &TierBounds, requested: f64) -> f64 {
    let lower = bounds.min_width();
    if requested.is_nan() {
        return lower;
    }
    requested.min(bounds.max_width()).max(lower)
}

/// Effective uniform scale for a resize gesture.
///
/// A resize handle may report a non-uniform box. The logo keeps its aspect,
/// so the scale is the larger of the width ratio and the height ratio; taking
/// the maximum keeps the logo from shrinking past the handle the user is
/// holding. The original box height is `original_width / original_aspect`.
///
/// Degenerate input (non-positive or non-finite sizes) yields `1.0`.
#[must_use]
pub fn uniform_scale_from_transform(
    new_box_width: f64,
    new_box_height: f64,
    original_width: f64,
    original_aspect: f64,
) -> f64 {
    let usable = |v: f64| v.is_finite() && v > 0.0;
    if !usable(original_width) || !usable(original_aspect) {
        return 1.0;
    }
    let original_height = original_width / original_aspect;
    let width_ratio = if new_box_width.is_finite() {
        new_box_width / original_width
    } else {
        f64::NAN
    };
    let height_ratio = if new_box_height.is_finite() {
        new_box_height / original_height
    } else {
        f64::NAN
    };
    // f64::max ignores a NaN operand.
    let scale = width_ratio.max(height_ratio);
    if usable(scale) {
        scale
    } else {
        1.0
    }
}

/// Height of a logo as a fraction of canvas **height**.
///
/// `image_aspect` is the natural width / height of the image.
#[must_use]
pub fn height_fraction(width_fraction: f64, image_aspect: f64, frame: CanvasFrame) -> f64 {
    if !image_aspect.is_finite() || image_aspect <= 0.0 {
        return 0.0;
    }
    width_fraction * frame.aspect() / image_aspect
}

/// Wraps a rotation into `[0, 360)`. Non-finite input maps to `0.0`.
#[must_use]
pub fn normalize_rotation(degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative input.
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Moves a width from one tier into another, keeping the user's relative
/// scale choice inside `[min_scale, max_scale]`.
#[must_use]
pub fn retier_width(width: f64, from: &TierBounds, to: &TierBounds) -> f64 {
    to.width_at(from.relative_scale(width))
}
