//! Client-local transform controller for one unsubmitted logo.
//!
//! The controller owns the in-progress edit session of a single image and
//! turns pixel-space gestures on a rendered stage into normalized geometry.
//! It never reads shared state: the active tier's bounds are handed in
//! explicitly, and every geometry change is pushed out through a registered
//! observer.
//!
//! ```text
//! Idle --load_image--> Loaded --drag/resize/rotate--> Editing
//!                        |                              |
//!                        +------------commit------------+--> Committed
//! any --reset--> Idle        any --load_image--> Loaded
//! ```
//!
//! # Invariants
//!
//! - [INV-TR001] After every operation the session width lies inside the
//!   active tier's bounds.
//! - [INV-TR002] Rotation is always in `[0, 360)`.
//! - [INV-TR003] Position is never clamped.
//! - [INV-TR004] A failed operation leaves the session untouched and does not
//!   notify the observer. Gestures carrying NaN or infinite input fail with
//!   [`TransformError::NonFiniteInput`].

mod error;


use std::fmt;

use serde::{Deserialize, Serialize};

pub use error::TransformError;

use crate::geometry::{
    CanvasFrame, LogoGeometry, StageSize, Tier, TierBounds, clamp_width, height_fraction,
    normalize_rotation, retier_width, to_normalized, to_pixel, uniform_scale_from_transform,
};
use crate::placement::{ImageRef, Side};

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformState {
    /// No image loaded.
    Idle,
    /// Image loaded at its default geometry, untouched.
    Loaded,
    /// At least one gesture has changed the geometry.
    Editing,
    /// The session was committed into a draft and dropped.
    Committed,
}

impl TransformState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loaded => "loaded",
            Self::Editing => "editing",
            Self::Committed => "committed",
        }
    }
}

impl fmt::Display for TransformState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometry pushed to the observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryUpdate {
    /// Left edge, fraction of canvas width.
    pub x: f64,
    /// Top edge, fraction of canvas height.
    pub y: f64,
    /// Clamped width, fraction of canvas width.
    pub width_fraction: f64,
    /// Rotation in `[0, 360)`.
    pub rotation_degrees: f64,
    /// `true` at the end of an interaction, `false` while it is in flight.
    pub settled: bool,
}

/// Callback receiving every geometry change.
pub type GeometryObserver = Box<dyn FnMut(&GeometryUpdate) + Send>;

/// Output of [`TransformController::commit`], ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementDraft {
    /// Jersey side.
    pub side: Side,
    /// Tier the width was clamped against.
    pub tier: Tier,
    /// Final normalized geometry.
    #[serde(flatten)]
    pub geometry: LogoGeometry,
    /// Uploaded image.
    #[serde(rename = "imageReference")]
    pub image: ImageRef,
}

/// Snapshot of the live session used for drawing the local layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPreview {
    /// Side being edited.
    pub side: Side,
    /// Current geometry.
    pub geometry: LogoGeometry,
    /// Image being placed.
    pub image: ImageRef,
    /// Natural width / height of the image.
    pub aspect: f64,
}

#[derive(Debug, Clone)]
struct Session {
    image: ImageRef,
    aspect: f64,
    side: Side,
    bounds: TierBounds,
    geometry: LogoGeometry,
    /// Geometry at the start of the gesture in flight, if any.
    gesture_origin: Option<LogoGeometry>,
}

impl Session {
    /// Returns the geometry the current gesture started from, opening a new
    /// gesture if none is in flight.
    fn origin(&mut self) -> LogoGeometry {
        *self.gesture_origin.get_or_insert(self.geometry)
    }
}

/// Drives one edit session.
pub struct TransformController {
    frame: CanvasFrame,
    state: TransformState,
    session: Option<Session>,
    observer: Option<GeometryObserver>,
}

impl fmt::Debug for TransformController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformController")
            .field("frame", &self.frame)
            .field("state", &self.state)
            .field("session", &self.session)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Default for TransformController {
    fn default() -> Self {
        Self::new(CanvasFrame::default())
    }
}

impl TransformController {
    /// Creates an idle controller for the given canvas frame.
    #[must_use]
    pub const fn new(frame: CanvasFrame) -> Self {
        Self {
            frame,
            state: TransformState::Idle,
            session: None,
            observer: None,
        }
    }

    /// Registers the geometry observer, replacing any previous one.
    pub fn set_observer(&mut self, observer: GeometryObserver) {
        self.observer = Some(observer);
    }

    /// Removes the geometry observer.
    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TransformState {
        self.state
    }

    /// Current geometry, if an image is loaded.
    #[must_use]
    pub fn geometry(&self) -> Option<LogoGeometry> {
        self.session.as_ref().map(|s| s.geometry)
    }

    /// Side being edited, if an image is loaded.
    #[must_use]
    pub fn side(&self) -> Option<Side> {
        self.session.as_ref().map(|s| s.side)
    }

    /// Active tier bounds, if an image is loaded.
    #[must_use]
    pub fn bounds(&self) -> Option<TierBounds> {
        self.session.as_ref().map(|s| s.bounds)
    }

    /// Snapshot for drawing the local layer, if an image is loaded.
    #[must_use]
    pub fn preview(&self) -> Option<SessionPreview> {
        self.session.as_ref().map(|s| SessionPreview {
            side: s.side,
            geometry: s.geometry,
            image: s.image.clone(),
            aspect: s.aspect,
        })
    }

    /// Loads an image, replacing any existing session.
    ///
    /// The logo starts at the tier's default width, centered on the canvas,
    /// unrotated.
    pub fn load_image(
        &mut self,
        image: ImageRef,
        aspect: f64,
        side: Side,
        bounds: TierBounds,
    ) -> Result<(), TransformError> {
        if !aspect.is_finite() || aspect <= 0.0 {
            return Err(TransformError::InvalidAspect { aspect });
        }
        if image.url.trim().is_empty() {
            return Err(TransformError::InvalidImage {
                reason: "image url is empty".to_string(),
            });
        }
        if image.storage_id.trim().is_empty() {
            return Err(TransformError::InvalidImage {
                reason: "image storage id is empty".to_string(),
            });
        }

        let width = bounds.default_width();
        let height = height_fraction(width, aspect, self.frame);
        let geometry = LogoGeometry {
            x: (1.0 - width) / 2.0,
            y: (1.0 - height) / 2.0,
            width_fraction: width,
            rotation_degrees: 0.0,
        };
        self.session = Some(Session {
            image,
            aspect,
            side,
            bounds,
            geometry,
            gesture_origin: None,
        });
        self.state = TransformState::Loaded;
        self.notify(false);
        Ok(())
    }

    /// Moves the logo by a pixel delta on `stage`.
    pub fn drag(
        &mut self,
        dx_px: f64,
        dy_px: f64,
        stage: StageSize,
    ) -> Result<(), TransformError> {
        let session = self.session_mut("drag")?;
        require_finite("drag", &[dx_px, dy_px])?;
        session.origin();
        session.geometry.x += to_normalized(dx_px, stage.width);
        session.geometry.y += to_normalized(dy_px, stage.height);
        self.touched();
        Ok(())
    }

    /// Moves the logo's top-left anchor to a pixel position on `stage`.
    pub fn drag_to(
        &mut self,
        x_px: f64,
        y_px: f64,
        stage: StageSize,
    ) -> Result<(), TransformError> {
        let session = self.session_mut("drag")?;
        require_finite("drag", &[x_px, y_px])?;
        session.origin();
        session.geometry.x = to_normalized(x_px, stage.width);
        session.geometry.y = to_normalized(y_px, stage.height);
        self.touched();
        Ok(())
    }

    /// Applies a resize gesture reporting the handle's new pixel box.
    ///
    /// The box is measured against the geometry at the start of the gesture,
    /// so repeated samples of one drag do not compound.
    pub fn resize(
        &mut self,
        new_box_width_px: f64,
        new_box_height_px: f64,
        stage: StageSize,
    ) -> Result<(), TransformError> {
        let session = self.session_mut("resize")?;
        require_finite("resize", &[new_box_width_px, new_box_height_px])?;
        let origin = session.origin();
        let original_width_px = to_pixel(origin.width_fraction, stage.width);
        let scale = uniform_scale_from_transform(
            new_box_width_px,
            new_box_height_px,
            original_width_px,
            session.aspect,
        );
        session.geometry.width_fraction =
            clamp_width(&session.bounds, origin.width_fraction * scale);
        self.touched();
        Ok(())
    }

    /// Sets an absolute rotation.
    pub fn rotate_to(&mut self, degrees: f64) -> Result<(), TransformError> {
        let session = self.session_mut("rotate")?;
        require_finite("rotate", &[degrees])?;
        session.origin();
        session.geometry.rotation_degrees = normalize_rotation(degrees);
        self.touched();
        Ok(())
    }

    /// Rotates by the angle the pointer swept around the logo's center,
    /// from `start` to `current` (stage pixels).
    pub fn rotate_by_pointer(
        &mut self,
        start: (f64, f64),
        current: (f64, f64),
        stage: StageSize,
    ) -> Result<(), TransformError> {
        let frame = self.frame;
        let session = self.session_mut("rotate")?;
        require_finite("rotate", &[start.0, start.1, current.0, current.1])?;
        let origin = session.gesture_origin.unwrap_or(session.geometry);
        let (cx, cy) = center_px(&origin, session.aspect, frame, stage);
        let swept = (current.1 - cy).atan2(current.0 - cx) - (start.1 - cy).atan2(start.0 - cx);
        require_finite("rotate", &[swept])?;
        session.origin();
        session.geometry.rotation_degrees =
            normalize_rotation(origin.rotation_degrees + swept.to_degrees());
        self.touched();
        Ok(())
    }

    /// Ends the gesture in flight and notifies the observer with
    /// `settled = true`.
    pub fn end_interaction(&mut self) -> Result<(), TransformError> {
        let session = self.session_mut("end interaction")?;
        session.gesture_origin = None;
        self.notify(true);
        Ok(())
    }

    /// Switches tier, keeping the relative scale inside the scale range.
    pub fn set_tier(&mut self, bounds: TierBounds) -> Result<(), TransformError> {
        let session = self.session_mut("change tier")?;
        session.geometry.width_fraction =
            retier_width(session.geometry.width_fraction, &session.bounds, &bounds);
        session.bounds = bounds;
        session.gesture_origin = None;
        self.notify(true);
        Ok(())
    }

    /// Switches side. Geometry is left untouched.
    pub fn set_side(&mut self, side: Side) -> Result<(), TransformError> {
        self.session_mut("change side")?.side = side;
        Ok(())
    }

    /// Produces the submission draft and drops the session.
    pub fn commit(&mut self) -> Result<PlacementDraft, TransformError> {
        self.session_mut("commit")?;
        let session = self
            .session
            .take()
            .ok_or(TransformError::InvalidState {
                operation: "commit",
                state: self.state,
            })?;
        self.state = TransformState::Committed;
        tracing::debug!(
            side = %session.side,
            tier = %session.bounds.tier,
            width_fraction = session.geometry.width_fraction,
            "transform session committed"
        );
        Ok(PlacementDraft {
            side: session.side,
            tier: session.bounds.tier,
            geometry: session.geometry,
            image: session.image,
        })
    }

    /// Discards any session and returns to [`TransformState::Idle`].
    pub fn reset(&mut self) {
        self.session = None;
        self.state = TransformState::Idle;
    }

    fn session_mut(&mut self, operation: &'static str) -> Result<&mut Session, TransformError> {
        match (self.state, self.session.as_mut()) {
            (TransformState::Loaded | TransformState::Editing, Some(session)) => Ok(session),
            (state, _) => Err(TransformError::InvalidState { operation, state }),
        }
    }

    fn touched(&mut self) {
        self.state = TransformState::Editing;
        self.notify(false);
    }

    fn notify(&mut self, settled: bool) {
        let (Some(session), Some(observer)) = (self.session.as_ref(), self.observer.as_mut())
        else {
            return;
        };
        let g = session.geometry;
        observer(&GeometryUpdate {
            x: g.x,
            y: g.y,
            width_fraction: g.width_fraction,
            rotation_degrees: g.rotation_degrees,
            settled,
        });
    }
}

fn require_finite(operation: &'static str, values: &[f64]) -> Result<(), TransformError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(TransformError::NonFiniteInput { operation })
    }
}

/// Unrotated center of the logo in stage pixels.
fn center_px(
    geometry: &LogoGeometry,
    aspect: f64,
    frame: CanvasFrame,
    stage: StageSize,
) -> (f64, f64) {
    let width = to_pixel(geometry.width_fraction, stage.width);
    let height = to_pixel(
        height_fraction(geometry.width_fraction, aspect, frame),
        stage.height,
    );
    (
        to_pixel(geometry.x, stage.width) + width / 2.0,
        to_pixel(geometry.y, stage.height) + height / 2.0,
    )
}
