//! Layer composition for one rendered side of the jersey.
//!
//! Polled live placements and the local edit session are kept apart: the
//! local layer is drawn on top of the live list for display only and is never
//! merged back into it.

use crate::geometry::{CanvasFrame, StageSize, height_fraction, to_pixel};
use crate::placement::{Placement, PlacementId, sort_by_paint_order};
use crate::transform::SessionPreview;

/// Identifies what a [`PixelLayer`] was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSource {
    /// A confirmed placement from the live list.
    Live(PlacementId),
    /// The local, unsubmitted edit session.
    Local,
}

/// One drawable layer in stage pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelLayer {
    /// Origin of the layer.
    pub source: LayerSource,
    /// Image to draw.
    pub image_url: String,
    /// Left edge in pixels.
    pub x: f64,
    /// Top edge in pixels.
    pub y: f64,
    /// Width in pixels.
    pub width: f64,
    /// Height in pixels, when the image aspect is known locally. Live layers
    /// leave this to the renderer, which has the decoded image.
    pub height: Option<f64>,
    /// Clockwise rotation in degrees.
    pub rotation_degrees: f64,
}

/// Builds the draw list for one side, bottom to top.
///
/// `live` is a single-side snapshot. Entries that are not visible are
/// skipped. The local session, if any, is appended last so it paints above
/// every live layer.
#[must_use]
pub fn compose_layers(
    live: &[Placement],
    local: Option<&SessionPreview>,
    stage: StageSize,
    frame: CanvasFrame,
) -> Vec<PixelLayer> {
    let mut visible: Vec<Placement> = live.iter().filter(|p| p.is_visible()).cloned().collect();
    sort_by_paint_order(&mut visible);

    let mut layers: Vec<PixelLayer> = visible
        .into_iter()
        .map(|p| PixelLayer {
            source: LayerSource::Live(p.id),
            image_url: p.image.url,
            x: to_pixel(p.geometry.x, stage.width),
            y: to_pixel(p.geometry.y, stage.height),
            width: to_pixel(p.geometry.width_fraction, stage.width),
            height: None,
            rotation_degrees: p.geometry.rotation_degrees,
        })
        .collect();

    if let Some(preview) = local {
        let g = preview.geometry;
        layers.push(PixelLayer {
            source: LayerSource::Local,
            image_url: preview.image.url.clone(),
            x: to_pixel(g.x, stage.width),
            y: to_pixel(g.y, stage.height),
            width: to_pixel(g.width_fraction, stage.width),
            height: Some(to_pixel(
                height_fraction(g.width_fraction, preview.aspect, frame),
                stage.height,
            )),
            rotation_degrees: g.rotation_degrees,
        });
    }
    layers
}
