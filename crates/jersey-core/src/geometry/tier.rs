//! Purchasable size tiers and their width bounds.
//!
//! A tier bounds the long-side width of a logo as a fraction of the canvas
//! width. Every tier shares one scale range `[min_scale, max_scale]` which is
//! applied to the tier's `cap`:
//!
//! ```text
//! min_width = cap * min_scale
//! max_width = cap * max_scale
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::GeometryError;

/// Fraction of the tier cap used when a new image is loaded or a placement is
/// submitted without an explicit width.
pub const DEFAULT_SCALE: f64 = 0.8;

/// Default lower bound of the shared scale range.
pub const DEFAULT_MIN_SCALE: f64 = 0.4;

/// Default upper bound of the shared scale range.
pub const DEFAULT_MAX_SCALE: f64 = 1.0;

/// Size class a buyer pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Smallest and cheapest tier.
    Small,
    /// Middle tier.
    Medium,
    /// Largest tier.
    Large,
}

impl Tier {
    /// All tiers in ascending size order.
    pub const ALL: [Self; 3] = [Self::Small, Self::Medium, Self::Large];

    /// Returns the wire name of the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            _ => Err(GeometryError::UnknownTier {
                value: s.to_string(),
            }),
        }
    }
}

/// Resolved width bounds for a single tier.
///
/// Passed explicitly to the geometry functions and the transform controller
/// so neither has to consult shared state to learn the active limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierBounds {
    /// Tier these bounds belong to.
    pub tier: Tier,
    /// Maximum long-side width as a fraction of canvas width.
    pub cap: f64,
    /// Lower end of the scale range, as a fraction of `cap`.
    pub min_scale: f64,
    /// Upper end of the scale range, as a fraction of `cap`.
    pub max_scale: f64,
}

impl TierBounds {
    /// Smallest permitted width fraction.
    #[must_use]
    pub fn min_width(&self) -> f64 {
        self.cap * self.min_scale
    }

    /// Largest permitted width fraction.
    #[must_use]
    pub fn max_width(&self) -> f64 {
        self.cap * self.max_scale
    }

    /// Width used for a freshly loaded image or an unspecified submission.
    #[must_use]
    pub fn default_width(&self) -> f64 {
        super::clamp_width(self, self.cap * DEFAULT_SCALE)
    }

    /// Position of `width` inside the scale range, in `[0, 1]`.
    ///
    /// A degenerate range (`min_scale == max_scale`) reports `0.0`.
    #[must_use]
    pub fn relative_scale(&self, width: f64) -> f64 {
        let span = self.max_width() - self.min_width();
        if span <= f64::EPSILON || !span.is_finite() {
            return 0.0;
        }
        let rel = (super::clamp_width(self, width) - self.min_width()) / span;
        rel.clamp(0.0, 1.0)
    }

    /// Width at the given relative position inside the scale range.
    #[must_use]
    pub fn width_at(&self, relative: f64) -> f64 {
        let relative = if relative.is_finite() {
            relative.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let width = self.min_width() + relative * (self.max_width() - self.min_width());
        super::clamp_width(self, width)
    }
}

/// Per-tier configuration: cap and price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierSpec {
    /// Maximum long-side width as a fraction of canvas width.
    pub cap: f64,
    /// Price in minor currency units (cents).
    pub price_cents: i64,
    /// Gateway-side price identifier, if the gateway uses catalogue prices.
    #[serde(default)]
    pub price_id: Option<String>,
}

/// The full tier table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierTable {
    /// Shared lower scale bound.
    #[serde(default = "default_min_scale")]
    pub min_scale: f64,
    /// Shared upper scale bound.
    #[serde(default = "default_max_scale")]
    pub max_scale: f64,
    /// Small tier.
    #[serde(default = "default_small")]
    pub small: TierSpec,
    /// Medium tier.
    #[serde(default = "default_medium")]
    pub medium: TierSpec,
    /// Large tier.
    #[serde(default = "default_large")]
    pub large: TierSpec,
}

const fn default_min_scale() -> f64 {
    DEFAULT_MIN_SCALE
}

const fn default_max_scale() -> f64 {
    DEFAULT_MAX_SCALE
}

const fn default_small() -> TierSpec {
    TierSpec {
        cap: 0.06,
        price_cents: 500,
        price_id: None,
    }
}

const fn default_medium() -> TierSpec {
    TierSpec {
        cap: 0.09,
        price_cents: 1000,
        price_id: None,
    }
}

const fn default_large() -> TierSpec {
    TierSpec {
        cap: 0.13,
        price_cents: 2000,
        price_id: None,
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            min_scale: DEFAULT_MIN_SCALE,
            max_scale: DEFAULT_MAX_SCALE,
            small: default_small(),
            medium: default_medium(),
            large: default_large(),
        }
    }
}

impl TierTable {
    /// Returns the configuration for `tier`.
    #[must_use]
    pub const fn spec(&self, tier: Tier) -> &TierSpec {
        match tier {
            Tier::Small => &self.small,
            Tier::Medium => &self.medium,
            Tier::Large => &self.large,
        }
    }

    /// Returns the resolved width bounds for `tier`.
    #[must_use]
    pub const fn bounds(&self, tier: Tier) -> TierBounds {
        TierBounds {
            tier,
            cap: self.spec(tier).cap,
            min_scale: self.min_scale,
            max_scale: self.max_scale,
        }
    }

    /// Checks that every cap and the scale range are usable.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidTierTable`] when a cap is outside
    /// `(0, 1]`, the scale range is empty or non-positive, or a price is
    /// negative.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let scales_ok = self.min_scale.is_finite()
            && self.max_scale.is_finite()
            && self.min_scale > 0.0
            && self.min_scale <= self.max_scale;
        if !scales_ok {
            return Err(GeometryError::InvalidTierTable {
                reason: format!(
                    "scale range [{}, {}] must satisfy 0 < min_scale <= max_scale",
                    self.min_scale, self.max_scale
                ),
            });
        }

        for tier in Tier::ALL {
            let spec = self.spec(tier);
            if !spec.cap.is_finite() || spec.cap <= 0.0 || spec.cap > 1.0 {
                return Err(GeometryError::InvalidTierTable {
                    reason: format!("{tier} cap {} must be in (0, 1]", spec.cap),
                });
            }
            if spec.price_cents < 0 {
                return Err(GeometryError::InvalidTierTable {
                    reason: format!("{tier} price {} must not be negative", spec.price_cents),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_round_trips_through_str() {
        for tier in Tier::ALL {
            assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
        }
        assert!("xl".parse::<Tier>().is_err());
        assert!("Small".parse::<Tier>().is_err());
    }

    #[test]
    fn test_default_table_is_valid() {
        let table = TierTable::default();
        table.validate().unwrap();
        assert!((table.bounds(Tier::Medium).cap - 0.09).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_inverted_scale_range() {
        let table = TierTable {
            min_scale: 1.2,
            max_scale: 1.0,
            ..TierTable::default()
        };
        assert!(matches!(
            table.validate(),
            Err(GeometryError::InvalidTierTable { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_cap_above_canvas() {
        let mut table = TierTable::default();
        table.large.cap = 1.5;
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_relative_scale_round_trip() {
        let bounds = TierTable::default().bounds(Tier::Small);
        let width = bounds.width_at(0.25);
        assert!((bounds.relative_scale(width) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_scale_range_pins_to_min() {
        let bounds = TierBounds {
            tier: Tier::Small,
            cap: 0.1,
            min_scale: 0.5,
            max_scale: 0.5,
        };
        assert!(bounds.relative_scale(0.05).abs() < f64::EPSILON);
        assert!((bounds.width_at(0.9) - 0.05).abs() < 1e-12);
    }
}
