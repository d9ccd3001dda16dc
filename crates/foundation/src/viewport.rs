use serde::{Deserialize, Serialize};

use crate::bounds::{GeoBounds, LatLng};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewportError {
    #[error("viewport bounds are degenerate: {0:?}")]
    DegenerateBounds(GeoBounds),
    #[error("viewport center is not finite: {0:?}")]
    NonFiniteCenter(LatLng),
    #[error("zoom {zoom} outside supported range {min}..={max}")]
    ZoomOutOfRange { zoom: f64, min: u8, max: u8 },
}

/// Inclusive zoom range the engine accepts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoomRange {
    pub min: u8,
    pub max: u8,
}

impl ZoomRange {
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, zoom: u8) -> bool {
        zoom >= self.min && zoom <= self.max
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

impl Default for ZoomRange {
    fn default() -> Self {
        Self { min: 0, max: 22 }
    }
}

/// Settled camera state: bounds, integer zoom and center.
///
/// Immutable value with no identity beyond equality; two viewports that
/// compare equal describe the same request area.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub bounds: GeoBounds,
    pub zoom: u8,
    pub center: LatLng,
}

impl Viewport {
    /// Validates and builds a viewport.
    ///
    /// Fractional zoom levels are floored, matching tile pyramid semantics.
    pub fn new(
        bounds: GeoBounds,
        zoom: f64,
        center: LatLng,
        range: ZoomRange,
    ) -> Result<Self, ViewportError> {
        if bounds.is_degenerate() {
            return Err(ViewportError::DegenerateBounds(bounds));
        }
        if !center.is_finite() {
            return Err(ViewportError::NonFiniteCenter(center));
        }
        let floored = zoom.floor();
        if !floored.is_finite() || floored < f64::from(range.min) || floored > f64::from(range.max)
        {
            return Err(ViewportError::ZoomOutOfRange {
                zoom,
                min: range.min,
                max: range.max,
            });
        }

        Ok(Self {
            bounds,
            zoom: floored as u8,
            center,
        })
    }

    pub fn min_lat(&self) -> f64 {
        self.bounds.min_lat
    }

    pub fn max_lat(&self) -> f64 {
        self.bounds.max_lat
    }

    pub fn min_lng(&self) -> f64 {
        self.bounds.min_lng
    }

    pub fn max_lng(&self) -> f64 {
        self.bounds.max_lng
    }
}

#[cfg(test)]
mod tests {
    use super::{Viewport, ViewportError, ZoomRange};
    use crate::bounds::{GeoBounds, LatLng};

    fn bounds() -> GeoBounds {
        GeoBounds::new(45.0, 46.0, 7.0, 8.0)
    }

    #[test]
    fn floors_fractional_zoom() {
        let vp = Viewport::new(bounds(), 12.7, LatLng::new(45.5, 7.5), ZoomRange::default())
            .expect("valid");
        assert_eq!(vp.zoom, 12);
    }

    #[test]
    fn rejects_degenerate_and_out_of_range() {
        let flat = GeoBounds::new(45.0, 45.0, 7.0, 8.0);
        assert!(matches!(
            Viewport::new(flat, 10.0, LatLng::new(45.0, 7.5), ZoomRange::default()),
            Err(ViewportError::DegenerateBounds(_))
        ));
        assert!(matches!(
            Viewport::new(bounds(), 23.0, LatLng::new(45.5, 7.5), ZoomRange::default()),
            Err(ViewportError::ZoomOutOfRange { .. })
        ));
        assert!(matches!(
            Viewport::new(bounds(), 10.0, LatLng::new(f64::NAN, 7.5), ZoomRange::default()),
            Err(ViewportError::NonFiniteCenter(_))
        ));
    }

    #[test]
    fn equality_is_by_value() {
        let c = LatLng::new(45.5, 7.5);
        let a = Viewport::new(bounds(), 10.0, c, ZoomRange::default()).unwrap();
        let b = Viewport::new(bounds(), 10.4, c, ZoomRange::default()).unwrap();
        assert_eq!(a, b);
    }
}
