use serde::{Deserialize, Serialize};

/// Geographic position in WGS84 degrees.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Finite and inside `[-90, 90] x [-180, 180]`.
    pub fn is_valid(&self) -> bool {
        self.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Bitwise equality, used where "unchanged" must mean byte-identical.
    pub fn bits_eq(&self, other: &Self) -> bool {
        self.lat.to_bits() == other.lat.to_bits() && self.lng.to_bits() == other.lng.to_bits()
    }
}

/// Axis-aligned geographic rectangle.
///
/// `min_lng <= max_lng` always holds for values built through [`GeoBounds::new`];
/// rectangles that cross the antimeridian are widened to the full longitude span
/// by [`GeoBounds::from_corners`].
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl GeoBounds {
    pub const WORLD: GeoBounds = GeoBounds {
        min_lat: -85.051_128_779_806_59,
        max_lat: 85.051_128_779_806_59,
        min_lng: -180.0,
        max_lng: 180.0,
    };

    pub fn new(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }

    /// Builds bounds from south-west / north-east corners as reported by a map SDK.
    pub fn from_corners(south_west: LatLng, north_east: LatLng) -> Self {
        let (min_lng, max_lng) = if south_west.lng > north_east.lng {
            (-180.0, 180.0)
        } else {
            (south_west.lng, north_east.lng)
        };
        Self::new(south_west.lat, north_east.lat, min_lng, max_lng)
    }

    pub fn is_finite(&self) -> bool {
        self.min_lat.is_finite()
            && self.max_lat.is_finite()
            && self.min_lng.is_finite()
            && self.max_lng.is_finite()
    }

    /// Zero or negative area (or non-finite edges).
    pub fn is_degenerate(&self) -> bool {
        !self.is_finite() || !(self.min_lat < self.max_lat) || !(self.min_lng < self.max_lng)
    }

    pub fn width_deg(&self) -> f64 {
        self.max_lng - self.min_lng
    }

    pub fn height_deg(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.min_lat + self.max_lat) * 0.5,
            (self.min_lng + self.max_lng) * 0.5,
        )
    }

    pub fn contains(&self, p: LatLng) -> bool {
        p.lat >= self.min_lat && p.lat <= self.max_lat && p.lng >= self.min_lng && p.lng <= self.max_lng
    }

    pub fn bits_eq(&self, other: &Self) -> bool {
        self.min_lat.to_bits() == other.min_lat.to_bits()
            && self.max_lat.to_bits() == other.max_lat.to_bits()
            && self.min_lng.to_bits() == other.min_lng.to_bits()
            && self.max_lng.to_bits() == other.max_lng.to_bits()
    }
}
