use crate::bounds::LatLng;

use super::Vec2;

/// Edge length of one map tile in pixels at integer zoom levels.
pub const TILE_SIZE_PX: f64 = 256.0;

/// Latitude limit of the square Web Mercator world.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// World size in pixels at `zoom`.
pub fn world_size_px(zoom: f64) -> f64 {
    TILE_SIZE_PX * zoom.exp2()
}

/// Projects a position into Web Mercator world pixels at `zoom`.
///
/// `x` grows eastwards from the antimeridian, `y` grows southwards from the
/// northern latitude limit. Latitudes are clamped to the Mercator limit.
pub fn project_world_px(p: LatLng, zoom: f64) -> Vec2 {
    let size = world_size_px(zoom);
    let lat = p.lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let x = (p.lng + 180.0) / 360.0;
    let y = 0.5 - (lat.tan() + 1.0 / lat.cos()).ln() / (2.0 * std::f64::consts::PI);
    Vec2::new(x * size, y * size)
}

/// Inverse of [`project_world_px`].
pub fn unproject_world_px(px: Vec2, zoom: f64) -> LatLng {
    let size = world_size_px(zoom);
    let lng = px.x / size * 360.0 - 180.0;
    let n = std::f64::consts::PI * (1.0 - 2.0 * px.y / size);
    let lat = n.sinh().atan().to_degrees();
    LatLng::new(lat, lng)
}

/// Maps geographic positions into the container pixel space of a map view.
///
/// Implemented by the host SDK binding. `None` means the position cannot be
/// shown under the current camera (for example behind the horizon).
pub trait Projection {
    fn to_container_px(&self, p: LatLng) -> Option<Vec2>;
}

/// Flat Web Mercator camera: container pixel = world pixel relative to the center.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MercatorCamera {
    pub center: LatLng,
    pub zoom: f64,
    pub size_px: Vec2,
}

impl MercatorCamera {
    pub fn new(center: LatLng, zoom: f64, size_px: Vec2) -> Self {
        Self {
            center,
            zoom,
            size_px,
        }
    }
}

impl Projection for MercatorCamera {
    fn to_container_px(&self, p: LatLng) -> Option<Vec2> {
        if !p.is_finite() {
            return None;
        }
        let origin = project_world_px(self.center, self.zoom);
        let world = project_world_px(p, self.zoom);
        let px = world - origin + self.size_px.scale(0.5);
        px.is_finite().then_some(px)
    }
}
