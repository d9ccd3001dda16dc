use std::time::Duration;

use foundation::bounds::{GeoBounds, LatLng};
use foundation::time::Timestamp;
use foundation::viewport::{Viewport, ViewportError, ZoomRange};
use runtime::debounce::Debouncer;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Camera state as reported by the host map SDK when movement stops.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSnapshot {
    pub south_west: LatLng,
    pub north_east: LatLng,
    pub zoom: f64,
    pub center: LatLng,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "camera", rename_all = "snake_case")]
pub enum CameraEvent {
    MoveStart,
    Move,
    Settled(CameraSnapshot),
}

/// Turns camera-settle events into debounced `Viewport` emissions.
///
/// A burst of settles collapses to one emission carrying the latest viewport,
/// due `window` after the last settle. Movement cancels a pending emission,
/// and degenerate cameras are rejected before they reach the debouncer.
#[derive(Debug, Clone)]
pub struct ViewportTracker {
    range: ZoomRange,
    debouncer: Debouncer<Viewport>,
    moving: bool,
    current: Option<Viewport>,
}

impl ViewportTracker {
    pub fn new(window: Duration, range: ZoomRange) -> Self {
        Self {
            range,
            debouncer: Debouncer::new(window),
            moving: false,
            current: None,
        }
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    /// Last emitted viewport.
    pub fn current(&self) -> Option<&Viewport> {
        self.current.as_ref()
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.debouncer.deadline()
    }

    pub fn handle(&mut self, now: Timestamp, event: CameraEvent) -> Result<(), ViewportError> {
        match event {
            CameraEvent::MoveStart | CameraEvent::Move => {
                self.moving = true;
                if self.debouncer.cancel() {
                    debug!("camera moved again; pending viewport dropped");
                }
                Ok(())
            }
            CameraEvent::Settled(camera) => {
                self.moving = false;
                let bounds = GeoBounds::from_corners(camera.south_west, camera.north_east);
                let viewport = Viewport::new(bounds, camera.zoom, camera.center, self.range)
                    .inspect_err(|err| warn!(%err, "ignoring settle with invalid camera"))?;
                self.debouncer.push(now, viewport);
                Ok(())
            }
        }
    }

    /// Emits the pending viewport once its debounce window has elapsed.
    ///
    /// A viewport equal to the previous emission is swallowed.
    pub fn poll(&mut self, now: Timestamp) -> Option<Viewport> {
        if self.moving {
            return None;
        }
        let viewport = self.debouncer.poll(now)?;
        if self.current.as_ref() == Some(&viewport) {
            debug!("settled on the same viewport; nothing to emit");
            return None;
        }
        debug!(zoom = viewport.zoom, "viewport settled");
        self.current = Some(viewport);
        Some(viewport)
    }

    pub fn cancel(&mut self) -> bool {
        self.debouncer.cancel()
    }
}
