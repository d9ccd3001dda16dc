use std::rc::Rc;

use foundation::arena::Arena;
use foundation::bounds::LatLng;
use foundation::handles::Handle;
use foundation::math::Vec2;
use foundation::math::mercator::Projection;
use layers::glyph::Glyph;
use scene::item::{FieldChanges, MapItem};
use tracing::debug;

use crate::pane::{NodeId, RenderPane};
use crate::surface::{MarkerSurface, SurfaceError, z_index_for};

/// Handle to one persistent overlay binding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct OverlayHandle(pub Handle);

#[derive(Debug, Clone)]
struct Binding {
    node: NodeId,
    position: LatLng,
    anchor_px: Vec2,
    hidden: bool,
    offscreen: bool,
    opacity: f32,
    /// Opacity last written to the node, to skip redundant writes.
    applied_opacity: Option<f32>,
}

impl Binding {
    fn effective_opacity(&self) -> f32 {
        if self.hidden || self.offscreen {
            0.0
        } else {
            self.opacity
        }
    }
}

/// Binds persistent pane nodes to geographic positions.
///
/// Each binding owns exactly one node, appended once in [`create`] and
/// removed only in [`destroy`]. Camera redraws, position changes and
/// visibility changes are transforms and opacity writes on the same node.
///
/// [`create`]: StableOverlayAdapter::create
/// [`destroy`]: StableOverlayAdapter::destroy
pub struct StableOverlayAdapter<P: RenderPane> {
    pane: P,
    bindings: Arena<Binding>,
    projection: Option<Box<dyn Projection>>,
}

impl<P: RenderPane> StableOverlayAdapter<P> {
    pub fn new(pane: P) -> Self {
        Self {
            pane,
            bindings: Arena::new(),
            projection: None,
        }
    }

    pub fn pane(&self) -> &P {
        &self.pane
    }

    pub fn pane_mut(&mut self) -> &mut P {
        &mut self.pane
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn node_of(&self, handle: OverlayHandle) -> Option<NodeId> {
        self.bindings.get(handle.0).map(|b| b.node)
    }

    pub fn create(
        &mut self,
        position: LatLng,
        glyph: Rc<Glyph>,
        opacity: f32,
    ) -> Result<OverlayHandle, SurfaceError> {
        let anchor_px = glyph.anchor_px;
        let node = self.pane.append(glyph)?;
        let handle = OverlayHandle(self.bindings.insert(Binding {
            node,
            position,
            anchor_px,
            hidden: false,
            offscreen: false,
            opacity,
            applied_opacity: None,
        }));
        if let Err(err) = self.layout(handle) {
            self.bindings.remove(handle.0);
            if let Err(detach) = self.pane.detach(node) {
                debug!(?node, %detach, "detach after failed layout skipped");
            }
            return Err(err);
        }
        Ok(handle)
    }

    pub fn update_position(
        &mut self,
        handle: OverlayHandle,
        position: LatLng,
    ) -> Result<(), SurfaceError> {
        self.binding_mut(handle)?.position = position;
        self.layout(handle)
    }

    /// Hides or shows the node with an opacity toggle; the node stays attached.
    pub fn set_visibility(&mut self, handle: OverlayHandle, hidden: bool) -> Result<(), SurfaceError> {
        self.binding_mut(handle)?.hidden = hidden;
        self.sync_opacity(handle)
    }

    pub fn set_opacity(&mut self, handle: OverlayHandle, opacity: f32) -> Result<(), SurfaceError> {
        self.binding_mut(handle)?.opacity = opacity.clamp(0.0, 1.0);
        self.sync_opacity(handle)
    }

    pub fn set_glyph(&mut self, handle: OverlayHandle, glyph: Rc<Glyph>) -> Result<(), SurfaceError> {
        let binding = self.binding_mut(handle)?;
        let node = binding.node;
        let anchor_changed = binding.anchor_px != glyph.anchor_px;
        binding.anchor_px = glyph.anchor_px;
        self.pane.set_glyph(node, glyph)?;
        if anchor_changed {
            self.layout(handle)?;
        }
        Ok(())
    }

    pub fn set_z_index(&mut self, handle: OverlayHandle, z: i32) -> Result<(), SurfaceError> {
        let node = self.binding_mut(handle)?.node;
        self.pane.set_z_index(node, z)?;
        Ok(())
    }

    /// Detaches the node. The binding is gone even if the pane already lost it.
    pub fn destroy(&mut self, handle: OverlayHandle) -> Result<(), SurfaceError> {
        let binding = self
            .bindings
            .remove(handle.0)
            .ok_or(SurfaceError::StaleHandle(handle.0))?;
        self.pane.detach(binding.node)?;
        Ok(())
    }

    /// Re-positions every binding under a new camera.
    ///
    /// Returns the handles whose nodes could not be updated.
    pub fn on_redraw(&mut self, projection: Box<dyn Projection>) -> Vec<OverlayHandle> {
        self.projection = Some(projection);
        let handles: Vec<OverlayHandle> =
            self.bindings.iter().map(|(h, _)| OverlayHandle(h)).collect();
        let mut failed = Vec::new();
        for handle in handles {
            if let Err(err) = self.layout(handle) {
                debug!(?handle, %err, "overlay layout failed");
                failed.push(handle);
            }
        }
        failed
    }

    fn binding_mut(&mut self, handle: OverlayHandle) -> Result<&mut Binding, SurfaceError> {
        self.bindings
            .get_mut(handle.0)
            .ok_or(SurfaceError::StaleHandle(handle.0))
    }

    fn layout(&mut self, handle: OverlayHandle) -> Result<(), SurfaceError> {
        let projected = {
            let binding = self
                .bindings
                .get(handle.0)
                .ok_or(SurfaceError::StaleHandle(handle.0))?;
            // Without a camera yet the node waits offscreen for the first redraw.
            self.projection
                .as_ref()
                .and_then(|p| p.to_container_px(binding.position))
                .map(|px| px - binding.anchor_px)
        };

        let binding = self.binding_mut(handle)?;
        binding.offscreen = projected.is_none();
        let node = binding.node;
        if let Some(px) = projected {
            self.pane.set_translate(node, px.round())?;
        }
        self.sync_opacity(handle)
    }

    fn sync_opacity(&mut self, handle: OverlayHandle) -> Result<(), SurfaceError> {
        let binding = self.binding_mut(handle)?;
        let opacity = binding.effective_opacity();
        if binding.applied_opacity == Some(opacity) {
            return Ok(());
        }
        let node = binding.node;
        self.pane.set_opacity(node, opacity)?;
        self.binding_mut(handle)?.applied_opacity = Some(opacity);
        Ok(())
    }
}

/// Marker-based backend: one stable overlay node per marker.
pub struct OverlayBackend<P: RenderPane> {
    adapter: StableOverlayAdapter<P>,
    initialized: bool,
}

impl<P: RenderPane> OverlayBackend<P> {
    pub fn new(pane: P) -> Self {
        Self {
            adapter: StableOverlayAdapter::new(pane),
            initialized: false,
        }
    }

    pub fn adapter(&self) -> &StableOverlayAdapter<P> {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut StableOverlayAdapter<P> {
        &mut self.adapter
    }

    pub fn pane(&self) -> &P {
        self.adapter.pane()
    }

    pub fn pane_mut(&mut self) -> &mut P {
        self.adapter.pane_mut()
    }
}

impl<P: RenderPane> MarkerSurface for OverlayBackend<P> {
    type Handle = OverlayHandle;

    fn name(&self) -> &'static str {
        "overlay"
    }

    fn initialize(&mut self) -> Result<(), SurfaceError> {
        self.adapter.pane_mut().attach().map_err(|err| match err {
            crate::pane::PaneError::Unavailable(cause) => SurfaceError::Unavailable(cause),
            other => SurfaceError::Pane(other),
        })?;
        self.initialized = true;
        Ok(())
    }

    fn create(
        &mut self,
        item: &MapItem,
        glyph: Rc<Glyph>,
        opacity: f32,
    ) -> Result<OverlayHandle, SurfaceError> {
        if !self.initialized {
            return Err(SurfaceError::NotInitialized);
        }
        let handle = self.adapter.create(item.position(), glyph, opacity)?;
        let z = z_index_for(item);
        if z != 0
            && let Err(err) = self.adapter.set_z_index(handle, z)
        {
            if let Err(destroy) = self.adapter.destroy(handle) {
                debug!(?handle, %destroy, "destroy after failed z-index skipped");
            }
            return Err(err);
        }
        Ok(handle)
    }

    fn update(
        &mut self,
        handle: OverlayHandle,
        item: &MapItem,
        changes: FieldChanges,
        glyph: Option<Rc<Glyph>>,
    ) -> Result<(), SurfaceError> {
        if changes.position {
            self.adapter.update_position(handle, item.position())?;
        }
        if let Some(glyph) = glyph {
            self.adapter.set_glyph(handle, glyph)?;
        }
        if changes.emphasis {
            self.adapter.set_z_index(handle, z_index_for(item))?;
        }
        Ok(())
    }

    fn set_opacity(&mut self, handle: OverlayHandle, opacity: f32) -> Result<(), SurfaceError> {
        self.adapter.set_opacity(handle, opacity)
    }

    fn destroy(&mut self, handle: OverlayHandle) -> Result<(), SurfaceError> {
        self.adapter.destroy(handle)
    }

    fn on_camera_change(&mut self, projection: Box<dyn Projection>) {
        let failed = self.adapter.on_redraw(projection);
        if !failed.is_empty() {
            debug!(failed = failed.len(), "overlay redraw skipped nodes");
        }
    }

    fn live_count(&self) -> usize {
        self.adapter.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{OverlayBackend, StableOverlayAdapter};
    use crate::pane::{RenderPane, RetainedPane};
    use crate::surface::{MarkerSurface, SurfaceError};
    use foundation::bounds::LatLng;
    use foundation::math::Vec2;
    use foundation::math::mercator::MercatorCamera;
    use layers::glyph::{Glyph, GlyphSpec};
    use std::rc::Rc;

    fn glyph() -> Rc<Glyph> {
        Rc::new(GlyphSpec::Cluster {
            count: 4,
            hovered: false,
        }
        .render())
    }

    fn camera(lng: f64) -> Box<MercatorCamera> {
        Box::new(MercatorCamera::new(
            LatLng::new(45.0, lng),
            12.0,
            Vec2::new(800.0, 600.0),
        ))
    }

    fn adapter() -> StableOverlayAdapter<RetainedPane> {
        let mut pane = RetainedPane::new();
        pane.attach().unwrap();
        let mut adapter = StableOverlayAdapter::new(pane);
        adapter.on_redraw(camera(7.0));
        adapter
    }

    #[test]
    fn redraw_moves_nodes_without_recreating_them() {
        let mut adapter = adapter();
        let h = adapter.create(LatLng::new(45.0, 7.0), glyph(), 1.0).unwrap();
        let node = adapter.node_of(h).unwrap();
        let before = adapter.pane().node(node).unwrap().translate_px;

        for i in 0..50 {
            adapter.on_redraw(camera(7.0 + f64::from(i) * 0.001));
        }

        let stats = adapter.pane().stats();
        assert_eq!(stats.appended, 1);
        assert_eq!(stats.detached, 0);
        assert_eq!(adapter.node_of(h), Some(node));
        assert_ne!(adapter.pane().node(node).unwrap().translate_px, before);
    }

    #[test]
    fn visibility_is_an_opacity_toggle() {
        let mut adapter = adapter();
        let h = adapter.create(LatLng::new(45.0, 7.0), glyph(), 1.0).unwrap();
        let node = adapter.node_of(h).unwrap();

        adapter.set_visibility(h, true).unwrap();
        assert_eq!(adapter.pane().node(node).unwrap().opacity, 0.0);
        adapter.set_visibility(h, false).unwrap();
        assert_eq!(adapter.pane().node(node).unwrap().opacity, 1.0);

        assert_eq!(adapter.pane().node_count(), 1);
        assert_eq!(adapter.pane().stats().detached, 0);
    }

    #[test]
    fn only_destroy_detaches() {
        let mut adapter = adapter();
        let h = adapter.create(LatLng::new(45.0, 7.0), glyph(), 1.0).unwrap();
        adapter.update_position(h, LatLng::new(45.01, 7.01)).unwrap();
        adapter.set_visibility(h, true).unwrap();
        assert_eq!(adapter.pane().stats().detached, 0);

        adapter.destroy(h).unwrap();
        assert_eq!(adapter.pane().stats().detached, 1);
        assert_eq!(adapter.pane().node_count(), 0);
        assert!(matches!(
            adapter.update_position(h, LatLng::new(1.0, 1.0)),
            Err(SurfaceError::StaleHandle(_))
        ));
    }

    #[test]
    fn node_anchor_sits_on_projected_position() {
        let mut adapter = adapter();
        let g = glyph();
        let anchor = g.anchor_px;
        let h = adapter.create(LatLng::new(45.0, 7.0), g, 1.0).unwrap();
        let node = adapter.node_of(h).unwrap();
        let translate = adapter.pane().node(node).unwrap().translate_px;
        assert_eq!(translate, (Vec2::new(400.0, 300.0) - anchor).round());
    }

    #[test]
    fn backend_requires_initialize() {
        let mut backend = OverlayBackend::new(RetainedPane::new());
        let item = scene::item::MapItem::Cluster(scene::item::ClusterItem {
            id: foundation::ids::MarkerId::cluster("c"),
            position: LatLng::new(45.0, 7.0),
            count: 4,
            avg_price: None,
            expansion_zoom: None,
            is_hovered: false,
            is_selected: false,
        });
        assert_eq!(
            backend.create(&item, glyph(), 1.0),
            Err(SurfaceError::NotInitialized)
        );
        backend.initialize().unwrap();
        let h = backend.create(&item, glyph(), 1.0).unwrap();
        assert_eq!(backend.live_count(), 1);
        assert_eq!(backend.pane().node(backend.adapter().node_of(h).unwrap()).unwrap().z_index, 10);
    }

    #[test]
    fn unavailable_environment_is_terminal_error() {
        let mut backend = OverlayBackend::new(RetainedPane::unavailable("no DOM"));
        let err = backend.initialize().unwrap_err();
        assert_eq!(err, SurfaceError::Unavailable("no DOM".into()));
        assert!(err.is_environment());
    }
}
