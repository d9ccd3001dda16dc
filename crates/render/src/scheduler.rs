//! Applies reconciliation diffs to a [`MarkerSurface`].
//!
//! Removals and updates are applied synchronously when a pass is submitted.
//! Additions are queued and attached in slices of `batch_size` per animation
//! frame. A pass submitted while an earlier one is still slicing appends its
//! additions behind the earlier ones; it never interleaves with them.

use std::rc::Rc;

use foundation::ids::MarkerId;
use layers::glyph::{Glyph, GlyphSpec};
use layers::icon_cache::SharedIconCache;
use runtime::budget::FrameBudget;
use runtime::frame::Frame;
use runtime::work_queue::{WorkId, WorkQueue};
use scene::diff::{MarkerDiff, diff};
use scene::item::MapItem;
use scene::rendered::RenderedMarkerSet;
use tracing::{debug, trace, warn};

use crate::animation::{FadeIn, FadeInConfig};
use crate::surface::{MarkerSurface, SurfaceError};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Additions attached per animation frame.
    pub batch_size: usize,
    pub fade_in: FadeInConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 15,
            fade_in: FadeInConfig::default(),
        }
    }
}

/// Where a marker in the target set currently is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Slot<H> {
    /// Queued for attachment.
    Pending(WorkId),
    Live(H),
}

impl<H: Copy> Slot<H> {
    pub fn live(&self) -> Option<H> {
        match self {
            Slot::Live(h) => Some(*h),
            Slot::Pending(_) => None,
        }
    }
}

/// Synchronous result of submitting one reconciliation pass.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Nothing to do: no surface call was made.
    pub noop: bool,
    pub queued: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Entries dropped because the surface rejected them.
    pub failed: usize,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SliceReport {
    pub attached: usize,
    pub failed: usize,
    /// Additions still queued after this frame.
    pub remaining: usize,
    /// This frame attached the last queued addition.
    pub drained: bool,
}

impl SliceReport {
    pub fn is_slice(&self) -> bool {
        self.attached + self.failed > 0
    }
}

pub struct IncrementalRenderScheduler<S: MarkerSurface> {
    surface: S,
    icons: SharedIconCache,
    config: SchedulerConfig,
    rendered: RenderedMarkerSet<Slot<S::Handle>>,
    queue: WorkQueue<MapItem>,
    fade: FadeIn,
    attached_since_idle: Vec<MarkerId>,
}

impl<S: MarkerSurface> IncrementalRenderScheduler<S> {
    pub fn new(surface: S, icons: SharedIconCache, config: SchedulerConfig) -> Self {
        Self {
            surface,
            icons,
            config,
            rendered: RenderedMarkerSet::new(),
            queue: WorkQueue::new(),
            fade: FadeIn::new(config.fade_in),
            attached_since_idle: Vec::new(),
        }
    }

    pub fn initialize(&mut self) -> Result<(), SurfaceError> {
        self.surface.initialize()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Target marker set: live markers plus queued additions.
    pub fn rendered(&self) -> &RenderedMarkerSet<Slot<S::Handle>> {
        &self.rendered
    }

    pub fn live_count(&self) -> usize {
        self.rendered.len() - self.queue.len()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn handle_of(&self, id: &MarkerId) -> Option<S::Handle> {
        self.rendered.get(id).and_then(|m| m.handle.live())
    }

    pub fn wants_animation_frame(&self) -> bool {
        !self.queue.is_empty() || self.fade.is_active()
    }

    /// Diffs `next` against the target set and applies removals and updates.
    pub fn submit(&mut self, next: &[MapItem]) -> PassReport {
        let d = diff(&self.rendered, next);
        if d.is_noop() {
            trace!(unchanged = d.unchanged.len(), "reconcile no-op");
            return PassReport {
                noop: true,
                unchanged: d.unchanged.len(),
                ..PassReport::default()
            };
        }
        self.apply(d)
    }

    fn apply(&mut self, d: MarkerDiff) -> PassReport {
        let mut report = PassReport {
            unchanged: d.unchanged.len(),
            ..PassReport::default()
        };

        for id in &d.to_remove {
            let Some(marker) = self.rendered.remove(id) else {
                continue;
            };
            self.fade.forget(id);
            match marker.handle {
                Slot::Pending(work) => {
                    self.queue.cancel(work);
                }
                Slot::Live(handle) => {
                    if let Err(err) = self.surface.destroy(handle) {
                        warn!(%id, %err, "marker destroy failed; dropping entry");
                        report.failed += 1;
                    }
                }
            }
            report.removed += 1;
        }

        for update in d.to_update {
            let id = update.item.id().clone();
            let Some(slot) = self.rendered.get(&id).map(|m| m.handle) else {
                continue;
            };
            match slot {
                Slot::Pending(work) => {
                    if let Some(queued) = self.queue.get_mut(work) {
                        *queued = update.item.clone();
                    }
                    self.rendered.refresh(update.item);
                    report.updated += 1;
                }
                Slot::Live(handle) => {
                    let glyph = update
                        .changes
                        .needs_glyph()
                        .then(|| self.glyph_for(&update.item));
                    match self
                        .surface
                        .update(handle, &update.item, update.changes, glyph)
                    {
                        Ok(()) => {
                            self.rendered.refresh(update.item);
                            report.updated += 1;
                        }
                        Err(err) => {
                            warn!(%id, %err, "marker update failed; dropping entry");
                            self.rendered.remove(&id);
                            self.fade.forget(&id);
                            if let Err(err) = self.surface.destroy(handle) {
                                debug!(%id, %err, "destroy after failed update skipped");
                            }
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        for item in d.to_add {
            let work = self.queue.push(0, item.clone());
            if let Err(dup) = self.rendered.insert(item, Slot::Pending(work)) {
                debug!(%dup, "addition already present");
                self.queue.cancel(work);
                continue;
            }
            report.queued += 1;
        }

        debug!(
            queued = report.queued,
            updated = report.updated,
            removed = report.removed,
            failed = report.failed,
            pending = self.queue.len(),
            "reconcile pass committed"
        );
        report
    }

    /// Attaches the next slice of additions and advances the fade-in.
    pub fn on_animation_frame(&mut self, frame: Frame) -> SliceReport {
        let mut report = SliceReport::default();
        let had_pending = !self.queue.is_empty();
        let opacity = self.fade.config().initial_opacity();

        let mut budget = FrameBudget::per_slice(self.config.batch_size.max(1));
        while let Some((work, _, item)) = self.queue.pop_next_with_budget(&mut budget) {
            let id = item.id().clone();
            let glyph = self.glyph_for(&item);
            match self.surface.create(&item, glyph, opacity) {
                Ok(handle) => {
                    if let Some(marker) = self.rendered.get_mut(&id) {
                        marker.handle = Slot::Live(handle);
                    }
                    self.attached_since_idle.push(id);
                    report.attached += 1;
                }
                Err(err) => {
                    warn!(%id, %err, "marker create failed; dropping entry");
                    if self
                        .rendered
                        .get(&id)
                        .is_some_and(|m| m.handle == Slot::Pending(work))
                    {
                        self.rendered.remove(&id);
                    }
                    report.failed += 1;
                }
            }
        }

        report.remaining = self.queue.len();
        report.drained = had_pending && self.queue.is_empty();
        if report.drained {
            let ids = std::mem::take(&mut self.attached_since_idle);
            self.fade.start(frame, ids);
        }

        for (id, opacity) in self.fade.advance(frame) {
            if let Some(handle) = self.handle_of(&id)
                && let Err(err) = self.surface.set_opacity(handle, opacity)
            {
                debug!(%id, %err, "fade-in step skipped");
            }
        }

        report
    }

    /// Destroys every live handle and drops queued work.
    pub fn teardown(&mut self) -> usize {
        let dropped = self.queue.clear();
        self.fade.clear();
        self.attached_since_idle.clear();
        let mut destroyed = 0;
        let live: Vec<_> = self.rendered.drain().collect();
        for (id, marker) in live {
            if let Slot::Live(handle) = marker.handle {
                if let Err(err) = self.surface.destroy(handle) {
                    debug!(%id, %err, "destroy during teardown failed");
                }
                destroyed += 1;
            }
        }
        debug!(destroyed, dropped, "scheduler torn down");
        destroyed
    }

    fn glyph_for(&self, item: &MapItem) -> Rc<Glyph> {
        self.icons
            .borrow_mut()
            .get_or_render(&GlyphSpec::for_item(item))
    }
}

#[cfg(test)]
mod tests {
    use super::{IncrementalRenderScheduler, SchedulerConfig, Slot};
    use crate::animation::FadeInConfig;
    use crate::overlay::OverlayBackend;
    use crate::pane::RetainedPane;
    use crate::surface::MarkerSurface;
    use crate::symbol_layer::{GpuCapabilities, SymbolLayerBackend};
    use foundation::bounds::LatLng;
    use foundation::ids::MarkerId;
    use foundation::math::Vec2;
    use foundation::math::mercator::MercatorCamera;
    use foundation::time::Timestamp;
    use layers::glyph::GlyphSpec;
    use layers::icon_cache::IconCache;
    use runtime::frame::Frame;
    use scene::item::{MapItem, PropertyItem};
    use smol_str::SmolStr;

    type Scheduler = IncrementalRenderScheduler<OverlayBackend<RetainedPane>>;

    fn item(id: u32, price: f64) -> MapItem {
        MapItem::Property(PropertyItem {
            id: MarkerId::property(id.to_string()),
            position: LatLng::new(45.0 + f64::from(id) * 1e-4, 7.0),
            price,
            currency: SmolStr::new("EUR"),
            title: String::new(),
            is_hovered: false,
            is_selected: false,
        })
    }

    fn scheduler(batch: usize) -> Scheduler {
        let mut s = IncrementalRenderScheduler::new(
            OverlayBackend::new(RetainedPane::new()),
            IconCache::shared(500),
            SchedulerConfig {
                batch_size: batch,
                fade_in: FadeInConfig::disabled(),
            },
        );
        s.initialize().unwrap();
        s
    }

    fn drain(s: &mut Scheduler, start: u64) -> u64 {
        let mut frame = Frame::new(start, Timestamp::ZERO);
        let mut slices = 0;
        while s.wants_animation_frame() {
            if s.on_animation_frame(frame).is_slice() {
                slices += 1;
            }
            frame = frame.next(16);
        }
        slices
    }

    #[test]
    fn additions_are_sliced_by_batch_size() {
        let mut s = scheduler(15);
        let items: Vec<_> = (0..100).map(|i| item(i, 100.0)).collect();
        let report = s.submit(&items);
        assert_eq!(report.queued, 100);
        assert_eq!(s.live_count(), 0);

        let first = s.on_animation_frame(Frame::new(0, Timestamp::ZERO));
        assert_eq!(first.attached, 15);
        assert_eq!(s.live_count(), 15);
        assert_eq!(drain(&mut s, 1), 6);
        assert_eq!(s.surface().live_count(), 100);
    }

    #[test]
    fn identical_resubmit_is_noop() {
        let mut s = scheduler(50);
        let items: Vec<_> = (0..10).map(|i| item(i, 100.0)).collect();
        s.submit(&items);
        drain(&mut s, 0);
        let ops = s.surface().pane().stats();

        let report = s.submit(&items);
        assert!(report.noop);
        assert_eq!(report.unchanged, 10);
        assert_eq!(s.surface().pane().stats(), ops);
    }

    #[test]
    fn removals_and_updates_apply_synchronously() {
        let mut s = scheduler(50);
        s.submit(&[item(1, 100.0), item(2, 200.0)]);
        drain(&mut s, 0);

        let report = s.submit(&[item(2, 250.0)]);
        assert_eq!(report.removed, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(s.surface().live_count(), 1);
        assert_eq!(s.surface().pane().stats().glyph_swaps, 1);
    }

    #[test]
    fn later_pass_queues_behind_and_cancels_pending() {
        let mut s = scheduler(2);
        s.submit(&[item(1, 1.0), item(2, 2.0), item(3, 3.0), item(4, 4.0)]);
        s.on_animation_frame(Frame::new(0, Timestamp::ZERO));
        assert_eq!(s.live_count(), 2);

        // 3 is dropped while still queued, 4 changes price while queued, 5 is new.
        let report = s.submit(&[item(1, 1.0), item(2, 2.0), item(4, 40.0), item(5, 5.0)]);
        assert_eq!(report.removed, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.queued, 1);
        assert_eq!(s.pending_count(), 2);

        let next = s.on_animation_frame(Frame::new(1, Timestamp::ZERO));
        assert_eq!(next.attached, 2);
        assert!(next.drained);
        let four = s.rendered().get(&MarkerId::property("4")).unwrap();
        assert!(matches!(four.handle, Slot::Live(_)));
        assert_eq!(four.item, item(4, 40.0));
        assert!(s.rendered().get(&MarkerId::property("3")).is_none());
    }

    #[test]
    fn one_failed_entry_does_not_abort_the_batch() {
        let mut s = scheduler(50);
        let poisoned = GlyphSpec::for_item(&item(3, 333.0)).key();
        s.surface_mut().pane_mut().reject_glyph(poisoned);

        let items: Vec<_> = (0..5)
            .map(|i| item(i, if i == 3 { 333.0 } else { 100.0 }))
            .collect();
        s.submit(&items);
        let slice = s.on_animation_frame(Frame::new(0, Timestamp::ZERO));
        assert_eq!(slice.attached, 4);
        assert_eq!(slice.failed, 1);
        assert_eq!(s.rendered().len(), 4);
        assert!(!s.rendered().contains(&MarkerId::property("3")));
    }

    #[test]
    fn externally_disposed_node_is_dropped_on_update() {
        let mut s = scheduler(50);
        s.submit(&[item(1, 1.0), item(2, 2.0)]);
        drain(&mut s, 0);

        let h = s.handle_of(&MarkerId::property("1")).unwrap();
        let node = s.surface().adapter().node_of(h).unwrap();
        s.surface_mut().pane_mut().dispose_externally(node);

        let report = s.submit(&[item(1, 10.0), item(2, 20.0)]);
        assert_eq!(report.failed, 1);
        assert_eq!(report.updated, 1);
        assert!(!s.rendered().contains(&MarkerId::property("1")));

        assert_eq!(s.surface().live_count(), 1);

        // The next pass re-adds the dropped marker.
        let again = s.submit(&[item(1, 10.0), item(2, 20.0)]);
        assert_eq!(again.queued, 1);
    }

    #[test]
    fn rejected_glyph_swap_detaches_the_stale_node() {
        let mut s = scheduler(50);
        s.submit(&[item(1, 1.0), item(2, 2.0)]);
        drain(&mut s, 0);
        let poisoned = GlyphSpec::for_item(&item(1, 10.0)).key();
        s.surface_mut().pane_mut().reject_glyph(poisoned);

        let report = s.submit(&[item(1, 10.0), item(2, 2.0)]);
        assert_eq!(report.failed, 1);
        assert!(!s.rendered().contains(&MarkerId::property("1")));
        assert_eq!(s.surface().live_count(), 1);
        assert_eq!(s.surface().pane().node_count(), 1);
        assert_eq!(s.surface().pane().stats().detached, 1);
    }

    #[test]
    fn teardown_destroys_live_and_drops_queued() {
        let mut s = scheduler(3);
        let items: Vec<_> = (0..10).map(|i| item(i, 1.0)).collect();
        s.submit(&items);
        s.on_animation_frame(Frame::new(0, Timestamp::ZERO));

        assert_eq!(s.teardown(), 3);
        assert!(!s.wants_animation_frame());
        assert_eq!(s.surface().pane().node_count(), 0);
        assert_eq!(s.rendered().len(), 0);
    }

    #[test]
    fn fade_runs_after_final_slice_and_never_gates_attachment() {
        let mut s = IncrementalRenderScheduler::new(
            OverlayBackend::new(RetainedPane::new()),
            IconCache::shared(500),
            SchedulerConfig {
                batch_size: 2,
                fade_in: FadeInConfig::default(),
            },
        );
        s.initialize().unwrap();
        s.surface_mut().on_camera_change(Box::new(MercatorCamera::new(
            LatLng::new(45.0, 7.0),
            14.0,
            Vec2::new(800.0, 600.0),
        )));
        s.submit(&[item(1, 1.0), item(2, 2.0), item(3, 3.0)]);

        s.on_animation_frame(Frame::new(0, Timestamp::ZERO));
        let h = s.handle_of(&MarkerId::property("1")).unwrap();
        let node = s.surface().adapter().node_of(h).unwrap();
        assert_eq!(s.surface().pane().node(node).unwrap().opacity, 0.4);

        let last = s.on_animation_frame(Frame::new(1, Timestamp::ZERO));
        assert!(last.drained);
        assert!(s.wants_animation_frame());

        let mut frame = Frame::new(2, Timestamp::ZERO);
        while s.wants_animation_frame() {
            assert!(!s.on_animation_frame(frame).is_slice());
            frame = frame.next(16);
        }
        let pane = s.surface().pane();
        assert!(pane.nodes().all(|(_, n)| n.opacity == 1.0));
    }

    #[test]
    fn removal_mid_fade_clears_the_ramp() {
        let mut s = IncrementalRenderScheduler::new(
            OverlayBackend::new(RetainedPane::new()),
            IconCache::shared(500),
            SchedulerConfig {
                batch_size: 100,
                fade_in: FadeInConfig::default(),
            },
        );
        s.initialize().unwrap();
        s.surface_mut().on_camera_change(Box::new(MercatorCamera::new(
            LatLng::new(45.0, 7.0),
            14.0,
            Vec2::new(800.0, 600.0),
        )));
        let items: Vec<_> = (0..400).map(|i| item(i, 100.0 + f64::from(i))).collect();
        s.submit(&items);
        let mut frame = Frame::new(0, Timestamp::ZERO);
        while s.pending_count() > 0 {
            s.on_animation_frame(frame);
            frame = frame.next(16);
        }
        s.on_animation_frame(frame);
        assert!(s.wants_animation_frame());

        let report = s.submit(&[]);
        assert_eq!(report.removed, 400);
        assert_eq!(report.failed, 0);
        assert!(!s.wants_animation_frame());
        assert_eq!(s.surface().live_count(), 0);

        let ops = s.surface().pane().stats();
        let idle = s.on_animation_frame(frame.next(16));
        assert_eq!(idle.attached, 0);
        assert_eq!(s.surface().pane().stats(), ops);
    }

    #[test]
    fn symbol_atlas_stays_bounded_across_repriced_passes() {
        let mut s = IncrementalRenderScheduler::new(
            SymbolLayerBackend::new(GpuCapabilities::default()),
            IconCache::shared(500),
            SchedulerConfig {
                batch_size: 100,
                fade_in: FadeInConfig::disabled(),
            },
        );
        s.initialize().unwrap();
        let mut frame = Frame::new(0, Timestamp::ZERO);
        for pass in 0..20_u32 {
            let items: Vec<_> = (0..500)
                .map(|i| item(i, f64::from(pass * 1_000 + i)))
                .collect();
            s.submit(&items);
            while s.wants_animation_frame() {
                s.on_animation_frame(frame);
                frame = frame.next(16);
            }
            assert_eq!(s.surface().live_count(), 500);
            assert!(s.surface().atlas_len() <= 500);
            s.surface_mut().take_new_glyphs();
        }
        assert!(s.surface().atlas_capacity() <= 1_000);
    }
}
