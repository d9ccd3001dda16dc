use foundation::ids::MarkerId;
use foundation::math::mercator::Projection;
use foundation::time::Timestamp;
use foundation::viewport::Viewport;
use layers::clustering::{ClusteringPolicy, GridClustering, ServerClustering};
use layers::icon_cache::{IconCache, SharedIconCache};
use runtime::event_bus::EventBus;
use runtime::frame::Frame;
use runtime::metrics::Metrics;
use scene::interaction::Interaction;
use scene::item::MapItem;
use render::scheduler::{IncrementalRenderScheduler, SliceReport};
use render::surface::MarkerSurface;
use std::cell::RefCell;
use std::rc::Rc;
use streaming::fetcher::FetchError;
use streaming::protocol::{Filters, TilePayload, TileRequest};
use streaming::request::FetchToken;
use streaming::source::{FetchOutcome, FetchPlan, TileDataSource};
use streaming::state::SourceState;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::error::{EngineError, LoadError};
use crate::events::{HandlerCell, MapEvent, MapHandlers, dispatch};
use crate::tracker::{CameraEvent, ViewportTracker};

pub const FETCH_ISSUED: &str = "fetch.issued";
pub const FETCH_STALE: &str = "fetch.stale";
pub const FETCH_FAILED: &str = "fetch.failed";
pub const FETCH_SKIPPED_ZOOM: &str = "fetch.skipped_zoom";
pub const RENDER_SLICES: &str = "render.slices";
pub const RENDER_ADDED: &str = "render.added";
pub const RENDER_UPDATED: &str = "render.updated";
pub const RENDER_REMOVED: &str = "render.removed";
pub const RENDER_NOOP: &str = "render.noop";
pub const RECONCILE_ENTRY_FAILED: &str = "reconcile.entry_failed";
pub const ICONS_RESET: &str = "icons.reset";
pub const PAYLOAD_DROPPED: &str = "payload.dropped";
pub const MARKERS_LIVE: &str = "markers.live";
pub const SLICE_SIZE: &str = "render.slice_size";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Ready,
    /// The surface could not initialize. Nothing renders until `retry_mount`.
    Failed { cause: String },
    TornDown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    /// Distinct from an empty result: the host shows a "zoom in" affordance.
    ZoomTooLow { zoom: u8, min_zoom: u8 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// The upstream truncated the result; only clusters are drawn.
    TooManyResults,
}

/// Everything the host needs to draw the map chrome.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub status: EngineStatus,
    pub load: LoadState,
    pub advisory: Option<Advisory>,
    /// Set once consecutive fetch failures reach the escalation threshold.
    pub refresh_error: Option<LoadError>,
    pub viewport: Option<Viewport>,
    /// Markers in the target set, attached or queued.
    pub markers: usize,
    pub pending: usize,
}

/// One interactive map instance.
///
/// The engine owns no clock, network or animation loop: the host feeds it
/// camera events, timer polls, fetch completions and animation frames, and
/// performs the [`TileRequest`]s it hands back.
pub struct MapEngine<S: MarkerSurface> {
    config: EngineConfig,
    status: EngineStatus,
    tracker: ViewportTracker,
    source: TileDataSource,
    clustering: Box<dyn ClusteringPolicy>,
    scheduler: IncrementalRenderScheduler<S>,
    icons: SharedIconCache,
    icon_resets_seen: u64,
    interaction: Interaction,
    filters: Filters,
    items: Vec<MapItem>,
    load: LoadState,
    advisory: Option<Advisory>,
    refresh_error: Option<LoadError>,
    handlers: HandlerCell,
    events: EventBus<MapEvent>,
    metrics: Metrics,
}

impl<S: MarkerSurface> MapEngine<S> {
    pub fn new(config: EngineConfig, surface: S) -> Result<Self, ConfigError> {
        let icons = IconCache::shared(config.icon_cache_ceiling);
        Self::with_icon_cache(config, surface, icons)
    }

    /// Builds an engine drawing glyphs from a cache shared with other maps.
    pub fn with_icon_cache(
        config: EngineConfig,
        surface: S,
        icons: SharedIconCache,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let clustering: Box<dyn ClusteringPolicy> = if config.enable_client_clustering {
            Box::new(GridClustering::new(config.grid()))
        } else {
            Box::new(ServerClustering)
        };
        let icon_resets_seen = icons.borrow().stats().resets;

        let mut engine = Self {
            tracker: ViewportTracker::new(config.debounce(), config.zoom_range),
            source: TileDataSource::new(config.source()),
            clustering,
            scheduler: IncrementalRenderScheduler::new(surface, Rc::clone(&icons), config.scheduler()),
            icons,
            icon_resets_seen,
            status: EngineStatus::Ready,
            interaction: Interaction::default(),
            filters: Filters::new(),
            items: Vec::new(),
            load: LoadState::Idle,
            advisory: None,
            refresh_error: None,
            handlers: Rc::new(RefCell::new(MapHandlers::new())),
            events: EventBus::new(),
            metrics: Metrics::new(),
            config,
        };
        engine.mount();
        Ok(engine)
    }

    fn mount(&mut self) {
        match self.scheduler.initialize() {
            Ok(()) => {
                info!(
                    backend = self.scheduler.surface().name(),
                    clustering = self.clustering.name(),
                    "map surface ready"
                );
                self.status = EngineStatus::Ready;
            }
            Err(err) => {
                error!(%err, backend = self.scheduler.surface().name(), "map surface failed to initialize");
                self.status = EngineStatus::Failed {
                    cause: err.to_string(),
                };
                self.events.emit(MapEvent::LoadError(err.into()));
            }
        }
    }

    /// Re-attempts surface initialization after an environment failure.
    pub fn retry_mount(&mut self) -> Result<(), EngineError> {
        match &self.status {
            EngineStatus::TornDown => return Err(EngineError::TornDown),
            EngineStatus::Ready => return Ok(()),
            EngineStatus::Failed { .. } => {}
        }
        let result = self.scheduler.initialize();
        match result {
            Ok(()) => {
                info!("map surface recovered");
                self.status = EngineStatus::Ready;
                self.render();
                self.dispatch();
                Ok(())
            }
            Err(err) => {
                warn!(%err, "map surface still unavailable");
                self.status = EngineStatus::Failed {
                    cause: err.to_string(),
                };
                Err(err.into())
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn items(&self) -> &[MapItem] {
        &self.items
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn source_state(&self) -> SourceState {
        self.source.state()
    }

    pub fn scheduler(&self) -> &IncrementalRenderScheduler<S> {
        &self.scheduler
    }

    pub fn surface(&self) -> &S {
        self.scheduler.surface()
    }

    pub fn surface_mut(&mut self) -> &mut S {
        self.scheduler.surface_mut()
    }

    pub fn icon_cache(&self) -> SharedIconCache {
        Rc::clone(&self.icons)
    }

    pub fn view_state(&self) -> ViewState {
        ViewState {
            status: self.status.clone(),
            load: self.load,
            advisory: self.advisory,
            refresh_error: self.refresh_error.clone(),
            viewport: self.tracker.current().copied(),
            markers: self.scheduler.rendered().len(),
            pending: self.scheduler.pending_count(),
        }
    }

    /// The cell dispatch reads handlers from.
    pub fn handlers(&self) -> HandlerCell {
        Rc::clone(&self.handlers)
    }

    /// Replaces the current handlers and delivers any buffered events.
    pub fn set_handlers(&mut self, handlers: MapHandlers) {
        *self.handlers.borrow_mut() = handlers;
        self.dispatch();
    }

    pub fn handle_camera(&mut self, now: Timestamp, event: CameraEvent) -> Result<(), EngineError> {
        if self.status == EngineStatus::TornDown {
            return Err(EngineError::TornDown);
        }
        self.tracker.handle(now, event)?;
        Ok(())
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        if self.status == EngineStatus::TornDown {
            return None;
        }
        self.tracker.next_deadline()
    }

    /// Fires due debounce deadlines. Returns the request to perform, if any.
    pub fn poll_timers(&mut self, now: Timestamp) -> Option<TileRequest> {
        if self.status == EngineStatus::TornDown {
            return None;
        }
        let viewport = self.tracker.poll(now)?;
        self.events.emit(MapEvent::ViewportChange(viewport));
        let request = self.plan_fetch(&viewport);
        self.dispatch();
        request
    }

    /// Replaces the filter set and refetches the current viewport.
    pub fn set_filters(&mut self, filters: Filters) -> Option<TileRequest> {
        if self.status == EngineStatus::TornDown {
            return None;
        }
        self.filters = filters;
        let viewport = *self.tracker.current()?;
        let request = self.plan_fetch(&viewport);
        self.dispatch();
        request
    }

    fn plan_fetch(&mut self, viewport: &Viewport) -> Option<TileRequest> {
        match self.source.begin(viewport, &self.filters) {
            FetchPlan::ZoomTooLow { zoom, min_zoom } => {
                info!(zoom, min_zoom, "zoom below data threshold; no request issued");
                self.metrics.inc(FETCH_SKIPPED_ZOOM);
                self.load = LoadState::ZoomTooLow { zoom, min_zoom };
                self.advisory = None;
                self.items.clear();
                self.render();
                None
            }
            FetchPlan::Unchanged => {
                debug!("viewport and filters unchanged; request skipped");
                None
            }
            FetchPlan::Request(request) => {
                self.metrics.inc(FETCH_ISSUED);
                self.load = LoadState::Loading;
                Some(request)
            }
        }
    }

    /// Reports the result of a request handed out earlier.
    ///
    /// Returns whether the result was applied. Results for superseded or
    /// cancelled tokens are discarded without any state change or callback.
    pub fn complete_fetch(
        &mut self,
        token: FetchToken,
        result: Result<TilePayload, FetchError>,
    ) -> bool {
        let applied = match self.source.complete(token, result) {
            FetchOutcome::Stale { token } => {
                debug!(%token, "stale response discarded");
                self.metrics.inc(FETCH_STALE);
                false
            }
            FetchOutcome::Applied(data) => {
                self.metrics.add(PAYLOAD_DROPPED, data.dropped as u64);
                self.advisory = data.truncated.then_some(Advisory::TooManyResults);
                let zoom = self.tracker.current().map_or(0, |v| v.zoom);
                self.items = if data.truncated {
                    data.renderable()
                } else {
                    self.clustering.apply(&data.properties, &data.clusters, zoom)
                };
                self.interaction.retain_existing(&self.items);
                self.load = LoadState::Idle;
                self.refresh_error = None;
                self.render();
                true
            }
            FetchOutcome::Failed { error, consecutive } => {
                self.metrics.inc(FETCH_FAILED);
                self.load = LoadState::Idle;
                let err = LoadError::Fetch { error, consecutive };
                if consecutive >= self.config.failure_escalation {
                    warn!(consecutive, "repeated refresh failures");
                    self.refresh_error = Some(err.clone());
                }
                self.events.emit(MapEvent::LoadError(err));
                false
            }
        };
        self.dispatch();
        applied
    }

    /// Submits the current items, with interaction state folded in.
    fn render(&mut self) {
        if self.status != EngineStatus::Ready {
            return;
        }
        let mut next = self.items.clone();
        self.interaction.apply(&mut next);
        let report = self.scheduler.submit(&next);
        if report.noop {
            self.metrics.inc(RENDER_NOOP);
        }
        self.metrics.add(RENDER_UPDATED, report.updated as u64);
        self.metrics.add(RENDER_REMOVED, report.removed as u64);
        self.metrics.add(RECONCILE_ENTRY_FAILED, report.failed as u64);
        self.note_icon_resets();
    }

    pub fn wants_animation_frame(&self) -> bool {
        self.status == EngineStatus::Ready && self.scheduler.wants_animation_frame()
    }

    pub fn on_animation_frame(&mut self, frame: Frame) -> SliceReport {
        if self.status != EngineStatus::Ready {
            return SliceReport::default();
        }
        let report = self.scheduler.on_animation_frame(frame);
        if report.is_slice() {
            self.metrics.inc(RENDER_SLICES);
            self.metrics
                .record(SLICE_SIZE, (report.attached + report.failed) as i64);
            self.metrics
                .set_gauge(MARKERS_LIVE, self.scheduler.live_count() as i64);
        }
        self.metrics.add(RENDER_ADDED, report.attached as u64);
        self.metrics.add(RECONCILE_ENTRY_FAILED, report.failed as u64);
        if report.drained {
            debug!(live = self.scheduler.live_count(), frame = frame.index, "all markers attached");
        }
        self.note_icon_resets();
        report
    }

    /// Hands the current camera to the backend.
    pub fn on_camera_redraw(&mut self, projection: impl Projection + 'static) {
        if self.status != EngineStatus::Ready {
            return;
        }
        self.scheduler
            .surface_mut()
            .on_camera_change(Box::new(projection));
    }

    pub fn marker_clicked(&mut self, id: &MarkerId) {
        if self.status != EngineStatus::Ready {
            return;
        }
        let Some(item) = self.items.iter().find(|i| i.id() == id) else {
            debug!(%id, "click on unknown marker ignored");
            return;
        };
        match item {
            MapItem::Cluster(cluster) => {
                let zoom = cluster.expansion_zoom.unwrap_or_else(|| {
                    let current = self.tracker.current().map_or(0, |v| v.zoom);
                    current.saturating_add(1).min(self.config.zoom_range.max)
                });
                self.events.emit(MapEvent::ClusterExpand {
                    id: id.clone(),
                    zoom,
                });
            }
            MapItem::Property(_) => {
                if self.interaction.select(Some(id.clone())) {
                    self.render();
                }
            }
        }
        self.events.emit(MapEvent::MarkerClick(id.clone()));
        self.dispatch();
    }

    pub fn marker_hovered(&mut self, id: Option<MarkerId>) {
        if self.status != EngineStatus::Ready {
            return;
        }
        let id = id.filter(|id| self.items.iter().any(|i| i.id() == id));
        if self.interaction.hover(id.clone()) {
            self.render();
            self.events.emit(MapEvent::MarkerHover(id));
        }
        self.dispatch();
    }

    pub fn clear_selection(&mut self) {
        if self.status == EngineStatus::TornDown {
            return;
        }
        if self.status == EngineStatus::Ready && self.interaction.select(None) {
            self.render();
        }
        self.dispatch();
    }

    /// Cancels timers and the in-flight request, and releases every marker.
    ///
    /// No callback fires after this returns.
    pub fn teardown(&mut self) {
        if self.status == EngineStatus::TornDown {
            return;
        }
        self.tracker.cancel();
        if let Some(token) = self.source.cancel() {
            debug!(%token, "in-flight request invalidated");
        }
        let destroyed = self.scheduler.teardown();
        self.events.drain();
        self.items.clear();
        self.status = EngineStatus::TornDown;
        info!(destroyed, "map engine torn down");
    }

    fn note_icon_resets(&mut self) {
        let resets = self.icons.borrow().stats().resets;
        if resets > self.icon_resets_seen {
            self.metrics.add(ICONS_RESET, resets - self.icon_resets_seen);
            self.icon_resets_seen = resets;
        }
    }

    fn dispatch(&mut self) {
        for event in self.events.drain() {
            dispatch(&self.handlers, event);
        }
    }
}

impl<S: MarkerSurface> Drop for MapEngine<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::CameraSnapshot;
    use foundation::bounds::LatLng;
    use pretty_assertions::assert_eq;
    use render::overlay::OverlayBackend;
    use render::pane::RetainedPane;
    use streaming::protocol::{WireCluster, WirePoint};

    type TestEngine = MapEngine<OverlayBackend<RetainedPane>>;

    fn engine_with(config: EngineConfig) -> TestEngine {
        MapEngine::new(config, OverlayBackend::new(RetainedPane::new())).unwrap()
    }

    fn unclustered() -> EngineConfig {
        EngineConfig {
            enable_client_clustering: false,
            ..EngineConfig::default()
        }
    }

    fn settled(lng: f64, zoom: f64) -> CameraEvent {
        CameraEvent::Settled(CameraSnapshot {
            south_west: LatLng::new(44.0, lng),
            north_east: LatLng::new(46.0, lng + 2.0),
            zoom,
            center: LatLng::new(45.0, lng + 1.0),
        })
    }

    /// Settles the camera at `at` ms and fires the debounce.
    fn settle_and_fetch(e: &mut TestEngine, at: u64, lng: f64, zoom: f64) -> Option<TileRequest> {
        e.handle_camera(Timestamp(at), settled(lng, zoom)).unwrap();
        e.poll_timers(Timestamp(at + e.config().debounce_ms))
    }

    fn points(n: usize) -> TilePayload {
        TilePayload {
            points: (0..n)
                .map(|i| {
                    WirePoint::new(
                        &format!("p{i}"),
                        45.0 + (i / 100) as f64 * 0.001,
                        7.0 + (i % 100) as f64 * 0.001,
                        100.0 + i as f64,
                    )
                })
                .collect(),
            ..TilePayload::default()
        }
    }

    fn run_frames(e: &mut TestEngine) -> u64 {
        let mut frame = Frame::new(0, Timestamp::ZERO);
        let mut n = 0;
        while e.wants_animation_frame() {
            e.on_animation_frame(frame);
            frame = frame.next(16);
            n += 1;
            assert!(n < 100_000, "scheduler never drained");
        }
        n
    }

    fn loaded(config: EngineConfig, payload: TilePayload) -> TestEngine {
        let mut e = engine_with(config);
        let req = settle_and_fetch(&mut e, 0, 7.0, 12.0).unwrap();
        assert!(e.complete_fetch(req.token, Ok(payload)));
        run_frames(&mut e);
        e
    }

    fn recorder<T: 'static>() -> (Rc<RefCell<Vec<T>>>, impl FnMut(T) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, move |v: T| sink.borrow_mut().push(v))
    }

    #[test]
    fn settle_burst_emits_latest_viewport_once() {
        let mut e = engine_with(EngineConfig::default());
        let (seen, push) = recorder::<Viewport>();
        e.set_handlers(MapHandlers::new().on_viewport_change(push));

        e.handle_camera(Timestamp(0), settled(1.0, 12.0)).unwrap();
        e.handle_camera(Timestamp(100), settled(2.0, 12.0)).unwrap();
        e.handle_camera(Timestamp(250), settled(3.0, 12.0)).unwrap();

        assert_eq!(e.next_deadline(), Some(Timestamp(550)));
        assert_eq!(e.poll_timers(Timestamp(549)), None);
        let req = e.poll_timers(Timestamp(550)).unwrap();
        assert_eq!(req.viewport.bounds.min_lng, 3.0);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0], req.viewport);
        assert_eq!(e.metrics().counter(FETCH_ISSUED), 1);
    }

    #[test]
    fn low_zoom_skips_the_request_and_clears_markers() {
        let mut e = loaded(unclustered(), points(5));
        assert_eq!(e.view_state().markers, 5);

        assert_eq!(settle_and_fetch(&mut e, 5_000, 7.0, 6.0), None);
        run_frames(&mut e);

        let view = e.view_state();
        assert_eq!(view.load, LoadState::ZoomTooLow { zoom: 6, min_zoom: 8 });
        assert_eq!(view.markers, 0);
        assert_eq!(e.metrics().counter(FETCH_SKIPPED_ZOOM), 1);
        assert_eq!(e.metrics().counter(FETCH_ISSUED), 1);
        assert_eq!(e.surface().pane().node_count(), 0);
    }

    #[test]
    fn ten_thousand_points_attach_in_fifteen_marker_slices() {
        let mut e = engine_with(unclustered());
        let req = settle_and_fetch(&mut e, 0, 7.0, 12.0).unwrap();
        e.complete_fetch(req.token, Ok(points(10_000)));

        assert_eq!(e.scheduler().live_count(), 0);
        assert_eq!(e.view_state().pending, 10_000);

        run_frames(&mut e);
        assert_eq!(e.metrics().counter(RENDER_SLICES), 667);
        assert_eq!(e.metrics().counter(RENDER_ADDED), 10_000);
        assert_eq!(e.scheduler().rendered().len(), 10_000);
        assert_eq!(e.surface().live_count(), 10_000);
        let slices = e.metrics().histogram(SLICE_SIZE).unwrap();
        assert_eq!((slices.max, slices.min), (15, 10));
        assert_eq!(e.metrics().gauge(MARKERS_LIVE), Some(10_000));
    }

    #[test]
    fn truncated_payload_draws_only_clusters() {
        let mut payload = points(5);
        payload.clusters = vec![
            WireCluster::new("a", 45.1, 7.1, 40),
            WireCluster::new("b", 45.2, 7.2, 12),
            WireCluster::new("c", 45.3, 7.3, 7),
        ];
        payload.truncated = true;

        let e = loaded(EngineConfig::default(), payload);
        assert_eq!(e.view_state().advisory, Some(Advisory::TooManyResults));
        assert_eq!(e.scheduler().rendered().len(), 3);
        assert!(e.items().iter().all(|i| matches!(i, MapItem::Cluster(_))));
    }

    #[test]
    fn stale_response_is_discarded() {
        let mut e = engine_with(unclustered());
        let first = settle_and_fetch(&mut e, 0, 7.0, 12.0).unwrap();
        let second = settle_and_fetch(&mut e, 1_000, 8.0, 12.0).unwrap();

        let mut newest = TilePayload::default();
        newest.points.push(WirePoint::new("new", 45.0, 8.5, 900.0));
        assert!(e.complete_fetch(second.token, Ok(newest)));
        assert!(!e.complete_fetch(first.token, Ok(points(2))));

        let ids: Vec<String> = e.items().iter().map(|i| i.id().to_string()).collect();
        assert_eq!(ids, vec!["property/new".to_string()]);
        assert_eq!(e.metrics().counter(FETCH_STALE), 1);
    }

    #[test]
    fn client_clusters_always_hold_several_points() {
        let mut payload = TilePayload::default();
        payload.points = vec![
            WirePoint::new("near-a", 45.0, 7.0, 100.0),
            WirePoint::new("near-b", 45.0001, 7.0001, 300.0),
            WirePoint::new("alone", 45.9, 8.9, 500.0),
        ];
        let e = loaded(EngineConfig::default(), payload);

        for item in e.items() {
            if let MapItem::Cluster(c) = item {
                assert!(c.count >= 2, "{} has count {}", c.id, c.count);
            }
        }
        assert!(e.items().iter().any(|i| i.id() == &MarkerId::property("alone")));
    }

    #[test]
    fn icon_cache_stays_bounded_and_counts_resets() {
        let e = loaded(unclustered(), points(1_200));
        let cache = e.icon_cache();
        assert!(cache.borrow().len() <= 500);
        assert!(e.metrics().counter(ICONS_RESET) >= 2);
        assert_eq!(e.scheduler().rendered().len(), 1_200);
    }

    #[test]
    fn rejected_marker_does_not_abort_the_pass() {
        let mut e = engine_with(unclustered());
        e.surface_mut().pane_mut().reject_glyph("price:103:EUR");
        let req = settle_and_fetch(&mut e, 0, 7.0, 12.0).unwrap();
        e.complete_fetch(req.token, Ok(points(10)));
        run_frames(&mut e);

        assert_eq!(e.scheduler().rendered().len(), 9);
        assert_eq!(e.metrics().counter(RECONCILE_ENTRY_FAILED), 1);
        assert_eq!(e.surface().pane().node_count(), 9);
    }

    #[test]
    fn unavailable_surface_is_terminal_until_retried() {
        let mut e: TestEngine = MapEngine::new(
            unclustered(),
            OverlayBackend::new(RetainedPane::unavailable("no gpu")),
        )
        .unwrap();
        assert!(matches!(e.status(), EngineStatus::Failed { cause } if cause.contains("no gpu")));

        let (errors, push) = recorder::<LoadError>();
        e.set_handlers(MapHandlers::new().on_load_error(push));
        assert_eq!(errors.borrow().len(), 1);
        assert!(errors.borrow()[0].is_terminal());

        let req = settle_and_fetch(&mut e, 0, 7.0, 12.0).unwrap();
        e.complete_fetch(req.token, Ok(points(4)));
        assert!(!e.wants_animation_frame());
        assert!(e.retry_mount().is_err());

        e.surface_mut().pane_mut().restore();
        e.retry_mount().unwrap();
        assert_eq!(e.status(), &EngineStatus::Ready);
        run_frames(&mut e);
        assert_eq!(e.scheduler().rendered().len(), 4);
    }

    #[test]
    fn clear_selection_rerenders_and_flushes_buffered_events() {
        let mut e = loaded(unclustered(), points(3));
        let p1 = MarkerId::property("p1");
        e.marker_clicked(&p1);
        assert!(e.interaction().is_selected(&p1));
        let updated = e.metrics().counter(RENDER_UPDATED);

        e.clear_selection();
        assert!(!e.interaction().is_selected(&p1));
        assert!(e.metrics().counter(RENDER_UPDATED) > updated);

        let mut failed: TestEngine = MapEngine::new(
            unclustered(),
            OverlayBackend::new(RetainedPane::unavailable("no gpu")),
        )
        .unwrap();
        let (errors, push) = recorder::<LoadError>();
        *failed.handlers().borrow_mut() = MapHandlers::new().on_load_error(push);
        assert!(errors.borrow().is_empty());
        failed.clear_selection();
        assert_eq!(errors.borrow().len(), 1);
    }

    #[test]
    fn repeated_fetch_failures_escalate_and_keep_markers() {
        let mut e = loaded(unclustered(), points(3));
        let (errors, push) = recorder::<LoadError>();
        e.set_handlers(MapHandlers::new().on_load_error(push));

        for attempt in 1..=3u32 {
            let req = settle_and_fetch(&mut e, attempt as u64 * 1_000, 7.0 + attempt as f64, 12.0)
                .unwrap();
            e.complete_fetch(req.token, Err(FetchError::Status { status: 503 }));
            let view = e.view_state();
            assert_eq!(view.markers, 3);
            assert_eq!(view.refresh_error.is_some(), attempt >= 3);
        }
        assert_eq!(errors.borrow().len(), 3);
        assert!(!errors.borrow()[0].is_terminal());
        assert_eq!(e.metrics().counter(FETCH_FAILED), 3);

        let req = settle_and_fetch(&mut e, 9_000, 12.0, 12.0).unwrap();
        e.complete_fetch(req.token, Ok(points(2)));
        assert_eq!(e.view_state().refresh_error, None);
    }

    #[test]
    fn hover_updates_markers_in_place() {
        let mut e = loaded(unclustered(), points(3));
        let (hovers, push) = recorder::<Option<MarkerId>>();
        e.set_handlers(MapHandlers::new().on_marker_hover(push));
        let appended = e.surface().pane().stats().appended;

        e.marker_hovered(Some(MarkerId::property("p0")));
        assert_eq!(e.metrics().counter(RENDER_UPDATED), 1);
        e.marker_hovered(Some(MarkerId::property("p1")));
        assert_eq!(e.metrics().counter(RENDER_UPDATED), 3);
        e.marker_hovered(Some(MarkerId::property("p1")));
        assert_eq!(e.metrics().counter(RENDER_UPDATED), 3);

        assert_eq!(e.surface().pane().stats().appended, appended);
        assert_eq!(
            *hovers.borrow(),
            vec![Some(MarkerId::property("p0")), Some(MarkerId::property("p1"))]
        );
    }

    #[test]
    fn cluster_click_requests_expansion() {
        let mut cluster = WireCluster::new("c1", 45.2, 7.2, 30);
        cluster.expansion_zoom = Some(14);
        let payload = TilePayload {
            clusters: vec![cluster],
            points: points(1).points,
            truncated: false,
        };
        let mut e = loaded(unclustered(), payload);
        let (expansions, on_expand) = recorder::<(MarkerId, u8)>();
        let (clicks, on_click) = recorder::<MarkerId>();
        e.set_handlers(
            MapHandlers::new()
                .on_cluster_expand(on_expand)
                .on_marker_click(on_click),
        );

        e.marker_clicked(&MarkerId::cluster("c1"));
        assert_eq!(*expansions.borrow(), vec![(MarkerId::cluster("c1"), 14)]);

        e.marker_clicked(&MarkerId::property("p0"));
        assert!(e.interaction().is_selected(&MarkerId::property("p0")));
        assert_eq!(clicks.borrow().len(), 2);
    }

    #[test]
    fn dispatch_uses_the_latest_handlers() {
        let mut e = loaded(unclustered(), points(2));
        let (first, push_first) = recorder::<MarkerId>();
        let (second, push_second) = recorder::<MarkerId>();
        e.set_handlers(MapHandlers::new().on_marker_click(push_first));
        e.set_handlers(MapHandlers::new().on_marker_click(push_second));

        e.marker_clicked(&MarkerId::property("p1"));
        assert!(first.borrow().is_empty());
        assert_eq!(*second.borrow(), vec![MarkerId::property("p1")]);
    }

    #[test]
    fn teardown_releases_everything_and_silences_callbacks() {
        let mut e = loaded(unclustered(), points(4));
        let (errors, push) = recorder::<LoadError>();
        e.set_handlers(MapHandlers::new().on_load_error(push));
        let pending = settle_and_fetch(&mut e, 5_000, 9.0, 12.0).unwrap();
        e.handle_camera(Timestamp(6_000), settled(10.0, 12.0)).unwrap();

        e.teardown();
        assert_eq!(e.surface().pane().node_count(), 0);
        assert_eq!(e.next_deadline(), None);
        assert_eq!(e.poll_timers(Timestamp(60_000)), None);
        assert!(!e.complete_fetch(pending.token, Err(FetchError::Cancelled)));
        assert!(errors.borrow().is_empty());
        assert!(!e.wants_animation_frame());
        assert_eq!(
            e.handle_camera(Timestamp(7_000), settled(1.0, 12.0)),
            Err(EngineError::TornDown)
        );
    }
}
