//! Replays a recorded camera trace through the map engine.
//!
//! Time is virtual: timers and animation frames advance on the trace clock,
//! while fetches run for real against the chosen upstream. Requests issued
//! in the same window resolve in completion order, so a slow superseded
//! response exercises the staleness path exactly as a browser would.

mod trace;
mod upstream;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use engine::config::EngineConfig;
use engine::engine::MapEngine;
use engine::events::MapHandlers;
use engine::tracker::CameraEvent;
use foundation::math::{MercatorCamera, Vec2};
use foundation::time::Timestamp;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use render::overlay::OverlayBackend;
use render::pane::RetainedPane;
use render::surface::MarkerSurface;
use render::symbol_layer::{GpuCapabilities, SymbolLayerBackend};
use runtime::frame::Frame;
use serde::Serialize;
use streaming::fetcher::TileFetcher;
use streaming::protocol::TileRequest;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::trace::{Trace, TraceAction};
use crate::upstream::{HttpTileFetcher, SyntheticFetcher};

#[derive(Parser)]
#[command(name = "map_replay")]
#[command(about = "Replay a camera trace against a tile upstream", long_about = None)]
struct Cli {
    /// Path to the trace JSON
    #[arg(short, long)]
    trace: PathBuf,

    /// Engine config JSON; MAPVIEW_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Backend::Overlay)]
    backend: Backend,

    #[arg(long, value_enum, default_value_t = Upstream::Synthetic)]
    upstream: Upstream,

    /// Endpoint for `--upstream http`
    #[arg(long)]
    url: Option<String>,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Backend {
    Overlay,
    Symbol,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Upstream {
    Synthetic,
    Http,
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    backend: &'static str,
    steps: usize,
    frames: u64,
    fetches: u64,
    viewport_changes: u64,
    load_errors: Vec<String>,
    cluster_expansions: Vec<(String, u8)>,
    final_markers: usize,
    final_live: usize,
    status: String,
    counters: Vec<(&'static str, u64)>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let trace = Trace::load(&cli.trace).await?;
    let config = match &cli.config {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading config {}", path.display()))?;
            EngineConfig::from_json_str(&raw)?
        }
        None => EngineConfig::default(),
    }
    .from_env_overrides()?;

    let fetcher: Arc<dyn TileFetcher> = match cli.upstream {
        Upstream::Synthetic => Arc::new(SyntheticFetcher::default()),
        Upstream::Http => {
            let url = cli
                .url
                .clone()
                .context("--upstream http requires --url")?;
            Arc::new(HttpTileFetcher::new(url, Duration::from_millis(cli.timeout_ms))?)
        }
    };

    info!(steps = trace.steps.len(), backend = ?cli.backend, upstream = ?cli.upstream, "replaying trace");
    let summary = match cli.backend {
        Backend::Overlay => {
            let surface = OverlayBackend::new(RetainedPane::new());
            replay(MapEngine::new(config, surface)?, &trace, fetcher).await
        }
        Backend::Symbol => {
            let surface = SymbolLayerBackend::new(GpuCapabilities::default());
            replay(MapEngine::new(config, surface)?, &trace, fetcher).await
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[derive(Debug, Default)]
struct Observed {
    viewport_changes: u64,
    load_errors: Vec<String>,
    cluster_expansions: Vec<(String, u8)>,
}

struct Replayer<S: MarkerSurface> {
    engine: MapEngine<S>,
    fetcher: Arc<dyn TileFetcher>,
    viewport_px: Vec2,
    frame_interval_ms: u64,
    now: u64,
    frames: u64,
    fetches: u64,
    issued: Vec<TileRequest>,
}

impl<S: MarkerSurface> Replayer<S> {
    /// Runs timers and animation frames up to `target` on the virtual clock.
    fn advance_to(&mut self, target: u64) {
        loop {
            let timer = self.engine.next_deadline().map(|t| t.as_millis());
            let frame = self
                .engine
                .wants_animation_frame()
                .then(|| self.now + self.frame_interval_ms);
            let next = match (timer, frame) {
                (Some(t), Some(f)) => t.min(f),
                (Some(t), None) => t,
                (None, Some(f)) => f,
                (None, None) => break,
            };
            if next > target {
                break;
            }
            self.now = self.now.max(next);
            if timer.is_some_and(|t| t <= self.now) {
                if let Some(request) = self.engine.poll_timers(Timestamp(self.now)) {
                    self.issued.push(request);
                }
            }
            if frame.is_some_and(|f| f <= self.now) {
                let frame = Frame::new(self.frames, Timestamp(self.now));
                self.engine.on_animation_frame(frame);
                self.frames += 1;
            }
        }
        self.now = self.now.max(target);
    }

    /// Awaits every issued request and reports results in completion order.
    async fn settle_fetches(&mut self) {
        if self.issued.is_empty() {
            return;
        }
        let issued = std::mem::take(&mut self.issued);
        self.fetches += issued.len() as u64;
        let mut pending: FuturesUnordered<_> = issued
            .iter()
            .map(|request| {
                let fetcher = Arc::clone(&self.fetcher);
                async move { (request.token, fetcher.fetch_tile(request).await) }
            })
            .collect();
        while let Some((token, result)) = pending.next().await {
            if let Err(err) = &result {
                warn!(%token, %err, "tile fetch failed");
            }
            self.engine.complete_fetch(token, result);
        }
    }

    fn apply(&mut self, action: &TraceAction) {
        match action {
            TraceAction::Camera { event } => {
                if let CameraEvent::Settled(camera) = event {
                    self.engine.on_camera_redraw(MercatorCamera::new(
                        camera.center,
                        camera.zoom,
                        self.viewport_px,
                    ));
                }
                if let Err(err) = self.engine.handle_camera(Timestamp(self.now), *event) {
                    warn!(%err, "camera event rejected");
                }
            }
            TraceAction::Hover { id } => {
                let id = id.as_deref().map(|id| TraceAction::marker_id(id, false));
                self.engine.marker_hovered(id);
            }
            TraceAction::Click { id, cluster } => {
                self.engine
                    .marker_clicked(&TraceAction::marker_id(id, *cluster));
            }
            TraceAction::Filters { filters } => {
                if let Some(request) = self.engine.set_filters(filters.clone()) {
                    self.issued.push(request);
                }
            }
        }
    }
}

async fn replay<S: MarkerSurface>(
    engine: MapEngine<S>,
    trace: &Trace,
    fetcher: Arc<dyn TileFetcher>,
) -> Summary {
    let observed = std::rc::Rc::new(std::cell::RefCell::new(Observed::default()));
    let mut replayer = Replayer {
        engine,
        fetcher,
        viewport_px: Vec2::new(trace.viewport_px[0], trace.viewport_px[1]),
        frame_interval_ms: trace.frame_interval_ms.max(1),
        now: 0,
        frames: 0,
        fetches: 0,
        issued: Vec::new(),
    };
    replayer.engine.set_handlers(observing_handlers(&observed));

    for step in &trace.steps {
        replayer.advance_to(step.at_ms);
        replayer.settle_fetches().await;
        replayer.apply(&step.action);
    }
    // Drain the last debounce, its fetch and the slices it queues.
    let tail = replayer.now + u64::from(u16::MAX);
    replayer.advance_to(tail);
    replayer.settle_fetches().await;
    replayer.advance_to(tail + u64::from(u16::MAX));

    let view = replayer.engine.view_state();
    let observed = observed.borrow();
    Summary {
        backend: replayer.engine.surface().name(),
        steps: trace.steps.len(),
        frames: replayer.frames,
        fetches: replayer.fetches,
        viewport_changes: observed.viewport_changes,
        load_errors: observed.load_errors.clone(),
        cluster_expansions: observed.cluster_expansions.clone(),
        final_markers: view.markers,
        final_live: replayer.engine.scheduler().live_count(),
        status: format!("{:?}", view.status),
        counters: replayer.engine.metrics().snapshot().counters,
    }
}

fn observing_handlers(observed: &std::rc::Rc<std::cell::RefCell<Observed>>) -> MapHandlers {
    let on_viewport = std::rc::Rc::clone(observed);
    let on_error = std::rc::Rc::clone(observed);
    let on_expand = std::rc::Rc::clone(observed);
    MapHandlers::new()
        .on_viewport_change(move |_| on_viewport.borrow_mut().viewport_changes += 1)
        .on_load_error(move |err| on_error.borrow_mut().load_errors.push(err.to_string()))
        .on_cluster_expand(move |(id, zoom)| {
            on_expand
                .borrow_mut()
                .cluster_expansions
                .push((id.to_string(), zoom));
        })
}
