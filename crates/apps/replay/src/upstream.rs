use std::time::Duration;

use foundation::viewport::Viewport;
use streaming::fetcher::{BoxFuture, FetchError, TileFetcher};
use streaming::protocol::{TilePayload, TileRequest, WireCluster, WirePoint};
use tracing::debug;

/// Posts each request as JSON to a single endpoint.
pub struct HttpTileFetcher {
    url: String,
    client: reqwest::Client,
}

impl HttpTileFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl TileFetcher for HttpTileFetcher {
    fn fetch_tile<'a>(
        &'a self,
        request: &'a TileRequest,
    ) -> BoxFuture<'a, Result<TilePayload, FetchError>> {
        Box::pin(async move {
            let resp = self
                .client
                .post(&self.url)
                .json(request)
                .send()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(FetchError::Status {
                    status: resp.status().as_u16(),
                });
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;
            Ok(TilePayload::from_json(&bytes)?)
        })
    }
}

/// Deterministic upstream laying listings on a fixed lattice.
///
/// Lattice coordinates are global, so panning keeps the ids of points that
/// stay in view. Above `max_points` the response is truncated and carries
/// coarse block clusters instead.
#[derive(Debug, Clone)]
pub struct SyntheticFetcher {
    pub points_per_degree_at_z8: f64,
    pub max_points: usize,
    pub cluster_blocks: u32,
}

impl Default for SyntheticFetcher {
    fn default() -> Self {
        Self {
            points_per_degree_at_z8: 2.0,
            max_points: 5_000,
            cluster_blocks: 4,
        }
    }
}

impl SyntheticFetcher {
    fn spacing_deg(&self, zoom: u8) -> f64 {
        let scale = 2f64.powi(i32::from(zoom) - 8);
        1.0 / (self.points_per_degree_at_z8 * scale)
    }

    pub fn payload_for(&self, viewport: &Viewport) -> TilePayload {
        let b = viewport.bounds;
        let step = self.spacing_deg(viewport.zoom);
        let rows = (b.min_lat / step).ceil() as i64..=(b.max_lat / step).floor() as i64;
        let cols = (b.min_lng / step).ceil() as i64..=(b.max_lng / step).floor() as i64;
        let total = rows.clone().count() * cols.clone().count();

        if total > self.max_points {
            debug!(total, max = self.max_points, "synthetic payload truncated");
            return TilePayload {
                points: Vec::new(),
                clusters: self.block_clusters(viewport, total),
                truncated: true,
            };
        }

        let mut points = Vec::with_capacity(total);
        for row in rows {
            for col in cols.clone() {
                let price = 400 + (row * 7_919 + col * 104_729).rem_euclid(3_600);
                points.push(WirePoint::new(
                    &format!("{row}:{col}"),
                    row as f64 * step,
                    col as f64 * step,
                    price as f64,
                ));
            }
        }
        TilePayload {
            points,
            clusters: Vec::new(),
            truncated: false,
        }
    }

    fn block_clusters(&self, viewport: &Viewport, total: usize) -> Vec<WireCluster> {
        let b = viewport.bounds;
        let n = self.cluster_blocks.max(1);
        let per_block = (total / (n * n) as usize).max(2) as u32;
        let dlat = (b.max_lat - b.min_lat) / f64::from(n);
        let dlng = (b.max_lng - b.min_lng) / f64::from(n);
        let mut out = Vec::with_capacity((n * n) as usize);
        for i in 0..n {
            for j in 0..n {
                let mut c = WireCluster::new(
                    &format!("z{}/{i}/{j}", viewport.zoom),
                    b.min_lat + dlat * (f64::from(i) + 0.5),
                    b.min_lng + dlng * (f64::from(j) + 0.5),
                    per_block,
                );
                c.expansion_zoom = Some(viewport.zoom.saturating_add(2));
                out.push(c);
            }
        }
        out
    }
}

impl TileFetcher for SyntheticFetcher {
    fn fetch_tile<'a>(
        &'a self,
        request: &'a TileRequest,
    ) -> BoxFuture<'a, Result<TilePayload, FetchError>> {
        Box::pin(async move { Ok(self.payload_for(&request.viewport)) })
    }
}
