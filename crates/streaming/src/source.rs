use foundation::viewport::Viewport;
use tracing::{debug, info, warn};

use crate::fetcher::FetchError;
use crate::protocol::{Filters, TilePayload, TileRequest};
use crate::request::{FetchToken, TokenIssuer};
use crate::sanitize::{TileData, sanitize};
use crate::state::SourceState;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Below this zoom no request is issued at all.
    pub min_zoom_for_data: u8,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            min_zoom_for_data: 8,
        }
    }
}

/// What the caller should do after [`TileDataSource::begin`].
#[derive(Debug, Clone, PartialEq)]
pub enum FetchPlan {
    /// Zoom is below `min_zoom_for_data`; show a "zoom in" affordance.
    ZoomTooLow { zoom: u8, min_zoom: u8 },
    /// The same `(viewport, filters)` is already in flight or applied.
    Unchanged,
    /// Perform this request and report back with its token.
    Request(TileRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Superseded or cancelled; the response was discarded untouched.
    Stale { token: FetchToken },
    Applied(TileData),
    /// Transient failure; whatever was applied before stays applied.
    Failed { error: FetchError, consecutive: u32 },
}

#[derive(Debug, Clone, PartialEq)]
struct Query {
    viewport: Viewport,
    filters: Filters,
}

/// Viewport-driven payload source with last-issued-wins staleness.
///
/// Responses may resolve in any order. Only a response carrying the most
/// recently issued token is applied; anything older is dropped without
/// touching state, even if it resolves last.
#[derive(Debug)]
pub struct TileDataSource {
    config: SourceConfig,
    issuer: TokenIssuer,
    in_flight: Option<Query>,
    applied: Option<Query>,
    state: SourceState,
    consecutive_failures: u32,
}

impl TileDataSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            issuer: TokenIssuer::new(),
            in_flight: None,
            applied: None,
            state: SourceState::Idle,
            consecutive_failures: 0,
        }
    }

    pub fn config(&self) -> SourceConfig {
        self.config
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn in_flight_token(&self) -> Option<FetchToken> {
        self.in_flight.as_ref().and(self.issuer.current())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Plans a fetch for `viewport`, superseding any outstanding request.
    pub fn begin(&mut self, viewport: &Viewport, filters: &Filters) -> FetchPlan {
        if viewport.zoom < self.config.min_zoom_for_data {
            if let Some(token) = self.cancel() {
                debug!(%token, "superseded by zoom-too-low viewport");
            }
            self.applied = None;
            self.state = SourceState::ZoomTooLow {
                zoom: viewport.zoom,
                min_zoom: self.config.min_zoom_for_data,
            };
            return FetchPlan::ZoomTooLow {
                zoom: viewport.zoom,
                min_zoom: self.config.min_zoom_for_data,
            };
        }

        let query = Query {
            viewport: *viewport,
            filters: filters.clone(),
        };
        let duplicate = match &self.in_flight {
            Some(pending) => *pending == query,
            None => self.applied.as_ref() == Some(&query),
        };
        if duplicate {
            return FetchPlan::Unchanged;
        }

        let token = self.issuer.issue();
        debug!(%token, zoom = viewport.zoom, "issuing tile request");
        self.in_flight = Some(query);
        self.state = SourceState::Loading { token };
        FetchPlan::Request(TileRequest {
            token,
            viewport: *viewport,
            filters: filters.clone(),
        })
    }

    /// Applies or discards a resolved request.
    pub fn complete(
        &mut self,
        token: FetchToken,
        result: Result<TilePayload, FetchError>,
    ) -> FetchOutcome {
        if !self.issuer.is_current(token) || self.in_flight.is_none() {
            debug!(%token, "discarding stale tile response");
            return FetchOutcome::Stale { token };
        }
        self.issuer.invalidate();
        let query = self.in_flight.take();

        match result {
            Ok(payload) => {
                let data = sanitize(payload);
                if data.dropped > 0 {
                    warn!(%token, dropped = data.dropped, "payload contained malformed rows");
                }
                if data.truncated {
                    info!(%token, clusters = data.clusters.len(), "payload truncated by upstream density guard");
                }
                self.consecutive_failures = 0;
                self.applied = query;
                self.state = SourceState::Ready {
                    truncated: data.truncated,
                    item_count: data.item_count(),
                };
                FetchOutcome::Applied(data)
            }
            Err(error) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                warn!(%token, %error, consecutive = self.consecutive_failures, "tile request failed");
                self.state = SourceState::Failed {
                    consecutive: self.consecutive_failures,
                };
                FetchOutcome::Failed {
                    error,
                    consecutive: self.consecutive_failures,
                }
            }
        }
    }

    /// Invalidates the outstanding request so its resolution is a no-op.
    pub fn cancel(&mut self) -> Option<FetchToken> {
        self.in_flight.take()?;
        let token = self.issuer.invalidate();
        if self.state.is_loading() {
            self.state = SourceState::Idle;
        }
        token
    }

    /// Forgets the applied query so the next `begin` always issues a request.
    pub fn invalidate_applied(&mut self) {
        self.applied = None;
    }
}
