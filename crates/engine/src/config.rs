use std::time::Duration;

use foundation::viewport::ZoomRange;
use layers::clustering::GridClusteringConfig;
use render::animation::FadeInConfig;
use render::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use streaming::source::SourceConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FadeInSettings {
    pub enabled: bool,
    pub frames: u32,
    pub stagger_step: u32,
    pub max_stagger_frames: u32,
    pub start_opacity: f32,
}

impl Default for FadeInSettings {
    fn default() -> Self {
        let d = FadeInConfig::default();
        Self {
            enabled: d.enabled,
            frames: d.frames,
            stagger_step: d.stagger_step,
            max_stagger_frames: d.max_stagger_frames,
            start_opacity: d.start_opacity,
        }
    }
}

impl From<FadeInSettings> for FadeInConfig {
    fn from(s: FadeInSettings) -> Self {
        FadeInConfig {
            enabled: s.enabled,
            frames: s.frames,
            stagger_step: s.stagger_step,
            max_stagger_frames: s.max_stagger_frames,
            start_opacity: s.start_opacity,
        }
    }
}

/// Engine options. Every field has a default; JSON keys accept both
/// `snake_case` and the `camelCase` names hosts commonly pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(alias = "minZoomForData")]
    pub min_zoom_for_data: u8,
    #[serde(alias = "clusterGridSize")]
    pub cluster_grid_size: f64,
    #[serde(alias = "debounceMs")]
    pub debounce_ms: u64,
    #[serde(alias = "iconCacheCeiling")]
    pub icon_cache_ceiling: usize,
    #[serde(alias = "renderBatchSize")]
    pub render_batch_size: usize,
    #[serde(alias = "enableClientClustering")]
    pub enable_client_clustering: bool,
    pub zoom_range: ZoomRange,
    pub max_cluster_zoom: u8,
    pub fade_in: FadeInSettings,
    /// Consecutive fetch failures before the refresh error becomes visible.
    pub failure_escalation: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_zoom_for_data: 8,
            cluster_grid_size: 60.0,
            debounce_ms: 300,
            icon_cache_ceiling: 500,
            render_batch_size: 15,
            enable_client_clustering: true,
            zoom_range: ZoomRange::default(),
            max_cluster_zoom: 18,
            fade_in: FadeInSettings::default(),
            failure_escalation: 3,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `MAPVIEW_*` environment variables on top of `self`.
    pub fn from_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            var: &'static str,
        ) -> Result<Option<T>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidEnv { var, value }),
            }
        }

        if let Some(v) = parse(&lookup, "MAPVIEW_MIN_ZOOM_FOR_DATA")? {
            self.min_zoom_for_data = v;
        }
        if let Some(v) = parse(&lookup, "MAPVIEW_CLUSTER_GRID_SIZE")? {
            self.cluster_grid_size = v;
        }
        if let Some(v) = parse(&lookup, "MAPVIEW_DEBOUNCE_MS")? {
            self.debounce_ms = v;
        }
        if let Some(v) = parse(&lookup, "MAPVIEW_ICON_CACHE_CEILING")? {
            self.icon_cache_ceiling = v;
        }
        if let Some(v) = parse(&lookup, "MAPVIEW_RENDER_BATCH_SIZE")? {
            self.render_batch_size = v;
        }
        if let Some(v) = parse(&lookup, "MAPVIEW_ENABLE_CLIENT_CLUSTERING")? {
            self.enable_client_clustering = v;
        }
        if let Some(v) = parse(&lookup, "MAPVIEW_MAX_CLUSTER_ZOOM")? {
            self.max_cluster_zoom = v;
        }
        if let Some(v) = parse(&lookup, "MAPVIEW_FADE_IN")? {
            self.fade_in.enabled = v;
        }
        if let Some(v) = parse(&lookup, "MAPVIEW_FAILURE_ESCALATION")? {
            self.failure_escalation = v;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render_batch_size == 0 {
            return Err(ConfigError::Invalid("render_batch_size must be at least 1"));
        }
        if self.icon_cache_ceiling == 0 {
            return Err(ConfigError::Invalid("icon_cache_ceiling must be at least 1"));
        }
        if !(self.cluster_grid_size.is_finite() && self.cluster_grid_size > 0.0) {
            return Err(ConfigError::Invalid("cluster_grid_size must be positive"));
        }
        if self.zoom_range.is_empty() {
            return Err(ConfigError::Invalid("zoom_range is empty"));
        }
        if !(0.0..=1.0).contains(&self.fade_in.start_opacity) {
            return Err(ConfigError::Invalid("fade_in.start_opacity must be within 0..=1"));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn source(&self) -> SourceConfig {
        SourceConfig {
            min_zoom_for_data: self.min_zoom_for_data,
        }
    }

    pub fn grid(&self) -> GridClusteringConfig {
        GridClusteringConfig {
            grid_size_px: self.cluster_grid_size,
            max_cluster_zoom: self.max_cluster_zoom,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.render_batch_size,
            fade_in: self.fade_in.into(),
        }
    }
}
