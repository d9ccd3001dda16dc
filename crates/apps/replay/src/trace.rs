//! Recorded host sessions.
//!
//! ```json
//! { "viewport_px": [1280, 800],
//!   "steps": [
//!     { "at_ms": 0,   "type": "camera", "event": { "kind": "settled", "camera": { ... } } },
//!     { "at_ms": 900, "type": "hover",  "id": "p12" },
//!     { "at_ms": 950, "type": "click",  "id": "z10/512/380", "cluster": true }
//!   ] }
//! ```

use std::path::Path;

use anyhow::Context;
use engine::tracker::CameraEvent;
use foundation::ids::MarkerId;
use serde::Deserialize;
use streaming::protocol::Filters;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Trace {
    #[serde(default = "default_viewport_px")]
    pub viewport_px: [f64; 2],
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
    pub steps: Vec<TraceStep>,
}

fn default_viewport_px() -> [f64; 2] {
    [1024.0, 768.0]
}

fn default_frame_interval() -> u64 {
    16
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraceStep {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: TraceAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceAction {
    Camera { event: CameraEvent },
    Hover { id: Option<String> },
    Click {
        id: String,
        #[serde(default)]
        cluster: bool,
    },
    Filters { filters: Filters },
}

impl TraceAction {
    pub fn marker_id(id: &str, cluster: bool) -> MarkerId {
        if cluster {
            MarkerId::cluster(id)
        } else {
            MarkerId::property(id)
        }
    }
}

impl Trace {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let mut trace: Trace = serde_json::from_str(s)?;
        trace.steps.sort_by_key(|s| s.at_ms);
        Ok(trace)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading trace {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing trace {}", path.display()))
    }

    pub fn end_ms(&self) -> u64 {
        self.steps.last().map_or(0, |s| s.at_ms)
    }
}
