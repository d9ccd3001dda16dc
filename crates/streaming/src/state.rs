use crate::request::FetchToken;

/// Lifecycle of the tile source for the current viewport.
///
/// ```text
/// Idle ─begin─▶ Loading ─ok─▶ Ready
///   │              └──err──▶ Failed   (previous markers stay on the map)
///   └─zoom below minimum─▶ ZoomTooLow
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    /// The viewport zoom is below the data threshold; nothing was requested.
    ZoomTooLow { zoom: u8, min_zoom: u8 },
    Loading { token: FetchToken },
    Ready { truncated: bool, item_count: usize },
    /// The most recent request failed; `consecutive` counts failures in a row.
    Failed { consecutive: u32 },
}

impl SourceState {
    pub fn is_loading(&self) -> bool {
        matches!(self, SourceState::Loading { .. })
    }

    pub fn is_zoom_too_low(&self) -> bool {
        matches!(self, SourceState::ZoomTooLow { .. })
    }
}

impl Default for SourceState {
    fn default() -> Self {
        SourceState::Idle
    }
}
