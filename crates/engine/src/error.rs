use foundation::viewport::ViewportError;
use render::surface::SurfaceError;
use streaming::fetcher::FetchError;

/// Errors surfaced to the host through `onLoadError`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The rendering surface could not initialize; terminal until `retry_mount`.
    #[error("map unavailable: {cause}")]
    Environment { cause: String },
    /// A tile request failed; the previous markers are still shown.
    #[error("could not refresh results ({consecutive} in a row): {error}")]
    Fetch { error: FetchError, consecutive: u32 },
}

impl LoadError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadError::Environment { .. })
    }
}

impl From<SurfaceError> for LoadError {
    fn from(err: SurfaceError) -> Self {
        LoadError::Environment {
            cause: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("engine has been torn down")]
    TornDown,
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("camera event rejected: {0}")]
    Viewport(#[from] ViewportError),
}
