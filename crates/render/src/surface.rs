use std::fmt;
use std::rc::Rc;

use foundation::handles::Handle;
use foundation::math::mercator::Projection;
use layers::glyph::Glyph;
use scene::item::{FieldChanges, MapItem};

use crate::pane::PaneError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    /// The rendering environment cannot be used at all; terminal for the map.
    #[error("rendering environment unavailable: {0}")]
    Unavailable(String),
    #[error("surface used before initialize")]
    NotInitialized,
    #[error("handle {0} is not live")]
    StaleHandle(Handle),
    #[error("instance capacity {capacity} exhausted")]
    CapacityExhausted { capacity: usize },
    #[error(transparent)]
    Pane(#[from] PaneError),
}

impl SurfaceError {
    /// Whether the error condemns the whole surface rather than one marker.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            SurfaceError::Unavailable(_) | SurfaceError::NotInitialized
        ) || matches!(self, SurfaceError::Pane(PaneError::Unavailable(_)))
    }
}

/// Rendering backend capability shared by the marker-overlay and the
/// symbol-layer integrations.
///
/// Both are driven by the same reconciliation core; a backend only knows how
/// to create, mutate and destroy one visual object per handle.
pub trait MarkerSurface {
    type Handle: Copy + Eq + fmt::Debug;

    fn name(&self) -> &'static str;

    /// Prepares the environment. Failure is an environment failure.
    fn initialize(&mut self) -> Result<(), SurfaceError>;

    fn create(
        &mut self,
        item: &MapItem,
        glyph: Rc<Glyph>,
        opacity: f32,
    ) -> Result<Self::Handle, SurfaceError>;

    /// Mutates the object behind `handle` in place. `glyph` is present when
    /// `changes.needs_glyph()`.
    fn update(
        &mut self,
        handle: Self::Handle,
        item: &MapItem,
        changes: FieldChanges,
        glyph: Option<Rc<Glyph>>,
    ) -> Result<(), SurfaceError>;

    fn set_opacity(&mut self, handle: Self::Handle, opacity: f32) -> Result<(), SurfaceError>;

    /// Detaches and releases the object. The handle is dead afterwards.
    fn destroy(&mut self, handle: Self::Handle) -> Result<(), SurfaceError>;

    fn on_camera_change(&mut self, projection: Box<dyn Projection>);

    fn live_count(&self) -> usize;
}

/// Stacking order: selection above hover above clusters above prices.
pub fn z_index_for(item: &MapItem) -> i32 {
    if item.is_selected() {
        1_000
    } else if item.is_hovered() {
        900
    } else if item.id().is_cluster() {
        10
    } else {
        0
    }
}
