//! Host callbacks.
//!
//! Handlers live in one shared cell that is read at dispatch time, so a
//! marker created long ago still reaches whatever handler is current when it
//! is clicked. Events are buffered while the engine mutates its state and
//! dispatched once the mutation has committed.

use std::cell::RefCell;
use std::rc::Rc;

use foundation::ids::MarkerId;
use foundation::viewport::Viewport;
use tracing::warn;

use crate::error::LoadError;

#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    MarkerClick(MarkerId),
    MarkerHover(Option<MarkerId>),
    ViewportChange(Viewport),
    LoadError(LoadError),
    ClusterExpand { id: MarkerId, zoom: u8 },
}

type Callback<T> = Option<Box<dyn FnMut(T)>>;

#[derive(Default)]
pub struct MapHandlers {
    pub on_marker_click: Callback<MarkerId>,
    pub on_marker_hover: Callback<Option<MarkerId>>,
    pub on_viewport_change: Callback<Viewport>,
    pub on_load_error: Callback<LoadError>,
    pub on_cluster_expand: Callback<(MarkerId, u8)>,
}

impl std::fmt::Debug for MapHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapHandlers")
            .field("on_marker_click", &self.on_marker_click.is_some())
            .field("on_marker_hover", &self.on_marker_hover.is_some())
            .field("on_viewport_change", &self.on_viewport_change.is_some())
            .field("on_load_error", &self.on_load_error.is_some())
            .field("on_cluster_expand", &self.on_cluster_expand.is_some())
            .finish()
    }
}

impl MapHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_marker_click(mut self, f: impl FnMut(MarkerId) + 'static) -> Self {
        self.on_marker_click = Some(Box::new(f));
        self
    }

    pub fn on_marker_hover(mut self, f: impl FnMut(Option<MarkerId>) + 'static) -> Self {
        self.on_marker_hover = Some(Box::new(f));
        self
    }

    pub fn on_viewport_change(mut self, f: impl FnMut(Viewport) + 'static) -> Self {
        self.on_viewport_change = Some(Box::new(f));
        self
    }

    pub fn on_load_error(mut self, f: impl FnMut(LoadError) + 'static) -> Self {
        self.on_load_error = Some(Box::new(f));
        self
    }

    pub fn on_cluster_expand(mut self, f: impl FnMut((MarkerId, u8)) + 'static) -> Self {
        self.on_cluster_expand = Some(Box::new(f));
        self
    }
}

/// The single mutable cell every dispatch reads through.
pub type HandlerCell = Rc<RefCell<MapHandlers>>;

// The handler is taken out of the cell for the duration of the call, so it
// may replace the handlers (or register new ones) without a borrow conflict.
macro_rules! call_handler {
    ($cell:expr, $field:ident, $arg:expr) => {{
        let taken = match $cell.try_borrow_mut() {
            Ok(mut handlers) => handlers.$field.take(),
            Err(_) => {
                warn!(handler = stringify!($field), "handler cell busy; event dropped");
                None
            }
        };
        if let Some(mut f) = taken {
            f($arg);
            if let Ok(mut handlers) = $cell.try_borrow_mut()
                && handlers.$field.is_none()
            {
                handlers.$field = Some(f);
            }
        }
    }};
}

pub(crate) fn dispatch(cell: &HandlerCell, event: MapEvent) {
    match event {
        MapEvent::MarkerClick(id) => call_handler!(cell, on_marker_click, id),
        MapEvent::MarkerHover(id) => call_handler!(cell, on_marker_hover, id),
        MapEvent::ViewportChange(v) => call_handler!(cell, on_viewport_change, v),
        MapEvent::LoadError(err) => call_handler!(cell, on_load_error, err),
        MapEvent::ClusterExpand { id, zoom } => call_handler!(cell, on_cluster_expand, (id, zoom)),
    }
}
