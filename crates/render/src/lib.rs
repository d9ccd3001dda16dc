pub mod animation;
pub mod overlay;
pub mod pane;
pub mod scheduler;
pub mod surface;
pub mod symbol_layer;

pub use animation::*;
pub use overlay::*;
pub use pane::*;
pub use scheduler::*;
pub use surface::*;
pub use symbol_layer::*;
