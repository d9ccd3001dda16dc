pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod tracker;

pub use config::*;
pub use engine::*;
pub use error::*;
pub use events::*;
pub use tracker::*;
