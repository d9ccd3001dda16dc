pub mod clustering;
pub mod glyph;
pub mod icon_cache;
pub mod symbology;

pub use clustering::*;
pub use glyph::*;
pub use icon_cache::*;
pub use symbology::*;
