pub mod arena;
pub mod bounds;
pub mod handles;
pub mod ids;
pub mod math;
pub mod time;
pub mod viewport;

// Foundation crate: small, well-tested primitives only.
pub use arena::*;
pub use bounds::*;
pub use handles::*;
pub use ids::*;
pub use time::*;
pub use viewport::*;
