pub mod diff;
pub mod interaction;
pub mod item;
pub mod rendered;

#[cfg(test)]
mod fixtures;

pub use diff::*;
pub use interaction::*;
pub use item::*;
pub use rendered::*;
