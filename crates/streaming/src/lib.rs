pub mod fetcher;
pub mod protocol;
pub mod request;
pub mod sanitize;
pub mod source;
pub mod state;

pub use fetcher::*;
pub use protocol::*;
pub use request::*;
pub use sanitize::*;
pub use source::*;
pub use state::*;
