//! Upstream abstraction for tile payload providers.
//!
//! The engine never calls a fetcher itself: it hands [`TileRequest`]s to the
//! host, and the host runs them through a `TileFetcher` with whatever latency
//! and ordering the network produces.

use std::future::Future;
use std::pin::Pin;

use crate::protocol::{TilePayload, TileRequest};

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("upstream answered with status {status}")]
    Status { status: u16 },
    #[error("could not decode tile payload: {0}")]
    Decode(String),
    #[error("request was cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

/// Provider of point/cluster payloads for a viewport.
///
/// Implementations must be `Send + Sync`; the returned future is boxed for
/// dyn-compatibility.
pub trait TileFetcher: Send + Sync {
    fn fetch_tile<'a>(&'a self, request: &'a TileRequest)
    -> BoxFuture<'a, Result<TilePayload, FetchError>>;
}
