use serde::{Deserialize, Serialize};

/// Opaque token tying one tile response to the request that produced it.
///
/// Tokens are issued in strictly increasing order per source; only the most
/// recently issued, not yet completed token may mutate shared state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FetchToken(pub u64);

impl std::fmt::Display for FetchToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fetch#{}", self.0)
    }
}

/// Issues tokens and remembers which one is current.
#[derive(Debug, Clone, Default)]
pub struct TokenIssuer {
    next: u64,
    current: Option<FetchToken>,
}

impl TokenIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a new token; every previously issued token becomes stale.
    pub fn issue(&mut self) -> FetchToken {
        self.next += 1;
        let token = FetchToken(self.next);
        self.current = Some(token);
        token
    }

    pub fn current(&self) -> Option<FetchToken> {
        self.current
    }

    pub fn is_current(&self, token: FetchToken) -> bool {
        self.current == Some(token)
    }

    /// Retires the current token, so no response can match it any more.
    pub fn invalidate(&mut self) -> Option<FetchToken> {
        self.current.take()
    }
}
