use foundation::time::Timestamp;

/// One animation-frame callback as delivered by the host.
///
/// `index` counts frames delivered to one engine instance; `timestamp` is the
/// host's frame time. Both are plain data so frame sequences can be recorded
/// and replayed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 0-based frame index.
    pub index: u64,
    pub timestamp: Timestamp,
}

impl Frame {
    pub fn new(index: u64, timestamp: Timestamp) -> Self {
        Self { index, timestamp }
    }

    /// The following frame, `interval_ms` later.
    pub fn next(self, interval_ms: u64) -> Self {
        Self::new(
            self.index + 1,
            Timestamp(self.timestamp.0.saturating_add(interval_ms)),
        )
    }
}
