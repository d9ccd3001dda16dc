use std::time::Duration;

use foundation::time::Timestamp;

#[derive(Debug, Clone, PartialEq)]
struct Pending<T> {
    value: T,
    deadline: Timestamp,
}

/// Trailing-edge, most-recent-wins debouncer under host-supplied time.
///
/// Every `push` replaces the pending value and restarts the quiet window, so a
/// burst collapses to exactly one emission carrying the latest value, due
/// `window` after the last push.
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    window: Duration,
    pending: Option<Pending<T>>,
}

impl<T> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn push(&mut self, now: Timestamp, value: T) {
        self.pending = Some(Pending {
            value,
            deadline: now.saturating_add(self.window),
        });
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending value becomes due.
    pub fn deadline(&self) -> Option<Timestamp> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Takes the pending value if its quiet window has elapsed at `now`.
    pub fn poll(&mut self, now: Timestamp) -> Option<T> {
        match &self.pending {
            Some(p) if p.deadline <= now => self.pending.take().map(|p| p.value),
            _ => None,
        }
    }

    /// Drops the pending value; returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }
}
