/// Ordered outbox of events produced while the engine mutates its state.
///
/// Producers `emit` while holding mutable borrows of engine internals; the
/// owner `drain`s once the mutation has committed and only then hands events
/// to user callbacks. A callback can therefore never observe a half-applied
/// state.
#[derive(Debug)]
pub struct EventBus<E> {
    events: Vec<E>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: E) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[E] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::EventBus;

    #[test]
    fn drain_preserves_emit_order_and_clears() {
        let mut bus = EventBus::new();
        bus.emit("a");
        bus.emit("b");
        assert_eq!(bus.events(), &["a", "b"]);
        assert_eq!(bus.drain(), vec!["a", "b"]);
        assert!(bus.is_empty());
    }
}
