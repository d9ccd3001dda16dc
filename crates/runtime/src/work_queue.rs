use std::collections::{BTreeMap, HashMap};

/// Deterministic work queue for sliced, cancellable work.
///
/// Key properties:
/// - Total ordering on `(priority, id)`; equal priorities run in insertion order.
/// - Cancellation removes the item immediately and never perturbs the order of
///   the remaining items.
/// - Queued payloads can be replaced in place without losing their position.
/// - Optional backpressure via a maximum pending length.
/// - Optional frame budgeting via abstract work units.
///
/// Backed by a `BTreeMap` so popping stays logarithmic for the tens of
/// thousands of queued marker attachments a single viewport can produce.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("work queue full (max_len={max_len})")]
pub struct WorkQueueFull {
    pub max_len: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    // Smaller values run earlier.
    priority: i32,
    id: WorkId,
}

#[derive(Debug)]
struct Item<T> {
    payload: T,
    cost_units: u32,
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    next_id: u64,
    items: BTreeMap<Key, Item<T>>,
    priorities: HashMap<WorkId, i32>,
    max_len: Option<usize>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            items: BTreeMap::new(),
            priorities: HashMap::new(),
            max_len: None,
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, priority: i32, payload: T) -> WorkId {
        self.push_with_cost(priority, 1, payload)
    }

    pub fn push_with_cost(&mut self, priority: i32, cost_units: u32, payload: T) -> WorkId {
        let id = WorkId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.items.insert(
            Key { priority, id },
            Item {
                payload,
                cost_units,
            },
        );
        self.priorities.insert(id, priority);
        id
    }

    pub fn try_push(&mut self, priority: i32, payload: T) -> Result<WorkId, WorkQueueFull> {
        self.try_push_with_cost(priority, 1, payload)
    }

    pub fn try_push_with_cost(
        &mut self,
        priority: i32,
        cost_units: u32,
        payload: T,
    ) -> Result<WorkId, WorkQueueFull> {
        if let Some(max_len) = self.max_len
            && self.len() >= max_len
        {
            return Err(WorkQueueFull { max_len });
        }
        Ok(self.push_with_cost(priority, cost_units, payload))
    }

    /// Removes a queued item, returning its payload if it was still queued.
    pub fn cancel(&mut self, id: WorkId) -> Option<T> {
        let priority = self.priorities.remove(&id)?;
        self.items
            .remove(&Key { priority, id })
            .map(|item| item.payload)
    }

    pub fn get(&self, id: WorkId) -> Option<&T> {
        let priority = *self.priorities.get(&id)?;
        self.items.get(&Key { priority, id }).map(|i| &i.payload)
    }

    /// Mutable access to a queued payload; the item keeps its queue position.
    pub fn get_mut(&mut self, id: WorkId) -> Option<&mut T> {
        let priority = *self.priorities.get(&id)?;
        self.items
            .get_mut(&Key { priority, id })
            .map(|i| &mut i.payload)
    }

    /// Pops the next (highest priority, then oldest) item.
    pub fn pop_next(&mut self) -> Option<(WorkId, i32, T)> {
        let (key, item) = self.items.pop_first()?;
        self.priorities.remove(&key.id);
        Some((key.id, key.priority, item.payload))
    }

    /// Pops the next item, but only if the budget can cover its cost.
    ///
    /// If the next item is too expensive this returns `None` without searching
    /// for cheaper items, so budgeting never reorders work.
    pub fn pop_next_with_budget(
        &mut self,
        budget: &mut crate::budget::FrameBudget,
    ) -> Option<(WorkId, i32, T)> {
        let (_, item) = self.items.first_key_value()?;
        if !budget.try_consume(item.cost_units) {
            return None;
        }
        self.pop_next()
    }

    /// Queued payloads in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (WorkId, &T)> {
        self.items.iter().map(|(k, i)| (k.id, &i.payload))
    }

    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        self.priorities.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::{WorkQueue, WorkQueueFull};
    use crate::budget::FrameBudget;

    #[test]
    fn same_priority_is_insertion_order() {
        let mut q = WorkQueue::new();
        q.push(0, "a");
        q.push(0, "b");
        q.push(0, "c");

        let (_, _, a) = q.pop_next().unwrap();
        let (_, _, b) = q.pop_next().unwrap();
        let (_, _, c) = q.pop_next().unwrap();
        assert_eq!((a, b, c), ("a", "b", "c"));
    }

    #[test]
    fn lower_priority_value_runs_first() {
        let mut q = WorkQueue::new();
        q.push(10, "late");
        q.push(-1, "early");
        let (_, _, v) = q.pop_next().unwrap();
        assert_eq!(v, "early");
    }

    #[test]
    fn cancel_removes_item_and_returns_payload() {
        let mut q = WorkQueue::new();
        let a = q.push(0, "a");
        q.push(0, "b");
        assert_eq!(q.cancel(a), Some("a"));
        assert_eq!(q.cancel(a), None);
        assert_eq!(q.len(), 1);

        let (_, _, v) = q.pop_next().unwrap();
        assert_eq!(v, "b");
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn replacing_payload_keeps_position() {
        let mut q = WorkQueue::new();
        let a = q.push(0, "a");
        q.push(0, "b");
        *q.get_mut(a).unwrap() = "a2";
        let order: Vec<_> = q.iter().map(|(_, v)| *v).collect();
        assert_eq!(order, vec!["a2", "b"]);
    }

    #[test]
    fn backpressure_rejects_when_full() {
        let mut q = WorkQueue::with_max_len(2);
        assert!(q.try_push(0, "a").is_ok());
        assert!(q.try_push(0, "b").is_ok());

        let err = q.try_push(0, "c").unwrap_err();
        assert_eq!(err, WorkQueueFull { max_len: 2 });
    }

    #[test]
    fn pop_respects_budget_units() {
        let mut q = WorkQueue::new();
        q.push_with_cost(0, 2, "expensive");

        let mut budget = FrameBudget::new(1);
        assert!(q.pop_next_with_budget(&mut budget).is_none());
        assert_eq!(q.len(), 1);

        let mut budget = FrameBudget::new(2);
        let (_, _, v) = q.pop_next_with_budget(&mut budget).unwrap();
        assert_eq!(v, "expensive");
        assert!(q.is_empty());
    }
}
