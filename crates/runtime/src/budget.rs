/// Per-frame work budget for time-slicing.
///
/// Budgets are expressed in abstract work units (one unit per marker
/// attachment for the render scheduler) rather than wall-clock time, so a
/// slice boundary falls at the same place on every run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameBudget {
    remaining_units: u32,
}

impl FrameBudget {
    pub fn new(units: u32) -> Self {
        Self {
            remaining_units: units,
        }
    }

    /// Budget for one slice of `batch_size` items.
    pub fn per_slice(batch_size: usize) -> Self {
        Self::new(u32::try_from(batch_size).unwrap_or(u32::MAX))
    }

    pub fn unlimited() -> Self {
        Self {
            remaining_units: u32::MAX,
        }
    }

    pub fn remaining_units(&self) -> u32 {
        self.remaining_units
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_units == 0
    }

    /// Consumes `units` if the budget covers them; returns whether it did.
    pub fn try_consume(&mut self, units: u32) -> bool {
        if self.remaining_units < units {
            return false;
        }
        self.remaining_units -= units;
        true
    }
}
