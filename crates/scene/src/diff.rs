//! Marker reconciliation: the pure diff between what is rendered and what
//! should be rendered next.
//!
//! Membership is by [`MarkerId`]. An id present on both sides is an update
//! only when its [`RenderFields`](crate::item::RenderFields) differ; identical
//! fields are a true no-op and produce no work at all.

use std::collections::HashSet;

use foundation::ids::MarkerId;
use tracing::debug;

use crate::item::{FieldChanges, MapItem};
use crate::rendered::RenderedMarkerSet;

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerUpdate {
    pub item: MapItem,
    pub changes: FieldChanges,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerDiff {
    /// New items, in the order they appear in `next`.
    pub to_add: Vec<MapItem>,
    /// Items present on both sides with at least one changed field, in `next` order.
    pub to_update: Vec<MarkerUpdate>,
    /// Ids absent from `next`, ascending.
    pub to_remove: Vec<MarkerId>,
    /// Ids present on both sides with byte-identical fields, in `next` order.
    pub unchanged: Vec<MarkerId>,
    /// Repeated ids in `next` that were ignored (first occurrence wins).
    pub duplicates: usize,
}

impl MarkerDiff {
    /// No add, update or remove work.
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }

    pub fn work_len(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_remove.len()
    }
}

/// Computes the minimal add/update/remove set from `previous` to `next`.
///
/// Pure: neither input is mutated and no visual object is touched.
pub fn diff<H>(previous: &RenderedMarkerSet<H>, next: &[MapItem]) -> MarkerDiff {
    let mut out = MarkerDiff::default();
    let mut seen: HashSet<&MarkerId> = HashSet::with_capacity(next.len());

    for item in next {
        let id = item.id();
        if !seen.insert(id) {
            out.duplicates += 1;
            continue;
        }

        match previous.fields(id) {
            None => out.to_add.push(item.clone()),
            Some(old) => {
                let changes = FieldChanges::between(old, &item.fields());
                if changes.any() {
                    out.to_update.push(MarkerUpdate {
                        item: item.clone(),
                        changes,
                    });
                } else {
                    out.unchanged.push(id.clone());
                }
            }
        }
    }

    out.to_remove = previous
        .iter()
        .filter(|(id, _)| !seen.contains(id))
        .map(|(id, _)| id.clone())
        .collect();
    out.to_remove.sort();

    if out.duplicates > 0 {
        debug!(duplicates = out.duplicates, "ignored repeated marker ids");
    }

    out
}
