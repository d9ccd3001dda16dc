use foundation::ids::MarkerId;

use crate::item::MapItem;

/// Hover and selection state owned by one map instance.
///
/// Interaction is folded into the items before reconciliation so that
/// hovering is just another field change: only the markers whose state flips
/// produce update work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interaction {
    pub hovered: Option<MarkerId>,
    pub selected: Option<MarkerId>,
}

impl Interaction {
    pub fn is_hovered(&self, id: &MarkerId) -> bool {
        self.hovered.as_ref() == Some(id)
    }

    pub fn is_selected(&self, id: &MarkerId) -> bool {
        self.selected.as_ref() == Some(id)
    }

    /// Sets the hovered id; returns whether it changed.
    pub fn hover(&mut self, id: Option<MarkerId>) -> bool {
        if self.hovered == id {
            return false;
        }
        self.hovered = id;
        true
    }

    /// Sets the selected id; returns whether it changed.
    pub fn select(&mut self, id: Option<MarkerId>) -> bool {
        if self.selected == id {
            return false;
        }
        self.selected = id;
        true
    }

    /// Forgets ids that no longer exist in `items`.
    pub fn retain_existing(&mut self, items: &[MapItem]) {
        let exists = |id: &MarkerId| items.iter().any(|i| i.id() == id);
        if self.hovered.as_ref().is_some_and(|id| !exists(id)) {
            self.hovered = None;
        }
        if self.selected.as_ref().is_some_and(|id| !exists(id)) {
            self.selected = None;
        }
    }

    pub fn apply(&self, items: &mut [MapItem]) {
        for item in items {
            let hovered = self.is_hovered(item.id());
            let selected = self.is_selected(item.id());
            item.set_interaction(hovered, selected);
        }
    }
}
