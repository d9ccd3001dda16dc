use std::collections::HashMap;

use foundation::ids::MarkerId;

use crate::item::{MapItem, RenderFields};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("marker {0} is already rendered")]
pub struct DuplicateMarker(pub MarkerId);

/// One rendered marker: its owning handle plus the item and field snapshot it
/// was last drawn from.
#[derive(Debug, Clone)]
pub struct RenderedMarker<H> {
    pub handle: H,
    pub item: MapItem,
    pub fields: RenderFields,
}

/// `id -> handle` mapping for everything currently on (or queued for) the map.
///
/// Invariant: at most one entry per id. `insert` refuses duplicates instead of
/// silently replacing, because a replaced handle would leak its visual object.
#[derive(Debug, Clone)]
pub struct RenderedMarkerSet<H> {
    entries: HashMap<MarkerId, RenderedMarker<H>>,
}

impl<H> Default for RenderedMarkerSet<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<H> RenderedMarkerSet<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &MarkerId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &MarkerId) -> Option<&RenderedMarker<H>> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &MarkerId) -> Option<&mut RenderedMarker<H>> {
        self.entries.get_mut(id)
    }

    pub fn fields(&self, id: &MarkerId) -> Option<&RenderFields> {
        self.entries.get(id).map(|e| &e.fields)
    }

    pub fn insert(&mut self, item: MapItem, handle: H) -> Result<(), DuplicateMarker> {
        let id = item.id().clone();
        if self.entries.contains_key(&id) {
            return Err(DuplicateMarker(id));
        }
        let fields = item.fields();
        self.entries.insert(
            id,
            RenderedMarker {
                handle,
                item,
                fields,
            },
        );
        Ok(())
    }

    /// Records that `item` is now what the entry's handle displays.
    pub fn refresh(&mut self, item: MapItem) -> bool {
        let Some(entry) = self.entries.get_mut(item.id()) else {
            return false;
        };
        entry.fields = item.fields();
        entry.item = item;
        true
    }

    pub fn remove(&mut self, id: &MarkerId) -> Option<RenderedMarker<H>> {
        self.entries.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MarkerId, &RenderedMarker<H>)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&MarkerId, &mut RenderedMarker<H>)> {
        self.entries.iter_mut()
    }

    /// Ids in ascending order.
    pub fn sorted_ids(&self) -> Vec<MarkerId> {
        let mut ids: Vec<MarkerId> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (MarkerId, RenderedMarker<H>)> + '_ {
        self.entries.drain()
    }
}
