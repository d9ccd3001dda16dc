//! Tile/WebGL-style backend: markers are instances in one GPU symbol buffer.

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use std::rc::Rc;

use bytemuck::Zeroable;
use foundation::arena::Arena;
use foundation::handles::Handle;
use foundation::math::mercator::{Projection, project_world_px};
use layers::glyph::Glyph;
use scene::item::{FieldChanges, MapItem};
use smol_str::SmolStr;
use tracing::debug;

use crate::surface::{MarkerSurface, SurfaceError, z_index_for};

/// One symbol instance as uploaded to the GPU.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SymbolInstance {
    /// Web Mercator position normalised to `[0, 1]`.
    pub world: [f32; 2],
    pub size_px: [f32; 2],
    pub anchor_px: [f32; 2],
    pub opacity: f32,
    pub z: f32,
    pub atlas_slot: u32,
    pub flags: u32,
}

impl SymbolInstance {
    pub const VISIBLE: u32 = 1;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GpuCapabilities {
    pub webgl2: bool,
    pub max_instances: usize,
}

impl Default for GpuCapabilities {
    fn default() -> Self {
        Self {
            webgl2: true,
            max_instances: 65_536,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SymbolHandle(pub Handle);

#[derive(Debug)]
struct AtlasEntry {
    glyph: Rc<Glyph>,
    /// Live instances sampling this slot.
    refs: u32,
}

/// Symbol-layer backend with stable instance slots.
///
/// A handle's arena index is its slot in the instance buffer, so updates
/// touch exactly one instance and the host can upload only dirty ranges.
///
/// Atlas slots are reference counted by live instances. A slot whose last
/// instance is destroyed or re-glyphed is freed and reused, so the atlas
/// never holds more glyphs than there are live instances.
#[derive(Debug)]
pub struct SymbolLayerBackend {
    caps: GpuCapabilities,
    initialized: bool,
    slots: Arena<()>,
    instances: Vec<SymbolInstance>,
    dirty: BTreeSet<u32>,
    atlas: HashMap<SmolStr, u32>,
    atlas_slots: Vec<Option<AtlasEntry>>,
    atlas_free: Vec<u32>,
    pending_glyphs: BTreeSet<u32>,
}

impl SymbolLayerBackend {
    pub fn new(caps: GpuCapabilities) -> Self {
        Self {
            caps,
            initialized: false,
            slots: Arena::new(),
            instances: Vec::new(),
            dirty: BTreeSet::new(),
            atlas: HashMap::new(),
            atlas_slots: Vec::new(),
            atlas_free: Vec::new(),
            pending_glyphs: BTreeSet::new(),
        }
    }

    pub fn instances(&self) -> &[SymbolInstance] {
        &self.instances
    }

    pub fn instance(&self, handle: SymbolHandle) -> Option<&SymbolInstance> {
        self.slots
            .contains(handle.0)
            .then(|| &self.instances[handle.0.index() as usize])
    }

    /// Raw instance bytes, ready for a buffer upload.
    pub fn instance_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.instances)
    }

    /// Contiguous slot ranges modified since the last call.
    pub fn take_dirty_ranges(&mut self) -> Vec<Range<u32>> {
        let mut out: Vec<Range<u32>> = Vec::new();
        for slot in std::mem::take(&mut self.dirty) {
            match out.last_mut() {
                Some(last) if last.end == slot => last.end = slot + 1,
                _ => out.push(slot..slot + 1),
            }
        }
        out
    }

    /// Glyphs written to atlas slots since the last call and still in use.
    pub fn take_new_glyphs(&mut self) -> Vec<(u32, Rc<Glyph>)> {
        std::mem::take(&mut self.pending_glyphs)
            .into_iter()
            .filter_map(|slot| {
                let entry = self.atlas_slots.get(slot as usize)?.as_ref()?;
                Some((slot, Rc::clone(&entry.glyph)))
            })
            .collect()
    }

    /// Glyphs currently held by the atlas.
    pub fn atlas_len(&self) -> usize {
        self.atlas.len()
    }

    /// Atlas slots allocated so far, free or not.
    pub fn atlas_capacity(&self) -> usize {
        self.atlas_slots.len()
    }

    fn acquire_atlas_slot(&mut self, glyph: Rc<Glyph>) -> u32 {
        if let Some(&slot) = self.atlas.get(&glyph.key)
            && let Some(Some(entry)) = self.atlas_slots.get_mut(slot as usize)
        {
            entry.refs += 1;
            return slot;
        }
        let slot = match self.atlas_free.pop() {
            Some(slot) => slot,
            None => {
                self.atlas_slots.push(None);
                (self.atlas_slots.len() - 1) as u32
            }
        };
        self.atlas.insert(glyph.key.clone(), slot);
        self.atlas_slots[slot as usize] = Some(AtlasEntry { glyph, refs: 1 });
        self.pending_glyphs.insert(slot);
        slot
    }

    fn release_atlas_slot(&mut self, slot: u32) {
        let Some(cell) = self.atlas_slots.get_mut(slot as usize) else {
            return;
        };
        let Some(entry) = cell.as_mut() else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            if let Some(entry) = cell.take() {
                self.atlas.remove(&entry.glyph.key);
            }
            self.pending_glyphs.remove(&slot);
            self.atlas_free.push(slot);
        }
    }

    fn slot_mut(&mut self, handle: SymbolHandle) -> Result<&mut SymbolInstance, SurfaceError> {
        if !self.slots.contains(handle.0) {
            return Err(SurfaceError::StaleHandle(handle.0));
        }
        let index = handle.0.index();
        self.dirty.insert(index);
        Ok(&mut self.instances[index as usize])
    }
}

fn world_of(item: &MapItem) -> [f32; 2] {
    let px = project_world_px(item.position(), 0.0);
    let size = foundation::math::mercator::TILE_SIZE_PX;
    [(px.x / size) as f32, (px.y / size) as f32]
}

impl MarkerSurface for SymbolLayerBackend {
    type Handle = SymbolHandle;

    fn name(&self) -> &'static str {
        "symbol"
    }

    fn initialize(&mut self) -> Result<(), SurfaceError> {
        if !self.caps.webgl2 {
            return Err(SurfaceError::Unavailable(
                "WebGL2 is not available on this device".into(),
            ));
        }
        self.initialized = true;
        Ok(())
    }

    fn create(
        &mut self,
        item: &MapItem,
        glyph: Rc<Glyph>,
        opacity: f32,
    ) -> Result<SymbolHandle, SurfaceError> {
        if !self.initialized {
            return Err(SurfaceError::NotInitialized);
        }
        if self.slots.len() >= self.caps.max_instances {
            return Err(SurfaceError::CapacityExhausted {
                capacity: self.caps.max_instances,
            });
        }

        let size_px = [glyph.size_px.x as f32, glyph.size_px.y as f32];
        let anchor_px = [glyph.anchor_px.x as f32, glyph.anchor_px.y as f32];
        let atlas_slot = self.acquire_atlas_slot(glyph);
        let handle = SymbolHandle(self.slots.insert(()));
        let index = handle.0.index() as usize;
        if index >= self.instances.len() {
            self.instances.resize(index + 1, SymbolInstance::zeroed());
        }
        self.instances[index] = SymbolInstance {
            world: world_of(item),
            size_px,
            anchor_px,
            opacity: opacity.clamp(0.0, 1.0),
            z: z_index_for(item) as f32,
            atlas_slot,
            flags: SymbolInstance::VISIBLE,
        };
        self.dirty.insert(index as u32);
        Ok(handle)
    }

    fn update(
        &mut self,
        handle: SymbolHandle,
        item: &MapItem,
        changes: FieldChanges,
        glyph: Option<Rc<Glyph>>,
    ) -> Result<(), SurfaceError> {
        let previous_slot = self.slot_mut(handle)?.atlas_slot;
        let atlas = glyph.map(|g| {
            let meta = (
                [g.size_px.x as f32, g.size_px.y as f32],
                [g.anchor_px.x as f32, g.anchor_px.y as f32],
            );
            (self.acquire_atlas_slot(g), meta)
        });
        if atlas.is_some() {
            self.release_atlas_slot(previous_slot);
        }

        let instance = self.slot_mut(handle)?;
        if changes.position {
            instance.world = world_of(item);
        }
        if let Some((slot, (size_px, anchor_px))) = atlas {
            instance.atlas_slot = slot;
            instance.size_px = size_px;
            instance.anchor_px = anchor_px;
        }
        if changes.emphasis {
            instance.z = z_index_for(item) as f32;
        }
        Ok(())
    }

    fn set_opacity(&mut self, handle: SymbolHandle, opacity: f32) -> Result<(), SurfaceError> {
        self.slot_mut(handle)?.opacity = opacity.clamp(0.0, 1.0);
        Ok(())
    }

    fn destroy(&mut self, handle: SymbolHandle) -> Result<(), SurfaceError> {
        self.slots
            .remove(handle.0)
            .ok_or(SurfaceError::StaleHandle(handle.0))?;
        let index = handle.0.index();
        let atlas_slot = self.instances[index as usize].atlas_slot;
        self.release_atlas_slot(atlas_slot);
        self.instances[index as usize] = SymbolInstance::zeroed();
        self.dirty.insert(index);
        Ok(())
    }

    fn on_camera_change(&mut self, _projection: Box<dyn Projection>) {
        // Instances are positioned in the vertex shader; nothing to rewrite.
        debug!(live = self.slots.len(), "symbol layer camera change");
    }

    fn live_count(&self) -> usize {
        self.slots.len()
    }
}
