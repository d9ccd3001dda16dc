use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use smol_str::SmolStr;
use tracing::debug;

use crate::glyph::{Glyph, GlyphSpec};

pub const DEFAULT_ICON_CACHE_CEILING: usize = 500;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct IconCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Number of wholesale clears.
    pub resets: u64,
}

/// Bounded glyph cache with a wholesale-clear policy.
///
/// Inserting a new key while the cache already holds `ceiling` entries drops
/// every entry first. Glyphs are handed out as `Rc`, so a clear never
/// invalidates a glyph an in-progress render already holds.
#[derive(Debug)]
pub struct IconCache {
    entries: HashMap<SmolStr, Rc<Glyph>>,
    ceiling: usize,
    stats: IconCacheStats,
}

/// One cache shared by every map instance on the thread.
pub type SharedIconCache = Rc<RefCell<IconCache>>;

impl IconCache {
    pub fn new(ceiling: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ceiling: ceiling.max(1),
            stats: IconCacheStats::default(),
        }
    }

    pub fn shared(ceiling: usize) -> SharedIconCache {
        Rc::new(RefCell::new(Self::new(ceiling)))
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> IconCacheStats {
        self.stats
    }

    pub fn get(&self, key: &str) -> Option<Rc<Glyph>> {
        self.entries.get(key).cloned()
    }

    pub fn put(&mut self, key: SmolStr, glyph: Rc<Glyph>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.ceiling {
            debug!(entries = self.entries.len(), ceiling = self.ceiling, "icon cache reset");
            self.entries.clear();
            self.stats.resets += 1;
        }
        self.entries.insert(key, glyph);
    }

    /// Returns the cached glyph for `spec`, rendering it on a miss.
    pub fn get_or_render(&mut self, spec: &GlyphSpec) -> Rc<Glyph> {
        let key = spec.key();
        if let Some(glyph) = self.entries.get(&key) {
            self.stats.hits += 1;
            return Rc::clone(glyph);
        }
        self.stats.misses += 1;
        let glyph = Rc::new(spec.render());
        self.put(key, Rc::clone(&glyph));
        glyph
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for IconCache {
    fn default() -> Self {
        Self::new(DEFAULT_ICON_CACHE_CEILING)
    }
}
