//! Host render pane abstraction and an in-memory retained implementation.

use std::collections::HashSet;
use std::rc::Rc;

use foundation::arena::Arena;
use foundation::handles::Handle;
use foundation::math::Vec2;
use layers::glyph::Glyph;
use smol_str::SmolStr;

/// Identifies one node attached to a pane.
pub type NodeId = Handle;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaneError {
    #[error("render pane unavailable: {0}")]
    Unavailable(String),
    #[error("node {0} no longer exists")]
    NodeGone(NodeId),
    #[error("pane rejected glyph {0}")]
    Rejected(SmolStr),
}

/// The overlay layer of a host map: a container of absolutely positioned nodes.
///
/// `detach` is the only call that removes a node; every other call mutates
/// an existing node in place.
pub trait RenderPane {
    fn attach(&mut self) -> Result<(), PaneError>;
    fn append(&mut self, glyph: Rc<Glyph>) -> Result<NodeId, PaneError>;
    fn set_glyph(&mut self, node: NodeId, glyph: Rc<Glyph>) -> Result<(), PaneError>;
    fn set_translate(&mut self, node: NodeId, px: Vec2) -> Result<(), PaneError>;
    fn set_opacity(&mut self, node: NodeId, opacity: f32) -> Result<(), PaneError>;
    fn set_z_index(&mut self, node: NodeId, z: i32) -> Result<(), PaneError>;
    fn detach(&mut self, node: NodeId) -> Result<(), PaneError>;
}

#[derive(Debug, Clone)]
pub struct PaneNode {
    pub glyph: Rc<Glyph>,
    pub translate_px: Vec2,
    pub opacity: f32,
    pub z_index: i32,
}

/// Operation counters, used to assert that redraws never churn nodes.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PaneStats {
    pub appended: u64,
    pub detached: u64,
    pub glyph_swaps: u64,
    pub translates: u64,
    pub opacity_changes: u64,
    pub z_changes: u64,
}

/// Retained in-memory pane.
///
/// Serves headless hosts (the replay tool) and tests. It can simulate an
/// unavailable environment, glyphs the host refuses, and nodes disposed
/// behind the engine's back.
#[derive(Debug, Default)]
pub struct RetainedPane {
    nodes: Arena<PaneNode>,
    attached: bool,
    unavailable: Option<String>,
    rejected: HashSet<SmolStr>,
    stats: PaneStats,
}

impl RetainedPane {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pane whose `attach` always fails with `cause`.
    pub fn unavailable(cause: impl Into<String>) -> Self {
        Self {
            unavailable: Some(cause.into()),
            ..Self::default()
        }
    }

    /// Makes the environment usable again; models the user fixing the cause.
    pub fn restore(&mut self) {
        self.unavailable = None;
    }

    /// Refuses any node showing the glyph with `key`.
    pub fn reject_glyph(&mut self, key: impl Into<SmolStr>) {
        self.rejected.insert(key.into());
    }

    /// Removes a node without going through `detach`.
    pub fn dispose_externally(&mut self, node: NodeId) -> bool {
        self.nodes.remove(node).is_some()
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn node(&self, node: NodeId) -> Option<&PaneNode> {
        self.nodes.get(node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &PaneNode)> {
        self.nodes.iter()
    }

    pub fn stats(&self) -> PaneStats {
        self.stats
    }

    fn check(&self, glyph: &Glyph) -> Result<(), PaneError> {
        if !self.attached {
            return Err(PaneError::Unavailable("pane is not attached".into()));
        }
        if self.rejected.contains(&glyph.key) {
            return Err(PaneError::Rejected(glyph.key.clone()));
        }
        Ok(())
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut PaneNode, PaneError> {
        self.nodes.get_mut(node).ok_or(PaneError::NodeGone(node))
    }
}

impl RenderPane for RetainedPane {
    fn attach(&mut self) -> Result<(), PaneError> {
        if let Some(cause) = &self.unavailable {
            return Err(PaneError::Unavailable(cause.clone()));
        }
        self.attached = true;
        Ok(())
    }

    fn append(&mut self, glyph: Rc<Glyph>) -> Result<NodeId, PaneError> {
        self.check(&glyph)?;
        self.stats.appended += 1;
        Ok(self.nodes.insert(PaneNode {
            glyph,
            translate_px: Vec2::ZERO,
            opacity: 0.0,
            z_index: 0,
        }))
    }

    fn set_glyph(&mut self, node: NodeId, glyph: Rc<Glyph>) -> Result<(), PaneError> {
        self.check(&glyph)?;
        self.node_mut(node)?.glyph = glyph;
        self.stats.glyph_swaps += 1;
        Ok(())
    }

    fn set_translate(&mut self, node: NodeId, px: Vec2) -> Result<(), PaneError> {
        self.node_mut(node)?.translate_px = px;
        self.stats.translates += 1;
        Ok(())
    }

    fn set_opacity(&mut self, node: NodeId, opacity: f32) -> Result<(), PaneError> {
        self.node_mut(node)?.opacity = opacity;
        self.stats.opacity_changes += 1;
        Ok(())
    }

    fn set_z_index(&mut self, node: NodeId, z: i32) -> Result<(), PaneError> {
        self.node_mut(node)?.z_index = z;
        self.stats.z_changes += 1;
        Ok(())
    }

    fn detach(&mut self, node: NodeId) -> Result<(), PaneError> {
        self.nodes.remove(node).ok_or(PaneError::NodeGone(node))?;
        self.stats.detached += 1;
        Ok(())
    }
}
