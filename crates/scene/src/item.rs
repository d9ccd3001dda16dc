use foundation::bounds::LatLng;
use foundation::ids::{MarkerId, MarkerKind};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A single listing rendered as a price marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyItem {
    pub id: MarkerId,
    pub position: LatLng,
    pub price: f64,
    pub currency: SmolStr,
    pub title: String,
    #[serde(default)]
    pub is_hovered: bool,
    #[serde(default)]
    pub is_selected: bool,
}

/// An aggregate of nearby listings rendered as one count glyph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterItem {
    pub id: MarkerId,
    pub position: LatLng,
    pub count: u32,
    #[serde(default)]
    pub avg_price: Option<f64>,
    #[serde(default)]
    pub expansion_zoom: Option<u8>,
    #[serde(default)]
    pub is_hovered: bool,
    #[serde(default)]
    pub is_selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapItem {
    Property(PropertyItem),
    Cluster(ClusterItem),
}

impl MapItem {
    pub fn id(&self) -> &MarkerId {
        match self {
            MapItem::Property(p) => &p.id,
            MapItem::Cluster(c) => &c.id,
        }
    }

    pub fn kind(&self) -> MarkerKind {
        match self {
            MapItem::Property(_) => MarkerKind::Property,
            MapItem::Cluster(_) => MarkerKind::Cluster,
        }
    }

    pub fn position(&self) -> LatLng {
        match self {
            MapItem::Property(p) => p.position,
            MapItem::Cluster(c) => c.position,
        }
    }

    pub fn is_hovered(&self) -> bool {
        match self {
            MapItem::Property(p) => p.is_hovered,
            MapItem::Cluster(c) => c.is_hovered,
        }
    }

    pub fn is_selected(&self) -> bool {
        match self {
            MapItem::Property(p) => p.is_selected,
            MapItem::Cluster(c) => c.is_selected,
        }
    }

    pub fn set_interaction(&mut self, hovered: bool, selected: bool) {
        match self {
            MapItem::Property(p) => {
                p.is_hovered = hovered;
                p.is_selected = selected;
            }
            MapItem::Cluster(c) => {
                c.is_hovered = hovered;
                c.is_selected = selected;
            }
        }
    }

    /// Snapshot of everything that influences how this item is drawn.
    pub fn fields(&self) -> RenderFields {
        let position = PositionBits::of(self.position());
        let emphasis = Emphasis {
            hovered: self.is_hovered(),
            selected: self.is_selected(),
        };
        let content = match self {
            MapItem::Property(p) => ContentBits::Price {
                price: p.price.to_bits(),
                currency: p.currency.clone(),
            },
            MapItem::Cluster(c) => ContentBits::Count {
                count: c.count,
                avg_price: c.avg_price.map(f64::to_bits),
            },
        };
        RenderFields {
            position,
            content,
            emphasis,
        }
    }
}

impl From<PropertyItem> for MapItem {
    fn from(p: PropertyItem) -> Self {
        MapItem::Property(p)
    }
}

impl From<ClusterItem> for MapItem {
    fn from(c: ClusterItem) -> Self {
        MapItem::Cluster(c)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PositionBits {
    lat: u64,
    lng: u64,
}

impl PositionBits {
    pub fn of(p: LatLng) -> Self {
        Self {
            lat: p.lat.to_bits(),
            lng: p.lng.to_bits(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentBits {
    Price { price: u64, currency: SmolStr },
    Count { count: u32, avg_price: Option<u64> },
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Emphasis {
    pub hovered: bool,
    pub selected: bool,
}

/// Rendering-relevant fields compared bit-for-bit.
///
/// Floats are stored as raw bits so "unchanged" means byte-identical,
/// including `-0.0` vs `0.0`. Titles are deliberately absent: they are read
/// lazily by tooltips and never require touching the marker node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderFields {
    pub position: PositionBits,
    pub content: ContentBits,
    pub emphasis: Emphasis,
}

/// Which aspects of a rendered marker differ between two field snapshots.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FieldChanges {
    pub position: bool,
    pub content: bool,
    pub emphasis: bool,
}

impl FieldChanges {
    pub fn between(old: &RenderFields, new: &RenderFields) -> Self {
        Self {
            position: old.position != new.position,
            content: old.content != new.content,
            emphasis: old.emphasis != new.emphasis,
        }
    }

    pub fn any(&self) -> bool {
        self.position || self.content || self.emphasis
    }

    /// Whether the glyph itself must be swapped (content or emphasis style).
    pub fn needs_glyph(&self) -> bool {
        self.content || self.emphasis
    }
}
