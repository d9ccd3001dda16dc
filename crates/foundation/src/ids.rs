use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Property,
    Cluster,
}

/// Stable identity of a rendered marker.
///
/// The upstream id alone is not enough: a property and a cluster bucket may
/// share the same raw id, so the kind is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarkerId {
    pub kind: MarkerKind,
    pub raw: SmolStr,
}

impl MarkerId {
    pub fn property(raw: impl AsRef<str>) -> Self {
        Self {
            kind: MarkerKind::Property,
            raw: SmolStr::new(raw),
        }
    }

    pub fn cluster(raw: impl AsRef<str>) -> Self {
        Self {
            kind: MarkerKind::Cluster,
            raw: SmolStr::new(raw),
        }
    }

    pub fn is_cluster(&self) -> bool {
        self.kind == MarkerKind::Cluster
    }
}

impl std::fmt::Display for MarkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            MarkerKind::Property => write!(f, "property/{}", self.raw),
            MarkerKind::Cluster => write!(f, "cluster/{}", self.raw),
        }
    }
}
