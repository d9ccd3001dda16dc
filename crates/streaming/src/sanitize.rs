use foundation::bounds::LatLng;
use foundation::ids::MarkerId;
use scene::item::{ClusterItem, MapItem, PropertyItem};
use smol_str::SmolStr;
use tracing::debug;

use crate::protocol::{TilePayload, WireCluster, WirePoint};

/// Currency assumed when the upstream omits one.
pub const DEFAULT_CURRENCY: &str = "EUR";

/// Why an upstream row was dropped before reconciliation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DropReason {
    MissingId,
    BadCoordinates,
    BadPrice,
    /// Clusters must aggregate at least two items.
    TrivialCluster,
}

/// Validated payload, ready for clustering and reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileData {
    pub properties: Vec<PropertyItem>,
    pub clusters: Vec<ClusterItem>,
    pub truncated: bool,
    pub dropped: usize,
}

impl TileData {
    pub fn item_count(&self) -> usize {
        self.properties.len() + self.clusters.len()
    }

    /// Items that may be drawn as-is.
    ///
    /// A truncated payload contributes only its clusters: individual
    /// properties at that density are neither readable nor cheap to draw.
    pub fn renderable(&self) -> Vec<MapItem> {
        let mut out = Vec::with_capacity(self.item_count());
        if !self.truncated {
            out.extend(self.properties.iter().cloned().map(MapItem::Property));
        }
        out.extend(self.clusters.iter().cloned().map(MapItem::Cluster));
        out
    }
}

fn position(lat: Option<f64>, lng: Option<f64>) -> Option<LatLng> {
    let p = LatLng::new(lat?, lng?);
    p.is_valid().then_some(p)
}

pub fn sanitize_point(point: WirePoint) -> Result<PropertyItem, DropReason> {
    let key = point.id.to_key().ok_or(DropReason::MissingId)?;
    let position = position(point.lat.as_finite(), point.lng.as_finite())
        .ok_or(DropReason::BadCoordinates)?;
    let price = point
        .price
        .as_ref()
        .and_then(|p| p.as_finite())
        .filter(|p| *p >= 0.0)
        .ok_or(DropReason::BadPrice)?;
    let currency = point
        .currency
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CURRENCY);

    Ok(PropertyItem {
        id: MarkerId::property(key),
        position,
        price,
        currency: SmolStr::new(currency.to_ascii_uppercase()),
        title: point.title.unwrap_or_default(),
        is_hovered: false,
        is_selected: false,
    })
}

pub fn sanitize_cluster(cluster: WireCluster) -> Result<ClusterItem, DropReason> {
    let key = cluster.id.to_key().ok_or(DropReason::MissingId)?;
    let position = position(cluster.lat.as_finite(), cluster.lng.as_finite())
        .ok_or(DropReason::BadCoordinates)?;
    if cluster.count < 2 {
        return Err(DropReason::TrivialCluster);
    }

    Ok(ClusterItem {
        id: MarkerId::cluster(key),
        position,
        count: cluster.count,
        avg_price: cluster.avg_price.filter(|p| p.is_finite()),
        expansion_zoom: cluster.expansion_zoom,
        is_hovered: false,
        is_selected: false,
    })
}

/// Filters malformed rows out of an upstream payload.
pub fn sanitize(payload: TilePayload) -> TileData {
    let mut data = TileData {
        truncated: payload.truncated,
        ..TileData::default()
    };

    for point in payload.points {
        match sanitize_point(point) {
            Ok(p) => data.properties.push(p),
            Err(reason) => {
                debug!(?reason, "dropped upstream point");
                data.dropped += 1;
            }
        }
    }
    for cluster in payload.clusters {
        match sanitize_cluster(cluster) {
            Ok(c) => data.clusters.push(c),
            Err(reason) => {
                debug!(?reason, "dropped upstream cluster");
                data.dropped += 1;
            }
        }
    }

    data
}
