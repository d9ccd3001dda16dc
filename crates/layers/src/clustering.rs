use std::collections::BTreeMap;

use foundation::bounds::LatLng;
use foundation::ids::MarkerId;
use foundation::math::mercator::project_world_px;
use scene::item::{ClusterItem, MapItem, PropertyItem};

/// Classifies a point set into individual properties and cluster glyphs.
///
/// `clusters` are aggregates already computed upstream; they are carried
/// through untouched by every policy.
pub trait ClusteringPolicy {
    fn name(&self) -> &'static str;

    fn apply(&self, properties: &[PropertyItem], clusters: &[ClusterItem], zoom: u8)
    -> Vec<MapItem>;
}

/// Clustering is computed upstream; points and clusters pass straight through.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ServerClustering;

impl ClusteringPolicy for ServerClustering {
    fn name(&self) -> &'static str {
        "server"
    }

    fn apply(
        &self,
        properties: &[PropertyItem],
        clusters: &[ClusterItem],
        _zoom: u8,
    ) -> Vec<MapItem> {
        let mut out = Vec::with_capacity(properties.len() + clusters.len());
        out.extend(properties.iter().cloned().map(MapItem::Property));
        out.extend(clusters.iter().cloned().map(MapItem::Cluster));
        out
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GridClusteringConfig {
    /// Cell edge in screen pixels; constant on screen, finer on the ground as
    /// zoom grows.
    pub grid_size_px: f64,
    /// At or above this zoom every point is drawn individually.
    pub max_cluster_zoom: u8,
}

impl Default for GridClusteringConfig {
    fn default() -> Self {
        Self {
            grid_size_px: 60.0,
            max_cluster_zoom: 18,
        }
    }
}

/// Fixed screen-space grid clustering over Web Mercator world pixels.
///
/// The output is a function of the point set alone: members are grouped by
/// cell, groups are emitted in cell order, and cluster ids are anchored to
/// `(zoom, cell)` so a refetch of the same area yields the same ids.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GridClustering {
    config: GridClusteringConfig,
}

impl GridClustering {
    pub fn new(config: GridClusteringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> GridClusteringConfig {
        self.config
    }

    fn cell_of(&self, p: LatLng, zoom: u8) -> (i64, i64) {
        let px = project_world_px(p, f64::from(zoom));
        (
            cell_index(px.x, self.config.grid_size_px),
            cell_index(px.y, self.config.grid_size_px),
        )
    }

    /// First zoom above `zoom` at which `members` stop sharing one cell.
    fn expansion_zoom(&self, members: &[&PropertyItem], zoom: u8) -> u8 {
        let limit = self.config.max_cluster_zoom;
        for z in zoom.saturating_add(1)..limit {
            let first = self.cell_of(members[0].position, z);
            if members[1..]
                .iter()
                .any(|m| self.cell_of(m.position, z) != first)
            {
                return z;
            }
        }
        limit.max(zoom.saturating_add(1))
    }

    fn fold(&self, mut members: Vec<&PropertyItem>, cell: (i64, i64), zoom: u8) -> ClusterItem {
        members.sort_by(|a, b| a.id.cmp(&b.id));
        let n = members.len() as f64;
        let (lat, lng, price) = members.iter().fold((0.0, 0.0, 0.0), |acc, m| {
            (acc.0 + m.position.lat, acc.1 + m.position.lng, acc.2 + m.price)
        });

        ClusterItem {
            id: cluster_id(zoom, cell),
            position: LatLng::new(lat / n, lng / n),
            count: members.len() as u32,
            avg_price: Some(price / n),
            expansion_zoom: Some(self.expansion_zoom(&members, zoom)),
            is_hovered: false,
            is_selected: false,
        }
    }
}

impl Default for GridClustering {
    fn default() -> Self {
        Self::new(GridClusteringConfig::default())
    }
}

impl ClusteringPolicy for GridClustering {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn apply(
        &self,
        properties: &[PropertyItem],
        clusters: &[ClusterItem],
        zoom: u8,
    ) -> Vec<MapItem> {
        if zoom >= self.config.max_cluster_zoom {
            return ServerClustering.apply(properties, clusters, zoom);
        }

        let mut cells: BTreeMap<(i64, i64), Vec<&PropertyItem>> = BTreeMap::new();
        for p in properties {
            cells.entry(self.cell_of(p.position, zoom)).or_default().push(p);
        }

        let mut out = Vec::with_capacity(cells.len() + clusters.len());
        for (cell, members) in cells {
            if members.len() == 1 {
                out.push(MapItem::Property(members[0].clone()));
            } else {
                out.push(MapItem::Cluster(self.fold(members, cell, zoom)));
            }
        }
        out.extend(clusters.iter().cloned().map(MapItem::Cluster));
        out
    }
}

/// Grid cell for a world-pixel coordinate.
///
/// A coordinate exactly on a cell boundary belongs to the lower-indexed cell.
fn cell_index(coord: f64, grid: f64) -> i64 {
    let scaled = coord / grid;
    let floor = scaled.floor();
    if scaled == floor && floor > 0.0 {
        floor as i64 - 1
    } else {
        floor as i64
    }
}

/// Deterministic id of the cluster anchored in `cell` at `zoom`.
pub fn cluster_id(zoom: u8, cell: (i64, i64)) -> MarkerId {
    MarkerId::cluster(format!("z{zoom}/{}/{}", cell.0, cell.1))
}

#[cfg(test)]
mod tests {
    use super::{ClusteringPolicy, GridClustering, GridClusteringConfig, ServerClustering};
    use super::{cell_index, cluster_id};
    use foundation::ids::MarkerId;
    use scene::item::{ClusterItem, MapItem, PropertyItem};
    use smol_str::SmolStr;

    fn prop(id: &str, lat: f64, lng: f64, price: f64) -> PropertyItem {
        PropertyItem {
            id: MarkerId::property(id),
            position: foundation::bounds::LatLng::new(lat, lng),
            price,
            currency: SmolStr::new("EUR"),
            title: String::new(),
            is_hovered: false,
            is_selected: false,
        }
    }

    fn clusters(items: &[MapItem]) -> Vec<&ClusterItem> {
        items
            .iter()
            .filter_map(|i| match i {
                MapItem::Cluster(c) => Some(c),
                MapItem::Property(_) => None,
            })
            .collect()
    }

    #[test]
    fn boundary_points_go_to_lower_cell() {
        assert_eq!(cell_index(119.9, 60.0), 1);
        assert_eq!(cell_index(120.0, 60.0), 1);
        assert_eq!(cell_index(120.1, 60.0), 2);
        assert_eq!(cell_index(0.0, 60.0), 0);
    }

    #[test]
    fn nearby_points_fold_into_mean_centroid() {
        let policy = GridClustering::default();
        let points = vec![
            prop("a", 48.8500, 2.3500, 100.0),
            prop("b", 48.8502, 2.3502, 300.0),
            prop("far", 40.0, -3.7, 50.0),
        ];
        let out = policy.apply(&points, &[], 10);
        assert_eq!(out.len(), 2);

        let c = clusters(&out);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].count, 2);
        assert!((c[0].position.lat - 48.8501).abs() < 1e-9);
        assert!((c[0].position.lng - 2.3501).abs() < 1e-9);
        assert_eq!(c[0].avg_price, Some(200.0));
        assert!(out.iter().any(|i| i.id() == &MarkerId::property("far")));
    }

    #[test]
    fn singleton_cells_stay_properties() {
        let policy = GridClustering::default();
        let points: Vec<_> = (0..20)
            .map(|i| prop(&i.to_string(), -40.0 + f64::from(i) * 4.0, f64::from(i) * 9.0, 1.0))
            .collect();
        let out = policy.apply(&points, &[], 9);
        assert_eq!(out.len(), 20);
        assert!(clusters(&out).is_empty());
    }

    #[test]
    fn output_does_not_depend_on_input_order() {
        let policy = GridClustering::default();
        let mut points = vec![
            prop("a", 10.0001, 10.0001, 1.0),
            prop("b", 10.0002, 10.0003, 2.0),
            prop("c", 10.0003, 10.0002, 3.0),
            prop("d", 30.0, 30.0, 4.0),
        ];
        let forward = policy.apply(&points, &[], 12);
        points.reverse();
        let backward = policy.apply(&points, &[], 12);
        pretty_assertions::assert_eq!(forward, backward);
    }

    #[test]
    fn cluster_ids_are_anchored_to_zoom_and_cell() {
        let policy = GridClustering::default();
        let points = vec![prop("a", 1.0, 1.0, 1.0), prop("b", 1.00001, 1.00001, 1.0)];
        let first = policy.apply(&points, &[], 8);
        let again = policy.apply(&points, &[], 8);
        assert_eq!(first[0].id(), again[0].id());
        assert!(first[0].id().raw.starts_with("z8/"));
        assert_eq!(cluster_id(3, (4, -1)), MarkerId::cluster("z3/4/-1"));
    }

    #[test]
    fn expansion_zoom_is_where_members_split() {
        let policy = GridClustering::new(GridClusteringConfig {
            grid_size_px: 60.0,
            max_cluster_zoom: 18,
        });
        let points = vec![prop("a", 45.0, 7.0, 1.0), prop("b", 45.0, 7.05, 1.0)];
        let out = policy.apply(&points, &[], 8);
        let c = clusters(&out);
        assert_eq!(c.len(), 1);
        let expand = c[0].expansion_zoom.unwrap();
        assert!(expand > 8 && expand <= 18);

        // At the expansion zoom the same points no longer fold together.
        let split = policy.apply(&points, &[], expand);
        assert!(clusters(&split).iter().all(|c| c.count < 2));
    }

    #[test]
    fn no_client_clustering_at_max_zoom() {
        let policy = GridClustering::default();
        let points = vec![prop("a", 1.0, 1.0, 1.0), prop("b", 1.0, 1.0, 1.0)];
        let out = policy.apply(&points, &[], 18);
        assert_eq!(out.len(), 2);
        assert!(clusters(&out).is_empty());
    }

    #[test]
    fn passthrough_keeps_upstream_clusters() {
        let upstream = ClusterItem {
            id: MarkerId::cluster("srv-1"),
            position: foundation::bounds::LatLng::new(1.0, 1.0),
            count: 12,
            avg_price: None,
            expansion_zoom: Some(11),
            is_hovered: false,
            is_selected: false,
        };
        let points = vec![prop("a", 1.0, 1.0, 1.0), prop("b", 1.0, 1.0, 1.0)];
        let out = ServerClustering.apply(&points, std::slice::from_ref(&upstream), 9);
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], MapItem::Cluster(upstream));
    }
}
