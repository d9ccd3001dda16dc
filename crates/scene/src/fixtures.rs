use foundation::bounds::LatLng;
use foundation::ids::MarkerId;
use smol_str::SmolStr;

use crate::item::{ClusterItem, MapItem, PropertyItem};
use crate::rendered::RenderedMarkerSet;

pub(crate) fn property(id: &str, lat: f64, lng: f64, price: f64) -> MapItem {
    MapItem::Property(PropertyItem {
        id: MarkerId::property(id),
        position: LatLng::new(lat, lng),
        price,
        currency: SmolStr::new("EUR"),
        title: format!("listing {id}"),
        is_hovered: false,
        is_selected: false,
    })
}

pub(crate) fn cluster(id: &str, lat: f64, lng: f64, count: u32) -> MapItem {
    MapItem::Cluster(ClusterItem {
        id: MarkerId::cluster(id),
        position: LatLng::new(lat, lng),
        count,
        avg_price: None,
        expansion_zoom: None,
        is_hovered: false,
        is_selected: false,
    })
}

pub(crate) fn rendered_from(items: &[MapItem]) -> RenderedMarkerSet<()> {
    let mut set = RenderedMarkerSet::new();
    for item in items {
        set.insert(item.clone(), ()).expect("unique ids");
    }
    set
}
