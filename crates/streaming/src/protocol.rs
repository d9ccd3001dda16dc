//! Wire types for the upstream tile contract.
//!
//! `fetchTile(viewport, filters) -> { points, clusters, truncated }`.
//!
//! Upstream payloads are decoded leniently: ids may be strings or numbers and
//! coordinates may arrive as numbers, numeric strings or garbage. Garbage is
//! preserved as "not a number" here and filtered by [`crate::sanitize`], so a
//! single malformed row never fails the whole payload.

use std::collections::BTreeMap;

use foundation::viewport::Viewport;
use serde::{Deserialize, Serialize};

use crate::request::FetchToken;

/// Opaque filter object forwarded to the upstream unchanged.
///
/// A sorted map so that equal filter sets compare (and serialise) equal.
pub type Filters = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRequest {
    pub token: FetchToken,
    pub viewport: Viewport,
    #[serde(default)]
    pub filters: Filters,
}

/// Identifier as sent by the upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Text(String),
    Int(i64),
}

impl WireId {
    pub fn to_key(&self) -> Option<String> {
        match self {
            WireId::Text(s) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            WireId::Int(n) => Some(n.to_string()),
        }
    }
}

impl From<&str> for WireId {
    fn from(s: &str) -> Self {
        WireId::Text(s.to_string())
    }
}

/// Numeric field that tolerates numeric strings and junk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl WireNumber {
    /// Finite value, if the field holds one.
    pub fn as_finite(&self) -> Option<f64> {
        let v = match self {
            WireNumber::Number(n) => *n,
            WireNumber::Text(s) => s.trim().parse::<f64>().ok()?,
            WireNumber::Other(_) => return None,
        };
        v.is_finite().then_some(v)
    }
}

impl From<f64> for WireNumber {
    fn from(v: f64) -> Self {
        WireNumber::Number(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePoint {
    pub id: WireId,
    pub lat: WireNumber,
    pub lng: WireNumber,
    #[serde(default)]
    pub price: Option<WireNumber>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl WirePoint {
    pub fn new(id: &str, lat: f64, lng: f64, price: f64) -> Self {
        Self {
            id: id.into(),
            lat: lat.into(),
            lng: lng.into(),
            price: Some(price.into()),
            currency: None,
            title: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCluster {
    pub id: WireId,
    pub lat: WireNumber,
    pub lng: WireNumber,
    pub count: u32,
    #[serde(default, alias = "avgPrice")]
    pub avg_price: Option<f64>,
    #[serde(default, alias = "expansionZoom")]
    pub expansion_zoom: Option<u8>,
}

impl WireCluster {
    pub fn new(id: &str, lat: f64, lng: f64, count: u32) -> Self {
        Self {
            id: id.into(),
            lat: lat.into(),
            lng: lng.into(),
            count,
            avg_price: None,
            expansion_zoom: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TilePayload {
    #[serde(default)]
    pub points: Vec<WirePoint>,
    #[serde(default)]
    pub clusters: Vec<WireCluster>,
    /// Server-side density guard tripped; individual points must not be drawn.
    #[serde(default)]
    pub truncated: bool,
}

impl TilePayload {
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::{TilePayload, WireId, WireNumber};

    #[test]
    fn decodes_mixed_payload_leniently() {
        let json = br#"{
            "points": [
                {"id": 17, "lat": 45.1, "lng": "7.25", "price": 250000, "currency": "EUR"},
                {"id": "x", "lat": "north", "lng": 7.0, "price": 1}
            ],
            "clusters": [
                {"id": "c1", "lat": 45.0, "lng": 7.0, "count": 12, "avgPrice": 310000.0}
            ],
            "truncated": false
        }"#;
        let payload = TilePayload::from_json(json).expect("decodes");
        assert_eq!(payload.points.len(), 2);
        assert_eq!(payload.points[0].id.to_key().as_deref(), Some("17"));
        assert_eq!(payload.points[0].lng.as_finite(), Some(7.25));
        assert_eq!(payload.points[1].lat.as_finite(), None);
        assert_eq!(payload.clusters[0].avg_price, Some(310000.0));
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let payload = TilePayload::from_json(b"{}").unwrap();
        assert!(payload.points.is_empty());
        assert!(payload.clusters.is_empty());
        assert!(!payload.truncated);
    }

    #[test]
    fn non_finite_and_blank_values_are_rejected() {
        assert_eq!(WireNumber::Text("NaN".into()).as_finite(), None);
        assert_eq!(WireNumber::Text("inf".into()).as_finite(), None);
        assert_eq!(WireId::Text("   ".into()).to_key(), None);
    }
}
