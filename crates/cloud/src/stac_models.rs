//! STAC (SpatioTemporal Asset Catalog) data types.
//!
//! Serde models for STAC Item Search (POST /search) requests and responses:
//! bbox/datetime/collection filters, pagination links, assets and the
//! projection extension fields used to pick the raster CRS.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use lcexport_core::crs::CRS;

// ---------------------------------------------------------------------------
// Search request
// ---------------------------------------------------------------------------

/// Body for `POST /search` (STAC API Item Search).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StacSearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Pagination token (next page).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl StacSearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bounding box `[west, south, east, north]`.
    pub fn bbox(mut self, west: f64, south: f64, east: f64, north: f64) -> Self {
        self.bbox = Some(vec![west, south, east, north]);
        self
    }

    /// Set datetime or interval (e.g. `"2020-01-01T00:00:00Z/2022-12-31T23:59:59Z"`).
    pub fn datetime(mut self, dt: &str) -> Self {
        self.datetime = Some(dt.to_string());
        self
    }

    /// Interval covering whole calendar years `start..=end`.
    pub fn years(self, start: i32, end: i32) -> Self {
        self.datetime(&format!("{start:04}-01-01T00:00:00Z/{end:04}-12-31T23:59:59Z"))
    }

    pub fn collections(mut self, cols: &[&str]) -> Self {
        self.collections = Some(cols.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Set maximum items per page.
    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn token(mut self, tok: &str) -> Self {
        self.token = Some(tok.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A STAC Item Collection (GeoJSON FeatureCollection).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItemCollection {
    #[serde(rename = "type")]
    pub type_: String,

    pub features: Vec<StacItem>,

    #[serde(default)]
    pub links: Vec<StacLink>,

    #[serde(rename = "numberMatched", skip_serializing_if = "Option::is_none")]
    pub number_matched: Option<u64>,

    #[serde(rename = "numberReturned", skip_serializing_if = "Option::is_none")]
    pub number_returned: Option<u64>,
}

impl StacItemCollection {
    /// The `"next"` pagination link, if any.
    pub fn next_link(&self) -> Option<&StacLink> {
        self.links.iter().find(|l| l.rel == "next")
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// A single STAC Item (GeoJSON Feature).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItem {
    #[serde(rename = "type")]
    pub type_: String,

    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<serde_json::Value>,

    /// Bounding box `[west, south, east, north]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    pub properties: StacItemProperties,

    pub assets: HashMap<String, StacAsset>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl StacItem {
    pub fn asset(&self, key: &str) -> Option<&StacAsset> {
        self.assets.get(key)
    }

    /// CRS from the projection extension: `proj:code` (`"EPSG:32753"`),
    /// falling back to the older `proj:epsg` integer.
    pub fn crs(&self) -> Option<CRS> {
        let extra = &self.properties.extra;
        extra
            .get("proj:code")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<CRS>().ok())
            .or_else(|| {
                extra
                    .get("proj:epsg")
                    .and_then(|v| v.as_u64())
                    .map(|code| CRS::from_epsg(code as u32))
            })
    }

    /// Start of the item's time span: `start_datetime`, else `datetime`.
    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        let props = &self.properties;
        props
            .start_datetime
            .as_deref()
            .or(props.datetime.as_deref())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Calendar year of [`start_datetime`](Self::start_datetime).
    pub fn year(&self) -> Option<i32> {
        self.start_datetime().map(|dt| dt.year())
    }

    /// Item footprint as `[west, south, east, north]`, when published.
    pub fn bounds(&self) -> Option<[f64; 4]> {
        match self.bbox.as_deref() {
            Some(&[w, s, e, n]) => Some([w, s, e, n]),
            _ => None,
        }
    }
}

/// STAC Item properties.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StacItemProperties {
    /// RFC 3339 datetime; null for items that only carry a range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_datetime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<String>,

    /// All other properties, including `proj:*`.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A single STAC Asset (file reference).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacAsset {
    pub href: String,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A STAC Link (used for pagination and related resources).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacLink {
    /// `"self"`, `"root"`, `"next"`, `"prev"`, ...
    pub rel: String,

    pub href: String,

    /// HTTP method for the link (default GET, `"next"` often uses POST).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Request body for POST-based pagination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    /// Merge `body` into the previous request body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<bool>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "stac_version": "1.0.0",
      "id": "53L-2023",
      "geometry": {
        "type": "Polygon",
        "coordinates": [[[131.9, -16.0], [135.1, -16.0], [135.1, -7.9], [131.9, -7.9], [131.9, -16.0]]]
      },
      "bbox": [131.9, -16.0, 135.1, -7.9],
      "properties": {
        "datetime": null,
        "start_datetime": "2023-01-01T00:00:00Z",
        "end_datetime": "2024-01-01T00:00:00Z",
        "proj:code": "EPSG:32753",
        "io:tile_id": "53L"
      },
      "assets": {
        "data": {
          "href": "https://io-lulc.blob.core.windows.net/io-lulc-annual-v02/2023/53L_20230101-20240101.tif",
          "type": "image/tiff; application=geotiff; profile=cloud-optimized",
          "title": "Global land use/land cover data",
          "roles": ["data"]
        }
      },
      "collection": "io-lulc-annual-v02",
      "links": []
    },
    {
      "type": "Feature",
      "id": "53L-2017",
      "bbox": [131.9, -16.0, 135.1, -7.9],
      "properties": {
        "datetime": "2017-07-01T00:00:00Z",
        "proj:epsg": 32753
      },
      "assets": {}
    }
  ],
  "links": [
    {
      "rel": "next",
      "href": "https://planetarycomputer.microsoft.com/api/stac/v1/search",
      "method": "POST",
      "body": {"token": "next:53L-2017"},
      "merge": true
    }
  ],
  "numberMatched": 7,
  "numberReturned": 2
}"#;

    fn items() -> Vec<StacItem> {
        serde_json::from_str::<StacItemCollection>(FIXTURE).unwrap().features
    }

    #[test]
    fn parse_item_collection() {
        let col: StacItemCollection = serde_json::from_str(FIXTURE).unwrap();
        assert_eq!(col.len(), 2);
        assert_eq!(col.number_matched, Some(7));
        let next = col.next_link().unwrap();
        assert_eq!(next.method.as_deref(), Some("POST"));
        assert_eq!(next.merge, Some(true));
    }

    #[test]
    fn crs_prefers_proj_code() {
        let items = items();
        assert_eq!(items[0].crs().and_then(|c| c.epsg()), Some(32753));
        assert_eq!(items[1].crs().and_then(|c| c.epsg()), Some(32753));
    }

    #[test]
    fn start_datetime_falls_back_to_datetime() {
        let items = items();
        assert_eq!(items[0].year(), Some(2023));
        assert_eq!(
            items[0].start_datetime().unwrap().format("%Y%m%d").to_string(),
            "20230101"
        );
        assert_eq!(items[1].year(), Some(2017));
    }

    #[test]
    fn missing_dates_give_no_year() {
        let mut item = items().remove(1);
        item.properties.datetime = None;
        assert_eq!(item.year(), None);
        item.properties.datetime = Some("last summer".into());
        assert_eq!(item.year(), None);
    }

    #[test]
    fn asset_lookup_and_bounds() {
        let items = items();
        let data = items[0].asset("data").unwrap();
        assert!(data.href.ends_with("53L_20230101-20240101.tif"));
        assert!(items[1].asset("data").is_none());
        assert_eq!(items[0].bounds(), Some([131.9, -16.0, 135.1, -7.9]));
    }

    #[test]
    fn builder_serializes_present_fields_only() {
        let params = StacSearchParams::new()
            .bbox(131.0, -14.0, 134.0, -12.2)
            .years(2017, 2023)
            .collections(&["io-lulc-annual-v02"])
            .limit(100);

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["bbox"], serde_json::json!([131.0, -14.0, 134.0, -12.2]));
        assert_eq!(json["datetime"], "2017-01-01T00:00:00Z/2023-12-31T23:59:59Z");
        assert_eq!(json["collections"], serde_json::json!(["io-lulc-annual-v02"]));
        assert_eq!(json["limit"], 100);
        assert!(json.get("token").is_none());

        let empty = serde_json::to_value(StacSearchParams::new()).unwrap();
        assert!(empty.as_object().unwrap().is_empty());
    }
}
