//! Area-of-interest geometry.
//!
//! An [`Aoi`] is a set of polygons in WGS84 longitude/latitude read from a
//! GeoJSON document. Its total bounds drive the catalog search and the
//! polygons themselves become the clip mask via [`rasterize_mask`].

mod geojson;
mod rasterize;

pub use rasterize::rasterize_mask;

use crate::error::{Error, Result};
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use std::path::Path;

/// Polygonal area of interest.
#[derive(Debug, Clone, PartialEq)]
pub struct Aoi {
    polygons: MultiPolygon<f64>,
}

impl Aoi {
    /// Wrap polygons; at least one polygon with a non-empty exterior is required.
    pub fn new(polygons: MultiPolygon<f64>) -> Result<Self> {
        if polygons.0.is_empty() {
            return Err(Error::InvalidGeometry("AOI contains no polygons".into()));
        }
        for (i, poly) in polygons.0.iter().enumerate() {
            if poly.exterior().0.len() < 4 {
                return Err(Error::InvalidGeometry(format!(
                    "polygon {i} exterior has fewer than 3 distinct vertices"
                )));
            }
        }
        Ok(Self { polygons })
    }

    /// Rectangle AOI `[west, south, east, north]`.
    pub fn from_bbox(west: f64, south: f64, east: f64, north: f64) -> Result<Self> {
        if !(west < east && south < north) {
            return Err(Error::InvalidGeometry(format!(
                "degenerate bbox [{west}, {south}, {east}, {north}]"
            )));
        }
        let ring = LineString::from(vec![
            (west, south),
            (east, south),
            (east, north),
            (west, north),
            (west, south),
        ]);
        Self::new(MultiPolygon(vec![Polygon::new(ring, vec![])]))
    }

    /// Parse a GeoJSON FeatureCollection, Feature or bare geometry.
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let mut polygons = Vec::new();
        geojson::collect_polygons(&value, &mut polygons)?;
        Self::new(MultiPolygon(polygons))
    }

    /// Read a GeoJSON file from disk.
    pub fn read_geojson<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_geojson_str(&text)
    }

    pub fn polygons(&self) -> &MultiPolygon<f64> {
        &self.polygons
    }

    /// Total bounds `(min_x, min_y, max_x, max_y)` over every polygon.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.polygons
            .0
            .iter()
            .flat_map(|p| p.exterior().0.iter())
            .fold(
                (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
                |(min_x, min_y, max_x, max_y), c| {
                    (min_x.min(c.x), min_y.min(c.y), max_x.max(c.x), max_y.max(c.y))
                },
            )
    }

    /// New AOI with every vertex passed through `f`.
    pub fn try_map_coords<E, F>(&self, f: F) -> std::result::Result<Aoi, E>
    where
        F: Fn(f64, f64) -> std::result::Result<(f64, f64), E>,
    {
        let map_ring = |ring: &LineString<f64>| -> std::result::Result<LineString<f64>, E> {
            ring.0
                .iter()
                .map(|c| f(c.x, c.y).map(|(x, y)| Coord { x, y }))
                .collect::<std::result::Result<Vec<_>, E>>()
                .map(LineString)
        };

        let polygons = self
            .polygons
            .0
            .iter()
            .map(|poly| {
                let exterior = map_ring(poly.exterior())?;
                let interiors = poly
                    .interiors()
                    .iter()
                    .map(map_ring)
                    .collect::<std::result::Result<Vec<_>, E>>()?;
                Ok(Polygon::new(exterior, interiors))
            })
            .collect::<std::result::Result<Vec<_>, E>>()?;

        Ok(Aoi {
            polygons: MultiPolygon(polygons),
        })
    }
}
