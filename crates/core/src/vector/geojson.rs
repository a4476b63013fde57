//! Minimal GeoJSON reader: walks features and collects polygons.

use crate::error::{Error, Result};
use geo_types::{Coord, LineString, Polygon};
use serde_json::Value;

/// Append every polygon found in `value` to `out`.
///
/// Accepts FeatureCollection, Feature, GeometryCollection, Polygon and
/// MultiPolygon. Features with a `null` geometry are skipped.
pub(crate) fn collect_polygons(value: &Value, out: &mut Vec<Polygon<f64>>) -> Result<()> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidGeometry("GeoJSON object has no \"type\"".into()))?;

    match kind {
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::InvalidGeometry("FeatureCollection without features".into()))?;
            for feature in features {
                collect_polygons(feature, out)?;
            }
        }
        "Feature" => match value.get("geometry") {
            Some(Value::Null) | None => {}
            Some(geometry) => collect_polygons(geometry, out)?,
        },
        "GeometryCollection" => {
            let geometries = value
                .get("geometries")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::InvalidGeometry("GeometryCollection without geometries".into()))?;
            for geometry in geometries {
                collect_polygons(geometry, out)?;
            }
        }
        "Polygon" => out.push(parse_polygon(coordinates(value)?)?),
        "MultiPolygon" => {
            let parts = coordinates(value)?
                .as_array()
                .ok_or_else(|| Error::InvalidGeometry("MultiPolygon coordinates must be an array".into()))?;
            for part in parts {
                out.push(parse_polygon(part)?);
            }
        }
        other => {
            return Err(Error::InvalidGeometry(format!(
                "unsupported AOI geometry type {other}, expected Polygon or MultiPolygon"
            )))
        }
    }
    Ok(())
}

fn coordinates(value: &Value) -> Result<&Value> {
    value
        .get("coordinates")
        .ok_or_else(|| Error::InvalidGeometry("geometry without coordinates".into()))
}

fn parse_polygon(value: &Value) -> Result<Polygon<f64>> {
    let rings = value
        .as_array()
        .ok_or_else(|| Error::InvalidGeometry("polygon must be an array of rings".into()))?;

    let mut rings = rings.iter().map(parse_ring);
    let exterior = rings
        .next()
        .ok_or_else(|| Error::InvalidGeometry("polygon has no exterior ring".into()))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;

    Ok(Polygon::new(exterior, interiors))
}

fn parse_ring(value: &Value) -> Result<LineString<f64>> {
    let positions = value
        .as_array()
        .ok_or_else(|| Error::InvalidGeometry("ring must be an array of positions".into()))?;

    let coords = positions
        .iter()
        .map(|p| {
            let xy = p.as_array().filter(|a| a.len() >= 2).ok_or_else(|| {
                Error::InvalidGeometry(format!("invalid position {p}"))
            })?;
            match (xy[0].as_f64(), xy[1].as_f64()) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err(Error::InvalidGeometry(format!("non-numeric position {p}"))),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(LineString(coords))
}
