//! Pure-Rust forward projection of WGS84 coordinates.
//!
//! Targets: UTM north/south (EPSG 326xx / 327xx, Snyder 1987 series),
//! Web Mercator (EPSG 3857) and WGS84 itself (identity). Annual land-cover
//! tiles are published in UTM, so that is the path exercised in practice.

use lcexport_core::crs::CRS;
use lcexport_core::vector::Aoi;

use crate::cog::BBox;
use crate::error::{CloudError, Result};

// WGS84 ellipsoid
const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_223_563;
const E2: f64 = 2.0 * F - F * F;
const E_PRIME2: f64 = E2 / (1.0 - E2);

const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Web Mercator latitude limit.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Points sampled along each bbox edge when projecting envelopes.
const EDGE_SAMPLES: usize = 16;

/// A projection from WGS84 longitude/latitude degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Identity,
    Utm { zone: u32, north: bool },
    WebMercator,
}

impl Projection {
    /// Resolve the projection for a target CRS.
    pub fn for_crs(target: &CRS) -> Result<Self> {
        if let Some((zone, north)) = target.utm_zone() {
            return Ok(Self::Utm { zone, north });
        }
        match target.epsg() {
            Some(4326) => Ok(Self::Identity),
            Some(3857) | Some(900913) => Ok(Self::WebMercator),
            _ => Err(CloudError::UnsupportedCrs(target.identifier())),
        }
    }

    /// Project one `(lon, lat)` point.
    pub fn project(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return Err(CloudError::Core(lcexport_core::Error::InvalidGeometry(format!(
                "({lon}, {lat}) is not a WGS84 longitude/latitude"
            ))));
        }
        Ok(match *self {
            Self::Identity => (lon, lat),
            Self::Utm { zone, north } => wgs84_to_utm(lon, lat, zone, north),
            Self::WebMercator => wgs84_to_web_mercator(lon, lat),
        })
    }
}

/// Project a WGS84 point into `target`.
pub fn reproject_point(lon: f64, lat: f64, target: &CRS) -> Result<(f64, f64)> {
    Projection::for_crs(target)?.project(lon, lat)
}

/// Envelope of a WGS84 bbox in `target`, sampling along the edges.
pub fn reproject_bbox(bbox: &BBox, target: &CRS) -> Result<BBox> {
    let proj = Projection::for_crs(target)?;
    if proj == Projection::Identity {
        return Ok(*bbox);
    }

    let mut env = BBox::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for i in 0..=EDGE_SAMPLES {
        let t = i as f64 / EDGE_SAMPLES as f64;
        let x = bbox.min_x + t * bbox.width();
        let y = bbox.min_y + t * bbox.height();
        for (lon, lat) in [(x, bbox.min_y), (x, bbox.max_y), (bbox.min_x, y), (bbox.max_x, y)] {
            let (px, py) = proj.project(lon, lat)?;
            env.min_x = env.min_x.min(px);
            env.min_y = env.min_y.min(py);
            env.max_x = env.max_x.max(px);
            env.max_y = env.max_y.max(py);
        }
    }
    Ok(env)
}

/// Project every vertex of a WGS84 AOI into `target`.
pub fn reproject_aoi(aoi: &Aoi, target: &CRS) -> Result<Aoi> {
    let proj = Projection::for_crs(target)?;
    aoi.try_map_coords(|lon, lat| proj.project(lon, lat))
}

/// WGS84 degrees to UTM metres (Snyder 1987, eqs. 8-9 and 8-10).
fn wgs84_to_utm(lon_deg: f64, lat_deg: f64, zone: u32, north: bool) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians();

    let (sin_lat, cos_lat) = lat.sin_cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a = cos_lat * (lon - lon0);
    let (a2, a3) = (a * a, a * a * a);
    let (a4, a5, a6) = (a2 * a2, a2 * a3, a3 * a3);

    let easting = K0
        * n
        * (a + (1.0 - t + c) * a3 / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a5 / 120.0)
        + FALSE_EASTING;

    let northing = K0
        * (meridional_arc(lat)
            + n * tan_lat
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    (easting, if north { northing } else { northing + FALSE_NORTHING_SOUTH })
}

/// Meridional arc from the equator to `lat` radians (Snyder eq. 3-21).
fn meridional_arc(lat: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;
    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

fn wgs84_to_web_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
    let x = A * lon.to_radians();
    let y = A * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln();
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // Reference values from PROJ:
    //   Transformer.from_crs(4326, 32630, always_xy=True).transform(-3.7037, 40.4168)
    #[test]
    fn madrid_to_utm30n() {
        let (e, n) = reproject_point(-3.7037, 40.4168, &CRS::from_epsg(32630)).unwrap();
        assert_abs_diff_eq!(e, 440_298.94, epsilon = 1.0);
        assert_abs_diff_eq!(n, 4_474_257.31, epsilon = 1.0);
    }

    #[test]
    fn buenos_aires_to_utm21s() {
        let (e, n) = reproject_point(-58.3816, -34.6037, &CRS::from_epsg(32721)).unwrap();
        assert_abs_diff_eq!(e, 373_317.50, epsilon = 1.0);
        assert_abs_diff_eq!(n, 6_170_036.17, epsilon = 1.0);
    }

    #[test]
    fn central_meridian_on_equator() {
        let (e, n) = wgs84_to_utm(-3.0, 0.0, 30, true);
        assert_abs_diff_eq!(e, 500_000.0, epsilon = 0.01);
        assert_abs_diff_eq!(n, 0.0, epsilon = 0.01);
    }

    #[test]
    fn web_mercator_reference() {
        let (x, y) = reproject_point(180.0, 0.0, &CRS::web_mercator()).unwrap();
        assert_abs_diff_eq!(x, 20_037_508.34, epsilon = 0.01);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-6);

        let (_, y) = reproject_point(0.0, 45.0, &CRS::web_mercator()).unwrap();
        assert_abs_diff_eq!(y, 5_621_521.49, epsilon = 0.01);
    }

    #[test]
    fn wgs84_is_identity() {
        let bbox = BBox::new(131.0, -14.0, 134.0, -12.2);
        assert_eq!(reproject_bbox(&bbox, &CRS::wgs84()).unwrap(), bbox);
    }

    #[test]
    fn unsupported_target() {
        let err = reproject_point(0.0, 0.0, &CRS::from_epsg(2193)).unwrap_err();
        assert!(matches!(err, CloudError::UnsupportedCrs(_)));
    }

    #[test]
    fn out_of_range_coordinates() {
        assert!(reproject_point(500_000.0, 0.0, &CRS::from_epsg(32753)).is_err());
    }

    #[test]
    fn bbox_envelope_contains_projected_corners() {
        let bbox = BBox::new(132.3, -13.0, 132.6, -12.5);
        let crs = CRS::from_epsg(32753);
        let env = reproject_bbox(&bbox, &crs).unwrap();

        for (lon, lat) in [(132.3, -13.0), (132.3, -12.5), (132.6, -13.0), (132.6, -12.5)] {
            let (x, y) = reproject_point(lon, lat, &crs).unwrap();
            assert!(x >= env.min_x && x <= env.max_x);
            assert!(y >= env.min_y && y <= env.max_y);
        }
        // roughly 32 km x 55 km
        assert!(env.width() > 30_000.0 && env.width() < 35_000.0, "{}", env.width());
        assert!(env.height() > 54_000.0 && env.height() < 57_000.0, "{}", env.height());
        assert!(env.min_y > 8_500_000.0, "south hemisphere false northing");
    }

    #[test]
    fn aoi_vertices_are_projected() {
        let aoi = Aoi::from_bbox(132.3, -13.0, 132.6, -12.5).unwrap();
        let projected = reproject_aoi(&aoi, &CRS::from_epsg(32753)).unwrap();
        let (min_x, min_y, max_x, max_y) = projected.bounds();
        assert!(min_x > 200_000.0 && max_x < 300_000.0);
        assert!(min_y > 8_500_000.0 && max_y < 8_700_000.0);
    }
}
