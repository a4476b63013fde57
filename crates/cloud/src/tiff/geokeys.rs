//! GeoTIFF georeferencing from resolved IFD tags.
//!
//! Reads ModelPixelScale + ModelTiepoint (or ModelTransformation), the EPSG
//! code in the GeoKeyDirectory and the GDAL_NODATA string.

use lcexport_core::crs::CRS;
use lcexport_core::raster::GeoTransform;

use super::{tags, Ifd, TiffByteOrder};

const GEOGRAPHIC_TYPE: u64 = 2048;
const PROJECTED_CS_TYPE: u64 = 3072;
/// GeoKey value meaning "user defined" rather than an EPSG code.
const USER_DEFINED: u64 = 32767;

/// Georeferencing of one GeoTIFF image.
#[derive(Debug, Clone)]
pub struct GeoMeta {
    pub transform: GeoTransform,
    pub crs: Option<CRS>,
    pub nodata: Option<f64>,
}

impl GeoMeta {
    pub fn from_ifd(order: TiffByteOrder, ifd: &Ifd) -> Self {
        Self {
            transform: geotransform(order, ifd),
            crs: crs(order, ifd),
            nodata: ifd
                .ascii(tags::GDAL_NODATA)
                .and_then(|s| s.trim().parse::<f64>().ok()),
        }
    }
}

fn geotransform(order: TiffByteOrder, ifd: &Ifd) -> GeoTransform {
    let scale = ifd.floats(order, tags::MODEL_PIXEL_SCALE);
    let tiepoint = ifd.floats(order, tags::MODEL_TIEPOINT);

    if let (Some(s), Some(t)) = (&scale, &tiepoint) {
        if s.len() >= 2 && t.len() >= 6 {
            return GeoTransform::new(t[3] - t[0] * s[0], t[4] + t[1] * s[1], s[0], -s[1]);
        }
    }

    // 4x4 row-major: x = m[3] + col*m[0] + row*m[1], y = m[7] + col*m[4] + row*m[5]
    if let Some(m) = ifd.floats(order, tags::MODEL_TRANSFORMATION) {
        if m.len() >= 16 {
            return GeoTransform {
                origin_x: m[3],
                origin_y: m[7],
                pixel_width: m[0],
                pixel_height: m[5],
                row_rotation: m[1],
                col_rotation: m[4],
            };
        }
    }

    GeoTransform::default()
}

fn crs(order: TiffByteOrder, ifd: &Ifd) -> Option<CRS> {
    let keys = ifd.uints(order, tags::GEO_KEY_DIRECTORY);
    let count = *keys.get(3)? as usize;

    let code = keys
        .get(4..)?
        .chunks_exact(4)
        .take(count)
        // location 0 means the value is stored in the key itself
        .filter(|k| k[1] == 0)
        .find_map(|k| match k[0] {
            PROJECTED_CS_TYPE | GEOGRAPHIC_TYPE if k[3] > 0 && k[3] != USER_DEFINED => Some(k[3]),
            _ => None,
        })?;

    Some(CRS::from_epsg(code as u32))
}
