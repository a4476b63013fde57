//! Native GeoTIFF reading/writing on top of the `tiff` crate.
//!
//! Integer rasters are written as 32-bit signed samples, float rasters as
//! 32-bit float. Georeferencing is carried by ModelPixelScale +
//! ModelTiepoint, the CRS by an EPSG entry in the GeoKeyDirectory and the
//! no-data value by the GDAL_NODATA ASCII tag.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{ColorType, Gray32Float, GrayI32};
use tiff::encoder::compression::{Compression, Deflate, Lzw, Uncompressed};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tracing::{debug, warn};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

/// Newer `tiff` releases decode the GeoTIFF codes into named variants, so
/// lookups must go through the same mapping the decoder uses.
fn geo_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

/// Sample compression for written files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TiffCompression {
    None,
    Lzw,
    #[default]
    Deflate,
}

impl FromStr for TiffCompression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "LZW" => Ok(Self::Lzw),
            "DEFLATE" | "ZIP" => Ok(Self::Deflate),
            _ => Err(Error::InvalidParameter {
                name: "compression",
                value: s.to_string(),
                reason: "expected none, lzw or deflate".into(),
            }),
        }
    }
}

/// Options for writing GeoTIFF files
#[derive(Debug, Clone, Default)]
pub struct GeoTiffOptions {
    pub compression: TiffCompression,
}

/// Read the first band of a GeoTIFF file into a Raster
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(std::io::BufReader::new(file))
}

/// Read a GeoTIFF held in memory
pub fn read_geotiff_from_buffer<T: RasterElement>(data: &[u8]) -> Result<Raster<T>> {
    decode_geotiff(Cursor::new(data))
}

/// Write a Raster to a GeoTIFF file.
///
/// The image is encoded to `<path>.part` and renamed over `path`, so an
/// existing file is replaced in one step and a failed write leaves it intact.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P, options: Option<GeoTiffOptions>) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let partial = partial_path(path);
    let options = options.unwrap_or_default();

    let written = File::create(&partial).map_err(Error::from).and_then(|file| {
        let mut writer = BufWriter::new(file);
        encode_geotiff(raster, &mut writer, &options)?;
        writer.flush()?;
        Ok(())
    });

    if let Err(e) = written {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }

    std::fs::rename(&partial, path)?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Encode a Raster as an in-memory GeoTIFF
pub fn write_geotiff_to_buffer<T: RasterElement>(
    raster: &Raster<T>,
    options: Option<GeoTiffOptions>,
) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf), &options.unwrap_or_default())?;
    Ok(buf)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// GeoTIFF tag payloads derived from a raster's metadata.
struct GeoTags {
    pixel_scale: [f64; 3],
    tiepoint: [f64; 6],
    geo_keys: Vec<u16>,
    nodata: Option<String>,
}

impl GeoTags {
    fn for_raster<T: RasterElement>(raster: &Raster<T>) -> Self {
        let gt = raster.transform();
        if !gt.is_north_up() {
            warn!("rotated geotransform written as north-up scale/tiepoint");
        }

        let nodata = raster.nodata().and_then(|nd| nd.to_f64()).map(|v| {
            if T::is_float() {
                v.to_string()
            } else {
                format!("{}", v as i64)
            }
        });

        Self {
            pixel_scale: [gt.pixel_width, gt.pixel_height.abs(), 0.0],
            tiepoint: [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0],
            geo_keys: geo_key_directory(raster.crs()),
            nodata,
        }
    }
}

/// GeoKeyDirectory: header `[1, 1, 0, n]` followed by n key entries.
fn geo_key_directory(crs: Option<&CRS>) -> Vec<u16> {
    let epsg = crs.and_then(|c| c.epsg()).and_then(|code| {
        let key = u16::try_from(code).ok();
        if key.is_none() {
            warn!("EPSG:{code} does not fit a GeoKey SHORT, CRS not written");
        }
        key
    });
    let geographic = crs.is_some_and(|c| c.is_geographic());

    let mut entries: Vec<[u16; 4]> = vec![
        [GT_MODEL_TYPE, 0, 1, if geographic { 2 } else { 1 }],
        [GT_RASTER_TYPE, 0, 1, 1],
    ];
    if let Some(code) = epsg {
        let key = if geographic { GEOGRAPHIC_TYPE } else { PROJECTED_CS_TYPE };
        entries.push([key, 0, 1, code]);
    }

    let mut dir = vec![1, 1, 0, entries.len() as u16];
    dir.extend(entries.iter().flatten());
    dir
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W, options: &GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder = TiffEncoder::new(writer)?;
    let (rows, cols) = raster.shape();
    let tags = GeoTags::for_raster(raster);

    if T::is_float() {
        let data: Vec<f32> = raster
            .data()
            .iter()
            .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
            .collect();
        write_image::<Gray32Float, W>(&mut encoder, cols, rows, &data, &tags, options.compression)
    } else {
        let fill: i32 = raster
            .nodata()
            .and_then(num_traits::cast)
            .unwrap_or(0);
        let data: Vec<i32> = raster
            .data()
            .iter()
            .map(|&v| num_traits::cast(v).unwrap_or(fill))
            .collect();
        write_image::<GrayI32, W>(&mut encoder, cols, rows, &data, &tags, options.compression)
    }
}

fn write_image<C, W>(
    encoder: &mut TiffEncoder<W>,
    cols: usize,
    rows: usize,
    data: &[C::Inner],
    tags: &GeoTags,
    compression: TiffCompression,
) -> Result<()>
where
    C: ColorType,
    W: Write + Seek,
    [C::Inner]: TiffValue,
{
    let (width, height) = (cols as u32, rows as u32);
    match compression {
        TiffCompression::None => write_with::<C, W, _>(encoder, width, height, data, tags, Uncompressed),
        TiffCompression::Lzw => write_with::<C, W, _>(encoder, width, height, data, tags, Lzw::default()),
        TiffCompression::Deflate => {
            write_with::<C, W, _>(encoder, width, height, data, tags, Deflate::default())
        }
    }
}

fn write_with<C, W, D>(
    encoder: &mut TiffEncoder<W>,
    width: u32,
    height: u32,
    data: &[C::Inner],
    tags: &GeoTags,
    compression: D,
) -> Result<()>
where
    C: ColorType,
    W: Write + Seek,
    D: Compression,
    [C::Inner]: TiffValue,
{
    let mut image = encoder.new_image_with_compression::<C, D>(width, height, compression)?;

    let dir = image.encoder();
    dir.write_tag(geo_tag(MODEL_PIXEL_SCALE), &tags.pixel_scale[..])?;
    dir.write_tag(geo_tag(MODEL_TIEPOINT), &tags.tiepoint[..])?;
    dir.write_tag(geo_tag(GEO_KEY_DIRECTORY), tags.geo_keys.as_slice())?;
    if let Some(nodata) = &tags.nodata {
        dir.write_tag(geo_tag(GDAL_NODATA), nodata.as_str())?;
    }

    image.write_data(data)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn decode_geotiff<T, R>(reader: R) -> Result<Raster<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    let mut decoder = Decoder::new(reader)?;
    let (width, height) = decoder.dimensions()?;
    let (rows, cols) = (height as usize, width as usize);

    macro_rules! cast_all {
        ($buf:expr) => {
            $buf.into_iter()
                .map(|v| num_traits::cast(v).unwrap_or(T::default_nodata()))
                .collect::<Vec<T>>()
        };
    }

    let data: Vec<T> = match decoder.read_image()? {
        DecodingResult::U8(buf) => cast_all!(buf),
        DecodingResult::U16(buf) => cast_all!(buf),
        DecodingResult::U32(buf) => cast_all!(buf),
        DecodingResult::U64(buf) => cast_all!(buf),
        DecodingResult::I8(buf) => cast_all!(buf),
        DecodingResult::I16(buf) => cast_all!(buf),
        DecodingResult::I32(buf) => cast_all!(buf),
        DecodingResult::I64(buf) => cast_all!(buf),
        DecodingResult::F32(buf) => cast_all!(buf),
        DecodingResult::F64(buf) => cast_all!(buf),
        #[allow(unreachable_patterns)]
        _ => return Err(Error::UnsupportedDataType("unsupported TIFF sample format".into())),
    };

    // Multi-sample images decode interleaved; keep the first band.
    let data = if data.len() == rows * cols {
        data
    } else if rows * cols > 0 && data.len() % (rows * cols) == 0 {
        let samples = data.len() / (rows * cols);
        data.into_iter().step_by(samples).collect()
    } else {
        return Err(Error::InvalidDimensions { width: cols, height: rows });
    };

    let mut raster = Raster::from_vec(data, rows, cols)?;

    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    raster.set_crs(read_crs(&mut decoder));
    raster.set_nodata(
        decoder
            .get_tag_ascii_string(geo_tag(GDAL_NODATA))
            .ok()
            .and_then(|s| s.trim_end_matches('\0').trim().parse::<f64>().ok())
            .and_then(T::from_f64),
    );

    Ok(raster)
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(geo_tag(MODEL_PIXEL_SCALE)).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(geo_tag(MODEL_TIEPOINT)).ok()?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    // tiepoint [I, J, K, X, Y, Z] ties raster (I, J) to model (X, Y)
    Some(GeoTransform::new(
        tiepoint[3] - tiepoint[0] * scale[0],
        tiepoint[4] + tiepoint[1] * scale[1],
        scale[0],
        -scale[1],
    ))
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder.get_tag_u16_vec(geo_tag(GEO_KEY_DIRECTORY)).ok()?;
    let count = *keys.get(3)? as usize;

    keys[4..]
        .chunks_exact(4)
        .take(count)
        .find(|k| (k[0] == PROJECTED_CS_TYPE || k[0] == GEOGRAPHIC_TYPE) && k[1] == 0 && k[3] > 0)
        .map(|k| CRS::from_epsg(k[3] as u32))
}
