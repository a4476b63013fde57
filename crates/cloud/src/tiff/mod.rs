//! TIFF structure parsing from raw byte ranges.
//!
//! Headers and IFDs are parsed from slices fetched by HTTP Range requests,
//! so nothing here needs `Read + Seek`. Tag values that do not fit inline
//! are resolved separately and stored on the entry.

pub mod codec;
pub mod geokeys;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{CloudError, Result};

pub use geokeys::GeoMeta;

/// Longest IFD chain followed before the file is treated as corrupt.
const MAX_IFDS: usize = 64;

/// Byte order of the TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffByteOrder {
    LittleEndian,
    BigEndian,
}

macro_rules! order_read {
    ($name:ident, $t:ty) => {
        pub fn $name(self, data: &[u8]) -> $t {
            match self {
                Self::LittleEndian => LittleEndian::$name(data),
                Self::BigEndian => BigEndian::$name(data),
            }
        }
    };
}

impl TiffByteOrder {
    order_read!(read_u16, u16);
    order_read!(read_u32, u32);
    order_read!(read_u64, u64);
    order_read!(read_f32, f32);
    order_read!(read_f64, f64);

    /// Read an unsigned integer of `data.len()` bytes (1..=8).
    pub fn read_uint(self, data: &[u8]) -> u64 {
        match self {
            Self::LittleEndian => LittleEndian::read_uint(data, data.len()),
            Self::BigEndian => BigEndian::read_uint(data, data.len()),
        }
    }

    /// Write the low `out.len()` bytes of `value`.
    pub fn write_uint(self, out: &mut [u8], value: u64) {
        let n = out.len();
        let value = if n >= 8 { value } else { value & ((1u64 << (n * 8)) - 1) };
        match self {
            Self::LittleEndian => LittleEndian::write_uint(out, value, n),
            Self::BigEndian => BigEndian::write_uint(out, value, n),
        }
    }
}

/// Well-known TIFF tag IDs.
pub mod tags {
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const ROWS_PER_STRIP: u16 = 278;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const PLANAR_CONFIG: u16 = 284;
    pub const PREDICTOR: u16 = 317;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const SAMPLE_FORMAT: u16 = 339;
    pub const MODEL_PIXEL_SCALE: u16 = 33550;
    pub const MODEL_TIEPOINT: u16 = 33922;
    pub const MODEL_TRANSFORMATION: u16 = 34264;
    pub const GEO_KEY_DIRECTORY: u16 = 34735;
    pub const GDAL_NODATA: u16 = 42113;
}

/// Byte size of one value of a TIFF field type.
fn field_size(field_type: u16) -> Option<usize> {
    match field_type {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 => Some(4),
        5 | 10 | 12 | 16 => Some(8),
        _ => None,
    }
}

/// One IFD entry with its value bytes.
#[derive(Debug, Clone)]
pub struct TagEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u32,
    /// File offset of the value when it does not fit in the entry.
    pub offset: Option<u64>,
    /// Raw value bytes. Empty for out-of-line values until resolved.
    pub data: Vec<u8>,
}

impl TagEntry {
    /// Total byte length of the value.
    pub fn value_len(&self) -> u64 {
        field_size(self.field_type).unwrap_or(1) as u64 * self.count as u64
    }

    pub fn is_resolved(&self) -> bool {
        self.data.len() as u64 >= self.value_len()
    }

    /// Integer values (BYTE, SHORT, LONG, LONG8).
    pub fn uints(&self, order: TiffByteOrder) -> Vec<u64> {
        let size = match self.field_type {
            1 | 7 => 1,
            3 => 2,
            4 => 4,
            16 => 8,
            _ => return Vec::new(),
        };
        self.data
            .chunks_exact(size)
            .take(self.count as usize)
            .map(|b| order.read_uint(b))
            .collect()
    }

    /// Floating point values (FLOAT, DOUBLE); integer fields are widened.
    pub fn floats(&self, order: TiffByteOrder) -> Vec<f64> {
        match self.field_type {
            11 => self
                .data
                .chunks_exact(4)
                .take(self.count as usize)
                .map(|b| order.read_f32(b) as f64)
                .collect(),
            12 => self
                .data
                .chunks_exact(8)
                .take(self.count as usize)
                .map(|b| order.read_f64(b))
                .collect(),
            _ => self.uints(order).into_iter().map(|v| v as f64).collect(),
        }
    }

    /// NUL-terminated ASCII value.
    pub fn ascii(&self) -> String {
        let end = self.data.iter().position(|&b| b == 0).unwrap_or(self.data.len());
        String::from_utf8_lossy(&self.data[..end]).into_owned()
    }
}

/// Parsed TIFF header.
#[derive(Debug, Clone)]
pub struct TiffHeader {
    pub byte_order: TiffByteOrder,
    pub first_ifd_offset: u64,
}

/// Parse the 8-byte classic TIFF header.
pub fn parse_header(data: &[u8]) -> Result<TiffHeader> {
    if data.len() < 8 {
        return Err(invalid("header too short"));
    }

    let byte_order = match (data[0], data[1]) {
        (b'I', b'I') => TiffByteOrder::LittleEndian,
        (b'M', b'M') => TiffByteOrder::BigEndian,
        _ => return Err(invalid("invalid byte order marker")),
    };

    match byte_order.read_u16(&data[2..4]) {
        42 => {}
        43 => return Err(invalid("BigTIFF is not supported")),
        magic => return Err(invalid(format!("expected magic 42, got {magic}"))),
    }

    Ok(TiffHeader {
        byte_order,
        first_ifd_offset: byte_order.read_u32(&data[4..8]) as u64,
    })
}

/// One image file directory.
#[derive(Debug, Clone)]
pub struct Ifd {
    pub entries: Vec<TagEntry>,
    pub next_offset: u64,
}

/// Byte length of the IFD starting at `data`, once its entry count is known.
pub fn ifd_len(order: TiffByteOrder, data: &[u8]) -> Option<usize> {
    (data.len() >= 2).then(|| 2 + order.read_u16(&data[0..2]) as usize * 12 + 4)
}

/// Parse one IFD. `data` must start at the IFD offset.
pub fn parse_ifd(order: TiffByteOrder, data: &[u8]) -> Result<Ifd> {
    let needed = ifd_len(order, data).ok_or_else(|| invalid("IFD too short"))?;
    if data.len() < needed {
        return Err(invalid(format!(
            "IFD needs {needed} bytes but only {} available",
            data.len()
        )));
    }

    let count = (needed - 6) / 12;
    let entries = data[2..2 + count * 12]
        .chunks_exact(12)
        .map(|e| {
            let mut entry = TagEntry {
                tag: order.read_u16(&e[0..2]),
                field_type: order.read_u16(&e[2..4]),
                count: order.read_u32(&e[4..8]),
                offset: None,
                data: Vec::new(),
            };
            let len = entry.value_len();
            if len <= 4 {
                entry.data = e[8..8 + len as usize].to_vec();
            } else {
                entry.offset = Some(order.read_u32(&e[8..12]) as u64);
            }
            entry
        })
        .collect();

    Ok(Ifd {
        entries,
        next_offset: order.read_u32(&data[needed - 4..needed]) as u64,
    })
}

impl Ifd {
    pub fn entry(&self, tag: u16) -> Option<&TagEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    /// Out-of-line values still to fetch, as `(entry index, offset, length)`.
    pub fn pending(&self) -> Vec<(usize, u64, u64)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_resolved())
            .filter_map(|(i, e)| e.offset.map(|off| (i, off, e.value_len())))
            .collect()
    }

    pub fn uint(&self, order: TiffByteOrder, tag: u16) -> Option<u64> {
        self.entry(tag)?.uints(order).first().copied()
    }

    pub fn uints(&self, order: TiffByteOrder, tag: u16) -> Vec<u64> {
        self.entry(tag).map(|e| e.uints(order)).unwrap_or_default()
    }

    pub fn floats(&self, order: TiffByteOrder, tag: u16) -> Option<Vec<f64>> {
        let values = self.entry(tag)?.floats(order);
        (!values.is_empty()).then_some(values)
    }

    pub fn ascii(&self, tag: u16) -> Option<String> {
        self.entry(tag).map(TagEntry::ascii)
    }
}

/// Parse every IFD of a TIFF held entirely in memory, resolving all values.
pub fn parse_tiff(data: &[u8]) -> Result<(TiffByteOrder, Vec<Ifd>)> {
    let header = parse_header(data)?;
    let order = header.byte_order;

    let mut ifds = Vec::new();
    let mut offset = header.first_ifd_offset;
    while offset > 0 {
        if ifds.len() >= MAX_IFDS {
            return Err(invalid("IFD chain too long"));
        }
        let start = usize::try_from(offset).map_err(|_| invalid("IFD offset overflow"))?;
        let mut ifd = parse_ifd(order, data.get(start..).ok_or_else(|| invalid("IFD past end of file"))?)?;
        for (idx, off, len) in ifd.pending() {
            let (off, len) = (off as usize, len as usize);
            let value = data
                .get(off..off + len)
                .ok_or_else(|| invalid(format!("tag {} value past end of file", ifd.entries[idx].tag)))?;
            ifd.entries[idx].data = value.to_vec();
        }
        offset = ifd.next_offset;
        ifds.push(ifd);
    }

    if ifds.is_empty() {
        return Err(CloudError::NoIfd);
    }
    Ok((order, ifds))
}

/// Block layout of one image: tiles for COGs, strips for plain GeoTIFFs.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    pub width: u32,
    pub height: u32,
    pub block_width: u32,
    pub block_height: u32,
    pub tiled: bool,
    pub block_offsets: Vec<u64>,
    pub block_byte_counts: Vec<u64>,
    pub bits_per_sample: u16,
    pub sample_format: u16,
    pub compression: u16,
    pub predictor: u16,
    pub samples_per_pixel: u16,
}

impl ImageLayout {
    /// Read the layout tags of a resolved IFD.
    pub fn from_ifd(order: TiffByteOrder, ifd: &Ifd) -> Result<Self> {
        let width = ifd
            .uint(order, tags::IMAGE_WIDTH)
            .ok_or_else(|| invalid("missing ImageWidth"))? as u32;
        let height = ifd
            .uint(order, tags::IMAGE_LENGTH)
            .ok_or_else(|| invalid("missing ImageLength"))? as u32;
        let short = |tag, default: u16| ifd.uint(order, tag).map(|v| v as u16).unwrap_or(default);

        let samples_per_pixel = short(tags::SAMPLES_PER_PIXEL, 1);
        let planar = short(tags::PLANAR_CONFIG, 1);
        if planar != 1 && samples_per_pixel > 1 {
            return Err(CloudError::UnsupportedPlanarConfig(planar));
        }

        let tiled = ifd.entry(tags::TILE_WIDTH).is_some();
        let (block_width, block_height, offsets, counts) = if tiled {
            (
                ifd.uint(order, tags::TILE_WIDTH).unwrap_or(width as u64) as u32,
                ifd.uint(order, tags::TILE_LENGTH).unwrap_or(height as u64) as u32,
                ifd.uints(order, tags::TILE_OFFSETS),
                ifd.uints(order, tags::TILE_BYTE_COUNTS),
            )
        } else {
            let rows = ifd
                .uint(order, tags::ROWS_PER_STRIP)
                .unwrap_or(height as u64)
                .min(height as u64) as u32;
            (
                width,
                rows,
                ifd.uints(order, tags::STRIP_OFFSETS),
                ifd.uints(order, tags::STRIP_BYTE_COUNTS),
            )
        };

        let layout = Self {
            width,
            height,
            block_width,
            block_height,
            tiled,
            block_offsets: offsets,
            block_byte_counts: counts,
            bits_per_sample: short(tags::BITS_PER_SAMPLE, 1),
            sample_format: short(tags::SAMPLE_FORMAT, codec::sample_format::UNSIGNED_INT),
            compression: short(tags::COMPRESSION, codec::compression::NONE),
            predictor: short(tags::PREDICTOR, codec::predictor::NONE),
            samples_per_pixel,
        };

        if layout.block_width == 0 || layout.block_height == 0 {
            return Err(invalid("zero block size"));
        }
        let blocks = layout.blocks_across() * layout.blocks_down();
        if layout.block_offsets.len() < blocks || layout.block_byte_counts.len() < blocks {
            return Err(invalid(format!(
                "expected {blocks} block offsets, found {}/{}",
                layout.block_offsets.len(),
                layout.block_byte_counts.len()
            )));
        }
        Ok(layout)
    }

    pub fn blocks_across(&self) -> usize {
        (self.width as usize).div_ceil(self.block_width as usize)
    }

    pub fn blocks_down(&self) -> usize {
        (self.height as usize).div_ceil(self.block_height as usize)
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }

    /// Decoded byte size of a full block.
    pub fn block_bytes(&self) -> usize {
        self.block_width as usize
            * self.block_height as usize
            * self.samples_per_pixel as usize
            * self.bytes_per_sample()
    }
}

fn invalid(reason: impl Into<String>) -> CloudError {
    CloudError::InvalidTiff {
        reason: reason.into(),
    }
}
