//! Block decompression, predictor reversal and sample decoding.
//!
//! DEFLATE goes through `flate2`, LZW through `weezl`; each is behind the
//! cargo feature of the same name.

use lcexport_core::RasterElement;

use super::TiffByteOrder;
use crate::error::{CloudError, Result};

/// TIFF compression codes.
pub mod compression {
    pub const NONE: u16 = 1;
    pub const LZW: u16 = 5;
    pub const DEFLATE: u16 = 8;
    pub const ADOBE_DEFLATE: u16 = 32946;
}

/// TIFF sample format codes.
pub mod sample_format {
    pub const UNSIGNED_INT: u16 = 1;
    pub const SIGNED_INT: u16 = 2;
    pub const FLOAT: u16 = 3;
}

/// TIFF predictor codes.
pub mod predictor {
    pub const NONE: u16 = 1;
    pub const HORIZONTAL: u16 = 2;
}

/// Decompress one tile or strip.
pub fn decompress(data: &[u8], compression_code: u16, expected_len: usize) -> Result<Vec<u8>> {
    match compression_code {
        compression::NONE => Ok(data.to_vec()),

        #[cfg(feature = "deflate")]
        compression::DEFLATE | compression::ADOBE_DEFLATE => {
            use std::io::Read;
            // TIFF 6.0 deflate is zlib-wrapped; some writers emit raw deflate
            let mut out = Vec::with_capacity(expected_len);
            if flate2::read::ZlibDecoder::new(data).read_to_end(&mut out).is_ok() {
                return Ok(out);
            }
            out.clear();
            flate2::read::DeflateDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| CloudError::Decompress(format!("DEFLATE: {e}")))?;
            Ok(out)
        }

        #[cfg(feature = "lzw")]
        compression::LZW => {
            let mut decoder =
                weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
            decoder
                .decode(data)
                .map_err(|e| CloudError::Decompress(format!("LZW: {e}")))
        }

        other => Err(CloudError::UnsupportedCompression(other)),
    }
}

/// Reverse horizontal differencing in place, row by row.
pub fn undo_predictor(
    buf: &mut [u8],
    order: TiffByteOrder,
    predictor_code: u16,
    bytes_per_sample: usize,
    samples_per_pixel: usize,
    row_width: usize,
) -> Result<()> {
    match predictor_code {
        predictor::NONE => Ok(()),
        predictor::HORIZONTAL => {
            let row_bytes = row_width * samples_per_pixel * bytes_per_sample;
            if row_bytes == 0 || bytes_per_sample == 0 || bytes_per_sample > 8 {
                return Ok(());
            }
            let stride = samples_per_pixel * bytes_per_sample;
            for row in buf.chunks_mut(row_bytes) {
                let mut at = stride;
                while at + bytes_per_sample <= row.len() {
                    let prev = order.read_uint(&row[at - stride..at - stride + bytes_per_sample]);
                    let cur = order.read_uint(&row[at..at + bytes_per_sample]);
                    order.write_uint(&mut row[at..at + bytes_per_sample], cur.wrapping_add(prev));
                    at += bytes_per_sample;
                }
            }
            Ok(())
        }
        other => Err(CloudError::UnsupportedPredictor(other)),
    }
}

/// Decode raw samples into `T`, keeping the first sample of each pixel.
///
/// Values that do not fit `T` become `T::default_nodata()`.
pub fn decode_samples<T: RasterElement>(
    raw: &[u8],
    order: TiffByteOrder,
    bits_per_sample: u16,
    sample_format: u16,
    samples_per_pixel: u16,
) -> Result<Vec<T>> {
    type Reader = fn(TiffByteOrder, &[u8]) -> f64;

    let read: Reader = match (bits_per_sample, sample_format) {
        (8, sample_format::UNSIGNED_INT) => |_, b| b[0] as f64,
        (8, sample_format::SIGNED_INT) => |_, b| b[0] as i8 as f64,
        (16, sample_format::UNSIGNED_INT) => |o, b| o.read_u16(b) as f64,
        (16, sample_format::SIGNED_INT) => |o, b| o.read_u16(b) as i16 as f64,
        (32, sample_format::UNSIGNED_INT) => |o, b| o.read_u32(b) as f64,
        (32, sample_format::SIGNED_INT) => |o, b| o.read_u32(b) as i32 as f64,
        (64, sample_format::UNSIGNED_INT) => |o, b| o.read_u64(b) as f64,
        (64, sample_format::SIGNED_INT) => |o, b| o.read_u64(b) as i64 as f64,
        (32, sample_format::FLOAT) => |o, b| o.read_f32(b) as f64,
        (64, sample_format::FLOAT) => |o, b| o.read_f64(b),
        (bps, sf) => return Err(CloudError::UnsupportedDataType { bps, sf }),
    };

    let size = bits_per_sample as usize / 8;
    let stride = size * samples_per_pixel.max(1) as usize;
    if raw.len() % stride != 0 {
        return Err(CloudError::Decompress(format!(
            "raw data length {} not aligned to pixel size {stride}",
            raw.len()
        )));
    }

    Ok(raw
        .chunks_exact(stride)
        .map(|px| T::from_f64(read(order, &px[..size])).unwrap_or_else(T::default_nodata))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncompressed_passthrough() {
        let data = vec![1, 2, 3, 4];
        assert_eq!(decompress(&data, compression::NONE, 4).unwrap(), data);
    }

    #[test]
    fn unknown_compression_rejected() {
        assert!(matches!(
            decompress(&[0], 7, 1),
            Err(CloudError::UnsupportedCompression(7))
        ));
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn deflate_zlib_and_raw() {
        use std::io::Write;
        let original: Vec<u8> = (0..=255u8).cycle().take(1024).collect();

        let mut zlib = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        zlib.write_all(&original).unwrap();
        let zlib = zlib.finish().unwrap();
        assert_eq!(decompress(&zlib, compression::DEFLATE, 1024).unwrap(), original);

        let mut raw = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        raw.write_all(&original).unwrap();
        let raw = raw.finish().unwrap();
        assert_eq!(decompress(&raw, compression::ADOBE_DEFLATE, 1024).unwrap(), original);
    }

    #[cfg(feature = "lzw")]
    #[test]
    fn lzw_tiff_variant() {
        let original = vec![5u8; 300];
        let encoded = weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
            .encode(&original)
            .unwrap();
        assert_eq!(decompress(&encoded, compression::LZW, 300).unwrap(), original);
    }

    #[test]
    fn horizontal_predictor_bytes() {
        // two rows of 4 pixels: [1,1,1,1] and [10,0,0,1] differenced
        let mut buf = vec![1, 0, 0, 0, 10, 246, 0, 1];
        undo_predictor(&mut buf, TiffByteOrder::LittleEndian, predictor::HORIZONTAL, 1, 1, 4)
            .unwrap();
        assert_eq!(buf, vec![1, 1, 1, 1, 10, 0, 0, 1]);
    }

    #[test]
    fn horizontal_predictor_u16_big_endian() {
        let mut buf = Vec::new();
        for v in [100u16, 5, 65535] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        undo_predictor(&mut buf, TiffByteOrder::BigEndian, predictor::HORIZONTAL, 2, 1, 3).unwrap();
        let decoded: Vec<i32> =
            decode_samples(&buf, TiffByteOrder::BigEndian, 16, sample_format::UNSIGNED_INT, 1)
                .unwrap();
        assert_eq!(decoded, vec![100, 105, 104]);
    }

    #[test]
    fn floating_point_predictor_rejected() {
        let mut buf = vec![0u8; 8];
        assert!(undo_predictor(&mut buf, TiffByteOrder::LittleEndian, 3, 4, 1, 2).is_err());
    }

    #[test]
    fn decode_i32_little_endian() {
        let mut raw = Vec::new();
        for v in [0i32, 7, -1] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let values: Vec<i32> =
            decode_samples(&raw, TiffByteOrder::LittleEndian, 32, sample_format::SIGNED_INT, 1)
                .unwrap();
        assert_eq!(values, vec![0, 7, -1]);
    }

    #[test]
    fn decode_keeps_first_band() {
        let raw = [1u8, 200, 2, 200, 3, 200];
        let values: Vec<u8> =
            decode_samples(&raw, TiffByteOrder::LittleEndian, 8, sample_format::UNSIGNED_INT, 2)
                .unwrap();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn out_of_range_values_become_nodata() {
        let raw = 300u16.to_le_bytes();
        let values: Vec<u8> =
            decode_samples(&raw, TiffByteOrder::LittleEndian, 16, sample_format::UNSIGNED_INT, 1)
                .unwrap();
        assert_eq!(values, vec![0]);
    }

    #[test]
    fn float_samples() {
        let mut raw = Vec::new();
        for v in [1.0f32, 2.5] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let values: Vec<f64> =
            decode_samples(&raw, TiffByteOrder::LittleEndian, 32, sample_format::FLOAT, 1).unwrap();
        approx::assert_relative_eq!(values[1], 2.5);
    }
}
