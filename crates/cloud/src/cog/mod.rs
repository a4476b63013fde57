//! Cloud Optimized GeoTIFF reader.
//!
//! Opens a remote GeoTIFF with a handful of Range requests (header, first
//! IFD and its out-of-line tag values), then reads pixel windows by fetching
//! only the tiles or strips that intersect them. Decoded blocks are kept in
//! an LRU cache keyed by block index.

pub mod window;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use ndarray::Array2;
use tracing::debug;

use lcexport_core::crs::CRS;
use lcexport_core::raster::{GeoTransform, Raster, RasterElement};

use crate::error::{CloudError, Result};
use crate::http::HttpClient;
use crate::tiff::{self, codec, GeoMeta, ImageLayout, TiffByteOrder};

pub use window::{blocks_for_window, pixel_window, BBox, BlockRef, PixelWindow};

/// Options for configuring a [`CogReader`].
#[derive(Debug, Clone)]
pub struct CogReaderOptions {
    /// Maximum number of concurrent block fetches (default: 8).
    pub max_concurrent_fetches: usize,
    /// Number of decoded blocks kept in the LRU cache (default: 128).
    pub cache_capacity: usize,
    /// Timeout per HTTP request (default: 30 s).
    pub request_timeout: Duration,
    /// Maximum retries on transient failures (default: 3).
    pub max_retries: u32,
    /// Bytes fetched up front for the header and first IFD (default: 16 KiB).
    pub header_bytes: u64,
}

impl Default for CogReaderOptions {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 8,
            cache_capacity: 128,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            header_bytes: 16 * 1024,
        }
    }
}

/// Metadata exposed by [`CogReader::metadata`].
#[derive(Debug, Clone)]
pub struct CogMetadata {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub block_width: u32,
    pub block_height: u32,
    pub tiled: bool,
    pub bits_per_sample: u16,
    pub sample_format: u16,
    pub compression: u16,
    pub predictor: u16,
    pub transform: GeoTransform,
    pub crs: Option<CRS>,
    pub nodata: Option<f64>,
    pub overview_count: usize,
}

/// Where the file bytes come from.
enum Source {
    Http { client: HttpClient, url: String },
    Memory(Arc<[u8]>),
}

impl Source {
    fn name(&self) -> &str {
        match self {
            Self::Http { url, .. } => url,
            Self::Memory(_) => "<memory>",
        }
    }

    async fn fetch_ranges(&self, ranges: &[(u64, u64)]) -> Result<Vec<Vec<u8>>> {
        match self {
            Self::Http { client, url } => client.fetch_ranges(url, ranges).await,
            Self::Memory(data) => Ok(ranges
                .iter()
                .map(|&(off, len)| {
                    let start = (off as usize).min(data.len());
                    let end = (off.saturating_add(len) as usize).min(data.len());
                    data[start..end].to_vec()
                })
                .collect()),
        }
    }

    async fn fetch_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut out = self.fetch_ranges(&[(offset, length)]).await?;
        Ok(out.pop().unwrap_or_default())
    }
}

/// Bytes already fetched from the start of the file.
struct Prefix(Vec<u8>);

impl Prefix {
    /// Exactly `length` bytes at `offset`, from the prefix when it covers them.
    async fn read(&self, source: &Source, offset: u64, length: u64) -> Result<Vec<u8>> {
        let (start, end) = (offset as usize, offset.saturating_add(length) as usize);
        let bytes = match self.0.get(start..end) {
            Some(slice) => slice.to_vec(),
            None => source.fetch_range(offset, length).await?,
        };
        if (bytes.len() as u64) < length {
            return Err(CloudError::InvalidTiff {
                reason: format!("{length} bytes at offset {offset} run past end of file"),
            });
        }
        Ok(bytes)
    }
}

/// Cloud Optimized GeoTIFF reader.
pub struct CogReader {
    source: Source,
    order: TiffByteOrder,
    layout: ImageLayout,
    geo: GeoMeta,
    overview_count: usize,
    cache: LruCache<usize, Arc<Vec<u8>>>,
    options: CogReaderOptions,
}

impl CogReader {
    /// Open a remote GeoTIFF by URL.
    pub async fn open(url: &str, options: CogReaderOptions) -> Result<Self> {
        let client = HttpClient::new(options.request_timeout, options.max_retries)?;
        Self::open_with_client(client, url, options).await
    }

    /// Open a remote GeoTIFF reusing an existing HTTP client.
    pub async fn open_with_client(
        client: HttpClient,
        url: &str,
        options: CogReaderOptions,
    ) -> Result<Self> {
        let size = match client.head(url).await {
            Ok(info) => info.content_length,
            Err(e) => {
                debug!("HEAD {url} failed ({e}), file size unknown");
                None
            }
        };
        let source = Source::Http {
            client,
            url: url.to_string(),
        };
        let prefix_len = size.map_or(options.header_bytes, |s| s.min(options.header_bytes));
        Self::from_source(source, prefix_len, options).await
    }

    /// Read a GeoTIFF already held in memory.
    pub async fn from_bytes(data: Vec<u8>, options: CogReaderOptions) -> Result<Self> {
        let len = data.len() as u64;
        Self::from_source(Source::Memory(data.into()), len, options).await
    }

    async fn from_source(source: Source, prefix_len: u64, options: CogReaderOptions) -> Result<Self> {
        let prefix = Prefix(source.fetch_range(0, prefix_len).await?);
        let header = tiff::parse_header(&prefix.0)?;
        let order = header.byte_order;
        if header.first_ifd_offset == 0 {
            return Err(CloudError::NoIfd);
        }

        let mut first = read_ifd(&source, &prefix, order, header.first_ifd_offset).await?;
        for (idx, offset, len) in first.pending() {
            first.entries[idx].data = prefix.read(&source, offset, len).await?;
        }

        // Remaining IFDs are overviews or masks; only count them.
        let mut overview_count = 0;
        let mut next = first.next_offset;
        while next > 0 && overview_count < 64 {
            next = read_ifd(&source, &prefix, order, next).await?.next_offset;
            overview_count += 1;
        }

        let layout = ImageLayout::from_ifd(order, &first)?;
        let geo = GeoMeta::from_ifd(order, &first);
        debug!(
            "opened {}: {}x{} {} {}x{}, compression {}, {} overviews",
            source.name(),
            layout.width,
            layout.height,
            if layout.tiled { "tiles" } else { "strips" },
            layout.block_width,
            layout.block_height,
            layout.compression,
            overview_count
        );

        let capacity = NonZeroUsize::new(options.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            source,
            order,
            layout,
            geo,
            overview_count,
            cache: LruCache::new(capacity),
            options,
        })
    }

    /// Return metadata about the image.
    pub fn metadata(&self) -> CogMetadata {
        let l = &self.layout;
        CogMetadata {
            url: self.source.name().to_string(),
            width: l.width,
            height: l.height,
            block_width: l.block_width,
            block_height: l.block_height,
            tiled: l.tiled,
            bits_per_sample: l.bits_per_sample,
            sample_format: l.sample_format,
            compression: l.compression,
            predictor: l.predictor,
            transform: self.geo.transform,
            crs: self.geo.crs.clone(),
            nodata: self.geo.nodata,
            overview_count: self.overview_count,
        }
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.geo.crs.as_ref()
    }

    /// Image extent as a box in the image CRS.
    pub fn bounds(&self) -> BBox {
        BBox::from_bounds(
            self.geo
                .transform
                .bounds(self.layout.width as usize, self.layout.height as usize),
        )
    }

    /// Pixel window covering `bbox`, if it overlaps the image.
    pub fn window_for(&self, bbox: &BBox) -> Option<PixelWindow> {
        pixel_window(
            bbox,
            &self.geo.transform,
            self.layout.width as usize,
            self.layout.height as usize,
        )
    }

    /// Read the pixels covering `bbox` (in the image CRS).
    pub async fn read_bbox<T: RasterElement>(&mut self, bbox: &BBox) -> Result<Raster<T>> {
        let window = self.window_for(bbox).ok_or(CloudError::BBoxOutside)?;
        self.read_window(window).await
    }

    /// Read a pixel window into a georeferenced raster.
    pub async fn read_window<T: RasterElement>(&mut self, window: PixelWindow) -> Result<Raster<T>> {
        let blocks = blocks_for_window(&window, &self.layout);
        let mut fresh: HashMap<usize, Arc<Vec<u8>>> = HashMap::new();

        let missing: Vec<usize> = blocks
            .iter()
            .map(|b| b.index)
            .filter(|&i| !self.cache.contains(&i) && self.layout.block_byte_counts[i] > 0)
            .collect();
        debug!(
            "window {:?}: {} blocks, {} to fetch",
            window,
            blocks.len(),
            missing.len()
        );

        for chunk in missing.chunks(self.options.max_concurrent_fetches.max(1)) {
            let ranges: Vec<(u64, u64)> = chunk
                .iter()
                .map(|&i| (self.layout.block_offsets[i], self.layout.block_byte_counts[i]))
                .collect();
            let fetched = self.source.fetch_ranges(&ranges).await?;
            for (&index, raw) in chunk.iter().zip(fetched) {
                let decoded = Arc::new(self.decode_block(&raw)?);
                self.cache.put(index, Arc::clone(&decoded));
                fresh.insert(index, decoded);
            }
        }

        let fill = self
            .geo
            .nodata
            .and_then(T::from_f64)
            .unwrap_or_else(T::default_nodata);
        let mut out = Array2::<T>::from_elem((window.rows, window.cols), fill);

        for block in &blocks {
            let bytes = match fresh.get(&block.index) {
                Some(b) => Arc::clone(b),
                None => match self.cache.get(&block.index) {
                    Some(b) => Arc::clone(b),
                    None => continue, // sparse block
                },
            };
            let values: Vec<T> = codec::decode_samples(
                &bytes,
                self.order,
                self.layout.bits_per_sample,
                self.layout.sample_format,
                self.layout.samples_per_pixel,
            )?;
            self.paste_block(block, &values, &window, &mut out);
        }

        let mut raster = Raster::from_array(out);
        raster.set_transform(self.geo.transform.window(window.col0, window.row0));
        raster.set_crs(self.geo.crs.clone());
        raster.set_nodata(self.geo.nodata.and_then(T::from_f64));
        Ok(raster)
    }

    fn decode_block(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let l = &self.layout;
        let mut bytes = codec::decompress(raw, l.compression, l.block_bytes())?;
        codec::undo_predictor(
            &mut bytes,
            self.order,
            l.predictor,
            l.bytes_per_sample(),
            l.samples_per_pixel as usize,
            l.block_width as usize,
        )?;
        Ok(bytes)
    }

    /// Copy the part of a decoded block that falls inside the window.
    fn paste_block<T: RasterElement>(
        &self,
        block: &BlockRef,
        values: &[T],
        window: &PixelWindow,
        out: &mut Array2<T>,
    ) {
        let bw = self.layout.block_width as usize;
        let bh = self.layout.block_height as usize;
        let x0 = block.block_col * bw;
        let y0 = block.block_row * bh;
        // the last strip may hold fewer rows
        let block_rows = (values.len() / bw).min(bh);

        let cols = window.col0.max(x0)..window.col_end().min(x0 + bw);
        let rows = window.row0.max(y0)..window.row_end().min(y0 + block_rows);

        for img_row in rows {
            let src = (img_row - y0) * bw;
            for img_col in cols.clone() {
                out[(img_row - window.row0, img_col - window.col0)] = values[src + img_col - x0];
            }
        }
    }
}

async fn read_ifd(
    source: &Source,
    prefix: &Prefix,
    order: TiffByteOrder,
    offset: u64,
) -> Result<tiff::Ifd> {
    let count = prefix.read(source, offset, 2).await?;
    let len = tiff::ifd_len(order, &count).unwrap_or(6) as u64;
    let bytes = prefix.read(source, offset, len).await?;
    tiff::parse_ifd(order, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lcexport_core::io::{write_geotiff_to_buffer, GeoTiffOptions, TiffCompression};

    /// 20 x 30 raster, value = row * 100 + col, 10 m pixels in UTM 53S.
    fn fixture(compression: TiffCompression) -> Vec<u8> {
        let data: Vec<i32> = (0..20)
            .flat_map(|r| (0..30).map(move |c| r * 100 + c))
            .collect();
        let raster = Raster::from_vec(data, 20, 30)
            .unwrap()
            .with_georef(
                GeoTransform::new(250_000.0, 8_600_000.0, 10.0, -10.0),
                Some(CRS::from_epsg(32753)),
            )
            .with_nodata(Some(-1));
        write_geotiff_to_buffer(&raster, Some(GeoTiffOptions { compression })).unwrap()
    }

    #[tokio::test]
    async fn metadata_from_memory() {
        let reader = CogReader::from_bytes(fixture(TiffCompression::None), CogReaderOptions::default())
            .await
            .unwrap();
        let meta = reader.metadata();
        assert_eq!((meta.width, meta.height), (30, 20));
        assert_eq!(meta.crs.and_then(|c| c.epsg()), Some(32753));
        assert_eq!(meta.nodata, Some(-1.0));
        assert_eq!(meta.overview_count, 0);
        assert_eq!(reader.bounds(), BBox::new(250_000.0, 8_599_800.0, 250_300.0, 8_600_000.0));
    }

    #[tokio::test]
    async fn bbox_read_matches_source_pixels() {
        for compression in [TiffCompression::None, TiffCompression::Lzw, TiffCompression::Deflate] {
            let mut reader = CogReader::from_bytes(fixture(compression), CogReaderOptions::default())
                .await
                .unwrap();

            // cols 5..12, rows 3..9
            let bbox = BBox::new(250_050.0, 8_599_910.0, 250_120.0, 8_599_970.0);
            let raster: Raster<i32> = reader.read_bbox(&bbox).await.unwrap();
            assert_eq!(raster.shape(), (6, 7));
            assert_eq!(raster.get(0, 0).unwrap(), 305);
            assert_eq!(raster.get(5, 6).unwrap(), 811);
            assert_eq!(raster.transform().origin_x, 250_050.0);
            assert_eq!(raster.transform().origin_y, 8_599_970.0);
            assert_eq!(raster.nodata(), Some(-1));
        }
    }

    #[tokio::test]
    async fn cached_blocks_survive_small_cache() {
        let options = CogReaderOptions {
            cache_capacity: 1,
            ..Default::default()
        };
        let mut reader = CogReader::from_bytes(fixture(TiffCompression::Deflate), options)
            .await
            .unwrap();
        let full = reader.bounds();
        let first: Raster<i32> = reader.read_bbox(&full).await.unwrap();
        let second: Raster<i32> = reader.read_bbox(&full).await.unwrap();
        assert_eq!(first.data(), second.data());
        assert_eq!(second.get(19, 29).unwrap(), 1929);
    }

    #[tokio::test]
    async fn bbox_outside_image() {
        let mut reader = CogReader::from_bytes(fixture(TiffCompression::None), CogReaderOptions::default())
            .await
            .unwrap();
        let err = reader
            .read_bbox::<i32>(&BBox::new(0.0, 0.0, 10.0, 10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::BBoxOutside));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let result = CogReader::from_bytes(b"not a tiff at all".to_vec(), CogReaderOptions::default()).await;
        assert!(matches!(result, Err(CloudError::InvalidTiff { .. })));
    }
}
