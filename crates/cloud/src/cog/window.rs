//! Mapping between georeferenced boxes, pixel windows and image blocks.

use lcexport_core::raster::GeoTransform;

use crate::tiff::ImageLayout;

/// Tolerance for snapping bbox edges that sit on a pixel edge.
const EDGE_EPS: f64 = 1e-6;

/// An axis-aligned box in some CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// From a `(min_x, min_y, max_x, max_y)` tuple.
    pub fn from_bounds(b: (f64, f64, f64, f64)) -> Self {
        Self::new(b.0, b.1, b.2, b.3)
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// `[west, south, east, north]`, the STAC order.
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

/// A rectangle of pixels: `cols x rows` starting at `(col0, row0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col0: usize,
    pub row0: usize,
    pub cols: usize,
    pub rows: usize,
}

impl PixelWindow {
    pub fn col_end(&self) -> usize {
        self.col0 + self.cols
    }

    pub fn row_end(&self) -> usize {
        self.row0 + self.rows
    }
}

/// Pixel window covering `bbox`, rounded outward and clamped to the image.
///
/// `None` when the bbox does not overlap the image.
pub fn pixel_window(
    bbox: &BBox,
    transform: &GeoTransform,
    width: usize,
    height: usize,
) -> Option<PixelWindow> {
    let (col_a, row_a) = transform.geo_to_pixel(bbox.min_x, bbox.max_y);
    let (col_b, row_b) = transform.geo_to_pixel(bbox.max_x, bbox.min_y);
    if !(col_a.is_finite() && col_b.is_finite() && row_a.is_finite() && row_b.is_finite()) {
        return None;
    }

    let clamp = |v: f64, max: usize| v.max(0.0).min(max as f64) as usize;
    let col0 = clamp((col_a.min(col_b) + EDGE_EPS).floor(), width);
    let col1 = clamp((col_a.max(col_b) - EDGE_EPS).ceil(), width);
    let row0 = clamp((row_a.min(row_b) + EDGE_EPS).floor(), height);
    let row1 = clamp((row_a.max(row_b) - EDGE_EPS).ceil(), height);

    (col0 < col1 && row0 < row1).then(|| PixelWindow {
        col0,
        row0,
        cols: col1 - col0,
        rows: row1 - row0,
    })
}

/// One tile or strip of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    /// Index into the offsets/byte-counts arrays.
    pub index: usize,
    pub block_col: usize,
    pub block_row: usize,
}

/// Blocks intersecting a pixel window, row-major.
pub fn blocks_for_window(window: &PixelWindow, layout: &ImageLayout) -> Vec<BlockRef> {
    let bw = layout.block_width as usize;
    let bh = layout.block_height as usize;
    let across = layout.blocks_across();

    let cols = window.col0 / bw..window.col_end().div_ceil(bw).min(across);
    let rows = window.row0 / bh..window.row_end().div_ceil(bh).min(layout.blocks_down());

    rows.flat_map(|block_row| {
        cols.clone().map(move |block_col| BlockRef {
            index: block_row * across + block_col,
            block_col,
            block_row,
        })
    })
    .collect()
}
