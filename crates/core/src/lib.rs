//! # lcexport core
//!
//! Core types and I/O for exporting annual land-cover rasters.
//!
//! This crate provides:
//! - `Raster<T>`: generic georeferenced grid
//! - `GeoTransform`: affine transformation for georeferencing
//! - `CRS`: coordinate reference system identifiers
//! - `Aoi`: area-of-interest geometry read from GeoJSON, plus rasterized masks
//! - Land-cover class table for the 9-class annual product
//! - Native GeoTIFF reading and writing

pub mod crs;
pub mod error;
pub mod io;
pub mod landcover;
pub mod raster;
pub mod vector;

pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{GeoTransform, Raster, RasterElement};
pub use vector::Aoi;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
    pub use crate::vector::Aoi;
}
