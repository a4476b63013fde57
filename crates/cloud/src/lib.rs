//! # lcexport cloud
//!
//! STAC search, Planetary Computer asset signing, Cloud Optimized GeoTIFF
//! range reading and the annual land-cover export pipeline.
//!
//! ## Features
//!
//! - `deflate` (default): DEFLATE decompression via `flate2`
//! - `lzw` (default): LZW decompression via `weezl`

pub mod blocking;
pub mod cog;
pub mod error;
pub mod export;
pub mod http;
pub mod reproject;
pub mod stac_client;
pub mod stac_models;
pub mod tiff;

pub use blocking::StacSource;
pub use cog::{BBox, CogMetadata, CogReader, CogReaderOptions};
pub use error::{CloudError, Result};
pub use export::{
    run_export, run_export_with_progress, ExportEvent, ExportOptions, ExportReport,
    FailurePolicy, ItemSource, SkipReason, YearRange,
};
pub use stac_client::{StacCatalog, StacClient, StacClientOptions};
pub use stac_models::{StacItem, StacItemCollection, StacSearchParams};
