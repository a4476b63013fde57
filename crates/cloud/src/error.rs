//! Error types for catalog access, remote GeoTIFF reading and export.

use thiserror::Error;

/// Errors produced by the cloud crate.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server does not support Range requests for {url}")]
    RangeNotSupported { url: String },

    #[error("invalid TIFF: {reason}")]
    InvalidTiff { reason: String },

    #[error("unsupported compression: {0}")]
    UnsupportedCompression(u16),

    #[error("unsupported predictor: {0}")]
    UnsupportedPredictor(u16),

    #[error("unsupported data type: bits_per_sample={bps}, sample_format={sf}")]
    UnsupportedDataType { bps: u16, sf: u16 },

    #[error("unsupported planar configuration: {0} (only chunky=1 supported)")]
    UnsupportedPlanarConfig(u16),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("no IFD entries found in TIFF")]
    NoIfd,

    #[error("bbox does not intersect raster extent")]
    BBoxOutside,

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("unsupported CRS for reprojection: {0}")]
    UnsupportedCrs(String),

    #[error("catalog items use different CRS: {first} and {other} (item {item})")]
    CrsMismatch {
        first: String,
        other: String,
        item: String,
    },

    #[error("item {item} has no CRS (proj:code / proj:epsg)")]
    MissingCrs { item: String },

    #[error("item {item} has no asset '{asset}'")]
    MissingAsset { item: String, asset: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("core error: {0}")]
    Core(#[from] lcexport_core::Error),
}

/// Result alias for cloud operations.
pub type Result<T> = std::result::Result<T, CloudError>;
