//! Optional TOML configuration file.
//!
//! ```toml
//! [catalog]
//! url = "pc"
//! collection = "io-lulc-annual-v02"
//! asset = "data"
//!
//! [export]
//! output_dir = "exports/kakadu"
//! prefix = "io_land_cover"
//! compression = "deflate"
//! start_year = 2017
//! end_year = 2023
//! fail_fast = false
//!
//! [http]
//! timeout_secs = 30
//! retries = 3
//! max_items = 1000
//! ```
//!
//! Every key is optional; command-line flags take precedence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use lcexport_cloud::export::{ExportOptions, FailurePolicy, YearRange};
use lcexport_cloud::{StacCatalog, StacClientOptions};
use lcexport_core::io::{GeoTiffOptions, TiffCompression};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub catalog: CatalogSection,
    pub export: ExportSection,
    pub http: HttpSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogSection {
    /// `pc`, `es` or a STAC API root URL.
    pub url: Option<String>,
    pub collection: Option<String>,
    pub asset: Option<String>,
    pub sas_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportSection {
    pub output_dir: Option<PathBuf>,
    pub prefix: Option<String>,
    pub compression: Option<String>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub fail_fast: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
    pub max_items: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Values given on the command line; `None` falls back to the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub catalog: Option<String>,
    pub collection: Option<String>,
    pub asset: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub prefix: Option<String>,
    pub compression: Option<String>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub fail_fast: bool,
}

/// Fully resolved run settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub catalog: StacCatalog,
    pub client: StacClientOptions,
    pub export: ExportOptions,
    pub output_dir: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(file: FileConfig, cli: Overrides) -> Result<Self> {
        let catalog = cli
            .catalog
            .or(file.catalog.url)
            .map_or(StacCatalog::PlanetaryComputer, |s| StacCatalog::from_str_or_url(&s));

        let mut client = StacClientOptions::default();
        if let Some(secs) = file.http.timeout_secs {
            client.request_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = file.http.retries {
            client.max_retries = retries;
        }
        if let Some(max) = file.http.max_items {
            client.max_items = max;
        }
        if let Some(endpoint) = file.catalog.sas_endpoint {
            client.sas_endpoint = endpoint;
        }

        let compression = match cli.compression.or(file.export.compression) {
            Some(s) => s.parse::<TiffCompression>()?,
            None => TiffCompression::default(),
        };

        let years = match (
            cli.start_year.or(file.export.start_year),
            cli.end_year.or(file.export.end_year),
        ) {
            (None, None) => None,
            (Some(start), None) => Some(YearRange::new(start, start)?),
            (None, Some(end)) => Some(YearRange::new(end, end)?),
            (Some(start), Some(end)) => Some(YearRange::new(start, end)?),
        };

        let defaults = ExportOptions::default();
        let export = ExportOptions {
            collection: cli.collection.or(file.catalog.collection).unwrap_or(defaults.collection),
            asset: cli.asset.or(file.catalog.asset).unwrap_or(defaults.asset),
            prefix: cli.prefix.or(file.export.prefix).unwrap_or(defaults.prefix),
            years,
            geotiff: GeoTiffOptions { compression },
            failure_policy: if cli.fail_fast || file.export.fail_fast.unwrap_or(false) {
                FailurePolicy::Abort
            } else {
                FailurePolicy::Continue
            },
            all_touched: defaults.all_touched,
        };

        Ok(Self {
            catalog,
            client,
            export,
            output_dir: cli.output_dir.or(file.export.output_dir),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_gives_defaults() {
        let s = Settings::resolve(FileConfig::default(), Overrides::default()).unwrap();
        assert_eq!(s.catalog, StacCatalog::PlanetaryComputer);
        assert_eq!(s.export.collection, "io-lulc-annual-v02");
        assert_eq!(s.export.prefix, "io_land_cover");
        assert_eq!(s.export.failure_policy, FailurePolicy::Continue);
        assert_eq!(s.export.geotiff.compression, TiffCompression::Deflate);
        assert!(s.export.years.is_none());
        assert!(s.output_dir.is_none());
    }

    #[test]
    fn file_values_are_loaded() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
[catalog]
url = "https://stac.example.com/v1"
collection = "io-lulc-9-class"

[export]
output_dir = "out/kakadu"
compression = "lzw"
start_year = 2017
end_year = 2020
fail_fast = true

[http]
timeout_secs = 5
max_items = 50
"#
        )
        .unwrap();

        let file = FileConfig::load(f.path()).unwrap();
        let s = Settings::resolve(file, Overrides::default()).unwrap();
        assert_eq!(s.catalog, StacCatalog::Custom("https://stac.example.com/v1".into()));
        assert_eq!(s.export.collection, "io-lulc-9-class");
        assert_eq!(s.export.geotiff.compression, TiffCompression::Lzw);
        assert_eq!(s.export.years, Some(YearRange { start: 2017, end: 2020 }));
        assert_eq!(s.export.failure_policy, FailurePolicy::Abort);
        assert_eq!(s.client.request_timeout, Duration::from_secs(5));
        assert_eq!(s.client.max_items, 50);
        assert_eq!(s.output_dir, Some(PathBuf::from("out/kakadu")));
    }

    #[test]
    fn flags_override_file() {
        let file = FileConfig::parse(
            r#"
[catalog]
url = "es"
[export]
start_year = 2017
end_year = 2023
prefix = "lulc"
"#,
        )
        .unwrap();
        let cli = Overrides {
            catalog: Some("pc".into()),
            end_year: Some(2019),
            prefix: Some("kakadu".into()),
            ..Default::default()
        };
        let s = Settings::resolve(file, cli).unwrap();
        assert_eq!(s.catalog, StacCatalog::PlanetaryComputer);
        assert_eq!(s.export.years, Some(YearRange { start: 2017, end: 2019 }));
        assert_eq!(s.export.prefix, "kakadu");
    }

    #[test]
    fn single_year_and_bad_values() {
        let cli = Overrides {
            start_year: Some(2021),
            ..Default::default()
        };
        let s = Settings::resolve(FileConfig::default(), cli).unwrap();
        assert_eq!(s.export.years, Some(YearRange { start: 2021, end: 2021 }));

        let reversed = Overrides {
            start_year: Some(2023),
            end_year: Some(2017),
            ..Default::default()
        };
        assert!(Settings::resolve(FileConfig::default(), reversed).is_err());

        let bad = Overrides {
            compression: Some("jpeg".into()),
            ..Default::default()
        };
        assert!(Settings::resolve(FileConfig::default(), bad).is_err());
        assert!(FileConfig::parse("[export]\nunknown = 1").is_err());
    }
}
