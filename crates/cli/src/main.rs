//! lcexport CLI - annual land-cover exports for an area of interest

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use lcexport_cloud::export::{group_by_year, run_export_with_progress, ExportEvent, SkipReason};
use lcexport_cloud::{BBox, CogReaderOptions, ItemSource, StacSource};
use lcexport_core::io::read_geotiff;
use lcexport_core::landcover::{class_histogram, LandCoverClass};
use lcexport_core::Aoi;

use config::{FileConfig, Overrides, Settings};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "lcexport")]
#[command(author, version, about = "Export annual land-cover GeoTIFFs for an area of interest", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Catalog selection shared by `export` and `search`.
#[derive(clap::Args)]
struct CatalogArgs {
    /// AOI GeoJSON file (Polygon / MultiPolygon, WGS84)
    #[arg(short, long)]
    aoi: PathBuf,
    /// First year to include
    #[arg(long)]
    start_year: Option<i32>,
    /// Last year to include
    #[arg(long)]
    end_year: Option<i32>,
    /// STAC catalog: pc, es, or an API root URL
    #[arg(long)]
    catalog: Option<String>,
    /// Collection id
    #[arg(long)]
    collection: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Clip each year's land cover to the AOI and write one GeoTIFF per year
    Export {
        #[command(flatten)]
        catalog: CatalogArgs,
        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Asset key holding the classification raster
        #[arg(long)]
        asset: Option<String>,
        /// Output filename prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Compression: none, lzw, deflate
        #[arg(long)]
        compression: Option<String>,
        /// Stop at the first failing year
        #[arg(long)]
        fail_fast: bool,
    },
    /// List catalog items intersecting the AOI, grouped by year
    Search {
        #[command(flatten)]
        catalog: CatalogArgs,
    },
    /// Show information about an exported land-cover file
    Info {
        /// Input raster file
        input: PathBuf,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logger")?;
    Ok(())
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn year_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn load_settings(config: Option<&PathBuf>, overrides: Overrides) -> Result<Settings> {
    let file = match config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    Settings::resolve(file, overrides)
}

fn read_aoi(path: &PathBuf) -> Result<Aoi> {
    let aoi = Aoi::read_geojson(path)
        .with_context(|| format!("Failed to read AOI {}", path.display()))?;
    let (w, s, e, n) = aoi.bounds();
    info!("AOI: {} polygon(s), bounds [{w:.5}, {s:.5}, {e:.5}, {n:.5}]", aoi.polygons().0.len());
    Ok(aoi)
}

fn open_source(settings: &Settings) -> Result<StacSource> {
    let reader = CogReaderOptions {
        request_timeout: settings.client.request_timeout,
        max_retries: settings.client.max_retries,
        ..Default::default()
    };
    let source = StacSource::new(settings.catalog.clone(), settings.client.clone(), reader)
        .context("Failed to set up STAC client")?;
    Ok(source.with_collection(&settings.export.collection))
}

// ─── Commands ───────────────────────────────────────────────────────────

fn cmd_export(settings: Settings, aoi_path: &PathBuf) -> Result<()> {
    let output_dir = settings
        .output_dir
        .clone()
        .context("No output directory: pass --output-dir or set [export] output_dir")?;
    let aoi = read_aoi(aoi_path)?;
    let mut source = open_source(&settings)?;

    let start = Instant::now();
    let pb = spinner("Searching catalog...");
    let mut bar: Option<ProgressBar> = None;
    let report = run_export_with_progress(
        &mut source,
        &aoi,
        &output_dir,
        &settings.export,
        &mut |event| match event {
            ExportEvent::Searched { items, years } => {
                pb.finish_and_clear();
                info!("Found {items} item(s) in {years} year(s)");
                bar = Some(year_bar(years as u64));
            }
            ExportEvent::YearStarted { year, items } => {
                if let Some(b) = &bar {
                    b.set_message(format!("{year} ({items} item(s))"));
                }
            }
            ExportEvent::YearFinished { .. } => {
                if let Some(b) = &bar {
                    b.inc(1);
                }
            }
        },
    );
    pb.finish_and_clear();
    if let Some(b) = &bar {
        b.finish_and_clear();
    }
    let report = report.context("Export failed")?;

    for file in &report.written {
        println!(
            "{}: {} ({} x {}, {} valid pixels)",
            file.year,
            file.path.display(),
            file.cols,
            file.rows,
            file.valid_pixels
        );
    }
    for skipped in &report.skipped {
        let why = match skipped.reason {
            SkipReason::NoItems => "no catalog item",
            SkipReason::NoOverlap => "no overlap with AOI",
        };
        println!("{}: skipped ({why})", skipped.year);
    }
    for failed in &report.failed {
        println!("{}: FAILED: {}", failed.year, failed.error);
    }
    println!(
        "{} file(s) written to {} in {:.2?}",
        report.written.len(),
        output_dir.display(),
        start.elapsed()
    );

    if !report.failed.is_empty() {
        anyhow::bail!("{} year(s) failed", report.failed.len());
    }
    Ok(())
}

fn cmd_search(settings: Settings, aoi_path: &PathBuf) -> Result<()> {
    let aoi = read_aoi(aoi_path)?;
    let mut source = open_source(&settings)?;

    let pb = spinner("Searching catalog...");
    let items = source.search(
        &settings.export.collection,
        &BBox::from_bounds(aoi.bounds()),
        settings.export.years,
    );
    pb.finish_and_clear();
    let items = items.context("Search failed")?;

    let groups = group_by_year(items, settings.export.years);
    println!("Collection: {}", settings.export.collection);
    for group in &groups {
        println!("{} ({} item(s))", group.year, group.items.len());
        for item in &group.items {
            let crs = item.crs().map_or_else(|| "-".to_string(), |c| c.identifier());
            let href = item.asset(&settings.export.asset).map_or("-", |a| a.href.as_str());
            println!("  {}  {}  {}", item.id, crs, href);
        }
    }
    if groups.is_empty() {
        println!("No items intersect the AOI");
    }
    Ok(())
}

fn cmd_info(input: &PathBuf) -> Result<()> {
    let pb = spinner("Reading raster...");
    let raster = read_geotiff::<i32, _>(input).context("Failed to read raster");
    pb.finish_and_clear();
    let raster = raster?;

    let (rows, cols) = raster.shape();
    let bounds = raster.bounds();
    println!("File: {}", input.display());
    println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
    println!("Cell size: {}", raster.cell_size());
    println!(
        "Bounds: ({:.3}, {:.3}) - ({:.3}, {:.3})",
        bounds.0, bounds.1, bounds.2, bounds.3
    );
    if let Some(crs) = raster.crs() {
        println!("CRS: {}", crs);
    }
    if let Some(nodata) = raster.nodata() {
        println!("NoData: {}", nodata);
    }

    let hist = class_histogram(&raster);
    let classified = hist.classified();
    println!("\nLand cover ({} classified cells):", classified);
    for class in LandCoverClass::ALL {
        let n = hist.count(class);
        if n > 0 {
            println!(
                "  {:>2} {:<20} {:>10} ({:.1}%)",
                class.code(),
                class.name(),
                n,
                100.0 * n as f64 / classified.max(1) as f64
            );
        }
    }
    if hist.unknown > 0 {
        println!("  Unrecognized values: {}", hist.unknown);
    }
    Ok(())
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Export {
            catalog,
            output_dir,
            asset,
            prefix,
            compression,
            fail_fast,
        } => {
            let settings = load_settings(
                cli.config.as_ref(),
                Overrides {
                    catalog: catalog.catalog,
                    collection: catalog.collection,
                    asset,
                    output_dir,
                    prefix,
                    compression,
                    start_year: catalog.start_year,
                    end_year: catalog.end_year,
                    fail_fast,
                },
            )?;
            cmd_export(settings, &catalog.aoi)
        }
        Commands::Search { catalog } => {
            let settings = load_settings(
                cli.config.as_ref(),
                Overrides {
                    catalog: catalog.catalog,
                    collection: catalog.collection,
                    start_year: catalog.start_year,
                    end_year: catalog.end_year,
                    ..Default::default()
                },
            )?;
            cmd_search(settings, &catalog.aoi)
        }
        Commands::Info { input } => cmd_info(&input),
    }
}
