//! Annual land-cover export: search, clip to the AOI, write one GeoTIFF per year.
//!
//! The pipeline is sequential. It searches the catalog once with the AOI's
//! total bounds, groups the matching items by calendar year and, for each
//! year in ascending order, mosaics the items' windows over the AOI, masks
//! cells outside the AOI polygons (`all_touched`), crops to the mask and
//! writes `{prefix}_{YYYYMMDD}_{i}.tif`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::Array2;
use tracing::{debug, info, warn};

use lcexport_core::crs::CRS;
use lcexport_core::io::{write_geotiff, GeoTiffOptions};
use lcexport_core::landcover::NODATA;
use lcexport_core::raster::{GeoTransform, Raster};
use lcexport_core::vector::{rasterize_mask, Aoi};

use crate::cog::BBox;
use crate::error::{CloudError, Result};
use crate::reproject::reproject_aoi;
use crate::stac_models::StacItem;

/// Impact Observatory 9-class annual land cover, version 2.
pub const DEFAULT_COLLECTION: &str = "io-lulc-annual-v02";
pub const DEFAULT_ASSET: &str = "data";
pub const DEFAULT_PREFIX: &str = "io_land_cover";

/// Inclusive range of calendar years.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Result<Self> {
        if start > end {
            return Err(CloudError::Core(lcexport_core::Error::InvalidParameter {
                name: "years",
                value: format!("{start}..={end}"),
                reason: "start year is after end year".into(),
            }));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.start..=self.end).contains(&year)
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }
}

/// What to do when one year fails to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Record the failure and move on to the next year.
    #[default]
    Continue,
    /// Return the first error.
    Abort,
}

/// Parameters of one export run.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub collection: String,
    pub asset: String,
    pub prefix: String,
    /// `None` exports every year the catalog has.
    pub years: Option<YearRange>,
    pub geotiff: GeoTiffOptions,
    pub failure_policy: FailurePolicy,
    /// Burn every cell touched by the AOI boundary, not only cell centres.
    pub all_touched: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            asset: DEFAULT_ASSET.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            years: None,
            geotiff: GeoTiffOptions::default(),
            failure_policy: FailurePolicy::default(),
            all_touched: true,
        }
    }
}

/// Where catalog items and their pixels come from.
pub trait ItemSource {
    /// Items of `collection` intersecting the WGS84 `bbox`, optionally
    /// restricted to whole calendar years.
    fn search(
        &mut self,
        collection: &str,
        bbox: &BBox,
        years: Option<YearRange>,
    ) -> Result<Vec<StacItem>>;

    /// Pixels of `asset` covering `bbox`, which is in the item's CRS.
    /// `None` when the item does not overlap the box.
    fn read_window(&mut self, item: &StacItem, asset: &str, bbox: &BBox)
        -> Result<Option<Raster<i32>>>;
}

/// Items sharing one calendar year.
#[derive(Debug, Clone)]
pub struct YearGroup {
    pub year: i32,
    /// Earliest start datetime among the items.
    pub date: DateTime<Utc>,
    pub items: Vec<StacItem>,
}

/// A GeoTIFF written by the export.
#[derive(Debug, Clone)]
pub struct WrittenFile {
    pub year: i32,
    pub index: usize,
    pub path: PathBuf,
    pub rows: usize,
    pub cols: usize,
    pub valid_pixels: usize,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No catalog item for the year.
    NoItems,
    /// Items exist but none overlaps the AOI.
    NoOverlap,
}

#[derive(Debug, Clone)]
pub struct SkippedYear {
    pub year: i32,
    pub reason: SkipReason,
}

#[derive(Debug, Clone)]
pub struct FailedYear {
    pub year: i32,
    pub error: String,
}

/// Outcome of an export run.
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub items_found: usize,
    pub written: Vec<WrittenFile>,
    pub skipped: Vec<SkippedYear>,
    pub failed: Vec<FailedYear>,
}

/// Progress notifications from [`run_export_with_progress`].
#[derive(Debug, Clone)]
pub enum ExportEvent {
    /// Search finished; `years` groups will be processed.
    Searched { items: usize, years: usize },
    YearStarted { year: i32, items: usize },
    YearFinished { year: i32 },
}

/// `{prefix}_{YYYYMMDD}_{index}.tif`
pub fn output_filename(prefix: &str, date: &DateTime<Utc>, index: usize) -> String {
    format!("{prefix}_{}_{index}.tif", date.format("%Y%m%d"))
}

/// Group items by start year, ascending. Items without a parsable date or
/// outside `years` are dropped.
pub fn group_by_year(items: Vec<StacItem>, years: Option<YearRange>) -> Vec<YearGroup> {
    let mut groups: BTreeMap<i32, Vec<(DateTime<Utc>, StacItem)>> = BTreeMap::new();
    for item in items {
        let Some(date) = item.start_datetime() else {
            warn!("item {} has no start datetime, ignored", item.id);
            continue;
        };
        let year = chrono::Datelike::year(&date);
        if years.is_some_and(|r| !r.contains(year)) {
            debug!("item {} ({year}) outside requested years", item.id);
            continue;
        }
        groups.entry(year).or_default().push((date, item));
    }

    groups
        .into_iter()
        .filter_map(|(year, mut dated)| {
            dated.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
            let date = dated.first()?.0;
            Some(YearGroup {
                year,
                date,
                items: dated.into_iter().map(|(_, item)| item).collect(),
            })
        })
        .collect()
}

/// The CRS every item shares. Fails on a missing or differing CRS.
pub fn common_crs<'a>(items: impl IntoIterator<Item = &'a StacItem>) -> Result<Option<CRS>> {
    let mut common: Option<CRS> = None;
    for item in items {
        let crs = item.crs().ok_or_else(|| CloudError::MissingCrs {
            item: item.id.clone(),
        })?;
        match &common {
            None => common = Some(crs),
            Some(first) if !first.is_equivalent(&crs) => {
                return Err(CloudError::CrsMismatch {
                    first: first.identifier(),
                    other: crs.identifier(),
                    item: item.id.clone(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(common)
}

/// Run an export without progress reporting.
pub fn run_export<S: ItemSource>(
    source: &mut S,
    aoi: &Aoi,
    output_dir: &Path,
    options: &ExportOptions,
) -> Result<ExportReport> {
    run_export_with_progress(source, aoi, output_dir, options, &mut |_| {})
}

/// Search, clip and write one GeoTIFF per matched year.
///
/// Search failures and a CRS mismatch between items abort before anything
/// is written. Per-year failures follow `options.failure_policy`.
pub fn run_export_with_progress<S: ItemSource>(
    source: &mut S,
    aoi: &Aoi,
    output_dir: &Path,
    options: &ExportOptions,
    progress: &mut dyn FnMut(ExportEvent),
) -> Result<ExportReport> {
    let bbox = BBox::from_bounds(aoi.bounds());
    info!(
        "searching {} over [{:.4}, {:.4}, {:.4}, {:.4}]",
        options.collection, bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y
    );

    let items = source.search(&options.collection, &bbox, options.years)?;
    let mut report = ExportReport {
        items_found: items.len(),
        ..Default::default()
    };

    let groups = group_by_year(items, options.years);
    progress(ExportEvent::Searched {
        items: report.items_found,
        years: groups.len(),
    });

    if let Some(range) = options.years {
        report.skipped.extend(
            range
                .years()
                .filter(|y| !groups.iter().any(|g| g.year == *y))
                .map(|year| {
                    info!("{year}: no catalog item, skipped");
                    SkippedYear {
                        year,
                        reason: SkipReason::NoItems,
                    }
                }),
        );
    }

    let Some(crs) = common_crs(groups.iter().flat_map(|g| &g.items))? else {
        info!("no catalog items match the AOI");
        return Ok(report);
    };

    let projected = reproject_aoi(aoi, &crs)?;
    let window = BBox::from_bounds(projected.bounds());
    debug!("AOI in {crs}: {window:?}");
    fs::create_dir_all(output_dir)?;

    for (index, group) in groups.iter().enumerate() {
        progress(ExportEvent::YearStarted {
            year: group.year,
            items: group.items.len(),
        });
        let outcome = export_year(source, group, index, &projected, &window, &crs, output_dir, options);
        progress(ExportEvent::YearFinished { year: group.year });

        match outcome {
            Ok(Some(file)) => {
                info!(
                    "{}: wrote {} ({}x{}, {} valid pixels)",
                    group.year,
                    file.path.display(),
                    file.cols,
                    file.rows,
                    file.valid_pixels
                );
                report.written.push(file);
            }
            Ok(None) => {
                info!("{}: no item overlaps the AOI, skipped", group.year);
                report.skipped.push(SkippedYear {
                    year: group.year,
                    reason: SkipReason::NoOverlap,
                });
            }
            Err(e) if options.failure_policy == FailurePolicy::Continue => {
                warn!("{}: export failed: {e}", group.year);
                report.failed.push(FailedYear {
                    year: group.year,
                    error: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    report.skipped.sort_by_key(|s| s.year);
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn export_year<S: ItemSource>(
    source: &mut S,
    group: &YearGroup,
    index: usize,
    aoi: &Aoi,
    window: &BBox,
    crs: &CRS,
    output_dir: &Path,
    options: &ExportOptions,
) -> Result<Option<WrittenFile>> {
    let mut tiles = Vec::new();
    let mut used = Vec::new();
    for item in &group.items {
        if let Some(raster) = source.read_window(item, &options.asset, window)? {
            debug!("{}: {} gave {}x{}", group.year, item.id, raster.cols(), raster.rows());
            tiles.push(raster);
            used.push(item.id.clone());
        }
    }

    let Some(mut mosaic) = mosaic(&tiles)? else {
        return Ok(None);
    };

    let mask = rasterize_mask(
        aoi.polygons(),
        mosaic.transform(),
        mosaic.rows(),
        mosaic.cols(),
        options.all_touched,
    );
    let Some((row0, col0, rows, cols)) = mask_extent(&mask) else {
        return Ok(None);
    };
    mosaic.mask_outside(&mask, NODATA)?;

    let mut clipped = mosaic.crop(row0, col0, rows, cols)?;
    clipped.set_crs(Some(crs.clone()));
    clipped.set_nodata(Some(NODATA));

    let path = output_dir.join(output_filename(&options.prefix, &group.date, index));
    write_geotiff(&clipped, &path, Some(options.geotiff.clone()))?;

    Ok(Some(WrittenFile {
        year: group.year,
        index,
        path,
        rows,
        cols,
        valid_pixels: clipped.data().iter().filter(|&&v| v != NODATA).count(),
        items: used,
    }))
}

/// Paste rasters on a common grid spanning all of them. The first valid
/// value written to a cell wins.
///
/// Rasters must share a cell size and be aligned to the same grid, as the
/// tiles of one annual release are.
fn mosaic(tiles: &[Raster<i32>]) -> Result<Option<Raster<i32>>> {
    let Some(first) = tiles.first() else {
        return Ok(None);
    };
    let gt = *first.transform();

    let (mut min_x, mut min_y, mut max_x, mut max_y) = first.bounds();
    for t in &tiles[1..] {
        if !t.transform().same_resolution(&gt, 1e-6) {
            return Err(CloudError::Core(lcexport_core::Error::InvalidParameter {
                name: "resolution",
                value: format!("{} vs {}", t.transform().cell_size(), gt.cell_size()),
                reason: "tiles of one year have different cell sizes".into(),
            }));
        }
        let (a, b, c, d) = t.bounds();
        min_x = min_x.min(a);
        min_y = min_y.min(b);
        max_x = max_x.max(c);
        max_y = max_y.max(d);
    }

    let px = gt.pixel_width;
    let py = gt.pixel_height.abs();
    let cols = ((max_x - min_x) / px).round() as usize;
    let rows = ((max_y - min_y) / py).round() as usize;
    let grid = GeoTransform::new(min_x, max_y, px, -py);

    let mut data = Array2::from_elem((rows, cols), NODATA);
    for t in tiles {
        let col_off = ((t.transform().origin_x - min_x) / px).round() as usize;
        let row_off = ((max_y - t.transform().origin_y) / py).round() as usize;
        for ((r, c), &v) in t.data().indexed_iter() {
            if v == NODATA || t.is_nodata(v) {
                continue;
            }
            if let Some(cell) = data.get_mut((r + row_off, c + col_off)) {
                if *cell == NODATA {
                    *cell = v;
                }
            }
        }
    }

    Ok(Some(
        Raster::from_array(data)
            .with_georef(grid, first.crs().cloned())
            .with_nodata(Some(NODATA)),
    ))
}

/// Bounding `(row0, col0, rows, cols)` of the true cells.
fn mask_extent(mask: &Array2<bool>) -> Option<(usize, usize, usize, usize)> {
    let mut rows = (usize::MAX, 0);
    let mut cols = (usize::MAX, 0);
    for ((r, c), _) in mask.indexed_iter().filter(|(_, m)| **m) {
        rows = (rows.0.min(r), rows.1.max(r));
        cols = (cols.0.min(c), cols.1.max(c));
    }
    (rows.0 != usize::MAX).then(|| (rows.0, cols.0, rows.1 - rows.0 + 1, cols.1 - cols.0 + 1))
}
