//! Main Raster type

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement};
use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};

/// A georeferenced 2D raster grid.
///
/// Values are stored row-major as `(row, col)` together with the affine
/// transform, an optional CRS and an optional no-data value.
///
/// ```ignore
/// use lcexport_core::Raster;
///
/// let mut raster: Raster<i32> = Raster::new(100, 100);
/// raster.set(10, 20, 2)?;
/// assert_eq!(raster.get(10, 20)?, 2);
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    data: Array2<T>,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Create a raster from row-major data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self::from_array(array))
    }

    /// Create a raster from an ndarray
    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Builder-style georeferencing
    pub fn with_georef(mut self, transform: GeoTransform, crs: Option<CRS>) -> Self {
        self.transform = transform;
        self.crs = crs;
        self
    }

    /// Builder-style no-data value
    pub fn with_nodata(mut self, nodata: Option<T>) -> Self {
        self.nodata = nodata;
        self
    }

    // Dimensions

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Data access

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        let (rows, cols) = self.shape();
        match self.data.get_mut((row, col)) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::IndexOutOfBounds { row, col, rows, cols }),
        }
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut2<'_, T> {
        self.data.view_mut()
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    pub fn into_array(self) -> Array2<T> {
        self.data
    }

    // Metadata

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    pub fn set_crs(&mut self, crs: Option<CRS>) {
        self.crs = crs;
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Cell size (assumes square cells)
    pub fn cell_size(&self) -> f64 {
        self.transform.cell_size()
    }

    /// Geographic bounds (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols(), self.rows())
    }

    /// Check if a value is no-data
    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }

    /// Copy out a `rows` x `cols` window starting at (row0, col0).
    ///
    /// The window's transform is shifted so it stays georeferenced.
    pub fn crop(&self, row0: usize, col0: usize, rows: usize, cols: usize) -> Result<Self> {
        let (r, c) = self.shape();
        if rows == 0 || cols == 0 || row0 + rows > r || col0 + cols > c {
            return Err(Error::InvalidParameter {
                name: "window",
                value: format!("({row0}, {col0}) {rows}x{cols}"),
                reason: format!("outside raster of size {r}x{c}"),
            });
        }

        let data = self
            .data
            .slice(s![row0..row0 + rows, col0..col0 + cols])
            .to_owned();

        Ok(Self {
            data,
            transform: self.transform.window(col0, row0),
            crs: self.crs.clone(),
            nodata: self.nodata,
        })
    }

    /// Replace every cell where `keep` is false with `fill`.
    pub fn mask_outside(&mut self, keep: &Array2<bool>, fill: T) -> Result<()> {
        if keep.dim() != self.shape() {
            let (er, ec) = self.shape();
            let (ar, ac) = keep.dim();
            return Err(Error::Other(format!(
                "mask shape ({ar}, {ac}) does not match raster ({er}, {ec})"
            )));
        }

        ndarray::Zip::from(&mut self.data)
            .and(keep)
            .for_each(|v, &k| {
                if !k {
                    *v = fill;
                }
            });
        Ok(())
    }

    /// Basic statistics over valid (non-nodata) cells
    pub fn statistics(&self) -> RasterStatistics<T> {
        let mut stats = RasterStatistics {
            min: None,
            max: None,
            mean: None,
            valid_count: 0,
            nodata_count: 0,
        };
        let mut sum = 0.0;

        for &value in self.data.iter() {
            if self.is_nodata(value) {
                stats.nodata_count += 1;
                continue;
            }
            if stats.min.map_or(true, |m| value < m) {
                stats.min = Some(value);
            }
            if stats.max.map_or(true, |m| value > m) {
                stats.max = Some(value);
            }
            sum += value.to_f64().unwrap_or(0.0);
            stats.valid_count += 1;
        }

        if stats.valid_count > 0 {
            stats.mean = Some(sum / stats.valid_count as f64);
        }
        stats
    }
}

/// Basic statistics for a raster
#[derive(Debug, Clone)]
pub struct RasterStatistics<T> {
    pub min: Option<T>,
    pub max: Option<T>,
    pub mean: Option<f64>,
    pub valid_count: usize,
    pub nodata_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(rows: usize, cols: usize) -> Raster<i32> {
        let data = (0..rows * cols).map(|v| v as i32).collect();
        Raster::from_vec(data, rows, cols)
            .unwrap()
            .with_georef(GeoTransform::new(100.0, 200.0, 10.0, -10.0), Some(CRS::from_epsg(32753)))
    }

    #[test]
    fn test_raster_access() {
        let mut raster: Raster<i32> = Raster::new(10, 10);
        raster.set(5, 5, 7).unwrap();
        assert_eq!(raster.get(5, 5).unwrap(), 7);
        assert!(raster.set(10, 0, 1).is_err());
        assert!(raster.get(0, 10).is_err());
    }

    #[test]
    fn from_vec_checks_length() {
        assert!(Raster::<u8>::from_vec(vec![1, 2, 3], 2, 2).is_err());
    }

    #[test]
    fn crop_keeps_georeference() {
        let raster = ramp(4, 5);
        let window = raster.crop(1, 2, 2, 3).unwrap();

        assert_eq!(window.shape(), (2, 3));
        assert_eq!(window.get(0, 0).unwrap(), 7);
        assert_eq!(window.transform().origin_x, 120.0);
        assert_eq!(window.transform().origin_y, 190.0);
        assert_eq!(window.crs().and_then(|c| c.epsg()), Some(32753));
    }

    #[test]
    fn crop_rejects_out_of_range_window() {
        let raster = ramp(4, 5);
        assert!(raster.crop(3, 0, 2, 1).is_err());
        assert!(raster.crop(0, 0, 0, 1).is_err());
    }

    #[test]
    fn mask_outside_fills_unkept_cells() {
        let mut raster = ramp(2, 2);
        let keep = Array2::from_shape_vec((2, 2), vec![true, false, false, true]).unwrap();
        raster.mask_outside(&keep, 0).unwrap();
        assert_eq!(raster.data().as_slice().unwrap(), &[0, 0, 0, 3]);
    }

    #[test]
    fn statistics_skip_nodata() {
        let raster = ramp(3, 3).with_nodata(Some(0));
        let stats = raster.statistics();
        assert_eq!(stats.min, Some(1));
        assert_eq!(stats.max, Some(8));
        assert_eq!(stats.valid_count, 8);
        assert_eq!(stats.nodata_count, 1);
    }
}
