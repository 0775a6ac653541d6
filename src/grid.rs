//! Dense 2D rasters with a per-cell validity plane.
//!
//! Every intermediate image in the flood pipeline is a [`RasterGrid`]: the
//! cell values live in an `Array2<T>`, a parallel `Array2<bool>` records which
//! cells carry data, and the georeferencing is passed through untouched.
//! Grids are immutable once built; stages produce new grids.

use crate::types::{FloodError, FloodResult, GeoReference};
use ndarray::{s, Array2, Zip};

/// Immutable 2D raster with validity mask and georeferencing
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid<T> {
    data: Array2<T>,
    valid: Array2<bool>,
    geo: GeoReference,
}

/// Backscatter intensity raster
pub type BackscatterGrid = RasterGrid<f32>;

/// Boolean flood mask: value is the flag, validity marks evaluated cells
pub type FloodMask = RasterGrid<bool>;

impl<T: Clone> RasterGrid<T> {
    /// Create a grid where every cell is valid
    pub fn new(data: Array2<T>, geo: GeoReference) -> FloodResult<Self> {
        let valid = Array2::from_elem(data.dim(), true);
        Self::with_validity(data, valid, geo)
    }

    /// Create a grid with an explicit validity plane
    pub fn with_validity(
        data: Array2<T>,
        valid: Array2<bool>,
        geo: GeoReference,
    ) -> FloodResult<Self> {
        let (rows, cols) = data.dim();
        if rows == 0 || cols == 0 {
            return Err(FloodError::EmptyInput(format!(
                "Raster has zero extent ({}x{})",
                rows, cols
            )));
        }
        if valid.dim() != data.dim() {
            return Err(FloodError::DimensionMismatch(format!(
                "Validity plane {:?} does not match data {:?}",
                valid.dim(),
                data.dim()
            )));
        }
        Ok(Self { data, valid, geo })
    }

    /// Constant grid
    pub fn from_elem(rows: usize, cols: usize, value: T, geo: GeoReference) -> FloodResult<Self> {
        Self::new(Array2::from_elem((rows, cols), value), geo)
    }

    /// Same values with a replacement validity plane
    pub fn with_mask(&self, valid: Array2<bool>) -> FloodResult<Self> {
        Self::with_validity(self.data.clone(), valid, self.geo)
    }

    /// Copy of the rectangular window starting at (row, col)
    pub fn window(&self, row: usize, col: usize, rows: usize, cols: usize) -> FloodResult<Self> {
        if row + rows > self.rows() || col + cols > self.cols() {
            return Err(FloodError::InvalidParameter(format!(
                "Window {}x{} at ({}, {}) exceeds grid {:?}",
                rows,
                cols,
                row,
                col,
                self.dim()
            )));
        }
        let data = self.data.slice(s![row..row + rows, col..col + cols]).to_owned();
        let valid = self.valid.slice(s![row..row + rows, col..col + cols]).to_owned();
        let geo = GeoReference {
            transform: self.geo.transform.offset(row, col),
            crs: self.geo.crs,
        };
        Self::with_validity(data, valid, geo)
    }
}

impl<T> RasterGrid<T> {
    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn validity(&self) -> &Array2<bool> {
        &self.valid
    }

    pub fn geo(&self) -> &GeoReference {
        &self.geo
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.valid[[row, col]]
    }

    /// Value at (row, col) if the cell is valid
    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        if self.valid[[row, col]] {
            Some(&self.data[[row, col]])
        } else {
            None
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Fail with `DimensionMismatch` unless both grids share shape and georeferencing
    pub fn ensure_same_footprint<U>(&self, other: &RasterGrid<U>, operation: &str) -> FloodResult<()> {
        if self.dim() != other.dim() {
            return Err(FloodError::DimensionMismatch(format!(
                "{}: grid sizes differ ({:?} vs {:?})",
                operation,
                self.dim(),
                other.dim()
            )));
        }
        if self.geo != other.geo {
            return Err(FloodError::DimensionMismatch(format!(
                "{}: georeferencing differs ({:?} vs {:?})",
                operation, self.geo, other.geo
            )));
        }
        Ok(())
    }

    /// Elementwise transform keeping validity and georeferencing
    pub fn map<U, F>(&self, f: F) -> RasterGrid<U>
    where
        F: Fn(&T) -> U,
    {
        RasterGrid {
            data: self.data.map(f),
            valid: self.valid.clone(),
            geo: self.geo,
        }
    }

    pub fn into_parts(self) -> (Array2<T>, Array2<bool>, GeoReference) {
        (self.data, self.valid, self.geo)
    }
}

impl RasterGrid<bool> {
    /// Number of cells that are valid and flagged
    pub fn flagged_count(&self) -> usize {
        Zip::from(&self.data)
            .and(&self.valid)
            .fold(0, |acc, &flag, &ok| if flag && ok { acc + 1 } else { acc })
    }

    pub fn is_flagged(&self, row: usize, col: usize) -> bool {
        self.valid[[row, col]] && self.data[[row, col]]
    }

    /// True when every flagged cell here is also flagged in `other`
    pub fn is_subset_of(&self, other: &FloodMask) -> bool {
        self.dim() == other.dim()
            && Zip::from(&self.data)
                .and(&self.valid)
                .and(&other.data)
                .and(&other.valid)
                .all(|&a, &a_ok, &b, &b_ok| !(a && a_ok) || (b && b_ok))
    }
}
