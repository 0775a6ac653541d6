use crate::grid::RasterGrid;
use crate::types::{FloodError, FloodResult};
use ndarray::{Array2, Zip};

/// Fixed-size weight matrix with an anchor cell.
///
/// The anchor is the kernel cell that lands on the output pixel; a weight at
/// (kr, kc) samples the input at `(row + kr - anchor.0, col + kc - anchor.1)`.
/// Kernels are values: [`Kernel::rotate`] returns a new kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    weights: Array2<f32>,
    anchor: (usize, usize),
}

impl Kernel {
    /// Kernel from explicit weights; both dimensions must be odd
    pub fn fixed(weights: Array2<f32>, anchor: (usize, usize)) -> FloodResult<Self> {
        let (rows, cols) = weights.dim();
        if rows == 0 || cols == 0 || rows % 2 == 0 || cols % 2 == 0 {
            return Err(FloodError::InvalidParameter(format!(
                "Kernel dimensions must be odd, got {}x{}",
                rows, cols
            )));
        }
        if anchor.0 >= rows || anchor.1 >= cols {
            return Err(FloodError::InvalidParameter(format!(
                "Kernel anchor {:?} outside {}x{} kernel",
                anchor, rows, cols
            )));
        }
        Ok(Self { weights, anchor })
    }

    /// All-ones square kernel anchored at its centre
    pub fn square(size: usize) -> FloodResult<Self> {
        Self::fixed(Array2::ones((size, size)), (size / 2, size / 2))
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn anchor(&self) -> (usize, usize) {
        self.anchor
    }

    pub fn dim(&self) -> (usize, usize) {
        self.weights.dim()
    }

    /// Rotate by `quarter_turns` × 90°. Positive turns are clockwise, negative
    /// counter-clockwise; four turns give back the same kernel.
    pub fn rotate(&self, quarter_turns: i32) -> Kernel {
        let mut kernel = self.clone();
        for _ in 0..quarter_turns.rem_euclid(4) {
            kernel = kernel.rotate_clockwise();
        }
        kernel
    }

    fn rotate_clockwise(&self) -> Kernel {
        let (rows, cols) = self.weights.dim();
        let weights = Array2::from_shape_fn((cols, rows), |(r, c)| self.weights[[rows - 1 - c, r]]);
        let anchor = (self.anchor.1, rows - 1 - self.anchor.0);
        Kernel { weights, anchor }
    }

    /// Non-zero taps as (row offset, col offset, weight) relative to the anchor
    pub fn taps(&self) -> Vec<(isize, isize, f32)> {
        self.weights
            .indexed_iter()
            .filter(|(_, &w)| w != 0.0)
            .map(|((r, c), &w)| {
                (
                    r as isize - self.anchor.0 as isize,
                    c as isize - self.anchor.1 as isize,
                    w,
                )
            })
            .collect()
    }
}

/// Statistic computed over a kernel footprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborhoodStatistic {
    /// Weighted mean
    Mean,
    /// Weighted population variance
    Variance,
    /// Weighted sum
    Sum,
}

/// Weighted moments of one footprint
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct WindowStats {
    pub(crate) mean: f64,
    pub(crate) variance: f64,
    pub(crate) sum: f64,
}

/// Applies kernels over grids.
///
/// Footprints are truncated at the grid edge: only in-bounds, valid samples
/// contribute, and the weights are renormalised over what remains. A cell
/// whose footprint holds no valid sample is invalid in the output.
pub struct NeighborhoodReducer;

impl NeighborhoodReducer {
    /// Reduce `grid` with `kernel` to a single statistic per cell
    pub fn reduce(
        grid: &RasterGrid<f32>,
        kernel: &Kernel,
        statistic: NeighborhoodStatistic,
    ) -> FloodResult<RasterGrid<f32>> {
        log::debug!(
            "Reducing {:?} grid with {:?} kernel ({:?})",
            grid.dim(),
            kernel.dim(),
            statistic
        );
        let stats = Self::window_stats(grid, kernel);
        Self::to_grid(grid, &stats, |s| match statistic {
            NeighborhoodStatistic::Mean => s.mean,
            NeighborhoodStatistic::Variance => s.variance,
            NeighborhoodStatistic::Sum => s.sum,
        })
    }

    /// Mean and variance in one pass over the footprints
    pub fn mean_variance(
        grid: &RasterGrid<f32>,
        kernel: &Kernel,
    ) -> FloodResult<(RasterGrid<f32>, RasterGrid<f32>)> {
        let stats = Self::window_stats(grid, kernel);
        let mean = Self::to_grid(grid, &stats, |s| s.mean)?;
        let variance = Self::to_grid(grid, &stats, |s| s.variance)?;
        Ok((mean, variance))
    }

    fn to_grid<F>(
        grid: &RasterGrid<f32>,
        stats: &Array2<Option<WindowStats>>,
        pick: F,
    ) -> FloodResult<RasterGrid<f32>>
    where
        F: Fn(&WindowStats) -> f64,
    {
        let data = stats.map(|s| s.as_ref().map(|s| pick(s) as f32).unwrap_or(f32::NAN));
        let valid = stats.map(|s| s.is_some());
        RasterGrid::with_validity(data, valid, *grid.geo())
    }

    #[cfg(feature = "parallel")]
    fn window_stats(grid: &RasterGrid<f32>, kernel: &Kernel) -> Array2<Option<WindowStats>> {
        let taps = kernel.taps();
        let mut stats = Array2::from_elem(grid.dim(), None);
        Zip::indexed(&mut stats).par_for_each(|(i, j), out| {
            *out = footprint_stats(grid, &taps, i, j);
        });
        stats
    }

    #[cfg(not(feature = "parallel"))]
    fn window_stats(grid: &RasterGrid<f32>, kernel: &Kernel) -> Array2<Option<WindowStats>> {
        let taps = kernel.taps();
        let mut stats = Array2::from_elem(grid.dim(), None);
        Zip::indexed(&mut stats).for_each(|(i, j), out| {
            *out = footprint_stats(grid, &taps, i, j);
        });
        stats
    }
}

/// Weighted moments shifted by the first valid sample, so a constant
/// footprint yields its value as the mean and exactly zero variance
pub(crate) fn footprint_stats(
    grid: &RasterGrid<f32>,
    taps: &[(isize, isize, f32)],
    i: usize,
    j: usize,
) -> Option<WindowStats> {
    let (rows, cols) = grid.dim();
    let data = grid.data();
    let valid = grid.validity();

    let samples = taps.iter().filter_map(|&(dr, dc, w)| {
        let r = i as isize + dr;
        let c = j as isize + dc;
        if r < 0 || c < 0 || r >= rows as isize || c >= cols as isize {
            return None;
        }
        let (r, c) = (r as usize, c as usize);
        if valid[[r, c]] {
            Some((data[[r, c]] as f64, w as f64))
        } else {
            None
        }
    });

    let mut shift = None;
    let mut weight = 0.0f64;
    let mut sum = 0.0f64;
    let mut shifted = 0.0f64;
    let mut shifted_sq = 0.0f64;
    for (x, w) in samples {
        let x0 = *shift.get_or_insert(x);
        let d = x - x0;
        weight += w;
        sum += w * x;
        shifted += w * d;
        shifted_sq += w * d * d;
    }
    let x0 = shift?;
    if weight <= 0.0 {
        return None;
    }

    let offset = shifted / weight;
    // rounding can leave a tiny negative; NaN must pass through
    let raw = shifted_sq / weight - offset * offset;
    let variance = if raw < 0.0 { 0.0 } else { raw };
    Some(WindowStats {
        mean: x0 + offset,
        variance,
        sum,
    })
}
