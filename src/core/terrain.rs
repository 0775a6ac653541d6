use crate::grid::RasterGrid;
use crate::types::FloodResult;
use ndarray::{Array2, Zip};

/// Slope in degrees from a digital elevation model.
///
/// Gradients are central differences between the 4-neighbours, falling back
/// to one-sided differences where a neighbour is off the grid or no-data.
/// Pixel spacing comes from the DEM's geotransform; geographic grids are
/// converted to metres at each cell's latitude.
pub fn slope_degrees(dem: &RasterGrid<f32>) -> FloodResult<RasterGrid<f32>> {
    log::info!("Computing slope from {:?} DEM", dem.dim());
    let (rows, cols) = dem.dim();
    let geo = *dem.geo();

    let mut slope = Array2::<f32>::zeros((rows, cols));
    let mut valid = Array2::from_elem((rows, cols), false);

    let compute = |(i, j): (usize, usize), out: &mut f32, ok: &mut bool| {
        if !dem.is_valid(i, j) {
            *out = f32::NAN;
            return;
        }
        let (dx, dy) = geo.cell_ground_size(i, j);
        let gx = axis_gradient(dem, i, j, (0, 1), rows, cols).map(|g| g / dx);
        let gy = axis_gradient(dem, i, j, (1, 0), rows, cols).map(|g| g / dy);
        match (gx, gy) {
            (Some(gx), Some(gy)) => {
                *out = (gx * gx + gy * gy).sqrt().atan().to_degrees() as f32;
                *ok = true;
            }
            _ => *out = f32::NAN,
        }
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut slope)
        .and(&mut valid)
        .par_for_each(|idx, out, ok| compute(idx, out, ok));

    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut slope)
        .and(&mut valid)
        .for_each(|idx, out, ok| compute(idx, out, ok));

    RasterGrid::with_validity(slope, valid, geo)
}

/// Elevation change per cell along one axis, `None` without a valid neighbour
fn axis_gradient(
    dem: &RasterGrid<f32>,
    i: usize,
    j: usize,
    step: (usize, usize),
    rows: usize,
    cols: usize,
) -> Option<f64> {
    let z = |r: usize, c: usize| dem.get(r, c).map(|&v| v as f64);

    let centre = z(i, j)?;
    let prev = if i >= step.0 && j >= step.1 {
        z(i - step.0, j - step.1)
    } else {
        None
    };
    let next = if i + step.0 < rows && j + step.1 < cols {
        z(i + step.0, j + step.1)
    } else {
        None
    };

    // image rows run southwards, so +y is -row
    let sign = if step.0 == 1 { -1.0 } else { 1.0 };
    match (prev, next) {
        (Some(p), Some(n)) => Some(sign * (n - p) / 2.0),
        (Some(p), None) => Some(sign * (centre - p)),
        (None, Some(n)) => Some(sign * (n - centre)),
        (None, None) => None,
    }
}
