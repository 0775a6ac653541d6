use crate::core::neighborhood::{footprint_stats, Kernel, NeighborhoodReducer};
use crate::grid::RasterGrid;
use crate::types::{FloodError, FloodResult};
use ndarray::{s, Array2, Zip};
use serde::{Deserialize, Serialize};

/// Number of 3x3 windows sampled inside the 7x7 neighbourhood
pub const SAMPLE_COUNT: usize = 9;

/// Index of the sample sitting on the pixel itself
const CENTER_SAMPLE: usize = 4;

/// Opposite sample pairs whose mean difference gives the 4 gradients
const GRADIENT_PAIRS: [(usize, usize); 4] = [(1, 7), (6, 2), (3, 5), (0, 8)];

/// Cells beyond a tile the filter reads: 3x3 statistics sampled two cells
/// out, and 7x7 directional windows.
pub const FILTER_HALO: usize = 3;

/// Dominant edge direction of a pixel, naming the half of the 7x7 window the
/// directional statistics are taken from. Codes 1-8; 0 is unlabeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DirectionLabel {
    Unlabeled = 0,
    Lower = 1,
    LowerLeft = 2,
    Left = 3,
    UpperLeft = 4,
    Upper = 5,
    UpperRight = 6,
    Right = 7,
    LowerRight = 8,
}

impl DirectionLabel {
    const LABELED: [DirectionLabel; 8] = [
        DirectionLabel::Lower,
        DirectionLabel::LowerLeft,
        DirectionLabel::Left,
        DirectionLabel::UpperLeft,
        DirectionLabel::Upper,
        DirectionLabel::UpperRight,
        DirectionLabel::Right,
        DirectionLabel::LowerRight,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DirectionLabel::Unlabeled),
            1..=8 => Some(Self::LABELED[code as usize - 1]),
            _ => None,
        }
    }

    /// Label for gradient band `band` (0-3): `d = band + 1` when the first
    /// sample of the pair deviates more from the centre, else `d + 4`.
    fn from_gradient(band: usize, first_side_steeper: bool) -> Self {
        let code = if first_side_steeper { band + 1 } else { band + 5 };
        Self::LABELED[code - 1]
    }

    /// Position in the directional kernel table
    fn kernel_index(self) -> Option<usize> {
        match self {
            DirectionLabel::Unlabeled => None,
            other => Some(other.code() as usize - 1),
        }
    }
}

/// Refined Lee filtering parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinedLeeParams {
    /// Clamp the signal variance estimate `varX` at zero. When false the
    /// literal formula is used and the weight can go negative.
    pub clamp_negative_variance: bool,
    /// Number of lowest normalised sample variances averaged into the noise estimate
    pub noise_samples: usize,
    /// Process in square tiles of this size (plus halo) to bound memory
    pub tile_size: Option<usize>,
}

impl Default for RefinedLeeParams {
    fn default() -> Self {
        Self {
            clamp_negative_variance: true,
            noise_samples: 5,
            tile_size: None,
        }
    }
}

impl RefinedLeeParams {
    pub fn validate(&self) -> FloodResult<()> {
        if self.noise_samples == 0 || self.noise_samples > SAMPLE_COUNT {
            return Err(FloodError::InvalidParameter(format!(
                "noise_samples must be in 1..={}, got {}",
                SAMPLE_COUNT, self.noise_samples
            )));
        }
        if self.tile_size == Some(0) {
            return Err(FloodError::InvalidParameter("tile_size must be positive".to_string()));
        }
        Ok(())
    }
}

/// Sparse 7x7 kernel picking nine 3x3 window centres two cells apart
pub fn sample_kernel() -> FloodResult<Kernel> {
    let weights = Array2::from_shape_fn((7, 7), |(r, c)| {
        if r % 2 == 1 && c % 2 == 1 {
            1.0
        } else {
            0.0
        }
    });
    Kernel::fixed(weights, (3, 3))
}

/// Half window: bottom 4 rows of 7 set
pub fn rect_kernel() -> FloodResult<Kernel> {
    let weights = Array2::from_shape_fn((7, 7), |(r, _)| if r >= 3 { 1.0 } else { 0.0 });
    Kernel::fixed(weights, (3, 3))
}

/// Lower triangle: row i has i + 1 leading ones
pub fn diag_kernel() -> FloodResult<Kernel> {
    let weights = Array2::from_shape_fn((7, 7), |(r, c)| if c <= r { 1.0 } else { 0.0 });
    Kernel::fixed(weights, (3, 3))
}

/// The 8 directional kernels, index `code - 1`: odd codes are the half
/// window and even codes the triangle, each turned `(code - 1) / 2` times.
pub fn directional_kernels() -> FloodResult<Vec<Kernel>> {
    let rect = rect_kernel()?;
    let diag = diag_kernel()?;
    let mut kernels = Vec::with_capacity(8);
    for turns in 0..4 {
        kernels.push(rect.rotate(turns));
        kernels.push(diag.rotate(turns));
    }
    Ok(kernels)
}

/// Per-grid state shared by every pixel of one filter pass
struct FilterContext {
    mean3: RasterGrid<f32>,
    var3: RasterGrid<f32>,
    sample_offsets: Vec<(isize, isize)>,
    directional_taps: Vec<Vec<(isize, isize, f32)>>,
}

impl FilterContext {
    fn prepare(image: &RasterGrid<f32>) -> FloodResult<Self> {
        let (mean3, var3) = NeighborhoodReducer::mean_variance(image, &Kernel::square(3)?)?;
        let sample_offsets: Vec<(isize, isize)> = sample_kernel()?
            .taps()
            .into_iter()
            .map(|(dr, dc, _)| (dr, dc))
            .collect();
        let directional_taps = directional_kernels()?.iter().map(Kernel::taps).collect();
        Ok(Self {
            mean3,
            var3,
            sample_offsets,
            directional_taps,
        })
    }

    /// 3x3 mean/variance at the nine sample positions. Positions past the
    /// grid edge clamp to the nearest cell; invalid windows give NaN.
    ///
    /// Clamping keeps all nine samples, so every border pixel still gets one
    /// of the eight gradient directions. Dropping the missing samples would
    /// leave some gradient bands undefined and the pixel unlabeled.
    fn samples(&self, i: usize, j: usize) -> ([f32; SAMPLE_COUNT], [f32; SAMPLE_COUNT]) {
        let (rows, cols) = self.mean3.dim();
        let mut means = [f32::NAN; SAMPLE_COUNT];
        let mut vars = [f32::NAN; SAMPLE_COUNT];
        for (k, &(dr, dc)) in self.sample_offsets.iter().enumerate() {
            let r = (i as isize + dr).clamp(0, rows as isize - 1) as usize;
            let c = (j as isize + dc).clamp(0, cols as isize - 1) as usize;
            if self.mean3.is_valid(r, c) {
                means[k] = self.mean3.data()[[r, c]];
                vars[k] = self.var3.data()[[r, c]];
            }
        }
        (means, vars)
    }
}

/// Direction of the steepest of the four sample gradients. On ties the first
/// band in canonical order wins.
fn direction_label(means: &[f32; SAMPLE_COUNT]) -> DirectionLabel {
    let gradients = GRADIENT_PAIRS.map(|(a, b)| (means[a] - means[b]).abs());
    let max_gradient = gradients.iter().copied().fold(f32::NAN, f32::max);
    if max_gradient.is_nan() {
        return DirectionLabel::Unlabeled;
    }
    let band = match gradients.iter().position(|&g| g == max_gradient) {
        Some(band) => band,
        None => return DirectionLabel::Unlabeled,
    };
    let (first, second) = GRADIENT_PAIRS[band];
    let center = means[CENTER_SAMPLE];
    DirectionLabel::from_gradient(band, (means[first] - center) > (center - means[second]))
}

/// Mean of the `count` smallest `var / mean²` ratios. NaN ratios sort last.
fn noise_variance(means: &[f32; SAMPLE_COUNT], vars: &[f32; SAMPLE_COUNT], count: usize) -> f64 {
    let mut ratios: Vec<f64> = means
        .iter()
        .zip(vars.iter())
        .map(|(&m, &v)| v as f64 / (m as f64 * m as f64))
        .collect();
    ratios.sort_by(|a, b| match (a.is_nan(), b.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => a.total_cmp(b),
    });
    ratios.iter().take(count).sum::<f64>() / count as f64
}

/// `b = varX / dir_var`; zero directional variance means nothing to preserve
fn adaptive_weight(dir_mean: f64, dir_var: f64, sigma_v: f64, clamp: bool) -> f64 {
    if dir_var == 0.0 {
        return 0.0;
    }
    let var_x = (dir_var - dir_mean * dir_mean * sigma_v) / (sigma_v + 1.0);
    let var_x = if clamp && var_x < 0.0 { 0.0 } else { var_x };
    var_x / dir_var
}

/// Refined Lee speckle filter
pub struct RefinedLeeFilter {
    params: RefinedLeeParams,
}

impl RefinedLeeFilter {
    /// Create a new filter with default parameters
    pub fn new() -> Self {
        Self {
            params: RefinedLeeParams::default(),
        }
    }

    /// Create a filter with custom parameters
    pub fn with_params(params: RefinedLeeParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RefinedLeeParams {
        &self.params
    }

    /// Despeckle a grid in natural (linear) units.
    ///
    /// Output has the input's dimensions, georeferencing and validity;
    /// invalid cells are copied through untouched.
    pub fn apply_filter(&self, image: &RasterGrid<f32>) -> FloodResult<RasterGrid<f32>> {
        log::info!("Applying Refined Lee filter to {}x{} grid", image.rows(), image.cols());
        log::debug!("Filter parameters: {:?}", self.params);
        self.params.validate()?;

        let filtered = match self.params.tile_size {
            Some(tile_size) => self.apply_tiled(image, tile_size)?,
            None => self.filter_grid(image)?,
        };

        log::info!("Refined Lee filtering completed");
        Ok(filtered)
    }

    /// Filter tile by tile with a halo of [`FILTER_HALO`] cells. Output is
    /// identical to the untiled filter.
    pub fn apply_tiled(&self, image: &RasterGrid<f32>, tile_size: usize) -> FloodResult<RasterGrid<f32>> {
        if tile_size == 0 {
            return Err(FloodError::InvalidParameter("tile_size must be positive".to_string()));
        }
        let (rows, cols) = image.dim();
        log::debug!("Filtering {}x{} grid in {}x{} tiles", rows, cols, tile_size, tile_size);

        let mut data = image.data().clone();
        for r0 in (0..rows).step_by(tile_size) {
            let r1 = (r0 + tile_size).min(rows);
            let wr0 = r0.saturating_sub(FILTER_HALO);
            let wr1 = (r1 + FILTER_HALO).min(rows);

            for c0 in (0..cols).step_by(tile_size) {
                let c1 = (c0 + tile_size).min(cols);
                let wc0 = c0.saturating_sub(FILTER_HALO);
                let wc1 = (c1 + FILTER_HALO).min(cols);

                let window = image.window(wr0, wc0, wr1 - wr0, wc1 - wc0)?;
                let filtered = self.filter_grid(&window)?;
                data.slice_mut(s![r0..r1, c0..c1]).assign(
                    &filtered
                        .data()
                        .slice(s![r0 - wr0..r1 - wr0, c0 - wc0..c1 - wc0]),
                );
            }
        }

        RasterGrid::with_validity(data, image.validity().clone(), *image.geo())
    }

    /// Direction label of every pixel (Unlabeled for invalid pixels)
    pub fn direction_labels(&self, image: &RasterGrid<f32>) -> FloodResult<Array2<DirectionLabel>> {
        let ctx = FilterContext::prepare(image)?;
        Ok(Array2::from_shape_fn(image.dim(), |(i, j)| {
            if image.is_valid(i, j) {
                direction_label(&ctx.samples(i, j).0)
            } else {
                DirectionLabel::Unlabeled
            }
        }))
    }

    /// Local noise variance estimate `sigmaV` of every pixel
    pub fn noise_variance(&self, image: &RasterGrid<f32>) -> FloodResult<RasterGrid<f32>> {
        let ctx = FilterContext::prepare(image)?;
        let data = Array2::from_shape_fn(image.dim(), |(i, j)| {
            let (means, vars) = ctx.samples(i, j);
            noise_variance(&means, &vars, self.params.noise_samples) as f32
        });
        RasterGrid::with_validity(data, image.validity().clone(), *image.geo())
    }

    fn filter_grid(&self, image: &RasterGrid<f32>) -> FloodResult<RasterGrid<f32>> {
        let ctx = FilterContext::prepare(image)?;
        let mut output = image.data().clone();
        let mut labels = Array2::from_elem(image.dim(), DirectionLabel::Unlabeled);

        let per_pixel = |(i, j): (usize, usize), out: &mut f32, label: &mut DirectionLabel| {
            if image.is_valid(i, j) {
                let (value, direction) = self.filter_pixel(&ctx, image, i, j);
                *out = value;
                *label = direction;
            }
        };

        #[cfg(feature = "parallel")]
        Zip::indexed(&mut output).and(&mut labels).par_for_each(per_pixel);
        #[cfg(not(feature = "parallel"))]
        Zip::indexed(&mut output).and(&mut labels).for_each(per_pixel);

        let unlabeled = Zip::from(&labels)
            .and(image.validity())
            .fold(0usize, |acc, &label, &ok| {
                if ok && label == DirectionLabel::Unlabeled {
                    acc + 1
                } else {
                    acc
                }
            });
        if unlabeled > 0 {
            log::warn!("{} valid pixels had no usable gradient and were left unfiltered", unlabeled);
        }

        if log::log_enabled!(log::Level::Debug) {
            let mut histogram = [0usize; 9];
            for label in labels.iter() {
                histogram[label.code() as usize] += 1;
            }
            log::debug!("Direction histogram (0 = unlabeled): {:?}", histogram);
        }

        RasterGrid::with_validity(output, image.validity().clone(), *image.geo())
    }

    fn filter_pixel(
        &self,
        ctx: &FilterContext,
        image: &RasterGrid<f32>,
        i: usize,
        j: usize,
    ) -> (f32, DirectionLabel) {
        let value = image.data()[[i, j]];
        let (means, vars) = ctx.samples(i, j);
        let label = direction_label(&means);

        // no usable gradient: leave the pixel as it is
        let taps = match label.kernel_index() {
            Some(k) => &ctx.directional_taps[k],
            None => return (value, label),
        };
        let stats = match footprint_stats(image, taps, i, j) {
            Some(stats) => stats,
            None => return (value, label),
        };

        let sigma_v = noise_variance(&means, &vars, self.params.noise_samples);
        let b = adaptive_weight(
            stats.mean,
            stats.variance,
            sigma_v,
            self.params.clamp_negative_variance,
        );
        ((stats.mean + b * (value as f64 - stats.mean)) as f32, label)
    }
}

impl Default for RefinedLeeFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoReference;
    use approx::assert_abs_diff_eq;

    fn grid(data: Array2<f32>) -> RasterGrid<f32> {
        RasterGrid::new(data, GeoReference::default()).unwrap()
    }

    /// Exponentially distributed single-look speckle around 1.0
    fn speckle(rows: usize, cols: usize, seed: u64) -> Array2<f32> {
        let mut state = seed;
        Array2::from_shape_fn((rows, cols), |_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let u = (state >> 33) as f64 / (1u64 << 31) as f64;
            (-(1.0 - u * 0.999).ln()) as f32
        })
    }

    fn interior_variance(data: &Array2<f32>) -> f64 {
        let view = data.slice(s![3..-3, 3..-3]);
        let n = view.len() as f64;
        let mean = view.iter().map(|&v| v as f64).sum::<f64>() / n;
        view.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n
    }

    #[test]
    fn test_kernel_shapes() {
        let rect = rect_kernel().unwrap();
        assert_eq!(rect.weights().sum(), 28.0);
        assert_eq!(rect.weights()[[2, 3]], 0.0);
        assert_eq!(rect.weights()[[3, 0]], 1.0);

        let diag = diag_kernel().unwrap();
        assert_eq!(diag.weights().sum(), 28.0);
        assert_eq!(diag.weights()[[0, 0]], 1.0);
        assert_eq!(diag.weights()[[0, 1]], 0.0);

        let kernels = directional_kernels().unwrap();
        assert_eq!(kernels.len(), 8);
        // Upper is the half window turned twice: top 4 rows
        assert_eq!(kernels[4].weights()[[0, 3]], 1.0);
        assert_eq!(kernels[4].weights()[[6, 3]], 0.0);
        assert!(kernels.iter().all(|k| k.weights()[[3, 3]] == 1.0));
    }

    #[test]
    fn test_sample_offsets_row_major() {
        let offsets: Vec<_> = sample_kernel().unwrap().taps().iter().map(|t| (t.0, t.1)).collect();
        assert_eq!(offsets.len(), SAMPLE_COUNT);
        assert_eq!(offsets[0], (-2, -2));
        assert_eq!(offsets[CENTER_SAMPLE], (0, 0));
        assert_eq!(offsets[8], (2, 2));
    }

    #[test]
    fn test_direction_codes_round_trip() {
        for code in 0..=8u8 {
            assert_eq!(DirectionLabel::from_code(code).unwrap().code(), code);
        }
        assert!(DirectionLabel::from_code(9).is_none());
    }

    #[test]
    fn test_tie_picks_first_band() {
        // flat neighbourhood: all gradients tie at zero
        let means = [2.0f32; SAMPLE_COUNT];
        assert_eq!(direction_label(&means), DirectionLabel::Upper);
    }

    #[test]
    fn test_homogeneous_region_is_unchanged() {
        let image = grid(Array2::from_elem((9, 9), 2.0));
        let filtered = RefinedLeeFilter::new().apply_filter(&image).unwrap();
        assert!(filtered.data().iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_preserves_dimensions_and_validity() {
        let mut valid = Array2::from_elem((10, 8), true);
        valid[[0, 0]] = false;
        valid[[5, 4]] = false;
        let image = RasterGrid::with_validity(speckle(10, 8, 7), valid.clone(), GeoReference::default()).unwrap();
        let filtered = RefinedLeeFilter::new().apply_filter(&image).unwrap();
        assert_eq!(filtered.dim(), image.dim());
        assert_eq!(filtered.validity(), &valid);
        assert_eq!(filtered.geo(), image.geo());
        assert_eq!(filtered.data()[[5, 4]], image.data()[[5, 4]]);
    }

    #[test]
    fn test_step_edge_is_preserved() {
        let image = grid(Array2::from_shape_fn((12, 12), |(i, _)| if i < 6 { 1.0 } else { 10.0 }));
        let filter = RefinedLeeFilter::new();
        let filtered = filter.apply_filter(&image).unwrap();
        for (a, b) in filtered.data().iter().zip(image.data().iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }

        let labels = filter.direction_labels(&image).unwrap();
        for row in 3..6 {
            assert_eq!(labels[[row, 5]], DirectionLabel::Lower);
        }
        assert_eq!(labels[[0, 5]], DirectionLabel::Upper);
    }

    #[test]
    fn test_speckle_is_suppressed() {
        let image = grid(speckle(20, 20, 12345));
        let filtered = RefinedLeeFilter::new().apply_filter(&image).unwrap();
        let before = interior_variance(image.data());
        let after = interior_variance(filtered.data());
        assert!(after < 0.5 * before, "variance {} -> {}", before, after);
    }

    #[test]
    fn test_tiled_matches_untiled() {
        let image = grid(speckle(23, 17, 99));
        let filter = RefinedLeeFilter::new();
        let whole = filter.apply_filter(&image).unwrap();
        for tile in [1, 4, 7, 64] {
            let tiled = filter.apply_tiled(&image, tile).unwrap();
            assert_eq!(tiled.data(), whole.data(), "tile size {}", tile);
        }
        assert!(filter.apply_tiled(&image, 0).is_err());
    }

    #[test]
    fn test_noise_variance_of_constant_is_zero() {
        let image = grid(Array2::from_elem((7, 7), 5.0));
        let sigma = RefinedLeeFilter::new().noise_variance(&image).unwrap();
        assert!(sigma.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_adaptive_weight_clamping() {
        // dir_mean² · sigmaV dominates: literal formula goes negative
        assert!(adaptive_weight(10.0, 1.0, 0.5, false) < 0.0);
        assert_eq!(adaptive_weight(10.0, 1.0, 0.5, true), 0.0);
        assert_eq!(adaptive_weight(3.0, 0.0, 0.2, false), 0.0);
        assert_abs_diff_eq!(adaptive_weight(1.0, 4.0, 0.0, true), 1.0);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let filter = RefinedLeeFilter::with_params(RefinedLeeParams {
            noise_samples: 10,
            ..Default::default()
        });
        let image = grid(Array2::from_elem((5, 5), 1.0));
        assert!(matches!(filter.apply_filter(&image), Err(FloodError::InvalidParameter(_))));
    }
}
