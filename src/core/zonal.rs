use crate::core::mask_refine::RefinementStats;
use crate::geometry::Region;
use crate::grid::FloodMask;
use crate::types::{BoundingBox, FloodError, FloodResult, GeoTransform};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Smallest sampling scale accepted, in metres
pub const MIN_SAMPLING_SCALE: f64 = 50.0;

/// Zonal aggregation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZonalParams {
    /// Sampling resolution in metres
    pub sampling_scale: f64,
    /// Coarsen instead of failing when the pixel budget is exceeded
    pub best_effort: bool,
    /// Maximum number of sample cells per aggregation
    pub max_pixels: usize,
}

impl Default for ZonalParams {
    fn default() -> Self {
        Self {
            sampling_scale: 150.0,
            best_effort: true,
            max_pixels: 10_000_000,
        }
    }
}

impl ZonalParams {
    pub fn validate(&self) -> FloodResult<()> {
        if !self.sampling_scale.is_finite() || self.sampling_scale < MIN_SAMPLING_SCALE {
            return Err(FloodError::InvalidParameter(format!(
                "sampling_scale must be at least {} m, got {}",
                MIN_SAMPLING_SCALE, self.sampling_scale
            )));
        }
        if self.max_pixels == 0 {
            return Err(FloodError::InvalidParameter("max_pixels must be positive".to_string()));
        }
        Ok(())
    }
}

/// Aggregation was coarsened to stay within the pixel budget
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradedAggregation {
    pub requested_scale: f64,
    pub effective_scale: f64,
}

/// Flooded extent of one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalMeasurement {
    /// Flooded sample cells inside the region
    pub pixel_count: u64,
    /// `pixel_count` times the ground area of one sample cell, in square metres
    pub area: f64,
    /// Ground size of one sample cell in metres, the geometric mean of its
    /// sides on geographic grids
    pub effective_scale: f64,
    /// Native cells per sample cell along each axis
    pub sample_stride: usize,
    pub degraded: Option<DegradedAggregation>,
}

impl ZonalMeasurement {
    /// False when the budget forced coarser sampling than requested
    pub fn is_precise(&self) -> bool {
        self.degraded.is_none()
    }
}

/// Per-unit output of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalResult {
    pub unit_id: String,
    pub unit_name: Option<String>,
    #[serde(flatten)]
    pub measurement: ZonalMeasurement,
    pub refinement: Option<RefinementStats>,
}

/// Counts flooded pixels inside a region on a sampling lattice.
///
/// The lattice keeps one native cell, the centre of each `stride × stride`
/// block, where `stride = max(1, round(scale / native))`. Coarser scales
/// trade precision for fewer evaluated cells.
pub struct ZonalAggregator {
    params: ZonalParams,
}

impl ZonalAggregator {
    pub fn new(params: ZonalParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ZonalParams {
        &self.params
    }

    pub fn aggregate(&self, mask: &FloodMask, region: &Region) -> FloodResult<ZonalMeasurement> {
        self.params.validate()?;

        let transform = mask.geo().transform;
        let (rows, cols) = mask.dim();
        let bounds = region.bounds();
        let window = pixel_window(&transform, &bounds, rows, cols);

        // cell size at the centre of the covered window
        let (centre_row, centre_col) = match window {
            Some((r0, r1, c0, c1)) => ((r0 + r1) / 2, (c0 + c1) / 2),
            None => (rows / 2, cols / 2),
        };
        let cell = mask.geo().cell_ground_size(centre_row, centre_col);
        let native = (cell.0 * cell.1).sqrt();
        if !native.is_finite() || native <= 0.0 {
            return Err(FloodError::InvalidParameter(format!(
                "Mask has no usable pixel size ({:?})",
                cell
            )));
        }

        let Some((r0, r1, c0, c1)) = window else {
            log::debug!("Region does not intersect the mask");
            return Ok(self.measurement(0, cell, 1, false));
        };

        let mut stride = ((self.params.sampling_scale / native).round() as usize).max(1);
        let mut degraded = false;
        loop {
            let required = block_span(r0, r1, stride) * block_span(c0, c1, stride);
            if required <= self.params.max_pixels {
                break;
            }
            if !self.params.best_effort {
                return Err(FloodError::AggregationBudgetExceeded {
                    required,
                    budget: self.params.max_pixels,
                });
            }
            stride *= 2;
            degraded = true;
        }

        let block_rows: Vec<usize> = block_starts(r0, r1, stride).collect();
        let count_row = |&br: &usize| -> u64 {
            let r = sample_index(br, stride, rows);
            block_starts(c0, c1, stride)
                .filter(|&bc| {
                    let c = sample_index(bc, stride, cols);
                    let (x, y) = transform.pixel_center(r, c);
                    mask.is_flagged(r, c) && bounds.contains(x, y) && region.contains(x, y)
                })
                .count() as u64
        };

        #[cfg(feature = "parallel")]
        let pixel_count: u64 = block_rows.par_iter().map(count_row).sum();

        #[cfg(not(feature = "parallel"))]
        let pixel_count: u64 = block_rows.iter().map(count_row).sum();

        let measurement = self.measurement(pixel_count, cell, stride, degraded);
        if let Some(d) = &measurement.degraded {
            log::warn!(
                "Zonal aggregation exceeded {} pixels, sampled at {:.1} m instead of {:.1} m",
                self.params.max_pixels,
                d.effective_scale,
                d.requested_scale
            );
        }
        log::debug!(
            "Counted {} flooded sample cells at stride {}",
            pixel_count,
            stride
        );
        Ok(measurement)
    }

    fn measurement(&self, pixel_count: u64, cell: (f64, f64), stride: usize, degraded: bool) -> ZonalMeasurement {
        let sample_area = cell.0 * cell.1 * (stride * stride) as f64;
        let effective_scale = sample_area.sqrt();
        ZonalMeasurement {
            pixel_count,
            area: pixel_count as f64 * sample_area,
            effective_scale,
            sample_stride: stride,
            degraded: degraded.then_some(DegradedAggregation {
                requested_scale: self.params.sampling_scale,
                effective_scale,
            }),
        }
    }
}

impl Default for ZonalAggregator {
    fn default() -> Self {
        Self::new(ZonalParams::default())
    }
}

/// Inclusive-exclusive cell window covering a bounding box, `None` if disjoint
fn pixel_window(
    transform: &GeoTransform,
    bbox: &BoundingBox,
    rows: usize,
    cols: usize,
) -> Option<(usize, usize, usize, usize)> {
    if transform.rotation_x != 0.0 || transform.rotation_y != 0.0 {
        return Some((0, rows, 0, cols));
    }

    let col_a = (bbox.min_lon - transform.top_left_x) / transform.pixel_width;
    let col_b = (bbox.max_lon - transform.top_left_x) / transform.pixel_width;
    let row_a = (bbox.min_lat - transform.top_left_y) / transform.pixel_height;
    let row_b = (bbox.max_lat - transform.top_left_y) / transform.pixel_height;

    let clamp = |lo: f64, hi: f64, n: usize| -> Option<(usize, usize)> {
        let start = lo.min(hi).floor().max(0.0);
        let end = lo.max(hi).ceil().min(n as f64);
        if end <= start {
            None
        } else {
            Some((start as usize, end as usize))
        }
    };

    let (r0, r1) = clamp(row_a, row_b, rows)?;
    let (c0, c1) = clamp(col_a, col_b, cols)?;
    Some((r0, r1, c0, c1))
}

/// Starts of the stride-aligned blocks overlapping `[lo, hi)`
fn block_starts(lo: usize, hi: usize, stride: usize) -> impl Iterator<Item = usize> {
    ((lo / stride) * stride..hi).step_by(stride)
}

fn block_span(lo: usize, hi: usize, stride: usize) -> usize {
    (hi - 1) / stride - lo / stride + 1
}

/// Centre cell of the block starting at `start`, for a truncated last block too
fn sample_index(start: usize, stride: usize, n: usize) -> usize {
    let end = (start + stride).min(n);
    start + (end - start) / 2
}
