use crate::grid::{FloodMask, RasterGrid};
use crate::types::{FloodError, FloodResult};
use ndarray::Zip;

/// Default ratio above which a pixel becomes a flood candidate
pub const DEFAULT_DIFFERENCE_THRESHOLD: f32 = 1.25;

/// Ratio change detector between a pre-event and a post-event image.
///
/// `after / before` is compared against a single hard threshold with strict
/// `>`. Non-finite ratios (zero or missing before-values) are no-data in the
/// candidate mask, never errors.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    threshold: f32,
}

impl ChangeDetector {
    pub fn new(threshold: f32) -> FloodResult<Self> {
        if !threshold.is_finite() {
            return Err(FloodError::InvalidParameter(format!(
                "Difference threshold must be finite, got {}",
                threshold
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Elementwise `after / before`, valid where both inputs are valid
    pub fn ratio(&self, before: &RasterGrid<f32>, after: &RasterGrid<f32>) -> FloodResult<RasterGrid<f32>> {
        before.ensure_same_footprint(after, "change ratio")?;

        let data = Zip::from(before.data())
            .and(after.data())
            .map_collect(|&b, &a| a / b);
        let valid = Zip::from(before.validity())
            .and(after.validity())
            .map_collect(|&b, &a| b && a);

        RasterGrid::with_validity(data, valid, *before.geo())
    }

    /// Candidate mask from a ratio grid
    pub fn threshold_ratio(&self, ratio: &RasterGrid<f32>) -> FloodResult<FloodMask> {
        let threshold = self.threshold;
        let flags = ratio.data().mapv(|r| r > threshold);
        let valid = Zip::from(ratio.data())
            .and(ratio.validity())
            .map_collect(|r, &ok| ok && r.is_finite());

        let mask = RasterGrid::with_validity(flags, valid, *ratio.geo())?;
        log::debug!(
            "Change threshold {} flagged {} of {} pixels",
            threshold,
            mask.flagged_count(),
            mask.valid_count()
        );
        Ok(mask)
    }

    /// Ratio then threshold
    pub fn detect(&self, before: &RasterGrid<f32>, after: &RasterGrid<f32>) -> FloodResult<FloodMask> {
        log::info!("Detecting change with ratio threshold {}", self.threshold);
        let ratio = self.ratio(before, after)?;
        self.threshold_ratio(&ratio)
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DIFFERENCE_THRESHOLD,
        }
    }
}
