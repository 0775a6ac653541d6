use crate::grid::{FloodMask, RasterGrid};
use crate::types::{FloodError, FloodResult};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Pixel adjacency used for connected regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Edge neighbours only
    Four,
    /// Edge and corner neighbours
    Eight,
}

impl Connectivity {
    fn offsets(self) -> &'static [(isize, isize)] {
        const FOUR: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
        const EIGHT: [(isize, isize); 8] = [
            (-1, -1),
            (-1, 0),
            (-1, 1),
            (0, -1),
            (0, 1),
            (1, -1),
            (1, 0),
            (1, 1),
        ];
        match self {
            Connectivity::Four => &FOUR,
            Connectivity::Eight => &EIGHT,
        }
    }
}

/// Mask refinement parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskRefinementParams {
    /// Months of water presence per year from which a pixel is permanent water
    pub permanent_water_months: u8,
    /// Pixels on slopes at or above this many degrees are removed
    pub slope_threshold_degrees: f32,
    /// Cap on the connected-pixel count of a region
    pub connectivity_radius: usize,
    /// A pixel survives only if its region counts more pixels than this
    pub min_connected_pixels: usize,
    pub connectivity: Connectivity,
}

impl Default for MaskRefinementParams {
    fn default() -> Self {
        Self {
            permanent_water_months: 5,
            slope_threshold_degrees: 5.0,
            connectivity_radius: 25,
            min_connected_pixels: 8,
            connectivity: Connectivity::Eight,
        }
    }
}

impl MaskRefinementParams {
    pub fn validate(&self) -> FloodResult<()> {
        if !(1..=12).contains(&self.permanent_water_months) {
            return Err(FloodError::InvalidParameter(format!(
                "permanent_water_months must be in 1..=12, got {}",
                self.permanent_water_months
            )));
        }
        if !self.slope_threshold_degrees.is_finite() || self.slope_threshold_degrees <= 0.0 {
            return Err(FloodError::InvalidParameter(format!(
                "slope_threshold_degrees must be positive, got {}",
                self.slope_threshold_degrees
            )));
        }
        if self.connectivity_radius == 0 {
            return Err(FloodError::InvalidParameter(
                "connectivity_radius must be positive".to_string(),
            ));
        }
        if self.min_connected_pixels >= self.connectivity_radius {
            return Err(FloodError::InvalidParameter(format!(
                "min_connected_pixels ({}) must be below connectivity_radius ({}) or no region can survive",
                self.min_connected_pixels, self.connectivity_radius
            )));
        }
        Ok(())
    }
}

/// Pixels removed at each refinement stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementStats {
    pub candidate_pixels: usize,
    pub removed_permanent_water: usize,
    pub removed_steep_slope: usize,
    pub removed_small_regions: usize,
    pub remaining_pixels: usize,
}

/// Refined flood mask with its refinement statistics
#[derive(Debug, Clone)]
pub struct RefinedMask {
    pub mask: FloodMask,
    pub stats: RefinementStats,
}

/// Removes non-flood signal from a candidate mask.
///
/// Each stage only clears flags, so the result is always a subset of the
/// candidate mask. Validity is left as the candidate's.
pub struct MaskRefiner {
    params: MaskRefinementParams,
}

impl MaskRefiner {
    pub fn new(params: MaskRefinementParams) -> Self {
        Self { params }
    }

    /// Create a refiner with default parameters
    pub fn standard() -> Self {
        Self::new(MaskRefinementParams::default())
    }

    pub fn params(&self) -> &MaskRefinementParams {
        &self.params
    }

    /// Clear pixels where the seasonality grid reports water in at least
    /// `permanent_water_months` months. No-data seasonality is not water.
    pub fn exclude_permanent_water(
        &self,
        mask: &FloodMask,
        seasonality: &RasterGrid<u8>,
    ) -> FloodResult<FloodMask> {
        mask.ensure_same_footprint(seasonality, "permanent water exclusion")?;
        let months = self.params.permanent_water_months;
        let flags = Zip::from(mask.data())
            .and(seasonality.data())
            .and(seasonality.validity())
            .map_collect(|&flag, &water, &ok| flag && !(ok && water >= months));
        RasterGrid::with_validity(flags, mask.validity().clone(), *mask.geo())
    }

    /// Keep only pixels on slopes strictly below the threshold. No-data
    /// slope is excluded.
    pub fn exclude_steep_terrain(&self, mask: &FloodMask, slope: &RasterGrid<f32>) -> FloodResult<FloodMask> {
        mask.ensure_same_footprint(slope, "slope exclusion")?;
        let threshold = self.params.slope_threshold_degrees;
        let flags = Zip::from(mask.data())
            .and(slope.data())
            .and(slope.validity())
            .map_collect(|&flag, &deg, &ok| flag && ok && deg < threshold);
        RasterGrid::with_validity(flags, mask.validity().clone(), *mask.geo())
    }

    /// Size of the connected region of every flagged pixel, capped at
    /// `connectivity_radius`. Unflagged pixels are invalid in the output.
    pub fn connected_pixel_count(&self, mask: &FloodMask) -> FloodResult<RasterGrid<u32>> {
        let (rows, cols) = mask.dim();
        let cap = self.params.connectivity_radius;
        let offsets = self.params.connectivity.offsets();

        let mut counts = Array2::<u32>::zeros((rows, cols));
        let mut visited = Array2::from_elem((rows, cols), false);
        let mut queue = VecDeque::new();
        let mut region = Vec::new();
        let mut regions = 0usize;

        for r in 0..rows {
            for c in 0..cols {
                if visited[[r, c]] || !mask.is_flagged(r, c) {
                    continue;
                }
                regions += 1;
                region.clear();
                visited[[r, c]] = true;
                queue.push_back((r, c));

                while let Some((cr, cc)) = queue.pop_front() {
                    region.push((cr, cc));
                    for &(dr, dc) in offsets {
                        let nr = cr as isize + dr;
                        let nc = cc as isize + dc;
                        if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                            continue;
                        }
                        let (nr, nc) = (nr as usize, nc as usize);
                        if !visited[[nr, nc]] && mask.is_flagged(nr, nc) {
                            visited[[nr, nc]] = true;
                            queue.push_back((nr, nc));
                        }
                    }
                }

                let size = region.len().min(cap) as u32;
                for &(pr, pc) in &region {
                    counts[[pr, pc]] = size;
                }
            }
        }

        log::debug!("Found {} connected flood regions", regions);
        let valid = Zip::from(mask.data())
            .and(mask.validity())
            .map_collect(|&flag, &ok| flag && ok);
        RasterGrid::with_validity(counts, valid, *mask.geo())
    }

    /// Clear pixels whose region has `min_connected_pixels` pixels or fewer
    pub fn exclude_small_regions(&self, mask: &FloodMask) -> FloodResult<FloodMask> {
        let counts = self.connected_pixel_count(mask)?;
        let min = self.params.min_connected_pixels as u32;
        let flags = Zip::from(mask.data())
            .and(counts.data())
            .map_collect(|&flag, &count| flag && count > min);
        RasterGrid::with_validity(flags, mask.validity().clone(), *mask.geo())
    }

    /// Permanent water, then slope, then small regions
    pub fn refine(
        &self,
        candidate: &FloodMask,
        seasonality: &RasterGrid<u8>,
        slope: &RasterGrid<f32>,
    ) -> FloodResult<RefinedMask> {
        log::info!("Refining flood candidate mask");
        log::debug!("Refinement parameters: {:?}", self.params);
        self.params.validate()?;

        let candidate_pixels = candidate.flagged_count();
        let without_water = self.exclude_permanent_water(candidate, seasonality)?;
        let after_water = without_water.flagged_count();
        let without_slopes = self.exclude_steep_terrain(&without_water, slope)?;
        let after_slope = without_slopes.flagged_count();
        let mask = self.exclude_small_regions(&without_slopes)?;
        let remaining_pixels = mask.flagged_count();

        let stats = RefinementStats {
            candidate_pixels,
            removed_permanent_water: candidate_pixels - after_water,
            removed_steep_slope: after_water - after_slope,
            removed_small_regions: after_slope - remaining_pixels,
            remaining_pixels,
        };
        log::debug!("Refinement statistics: {:?}", stats);

        Ok(RefinedMask { mask, stats })
    }
}
