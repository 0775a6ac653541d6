//! Flood mapping configuration

use crate::core::mask_refine::{Connectivity, MaskRefinementParams};
use crate::core::speckle_filter::RefinedLeeParams;
use crate::core::zonal::ZonalParams;
use crate::types::{BackscatterScale, FloodError, FloodResult, OrbitPass, Polarization};
use serde::{Deserialize, Serialize};

/// Configuration for a flood mapping run.
///
/// Passed explicitly to the pipeline; nothing is read from global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    /// Post/pre ratio above which a pixel is a flood candidate
    pub difference_threshold: f32,
    /// Months of water per year from which a pixel is permanent water
    pub permanent_water_months: u8,
    /// Maximum terrain slope for flood pixels, in degrees
    pub slope_threshold_degrees: f32,
    /// Cap on connected-pixel counts
    pub connectivity_radius: usize,
    /// Pixels in regions of this size or smaller are removed
    pub min_connected_pixels: usize,
    pub connectivity: Connectivity,
    /// Scale in which despeckled images are compared
    pub comparison_scale: BackscatterScale,
    pub polarization: Polarization,
    pub pass_direction: OrbitPass,
    /// Nominal scene resolution in metres
    pub resolution_m: f64,
    /// Days before and after the event searched for scenes
    pub event_window_days: i64,
    pub refined_lee: RefinedLeeParams,
    pub zonal: ZonalParams,
}

impl Default for FloodConfig {
    fn default() -> Self {
        let refinement = MaskRefinementParams::default();
        Self {
            difference_threshold: crate::core::change_detection::DEFAULT_DIFFERENCE_THRESHOLD,
            permanent_water_months: refinement.permanent_water_months,
            slope_threshold_degrees: refinement.slope_threshold_degrees,
            connectivity_radius: refinement.connectivity_radius,
            min_connected_pixels: refinement.min_connected_pixels,
            connectivity: refinement.connectivity,
            comparison_scale: BackscatterScale::Decibel,
            polarization: Polarization::VH,
            pass_direction: OrbitPass::Ascending,
            resolution_m: 10.0,
            event_window_days: 24,
            refined_lee: RefinedLeeParams::default(),
            zonal: ZonalParams::default(),
        }
    }
}

impl FloodConfig {
    /// Check every value is in its domain
    pub fn validate(&self) -> FloodResult<()> {
        if !self.difference_threshold.is_finite() || self.difference_threshold <= 0.0 {
            return Err(FloodError::InvalidParameter(format!(
                "difference_threshold must be finite and positive, got {}",
                self.difference_threshold
            )));
        }
        if !self.resolution_m.is_finite() || self.resolution_m <= 0.0 {
            return Err(FloodError::InvalidParameter(format!(
                "resolution_m must be positive, got {}",
                self.resolution_m
            )));
        }
        if self.event_window_days <= 0 {
            return Err(FloodError::InvalidParameter(format!(
                "event_window_days must be positive, got {}",
                self.event_window_days
            )));
        }
        self.refinement_params().validate()?;
        self.refined_lee.validate()?;
        self.zonal.validate()
    }

    /// Mask refinement parameters carried by this configuration
    pub fn refinement_params(&self) -> MaskRefinementParams {
        MaskRefinementParams {
            permanent_water_months: self.permanent_water_months,
            slope_threshold_degrees: self.slope_threshold_degrees,
            connectivity_radius: self.connectivity_radius,
            min_connected_pixels: self.min_connected_pixels,
            connectivity: self.connectivity,
        }
    }
}
