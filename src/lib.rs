//! sarflood: SAR change-detection flood mapping
//!
//! Maps flood extent from a pre-event and a post-event Sentinel-1 backscatter
//! image: Refined Lee despeckling, ratio change detection, removal of
//! permanent water, steep terrain and speckle residue, and a flooded-pixel
//! count per spatial unit.

pub mod types;
pub mod grid;
pub mod geometry;
pub mod config;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BackscatterScale, CoordinateSystem, FloodError, FloodResult, GeoReference, GeoTransform, OrbitPass,
    Polarization,
};
pub use grid::{BackscatterGrid, FloodMask, RasterGrid};
pub use geometry::{Polygon, Region};
pub use config::FloodConfig;
pub use crate::core::{
    ChangeDetector, FloodPipeline, MaskRefiner, NeighborhoodReducer, RefinedLeeFilter, ReferenceLayers,
    SpatialUnit, UnitConverter, ZonalAggregator, ZonalResult,
};
