//! Core flood mapping modules

pub mod neighborhood;
pub mod units;
pub mod speckle_filter;
pub mod change_detection;
pub mod mask_refine;
pub mod terrain;
pub mod zonal;
pub mod scenes;
pub mod pipeline;

// Re-export main types
pub use neighborhood::{Kernel, NeighborhoodReducer, NeighborhoodStatistic};
pub use units::UnitConverter;
pub use speckle_filter::{DirectionLabel, RefinedLeeFilter, RefinedLeeParams};
pub use change_detection::{ChangeDetector, DEFAULT_DIFFERENCE_THRESHOLD};
pub use mask_refine::{Connectivity, MaskRefinementParams, MaskRefiner, RefinedMask, RefinementStats};
pub use terrain::slope_degrees;
pub use zonal::{DegradedAggregation, ZonalAggregator, ZonalMeasurement, ZonalParams, ZonalResult};
pub use scenes::{DateRange, EventWindow, Scene, SceneCollection, ScenePair};
pub use pipeline::{FloodPipeline, ReferenceLayers, SceneSource, SpatialUnit, UnitInput};
