use crate::config::FloodConfig;
use crate::core::change_detection::ChangeDetector;
use crate::core::mask_refine::{MaskRefiner, RefinedMask};
use crate::core::scenes::{Scene, SceneCollection, ScenePair};
use crate::core::speckle_filter::RefinedLeeFilter;
use crate::core::units::UnitConverter;
use crate::core::zonal::{ZonalAggregator, ZonalResult};
use crate::geometry::Region;
use crate::grid::{BackscatterGrid, RasterGrid};
use crate::types::{BackscatterScale, FloodError, FloodResult, GeoReference};
use chrono::{DateTime, Utc};
use std::borrow::Cow;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Administrative or analysis unit results are reported for
#[derive(Debug, Clone)]
pub struct SpatialUnit {
    pub id: String,
    pub name: Option<String>,
    pub region: Region,
}

/// Scenes of one unit, ready to run
#[derive(Debug, Clone)]
pub struct UnitInput {
    pub unit: SpatialUnit,
    pub scenes: ScenePair,
}

/// Static reference rasters shared by every unit of a run
#[derive(Debug, Clone)]
pub struct ReferenceLayers {
    /// Months per year with surface water
    pub seasonality: RasterGrid<u8>,
    /// Terrain slope in degrees
    pub slope: RasterGrid<f32>,
}

impl ReferenceLayers {
    pub fn new(seasonality: RasterGrid<u8>, slope: RasterGrid<f32>) -> FloodResult<Self> {
        seasonality.ensure_same_footprint(&slope, "reference layers")?;
        Ok(Self { seasonality, slope })
    }

    /// Layers over the footprint of `grid`, cropped when the layers cover a
    /// larger aligned area
    fn aligned_to<T: Clone>(&self, grid: &RasterGrid<T>) -> FloodResult<(Cow<'_, RasterGrid<u8>>, Cow<'_, RasterGrid<f32>>)> {
        Ok((
            crop_to(&self.seasonality, grid.geo(), grid.dim())?,
            crop_to(&self.slope, grid.geo(), grid.dim())?,
        ))
    }
}

fn crop_to<'a, T: Clone>(
    layer: &'a RasterGrid<T>,
    geo: &GeoReference,
    dim: (usize, usize),
) -> FloodResult<Cow<'a, RasterGrid<T>>> {
    if layer.geo() == geo && layer.dim() == dim {
        return Ok(Cow::Borrowed(layer));
    }

    let src = &layer.geo().transform;
    let dst = &geo.transform;
    let mismatch = || {
        FloodError::DimensionMismatch(format!(
            "Reference layer {:?} at {:?} does not cover grid {:?} at {:?}",
            layer.dim(),
            layer.geo(),
            dim,
            geo
        ))
    };

    let same_lattice = layer.geo().crs == geo.crs
        && src.pixel_width == dst.pixel_width
        && src.pixel_height == dst.pixel_height
        && src.rotation_x == 0.0
        && src.rotation_y == 0.0
        && dst.rotation_x == 0.0
        && dst.rotation_y == 0.0;
    if !same_lattice {
        return Err(mismatch());
    }

    let col = (dst.top_left_x - src.top_left_x) / src.pixel_width;
    let row = (dst.top_left_y - src.top_left_y) / src.pixel_height;
    let aligned = (col - col.round()).abs() < 1e-6 && (row - row.round()).abs() < 1e-6;
    if !aligned || col.round() < 0.0 || row.round() < 0.0 {
        return Err(mismatch());
    }

    let window = layer
        .window(row.round() as usize, col.round() as usize, dim.0, dim.1)
        .map_err(|_| mismatch())?;
    // snap the cropped transform onto the grid's so footprints compare equal
    let (data, valid, _) = window.into_parts();
    Ok(Cow::Owned(RasterGrid::with_validity(data, valid, *geo)?))
}

/// Source of candidate scenes for a unit, e.g. a catalogue client
pub trait SceneSource {
    fn scenes(&self, unit: &SpatialUnit, config: &FloodConfig) -> FloodResult<SceneCollection>;
}

/// Flood mapping pipeline.
///
/// Per unit: natural units, Refined Lee, comparison scale, ratio threshold,
/// mask refinement, zonal count. Units are independent and share only the
/// read-only reference layers.
pub struct FloodPipeline {
    config: FloodConfig,
    filter: RefinedLeeFilter,
    detector: ChangeDetector,
    refiner: MaskRefiner,
    aggregator: ZonalAggregator,
}

impl FloodPipeline {
    pub fn new(config: FloodConfig) -> FloodResult<Self> {
        config.validate()?;
        Ok(Self {
            filter: RefinedLeeFilter::with_params(config.refined_lee.clone()),
            detector: ChangeDetector::new(config.difference_threshold)?,
            refiner: MaskRefiner::new(config.refinement_params()),
            aggregator: ZonalAggregator::new(config.zonal.clone()),
            config,
        })
    }

    pub fn config(&self) -> &FloodConfig {
        &self.config
    }

    /// Despeckled scene in the comparison scale
    pub fn despeckle(&self, scene: &Scene) -> FloodResult<BackscatterGrid> {
        let natural = UnitConverter::convert(&scene.grid, scene.scale, BackscatterScale::Natural);
        let filtered = self.filter.apply_filter(&natural)?;
        Ok(UnitConverter::convert(
            &filtered,
            BackscatterScale::Natural,
            self.config.comparison_scale,
        ))
    }

    /// Refined flood mask of a scene pair
    pub fn flood_mask(&self, scenes: &ScenePair, layers: &ReferenceLayers) -> FloodResult<RefinedMask> {
        scenes
            .before
            .grid
            .ensure_same_footprint(&scenes.after.grid, "scene pair")?;
        let (seasonality, slope) = layers.aligned_to(&scenes.before.grid)?;

        let before = self.despeckle(&scenes.before)?;
        let after = self.despeckle(&scenes.after)?;
        let candidate = self.detector.detect(&before, &after)?;
        self.refiner.refine(&candidate, &seasonality, &slope)
    }

    /// Run the full chain for one unit
    pub fn run_unit(&self, unit: &SpatialUnit, scenes: &ScenePair, layers: &ReferenceLayers) -> FloodResult<ZonalResult> {
        log::info!("Processing unit {}", unit.id);
        let refined = self.flood_mask(scenes, layers)?;
        let measurement = self.aggregator.aggregate(&refined.mask, &unit.region)?;
        log::info!(
            "Unit {}: {} flooded pixels, {:.0} m2",
            unit.id,
            measurement.pixel_count,
            measurement.area
        );
        Ok(ZonalResult {
            unit_id: unit.id.clone(),
            unit_name: unit.name.clone(),
            measurement,
            refinement: Some(refined.stats),
        })
    }

    /// Run many units; results are in input order and fail independently
    pub fn run_units(&self, inputs: &[UnitInput], layers: &ReferenceLayers) -> Vec<FloodResult<ZonalResult>> {
        log::info!("Processing {} units", inputs.len());
        let run = |input: &UnitInput| self.run_unit(&input.unit, &input.scenes, layers);

        #[cfg(feature = "parallel")]
        let results: Vec<_> = inputs.par_iter().map(run).collect();

        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = inputs.iter().map(run).collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            log::warn!("{} of {} units failed", failed, results.len());
        }
        results
    }

    /// Fetch scenes for every unit from `source`, select the event pair and run
    pub fn run_source<S: SceneSource + Sync>(
        &self,
        source: &S,
        units: &[SpatialUnit],
        event: DateTime<Utc>,
        layers: &ReferenceLayers,
    ) -> Vec<FloodResult<ZonalResult>> {
        log::info!("Mapping flood event of {} for {} units", event, units.len());
        let run = |unit: &SpatialUnit| -> FloodResult<ZonalResult> {
            let scenes = source.scenes(unit, &self.config)?.event_pair(&self.config, event)?;
            self.run_unit(unit, &scenes, layers)
        };

        #[cfg(feature = "parallel")]
        let results: Vec<_> = units.par_iter().map(run).collect();

        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = units.iter().map(run).collect();

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;
    use crate::types::{CoordinateSystem, GeoTransform, OrbitPass, Polarization};
    use chrono::TimeZone;
    use ndarray::Array2;

    fn geo(x: f64, y: f64) -> GeoReference {
        GeoReference::new(GeoTransform::north_up(x, y, 100.0), CoordinateSystem::Projected { epsg: 32647 })
    }

    #[test]
    fn test_layers_cropped_to_scene() {
        let seasonality = RasterGrid::new(
            Array2::from_shape_fn((10, 10), |(i, j)| (i * 10 + j) as u8),
            geo(0.0, 1000.0),
        )
        .unwrap();
        let slope = RasterGrid::from_elem(10, 10, 1.0f32, geo(0.0, 1000.0)).unwrap();
        let layers = ReferenceLayers::new(seasonality, slope).unwrap();

        let scene = RasterGrid::from_elem(3, 4, 0.5f32, geo(200.0, 700.0)).unwrap();
        let (water, slope) = layers.aligned_to(&scene).unwrap();
        assert_eq!(water.dim(), (3, 4));
        assert_eq!(water.data()[[0, 0]], 32);
        assert_eq!(water.geo(), scene.geo());
        assert_eq!(slope.dim(), (3, 4));

        let misaligned = RasterGrid::from_elem(3, 4, 0.5f32, geo(250.0, 700.0)).unwrap();
        assert!(matches!(
            layers.aligned_to(&misaligned),
            Err(FloodError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_dark_after_scene_floods_in_db() {
        // open water darkens the after image: -8 dB -> -16 dB gives ratio 2
        let g = geo(0.0, 1000.0);
        let scene = |day: u32, db: f32| Scene {
            acquired: Utc.with_ymd_and_hms(2022, 8, day, 0, 0, 0).unwrap(),
            polarization: Polarization::VH,
            pass: OrbitPass::Ascending,
            resolution_m: 10.0,
            scale: BackscatterScale::Decibel,
            grid: RasterGrid::from_elem(10, 10, db, g).unwrap(),
        };
        let scenes = ScenePair {
            before: scene(1, -8.0),
            after: scene(20, -16.0),
        };
        let layers = ReferenceLayers::new(
            RasterGrid::from_elem(10, 10, 0u8, g).unwrap(),
            RasterGrid::from_elem(10, 10, 0.0f32, g).unwrap(),
        )
        .unwrap();
        let unit = SpatialUnit {
            id: "unit-1".to_string(),
            name: None,
            region: Polygon::rectangle(0.0, 0.0, 1000.0, 1000.0).unwrap().into(),
        };
        let config = FloodConfig {
            zonal: crate::core::zonal::ZonalParams {
                sampling_scale: 100.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let pipeline = FloodPipeline::new(config).unwrap();
        let result = pipeline.run_unit(&unit, &scenes, &layers).unwrap();
        assert_eq!(result.measurement.pixel_count, 100);
        assert_eq!(result.refinement.unwrap().candidate_pixels, 100);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = FloodConfig {
            difference_threshold: f32::NAN,
            ..Default::default()
        };
        assert!(FloodPipeline::new(config).is_err());
    }
}
