use serde::{Deserialize, Serialize};

/// Metres per degree of latitude
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Coordinate system enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (latitude, longitude)
    Geographic,
    /// Projected coordinates (e.g., UTM)
    Projected { epsg: u32 },
}

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl std::str::FromStr for Polarization {
    type Err = FloodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(FloodError::InvalidParameter(format!(
                "Invalid polarization: {}",
                s
            ))),
        }
    }
}

/// Orbit pass direction of an acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrbitPass {
    Ascending,
    Descending,
}

/// Scale in which backscatter values are expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackscatterScale {
    /// Logarithmic decibel scale
    Decibel,
    /// Linear power scale
    Natural,
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_lon && x <= self.max_lon && y >= self.min_lat && y <= self.max_lat
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    /// Map coordinates of the centre of cell (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Transform of a window whose top-left cell is (row, col) of this grid
    pub fn offset(&self, row: usize, col: usize) -> Self {
        let c = col as f64;
        let r = row as f64;
        Self {
            top_left_x: self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            top_left_y: self.top_left_y + c * self.rotation_y + r * self.pixel_height,
            ..*self
        }
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::north_up(0.0, 0.0, 1.0)
    }
}

/// Georeferencing carried by every raster: affine transform plus CRS.
/// Opaque to the algorithms, compared for equality on joint operations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
    pub transform: GeoTransform,
    pub crs: CoordinateSystem,
}

impl GeoReference {
    pub fn new(transform: GeoTransform, crs: CoordinateSystem) -> Self {
        Self { transform, crs }
    }

    /// East-west and north-south extent of cell (row, col).
    ///
    /// Metres for geographic grids, scaled by `cos(lat)` along x at the
    /// cell centre; map units otherwise.
    pub fn cell_ground_size(&self, row: usize, col: usize) -> (f64, f64) {
        let t = &self.transform;
        let x = t.pixel_width.hypot(t.rotation_y);
        let y = t.pixel_height.hypot(t.rotation_x);
        match self.crs {
            CoordinateSystem::Geographic => {
                let (_, lat) = t.pixel_center(row, col);
                (x * METERS_PER_DEGREE * lat.to_radians().cos(), y * METERS_PER_DEGREE)
            }
            CoordinateSystem::Projected { .. } => (x, y),
        }
    }
}

impl Default for GeoReference {
    fn default() -> Self {
        Self {
            transform: GeoTransform::default(),
            crs: CoordinateSystem::Projected { epsg: 3857 },
        }
    }
}

/// Error types for flood mapping
#[derive(Debug, thiserror::Error)]
pub enum FloodError {
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Aggregation needs {required} pixels, budget is {budget} and best effort is disabled")]
    AggregationBudgetExceeded { required: usize, budget: usize },

}

/// Result type for flood mapping operations
pub type FloodResult<T> = Result<T, FloodError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_center_north_up() {
        let gt = GeoTransform::north_up(100.0, 200.0, 10.0);
        let (x, y) = gt.pixel_center(0, 0);
        assert_eq!((x, y), (105.0, 195.0));
        let (x, y) = gt.pixel_center(2, 3);
        assert_eq!((x, y), (135.0, 175.0));
    }

    #[test]
    fn test_geographic_cell_narrows_with_latitude() {
        let equator = GeoReference::new(GeoTransform::north_up(0.0, 0.0005, 0.001), CoordinateSystem::Geographic);
        let (x, y) = equator.cell_ground_size(0, 0);
        assert!((x - 111.32).abs() < 1e-6);
        assert!((y - 111.32).abs() < 1e-9);

        let north = GeoReference::new(GeoTransform::north_up(0.0, 60.0005, 0.001), CoordinateSystem::Geographic);
        let (x, y) = north.cell_ground_size(0, 0);
        assert!((x - 55.66).abs() < 1e-3);
        assert!((y - 111.32).abs() < 1e-9);

        let utm = GeoReference::new(GeoTransform::north_up(0.0, 0.0, 10.0), CoordinateSystem::Projected { epsg: 32633 });
        assert_eq!(utm.cell_ground_size(5, 5), (10.0, 10.0));
    }

    #[test]
    fn test_offset_window_transform() {
        let gt = GeoTransform::north_up(0.0, 100.0, 5.0);
        let window = gt.offset(4, 2);
        assert_eq!(window.top_left_x, 10.0);
        assert_eq!(window.top_left_y, 80.0);
        assert_eq!(window.pixel_center(0, 0), gt.pixel_center(4, 2));
    }

    #[test]
    fn test_polarization_parsing() {
        assert_eq!("vh".parse::<Polarization>().unwrap(), Polarization::VH);
        assert!("XX".parse::<Polarization>().is_err());
    }
}
