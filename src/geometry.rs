//! Boundary geometry for zonal aggregation

use crate::types::{BoundingBox, FloodError, FloodResult};
use serde::{Deserialize, Serialize};

/// Polygon ring as (x, y) vertices in the raster's map units
pub type Ring = Vec<(f64, f64)>;

/// Polygon with optional holes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    exterior: Ring,
    holes: Vec<Ring>,
}

impl Polygon {
    pub fn new(exterior: Ring, holes: Vec<Ring>) -> FloodResult<Self> {
        if exterior.len() < 3 {
            return Err(FloodError::InvalidParameter(format!(
                "Polygon exterior needs at least 3 vertices, got {}",
                exterior.len()
            )));
        }
        if let Some(hole) = holes.iter().find(|h| h.len() < 3) {
            return Err(FloodError::InvalidParameter(format!(
                "Polygon hole needs at least 3 vertices, got {}",
                hole.len()
            )));
        }
        Ok(Self { exterior, holes })
    }

    /// Axis-aligned rectangle
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> FloodResult<Self> {
        Self::new(
            vec![(min_x, min_y), (max_x, min_y), (max_x, max_y), (min_x, max_y)],
            Vec::new(),
        )
    }

    pub fn exterior(&self) -> &[(f64, f64)] {
        &self.exterior
    }

    pub fn holes(&self) -> &[Ring] {
        &self.holes
    }

    /// Even-odd test; points inside a hole are outside the polygon
    pub fn contains(&self, x: f64, y: f64) -> bool {
        ring_contains(&self.exterior, x, y) && !self.holes.iter().any(|h| ring_contains(h, x, y))
    }

    pub fn bounds(&self) -> BoundingBox {
        let mut bbox = BoundingBox {
            min_lon: f64::MAX,
            max_lon: f64::MIN,
            min_lat: f64::MAX,
            max_lat: f64::MIN,
        };
        for &(x, y) in &self.exterior {
            bbox.min_lon = bbox.min_lon.min(x);
            bbox.max_lon = bbox.max_lon.max(x);
            bbox.min_lat = bbox.min_lat.min(y);
            bbox.max_lat = bbox.max_lat.max(y);
        }
        bbox
    }
}

fn ring_contains(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    let n = ring.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        // horizontal ray to +x crosses edge (j, i)
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Boundary of one spatial unit: a non-empty set of polygons
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    polygons: Vec<Polygon>,
}

impl Region {
    pub fn new(polygons: Vec<Polygon>) -> FloodResult<Self> {
        if polygons.is_empty() {
            return Err(FloodError::EmptyInput("Region has no polygons".to_string()));
        }
        Ok(Self { polygons })
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.polygons.iter().any(|p| p.contains(x, y))
    }

    /// Union of the polygon bounds
    pub fn bounds(&self) -> BoundingBox {
        self.polygons
            .iter()
            .map(Polygon::bounds)
            .reduce(|a, b| BoundingBox {
                min_lon: a.min_lon.min(b.min_lon),
                max_lon: a.max_lon.max(b.max_lon),
                min_lat: a.min_lat.min(b.min_lat),
                max_lat: a.max_lat.max(b.max_lat),
            })
            .unwrap_or(BoundingBox {
                min_lon: 0.0,
                max_lon: 0.0,
                min_lat: 0.0,
                max_lat: 0.0,
            })
    }
}

impl From<Polygon> for Region {
    fn from(polygon: Polygon) -> Self {
        Self {
            polygons: vec![polygon],
        }
    }
}
