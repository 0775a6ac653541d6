use crate::grid::RasterGrid;
use crate::types::BackscatterScale;
use num_traits::Float;

fn ten<T: Float>() -> T {
    T::from(10.0).unwrap_or_else(T::nan)
}

/// dB <-> natural unit transforms.
///
/// Both directions are total: `to_db` of zero gives `-inf` and of a negative
/// value gives NaN. These propagate as values and are masked out later.
pub struct UnitConverter;

impl UnitConverter {
    /// `10^(x/10)`
    #[inline]
    pub fn db_to_natural<T: Float>(x: T) -> T {
        ten::<T>().powf(x / ten())
    }

    /// `10·log10(x)`
    #[inline]
    pub fn natural_to_db<T: Float>(x: T) -> T {
        ten::<T>() * x.log10()
    }

    /// Convert a dB grid to natural units
    pub fn to_natural<T: Float>(grid: &RasterGrid<T>) -> RasterGrid<T> {
        log::debug!("Converting {:?} grid from dB to natural units", grid.dim());
        grid.map(|&x| Self::db_to_natural(x))
    }

    /// Convert a natural-unit grid to dB
    pub fn to_db<T: Float>(grid: &RasterGrid<T>) -> RasterGrid<T> {
        log::debug!("Converting {:?} grid from natural units to dB", grid.dim());
        grid.map(|&x| Self::natural_to_db(x))
    }

    /// Convert between scales; identical scales return a copy
    pub fn convert<T: Float>(grid: &RasterGrid<T>, from: BackscatterScale, to: BackscatterScale) -> RasterGrid<T> {
        match (from, to) {
            (BackscatterScale::Decibel, BackscatterScale::Natural) => Self::to_natural(grid),
            (BackscatterScale::Natural, BackscatterScale::Decibel) => Self::to_db(grid),
            _ => grid.clone(),
        }
    }
}
