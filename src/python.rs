//! Python bindings for the flood mapping stages

use crate::core::change_detection::ChangeDetector;
use crate::core::speckle_filter::{RefinedLeeFilter, RefinedLeeParams};
use crate::core::units::UnitConverter;
use crate::grid::RasterGrid;
use crate::types::{FloodError, GeoReference};
use ndarray::{Array2, Zip};
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(e: FloodError) -> PyErr {
    match e {
        FloodError::DimensionMismatch(_) | FloodError::EmptyInput(_) | FloodError::InvalidParameter(_) => {
            PyValueError::new_err(e.to_string())
        }
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

/// numpy image to grid; non-finite cells are no-data
fn numpy_to_grid(arr: PyReadonlyArray2<f32>) -> PyResult<RasterGrid<f32>> {
    let data = arr.as_array().to_owned();
    let valid = data.mapv(|v| v.is_finite());
    RasterGrid::with_validity(data, valid, GeoReference::default()).map_err(to_py_err)
}

/// Grid values with no-data cells as NaN
fn grid_to_array(grid: &RasterGrid<f32>) -> Array2<f32> {
    Zip::from(grid.data())
        .and(grid.validity())
        .map_collect(|&v, &ok| if ok { v } else { f32::NAN })
}

/// Refined Lee filter of a natural-unit image
#[pyfunction]
fn refined_lee(py: Python, image: PyReadonlyArray2<f32>, tile_size: Option<usize>) -> PyResult<PyObject> {
    let grid = numpy_to_grid(image)?;
    let filter = RefinedLeeFilter::with_params(RefinedLeeParams {
        tile_size,
        ..Default::default()
    });
    let filtered = filter.apply_filter(&grid).map_err(to_py_err)?;
    Ok(grid_to_array(&filtered).to_pyarray(py).into())
}

/// Natural units to dB
#[pyfunction]
fn to_db(py: Python, image: PyReadonlyArray2<f32>) -> PyResult<PyObject> {
    let grid = numpy_to_grid(image)?;
    Ok(UnitConverter::to_db(&grid).data().to_pyarray(py).into())
}

/// dB to natural units
#[pyfunction]
fn to_natural(py: Python, image: PyReadonlyArray2<f32>) -> PyResult<PyObject> {
    let grid = numpy_to_grid(image)?;
    Ok(UnitConverter::to_natural(&grid).data().to_pyarray(py).into())
}

/// Boolean flood candidates where `after / before` exceeds the threshold
#[pyfunction]
fn detect_flood(
    py: Python,
    before: PyReadonlyArray2<f32>,
    after: PyReadonlyArray2<f32>,
    threshold: Option<f32>,
) -> PyResult<PyObject> {
    let before = numpy_to_grid(before)?;
    let after = numpy_to_grid(after)?;
    let detector = match threshold {
        Some(t) => ChangeDetector::new(t).map_err(to_py_err)?,
        None => ChangeDetector::default(),
    };
    let mask = detector.detect(&before, &after).map_err(to_py_err)?;
    let flags = Zip::from(mask.data())
        .and(mask.validity())
        .map_collect(|&flag, &ok| flag && ok);
    Ok(flags.to_pyarray(py).into())
}

#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(refined_lee, m)?)?;
    m.add_function(wrap_pyfunction!(to_db, m)?)?;
    m.add_function(wrap_pyfunction!(to_natural, m)?)?;
    m.add_function(wrap_pyfunction!(detect_flood, m)?)?;
    Ok(())
}
