use approx::assert_relative_eq;
use ndarray::{s, Array2};
use sarflood::core::speckle_filter::{directional_kernels, DirectionLabel};
use sarflood::core::{Kernel, NeighborhoodStatistic, RefinedLeeParams};
use sarflood::{GeoReference, NeighborhoodReducer, RasterGrid, RefinedLeeFilter, UnitConverter};
use std::time::Instant;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Exponentially distributed single-look intensity around `base`
fn speckle(rows: usize, cols: usize, seed: u64, base: f32) -> Array2<f32> {
    let mut state = seed;
    Array2::from_shape_fn((rows, cols), |_| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let u = (state >> 33) as f64 / (1u64 << 31) as f64;
        base * (-(1.0 - u * 0.999).ln()) as f32
    })
}

#[test]
fn test_homogeneous_region_unchanged() {
    init_logging();
    let image = RasterGrid::from_elem(16, 16, 0.37f32, GeoReference::default()).unwrap();
    let filtered = RefinedLeeFilter::new().apply_filter(&image).unwrap();
    for &v in filtered.data() {
        assert_eq!(v, 0.37);
    }
}

#[test]
fn test_shape_and_validity_preserved() {
    init_logging();
    let data = speckle(20, 31, 11, 0.05);
    let valid = Array2::from_shape_fn((20, 31), |(i, j)| !(i == 4 && j > 10 && j < 15) && j != 30);
    let image = RasterGrid::with_validity(data.clone(), valid.clone(), GeoReference::default()).unwrap();

    let filtered = RefinedLeeFilter::new().apply_filter(&image).unwrap();
    assert_eq!(filtered.dim(), (20, 31));
    assert_eq!(filtered.validity(), &valid);
    assert_eq!(filtered.geo(), image.geo());
    assert_eq!(filtered.data()[[4, 12]], data[[4, 12]]);
    assert!(filtered
        .data()
        .indexed_iter()
        .filter(|&((i, j), _)| valid[[i, j]])
        .all(|(_, v)| v.is_finite()));
}

#[test]
fn test_speckle_suppressed_edge_kept() {
    init_logging();
    // dark water on the left, bright land on the right
    let mut data = speckle(40, 40, 3, 0.02);
    let bright = speckle(40, 20, 5, 0.2);
    data.slice_mut(s![.., 20..]).assign(&bright);
    let image = RasterGrid::new(data, GeoReference::default()).unwrap();

    let start = Instant::now();
    let filtered = RefinedLeeFilter::new().apply_filter(&image).unwrap();
    println!("Filtered 40x40 in {:.3} ms", start.elapsed().as_secs_f64() * 1e3);

    let mean = |d: &Array2<f32>, c0: usize, c1: usize| {
        let v = d.slice(s![5..35, c0..c1]);
        v.iter().map(|&x| x as f64).sum::<f64>() / v.len() as f64
    };
    let variance = |d: &Array2<f32>, c0: usize, c1: usize| {
        let m = mean(d, c0, c1);
        let v = d.slice(s![5..35, c0..c1]);
        v.iter().map(|&x| (x as f64 - m).powi(2)).sum::<f64>() / v.len() as f64
    };

    assert!(variance(filtered.data(), 24, 36) < 0.5 * variance(image.data(), 24, 36));
    assert!(variance(filtered.data(), 4, 16) < 0.5 * variance(image.data(), 4, 16));
    // contrast across the edge survives
    assert!(mean(filtered.data(), 21, 24) > 3.0 * mean(filtered.data(), 16, 19));
}

#[test]
fn test_tiled_matches_untiled() {
    init_logging();
    let image = RasterGrid::new(speckle(37, 29, 17, 0.1), GeoReference::default()).unwrap();
    let whole = RefinedLeeFilter::new().apply_filter(&image).unwrap();

    let tiled = RefinedLeeFilter::with_params(RefinedLeeParams {
        tile_size: Some(10),
        ..Default::default()
    })
    .apply_filter(&image)
    .unwrap();
    assert_eq!(tiled, whole);
}

#[test]
fn test_every_valid_pixel_has_one_direction() {
    let image = RasterGrid::new(speckle(15, 15, 23, 0.1), GeoReference::default()).unwrap();
    let labels = RefinedLeeFilter::new().direction_labels(&image).unwrap();
    assert!(labels.iter().all(|&l| l != DirectionLabel::Unlabeled));
    assert_eq!(directional_kernels().unwrap().len(), 8);
}

#[test]
fn test_unit_round_trip() {
    let image = RasterGrid::new(speckle(8, 8, 41, 0.3), GeoReference::default()).unwrap();
    let back = UnitConverter::to_natural(&UnitConverter::to_db(&image));
    for (&a, &b) in image.data().iter().zip(back.data().iter()) {
        assert_relative_eq!(a, b, max_relative = 1e-5);
    }
}

#[test]
fn test_rotation_is_cyclic() {
    let weights = Array2::from_shape_fn((7, 7), |(r, c)| if c <= r { 1.0 } else { 0.0 });
    let kernel = Kernel::fixed(weights, (3, 3)).unwrap();
    let mut rotated = kernel.clone();
    for _ in 0..4 {
        rotated = rotated.rotate(1);
    }
    assert_eq!(rotated, kernel);
    assert_ne!(kernel.rotate(1), kernel);
}

#[test]
fn test_reducer_truncates_at_corner() {
    let grid = RasterGrid::new(
        Array2::from_shape_fn((4, 4), |(i, j)| (i * 4 + j) as f32),
        GeoReference::default(),
    )
    .unwrap();
    let kernel = Kernel::square(3).unwrap();
    let mean = NeighborhoodReducer::reduce(&grid, &kernel, NeighborhoodStatistic::Mean).unwrap();
    // corner window holds 0, 1, 4, 5
    assert_relative_eq!(mean.data()[[0, 0]], 2.5, epsilon = 1e-6);
    assert_relative_eq!(mean.data()[[1, 1]], 5.0, epsilon = 1e-6);
}
