//! Synthetic datasets

use crate::{Attributes, ExperimentData, Protocol};
use ndarray::{s, Array2, Array3};
use std::sync::Arc;

pub const LEVEL: f64 = 100.;
pub const DISTANCE: f64 = 2.;
pub const WAVELENGTH: f64 = 7.29e-11;
pub const PIXEL_SIZE: f64 = 55e-6;
/// Sample step of [attributes]
pub const FLAT_STEP: f64 = 1e-6;
/// Sample step of [speckles]
pub const SPECKLE_STEP: f64 = 2e-7;

/// Defocus distance at which a sample step moves the frames by `shift` pixels
pub fn defocus_for_shift(step: f64, shift: f64) -> f64 {
    step * DISTANCE / (shift * PIXEL_SIZE)
}

fn geometry(n_frames: usize, step: f64) -> (Array3<f64>, Array2<f64>) {
    let mut basis_vectors = Array3::zeros((n_frames, 2, 3));
    basis_vectors.slice_mut(s![.., 0, 1]).fill(-PIXEL_SIZE);
    basis_vectors.slice_mut(s![.., 1, 0]).fill(-PIXEL_SIZE);
    let translations = Array2::from_shape_fn((n_frames, 3), |(n, k)| {
        if k == 0 {
            step * n as f64
        } else {
            0.
        }
    });
    (basis_vectors, translations)
}

/// 3 frames of 8x8 pixels with a uniform intensity
pub fn attributes() -> Attributes {
    let (basis_vectors, translations) = geometry(3, FLAT_STEP);
    Attributes::required(
        Arc::new(Protocol::cxi()),
        Array3::from_elem((3, 8, 8), LEVEL),
        basis_vectors,
        translations,
        DISTANCE,
        WAVELENGTH,
        PIXEL_SIZE,
        PIXEL_SIZE,
    )
    .num_threads(2)
}

pub fn dataset() -> ExperimentData {
    ExperimentData::new(attributes()).unwrap()
}

/// Speckle-like frames of a pattern scanned along the columns
///
/// The pattern moves by 2 pixels per frame at `defocus_for_shift(SPECKLE_STEP, 2.)`.
pub fn speckles(n_frames: usize, rows: usize, cols: usize) -> Attributes {
    let (basis_vectors, translations) = geometry(n_frames, SPECKLE_STEP);
    let data = Array3::from_shape_fn((n_frames, rows, cols), |(n, i, j)| {
        let x = j as f64 + 2. * n as f64;
        let y = i as f64;
        LEVEL * (1. + 0.5 * (0.9 * x).sin() * (0.6 * y).cos())
    });
    Attributes::required(
        Arc::new(Protocol::cxi()),
        data,
        basis_vectors,
        translations,
        DISTANCE,
        WAVELENGTH,
        PIXEL_SIZE,
        PIXEL_SIZE,
    )
    .num_threads(2)
    .whitefield(Array2::from_elem((rows, cols), LEVEL))
}
