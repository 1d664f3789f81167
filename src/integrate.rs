//! Gradient field integration
//!
//! The gradients are extended to a `2N x 2M` grid by antisymmetric reflection, which
//! makes the extended field periodic, and the potential is solved in Fourier space.

use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use rustfft::{num_complex::Complex, FftDirection, FftPlanner};
use std::f64::consts::PI;

fn fftfreq(n: usize) -> Vec<f64> {
    (0..n)
        .map(|k| {
            let k = if k < (n + 1) / 2 { k as f64 } else { k as f64 - n as f64 };
            k / n as f64
        })
        .collect()
}

/// In place 1D FFT of every lane along `axis`
fn fft_axis(data: &mut Array2<Complex<f64>>, axis: Axis, direction: FftDirection) {
    let len = data.len_of(axis);
    if len == 0 {
        return;
    }
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft(len, direction);
    let mut buffer = vec![Complex::new(0f64, 0f64); len];
    for mut lane in data.lanes_mut(axis) {
        buffer.iter_mut().zip(lane.iter()).for_each(|(b, &x)| *b = x);
        fft.process(&mut buffer);
        lane.iter_mut().zip(buffer.iter()).for_each(|(x, &b)| *x = b);
    }
}

fn fft_2d(data: &mut Array2<Complex<f64>>, direction: FftDirection) {
    fft_axis(data, Axis(1), direction);
    fft_axis(data, Axis(0), direction);
}

/// Antisymmetric extension of a gradient field
///
/// `sign_x` and `sign_y` are the signs of the mirror images along the columns and
/// along the rows.
fn extend(a: ArrayView2<f64>, sign_x: f64, sign_y: f64) -> Array2<f64> {
    let flip_x = a.slice(s![.., ..;-1]).mapv(|x| sign_x * x);
    let top = concatenate![Axis(1), a, flip_x];
    let bottom = top.slice(s![..;-1, ..]).mapv(|x| sign_y * x);
    concatenate![Axis(0), top, bottom]
}

/// Integrates the gradient field (`sy` along the rows, `sx` along the columns)
///
/// The field is assumed curl-free, the integration constant is set so that the
/// extended potential has zero mean.
pub fn ct_integrate(sy: ArrayView2<f64>, sx: ArrayView2<f64>) -> Array2<f64> {
    let (rows, cols) = sx.dim();
    if rows == 0 || cols == 0 {
        return Array2::zeros((rows, cols));
    }
    let to_complex = |a: Array2<f64>| a.mapv(|x| Complex::new(x, 0f64));
    let mut gx = to_complex(extend(sx, -1f64, 1f64));
    let mut gy = to_complex(extend(sy, 1f64, -1f64));
    fft_2d(&mut gx, FftDirection::Forward);
    fft_2d(&mut gy, FftDirection::Forward);

    let (ky, kx) = (fftfreq(2 * rows), fftfreq(2 * cols));
    let mut phi = Array2::<Complex<f64>>::zeros((2 * rows, 2 * cols));
    for ((i, j), p) in phi.indexed_iter_mut() {
        let k2 = kx[j] * kx[j] + ky[i] * ky[i];
        if k2 > 0f64 {
            *p = (gx[[i, j]] * kx[j] + gy[[i, j]] * ky[i]) / Complex::new(0f64, 2f64 * PI * k2);
        }
    }
    fft_2d(&mut phi, FftDirection::Inverse);
    let norm = (4 * rows * cols) as f64;
    phi.slice(s![..rows, ..cols]).mapv(|c| c.re / norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_potential() {
        // constant unit slope along the columns
        let sx = Array2::from_elem((6, 8), 1f64);
        let sy = Array2::zeros((6, 8));
        let phi = ct_integrate(sy.view(), sx.view());
        for j in 1..8 {
            for i in 0..6 {
                let d = phi[[i, j]] - phi[[i, j - 1]];
                assert!((d - 1.).abs() < 0.25, "step {} at ({}, {})", d, i, j);
            }
        }
        // no variation along the rows
        for j in 0..8 {
            assert!((phi[[0, j]] - phi[[5, j]]).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_field() {
        let z = Array2::zeros((4, 5));
        let phi = ct_integrate(z.view(), z.view());
        assert!(phi.iter().all(|x| x.abs() < 1e-12));
    }

    #[test]
    fn frequencies() {
        assert_eq!(fftfreq(4), vec![0., 0.25, -0.5, -0.25]);
        assert_eq!(fftfreq(5), vec![0., 0.2, 0.4, -0.4, -0.2]);
    }
}
