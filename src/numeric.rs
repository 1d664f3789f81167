//! Array reductions and filters
//!
//! The reductions run on a [rayon] pool sized by the container `num_threads` attribute.
//! Each output element is computed independently, so the results do not depend on the
//! number of workers.

use crate::Result;
use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};
use rayon::prelude::*;

/// Runs `op` inside a pool of `num_threads` workers
pub fn with_pool<T, F>(num_threads: usize, op: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.clamp(1, crate::MAX_THREADS))
        .build()?;
    Ok(pool.install(op))
}

/// Median of `values`, averaging the two middle values for an even count
///
/// Returns 0 for an empty slice. The slice is reordered.
pub fn median(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0f64;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Per pixel median over the frames, ignoring masked values
pub fn masked_median_frames(data: ArrayView3<f64>, mask: ArrayView3<bool>) -> Array2<f64> {
    let (_, rows, cols) = data.dim();
    let values: Vec<f64> = (0..rows * cols)
        .into_par_iter()
        .map(|k| {
            let (i, j) = (k / cols, k % cols);
            let mut pixel: Vec<f64> = data
                .slice(ndarray::s![.., i, j])
                .iter()
                .zip(mask.slice(ndarray::s![.., i, j]).iter())
                .filter_map(|(&x, &m)| m.then_some(x))
                .collect();
            median(&mut pixel)
        })
        .collect();
    Array2::from_shape_vec((rows, cols), values).unwrap_or_else(|_| Array2::zeros((rows, cols)))
}

/// Index of `i` in a sequence of length `n` extended by reflection (`d c b a | a b c d | d c b a`)
pub fn reflect_index(i: isize, n: usize) -> usize {
    let n = n as isize;
    let period = 2 * n;
    let k = i.rem_euclid(period);
    (if k < n { k } else { period - 1 - k }) as usize
}

/// Sliding window median of length `size` along the frame axis
///
/// Masked values are ignored, a window without any valid value yields 0.
pub fn masked_median_filter_frames(
    data: ArrayView3<f64>,
    mask: ArrayView3<bool>,
    size: usize,
) -> Array3<f64> {
    let (n_frames, rows, cols) = data.dim();
    let size = size.max(1) as isize;
    let offsets: Vec<isize> = (-size / 2..size - size / 2).collect();
    let values: Vec<f64> = (0..n_frames * rows * cols)
        .into_par_iter()
        .map(|k| {
            let (n, ij) = (k / (rows * cols), k % (rows * cols));
            let (i, j) = (ij / cols, ij % cols);
            let mut window: Vec<f64> = offsets
                .iter()
                .map(|&o| reflect_index(n as isize + o, n_frames))
                .filter(|&m| mask[[m, i, j]])
                .map(|m| data[[m, i, j]])
                .collect();
            median(&mut window)
        })
        .collect();
    Array3::from_shape_vec((n_frames, rows, cols), values)
        .unwrap_or_else(|_| Array3::zeros((n_frames, rows, cols)))
}

/// `q`-th percentile of sorted `values` with linear interpolation
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0f64,
        1 => sorted[0],
        n => {
            let pos = (q / 100f64).clamp(0f64, 1f64) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

/// Moving average of width `size` along `axis` with reflective boundaries
///
/// The output is cropped by `size / 2` samples at the start and `(size + 1) / 2` at the
/// end of the axis.
pub fn box_filter(a: ArrayView2<f64>, size: usize, axis: Axis) -> Array2<f64> {
    let len = a.len_of(axis);
    let size = size.max(1);
    let (start, stop) = (size / 2, len.saturating_sub((size + 1) / 2));
    let half = (size / 2) as isize;
    let mut shape = [a.nrows(), a.ncols()];
    shape[axis.index()] = stop.saturating_sub(start);
    let mut out = Array2::<f64>::zeros(shape);
    Zip::from(out.lanes_mut(axis))
        .and(a.lanes(axis))
        .par_for_each(|mut dst, src| {
            for (k, d) in dst.iter_mut().enumerate() {
                let i = (start + k) as isize;
                *d = (0..size as isize)
                    .map(|o| src[reflect_index(i + o - half, len)])
                    .sum::<f64>()
                    / size as f64;
            }
        });
    out
}

/// Population standard deviation
pub fn std<'a, I: IntoIterator<Item = &'a f64>>(values: I) -> f64 {
    let values: Array1<f64> = values.into_iter().copied().collect();
    if values.is_empty() {
        return 0f64;
    }
    values.std(0f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array};

    #[test]
    fn median_even_odd() {
        assert_eq!(median(&mut [3., 1., 2.]), 2.);
        assert_eq!(median(&mut [4., 1., 3., 2.]), 2.5);
        assert_eq!(median(&mut []), 0.);
    }

    #[test]
    fn reflect() {
        let idx: Vec<usize> = (-3..7).map(|i| reflect_index(i, 4)).collect();
        assert_eq!(idx, vec![2, 1, 0, 0, 1, 2, 3, 3, 2, 1]);
    }

    #[test]
    fn masked_median() {
        let data = Array::from_shape_vec((3, 1, 2), vec![1., 10., 2., 20., 30., 30.]).unwrap();
        let mut mask = Array3::from_elem((3, 1, 2), true);
        mask[[2, 0, 0]] = false;
        let med = masked_median_frames(data.view(), mask.view());
        assert_eq!(med, arr2(&[[1.5, 20.]]));
    }

    #[test]
    fn median_filter_constant() {
        let data = Array3::from_elem((5, 2, 2), 7f64);
        let mask = Array3::from_elem((5, 2, 2), true);
        let flt = masked_median_filter_frames(data.view(), mask.view(), 3);
        assert!(flt.iter().all(|&x| x == 7.));
        let none = Array3::from_elem((5, 2, 2), false);
        let flt = masked_median_filter_frames(data.view(), none.view(), 3);
        assert!(flt.iter().all(|&x| x == 0.));
    }

    #[test]
    fn percentiles() {
        let v = [1., 2., 3., 4., 5.];
        assert_eq!(percentile(&v, 0.), 1.);
        assert_eq!(percentile(&v, 100.), 5.);
        assert!((percentile(&v, 60.) - 3.4).abs() < 1e-12);
    }

    #[test]
    fn box_filter_shape_and_mean() {
        let a = Array2::from_elem((10, 4), 2f64);
        let f = box_filter(a.view(), 3, Axis(0));
        assert_eq!(f.dim(), (7, 4));
        assert!(f.iter().all(|&x| (x - 2.).abs() < 1e-12));
        let ramp = Array2::from_shape_fn((1, 6), |(_, j)| j as f64);
        let f = box_filter(ramp.view(), 3, Axis(1));
        assert_eq!(f, arr2(&[[1., 2., 3.]]));
    }

    #[test]
    fn pool_results_do_not_depend_on_workers() {
        let data = Array::from_shape_fn((9, 5, 4), |(n, i, j)| ((n * 7 + i * 3 + j) % 11) as f64);
        let mask = data.mapv(|x| x > 1.);
        let one = with_pool(1, || masked_median_filter_frames(data.view(), mask.view(), 4)).unwrap();
        let four = with_pool(4, || masked_median_filter_frames(data.view(), mask.view(), 4)).unwrap();
        assert_eq!(one, four);
    }
}
