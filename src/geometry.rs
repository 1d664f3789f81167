//! Experiment geometry
//!
//! Derivations from the sample and detector geometry: sample translations in detector
//! pixels, pixel map orientation, magnification and propagation distance.

use crate::{data::Roi, Error, Result};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};

/// Sample translations in detector pixels
///
/// Each translation (`n x 3`) is projected on the detector basis vectors (`n x 2 x 3`)
/// and scaled by `|distance / defocus| / |basis|²` per axis (rows with `defocus_y`,
/// columns with `defocus_x`). The first frame is taken as origin and the mean offset
/// over all the frames is removed.
pub fn pixel_translations(
    translations: ArrayView2<f64>,
    basis_vectors: ArrayView3<f64>,
    distance: f64,
    defocus_y: f64,
    defocus_x: f64,
) -> Result<Array2<f64>> {
    let n = translations.nrows();
    if basis_vectors.dim() != (n, 2, 3) || translations.ncols() != 3 {
        return Err(Error::invalid(format!(
            "translations {:?} and basis vectors {:?} don't match",
            translations.dim(),
            basis_vectors.dim()
        )));
    }
    let mag = [(distance / defocus_y).abs(), (distance / defocus_x).abs()];
    let mut pix = Array2::<f64>::zeros((n, 2));
    for ((mut p, t), b) in pix
        .outer_iter_mut()
        .zip(translations.outer_iter())
        .zip(basis_vectors.outer_iter())
    {
        for (k, p) in p.iter_mut().enumerate() {
            let bv = b.row(k);
            *p = t.dot(&bv) * mag[k] / bv.dot(&bv);
        }
    }
    if n > 0 {
        let first = pix.row(0).to_owned();
        pix -= &first;
        if let Some(mean) = pix.mean_axis(Axis(0)) {
            pix -= &mean;
        }
    }
    Ok(pix)
}

/// Lens magnification `|(distance + defocus) / defocus|`
pub fn magnification(distance: f64, defocus: f64) -> f64 {
    ((distance + defocus) / defocus).abs()
}

/// Distance between the reference plane and the detector
pub fn propagation_distance(distance: f64, magnification: f64) -> f64 {
    distance * (1f64 - magnification.recip())
}

/// Identity pixel map `[rows_index, cols_index]` of a `rows x cols` frame
pub fn identity_pixel_map(rows: usize, cols: usize) -> Array3<f64> {
    Array3::from_shape_fn((2, rows, cols), |(k, i, j)| if k == 0 { i as f64 } else { j as f64 })
}

/// Orients a pixel map according to the defocus signs
///
/// The rows are flipped if `defocus_y` is negative and the map increases along the rows,
/// the columns likewise with `defocus_x`. The flips only change the array strides.
pub fn canonical_pixel_map<S>(
    mut pixel_map: ndarray::ArrayBase<S, ndarray::Ix3>,
    defocus_y: f64,
    defocus_x: f64,
) -> ndarray::ArrayBase<S, ndarray::Ix3>
where
    S: ndarray::Data<Elem = f64>,
{
    let (_, rows, cols) = pixel_map.dim();
    if rows > 0 && cols > 0 {
        if defocus_y < 0f64 && pixel_map[[0, 0, 0]] < pixel_map[[0, rows - 1, 0]] {
            pixel_map.invert_axis(Axis(1));
        }
        if defocus_x < 0f64 && pixel_map[[1, 0, 0]] < pixel_map[[1, 0, cols - 1]] {
            pixel_map.invert_axis(Axis(2));
        }
    }
    pixel_map
}

/// Checks that `roi` is a non-empty region of a `rows x cols` frame
pub fn check_roi(roi: &Roi, rows: usize, cols: usize) -> Result<()> {
    let [y0, y1, x0, x1] = *roi;
    if y0 >= y1 || x0 >= x1 || y1 > rows || x1 > cols {
        Err(Error::invalid(format!(
            "ROI {:?} is empty or out of the frame bounds ({}, {})",
            roi, rows, cols
        )))
    } else {
        Ok(())
    }
}

/// ROI of a frame binned by `ratio`, bounds are divided rounding up
pub fn bin_roi(roi: &Roi, ratio: usize) -> Roi {
    roi.map(|x| x.div_ceil(ratio))
}

/// ROI reflected about the frame extent along `axis`
pub fn mirror_roi(roi: &Roi, axis: usize, extent: usize) -> Roi {
    let mut mirrored = *roi;
    mirrored[2 * axis] = extent.saturating_sub(roi[2 * axis + 1]);
    mirrored[2 * axis + 1] = extent.saturating_sub(roi[2 * axis]);
    mirrored
}

/// Frame-sized slice of a ROI as an `ndarray` slice over the last two axes
pub(crate) fn roi_slice(
    roi: &Roi,
) -> ndarray::SliceInfo<[ndarray::SliceInfoElem; 2], ndarray::Ix2, ndarray::Ix2> {
    s![roi[0]..roi[1], roi[2]..roi[3]]
}
