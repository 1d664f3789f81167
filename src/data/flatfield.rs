//! Dynamic flatfields
//!
//! The flatfields model the frame to frame variations of the illumination. They are
//! either the running median of the frames or a projection of the whitefield corrected
//! frames on a set of eigen flatfields obtained by principal component analysis.

use super::{Attribute, ExperimentData, Patch};
use crate::{numeric, record::Field, record::Record, Error, Result};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{s, Array1, Array2, Array3, Axis, Zip};

/// Flatfields estimation method of [ExperimentData::update_flatfields]
#[derive(Debug, Clone)]
pub enum FlatfieldMethod {
    /// Masked running median of `size` frames, pixels farther than three standard
    /// deviations from the whitefield are ignored
    Median { size: usize },
    /// Projection on the eigen flatfields `effs`, the whitefield corrected frames
    /// default to the ones of [ExperimentData::get_pca]
    Pca {
        cor_data: Option<Array3<f64>>,
        effs: Option<Array3<f64>>,
    },
}
impl Default for FlatfieldMethod {
    fn default() -> Self {
        FlatfieldMethod::Median { size: 11 }
    }
}

fn missing(attr: Attribute) -> Error {
    Error::MissingAttribute(attr.to_string())
}

/// Whitefield corrected frames `cor[n] = data[n] - whitefield`, zero at masked pixels
fn corrected(data: &Array3<f64>, mask: &Array3<bool>, whitefield: &Array2<f64>) -> Array3<f64> {
    let mut cor = Array3::<f64>::zeros(data.dim());
    for ((mut c, d), m) in cor
        .outer_iter_mut()
        .zip(data.outer_iter())
        .zip(mask.outer_iter())
    {
        Zip::from(&mut c)
            .and(&d)
            .and(&m)
            .and(whitefield)
            .for_each(|c, &d, &m, &w| {
                if m {
                    *c = d - w
                }
            });
    }
    cor
}

/// Frames flattened into the rows of a matrix
fn as_rows(frames: &Array3<f64>) -> Result<Array2<f64>> {
    let (n, rows, cols) = frames.dim();
    Ok(frames
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((n, rows * cols))?)
}

impl ExperimentData {
    fn corrected_frames(&self) -> Result<Array3<f64>> {
        let data = self.get_data().ok_or_else(|| missing(Attribute::Data))?;
        let mask = self.get_mask().ok_or_else(|| missing(Attribute::Mask))?;
        let whitefield = self
            .get_whitefield()
            .ok_or_else(|| missing(Attribute::Whitefield))?;
        Ok(corrected(&data, &mask, &whitefield))
    }

    /// Principal component analysis of the whitefield corrected frames
    ///
    /// Returns the corrected frames, the eigen flatfields and the ratio of every
    /// eigenvalue to their sum. The eigenpairs keep the order of the symmetric
    /// eigendecomposition.
    pub fn get_pca(&self) -> Result<(Array3<f64>, Array3<f64>, Array1<f64>)> {
        let cor = self.corrected_frames()?;
        let (n, rows, cols) = cor.dim();
        if n == 0 {
            return Err(Error::NoDataFound("no good frames".to_string()));
        }
        let flat = as_rows(&cor)?;
        let covariance = flat.dot(&flat.t());
        let eigen = SymmetricEigen::new(DMatrix::from_fn(n, n, |i, j| covariance[[i, j]]));
        let vectors = Array2::from_shape_fn((n, n), |(i, k)| eigen.eigenvectors[(i, k)]);
        let effs = vectors
            .t()
            .dot(&flat)
            .into_shape_with_order((n, rows, cols))?;
        let eigenvalues: Array1<f64> = eigen.eigenvalues.iter().copied().collect();
        let total = eigenvalues.sum();
        let ratios = if total != 0f64 {
            eigenvalues / total
        } else {
            Array1::zeros(n)
        };
        log::debug!("eigen flatfields ratios: {:?}", ratios);
        Ok((cor, effs, ratios))
    }

    /// Computes the dynamic flatfields of the good frames inside the ROI
    pub fn update_flatfields(&self, method: FlatfieldMethod) -> Result<Self> {
        let a = &self.attributes;
        let data = a.data.as_ref().ok_or_else(|| missing(Attribute::Data))?;
        let good_frames = a
            .good_frames
            .as_ref()
            .ok_or_else(|| missing(Attribute::GoodFrames))?;
        let roi = self.roi()?;
        let flats = match method {
            FlatfieldMethod::Median { size } => {
                log::info!("median flatfields over {} frames", size);
                let frames = self.get_data().ok_or_else(|| missing(Attribute::Data))?;
                let whitefield = self
                    .get_whitefield()
                    .ok_or_else(|| missing(Attribute::Whitefield))?;
                let mut valid = Array3::from_elem(frames.dim(), false);
                Zip::from(valid.lanes_mut(Axis(0)))
                    .and(frames.lanes(Axis(0)))
                    .and(&whitefield)
                    .for_each(|mut valid, pixel, &w| {
                        let band = 3f64 * w.sqrt();
                        valid.zip_mut_with(&pixel, |v, &x| *v = (x - w).abs() < band);
                    });
                numeric::with_pool(self.num_threads(), || {
                    numeric::masked_median_filter_frames(frames.view(), valid.view(), size)
                })?
            }
            FlatfieldMethod::Pca { cor_data, effs } => {
                let effs = effs.ok_or_else(|| {
                    Error::NoDataFound("no eigen flatfields were provided".to_string())
                })?;
                let cor = match cor_data {
                    Some(cor) => cor,
                    None => self.corrected_frames()?,
                };
                let whitefield = self
                    .get_whitefield()
                    .ok_or_else(|| missing(Attribute::Whitefield))?;
                let (_, rows, cols) = cor.dim();
                if (rows, cols) != whitefield.dim() || (effs.dim().1, effs.dim().2) != (rows, cols) {
                    return Err(Error::invalid(format!(
                        "corrected frames {:?} and eigen flatfields {:?} don't match the ROI",
                        cor.dim(),
                        effs.dim()
                    )));
                }
                log::info!("projecting on {} eigen flatfields", effs.len_of(Axis(0)));
                let cor_rows = as_rows(&cor)?;
                let effs_rows = as_rows(&effs)?;
                let norms = effs_rows.map_axis(Axis(1), |e| e.dot(&e));
                let mut weights = cor_rows.dot(&effs_rows.t());
                for mut w in weights.rows_mut() {
                    Zip::from(&mut w).and(&norms).for_each(|w, &norm| {
                        *w = if norm > 0f64 { *w / norm } else { 0f64 }
                    });
                }
                let mut flats = weights
                    .dot(&effs_rows)
                    .into_shape_with_order((cor.len_of(Axis(0)), rows, cols))?;
                for mut frame in flats.outer_iter_mut() {
                    frame += &whitefield;
                }
                flats
            }
        };
        if flats.len_of(Axis(0)) != good_frames.len() {
            return Err(Error::invalid(format!(
                "{} flatfields for {} good frames",
                flats.len_of(Axis(0)),
                good_frames.len()
            )));
        }
        let mut flatfields = Array3::<f64>::zeros(data.dim());
        for (flat, &n) in flats.outer_iter().zip(good_frames) {
            flatfields
                .slice_mut(s![n, roi[0]..roi[1], roi[2]..roi[3]])
                .assign(&flat);
        }
        self.update(Patch {
            flatfields: Field::Set(flatfields.into_shared()),
            ..Default::default()
        })
    }
}
