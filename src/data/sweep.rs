//! Defocus distance calibration
//!
//! The reference image is sharpest at the true defocus distance. For every candidate
//! defocus the reference image is updated and scored by the mean local contrast
//! `R = (<I²> - <I>²) / <I>²`, the local averages being taken over a box of `size`
//! pixels.

use super::ExperimentData;
use crate::{
    numeric,
    tracking::{RefMethod, Tracking, TrackingOptions},
    Error, Result,
};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, ArrayView2, Axis};

/// Settings of [ExperimentData::defocus_sweep]
#[derive(Debug, Clone, Copy)]
pub struct SweepOptions {
    pub tracking: TrackingOptions,
    /// Kernel bandwidth of the reference image update in pixels
    pub hval: f64,
    pub ref_method: RefMethod,
    /// Returns the reference images and the contrast maps with the scores
    pub return_extra: bool,
    pub progress: bool,
}
impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            tracking: TrackingOptions::default(),
            hval: 1f64,
            ref_method: RefMethod::default(),
            return_extra: false,
            progress: false,
        }
    }
}
impl SweepOptions {
    pub fn tracking(self, tracking: TrackingOptions) -> Self {
        Self { tracking, ..self }
    }
    pub fn hval(self, hval: f64) -> Self {
        Self { hval, ..self }
    }
    pub fn ref_method(self, ref_method: RefMethod) -> Self {
        Self { ref_method, ..self }
    }
    pub fn return_extra(self) -> Self {
        Self {
            return_extra: true,
            ..self
        }
    }
    /// Displays a progress bar on the terminal
    pub fn progress(self) -> Self {
        Self {
            progress: true,
            ..self
        }
    }
}

/// Outcome of [ExperimentData::defocus_sweep]
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    /// Mean local contrast of the reference image for every candidate
    pub r_values: Vec<f64>,
    pub reference_images: Option<Vec<Array2<f64>>>,
    pub r_images: Option<Vec<Array2<f64>>>,
}
impl SweepResult {
    /// Index of the candidate with the highest contrast
    pub fn best(&self) -> Option<usize> {
        self.r_values
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
    }
}

/// Local contrast map of `image`
pub fn local_contrast(image: ArrayView2<f64>, size: usize) -> Array2<f64> {
    let mut mean = image.to_owned();
    let mut mean_sq = image.mapv(|x| x * x);
    for axis in [Axis(0), Axis(1)] {
        if mean.len_of(axis) > size {
            mean = numeric::box_filter(mean.view(), size, axis);
            mean_sq = numeric::box_filter(mean_sq.view(), size, axis);
        }
    }
    let mut contrast = mean_sq;
    ndarray::Zip::from(&mut contrast)
        .and(&mean)
        .for_each(|c, &m| *c = (*c - m * m) / (m * m));
    contrast
}

impl ExperimentData {
    /// Scores the candidate defocus distances by the local contrast of the reference
    /// image
    ///
    /// `defoci_y` defaults to `defoci_x`. A single working object is built at the first
    /// candidate, the sample translations are then rescaled from one candidate to the
    /// next.
    pub fn defocus_sweep(
        &self,
        defoci_x: &[f64],
        defoci_y: Option<&[f64]>,
        size: usize,
        options: SweepOptions,
    ) -> Result<SweepResult> {
        let defoci_y = defoci_y.unwrap_or(defoci_x);
        if defoci_x.is_empty() {
            return Err(Error::invalid("no defocus distances to sweep"));
        }
        if defoci_x.len() != defoci_y.len() {
            return Err(Error::invalid(format!(
                "{} horizontal and {} vertical defocus distances",
                defoci_x.len(),
                defoci_y.len()
            )));
        }
        if defoci_x.iter().chain(defoci_y).any(|&d| d == 0f64) {
            return Err(Error::invalid("defocus distances must be nonzero"));
        }
        log::info!(
            "sweeping {} defocus distances ({} reference update)",
            defoci_x.len(),
            options.ref_method
        );
        let mut st = self
            .update_defocus(defoci_x[0], Some(defoci_y[0]))?
            .get_st(options.tracking)?;

        let pb = if options.progress {
            let pb = ProgressBar::new(defoci_x.len() as u64);
            pb.set_style(
                ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>4}/{len:4} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut result = SweepResult {
            r_values: Vec::with_capacity(defoci_x.len()),
            reference_images: options.return_extra.then(Vec::new),
            r_images: options.return_extra.then(Vec::new),
        };
        let (mut prev_y, mut prev_x) = (defoci_y[0], defoci_x[0]);
        for (&defocus_x, &defocus_y) in defoci_x.iter().zip(defoci_y) {
            st.scale_translations((prev_y / defocus_y).abs(), (prev_x / defocus_x).abs());
            (prev_y, prev_x) = (defocus_y, defocus_x);
            st.update_reference(options.hval, options.ref_method)?;
            let reference = st
                .reference_image()
                .ok_or_else(|| Error::precondition("the reference image was not updated"))?;
            let r_image = numeric::with_pool(self.num_threads(), || {
                local_contrast(reference, size)
            })?;
            let score = r_image.mean().unwrap_or(0f64);
            log::debug!("defocus ({:e}, {:e}): {}", defocus_y, defocus_x, score);
            result.r_values.push(score);
            if let Some(images) = result.reference_images.as_mut() {
                images.push(reference.to_owned());
            }
            if let Some(images) = result.r_images.as_mut() {
                images.push(r_image);
            }
            pb.inc(1);
        }
        pb.finish_and_clear();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn speckles() -> ExperimentData {
        ExperimentData::new(testing::speckles(5, 12, 16)).unwrap()
    }

    #[test]
    fn nearby_candidates_score_alike() {
        let data = speckles();
        let defocus = testing::defocus_for_shift(testing::SPECKLE_STEP, 2.05);
        let candidates = [defocus, defocus * (1. + 1e-6)];
        let result = data
            .defocus_sweep(&candidates, None, 3, SweepOptions::default())
            .unwrap();
        assert_eq!(result.r_values.len(), 2);
        let (a, b) = (result.r_values[0], result.r_values[1]);
        assert!((a - b).abs() <= 1e-3 * a.abs(), "{} vs {}", a, b);
        assert!(result.reference_images.is_none());
    }

    #[test]
    fn rescaling_matches_rebuild() {
        let data = speckles();
        let d0 = testing::defocus_for_shift(testing::SPECKLE_STEP, 2.1);
        let d1 = testing::defocus_for_shift(testing::SPECKLE_STEP, 1.7);
        let d2 = testing::defocus_for_shift(testing::SPECKLE_STEP, 2.3);
        let options = SweepOptions::default().return_extra();
        let chained = data.defocus_sweep(&[d0, d1, d2], None, 3, options).unwrap();
        let direct = data.defocus_sweep(&[d2], None, 3, options).unwrap();
        let (a, b) = (chained.r_values[2], direct.r_values[0]);
        assert!((a - b).abs() <= 1e-4 * a.abs(), "{} vs {}", a, b);
        let images = chained.reference_images.unwrap();
        assert_eq!(images.len(), 3);
        assert_eq!(chained.r_images.unwrap()[2].dim(), {
            let (rows, cols) = images[2].dim();
            (rows - 3, cols - 3)
        });
    }

    #[test]
    fn true_defocus_is_sharpest() {
        let data = speckles();
        let defocus = testing::defocus_for_shift(testing::SPECKLE_STEP, 2.);
        let candidates = [defocus * 0.5, defocus, defocus * 2.];
        let result = data
            .defocus_sweep(&candidates, None, 3, SweepOptions::default().hval(0.5))
            .unwrap();
        assert_eq!(result.best(), Some(1));
    }

    #[test]
    fn invalid_candidates() {
        let data = speckles();
        let options = SweepOptions::default();
        assert!(matches!(
            data.defocus_sweep(&[], None, 3, options),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            data.defocus_sweep(&[1e-3, 2e-3], Some(&[1e-3]), 3, options),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn contrast_of_flat_image() {
        let image = Array2::from_elem((6, 4), 2.);
        let contrast = local_contrast(image.view(), 3);
        assert_eq!(contrast.dim(), (3, 1));
        assert!(contrast.iter().all(|&c| c.abs() < 1e-12));
        // shorter than the box along both axes
        assert_eq!(local_contrast(image.view(), 8).dim(), (6, 4));
    }
}
