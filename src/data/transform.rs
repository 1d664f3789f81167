//! Container transforms
//!
//! Each transform returns a new container built from a [Patch] merged over a snapshot
//! of the source attributes. The cleared attributes are recomputed by their
//! initializers.

use super::{require, Attribute, ExperimentData, Patch};
use crate::{geometry, numeric, record::Field, record::Record, Error, Result};
use ndarray::{s, ArcArray, Array3, Axis, Dimension, Slice, Zip};
use strum_macros::{Display, EnumIter, EnumString};

/// Bad pixels detection method of [ExperimentData::update_mask]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaskMethod {
    /// Every pixel is valid
    NoBad,
    /// Pixels in `[vmin, vmax)` are valid
    RangeBad { vmin: f64, vmax: f64 },
    /// Pixels whose deviation from the median lies between the `pmin` and `pmax`
    /// percentiles of the deviations are valid
    PercBad { pmin: f64, pmax: f64 },
}
impl MaskMethod {
    /// Parses a method keyword (`no-bad`, `range-bad` or `perc-bad`), the bounds
    /// default to `[0, 65535)` for `range-bad` and to `[0, 99.99]` for `perc-bad`
    pub fn from_keyword(keyword: &str, lower: Option<f64>, upper: Option<f64>) -> Result<Self> {
        match keyword {
            "no-bad" => Ok(MaskMethod::NoBad),
            "range-bad" => Ok(MaskMethod::RangeBad {
                vmin: lower.unwrap_or(0f64),
                vmax: upper.unwrap_or(65535f64),
            }),
            "perc-bad" => Ok(MaskMethod::PercBad {
                pmin: lower.unwrap_or(0f64),
                pmax: upper.unwrap_or(99.99),
            }),
            _ => Err(Error::invalid(format!(
                "invalid mask method `{}`, expected one of no-bad, range-bad or perc-bad",
                keyword
            ))),
        }
    }
}

/// How a new mask is combined with the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum MaskUpdate {
    /// The new mask replaces the current one
    #[default]
    Reset,
    /// The new mask is combined with the current one by logical AND
    Multiply,
}

/// Operation on the last two axes of a data-shaped array
#[derive(Debug, Clone, Copy)]
enum FrameOp {
    Stride(usize),
    /// Reverses the rows (0) or the columns (1)
    Flip(usize),
}
impl FrameOp {
    fn apply<A: Clone, D: Dimension>(self, a: &ArcArray<A, D>) -> ArcArray<A, D> {
        let ndim = a.ndim();
        if ndim < 2 {
            return a.clone();
        }
        match self {
            FrameOp::Stride(ratio) => {
                let mut view = a.view();
                let step = ratio as isize;
                view.slice_axis_inplace(Axis(ndim - 2), Slice::new(0, None, step));
                view.slice_axis_inplace(Axis(ndim - 1), Slice::new(0, None, step));
                view.to_owned().into_shared()
            }
            FrameOp::Flip(axis) => {
                let mut flipped = a.clone();
                flipped.invert_axis(Axis(ndim - 2 + axis));
                flipped
            }
        }
    }
}

fn frame_op<A: Clone, D: Dimension>(
    value: &Option<ArcArray<A, D>>,
    is_data: bool,
    op: FrameOp,
) -> Field<ArcArray<A, D>> {
    match value {
        Some(a) if is_data => Field::Set(op.apply(a)),
        _ => Field::Keep,
    }
}

/// Value an attribute takes once `field` is merged over `value`
fn merged<T: Clone>(field: &Field<T>, value: &Option<T>) -> Option<T> {
    match field {
        Field::Keep => value.clone(),
        Field::Set(v) => Some(v.clone()),
        Field::Clear => None,
    }
}

fn check_axis(axis: usize) -> Result<()> {
    if axis > 1 {
        Err(Error::invalid(format!("axis must be 0 or 1, found {}", axis)))
    } else {
        Ok(())
    }
}

impl ExperimentData {
    /// Applies `op` to every present array the protocol flags as data
    fn frame_op_patch(&self, op: FrameOp) -> Result<Patch> {
        let protocol = self.protocol()?;
        let is_data = |attr| protocol.get_is_data(attr);
        let a = &self.attributes;
        Ok(Patch {
            basis_vectors: frame_op(&a.basis_vectors, is_data(Attribute::BasisVectors), op),
            data: frame_op(&a.data, is_data(Attribute::Data), op),
            error_frame: frame_op(&a.error_frame, is_data(Attribute::ErrorFrame), op),
            flatfields: frame_op(&a.flatfields, is_data(Attribute::Flatfields), op),
            mask: frame_op(&a.mask, is_data(Attribute::Mask), op),
            phase: frame_op(&a.phase, is_data(Attribute::Phase), op),
            pixel_aberrations: frame_op(
                &a.pixel_aberrations,
                is_data(Attribute::PixelAberrations),
                op,
            ),
            pixel_map: frame_op(&a.pixel_map, is_data(Attribute::PixelMap), op),
            pixel_translations: frame_op(
                &a.pixel_translations,
                is_data(Attribute::PixelTranslations),
                op,
            ),
            reference_image: frame_op(&a.reference_image, is_data(Attribute::ReferenceImage), op),
            translations: frame_op(&a.translations, is_data(Attribute::Translations), op),
            whitefield: frame_op(&a.whitefield, is_data(Attribute::Whitefield), op),
            ..Default::default()
        })
    }

    /// Bins the detector frames by `ratio`
    ///
    /// The basis vectors and the pixel sizes are scaled by `ratio`, the data arrays are
    /// subsampled with a stride of `ratio` and the ROI bounds are divided by `ratio`
    /// rounding up. The pixel map is halved whatever the ratio.
    pub fn bin_data(&self, ratio: usize) -> Result<Self> {
        if ratio == 0 {
            return Err(Error::invalid("binning ratio must be positive"));
        }
        log::info!("binning the frames by {}", ratio);
        let a = &self.attributes;
        let r = ratio as f64;
        let mut patch = self.frame_op_patch(FrameOp::Stride(ratio))?;
        patch.basis_vectors = merged(&patch.basis_vectors, &a.basis_vectors)
            .map(|bv| bv.mapv(|x| x * r).into_shared())
            .into();
        patch.pixel_map = merged(&patch.pixel_map, &a.pixel_map)
            .map(|pm| pm.mapv(|x| x / 2f64).into_shared())
            .into();
        if self.is_defocus() {
            patch.pixel_translations = merged(&patch.pixel_translations, &a.pixel_translations)
                .map(|pix| pix.mapv(|x| x / r).into_shared())
                .into();
        }
        patch.x_pixel_size = Field::Set(*require(&a.x_pixel_size, Attribute::XPixelSize)? * r);
        patch.y_pixel_size = Field::Set(*require(&a.y_pixel_size, Attribute::YPixelSize)? * r);
        patch.roi = Field::Set(geometry::bin_roi(&self.roi()?, ratio));
        self.update(patch)
    }

    /// Sets a new region of interest
    pub fn crop_data(&self, roi: super::Roi) -> Result<Self> {
        let (_, rows, cols) = require(&self.attributes.data, Attribute::Data)?.dim();
        geometry::check_roi(&roi, rows, cols)?;
        log::info!("cropping the frames to {:?}", roi);
        self.update(Patch {
            roi: Field::Set(roi),
            sigma: Field::Clear,
            flatfields: Field::Clear,
            ..Default::default()
        })
    }

    /// Sums the masked good frames inside the ROI over the rows (0) or the columns (1)
    ///
    /// The summed axis is kept with a length of 1.
    pub fn integrate_data(&self, axis: usize) -> Result<Self> {
        check_axis(axis)?;
        let a = &self.attributes;
        let data = require(&a.data, Attribute::Data)?;
        let mask = require(&a.mask, Attribute::Mask)?;
        let good_frames = require(&a.good_frames, Attribute::GoodFrames)?;
        let roi = self.roi()?;
        log::info!("integrating the frames along axis {}", axis);
        let frame = |n: usize| s![n, roi[0]..roi[1], roi[2]..roi[3]];
        let mut masked = Array3::<f64>::zeros(data.dim());
        for &n in good_frames {
            Zip::from(masked.slice_mut(frame(n)))
                .and(data.slice(frame(n)))
                .and(mask.slice(frame(n)))
                .for_each(|y, &x, &m| *y = if m { x } else { 0f64 });
        }
        let summed = masked
            .sum_axis(Axis(axis + 1))
            .insert_axis(Axis(axis + 1));
        let mut roi = roi;
        roi[2 * axis] = 0;
        roi[2 * axis + 1] = 1;
        self.update(Patch {
            data: Field::Set(summed.into_shared()),
            roi: Field::Set(roi),
            flatfields: Field::Clear,
            mask: Field::Clear,
            pixel_map: Field::Clear,
            pixel_translations: Field::Clear,
            sigma: Field::Clear,
            whitefield: Field::Clear,
            ..Default::default()
        })
    }

    /// Selects the good frames, by default the frames with a positive total intensity
    pub fn mask_frames(&self, good_frames: Option<Vec<usize>>) -> Result<Self> {
        let data = require(&self.attributes.data, Attribute::Data)?;
        let n_frames = data.len_of(Axis(0));
        let good_frames = good_frames.unwrap_or_else(|| {
            data.outer_iter()
                .enumerate()
                .filter(|(_, frame)| frame.sum() > 0f64)
                .map(|(n, _)| n)
                .collect()
        });
        if let Some(n) = good_frames.iter().find(|&&n| n >= n_frames) {
            return Err(Error::invalid(format!(
                "frame index {} is out of bounds ({} frames)",
                n, n_frames
            )));
        }
        log::info!("{} good frames", good_frames.len());
        self.update(Patch {
            good_frames: Field::Set(good_frames),
            whitefield: Field::Clear,
            ..Default::default()
        })
    }

    /// Mirrors the frames along the rows (0) or the columns (1)
    pub fn mirror_data(&self, axis: usize) -> Result<Self> {
        check_axis(axis)?;
        let a = &self.attributes;
        log::info!("mirroring the frames along axis {}", axis);
        let mut patch = self.frame_op_patch(FrameOp::Flip(axis))?;
        let mut basis_vectors = merged(&patch.basis_vectors, &a.basis_vectors)
            .ok_or_else(|| Error::MissingAttribute(Attribute::BasisVectors.to_string()))?
            .into_owned();
        basis_vectors
            .slice_mut(s![.., axis, ..])
            .mapv_inplace(|x| -x);
        patch.basis_vectors = Field::Set(basis_vectors.into_shared());
        let extent = require(&a.whitefield, Attribute::Whitefield)?.len_of(Axis(axis));
        patch.roi = Field::Set(geometry::mirror_roi(&self.roi()?, axis, extent));
        patch.pixel_translations = Field::Clear;
        self.update(patch)
    }

    /// Updates the bad pixels mask inside the ROI of the good frames
    pub fn update_mask(&self, method: MaskMethod, update: MaskUpdate) -> Result<Self> {
        let a = &self.attributes;
        let good_frames = require(&a.good_frames, Attribute::GoodFrames)?;
        let roi = self.roi()?;
        let data = self
            .get_data()
            .ok_or_else(|| Error::MissingAttribute(Attribute::Data.to_string()))?;
        log::info!("updating the mask with {:?} ({})", method, update);
        let new_mask = match method {
            MaskMethod::NoBad => Array3::from_elem(data.dim(), true),
            MaskMethod::RangeBad { vmin, vmax } => data.mapv(|x| vmin <= x && x < vmax),
            MaskMethod::PercBad { pmin, pmax } => {
                let mut values: Vec<f64> = data.iter().copied().collect();
                let median = numeric::median(&mut values);
                let offsets: Vec<f64> = values.iter().map(|x| x - median).collect();
                let lower = numeric::percentile(&offsets, pmin);
                let upper = numeric::percentile(&offsets, pmax);
                data.mapv(|x| {
                    let offset = x - median;
                    lower <= offset && offset <= upper
                })
            }
        };
        let mut mask = require(&a.mask, Attribute::Mask)?.to_owned();
        for (frame_mask, &n) in new_mask.outer_iter().zip(good_frames) {
            let mut target = mask.slice_mut(s![n, roi[0]..roi[1], roi[2]..roi[3]]);
            match update {
                MaskUpdate::Reset => target.assign(&frame_mask),
                MaskUpdate::Multiply => target.zip_mut_with(&frame_mask, |m, &v| *m = *m && v),
            }
        }
        self.update(Patch {
            mask: Field::Set(mask.into_shared()),
            sigma: Field::Clear,
            whitefield: Field::Clear,
            ..Default::default()
        })
    }

    /// Recomputes the whitefield
    pub fn make_whitefield(&self) -> Result<Self> {
        self.update(Patch {
            whitefield: Field::Clear,
            ..Default::default()
        })
    }

    /// Sets the defocus distances, `defocus_y` defaults to `defocus_x`
    ///
    /// The pixel map is reoriented according to the defocus signs and the pixel
    /// translations are recomputed.
    pub fn update_defocus(&self, defocus_x: f64, defocus_y: Option<f64>) -> Result<Self> {
        let defocus_y = defocus_y.unwrap_or(defocus_x);
        if defocus_x == 0f64 || defocus_y == 0f64 {
            return Err(Error::invalid("defocus distances must be nonzero"));
        }
        log::info!("defocus: {:e} (y), {:e} (x)", defocus_y, defocus_x);
        let pixel_map = require(&self.attributes.pixel_map, Attribute::PixelMap)?.clone();
        self.update(Patch {
            defocus_x: Field::Set(defocus_x),
            defocus_y: Field::Set(defocus_y),
            pixel_map: Field::Set(geometry::canonical_pixel_map(pixel_map, defocus_y, defocus_x)),
            pixel_translations: Field::Clear,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::str::FromStr;

    #[test]
    fn bin_by_one() {
        let data = testing::dataset();
        let binned = data.bin_data(1).unwrap();
        let (a, b) = (data.attributes(), binned.attributes());
        assert_eq!(a.x_pixel_size, b.x_pixel_size);
        assert_eq!(a.y_pixel_size, b.y_pixel_size);
        assert_eq!(a.roi, b.roi);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn bin_composition() {
        let data = testing::dataset();
        let twice = data.bin_data(2).unwrap().bin_data(2).unwrap();
        let once = data.bin_data(4).unwrap();
        let (a, b) = (twice.attributes(), once.attributes());
        assert_eq!(a.basis_vectors, b.basis_vectors);
        assert_eq!(a.x_pixel_size, b.x_pixel_size);
        assert_eq!(a.y_pixel_size, b.y_pixel_size);
        assert_eq!(a.roi, Some([0, 2, 0, 2]));
        assert_eq!(a.data.as_ref().unwrap().dim(), (3, 2, 2));
        assert_eq!(b.data.as_ref().unwrap().dim(), (3, 2, 2));
    }

    #[test]
    fn bin_halves_pixel_map() {
        let data = testing::dataset().bin_data(2).unwrap();
        let pm = data.attributes().pixel_map.as_ref().unwrap();
        assert_eq!(pm.dim(), (2, 4, 4));
        // strided identity map of the 8x8 frame halved
        assert_eq!(pm[[0, 3, 1]], 3.);
        assert_eq!(pm[[1, 3, 1]], 1.);
    }

    #[test]
    fn bin_scales_pixel_translations() {
        let data = testing::dataset().update_defocus(1e-4, None).unwrap();
        let binned = data.bin_data(2).unwrap();
        let (p0, p1) = (
            data.attributes().pixel_translations.as_ref().unwrap(),
            binned.attributes().pixel_translations.as_ref().unwrap(),
        );
        assert!(p0.iter().any(|&x| x != 0.));
        assert_eq!(p0.mapv(|x| x / 2.), p1.to_owned());
    }

    #[test]
    fn bin_rejects_zero_ratio() {
        assert!(matches!(
            testing::dataset().bin_data(0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn crop() {
        let data = testing::dataset();
        let cropped = data.crop_data([2, 6, 1, 7]).unwrap();
        assert_eq!(cropped.roi().unwrap(), [2, 6, 1, 7]);
        assert_eq!(data.roi().unwrap(), [0, 8, 0, 8]);
        for roi in [[2, 2, 0, 8], [0, 9, 0, 8], [5, 3, 0, 8]] {
            assert!(matches!(data.crop_data(roi), Err(Error::InvalidArgument(_))));
        }
    }

    #[test]
    fn integrate_rows() {
        let data = testing::dataset()
            .crop_data([2, 6, 0, 8])
            .unwrap()
            .integrate_data(0)
            .unwrap();
        let a = data.attributes();
        assert_eq!(a.roi, Some([0, 1, 0, 8]));
        let frames = a.data.as_ref().unwrap();
        assert_eq!(frames.dim(), (3, 1, 8));
        assert!(frames.iter().all(|&x| (x - 4. * testing::LEVEL).abs() < 1e-9));
        assert_eq!(a.pixel_map.as_ref().unwrap().dim(), (2, 1, 8));
        assert_eq!(a.mask.as_ref().unwrap().dim(), (3, 1, 8));
        assert!(testing::dataset().integrate_data(2).is_err());
    }

    #[test]
    fn integrate_columns() {
        let data = testing::dataset()
            .crop_data([2, 6, 1, 7])
            .unwrap()
            .integrate_data(1)
            .unwrap();
        let a = data.attributes();
        assert_eq!(a.roi, Some([2, 6, 0, 1]));
        let frames = a.data.as_ref().unwrap();
        assert_eq!(frames.dim(), (3, 8, 1));
        assert_eq!(frames[[0, 3, 0]], 6. * testing::LEVEL);
        // rows outside of the ROI are not summed
        assert_eq!(frames[[0, 0, 0]], 0.);
        assert_eq!(a.pixel_map.as_ref().unwrap().dim(), (2, 8, 1));
        assert_eq!(data.get_data().unwrap().dim(), (3, 4, 1));
    }

    #[test]
    fn mask_frames_drops_empty_frame() {
        let mut attributes = testing::attributes();
        let mut frames = attributes.data.take().unwrap().into_owned();
        frames.index_axis_mut(Axis(0), 1).fill(0.);
        attributes.data = Some(frames.into_shared());
        let data = ExperimentData::new(attributes).unwrap();
        assert_eq!(data.attributes().good_frames, Some(vec![0, 1, 2]));
        let masked = data.mask_frames(None).unwrap();
        assert_eq!(masked.attributes().good_frames, Some(vec![0, 2]));
        let wf = masked.attributes().whitefield.as_ref().unwrap();
        assert!(wf.iter().all(|&x| (x - testing::LEVEL).abs() < 1e-12));
        assert!(matches!(
            data.mask_frames(Some(vec![3])),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn mirror_columns() {
        let data = ExperimentData::new(testing::speckles(2, 6, 8))
            .unwrap()
            .crop_data([1, 5, 2, 8])
            .unwrap();
        let mirrored = data.mirror_data(1).unwrap();
        assert_eq!(mirrored.roi().unwrap(), [1, 5, 0, 6]);
        let (a, b) = (data.attributes(), mirrored.attributes());
        let (d0, d1) = (a.data.as_ref().unwrap(), b.data.as_ref().unwrap());
        assert_eq!(d0[[1, 2, 0]], d1[[1, 2, 7]]);
        let (b0, b1) = (a.basis_vectors.as_ref().unwrap(), b.basis_vectors.as_ref().unwrap());
        assert_eq!(b0[[0, 1, 0]], -b1[[0, 1, 0]]);
        assert_eq!(b0[[0, 0, 1]], b1[[0, 0, 1]]);
        assert!(data.mirror_data(2).is_err());
    }

    #[test]
    fn mirror_rows() {
        let data = ExperimentData::new(testing::speckles(2, 6, 8))
            .unwrap()
            .update_defocus(1e-4, None)
            .unwrap()
            .crop_data([0, 4, 2, 8])
            .unwrap();
        let mirrored = data.mirror_data(0).unwrap();
        assert_eq!(mirrored.roi().unwrap(), [2, 6, 2, 8]);
        let (a, b) = (data.attributes(), mirrored.attributes());
        let (d0, d1) = (a.data.as_ref().unwrap(), b.data.as_ref().unwrap());
        for i in 0..6 {
            assert_eq!(d0[[1, i, 3]], d1[[1, 5 - i, 3]]);
        }
        let (b0, b1) = (a.basis_vectors.as_ref().unwrap(), b.basis_vectors.as_ref().unwrap());
        assert_eq!(b0[[0, 0, 1]], -b1[[0, 0, 1]]);
        assert_eq!(b0[[0, 1, 0]], b1[[0, 1, 0]]);
        // recomputed from the mirrored geometry
        let (p0, p1) = (
            a.pixel_translations.as_ref().unwrap(),
            b.pixel_translations.as_ref().unwrap(),
        );
        assert_eq!(p0.dim(), p1.dim());
    }

    #[test]
    fn range_mask() {
        let mut attributes = testing::attributes();
        let mut frames = attributes.data.take().unwrap().into_owned();
        frames[[0, 3, 3]] = 7e4;
        frames[[1, 4, 4]] = -1.;
        attributes.data = Some(frames.into_shared());
        let data = ExperimentData::new(attributes).unwrap();
        let method = MaskMethod::from_keyword("range-bad", None, None).unwrap();
        let masked = data.update_mask(method, MaskUpdate::Reset).unwrap();
        let mask = masked.attributes().mask.as_ref().unwrap();
        assert!(!mask[[0, 3, 3]]);
        assert!(!mask[[1, 4, 4]]);
        assert_eq!(mask.iter().filter(|&&m| !m).count(), 2);

        // multiply keeps the bad pixels, reset with no-bad drops them
        let kept = masked
            .update_mask(MaskMethod::NoBad, MaskUpdate::Multiply)
            .unwrap();
        assert_eq!(kept.attributes().mask, masked.attributes().mask);
        let reset = masked
            .update_mask(MaskMethod::NoBad, MaskUpdate::Reset)
            .unwrap();
        assert!(reset.attributes().mask.as_ref().unwrap().iter().all(|&m| m));
    }

    #[test]
    fn percentile_mask() {
        let mut attributes = testing::attributes();
        let mut frames = attributes.data.take().unwrap().into_owned();
        frames[[2, 0, 0]] = 1e6;
        attributes.data = Some(frames.into_shared());
        let data = ExperimentData::new(attributes).unwrap();
        let method = MaskMethod::PercBad {
            pmin: 0.,
            pmax: 99.,
        };
        let masked = data.update_mask(method, MaskUpdate::Reset).unwrap();
        let mask = masked.attributes().mask.as_ref().unwrap();
        assert!(!mask[[2, 0, 0]]);
        assert_eq!(mask.iter().filter(|&&m| !m).count(), 1);
    }

    #[test]
    fn mask_keywords() {
        assert_eq!(
            MaskMethod::from_keyword("perc-bad", None, Some(99.)).unwrap(),
            MaskMethod::PercBad {
                pmin: 0.,
                pmax: 99.
            }
        );
        assert!(matches!(
            MaskMethod::from_keyword("all-bad", None, None),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(MaskUpdate::from_str("multiply").unwrap(), MaskUpdate::Multiply);
    }

    #[test]
    fn defocus_orientation_is_stable() {
        let data = testing::dataset().update_defocus(-1e-4, None).unwrap();
        let pm = data.attributes().pixel_map.as_ref().unwrap();
        assert_eq!(pm[[0, 0, 0]], 7.);
        assert_eq!(pm[[1, 0, 0]], 7.);
        let again = data.update_defocus(-1e-4, None).unwrap();
        assert_eq!(again.attributes().pixel_map, data.attributes().pixel_map);
        assert_eq!(again.attributes().defocus_y, Some(-1e-4));
    }

    #[test]
    fn pixel_translations_have_zero_mean() {
        let data = testing::dataset().update_defocus(2e-4, Some(1e-4)).unwrap();
        let pix = data.get_pixel_translations().unwrap();
        for mean in pix.mean_axis(Axis(0)).unwrap() {
            assert!(mean.abs() < 1e-9);
        }
        assert!(testing::dataset().update_defocus(0., None).is_err());
    }

    #[test]
    fn whitefield_is_recomputed() {
        let data = testing::dataset();
        let custom = data
            .update(Patch {
                whitefield: Field::Set(ndarray::ArcArray::from_elem((8, 8), 1.)),
                ..Default::default()
            })
            .unwrap();
        let remade = custom.make_whitefield().unwrap();
        assert_eq!(remade.attributes().whitefield, data.attributes().whitefield);
    }
}
