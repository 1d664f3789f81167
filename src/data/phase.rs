//! Phase retrieval and aberrations fit

use super::{Attribute, ExperimentData, Patch};
use crate::{
    fit::{AberrationsFit, FitInput, FitResult, Loss},
    geometry, integrate,
    record::{Field, Record},
    tracking::Tracking,
    Error, Result,
};
use ndarray::{s, Array1, Array2, Array3, Axis};
use std::f64::consts::PI;

fn missing(attr: Attribute) -> Error {
    Error::MissingAttribute(attr.to_string())
}

impl ExperimentData {
    /// Updates the pixel aberrations, the phase and the reference image from a speckle
    /// tracking working object derived from this container
    ///
    /// The pixel aberrations are the deviations of the working object pixel map from the
    /// container pixel map, the phase is obtained by integrating the wavefront gradients
    /// they imply.
    pub fn update_phase<T: Tracking>(&mut self, tracking: &T) -> Result<()> {
        if !self.owns(&tracking.parent()) {
            return Err(Error::precondition(
                "the tracking object doesn't belong to the data container",
            ));
        }
        let (defocus_y, defocus_x) = self.require_defocus()?;
        let a = &self.attributes;
        let distance = *super::require(&a.distance, Attribute::Distance)?;
        let wavelength = *super::require(&a.wavelength, Attribute::Wavelength)?;
        let x_pixel_size = *super::require(&a.x_pixel_size, Attribute::XPixelSize)?;
        let y_pixel_size = *super::require(&a.y_pixel_size, Attribute::YPixelSize)?;
        let full_map = super::require(&a.pixel_map, Attribute::PixelMap)?;
        let whitefield = super::require(&a.whitefield, Attribute::Whitefield)?;
        let roi = self.roi()?;

        let pixel_map = self
            .get_pixel_map()
            .ok_or_else(|| missing(Attribute::PixelMap))?;
        let tracked = tracking
            .pixel_map()
            .ok_or_else(|| Error::precondition("the tracking object has no pixel map"))?;
        if tracked.dim() != pixel_map.dim() {
            return Err(Error::invalid(format!(
                "tracking pixel map {:?} doesn't match the ROI {:?}",
                tracked.dim(),
                pixel_map.dim()
            )));
        }
        let mut dpm = &tracked - &pixel_map;
        for mut component in dpm.outer_iter_mut() {
            let mean = component.mean().unwrap_or(0f64);
            component -= mean;
        }

        let mut pixel_aberrations = Array3::<f64>::zeros(full_map.dim());
        pixel_aberrations
            .slice_mut(s![.., roi[0]..roi[1], roi[2]..roi[3]])
            .assign(&dpm);

        let mag_y = geometry::magnification(distance, defocus_y);
        let mag_x = geometry::magnification(distance, defocus_x);
        let dist_y = geometry::propagation_distance(distance, mag_y);
        let dist_x = geometry::propagation_distance(distance, mag_x);
        let sy = dpm
            .index_axis(Axis(0), 0)
            .mapv(|d| y_pixel_size * y_pixel_size / dist_y / mag_y * d);
        let sx = dpm
            .index_axis(Axis(0), 1)
            .mapv(|d| x_pixel_size * x_pixel_size / dist_x / mag_x * d);
        let phase_roi = integrate::ct_integrate(sy.view(), sx.view()) * (2f64 * PI / wavelength);
        let mut phase = Array2::<f64>::zeros(whitefield.dim());
        phase
            .slice_mut(s![roi[0]..roi[1], roi[2]..roi[3]])
            .assign(&phase_roi);
        log::info!(
            "phase updated, peak to valley {:.3} rad",
            phase_roi.iter().copied().fold(f64::NEG_INFINITY, f64::max)
                - phase_roi.iter().copied().fold(f64::INFINITY, f64::min)
        );

        self.update_in_place(Patch {
            pixel_aberrations: Field::Set(pixel_aberrations.into_shared()),
            phase: Field::Set(phase.into_shared()),
            reference_image: tracking
                .reference_image()
                .map(|image| image.to_owned().into_shared())
                .into(),
            ..Default::default()
        });
        Ok(())
    }

    /// Returns the aberrations fitting object of the pixel aberrations profile along
    /// `axis`
    ///
    /// `origin` is the pixel index of the zero scattering angle, it must lie outside
    /// of the ROI (at or before its first pixel, or at or after its last one).
    pub fn get_fit(&self, origin: isize, axis: usize) -> Result<AberrationsFit> {
        if !self.is_phase() {
            return Err(Error::precondition(
                "the phase has not been retrieved, call `update_phase` first",
            ));
        }
        if axis > 1 {
            return Err(Error::invalid(format!("axis must be 0 or 1, found {}", axis)));
        }
        let (defocus_y, defocus_x) = self.require_defocus()?;
        let a = &self.attributes;
        let (defocus, pixel_size) = if axis == 0 {
            (defocus_y, a.y_pixel_size)
        } else {
            (defocus_x, a.x_pixel_size)
        };
        let pixel_size = pixel_size.ok_or_else(|| {
            missing(if axis == 0 {
                Attribute::YPixelSize
            } else {
                Attribute::XPixelSize
            })
        })?;
        let roi = self.roi()?;
        let (lo, hi) = (roi[2 * axis] as isize, roi[2 * axis + 1] as isize);
        let pixel_aberrations = self
            .get_pixel_aberrations()
            .ok_or_else(|| missing(Attribute::PixelAberrations))?;
        let profile = pixel_aberrations
            .index_axis(Axis(0), axis)
            .mean_axis(Axis(1 - axis))
            .ok_or_else(|| Error::invalid("empty pixel aberrations"))?;
        let (pixels, profile): (Array1<f64>, Array1<f64>) = if origin <= lo {
            ((lo..hi).map(|i| (i - origin) as f64).collect(), profile)
        } else if origin >= hi - 1 {
            (
                (lo..hi).rev().map(|i| (origin - i) as f64).collect(),
                profile.iter().rev().map(|x| -x).collect(),
            )
        } else {
            return Err(Error::invalid(format!(
                "origin {} must be outside of the ROI [{}, {})",
                origin, lo, hi
            )));
        };
        let input = FitInput {
            pixels,
            pixel_aberrations: profile,
            defocus: defocus.abs(),
            wavelength: *super::require(&a.wavelength, Attribute::Wavelength)?,
            distance: *super::require(&a.distance, Attribute::Distance)?,
            pixel_size,
        };
        AberrationsFit::new(input, self.handle())
    }

    /// Fits the pixel aberrations profile along `axis` with a polynomial of order
    /// `max_order`
    pub fn fit_phase(
        &self,
        origin: isize,
        axis: usize,
        max_order: usize,
        xtol: f64,
        ftol: f64,
        loss: Loss,
    ) -> Result<FitResult> {
        let fit = self.get_fit(origin, axis)?;
        log::info!(
            "fitting the pixel aberrations along axis {} (order {}, {} loss)",
            axis,
            max_order,
            loss
        );
        fit.fit(max_order, xtol, ftol, loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::Identity, testing, tracking::TrackingOptions, RefMethod};
    use ndarray::{ArrayView1, ArrayView2, ArrayView3};
    use std::sync::Weak;

    /// Working object with a prescribed pixel map
    struct Mock {
        parent: Weak<Identity>,
        pixel_map: Array3<f64>,
    }
    impl Tracking for Mock {
        fn parent(&self) -> Weak<Identity> {
            self.parent.clone()
        }
        fn pixel_map(&self) -> Option<ArrayView3<'_, f64>> {
            Some(self.pixel_map.view())
        }
        fn di_pix(&self) -> Option<ArrayView1<'_, f64>> {
            None
        }
        fn dj_pix(&self) -> Option<ArrayView1<'_, f64>> {
            None
        }
        fn reference_image(&self) -> Option<ArrayView2<'_, f64>> {
            None
        }
        fn sigma(&self) -> Option<f64> {
            None
        }
        fn scale_translations(&mut self, _: f64, _: f64) {}
        fn update_reference(&mut self, _: f64, _: RefMethod) -> Result<()> {
            Ok(())
        }
    }

    fn defocused() -> ExperimentData {
        testing::dataset()
            .update_defocus(1e-4, None)
            .unwrap()
            .crop_data([0, 8, 2, 8])
            .unwrap()
    }

    /// Tracked pixel map with a quadratic horizontal aberration
    fn aberrated(data: &ExperimentData) -> Array3<f64> {
        let mut pixel_map = data.get_pixel_map().unwrap();
        let (_, _, cols) = pixel_map.dim();
        for mut row in pixel_map.index_axis_mut(Axis(0), 1).rows_mut() {
            for j in 0..cols {
                row[j] += 0.01 * (j * j) as f64;
            }
        }
        pixel_map
    }

    #[test]
    fn foreign_tracking_object() {
        let mut data = defocused();
        let other = defocused();
        let st = other.get_st(TrackingOptions::default()).unwrap();
        assert!(matches!(data.update_phase(&st), Err(Error::Precondition(_))));
        assert!(!data.is_phase());
    }

    #[test]
    fn phase_from_tracking() {
        let mut data = defocused();
        let mut st = data.get_st(TrackingOptions::default()).unwrap();
        st.update_reference(1., RefMethod::KernelRegression).unwrap();
        data.update_phase(&st).unwrap();
        assert!(data.is_phase());
        let a = data.attributes();
        // the tracking pixel map is the container's one
        assert!(a.pixel_aberrations.as_ref().unwrap().iter().all(|x| x.abs() < 1e-12));
        assert_eq!(a.phase.as_ref().unwrap().dim(), (8, 8));
        assert_eq!(a.reference_image.as_ref().unwrap().dim(), st.reference_shape().unwrap());
    }

    #[test]
    fn aberrations_profile() {
        let mut data = defocused();
        let mock = Mock {
            parent: data.handle(),
            pixel_map: aberrated(&data),
        };
        data.update_phase(&mock).unwrap();
        let a = data.attributes();
        let pixel_aberrations = a.pixel_aberrations.as_ref().unwrap();
        assert_eq!(pixel_aberrations.dim(), (2, 8, 8));
        // zeros outside of the ROI, zero mean inside
        assert_eq!(pixel_aberrations[[1, 3, 0]], 0.);
        let view = data.get_pixel_aberrations().unwrap();
        assert!(view.index_axis(Axis(0), 1).mean().unwrap().abs() < 1e-12);
        assert!(view.index_axis(Axis(0), 0).iter().all(|x| x.abs() < 1e-12));
        let phase = data.get_phase().unwrap();
        assert!(phase.iter().all(|x| x.is_finite()));
        assert!(a.reference_image.is_none());
    }

    #[test]
    fn fit_origin_outside_roi() {
        let mut data = defocused();
        let mock = Mock {
            parent: data.handle(),
            pixel_map: aberrated(&data),
        };
        data.update_phase(&mock).unwrap();
        for origin in [3, 5, 6] {
            assert!(matches!(
                data.fit_phase(origin, 1, 2, 1e-14, 1e-14, Loss::Cauchy),
                Err(Error::InvalidArgument(_))
            ));
        }
        assert!(data.get_fit(0, 2).is_err());

        let before = data.get_fit(0, 1).unwrap();
        assert_eq!(before.input().pixels.to_vec(), vec![2., 3., 4., 5., 6., 7.]);
        let after = data.get_fit(9, 1).unwrap();
        assert_eq!(after.input().pixels.to_vec(), vec![2., 3., 4., 5., 6., 7.]);
        let (p0, p1) = (&before.input().pixel_aberrations, &after.input().pixel_aberrations);
        assert!((p0[0] + p1[5]).abs() < 1e-12);
        assert!(data.owns(&after.parent()));

        let result = data.fit_phase(0, 1, 2, 1e-14, 1e-14, Loss::Linear).unwrap();
        assert_eq!(result.fit.len(), 3);
        assert!(result.r_sq > 0.999);
    }

    #[test]
    fn fit_requires_phase() {
        assert!(matches!(
            defocused().fit_phase(0, 1, 2, 1e-14, 1e-14, Loss::Cauchy),
            Err(Error::Precondition(_))
        ));
    }
}
