//! ROI and good frames views
//!
//! The stored arrays span the full detector frame and all the frames, the views select
//! the region of interest and the good frames without touching the storage.

use super::{Attribute, ExperimentData, Value};
use ndarray::{Array, Array1, Array2, Array3, ArrayBase, Axis, Dimension, RemoveAxis, Slice};

impl ExperimentData {
    /// Crops `a` to the ROI if `attr` is data-shaped and selects the good frames if
    /// `attr` is indexed by frame
    fn view_of<S, D>(&self, attr: Attribute, a: &ArrayBase<S, D>) -> Array<S::Elem, D>
    where
        S: ndarray::Data,
        S::Elem: Clone,
        D: Dimension + RemoveAxis,
    {
        let mut view = a.view();
        let is_data = self
            .attributes
            .protocol
            .as_ref()
            .is_some_and(|protocol| protocol.get_is_data(attr));
        if let (true, Some(roi)) = (is_data, self.attributes.roi) {
            let ndim = view.ndim();
            if ndim >= 2 {
                view.slice_axis_inplace(Axis(ndim - 2), Slice::from(roi[0]..roi[1]));
                view.slice_axis_inplace(Axis(ndim - 1), Slice::from(roi[2]..roi[3]));
            }
        }
        match (&self.attributes.good_frames, attr.is_frame_indexed()) {
            (Some(good_frames), true) if view.ndim() > 0 => view.select(Axis(0), good_frames),
            _ => view.to_owned(),
        }
    }

    /// Returns the view of `attr` or `None` if it is absent
    pub fn get(&self, attr: Attribute) -> Option<Value> {
        use Attribute::*;
        let a = &self.attributes;
        match attr {
            BasisVectors => a.basis_vectors.as_ref().map(|x| self.view_of(attr, x).into()),
            Data => a.data.as_ref().map(|x| self.view_of(attr, x).into()),
            ErrorFrame => a.error_frame.as_ref().map(|x| self.view_of(attr, x).into()),
            Flatfields => a.flatfields.as_ref().map(|x| self.view_of(attr, x).into()),
            Mask => a.mask.as_ref().map(|x| self.view_of(attr, x).into()),
            Phase => a.phase.as_ref().map(|x| self.view_of(attr, x).into()),
            PixelAberrations => a
                .pixel_aberrations
                .as_ref()
                .map(|x| self.view_of(attr, x).into()),
            PixelMap => a.pixel_map.as_ref().map(|x| self.view_of(attr, x).into()),
            PixelTranslations => a
                .pixel_translations
                .as_ref()
                .map(|x| self.view_of(attr, x).into()),
            ReferenceImage => a
                .reference_image
                .as_ref()
                .map(|x| self.view_of(attr, x).into()),
            Translations => a.translations.as_ref().map(|x| self.view_of(attr, x).into()),
            Whitefield => a.whitefield.as_ref().map(|x| self.view_of(attr, x).into()),
            _ => a.value(attr),
        }
    }
    /// Returns the view of `attr` or `fallback` if it is absent
    pub fn get_or(&self, attr: Attribute, fallback: Value) -> Value {
        self.get(attr).unwrap_or(fallback)
    }

    pub fn get_data(&self) -> Option<Array3<f64>> {
        self.attributes
            .data
            .as_ref()
            .map(|x| self.view_of(Attribute::Data, x))
    }
    pub fn get_mask(&self) -> Option<Array3<bool>> {
        self.attributes
            .mask
            .as_ref()
            .map(|x| self.view_of(Attribute::Mask, x))
    }
    pub fn get_whitefield(&self) -> Option<Array2<f64>> {
        self.attributes
            .whitefield
            .as_ref()
            .map(|x| self.view_of(Attribute::Whitefield, x))
    }
    pub fn get_pixel_map(&self) -> Option<Array3<f64>> {
        self.attributes
            .pixel_map
            .as_ref()
            .map(|x| self.view_of(Attribute::PixelMap, x))
    }
    pub fn get_pixel_aberrations(&self) -> Option<Array3<f64>> {
        self.attributes
            .pixel_aberrations
            .as_ref()
            .map(|x| self.view_of(Attribute::PixelAberrations, x))
    }
    pub fn get_pixel_translations(&self) -> Option<Array2<f64>> {
        self.attributes
            .pixel_translations
            .as_ref()
            .map(|x| self.view_of(Attribute::PixelTranslations, x))
    }
    pub fn get_flatfields(&self) -> Option<Array3<f64>> {
        self.attributes
            .flatfields
            .as_ref()
            .map(|x| self.view_of(Attribute::Flatfields, x))
    }
    pub fn get_phase(&self) -> Option<Array2<f64>> {
        self.attributes
            .phase
            .as_ref()
            .map(|x| self.view_of(Attribute::Phase, x))
    }
    pub fn get_reference_image(&self) -> Option<Array2<f64>> {
        self.attributes.reference_image.as_ref().map(|x| x.to_owned())
    }
    pub fn get_translations(&self) -> Option<Array2<f64>> {
        self.attributes
            .translations
            .as_ref()
            .map(|x| self.view_of(Attribute::Translations, x))
    }
    pub fn get_basis_vectors(&self) -> Option<Array3<f64>> {
        self.attributes
            .basis_vectors
            .as_ref()
            .map(|x| self.view_of(Attribute::BasisVectors, x))
    }
    /// Good frames indices
    pub fn get_good_frames(&self) -> Option<Array1<usize>> {
        self.attributes
            .good_frames
            .as_ref()
            .map(|frames| Array1::from_vec(frames.clone()))
    }
}

#[cfg(test)]
mod tests {
    use crate::{testing, Attribute, ExperimentData, Record, Value};

    #[test]
    fn data_views_match_roi() {
        let data = testing::dataset().crop_data([1, 5, 2, 8]).unwrap();
        for attr in [
            Attribute::Data,
            Attribute::Mask,
            Attribute::Whitefield,
            Attribute::PixelMap,
        ] {
            let shape = match data.get(attr).unwrap() {
                Value::Floats(a) => a.shape().to_vec(),
                Value::Bools(a) => a.shape().to_vec(),
                _ => unreachable!(),
            };
            assert_eq!(&shape[shape.len() - 2..], &[4, 6], "{}", attr);
        }
        assert_eq!(data.get_data().unwrap().dim(), (3, 4, 6));
    }

    #[test]
    fn good_frames_selection() {
        let data = testing::dataset().mask_frames(Some(vec![0, 2])).unwrap();
        assert_eq!(data.get_data().unwrap().dim(), (2, 8, 8));
        assert_eq!(data.get_translations().unwrap().nrows(), 2);
        assert_eq!(data.get_basis_vectors().unwrap().dim(), (2, 2, 3));
        // not indexed by frame
        assert_eq!(data.get_whitefield().unwrap().dim(), (8, 8));
    }

    #[test]
    fn absent_attribute_fallback() {
        let data = testing::dataset();
        assert!(data.get(Attribute::Phase).is_none());
        assert_eq!(
            data.get_or(Attribute::DefocusX, Value::Float(-1.)),
            Value::Float(-1.)
        );
        assert_eq!(data.get(Attribute::Distance), Some(Value::Float(testing::DISTANCE)));
    }

    #[test]
    fn views_do_not_mutate_storage() {
        let data: ExperimentData = testing::dataset().crop_data([0, 2, 0, 2]).unwrap();
        let _ = data.get_data();
        assert_eq!(data.attributes().data.as_ref().unwrap().dim(), (3, 8, 8));
    }
}
