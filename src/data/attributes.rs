//! Container attributes, partial updates and dynamically typed values

use crate::{protocol::Protocol, record::Field, Error, Result};
use ndarray::{ArcArray, ArcArray2, Array, Array2, Array3, ArrayD, Axis, Ix2, Ix3, IxDyn};
use std::sync::Arc;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Region of interest `[row_min, row_max, col_min, col_max]`, upper bounds excluded
pub type Roi = [usize; 4];
pub type ArcArray3<A> = ArcArray<A, Ix3>;

/// Names of the container attributes
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Attribute {
    BasisVectors,
    Data,
    DefocusX,
    DefocusY,
    Distance,
    ErrorFrame,
    Flatfields,
    GoodFrames,
    Mask,
    NumThreads,
    Phase,
    PixelAberrations,
    PixelMap,
    PixelTranslations,
    Protocol,
    ReferenceImage,
    Roi,
    Sigma,
    Translations,
    Wavelength,
    Whitefield,
    XPixelSize,
    YPixelSize,
}
impl Attribute {
    /// Attributes indexed by frame along their first axis
    pub fn is_frame_indexed(&self) -> bool {
        use Attribute::*;
        matches!(
            self,
            BasisVectors | Flatfields | Data | Mask | PixelTranslations | Translations
        )
    }
}

/// Dynamically typed attribute value, as exchanged with loaders and writers
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Floats(ArrayD<f64>),
    Ints(ArrayD<i64>),
    Bools(ArrayD<bool>),
}
impl Value {
    pub fn into_float(self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(x),
            Value::Int(x) => Some(x as f64),
            Value::Floats(a) if a.len() == 1 => a.iter().next().copied(),
            Value::Ints(a) if a.len() == 1 => a.iter().next().map(|&x| x as f64),
            _ => None,
        }
    }
    pub fn into_int(self) -> Option<i64> {
        match self {
            Value::Int(x) => Some(x),
            Value::Float(x) => Some(x.round() as i64),
            Value::Ints(a) if a.len() == 1 => a.iter().next().copied(),
            Value::Floats(a) if a.len() == 1 => a.iter().next().map(|&x| x.round() as i64),
            _ => None,
        }
    }
    pub fn into_floats(self) -> Option<ArrayD<f64>> {
        match self {
            Value::Floats(a) => Some(a),
            Value::Ints(a) => Some(a.mapv(|x| x as f64)),
            Value::Bools(a) => Some(a.mapv(|x| if x { 1f64 } else { 0f64 })),
            _ => None,
        }
    }
    pub fn into_ints(self) -> Option<ArrayD<i64>> {
        match self {
            Value::Ints(a) => Some(a),
            Value::Floats(a) => Some(a.mapv(|x| x.round() as i64)),
            Value::Bools(a) => Some(a.mapv(i64::from)),
            _ => None,
        }
    }
    pub fn into_bools(self) -> Option<ArrayD<bool>> {
        match self {
            Value::Bools(a) => Some(a),
            Value::Ints(a) => Some(a.mapv(|x| x != 0)),
            Value::Floats(a) => Some(a.mapv(|x| x != 0f64)),
            _ => None,
        }
    }
}
impl<D: ndarray::Dimension> From<Array<f64, D>> for Value {
    fn from(a: Array<f64, D>) -> Self {
        Value::Floats(a.into_dyn())
    }
}
impl<D: ndarray::Dimension> From<Array<bool, D>> for Value {
    fn from(a: Array<bool, D>) -> Self {
        Value::Bools(a.into_dyn())
    }
}

/// Attribute map of an [`ExperimentData`](super::ExperimentData) container
///
/// Arrays are reference counted and shared between containers until written to.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    pub basis_vectors: Option<ArcArray3<f64>>,
    pub data: Option<ArcArray3<f64>>,
    pub defocus_x: Option<f64>,
    pub defocus_y: Option<f64>,
    pub distance: Option<f64>,
    pub error_frame: Option<ArcArray2<f64>>,
    pub flatfields: Option<ArcArray3<f64>>,
    pub good_frames: Option<Vec<usize>>,
    pub mask: Option<ArcArray3<bool>>,
    pub num_threads: Option<usize>,
    pub phase: Option<ArcArray2<f64>>,
    pub pixel_aberrations: Option<ArcArray3<f64>>,
    pub pixel_map: Option<ArcArray3<f64>>,
    pub pixel_translations: Option<ArcArray2<f64>>,
    pub protocol: Option<Arc<Protocol>>,
    pub reference_image: Option<ArcArray2<f64>>,
    pub roi: Option<Roi>,
    pub sigma: Option<f64>,
    pub translations: Option<ArcArray2<f64>>,
    pub wavelength: Option<f64>,
    pub whitefield: Option<ArcArray2<f64>>,
    pub x_pixel_size: Option<f64>,
    pub y_pixel_size: Option<f64>,
}

fn to_dim<D: ndarray::Dimension>(attr: Attribute, a: ArrayD<f64>) -> Result<Array<f64, D>> {
    a.into_dimensionality::<D>()
        .map_err(|_| Error::invalid(format!("`{}` has a wrong number of dimensions", attr)))
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the protocol, the measured frames and the experiment geometry
    #[allow(clippy::too_many_arguments)]
    pub fn required(
        protocol: Arc<Protocol>,
        data: Array3<f64>,
        basis_vectors: Array3<f64>,
        translations: Array2<f64>,
        distance: f64,
        wavelength: f64,
        x_pixel_size: f64,
        y_pixel_size: f64,
    ) -> Self {
        Self {
            protocol: Some(protocol),
            data: Some(data.into_shared()),
            basis_vectors: Some(basis_vectors.into_shared()),
            translations: Some(translations.into_shared()),
            distance: Some(distance),
            wavelength: Some(wavelength),
            x_pixel_size: Some(x_pixel_size),
            y_pixel_size: Some(y_pixel_size),
            ..Default::default()
        }
    }
    pub fn defocus(self, defocus_x: f64, defocus_y: Option<f64>) -> Self {
        Self {
            defocus_x: Some(defocus_x),
            defocus_y,
            ..self
        }
    }
    pub fn roi(self, roi: Roi) -> Self {
        Self {
            roi: Some(roi),
            ..self
        }
    }
    pub fn good_frames(self, good_frames: Vec<usize>) -> Self {
        Self {
            good_frames: Some(good_frames),
            ..self
        }
    }
    pub fn num_threads(self, num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
            ..self
        }
    }
    pub fn whitefield(self, whitefield: Array2<f64>) -> Self {
        Self {
            whitefield: Some(whitefield.into_shared()),
            ..self
        }
    }
    pub fn pixel_map(self, pixel_map: Array3<f64>) -> Self {
        Self {
            pixel_map: Some(pixel_map.into_shared()),
            ..self
        }
    }
    pub fn mask(self, mask: Array3<bool>) -> Self {
        Self {
            mask: Some(mask.into_shared()),
            ..self
        }
    }
    /// Sets a single detector mask shared by all the frames
    ///
    /// The mask is broadcast to the shape of `data`, which must be set beforehand.
    pub fn frame_mask(self, mask: Array2<bool>) -> Result<Self> {
        let mask = self.broadcast_mask(mask)?;
        Ok(Self {
            mask: Some(mask),
            ..self
        })
    }
    fn broadcast_mask(&self, mask: Array2<bool>) -> Result<ArcArray3<bool>> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| Error::precondition("`data` must be set before a frame mask"))?;
        let broadcast = mask.broadcast(data.dim()).ok_or_else(|| {
            Error::invalid(format!(
                "mask of shape {:?} doesn't match the frames shape {:?}",
                mask.dim(),
                data.dim()
            ))
        })?;
        Ok(broadcast.to_owned().into_shared())
    }
    /// Sets an attribute from a dynamically typed value
    ///
    /// A 2D `mask` is broadcast to every frame.
    pub fn set(&mut self, attr: Attribute, value: Value) -> Result<()> {
        use Attribute::*;
        let invalid = || Error::invalid(format!("wrong value type for `{}`", attr));
        let floats = |value: Value| value.into_floats().ok_or_else(invalid);
        let float = |value: Value| value.into_float().ok_or_else(invalid);
        match attr {
            BasisVectors => self.basis_vectors = Some(to_dim::<Ix3>(attr, floats(value)?)?.into_shared()),
            Data => self.data = Some(to_dim::<Ix3>(attr, floats(value)?)?.into_shared()),
            DefocusX => self.defocus_x = Some(float(value)?),
            DefocusY => self.defocus_y = Some(float(value)?),
            Distance => self.distance = Some(float(value)?),
            ErrorFrame => self.error_frame = Some(to_dim::<Ix2>(attr, floats(value)?)?.into_shared()),
            Flatfields => self.flatfields = Some(to_dim::<Ix3>(attr, floats(value)?)?.into_shared()),
            GoodFrames => {
                let frames = value.into_ints().ok_or_else(invalid)?;
                self.good_frames = Some(
                    frames
                        .iter()
                        .map(|&n| usize::try_from(n).map_err(|_| invalid()))
                        .collect::<Result<Vec<usize>>>()?,
                )
            }
            Mask => {
                let mask = value.into_bools().ok_or_else(invalid)?;
                match mask.ndim() {
                    2 => {
                        let mask = mask.into_dimensionality::<Ix2>().map_err(|_| invalid())?;
                        self.mask = Some(self.broadcast_mask(mask)?);
                    }
                    3 => {
                        self.mask = Some(mask.into_dimensionality::<Ix3>().map_err(|_| invalid())?.into_shared())
                    }
                    _ => return Err(Error::invalid("mask must be 2- or 3-dimensional")),
                }
            }
            NumThreads => {
                self.num_threads = Some(
                    usize::try_from(value.into_int().ok_or_else(invalid)?)
                        .map_err(|_| invalid())?,
                )
            }
            Phase => self.phase = Some(to_dim::<Ix2>(attr, floats(value)?)?.into_shared()),
            PixelAberrations => {
                self.pixel_aberrations = Some(to_dim::<Ix3>(attr, floats(value)?)?.into_shared())
            }
            PixelMap => self.pixel_map = Some(to_dim::<Ix3>(attr, floats(value)?)?.into_shared()),
            PixelTranslations => {
                self.pixel_translations = Some(to_dim::<Ix2>(attr, floats(value)?)?.into_shared())
            }
            Protocol => return Err(Error::invalid("the protocol can't be set from a value")),
            ReferenceImage => {
                self.reference_image = Some(to_dim::<Ix2>(attr, floats(value)?)?.into_shared())
            }
            Roi => {
                let roi = value.into_ints().ok_or_else(invalid)?;
                let roi: Vec<usize> = roi
                    .iter()
                    .map(|&x| usize::try_from(x).map_err(|_| invalid()))
                    .collect::<Result<_>>()?;
                self.roi = Some(roi.try_into().map_err(|_| invalid())?);
            }
            Sigma => self.sigma = Some(float(value)?),
            Translations => self.translations = Some(to_dim::<Ix2>(attr, floats(value)?)?.into_shared()),
            Wavelength => self.wavelength = Some(float(value)?),
            Whitefield => self.whitefield = Some(to_dim::<Ix2>(attr, floats(value)?)?.into_shared()),
            XPixelSize => self.x_pixel_size = Some(float(value)?),
            YPixelSize => self.y_pixel_size = Some(float(value)?),
        }
        Ok(())
    }
    /// Returns the stored value of an attribute, without any view applied
    pub fn value(&self, attr: Attribute) -> Option<Value> {
        use Attribute::*;
        let floats3 = |a: &Option<ArcArray3<f64>>| a.as_ref().map(|a| Value::from(a.to_owned()));
        let floats2 = |a: &Option<ArcArray2<f64>>| a.as_ref().map(|a| Value::from(a.to_owned()));
        match attr {
            BasisVectors => floats3(&self.basis_vectors),
            Data => floats3(&self.data),
            DefocusX => self.defocus_x.map(Value::Float),
            DefocusY => self.defocus_y.map(Value::Float),
            Distance => self.distance.map(Value::Float),
            ErrorFrame => floats2(&self.error_frame),
            Flatfields => floats3(&self.flatfields),
            GoodFrames => self.good_frames.as_ref().map(|frames| {
                Value::Ints(
                    ArrayD::from_shape_vec(
                        IxDyn(&[frames.len()]),
                        frames.iter().map(|&n| n as i64).collect(),
                    )
                    .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[0]))),
                )
            }),
            Mask => self.mask.as_ref().map(|a| Value::from(a.to_owned())),
            NumThreads => self.num_threads.map(|n| Value::Int(n as i64)),
            Phase => floats2(&self.phase),
            PixelAberrations => floats3(&self.pixel_aberrations),
            PixelMap => floats3(&self.pixel_map),
            PixelTranslations => floats2(&self.pixel_translations),
            Protocol => None,
            ReferenceImage => floats2(&self.reference_image),
            Roi => self.roi.map(|roi| {
                Value::Ints(ndarray::Array1::from_iter(roi.iter().map(|&x| x as i64)).into_dyn())
            }),
            Sigma => self.sigma.map(Value::Float),
            Translations => floats2(&self.translations),
            Wavelength => self.wavelength.map(Value::Float),
            Whitefield => floats2(&self.whitefield),
            XPixelSize => self.x_pixel_size.map(Value::Float),
            YPixelSize => self.y_pixel_size.map(Value::Float),
        }
    }
    pub fn is_present(&self, attr: Attribute) -> bool {
        use Attribute::*;
        match attr {
            BasisVectors => self.basis_vectors.is_some(),
            Data => self.data.is_some(),
            DefocusX => self.defocus_x.is_some(),
            DefocusY => self.defocus_y.is_some(),
            Distance => self.distance.is_some(),
            ErrorFrame => self.error_frame.is_some(),
            Flatfields => self.flatfields.is_some(),
            GoodFrames => self.good_frames.is_some(),
            Mask => self.mask.is_some(),
            NumThreads => self.num_threads.is_some(),
            Phase => self.phase.is_some(),
            PixelAberrations => self.pixel_aberrations.is_some(),
            PixelMap => self.pixel_map.is_some(),
            PixelTranslations => self.pixel_translations.is_some(),
            Protocol => self.protocol.is_some(),
            ReferenceImage => self.reference_image.is_some(),
            Roi => self.roi.is_some(),
            Sigma => self.sigma.is_some(),
            Translations => self.translations.is_some(),
            Wavelength => self.wavelength.is_some(),
            Whitefield => self.whitefield.is_some(),
            XPixelSize => self.x_pixel_size.is_some(),
            YPixelSize => self.y_pixel_size.is_some(),
        }
    }
    /// Number of frames in `data`
    pub(crate) fn n_frames(&self) -> Option<usize> {
        self.data.as_ref().map(|data| data.len_of(Axis(0)))
    }
}

/// Partial update of an [`ExperimentData`](super::ExperimentData) container
#[derive(Debug, Clone, Default)]
pub struct Patch {
    pub basis_vectors: Field<ArcArray3<f64>>,
    pub data: Field<ArcArray3<f64>>,
    pub defocus_x: Field<f64>,
    pub defocus_y: Field<f64>,
    pub distance: Field<f64>,
    pub error_frame: Field<ArcArray2<f64>>,
    pub flatfields: Field<ArcArray3<f64>>,
    pub good_frames: Field<Vec<usize>>,
    pub mask: Field<ArcArray3<bool>>,
    pub num_threads: Field<usize>,
    pub phase: Field<ArcArray2<f64>>,
    pub pixel_aberrations: Field<ArcArray3<f64>>,
    pub pixel_map: Field<ArcArray3<f64>>,
    pub pixel_translations: Field<ArcArray2<f64>>,
    pub protocol: Field<Arc<Protocol>>,
    pub reference_image: Field<ArcArray2<f64>>,
    pub roi: Field<Roi>,
    pub sigma: Field<f64>,
    pub translations: Field<ArcArray2<f64>>,
    pub wavelength: Field<f64>,
    pub whitefield: Field<ArcArray2<f64>>,
    pub x_pixel_size: Field<f64>,
    pub y_pixel_size: Field<f64>,
}
impl Patch {
    pub(crate) fn merge_into(self, a: &mut Attributes) {
        self.basis_vectors.merge(&mut a.basis_vectors);
        self.data.merge(&mut a.data);
        self.defocus_x.merge(&mut a.defocus_x);
        self.defocus_y.merge(&mut a.defocus_y);
        self.distance.merge(&mut a.distance);
        self.error_frame.merge(&mut a.error_frame);
        self.flatfields.merge(&mut a.flatfields);
        self.good_frames.merge(&mut a.good_frames);
        self.mask.merge(&mut a.mask);
        self.num_threads.merge(&mut a.num_threads);
        self.phase.merge(&mut a.phase);
        self.pixel_aberrations.merge(&mut a.pixel_aberrations);
        self.pixel_map.merge(&mut a.pixel_map);
        self.pixel_translations.merge(&mut a.pixel_translations);
        self.protocol.merge(&mut a.protocol);
        self.reference_image.merge(&mut a.reference_image);
        self.roi.merge(&mut a.roi);
        self.sigma.merge(&mut a.sigma);
        self.translations.merge(&mut a.translations);
        self.wavelength.merge(&mut a.wavelength);
        self.whitefield.merge(&mut a.whitefield);
        self.x_pixel_size.merge(&mut a.x_pixel_size);
        self.y_pixel_size.merge(&mut a.y_pixel_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};
    use std::str::FromStr;

    #[test]
    fn attribute_names() {
        assert_eq!(Attribute::XPixelSize.to_string(), "x_pixel_size");
        assert_eq!(
            Attribute::from_str("pixel_translations").unwrap(),
            Attribute::PixelTranslations
        );
        assert!(Attribute::Translations.is_frame_indexed());
        assert!(!Attribute::Whitefield.is_frame_indexed());
    }

    #[test]
    fn frame_mask_is_broadcast() {
        let mut attributes = Attributes::new();
        attributes
            .set(Attribute::Data, Array3::<f64>::ones((3, 4, 5)).into())
            .unwrap();
        let mut mask = Array2::from_elem((4, 5), true);
        mask[[1, 2]] = false;
        attributes.set(Attribute::Mask, mask.into()).unwrap();
        let mask = attributes.mask.unwrap();
        assert_eq!(mask.dim(), (3, 4, 5));
        assert!((0..3).all(|n| !mask[[n, 1, 2]]));
    }

    #[test]
    fn values_round_trip_types() {
        let mut attributes = Attributes::new();
        attributes
            .set(
                Attribute::Roi,
                Value::Ints(ndarray::arr1(&[0i64, 4, 1, 5]).into_dyn()),
            )
            .unwrap();
        attributes.set(Attribute::Distance, Value::Int(2)).unwrap();
        assert_eq!(attributes.roi, Some([0, 4, 1, 5]));
        assert_eq!(attributes.distance, Some(2f64));
        assert!(attributes
            .set(Attribute::GoodFrames, Value::Ints(ndarray::arr1(&[-1i64]).into_dyn()))
            .is_err());
    }
}
