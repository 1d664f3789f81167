//! Speckle tracking experiment data container
//!
//! [ExperimentData] holds the measured frames with the experiment geometry and the
//! quantities derived from them. The optional attributes are resolved on construction
//! in the order of [ExperimentData::initializers]:
//!
//! | attribute | default |
//! |-----------|---------|
//! | `num_threads` | host parallelism clamped to `[1, 64]` |
//! | `roi` | full frame |
//! | `good_frames` | all the frames |
//! | `mask` | all pixels valid |
//! | `whitefield` | masked median of the good frames |
//! | `pixel_map` | identity grid over the whitefield |
//! | `sigma` | standard deviation of the masked data in the ROI |
//! | `defocus_y` | `defocus_x` |
//!
//! An initializer only sees the attributes resolved before it.

use crate::{
    geometry,
    numeric,
    protocol::Protocol,
    record::{Initializer, Record},
    Error, Result,
};
use ndarray::{s, Axis};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

mod attributes;
mod flatfield;
mod phase;
mod sweep;
mod transform;
mod view;

pub use attributes::{ArcArray3, Attribute, Attributes, Patch, Roi, Value};
pub use flatfield::FlatfieldMethod;
pub use sweep::{SweepOptions, SweepResult};
pub use transform::{MaskMethod, MaskUpdate};

static SERIAL: AtomicU64 = AtomicU64::new(0);

/// Identity token of an [ExperimentData] instance
///
/// Working objects derived from a container keep a [Weak] reference to its token.
#[derive(Debug)]
pub struct Identity(u64);
impl Identity {
    fn new() -> Arc<Self> {
        Arc::new(Self(SERIAL.fetch_add(1, Ordering::Relaxed)))
    }
    pub fn serial(&self) -> u64 {
        self.0
    }
}

/// Experiment data container
#[derive(Debug)]
pub struct ExperimentData {
    attributes: Attributes,
    identity: Arc<Identity>,
}

pub(crate) fn require<T>(value: &Option<T>, attr: Attribute) -> Result<&T> {
    value
        .as_ref()
        .ok_or_else(|| Error::MissingAttribute(attr.to_string()))
}

fn init_num_threads(a: &mut Attributes) -> Result<()> {
    let n = std::thread::available_parallelism().map_or(1, |n| n.get());
    a.num_threads = Some(n.clamp(1, crate::MAX_THREADS));
    Ok(())
}
fn init_roi(a: &mut Attributes) -> Result<()> {
    if let Some(data) = &a.data {
        let (_, rows, cols) = data.dim();
        a.roi = Some([0, rows, 0, cols]);
    }
    Ok(())
}
fn init_good_frames(a: &mut Attributes) -> Result<()> {
    a.good_frames = a.n_frames().map(|n| (0..n).collect());
    Ok(())
}
fn init_mask(a: &mut Attributes) -> Result<()> {
    a.mask = a
        .data
        .as_ref()
        .map(|data| ndarray::ArcArray::from_elem(data.dim(), true));
    Ok(())
}
fn init_whitefield(a: &mut Attributes) -> Result<()> {
    let data = require(&a.data, Attribute::Data)?;
    let mask = require(&a.mask, Attribute::Mask)?;
    let good_frames = require(&a.good_frames, Attribute::GoodFrames)?;
    let n_frames = data.len_of(Axis(0));
    if mask.dim() != data.dim() || good_frames.iter().any(|&n| n >= n_frames) {
        return Err(Error::invalid(format!(
            "`mask` or `good_frames` doesn't match the frames shape {:?}",
            data.dim()
        )));
    }
    let num_threads = a.num_threads.unwrap_or(1);
    let whitefield = numeric::with_pool(num_threads, || {
        numeric::masked_median_frames(
            data.select(Axis(0), good_frames).view(),
            mask.select(Axis(0), good_frames).view(),
        )
    })?;
    a.whitefield = Some(whitefield.into_shared());
    Ok(())
}
fn init_pixel_map(a: &mut Attributes) -> Result<()> {
    a.pixel_map = a.whitefield.as_ref().map(|wf| {
        let (rows, cols) = wf.dim();
        geometry::identity_pixel_map(rows, cols).into_shared()
    });
    Ok(())
}
fn init_sigma(a: &mut Attributes) -> Result<()> {
    if let (Some(data), Some(mask), Some(roi)) = (&a.data, &a.mask, &a.roi) {
        let (_, rows, cols) = data.dim();
        geometry::check_roi(roi, rows, cols)?;
        if mask.dim() != data.dim() {
            return Err(Error::invalid("`mask` doesn't match the frames shape"));
        }
        let data = data.slice(s![.., roi[0]..roi[1], roi[2]..roi[3]]);
        let mask = mask.slice(s![.., roi[0]..roi[1], roi[2]..roi[3]]);
        let masked: Vec<f64> = data
            .iter()
            .zip(mask.iter())
            .map(|(&x, &m)| if m { x } else { 0f64 })
            .collect();
        a.sigma = Some(numeric::std(&masked));
    }
    Ok(())
}
fn init_defocus_y(a: &mut Attributes) -> Result<()> {
    a.defocus_y = a.defocus_x;
    Ok(())
}

impl Record for ExperimentData {
    type Name = Attribute;
    type Attributes = Attributes;
    type Patch = Patch;

    const REQUIRED: &'static [Attribute] = &[
        Attribute::BasisVectors,
        Attribute::Data,
        Attribute::Distance,
        Attribute::Protocol,
        Attribute::Translations,
        Attribute::Wavelength,
        Attribute::XPixelSize,
        Attribute::YPixelSize,
    ];

    /// Reordering this table changes the defaults: `whitefield` needs `mask` and
    /// `good_frames`, `pixel_map` needs `whitefield`, `sigma` needs `roi` and `mask`.
    fn initializers() -> Vec<Initializer<Attribute, Attributes>> {
        vec![
            Initializer::new(Attribute::NumThreads, init_num_threads),
            Initializer::new(Attribute::Roi, init_roi),
            Initializer::new(Attribute::GoodFrames, init_good_frames),
            Initializer::new(Attribute::Mask, init_mask),
            Initializer::new(Attribute::Whitefield, init_whitefield),
            Initializer::new(Attribute::PixelMap, init_pixel_map),
            Initializer::new(Attribute::Sigma, init_sigma),
            Initializer::new(Attribute::DefocusY, init_defocus_y),
        ]
    }
    fn is_present(attributes: &Attributes, name: Attribute) -> bool {
        attributes.is_present(name)
    }
    fn merge(attributes: &mut Attributes, patch: Patch) {
        patch.merge_into(attributes)
    }
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }
    fn assemble(mut attributes: Attributes) -> Result<Self> {
        let data = require(&attributes.data, Attribute::Data)?;
        let (n_frames, rows, cols) = data.dim();
        let check = |attr: Attribute, ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(Error::invalid(format!(
                    "`{}` doesn't match the frames shape {:?}",
                    attr,
                    data.dim()
                )))
            }
        };
        let basis_vectors = require(&attributes.basis_vectors, Attribute::BasisVectors)?;
        check(Attribute::BasisVectors, basis_vectors.dim() == (n_frames, 2, 3))?;
        let translations = require(&attributes.translations, Attribute::Translations)?;
        check(Attribute::Translations, translations.dim() == (n_frames, 3))?;
        if let Some(mask) = &attributes.mask {
            check(Attribute::Mask, mask.dim() == data.dim())?;
        }
        if let Some(good_frames) = &attributes.good_frames {
            check(Attribute::GoodFrames, good_frames.iter().all(|&n| n < n_frames))?;
        }
        if let Some(roi) = &attributes.roi {
            geometry::check_roi(roi, rows, cols)?;
        }
        if let Some(whitefield) = &attributes.whitefield {
            check(Attribute::Whitefield, whitefield.dim() == (rows, cols))?;
        }
        if let Some(pixel_map) = &attributes.pixel_map {
            check(Attribute::PixelMap, pixel_map.dim() == (2, rows, cols))?;
        }
        if let Some(num_threads) = attributes.num_threads {
            attributes.num_threads = Some(num_threads.clamp(1, crate::MAX_THREADS));
        }
        match (attributes.defocus_x, attributes.pixel_translations.is_some()) {
            (Some(defocus_x), false) => {
                let pixel_translations = geometry::pixel_translations(
                    translations.view(),
                    basis_vectors.view(),
                    *require(&attributes.distance, Attribute::Distance)?,
                    attributes.defocus_y.unwrap_or(defocus_x),
                    defocus_x,
                )?;
                attributes.pixel_translations = Some(pixel_translations.into_shared());
            }
            (Some(_), true) => {
                let pixel_translations = require(
                    &attributes.pixel_translations,
                    Attribute::PixelTranslations,
                )?;
                check(
                    Attribute::PixelTranslations,
                    pixel_translations.dim() == (n_frames, 2),
                )?;
            }
            _ => (),
        }
        Ok(Self {
            attributes,
            identity: Identity::new(),
        })
    }
}

impl ExperimentData {
    /// Builds a container from an attribute map, resolving the optional attributes
    pub fn new(attributes: Attributes) -> Result<Self> {
        let this = Self::build(attributes)?;
        log::debug!(
            "data container #{}: {:?} frames",
            this.identity.serial(),
            this.attributes.data.as_ref().map(|data| data.dim())
        );
        Ok(this)
    }
    /// `true` if the defocus distances are defined
    pub fn is_defocus(&self) -> bool {
        self.attributes.defocus_x.is_some()
    }
    /// `true` if both the phase and the pixel aberrations are defined
    pub fn is_phase(&self) -> bool {
        self.attributes.pixel_aberrations.is_some() && self.attributes.phase.is_some()
    }
    pub fn protocol(&self) -> Result<&Arc<Protocol>> {
        require(&self.attributes.protocol, Attribute::Protocol)
    }
    pub fn num_threads(&self) -> usize {
        self.attributes.num_threads.unwrap_or(1)
    }
    pub fn roi(&self) -> Result<Roi> {
        require(&self.attributes.roi, Attribute::Roi).copied()
    }
    /// Non-owning handle on this container
    pub fn handle(&self) -> Weak<Identity> {
        Arc::downgrade(&self.identity)
    }
    /// `true` if `handle` refers to this container
    pub fn owns(&self, handle: &Weak<Identity>) -> bool {
        Weak::ptr_eq(handle, &Arc::downgrade(&self.identity))
    }
    pub(crate) fn require_defocus(&self) -> Result<(f64, f64)> {
        match (self.attributes.defocus_y, self.attributes.defocus_x) {
            (Some(defocus_y), Some(defocus_x)) => Ok((defocus_y, defocus_x)),
            (None, Some(defocus_x)) => Ok((defocus_x, defocus_x)),
            _ => Err(Error::precondition(
                "`defocus_x` is not defined inside the container",
            )),
        }
    }
    /// Writes every attribute known to the protocol
    pub fn write<W: crate::loader::Writer>(&self, writer: &mut W) -> Result<()> {
        let protocol = self.protocol()?;
        for attr in protocol.attributes() {
            if let Some(value) = self.attributes.value(attr) {
                log::debug!("writing `{}`", attr);
                writer.write(attr, &value)?;
            }
        }
        Ok(())
    }
}
