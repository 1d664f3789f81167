//! Speckle tracking working object
//!
//! [SpeckleTracking] is derived from an [ExperimentData] container with
//! [ExperimentData::get_st]. It holds the masked frames cropped to the ROI, the pixel
//! map, the sample translations in pixels and the reference image, and keeps a
//! non-owning handle on the container it comes from.
//!
//! The reference image is sampled on a grid of `ds_y x ds_x` pixels whose origin is
//! `n0 = max(di) - min(u_y)`, `m0 = max(dj) - min(u_x)`. A measured pixel `(i, j)` of
//! frame `n` lands on the grid at `(u_y[i, j] - di[n] + n0, u_x[i, j] - dj[n] + m0)`.

use crate::{
    data::{Attribute, Identity},
    numeric,
    record::{Field, Initializer, Record},
    Error, ExperimentData, Result,
};
use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use std::sync::Weak;
use strum_macros::{Display, EnumIter, EnumString};

/// Number of reference grid rows accumulated by a single worker
const ROWS_BAND: usize = 16;
/// Largest number of reference grid nodes along an axis
const MAX_GRID_NODES: f64 = (1u64 << 31) as f64;

/// Reference image update algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, EnumIter)]
pub enum RefMethod {
    /// Nadaraya-Watson kernel regression
    #[default]
    #[strum(serialize = "KerReg", serialize = "kernel_regression")]
    KernelRegression,
    /// Local weighted linear regression
    #[strum(serialize = "LOWESS", serialize = "local_weighted_regression")]
    LocalWeightedRegression,
}

/// Working object interface used by the container
pub trait Tracking {
    /// Handle on the container the object was derived from
    fn parent(&self) -> Weak<Identity>;
    fn pixel_map(&self) -> Option<ArrayView3<'_, f64>>;
    fn di_pix(&self) -> Option<ArrayView1<'_, f64>>;
    fn dj_pix(&self) -> Option<ArrayView1<'_, f64>>;
    fn reference_image(&self) -> Option<ArrayView2<'_, f64>>;
    fn sigma(&self) -> Option<f64>;
    /// Multiplies the vertical and horizontal translations in place
    fn scale_translations(&mut self, scale_y: f64, scale_x: f64);
    /// Recomputes the reference image in place with a kernel bandwidth of `hval` pixels
    fn update_reference(&mut self, hval: f64, method: RefMethod) -> Result<()>;
}

/// Settings of [ExperimentData::get_st]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingOptions {
    pub ds_y: f64,
    pub ds_x: f64,
    pub aberrations: bool,
    pub ff_correction: bool,
}
impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            ds_y: 1f64,
            ds_x: 1f64,
            aberrations: false,
            ff_correction: false,
        }
    }
}
impl TrackingOptions {
    /// Reference image sampling intervals in pixels
    pub fn sampling(self, ds_y: f64, ds_x: f64) -> Self {
        Self { ds_y, ds_x, ..self }
    }
    /// Adds the pixel aberrations to the pixel map
    pub fn aberrations(self) -> Self {
        Self {
            aberrations: true,
            ..self
        }
    }
    /// Applies the dynamic flatfield correction to the frames
    pub fn ff_correction(self) -> Self {
        Self {
            ff_correction: true,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TrackingAttribute {
    Data,
    DiPix,
    DjPix,
    DsX,
    DsY,
    NumThreads,
    Parent,
    PixelMap,
    ReferenceImage,
    Sigma,
    Whitefield,
}

#[derive(Debug, Clone, Default)]
pub struct TrackingAttributes {
    pub data: Option<Array3<f64>>,
    pub di_pix: Option<Array1<f64>>,
    pub dj_pix: Option<Array1<f64>>,
    pub ds_x: Option<f64>,
    pub ds_y: Option<f64>,
    pub num_threads: Option<usize>,
    pub parent: Option<Weak<Identity>>,
    pub pixel_map: Option<Array3<f64>>,
    pub reference_image: Option<Array2<f64>>,
    pub sigma: Option<f64>,
    pub whitefield: Option<Array2<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackingPatch {
    pub data: Field<Array3<f64>>,
    pub di_pix: Field<Array1<f64>>,
    pub dj_pix: Field<Array1<f64>>,
    pub ds_x: Field<f64>,
    pub ds_y: Field<f64>,
    pub num_threads: Field<usize>,
    pub parent: Field<Weak<Identity>>,
    pub pixel_map: Field<Array3<f64>>,
    pub reference_image: Field<Array2<f64>>,
    pub sigma: Field<f64>,
    pub whitefield: Field<Array2<f64>>,
}

/// Speckle tracking working object
#[derive(Debug, Clone)]
pub struct SpeckleTracking {
    attributes: TrackingAttributes,
}

fn missing(attr: TrackingAttribute) -> Error {
    Error::MissingAttribute(attr.to_string())
}

impl Record for SpeckleTracking {
    type Name = TrackingAttribute;
    type Attributes = TrackingAttributes;
    type Patch = TrackingPatch;

    const REQUIRED: &'static [TrackingAttribute] = &[
        TrackingAttribute::Data,
        TrackingAttribute::DiPix,
        TrackingAttribute::DjPix,
        TrackingAttribute::Parent,
        TrackingAttribute::PixelMap,
        TrackingAttribute::Whitefield,
    ];

    fn initializers() -> Vec<Initializer<TrackingAttribute, TrackingAttributes>> {
        vec![
            Initializer::new(TrackingAttribute::NumThreads, |a| {
                let n = std::thread::available_parallelism().map_or(1, |n| n.get());
                a.num_threads = Some(n.clamp(1, crate::MAX_THREADS));
                Ok(())
            }),
            Initializer::new(TrackingAttribute::DsY, |a| {
                a.ds_y = Some(1f64);
                Ok(())
            }),
            Initializer::new(TrackingAttribute::DsX, |a| {
                a.ds_x = Some(1f64);
                Ok(())
            }),
            Initializer::new(TrackingAttribute::Sigma, |a| {
                a.sigma = a.data.as_ref().map(|data| numeric::std(data.iter()));
                Ok(())
            }),
        ]
    }
    fn is_present(a: &TrackingAttributes, name: TrackingAttribute) -> bool {
        use TrackingAttribute::*;
        match name {
            Data => a.data.is_some(),
            DiPix => a.di_pix.is_some(),
            DjPix => a.dj_pix.is_some(),
            DsX => a.ds_x.is_some(),
            DsY => a.ds_y.is_some(),
            NumThreads => a.num_threads.is_some(),
            Parent => a.parent.is_some(),
            PixelMap => a.pixel_map.is_some(),
            ReferenceImage => a.reference_image.is_some(),
            Sigma => a.sigma.is_some(),
            Whitefield => a.whitefield.is_some(),
        }
    }
    fn merge(a: &mut TrackingAttributes, patch: TrackingPatch) {
        patch.data.merge(&mut a.data);
        patch.di_pix.merge(&mut a.di_pix);
        patch.dj_pix.merge(&mut a.dj_pix);
        patch.ds_x.merge(&mut a.ds_x);
        patch.ds_y.merge(&mut a.ds_y);
        patch.num_threads.merge(&mut a.num_threads);
        patch.parent.merge(&mut a.parent);
        patch.pixel_map.merge(&mut a.pixel_map);
        patch.reference_image.merge(&mut a.reference_image);
        patch.sigma.merge(&mut a.sigma);
        patch.whitefield.merge(&mut a.whitefield);
    }
    fn attributes(&self) -> &TrackingAttributes {
        &self.attributes
    }
    fn attributes_mut(&mut self) -> &mut TrackingAttributes {
        &mut self.attributes
    }
    fn assemble(attributes: TrackingAttributes) -> Result<Self> {
        let data = attributes
            .data
            .as_ref()
            .ok_or_else(|| missing(TrackingAttribute::Data))?;
        let (n, rows, cols) = data.dim();
        let shapes_match = attributes
            .whitefield
            .as_ref()
            .is_some_and(|wf| wf.dim() == (rows, cols))
            && attributes
                .pixel_map
                .as_ref()
                .is_some_and(|pm| pm.dim() == (2, rows, cols))
            && attributes.di_pix.as_ref().is_some_and(|d| d.len() == n)
            && attributes.dj_pix.as_ref().is_some_and(|d| d.len() == n);
        if !shapes_match {
            return Err(Error::invalid(format!(
                "the working object arrays don't match the frames shape {:?}",
                data.dim()
            )));
        }
        if attributes.ds_y.unwrap_or(1f64) <= 0f64 || attributes.ds_x.unwrap_or(1f64) <= 0f64 {
            return Err(Error::invalid("sampling intervals must be positive"));
        }
        Ok(Self { attributes })
    }
}

/// Reference image sampling grid
#[derive(Debug, Clone, Copy)]
struct Grid {
    n0: f64,
    m0: f64,
    ds_y: f64,
    ds_x: f64,
    shape: (usize, usize),
}
impl Grid {
    fn new(
        pixel_map: ArrayView3<f64>,
        di: ArrayView1<f64>,
        dj: ArrayView1<f64>,
        ds_y: f64,
        ds_x: f64,
    ) -> Result<Self> {
        let min = |a: ArrayView2<f64>| a.iter().copied().fold(f64::INFINITY, f64::min);
        let max = |a: ArrayView2<f64>| a.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let (pm_y, pm_x) = (pixel_map.index_axis(Axis(0), 0), pixel_map.index_axis(Axis(0), 1));
        let di_max = di.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let di_min = di.iter().copied().fold(f64::INFINITY, f64::min);
        let dj_max = dj.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let dj_min = dj.iter().copied().fold(f64::INFINITY, f64::min);
        let n0 = -min(pm_y) + di_max;
        let m0 = -min(pm_x) + dj_max;
        let extent = |span: f64, ds: f64| {
            let nodes = (span / ds).floor();
            if nodes.is_finite() && (0f64..MAX_GRID_NODES).contains(&nodes) {
                Ok(nodes as usize + 1)
            } else {
                Err(Error::invalid(format!(
                    "reference grid extent {} is out of range, check the translations",
                    nodes
                )))
            }
        };
        let rows = extent(max(pm_y) - di_min + n0, ds_y)?;
        let cols = extent(max(pm_x) - dj_min + m0, ds_x)?;
        Ok(Self {
            n0,
            m0,
            ds_y,
            ds_x,
            shape: (rows, cols),
        })
    }
    /// Grid nodes within `radius` pixels of `(y, x)`
    fn window(&self, y: f64, x: f64, radius: f64) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let range = |p: f64, ds: f64, len: usize| {
            let lo = ((p - radius) / ds).ceil().max(0f64) as usize;
            let hi = (((p + radius) / ds).floor() + 1f64).clamp(0f64, len as f64) as usize;
            lo.min(hi)..hi
        };
        (
            range(y, self.ds_y, self.shape.0),
            range(x, self.ds_x, self.shape.1),
        )
    }
}

/// Frames and geometry of a reference image update
struct Samples<'a> {
    data: ArrayView3<'a, f64>,
    whitefield: ArrayView2<'a, f64>,
    pixel_map: ArrayView3<'a, f64>,
    di: ArrayView1<'a, f64>,
    dj: ArrayView1<'a, f64>,
    grid: Grid,
    hval: f64,
}
impl<'a> Samples<'a> {
    /// Calls `f(k, l, dy, dx, intensity, whitefield)` for every grid node of the `band`
    /// rows in the kernel support of every valid pixel of every frame
    fn for_each<F>(&self, band: std::ops::Range<usize>, mut f: F)
    where
        F: FnMut(usize, usize, f64, f64, f64, f64),
    {
        let (n_frames, rows, cols) = self.data.dim();
        let radius = 4f64 * self.hval;
        for n in 0..n_frames {
            for i in 0..rows {
                for j in 0..cols {
                    let w = self.whitefield[[i, j]];
                    if w <= 0f64 {
                        continue;
                    }
                    let y = self.pixel_map[[0, i, j]] - self.di[n] + self.grid.n0;
                    let x = self.pixel_map[[1, i, j]] - self.dj[n] + self.grid.m0;
                    let (ks, ls) = self.grid.window(y, x, radius);
                    for k in ks.start.max(band.start)..ks.end.min(band.end) {
                        let dy = y - k as f64 * self.grid.ds_y;
                        for l in ls.clone() {
                            let dx = x - l as f64 * self.grid.ds_x;
                            f(k, l, dy, dx, self.data[[n, i, j]], w);
                        }
                    }
                }
            }
        }
    }
    fn kernel(&self, dy: f64, dx: f64) -> f64 {
        (-(dy * dy + dx * dx) / (2f64 * self.hval * self.hval)).exp()
    }
    /// Accumulates `depth` moments on every grid node
    ///
    /// The workers own disjoint bands of `band_rows` grid rows, so every node sums its
    /// contributions in frame then pixel order whatever the number of workers.
    fn accumulate<F>(&self, depth: usize, band_rows: usize, f: F) -> Result<Array3<f64>>
    where
        F: Fn(&mut Array3<f64>, usize, usize, f64, f64, f64, f64) + Sync,
    {
        let (rows, cols) = self.grid.shape;
        let band_rows = band_rows.max(1);
        let bands: Vec<std::ops::Range<usize>> = (0..rows)
            .step_by(band_rows)
            .map(|start| start..(start + band_rows).min(rows))
            .collect();
        let blocks: Vec<Array3<f64>> = bands
            .into_par_iter()
            .map(|band| {
                let mut acc = Array3::<f64>::zeros((band.len(), cols, depth));
                let start = band.start;
                self.for_each(band, |k, l, dy, dx, i, w| f(&mut acc, k - start, l, dy, dx, i, w));
                acc
            })
            .collect();
        let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
        Ok(ndarray::concatenate(Axis(0), &views)?)
    }

    fn kernel_regression(&self, band_rows: usize) -> Result<Array2<f64>> {
        let acc = self.accumulate(2, band_rows, |acc, k, l, dy, dx, i, w| {
            let kernel = self.kernel(dy, dx);
            acc[[k, l, 0]] += kernel * i * w;
            acc[[k, l, 1]] += kernel * w * w;
        })?;
        Ok(acc.map_axis(Axis(2), |a| if a[1] > 0f64 { a[0] / a[1] } else { 0f64 }))
    }

    fn local_weighted_regression(&self, band_rows: usize) -> Result<Array2<f64>> {
        let acc = self.accumulate(9, band_rows, |acc, k, l, dy, dx, i, w| {
            let weight = self.kernel(dy, dx) * w * w;
            let value = i / w;
            let mut node = acc.slice_mut(s![k, l, ..]);
            node[0] += weight;
            node[1] += weight * dy;
            node[2] += weight * dx;
            node[3] += weight * dy * dy;
            node[4] += weight * dy * dx;
            node[5] += weight * dx * dx;
            node[6] += weight * value;
            node[7] += weight * value * dy;
            node[8] += weight * value * dx;
        })?;
        Ok(acc.map_axis(Axis(2), |m| {
            if m[0] <= 0f64 {
                return 0f64;
            }
            let moments = nalgebra::Matrix3::new(
                m[0], m[1], m[2], //
                m[1], m[3], m[4], //
                m[2], m[4], m[5],
            );
            let rhs = nalgebra::Vector3::new(m[6], m[7], m[8]);
            moments
                .try_inverse()
                .map(|inv| (inv * rhs)[0])
                .filter(|v| v.is_finite())
                .unwrap_or(m[6] / m[0])
        }))
    }
}

impl SpeckleTracking {
    pub fn new(attributes: TrackingAttributes) -> Result<Self> {
        Self::build(attributes)
    }
    pub fn data(&self) -> Option<ArrayView3<'_, f64>> {
        self.attributes.data.as_ref().map(|a| a.view())
    }
    pub fn whitefield(&self) -> Option<ArrayView2<'_, f64>> {
        self.attributes.whitefield.as_ref().map(|a| a.view())
    }
    pub fn num_threads(&self) -> usize {
        self.attributes.num_threads.unwrap_or(1)
    }
    /// Shape of the reference image grid
    pub fn reference_shape(&self) -> Result<(usize, usize)> {
        Ok(self.samples(1f64)?.grid.shape)
    }
    fn samples(&self, hval: f64) -> Result<Samples<'_>> {
        let a = &self.attributes;
        let data = a.data.as_ref().ok_or_else(|| missing(TrackingAttribute::Data))?;
        let whitefield = a
            .whitefield
            .as_ref()
            .ok_or_else(|| missing(TrackingAttribute::Whitefield))?;
        let pixel_map = a
            .pixel_map
            .as_ref()
            .ok_or_else(|| missing(TrackingAttribute::PixelMap))?;
        let di = a.di_pix.as_ref().ok_or_else(|| missing(TrackingAttribute::DiPix))?;
        let dj = a.dj_pix.as_ref().ok_or_else(|| missing(TrackingAttribute::DjPix))?;
        let grid = Grid::new(
            pixel_map.view(),
            di.view(),
            dj.view(),
            a.ds_y.unwrap_or(1f64),
            a.ds_x.unwrap_or(1f64),
        )?;
        Ok(Samples {
            data: data.view(),
            whitefield: whitefield.view(),
            pixel_map: pixel_map.view(),
            di: di.view(),
            dj: dj.view(),
            grid,
            hval,
        })
    }
}

impl Tracking for SpeckleTracking {
    fn parent(&self) -> Weak<Identity> {
        self.attributes.parent.clone().unwrap_or_default()
    }
    fn pixel_map(&self) -> Option<ArrayView3<'_, f64>> {
        self.attributes.pixel_map.as_ref().map(|a| a.view())
    }
    fn di_pix(&self) -> Option<ArrayView1<'_, f64>> {
        self.attributes.di_pix.as_ref().map(|a| a.view())
    }
    fn dj_pix(&self) -> Option<ArrayView1<'_, f64>> {
        self.attributes.dj_pix.as_ref().map(|a| a.view())
    }
    fn reference_image(&self) -> Option<ArrayView2<'_, f64>> {
        self.attributes.reference_image.as_ref().map(|a| a.view())
    }
    fn sigma(&self) -> Option<f64> {
        self.attributes.sigma
    }
    fn scale_translations(&mut self, scale_y: f64, scale_x: f64) {
        if let Some(di) = self.attributes.di_pix.as_mut() {
            *di *= scale_y;
        }
        if let Some(dj) = self.attributes.dj_pix.as_mut() {
            *dj *= scale_x;
        }
    }
    fn update_reference(&mut self, hval: f64, method: RefMethod) -> Result<()> {
        if !(hval > 0f64) {
            return Err(Error::invalid(format!(
                "kernel bandwidth must be positive, found {}",
                hval
            )));
        }
        let samples = self.samples(hval)?;
        log::debug!(
            "updating the reference image ({:?}) with {}, hval = {}",
            samples.grid.shape,
            method,
            hval
        );
        let reference_image = numeric::with_pool(self.num_threads(), || match method {
            RefMethod::KernelRegression => samples.kernel_regression(ROWS_BAND),
            RefMethod::LocalWeightedRegression => samples.local_weighted_regression(ROWS_BAND),
        })??;
        self.update_in_place(TrackingPatch {
            reference_image: Field::Set(reference_image),
            ..Default::default()
        });
        Ok(())
    }
}

impl ExperimentData {
    /// Derives a speckle tracking working object from the container
    ///
    /// The frames are masked and cropped to the ROI. With `aberrations` the pixel
    /// aberrations are added to the pixel map and with `ff_correction` the frames are
    /// rescaled by `whitefield / flatfields` wherever the flatfields are positive.
    pub fn get_st(&self, options: TrackingOptions) -> Result<SpeckleTracking> {
        if !self.is_defocus() {
            return Err(Error::precondition(
                "`defocus_x` is not defined inside the container",
            ));
        }
        let missing = |attr: Attribute| Error::MissingAttribute(attr.to_string());
        let mask = self.get_mask().ok_or_else(|| missing(Attribute::Mask))?;
        let mut data = self.get_data().ok_or_else(|| missing(Attribute::Data))?;
        data.zip_mut_with(&mask, |x, &m| {
            if !m {
                *x = 0f64
            }
        });
        let mut pixel_map = self
            .get_pixel_map()
            .ok_or_else(|| missing(Attribute::PixelMap))?;
        if options.aberrations {
            let pixel_aberrations = self.get_pixel_aberrations().ok_or_else(|| {
                Error::precondition("`pixel_aberrations` is not defined inside the container")
            })?;
            pixel_map += &pixel_aberrations;
        }
        let whitefield = self
            .get_whitefield()
            .ok_or_else(|| missing(Attribute::Whitefield))?;
        if options.ff_correction {
            if let Some(flatfields) = self.get_flatfields() {
                for (mut frame, flatfield) in data.outer_iter_mut().zip(flatfields.outer_iter()) {
                    ndarray::Zip::from(&mut frame)
                        .and(&flatfield)
                        .and(&whitefield)
                        .for_each(|x, &ff, &wf| {
                            if ff > 0f64 {
                                *x = (*x * wf / ff).round_ties_even();
                            }
                        });
                }
            }
        }
        let pixel_translations = self
            .get_pixel_translations()
            .ok_or_else(|| missing(Attribute::PixelTranslations))?;
        let attributes = TrackingAttributes {
            data: Some(data),
            di_pix: Some(pixel_translations.column(0).to_owned()),
            dj_pix: Some(pixel_translations.column(1).to_owned()),
            ds_y: Some(options.ds_y),
            ds_x: Some(options.ds_x),
            num_threads: Some(self.num_threads()),
            parent: Some(self.handle()),
            pixel_map: Some(pixel_map),
            reference_image: None,
            sigma: self.attributes().sigma,
            whitefield: Some(whitefield),
        };
        SpeckleTracking::new(attributes)
    }
}
