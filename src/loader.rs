//! NumPy archive loader and writer
//!
//! Attributes are stored in `.npz` archives under the protocol paths, the leading `/`
//! removed (`/entry_1/data_1/data` is the `entry_1/data_1/data.npy` entry). The frames
//! of a scan split over several archives are stacked along the first axis, the other
//! attributes are read from the master archive.

use crate::{
    data::{Attribute, Attributes, Value},
    protocol::{DType, Protocol},
    ExperimentData,
};
use ndarray::{concatenate, ArrayD, Axis, IxDyn, ShapeBuilder};
use npyz::{
    npz::{NpzArchive, NpzWriter as Archive},
    WriterBuilder,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{BufWriter, Read},
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

#[derive(thiserror::Error, Debug)]
pub enum LoaderError {
    #[error("Failed to read or write the archive")]
    Io(#[from] std::io::Error),
    #[error("dataset `{0}` not found")]
    MissingDataset(String),
    #[error("data type mismatch: {0}")]
    DType(String),
    #[error("frame index {0} is out of bounds ({1} frames)")]
    FrameIndex(usize, usize),
    #[error("array shape mismatch")]
    Shape(#[from] ndarray::ShapeError),
}
type Result<T> = std::result::Result<T, LoaderError>;

/// Reads container attributes from files
pub trait Loader {
    /// Loads the attributes of a scan
    ///
    /// The non-data attributes come from `master_file` (the first file by default),
    /// `frame_indices` selects the frames and `overrides` take precedence over the
    /// values found in the files.
    fn load<P: AsRef<Path>>(
        &self,
        files: &[P],
        master_file: Option<&Path>,
        frame_indices: Option<&[usize]>,
        overrides: BTreeMap<Attribute, Value>,
    ) -> crate::Result<Attributes>;
}

/// Writes container attributes
pub trait Writer {
    fn write(&mut self, attr: Attribute, value: &Value) -> crate::Result<()>;
}

/// Converts `value` to the numeric kind `dtype`
pub fn convert(attr: Attribute, value: Value, dtype: DType) -> Result<Value> {
    let is_scalar = matches!(value, Value::Float(_) | Value::Int(_));
    let converted = match (dtype, is_scalar) {
        (DType::Float, true) => value.into_float().map(Value::Float),
        (DType::Float, false) => value.into_floats().map(Value::Floats),
        (DType::Int | DType::Uint | DType::Bool, true) => value.into_int().map(Value::Int),
        (DType::Int | DType::Uint, false) => value.into_ints().map(Value::Ints),
        (DType::Bool, false) => value.into_bools().map(Value::Bools),
    };
    converted.ok_or_else(|| LoaderError::DType(format!("`{}` can't be converted to {}", attr, dtype)))
}

fn array_from<T>(shape: Vec<usize>, fortran: bool, values: Vec<T>) -> Result<ArrayD<T>> {
    Ok(if fortran {
        ArrayD::from_shape_vec(IxDyn(&shape).f(), values)?
    } else {
        ArrayD::from_shape_vec(IxDyn(&shape), values)?
    })
}

/// Reads an array of the archive into a dynamically typed value, 0-d arrays become
/// scalars
fn read_npy<R: Read>(name: &str, npy: npyz::NpyFile<R>) -> Result<Value> {
    let shape: Vec<usize> = npy.shape().iter().map(|&n| n as usize).collect();
    let fortran = matches!(npy.order(), npyz::Order::Fortran);
    let descr = match npy.dtype() {
        npyz::DType::Plain(ts) => ts.to_string(),
        dtype => {
            return Err(LoaderError::DType(format!(
                "`{}` has an unsupported type {:?}",
                name, dtype
            )))
        }
    };
    let kind = descr.get(1..).unwrap_or_default();
    let value = match kind {
        "f8" => Value::Floats(array_from(shape, fortran, npy.into_vec::<f64>()?)?),
        "f4" => {
            let values = npy.into_vec::<f32>()?.into_iter().map(f64::from).collect();
            Value::Floats(array_from(shape, fortran, values)?)
        }
        "i8" => Value::Ints(array_from(shape, fortran, npy.into_vec::<i64>()?)?),
        "i4" => {
            let values = npy.into_vec::<i32>()?.into_iter().map(i64::from).collect();
            Value::Ints(array_from(shape, fortran, values)?)
        }
        "i2" => {
            let values = npy.into_vec::<i16>()?.into_iter().map(i64::from).collect();
            Value::Ints(array_from(shape, fortran, values)?)
        }
        "i1" => {
            let values = npy.into_vec::<i8>()?.into_iter().map(i64::from).collect();
            Value::Ints(array_from(shape, fortran, values)?)
        }
        "u8" => {
            let values = npy.into_vec::<u64>()?.into_iter().map(|x| x as i64).collect();
            Value::Ints(array_from(shape, fortran, values)?)
        }
        "u4" => {
            let values = npy.into_vec::<u32>()?.into_iter().map(i64::from).collect();
            Value::Ints(array_from(shape, fortran, values)?)
        }
        "u2" => {
            let values = npy.into_vec::<u16>()?.into_iter().map(i64::from).collect();
            Value::Ints(array_from(shape, fortran, values)?)
        }
        "u1" => {
            let values = npy.into_vec::<u8>()?.into_iter().map(i64::from).collect();
            Value::Ints(array_from(shape, fortran, values)?)
        }
        "b1" => Value::Bools(array_from(shape, fortran, npy.into_vec::<bool>()?)?),
        _ => {
            return Err(LoaderError::DType(format!(
                "`{}` has an unsupported type {}",
                name, descr
            )))
        }
    };
    Ok(match value {
        Value::Floats(a) if a.ndim() == 0 => Value::Float(a.iter().copied().next().unwrap_or_default()),
        Value::Ints(a) if a.ndim() == 0 => Value::Int(a.iter().copied().next().unwrap_or_default()),
        value => value,
    })
}

fn ndim(value: &Value) -> usize {
    match value {
        Value::Float(_) | Value::Int(_) => 0,
        Value::Floats(a) => a.ndim(),
        Value::Ints(a) => a.ndim(),
        Value::Bools(a) => a.ndim(),
    }
}

/// Stacks the per file arrays along the frame axis
fn stack(values: Vec<Value>) -> Result<Value> {
    fn cat<A: Clone>(arrays: &[ArrayD<A>]) -> Result<ArrayD<A>> {
        let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
        Ok(concatenate(Axis(0), &views)?)
    }
    let mut floats = vec![];
    let mut ints = vec![];
    let mut bools = vec![];
    for value in values {
        match value {
            Value::Floats(a) => floats.push(a),
            Value::Ints(a) => ints.push(a),
            Value::Bools(a) => bools.push(a),
            scalar => return Ok(scalar),
        }
    }
    match (floats.is_empty(), ints.is_empty(), bools.is_empty()) {
        (false, true, true) => Ok(Value::Floats(cat(&floats)?)),
        (true, false, true) => Ok(Value::Ints(cat(&ints)?)),
        (true, true, false) => Ok(Value::Bools(cat(&bools)?)),
        _ => Err(LoaderError::DType(
            "the files hold different data types".to_string(),
        )),
    }
}

fn select_frames(value: Value, frame_indices: &[usize]) -> Result<Value> {
    fn select<A: Clone>(a: ArrayD<A>, indices: &[usize]) -> Result<ArrayD<A>> {
        let n = a.len_of(Axis(0));
        match indices.iter().find(|&&i| i >= n) {
            Some(&i) => Err(LoaderError::FrameIndex(i, n)),
            None => Ok(a.select(Axis(0), indices)),
        }
    }
    Ok(match value {
        Value::Floats(a) if a.ndim() > 0 => Value::Floats(select(a, frame_indices)?),
        Value::Ints(a) if a.ndim() > 0 => Value::Ints(select(a, frame_indices)?),
        Value::Bools(a) if a.ndim() > 0 => Value::Bools(select(a, frame_indices)?),
        value => value,
    })
}

/// `.npz` archives loader
#[derive(Debug, Clone)]
pub struct NpzLoader {
    protocol: Arc<Protocol>,
    load_paths: BTreeMap<Attribute, Vec<String>>,
    excluded: BTreeSet<Attribute>,
}
impl Default for NpzLoader {
    fn default() -> Self {
        Self {
            protocol: Arc::new(Protocol::cxi()),
            load_paths: BTreeMap::new(),
            excluded: BTreeSet::new(),
        }
    }
}
impl NpzLoader {
    pub fn protocol(self, protocol: Protocol) -> Self {
        Self {
            protocol: Arc::new(protocol),
            ..self
        }
    }
    /// Adds a path searched before the protocol ones
    pub fn load_path<S: Into<String>>(self, attr: Attribute, path: S) -> Self {
        let mut load_paths = self.load_paths;
        load_paths.entry(attr).or_default().push(path.into());
        Self { load_paths, ..self }
    }
    /// Skips `attr` when loading
    pub fn exclude(self, attr: Attribute) -> Self {
        let mut excluded = self.excluded;
        excluded.insert(attr);
        Self { excluded, ..self }
    }
    fn paths(&self, attr: Attribute) -> impl Iterator<Item = &str> {
        self.load_paths
            .get(&attr)
            .into_iter()
            .flatten()
            .chain(self.protocol.get_default_path(attr))
            .map(|path| path.trim_start_matches('/'))
    }
    /// Reads `attr` from `file` at the first matching path
    pub fn read<P: AsRef<Path>>(&self, file: P, attr: Attribute) -> Result<Option<Value>> {
        let mut npz = NpzArchive::open(file.as_ref())?;
        for path in self.paths(attr) {
            if let Some(npy) = npz.by_name(path)? {
                log::debug!("`{}` found at {}", attr, path);
                return Ok(Some(read_npy(path, npy)?));
            }
        }
        Ok(None)
    }
    /// Loads the container of a scan
    pub fn load_data<P: AsRef<Path>>(&self, files: &[P]) -> crate::Result<ExperimentData> {
        ExperimentData::new(self.load(files, None, None, BTreeMap::new())?)
    }
}

impl Loader for NpzLoader {
    fn load<P: AsRef<Path>>(
        &self,
        files: &[P],
        master_file: Option<&Path>,
        frame_indices: Option<&[usize]>,
        overrides: BTreeMap<Attribute, Value>,
    ) -> crate::Result<Attributes> {
        let files: Vec<PathBuf> = files.iter().map(|f| f.as_ref().to_path_buf()).collect();
        let master = match (master_file, files.first()) {
            (Some(master), _) => master.to_path_buf(),
            (None, Some(first)) => first.clone(),
            (None, None) => return Err(crate::Error::NoDataFound("no files to load".into())),
        };
        log::info!("Loading {} file(s), master {:?}...", files.len(), master);
        let now = Instant::now();
        let mut attributes = Attributes {
            protocol: Some(self.protocol.clone()),
            ..Default::default()
        };
        let mut overrides = overrides;
        for attr in self.protocol.attributes() {
            if self.excluded.contains(&attr) {
                continue;
            }
            let dtype = self.protocol.get_dtype(attr).unwrap_or(DType::Float);
            let value = match overrides.remove(&attr) {
                Some(value) => Some(value),
                None if attr.is_frame_indexed() && self.protocol.get_is_data(attr) => {
                    let mut values = vec![];
                    for file in &files {
                        if let Some(value) = self.read(file, attr)? {
                            values.push(value);
                        }
                    }
                    let value = if values.len() > 1 && values.iter().all(|v| ndim(v) == 3) {
                        Some(stack(values)?)
                    } else {
                        values.into_iter().next()
                    };
                    // 2D data attributes are per pixel
                    match (value, frame_indices) {
                        (Some(value), Some(indices)) if ndim(&value) == 3 => {
                            Some(select_frames(value, indices)?)
                        }
                        (value, _) => value,
                    }
                }
                None => match (self.read(&master, attr)?, frame_indices) {
                    (Some(value), Some(indices)) if attr.is_frame_indexed() => {
                        Some(select_frames(value, indices)?)
                    }
                    (value, _) => value,
                },
            };
            match value {
                Some(value) => attributes.set(attr, convert(attr, value, dtype)?)?,
                None if attr == Attribute::Data => {
                    let paths = self.paths(attr).collect::<Vec<_>>().join(", ");
                    return Err(LoaderError::MissingDataset(paths).into());
                }
                None => log::debug!("`{}` not found", attr),
            }
        }
        for (attr, value) in overrides {
            let value = match self.protocol.get_dtype(attr) {
                Some(dtype) => convert(attr, value, dtype)?,
                None => value,
            };
            attributes.set(attr, value)?;
        }
        log::info!("... loaded in {}ms", now.elapsed().as_millis());
        Ok(attributes)
    }
}

/// `.npz` archive writer
pub struct NpzWriter {
    archive: Archive<BufWriter<File>>,
    protocol: Arc<Protocol>,
}
impl NpzWriter {
    pub fn create<P: AsRef<Path>>(path: P, protocol: Arc<Protocol>) -> crate::Result<Self> {
        log::info!("Writing {:?}...", path.as_ref());
        let archive = Archive::create(path.as_ref()).map_err(LoaderError::from)?;
        Ok(Self { archive, protocol })
    }
    fn entry(&self, attr: Attribute) -> String {
        self.protocol
            .get_default_path(attr)
            .first()
            .map(|path| path.trim_start_matches('/').to_string())
            .unwrap_or_else(|| attr.to_string())
    }
    fn write_entry(&mut self, name: &str, value: Value) -> Result<()> {
        match value {
            Value::Float(x) => {
                let mut writer = self
                    .archive
                    .array(name, Default::default())?
                    .default_dtype()
                    .shape(&[])
                    .begin_nd()?;
                writer.push(&x)?;
                writer.finish()?;
            }
            Value::Int(x) => {
                let mut writer = self
                    .archive
                    .array(name, Default::default())?
                    .default_dtype()
                    .shape(&[])
                    .begin_nd()?;
                writer.push(&x)?;
                writer.finish()?;
            }
            Value::Floats(a) => {
                let shape: Vec<u64> = a.shape().iter().map(|&n| n as u64).collect();
                let mut writer = self
                    .archive
                    .array(name, Default::default())?
                    .default_dtype()
                    .shape(&shape)
                    .begin_nd()?;
                writer.extend(a.iter().copied())?;
                writer.finish()?;
            }
            Value::Ints(a) => {
                let shape: Vec<u64> = a.shape().iter().map(|&n| n as u64).collect();
                let mut writer = self
                    .archive
                    .array(name, Default::default())?
                    .default_dtype()
                    .shape(&shape)
                    .begin_nd()?;
                writer.extend(a.iter().copied())?;
                writer.finish()?;
            }
            Value::Bools(a) => {
                let shape: Vec<u64> = a.shape().iter().map(|&n| n as u64).collect();
                let mut writer = self
                    .archive
                    .array(name, Default::default())?
                    .default_dtype()
                    .shape(&shape)
                    .begin_nd()?;
                writer.extend(a.iter().copied())?;
                writer.finish()?;
            }
        }
        Ok(())
    }
}
impl Writer for NpzWriter {
    fn write(&mut self, attr: Attribute, value: &Value) -> crate::Result<()> {
        let dtype = self.protocol.get_dtype(attr).unwrap_or(DType::Float);
        let value = convert(attr, value.clone(), dtype)?;
        let name = self.entry(attr);
        self.write_entry(&name, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn conversions() {
        let value = Value::Floats(arr1(&[1.4, 0., 2.6]).into_dyn());
        assert_eq!(
            convert(Attribute::Roi, value.clone(), DType::Uint).unwrap(),
            Value::Ints(arr1(&[1, 0, 3]).into_dyn())
        );
        assert_eq!(
            convert(Attribute::Mask, value, DType::Bool).unwrap(),
            Value::Bools(arr1(&[true, false, true]).into_dyn())
        );
        assert_eq!(
            convert(Attribute::Distance, Value::Int(2), DType::Float).unwrap(),
            Value::Float(2.)
        );
    }

    #[test]
    fn frames_stacking_and_selection() {
        let a = Value::Floats(arr2(&[[1., 2.], [3., 4.]]).into_dyn());
        let b = Value::Floats(arr2(&[[5., 6.]]).into_dyn());
        let stacked = stack(vec![a, b]).unwrap();
        let selected = select_frames(stacked, &[2, 0]).unwrap();
        assert_eq!(selected, Value::Floats(arr2(&[[5., 6.], [1., 2.]]).into_dyn()));
        assert!(matches!(
            select_frames(Value::Ints(arr1(&[1, 2]).into_dyn()), &[2]),
            Err(LoaderError::FrameIndex(2, 2))
        ));
    }

    #[test]
    fn no_files() {
        let files: [&str; 0] = [];
        assert!(matches!(
            NpzLoader::default().load(&files, None, None, BTreeMap::new()),
            Err(crate::Error::NoDataFound(_))
        ));
    }
}
