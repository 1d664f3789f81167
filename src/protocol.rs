//! Attribute metadata
//!
//! For every container attribute the protocol records its data type, whether it is a
//! detector-shaped dataset ("is data", sharing the row and column extent of the
//! measured frames) and the list of paths it is stored at.

use crate::data::Attribute;
use serde::Deserialize;
use std::{collections::BTreeMap, fs::File, io::Read, path::Path, str::FromStr};
use strum_macros::{Display, EnumString};

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to open the protocol file")]
    Io(#[from] std::io::Error),
    #[error("Failed to deserialize the CSV file")]
    Csv(#[from] csv::Error),
    #[error("unknown attribute `{0}`")]
    UnknownAttribute(String),
}
type Result<T> = std::result::Result<T, ProtocolError>;

/// Numeric kind of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float,
    Int,
    Uint,
    Bool,
}

/// Metadata of a single attribute
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSpec {
    pub dtype: DType,
    pub is_data: bool,
    pub paths: Vec<String>,
}
impl AttributeSpec {
    pub fn new(dtype: DType, is_data: bool, paths: &[&str]) -> Self {
        Self {
            dtype,
            is_data,
            paths: paths.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct Entry {
    attribute: String,
    dtype: DType,
    is_data: bool,
    #[serde(default)]
    paths: String,
}

/// Attributes metadata table
#[derive(Debug, Clone, Default)]
pub struct Protocol {
    specs: BTreeMap<Attribute, AttributeSpec>,
}
impl Protocol {
    /// Returns an empty protocol
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds or replaces the metadata of `attr`
    pub fn attribute(self, attr: Attribute, spec: AttributeSpec) -> Self {
        let mut specs = self.specs;
        specs.insert(attr, spec);
        Self { specs }
    }
    /// Loads a protocol from a CSV file
    ///
    /// The file has the columns `attribute,dtype,is_data,paths`, multiple paths are
    /// separated by `;`
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        log::info!("Loading protocol {:?}...", path.as_ref());
        Self::from_reader(file)
    }
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut this = Self::new();
        for result in rdr.deserialize() {
            let entry: Entry = result?;
            let attr = Attribute::from_str(entry.attribute.trim())
                .map_err(|_| ProtocolError::UnknownAttribute(entry.attribute.clone()))?;
            let paths = entry
                .paths
                .split(';')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
            this.specs.insert(
                attr,
                AttributeSpec {
                    dtype: entry.dtype,
                    is_data: entry.is_data,
                    paths,
                },
            );
        }
        Ok(this)
    }
    /// The built-in protocol for CXI-like layouts
    pub fn cxi() -> Self {
        use Attribute::*;
        use DType::*;
        Self::new()
            .attribute(
                BasisVectors,
                AttributeSpec::new(
                    Float,
                    false,
                    &[
                        "/speckle_tracking/basis_vectors",
                        "/entry_1/instrument_1/detector_1/basis_vectors",
                    ],
                ),
            )
            .attribute(
                Data,
                AttributeSpec::new(Uint, true, &["/entry_1/data_1/data"]),
            )
            .attribute(
                DefocusX,
                AttributeSpec::new(Float, false, &["/speckle_tracking/defocus_x"]),
            )
            .attribute(
                DefocusY,
                AttributeSpec::new(Float, false, &["/speckle_tracking/defocus_y"]),
            )
            .attribute(
                Distance,
                AttributeSpec::new(Float, false, &["/entry_1/instrument_1/detector_1/distance"]),
            )
            .attribute(
                ErrorFrame,
                AttributeSpec::new(Float, true, &["/speckle_tracking/error_frame"]),
            )
            .attribute(
                Flatfields,
                AttributeSpec::new(Float, true, &["/speckle_tracking/flatfields"]),
            )
            .attribute(
                GoodFrames,
                AttributeSpec::new(
                    Uint,
                    false,
                    &["/speckle_tracking/good_frames", "/frame_selector/good_frames"],
                ),
            )
            .attribute(
                Mask,
                AttributeSpec::new(
                    Bool,
                    true,
                    &[
                        "/speckle_tracking/mask",
                        "/mask_maker/mask",
                        "/entry_1/instrument_1/detector_1/mask",
                    ],
                ),
            )
            .attribute(
                Phase,
                AttributeSpec::new(Float, true, &["/speckle_tracking/phase"]),
            )
            .attribute(
                PixelAberrations,
                AttributeSpec::new(Float, true, &["/speckle_tracking/pixel_aberrations"]),
            )
            .attribute(
                PixelMap,
                AttributeSpec::new(Float, true, &["/speckle_tracking/pixel_map"]),
            )
            .attribute(
                PixelTranslations,
                AttributeSpec::new(Float, false, &["/speckle_tracking/pixel_translations"]),
            )
            .attribute(
                ReferenceImage,
                AttributeSpec::new(Float, false, &["/speckle_tracking/reference_image"]),
            )
            .attribute(
                Roi,
                AttributeSpec::new(Uint, false, &["/speckle_tracking/roi"]),
            )
            .attribute(
                Sigma,
                AttributeSpec::new(Float, false, &["/speckle_tracking/sigma"]),
            )
            .attribute(
                Translations,
                AttributeSpec::new(Float, false, &["/entry_1/sample_1/geometry/translations"]),
            )
            .attribute(
                Wavelength,
                AttributeSpec::new(
                    Float,
                    false,
                    &["/entry_1/instrument_1/source_1/wavelength"],
                ),
            )
            .attribute(
                Whitefield,
                AttributeSpec::new(Float, true, &["/speckle_tracking/whitefield"]),
            )
            .attribute(
                XPixelSize,
                AttributeSpec::new(
                    Float,
                    false,
                    &["/entry_1/instrument_1/detector_1/x_pixel_size"],
                ),
            )
            .attribute(
                YPixelSize,
                AttributeSpec::new(
                    Float,
                    false,
                    &["/entry_1/instrument_1/detector_1/y_pixel_size"],
                ),
            )
    }
    pub fn contains(&self, attr: Attribute) -> bool {
        self.specs.contains_key(&attr)
    }
    /// Iterator over the attributes known to the protocol
    pub fn attributes(&self) -> impl Iterator<Item = Attribute> + '_ {
        self.specs.keys().copied()
    }
    pub fn get_dtype(&self, attr: Attribute) -> Option<DType> {
        self.specs.get(&attr).map(|spec| spec.dtype)
    }
    /// Returns `false` for attributes unknown to the protocol
    pub fn get_is_data(&self, attr: Attribute) -> bool {
        self.specs.get(&attr).is_some_and(|spec| spec.is_data)
    }
    pub fn get_default_path(&self, attr: Attribute) -> &[String] {
        self.specs
            .get(&attr)
            .map(|spec| spec.paths.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cxi_protocol() {
        let protocol = Protocol::cxi();
        assert!(protocol.get_is_data(Attribute::Data));
        assert!(protocol.get_is_data(Attribute::PixelMap));
        assert!(!protocol.get_is_data(Attribute::ReferenceImage));
        assert!(!protocol.get_is_data(Attribute::NumThreads));
        assert_eq!(protocol.get_dtype(Attribute::Mask), Some(DType::Bool));
        assert_eq!(
            protocol.get_default_path(Attribute::Data),
            &["/entry_1/data_1/data".to_string()]
        );
        assert!(protocol.get_default_path(Attribute::NumThreads).is_empty());
    }

    #[test]
    fn csv_protocol() {
        let csv = "attribute,dtype,is_data,paths
data,uint,true,/entry_1/data_1/data
whitefield,float,true,/speckle_tracking/whitefield;/process/whitefield
distance,float,false,
";
        let protocol = Protocol::from_reader(csv.as_bytes()).unwrap();
        assert!(protocol.get_is_data(Attribute::Whitefield));
        assert_eq!(protocol.get_default_path(Attribute::Whitefield).len(), 2);
        assert_eq!(protocol.get_dtype(Attribute::Distance), Some(DType::Float));
        assert!(protocol.get_default_path(Attribute::Distance).is_empty());
    }

    #[test]
    fn csv_unknown_attribute() {
        let csv = "attribute,dtype,is_data,paths\nfoo,float,false,/foo\n";
        assert!(matches!(
            Protocol::from_reader(csv.as_bytes()),
            Err(ProtocolError::UnknownAttribute(name)) if name == "foo"
        ));
    }
}
