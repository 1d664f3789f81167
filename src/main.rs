use itertools::Itertools;
use speckle_data::{
    data::Attribute,
    loader::{Loader, NpzLoader, NpzWriter},
    ExperimentData, Loss, MaskMethod, MaskUpdate, Protocol, Record, RefMethod, Tracking,
    TrackingOptions,
};
use strum::IntoEnumIterator;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "speckle-data",
    about = "Speckle tracking experiment data processing"
)]
struct Opt {
    /// Scan archives (`.npz`), the frames are stacked in the given order
    #[structopt(parse(from_os_str), required = true)]
    files: Vec<PathBuf>,
    /// Attributes protocol CSV file, CXI layout if omitted
    #[structopt(long, parse(from_os_str))]
    protocol: Option<PathBuf>,
    /// Archive holding the non-frame attributes, the first file if omitted
    #[structopt(long, parse(from_os_str))]
    master: Option<PathBuf>,
    /// Frames to load
    #[structopt(long)]
    frames: Option<Vec<usize>>,
    /// Number of worker threads
    #[structopt(short = "j", long)]
    num_threads: Option<usize>,
    /// Region of interest: y_min y_max x_min x_max
    #[structopt(long, number_of_values = 4)]
    roi: Option<Vec<usize>>,
    /// Detector binning ratio
    #[structopt(long)]
    bin: Option<usize>,
    /// Mirrors the frames along the given axis
    #[structopt(long)]
    mirror: Option<usize>,
    /// Good frames
    #[structopt(long)]
    good_frames: Option<Vec<usize>>,
    /// Bad pixels mask method: `no-bad`, `range-bad` or `perc-bad`
    #[structopt(long)]
    mask: Option<String>,
    /// Mask method lower bound
    #[structopt(long)]
    mask_min: Option<f64>,
    /// Mask method upper bound
    #[structopt(long)]
    mask_max: Option<f64>,
    /// Horizontal defocus distance [m]
    #[structopt(long)]
    defocus: Option<f64>,
    /// Vertical defocus distance [m], the horizontal one if omitted
    #[structopt(long)]
    defocus_y: Option<f64>,
    /// Updates the reference image and retrieves the phase
    #[structopt(long)]
    phase: bool,
    /// Reference image kernel bandwidth [pixel]
    #[structopt(long, default_value = "1.0")]
    hval: f64,
    /// Reference image update method: `KerReg` or `LOWESS`
    #[structopt(long, default_value = "KerReg")]
    ref_method: RefMethod,
    /// Fits the pixel aberrations with a polynomial, the zero angle pixel being `fit_origin`
    #[structopt(long, allow_hyphen_values = true)]
    fit_origin: Option<isize>,
    /// Fit axis
    #[structopt(long, default_value = "1")]
    fit_axis: usize,
    /// Fit polynomial order
    #[structopt(long, default_value = "3")]
    max_order: usize,
    /// Fit robust loss
    #[structopt(long, default_value = "cauchy")]
    loss: Loss,
    /// Writes the container to a `.npz` archive
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,
}

fn summary(data: &ExperimentData) {
    let attributes = data.attributes();
    let present = Attribute::iter()
        .filter(|&attr| attributes.is_present(attr))
        .join(", ");
    println!("ATTRIBUTES: {}", present);
    if let Some(data) = data.get_data() {
        println!(" . frames: {:?}", data.dim());
    }
    if let Ok(roi) = data.roi() {
        println!(" . roi: [{}]", roi.iter().join(", "));
    }
    if let Some(frames) = data.get_good_frames() {
        println!(" . good frames: {}", frames.len());
    }
    if data.is_defocus() {
        println!(
            " . defocus: ({:e}, {:e}) m",
            attributes.defocus_y.unwrap_or_default(),
            attributes.defocus_x.unwrap_or_default()
        );
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let mut loader = NpzLoader::default();
    if let Some(path) = &opt.protocol {
        loader = loader.protocol(Protocol::from_csv(path)?);
    }
    let mut overrides = BTreeMap::new();
    if let Some(num_threads) = opt.num_threads {
        overrides.insert(
            Attribute::NumThreads,
            speckle_data::Value::Int(num_threads as i64),
        );
    }
    let attributes = loader.load(
        &opt.files,
        opt.master.as_deref(),
        opt.frames.as_deref(),
        overrides,
    )?;
    let mut data = ExperimentData::new(attributes)?;

    if let Some(roi) = opt.roi {
        let roi: [usize; 4] = roi
            .try_into()
            .map_err(|roi| anyhow::anyhow!("the ROI needs 4 values, found {:?}", roi))?;
        data = data.crop_data(roi)?;
    }
    if let Some(ratio) = opt.bin {
        data = data.bin_data(ratio)?;
    }
    if let Some(axis) = opt.mirror {
        data = data.mirror_data(axis)?;
    }
    if opt.good_frames.is_some() {
        data = data.mask_frames(opt.good_frames)?;
    }
    if let Some(keyword) = &opt.mask {
        let method = MaskMethod::from_keyword(keyword, opt.mask_min, opt.mask_max)?;
        data = data.update_mask(method, MaskUpdate::Reset)?;
    }
    if let Some(defocus) = opt.defocus {
        data = data.update_defocus(defocus, opt.defocus_y)?;
    }
    summary(&data);

    if opt.phase {
        let mut st = data.get_st(TrackingOptions::default())?;
        st.update_reference(opt.hval, opt.ref_method)?;
        data.update_phase(&st)?;
        if let Some(reference) = st.reference_image() {
            println!(" . reference image: {:?}", reference.dim());
        }
    }
    if let Some(origin) = opt.fit_origin {
        let result = data.fit_phase(origin, opt.fit_axis, opt.max_order, 1e-14, 1e-14, opt.loss)?;
        println!(
            "FIT: c_3={:e} c_4={:e} R²={:.4} [{}]",
            result.c_3,
            result.c_4,
            result.r_sq,
            result.fit.iter().map(|c| format!("{:e}", c)).join(", ")
        );
    }

    if let Some(path) = opt.output {
        let mut writer = NpzWriter::create(&path, Arc::clone(data.protocol()?))?;
        data.write(&mut writer)?;
    }
    Ok(())
}
