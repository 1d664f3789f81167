//! Defocus sweep
//!
//! Scores a range of defocus distances by the local contrast of the reference image
//! and writes the scores to a CSV file

use serde::Serialize;
use speckle_data::{loader::NpzLoader, RefMethod, SweepOptions, TrackingOptions};
use std::{path::PathBuf, time::Instant};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "defocus-sweep", about = "Defocus distance calibration")]
struct Opt {
    /// Scan archives (`.npz`)
    #[structopt(parse(from_os_str), required = true)]
    files: Vec<PathBuf>,
    /// Smallest defocus distance [m]
    #[structopt(long)]
    start: f64,
    /// Largest defocus distance [m]
    #[structopt(long)]
    end: f64,
    /// Number of defocus distances
    #[structopt(short, long, default_value = "50")]
    num: usize,
    /// Local contrast box size [pixel]
    #[structopt(long, default_value = "5")]
    size: usize,
    /// Reference image kernel bandwidth [pixel]
    #[structopt(long, default_value = "1.0")]
    hval: f64,
    /// Reference image update method: `KerReg` or `LOWESS`
    #[structopt(long, default_value = "KerReg")]
    ref_method: RefMethod,
    /// Reference image sampling interval [pixel]
    #[structopt(long, default_value = "1.0")]
    ds: f64,
    /// Region of interest: y_min y_max x_min x_max
    #[structopt(long, number_of_values = 4)]
    roi: Option<Vec<usize>>,
    /// Scores CSV file
    #[structopt(short, long, parse(from_os_str), default_value = "defocus_sweep.csv")]
    output: PathBuf,
}

#[derive(Serialize)]
struct Record {
    #[serde(rename = "defocus [m]")]
    defocus: f64,
    #[serde(rename = "R")]
    r_value: f64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();
    if opt.num == 0 {
        anyhow::bail!("at least one defocus distance is required");
    }

    let mut data = NpzLoader::default().load_data(&opt.files)?;
    if let Some(roi) = opt.roi {
        let roi: [usize; 4] = roi
            .try_into()
            .map_err(|roi| anyhow::anyhow!("the ROI needs 4 values, found {:?}", roi))?;
        data = data.crop_data(roi)?;
    }

    let step = if opt.num > 1 {
        (opt.end - opt.start) / (opt.num - 1) as f64
    } else {
        0f64
    };
    let defoci: Vec<f64> = (0..opt.num).map(|i| opt.start + step * i as f64).collect();

    let now = Instant::now();
    let options = SweepOptions::default()
        .tracking(TrackingOptions::default().sampling(opt.ds, opt.ds))
        .hval(opt.hval)
        .ref_method(opt.ref_method)
        .progress();
    let result = data.defocus_sweep(&defoci, None, opt.size, options)?;
    println!(
        "{} defocus distances swept in {}s",
        defoci.len(),
        now.elapsed().as_secs()
    );
    if let Some(best) = result.best() {
        println!(" . best defocus: {:e} m (R={:.6})", defoci[best], result.r_values[best]);
    }

    let mut wtr = csv::Writer::from_path(&opt.output)?;
    for (&defocus, &r_value) in defoci.iter().zip(&result.r_values) {
        wtr.serialize(Record { defocus, r_value })?;
    }
    wtr.flush()?;
    Ok(())
}
