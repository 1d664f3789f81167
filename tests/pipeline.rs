use ndarray::{s, Array2, Array3};
use speckle_data::{
    loader::{Loader, NpzLoader, NpzWriter},
    Attributes, ExperimentData, Loss, Protocol, Record, RefMethod, SweepOptions, Tracking,
    TrackingOptions,
};
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

const LEVEL: f64 = 1000.;
const DISTANCE: f64 = 2.;
const PIXEL_SIZE: f64 = 55e-6;
const STEP: f64 = 2e-7;

/// Defocus at which the pattern moves by `shift` pixels per frame
fn defocus(shift: f64) -> f64 {
    STEP * DISTANCE / (shift * PIXEL_SIZE)
}

fn scan(n_frames: usize, rows: usize, cols: usize) -> ExperimentData {
    let data = Array3::from_shape_fn((n_frames, rows, cols), |(n, i, j)| {
        let x = j as f64 + 2. * n as f64;
        (LEVEL * (1. + 0.5 * (0.9 * x).sin() * (0.6 * i as f64).cos())).round()
    });
    let mut basis_vectors = Array3::zeros((n_frames, 2, 3));
    basis_vectors.slice_mut(s![.., 0, 1]).fill(-PIXEL_SIZE);
    basis_vectors.slice_mut(s![.., 1, 0]).fill(-PIXEL_SIZE);
    let mut translations = Array2::zeros((n_frames, 3));
    for (n, mut t) in translations.outer_iter_mut().enumerate() {
        t[0] = STEP * n as f64;
    }
    let attributes = Attributes::required(
        Arc::new(Protocol::cxi()),
        data,
        basis_vectors,
        translations,
        DISTANCE,
        7.29e-11,
        PIXEL_SIZE,
        PIXEL_SIZE,
    )
    .num_threads(2)
    .whitefield(Array2::from_elem((rows, cols), LEVEL));
    ExperimentData::new(attributes).unwrap()
}

fn archive(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("speckle-data-{}-{}.npz", name, std::process::id()))
}

fn save(data: &ExperimentData, name: &str) -> PathBuf {
    let path = archive(name);
    {
        let mut writer = NpzWriter::create(&path, Arc::clone(data.protocol().unwrap())).unwrap();
        data.write(&mut writer).unwrap();
    }
    path
}

#[test]
fn archive_reload() {
    let data = scan(4, 10, 12).crop_data([1, 9, 0, 12]).unwrap();
    let path = save(&data, "reload");
    let loaded = NpzLoader::default().load_data(&[&path]).unwrap();
    assert_eq!(loaded.roi().unwrap(), [1, 9, 0, 12]);
    assert_eq!(loaded.get_data(), data.get_data());
    assert_eq!(loaded.get_mask(), data.get_mask());
    assert_eq!(
        loaded.attributes().translations,
        data.attributes().translations
    );
    std::fs::remove_file(path).ok();
}

#[test]
fn frames_selection_and_overrides() {
    let data = scan(4, 6, 8);
    let path = save(&data, "frames");
    let mut overrides = BTreeMap::new();
    overrides.insert(speckle_data::Attribute::Distance, speckle_data::Value::Float(1.5));
    let attributes = NpzLoader::default()
        .load(&[&path], None, Some(&[3, 1][..]), overrides)
        .unwrap();
    assert_eq!(attributes.data.as_ref().unwrap().dim(), (2, 6, 8));
    assert_eq!(attributes.translations.as_ref().unwrap()[[0, 0]], 3. * STEP);
    assert_eq!(attributes.distance, Some(1.5));
    assert!(NpzLoader::default()
        .load(&[&path], None, Some(&[4][..]), BTreeMap::new())
        .is_err());
    std::fs::remove_file(path).ok();
}

#[test]
fn phase_retrieval() {
    let data = scan(6, 10, 12)
        .update_defocus(defocus(2.5), None)
        .unwrap();
    let mut st = data.get_st(TrackingOptions::default()).unwrap();
    st.update_reference(1., RefMethod::KernelRegression).unwrap();
    let reference = st.reference_image().unwrap().to_owned();
    assert!(reference.iter().all(|x| x.is_finite()));

    let mut data = data;
    data.update_phase(&st).unwrap();
    assert!(data.is_phase());
    assert_eq!(data.get_reference_image(), Some(reference));

    let result = data.fit_phase(0, 1, 2, 1e-12, 1e-12, Loss::Linear).unwrap();
    assert_eq!(result.fit.len(), 3);
    assert_eq!(result.ph_fit.len(), 4);
}

#[test]
fn defocus_calibration() {
    let data = scan(5, 12, 16);
    let truth = defocus(2.);
    let result = data
        .defocus_sweep(
            &[truth * 0.5, truth, truth * 2.],
            None,
            3,
            SweepOptions::default().hval(0.5),
        )
        .unwrap();
    assert_eq!(result.best(), Some(1));
}
