//! Coefficient loader tests over on-disk fixtures.

use std::fs;
use std::path::PathBuf;

use hypercal::io::coeff::{load_coeff, load_raster, load_text};
use hypercal::io::raster::{create_raster, is_raster_dataset, write_band_window};
use hypercal::types::HspError;

fn write_coeff_raster(dir: &tempfile::TempDir, name: &str, bands: usize) -> PathBuf {
    let path = dir.path().join(name);
    let dataset = create_raster::<f32, _>(&path, 3, 2, bands).unwrap();
    for b in 0..bands {
        let data: Vec<f32> = (0..6).map(|i| (b * 100 + i) as f32).collect();
        write_band_window(&dataset, b + 1, (0, 0), (3, 2), data).unwrap();
    }
    path
}

#[test]
fn test_load_raster_band_one_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_coeff_raster(&dir, "coeff.tif", 3);
    let coeff = load_raster::<f32, _>(&path).unwrap();
    assert_eq!(coeff.dim(), (2, 3));
    // Band 1 carries 0..6; later bands must not leak in.
    assert_eq!(coeff[[0, 0]], 0.0);
    assert_eq!(coeff[[1, 2]], 5.0);
}

#[test]
fn test_load_raster_converts_to_integer() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_coeff_raster(&dir, "coeff.tif", 1);
    let coeff = load_raster::<u16, _>(&path).unwrap();
    assert_eq!(coeff[[1, 2]], 5);
}

#[test]
fn test_load_raster_missing_file() {
    assert!(matches!(
        load_raster::<f32, _>("/nonexistent/coeff.tif"),
        Err(HspError::OpenFailed(_))
    ));
}

#[test]
fn test_load_coeff_dispatches_on_format() {
    let dir = tempfile::tempdir().unwrap();
    let raster_path = write_coeff_raster(&dir, "coeff.tif", 1);
    let text_path = dir.path().join("coeff.txt");
    fs::write(&text_path, "1.5 2.5\n3.5 4.5\n").unwrap();

    let from_raster = load_coeff::<f32, _>(&raster_path).unwrap();
    assert_eq!(from_raster.dim(), (2, 3));

    let from_text = load_coeff::<f32, _>(&text_path).unwrap();
    assert_eq!(from_text.dim(), (2, 2));
    assert_eq!(from_text[[1, 0]], 3.5);
}

#[test]
fn test_envi_dat_detected_by_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coeff.dat");
    let dataset = create_raster::<f32, _>(&path, 2, 2, 1).unwrap();
    write_band_window(&dataset, 1, (0, 0), (2, 2), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
    drop(dataset);

    assert!(is_raster_dataset(&path));
    let coeff = load_coeff::<f32, _>(&path).unwrap();
    assert_eq!(coeff[[1, 1]], 4.0);
}

#[test]
fn test_text_without_raster_extension_parses_as_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dark.coef");
    fs::write(&path, "7 8 9\n").unwrap();
    assert!(!is_raster_dataset(&path));
    let coeff = load_text::<f64, _>(&path).unwrap();
    assert_eq!(coeff.dim(), (1, 3));
    assert_eq!(coeff[[0, 2]], 9.0);
}

#[test]
fn test_scientific_notation_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gain.txt");
    fs::write(&path, "1.0e-3 2.5E2\n-4e0 0.0\n").unwrap();
    let coeff = load_text::<f64, _>(&path).unwrap();
    assert_eq!(coeff[[0, 0]], 1.0e-3);
    assert_eq!(coeff[[0, 1]], 250.0);
    assert_eq!(coeff[[1, 0]], -4.0);
}
