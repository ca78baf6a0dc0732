//! Thin adapter over GDAL datasets: driver registration, format lookup,
//! open/create, and windowed band access.

use std::path::Path;
use std::sync::Once;

use gdal::raster::{Buffer, GdalType};
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags};

use crate::types::{HspError, HspResult};

static DRIVER_INIT: Once = Once::new();

/// Extension to GDAL driver mapping for dataset creation.
const FORMAT_TABLE: &[(&str, &str)] = &[
    ("tif", "GTiff"),
    ("tiff", "GTiff"),
    ("dat", "ENVI"),
    ("bmp", "BMP"),
    ("jpg", "JPEG"),
];

/// Register all GDAL drivers, exactly once per process.
///
/// Called implicitly by every open/create in this module, so callers never
/// have to sequence it by hand.
pub fn register_drivers() {
    DRIVER_INIT.call_once(DriverManager::register_all);
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Resolve the GDAL driver name for a file extension.
pub fn driver_for_extension(path: &Path) -> HspResult<&'static str> {
    let ext = extension_of(path)
        .ok_or_else(|| HspError::FormatUnknown(path.display().to_string()))?;
    FORMAT_TABLE
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, driver)| *driver)
        .ok_or(HspError::FormatUnknown(ext))
}

/// Whether `path` looks like a raster dataset: a known extension, or an
/// ENVI-style `.hdr` sidecar next to it.
pub fn is_raster_dataset(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    if let Some(ext) = extension_of(path) {
        if FORMAT_TABLE.iter().any(|(e, _)| *e == ext) {
            return true;
        }
    }
    path.with_extension("hdr").is_file()
}

/// Raster dimensions as reported by the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterShape {
    pub samples: usize,
    pub lines: usize,
    pub bands: usize,
}

/// Query `(samples, lines, bands)` of an open dataset.
pub fn shape_of(dataset: &Dataset) -> RasterShape {
    let (samples, lines) = dataset.raster_size();
    RasterShape {
        samples,
        lines,
        bands: dataset.raster_count() as usize,
    }
}

/// Open a raster read-only.
pub fn open_raster<P: AsRef<Path>>(path: P) -> HspResult<Dataset> {
    register_drivers();
    let path = path.as_ref();
    if !path.exists() {
        return Err(HspError::OpenFailed(path.display().to_string()));
    }
    Ok(Dataset::open(path)?)
}

/// Open a raster for in-place update.
pub fn open_raster_update<P: AsRef<Path>>(path: P) -> HspResult<Dataset> {
    register_drivers();
    let path = path.as_ref();
    if !path.exists() {
        return Err(HspError::OpenFailed(path.display().to_string()));
    }
    let options = DatasetOptions {
        open_flags: GdalOpenFlags::GDAL_OF_UPDATE | GdalOpenFlags::GDAL_OF_RASTER,
        ..DatasetOptions::default()
    };
    Ok(Dataset::open_ex(path, options)?)
}

/// Create a raster of the given shape and element type, choosing the driver
/// from the file extension (GTiff when there is none).
pub fn create_raster<T: GdalType, P: AsRef<Path>>(
    path: P,
    samples: usize,
    lines: usize,
    bands: usize,
) -> HspResult<Dataset> {
    register_drivers();
    let path = path.as_ref();
    let driver_name = match extension_of(path) {
        Some(_) => driver_for_extension(path)?,
        None => "GTiff",
    };
    let driver = DriverManager::get_driver_by_name(driver_name)?;
    log::debug!(
        "creating {} ({} x {} x {}) with driver {}",
        path.display(),
        samples,
        lines,
        bands,
        driver_name
    );
    Ok(driver.create_with_band_type::<T, _>(
        path,
        samples as isize,
        lines as isize,
        bands as isize,
    )?)
}

/// Read a rectangular window of one band. `band` is 1-based, GDAL
/// convention. GDAL converts the stored element type to `T` on the way out.
pub fn read_band_window<T: GdalType + Copy>(
    dataset: &Dataset,
    band: usize,
    window: (isize, isize),
    size: (usize, usize),
) -> HspResult<Vec<T>> {
    let band = dataset.rasterband(band as isize)?;
    let buffer = band.read_as::<T>(window, size, size, None)?;
    Ok(buffer.data)
}

/// Write a rectangular window of one band. `band` is 1-based.
pub fn write_band_window<T: GdalType + Copy>(
    dataset: &Dataset,
    band: usize,
    window: (isize, isize),
    size: (usize, usize),
    data: Vec<T>,
) -> HspResult<()> {
    let mut band = dataset.rasterband(band as isize)?;
    band.write(window, size, &Buffer::new(size, data))?;
    Ok(())
}

/// Read the same window of several bands, concatenated band-major into one
/// buffer of `bands.len() * x_size * y_size` elements.
pub fn read_window<T: GdalType + Copy>(
    dataset: &Dataset,
    bands: &[usize],
    window: (isize, isize),
    size: (usize, usize),
) -> HspResult<Vec<T>> {
    let mut data = Vec::with_capacity(bands.len() * size.0 * size.1);
    for &band in bands {
        data.extend(read_band_window::<T>(dataset, band, window, size)?);
    }
    Ok(data)
}

/// Write the same window of several bands from one band-major buffer.
pub fn write_window<T: GdalType + Copy>(
    dataset: &Dataset,
    bands: &[usize],
    window: (isize, isize),
    size: (usize, usize),
    data: &[T],
) -> HspResult<()> {
    let per_band = size.0 * size.1;
    if data.len() != bands.len() * per_band {
        return Err(HspError::TypeMismatch(format!(
            "buffer holds {} elements, window needs {}",
            data.len(),
            bands.len() * per_band
        )));
    }
    for (i, &band) in bands.iter().enumerate() {
        write_band_window(
            dataset,
            band,
            window,
            size,
            data[i * per_band..(i + 1) * per_band].to_vec(),
        )?;
    }
    Ok(())
}
