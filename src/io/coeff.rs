//! Calibration coefficient loading.
//!
//! Coefficients arrive either as rasters (any format GDAL can open; only
//! band 1 is used) or as plain text files of whitespace-separated numbers,
//! one matrix row per line.

use std::fs;
use std::path::Path;

use crate::io::raster::{self, shape_of};
use crate::types::{HspError, HspResult, Sample, Tile};

/// Load a coefficient matrix from a raster file, band 1 only.
pub fn load_raster<T: Sample, P: AsRef<Path>>(path: P) -> HspResult<Tile<T>> {
    let dataset = raster::open_raster(&path)?;
    let shape = shape_of(&dataset);
    let data = raster::read_band_window::<T>(
        &dataset,
        1,
        (0, 0),
        (shape.samples, shape.lines),
    )?;
    Tile::from_shape_vec((shape.lines, shape.samples), data)
        .map_err(|e| HspError::TypeMismatch(e.to_string()))
}

/// Load a coefficient matrix from a whitespace-separated text file.
///
/// Tokens are parsed as floating point and coerced to `T`; blank lines are
/// skipped; ragged rows are rejected.
pub fn load_text<T: Sample, P: AsRef<Path>>(path: P) -> HspResult<Tile<T>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|_| HspError::OpenFailed(path.display().to_string()))?;

    let mut rows: Vec<Vec<T>> = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let row = trimmed
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f64>()
                    .map(T::from_f64)
                    .map_err(|_| {
                        HspError::ParseFailed(format!(
                            "bad numeric token {:?} in {}",
                            token,
                            path.display()
                        ))
                    })
            })
            .collect::<HspResult<Vec<T>>>()?;
        rows.push(row);
    }

    let n_rows = rows.len();
    if n_rows == 0 {
        return Err(HspError::ParseFailed(format!(
            "no coefficient rows in {}",
            path.display()
        )));
    }
    let n_cols = rows[0].len();
    if rows.iter().any(|r| r.len() != n_cols) {
        return Err(HspError::TypeMismatch(format!(
            "ragged coefficient rows in {}",
            path.display()
        )));
    }

    let flat: Vec<T> = rows.into_iter().flatten().collect();
    Tile::from_shape_vec((n_rows, n_cols), flat)
        .map_err(|e| HspError::TypeMismatch(e.to_string()))
}

/// Load coefficients from either a raster or a text file, dispatching on
/// the file format.
pub fn load_coeff<T: Sample, P: AsRef<Path>>(path: P) -> HspResult<Tile<T>> {
    if raster::is_raster_dataset(path.as_ref()) {
        load_raster(path)
    } else {
        load_text(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coeff.txt");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_text_infers_shape() {
        let (_dir, path) = write_temp("1.0 2.0 3.0\n4.0 5.0 6.0\n");
        let coeff = load_text::<f32, _>(&path).unwrap();
        assert_eq!(coeff.dim(), (2, 3));
        assert_eq!(coeff[[1, 2]], 6.0);
    }

    #[test]
    fn test_load_text_coerces_to_integer() {
        let (_dir, path) = write_temp("10.4 20.6\n");
        let coeff = load_text::<u16, _>(&path).unwrap();
        assert_eq!(coeff[[0, 0]], 10);
        assert_eq!(coeff[[0, 1]], 21);
    }

    #[test]
    fn test_load_text_rejects_ragged_rows() {
        let (_dir, path) = write_temp("1 2 3\n4 5\n");
        assert!(matches!(
            load_text::<f32, _>(&path),
            Err(HspError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_load_text_rejects_garbage() {
        let (_dir, path) = write_temp("1.0 banana\n");
        assert!(matches!(
            load_text::<f32, _>(&path),
            Err(HspError::ParseFailed(_))
        ));
    }

    #[test]
    fn test_load_text_missing_file() {
        assert!(matches!(
            load_text::<f32, _>("/nonexistent/coeff.txt"),
            Err(HspError::OpenFailed(_))
        ));
    }
}
