//! Inverse-distance-weighted defective-pixel repair.
//!
//! Runs of adjacent defects get windows sized from consecutive-defect
//! labels so a defect is always estimated from detector cells outside its
//! own run. Estimation works on a sentinel-marked float copy of the tile:
//! a cell is invalid iff it is strictly negative, and the whole procedure
//! relies on ordinary arithmetic ordering of the sentinel — NaN never
//! enters the data path.

use ndarray::s;
use rayon::prelude::*;
use std::path::Path;

use crate::core::operation::UnaryOp;
use crate::io::{coeff, raster};
use crate::types::{HspError, HspResult, Sample, Tile};

/// Sentinel for cells with no usable value.
const INVALID: f32 = -1.0;

/// Scaled-MAD factor, 1 / (sqrt(2) * erfcinv(3/2)).
const MAD_SCALE: f32 = 1.4826;

#[inline]
fn is_valid(v: f32) -> bool {
    v >= 0.0
}

/// IDW repair of defective detector cells, applied per line tile
/// (`bands x samples`).
pub struct DefectivePixelCorrectionIdw {
    defect_map: Tile<u8>,
    row_label: Tile<u16>,
    col_label: Tile<u16>,
    weights: Tile<f32>,
    defects: Vec<(usize, usize)>,
    max_win_spatial: usize,
    max_win_spectral: usize,
}

impl DefectivePixelCorrectionIdw {
    /// Load the `bands x samples` defect map from a single-band raster.
    pub fn load<P: AsRef<Path>>(path: P) -> HspResult<Self> {
        Ok(Self::from_mask(coeff::load_raster(path)?))
    }

    /// Build the repair operator from a defect map already in memory.
    pub fn from_mask(defect_map: Tile<u8>) -> Self {
        let (row_label, col_label) = consecutive_labels(&defect_map);
        let defects: Vec<(usize, usize)> = defect_map
            .indexed_iter()
            .filter(|&(_, &m)| m == 1)
            .map(|((y, x), _)| (y, x))
            .collect();
        let max_win_spatial = row_label.iter().copied().max().unwrap_or(0) as usize;
        let max_win_spectral = col_label.iter().copied().max().unwrap_or(0) as usize;
        let weights =
            inverse_weights_table(2 * max_win_spectral + 1, 2 * max_win_spatial + 1);
        log::debug!(
            "defect map {:?}: {} defects, window half-widths up to {} x {}",
            defect_map.dim(),
            defects.len(),
            max_win_spectral,
            max_win_spatial
        );
        Self {
            defect_map,
            row_label,
            col_label,
            weights,
            defects,
            max_win_spatial,
            max_win_spectral,
        }
    }

    /// Along-row consecutive-defect labels: each defective cell holds the
    /// length of its maximal horizontal run.
    pub fn row_label(&self) -> &Tile<u16> {
        &self.row_label
    }

    /// Along-column counterpart of [`row_label`](Self::row_label).
    pub fn col_label(&self) -> &Tile<u16> {
        &self.col_label
    }

    /// Write both label matrices to rasters for inspection of the window
    /// sizing a defect map will produce.
    pub fn write_labels<P: AsRef<Path>>(&self, row_path: P, col_path: P) -> HspResult<()> {
        for (path, label) in [
            (row_path.as_ref(), &self.row_label),
            (col_path.as_ref(), &self.col_label),
        ] {
            let (rows, cols) = label.dim();
            let dataset = raster::create_raster::<u16, _>(path, cols, rows, 1)?;
            let data: Vec<u16> = label.iter().copied().collect();
            raster::write_band_window(&dataset, 1, (0, 0), (cols, rows), data)?;
        }
        Ok(())
    }

    fn repair_one(
        &self,
        padded: &Tile<f32>,
        y: usize,
        x: usize,
        bands: usize,
        samples: usize,
    ) -> u16 {
        let pad_y = self.max_win_spectral;
        let pad_x = self.max_win_spatial;
        let win_spatial = self.row_label[[y, x]] as usize;
        let win_spectral = self.col_label[[y, x]] as usize;

        // Centred sub-table and data window, transposed so the spectral
        // axis runs across columns in every statistic below.
        let idw_t = self.weights.slice(s![
            pad_y - win_spectral..=pad_y + win_spectral,
            pad_x - win_spatial..=pad_x + win_spatial
        ]);
        let window_t = padded.slice(s![
            pad_y + y - win_spectral..=pad_y + y + win_spectral,
            pad_x + x - win_spatial..=pad_x + x + win_spatial
        ]);
        let mut window: Tile<f32> = window_t.t().to_owned();
        let idw: Tile<f32> = idw_t.t().to_owned();
        let centre_row = window.nrows() / 2;
        let centre_col = window.ncols() / 2;
        let n_cols = window.ncols();

        // Guard against extreme flicker: when any column deviates beyond
        // a tenth of the window mean, pull global extrema towards their
        // column medians.
        let mean_window = global_mean(&window);
        let stddev_window = column_stddev(&window);
        if stddev_window.iter().any(|&sd| sd > 0.1 * mean_window) {
            let mut min_v = f32::MAX;
            let mut max_v = f32::MIN;
            let mut min_col = 0usize;
            let mut max_col = 0usize;
            for ((_, c), &v) in window.indexed_iter() {
                if v < min_v {
                    min_v = v;
                    min_col = c;
                }
                if v > max_v {
                    max_v = v;
                    max_col = c;
                }
            }
            let mut trimmed = window.clone();
            trimmed.mapv_inplace(|v| if v == min_v || v == max_v { INVALID } else { v });
            let medians = column_median(&trimmed);
            let alt_max = medians[max_col];
            let alt_min = medians[min_col];
            if is_valid(alt_max) {
                window.mapv_inplace(|v| if v == max_v { alt_max } else { v });
            }
            if is_valid(alt_min) {
                window.mapv_inplace(|v| if v == min_v { alt_min } else { v });
            }
        }

        let mut patch = patch_value(window.iter(), idw.iter());
        window[[centre_row, centre_col]] = patch as f32;

        // Ratio of the centre spectral column against every column; the
        // centre row must not influence itself.
        let mut spb = ratio_mat(&window);
        let tpb: Vec<f32> = spb.row(centre_row).to_vec();
        spb.row_mut(centre_row).fill(INVALID);
        for (w, &r) in window.iter_mut().zip(spb.iter()) {
            if !is_valid(r) {
                *w = INVALID;
            }
        }

        let ta1 = column_outliers(&spb);
        let ta2 = column_outliers(&window);
        let ta3 = flat_outliers(&spb);
        let outlier = Tile::from_shape_fn(spb.dim(), |rc| ta1[rc] || ta2[rc] || ta3[rc]);
        for (v, &o) in spb.iter_mut().zip(outlier.iter()) {
            if o || *v == 0.0 {
                *v = INVALID;
            }
        }
        for (v, &o) in window.iter_mut().zip(outlier.iter()) {
            if o {
                *v = INVALID;
            }
        }

        let mean_spb = column_mean(&spb);
        let stddev_spb = column_stddev(&spb);

        let any_clean_centre = (0..n_cols).any(|c| {
            !ta1[[centre_row, c]]
                && !ta2[[centre_row, c]]
                && is_valid(window[[centre_row, c]])
                && is_valid(mean_spb[c])
        });
        let window2: Vec<f32> = if any_clean_centre {
            window.row(centre_row).to_vec()
        } else {
            column_mean(&window)
        };

        // Ratio-corrected fallback: only for runs well below the window
        // extent, and only when the centre ratio strays outside the
        // column statistics (or carries no information at all).
        let tpb_strays = (0..n_cols).any(|c| {
            tpb[c] <= mean_spb[c] - stddev_spb[c] || tpb[c] >= mean_spb[c] + stddev_spb[c]
        });
        let tpb_blank = (0..n_cols).all(|c| !is_valid(tpb[c] + mean_spb[c]));
        if (win_spectral as f32) < 0.8 * bands as f32
            && (win_spatial as f32) < 0.8 * samples as f32
            && (tpb_strays || tpb_blank)
        {
            let mut idw_mid: Vec<f32> = idw.row(centre_row).to_vec();
            for c in 0..n_cols {
                if !is_valid(window2[c]) || !is_valid(mean_spb[c]) {
                    idw_mid[c] = 0.0;
                }
            }
            let product: Vec<f32> = window2
                .iter()
                .zip(&mean_spb)
                .map(|(&w, &m)| w * m)
                .collect();
            let patch_alt = patch_value(product.iter(), idw_mid.iter());
            if patch_alt != 0 {
                patch = patch_alt;
            }
        }
        patch
    }
}

impl UnaryOp<u16> for DefectivePixelCorrectionIdw {
    fn apply(&self, tile: Tile<u16>) -> HspResult<Tile<u16>> {
        if tile.dim() != self.defect_map.dim() {
            return Err(HspError::TypeMismatch(format!(
                "tile {:?} does not match defect map {:?}",
                tile.dim(),
                self.defect_map.dim()
            )));
        }
        if self.defects.is_empty() {
            return Ok(tile);
        }
        let (bands, samples) = tile.dim();
        let pad_y = self.max_win_spectral;
        let pad_x = self.max_win_spatial;

        // Float copy with defects marked invalid and an invalid apron wide
        // enough for the largest window. Read-only once built: every
        // defect reads pre-correction values, so the per-defect loop can
        // fan out.
        let mut padded =
            Tile::from_elem((bands + 2 * pad_y, samples + 2 * pad_x), INVALID);
        for ((r, c), &v) in tile.indexed_iter() {
            padded[[r + pad_y, c + pad_x]] = if self.defect_map[[r, c]] != 0 {
                INVALID
            } else {
                v as f32
            };
        }

        let patches: Vec<(usize, usize, u16)> = self
            .defects
            .par_iter()
            .map(|&(y, x)| (y, x, self.repair_one(&padded, y, x, bands, samples)))
            .collect();

        let mut tile = tile;
        for (y, x, patch) in patches {
            tile[[y, x]] = patch;
        }
        Ok(tile)
    }
}

/// Two-pass consecutive-run labelling: forward accumulation, then backward
/// propagation of each run's total length over the whole run.
fn consecutive_labels(mask: &Tile<u8>) -> (Tile<u16>, Tile<u16>) {
    let (rows, cols) = mask.dim();
    let mut row_label = Tile::<u16>::zeros((rows, cols));
    let mut col_label = Tile::<u16>::zeros((rows, cols));

    for i in 0..rows {
        row_label[[i, 0]] = mask[[i, 0]] as u16;
        for j in 1..cols {
            if mask[[i, j]] == 1 {
                row_label[[i, j]] = row_label[[i, j - 1]] + 1;
            }
        }
    }
    for i in (0..rows).rev() {
        for j in (0..cols.saturating_sub(1)).rev() {
            if row_label[[i, j]] != 0 && row_label[[i, j + 1]] != 0 {
                row_label[[i, j]] = row_label[[i, j + 1]];
            }
        }
    }

    for j in 0..cols {
        col_label[[0, j]] = mask[[0, j]] as u16;
        for i in 1..rows {
            if mask[[i, j]] == 1 {
                col_label[[i, j]] = col_label[[i - 1, j]] + 1;
            }
        }
    }
    for j in (0..cols).rev() {
        for i in (0..rows.saturating_sub(1)).rev() {
            if col_label[[i, j]] != 0 && col_label[[i + 1, j]] != 0 {
                col_label[[i, j]] = col_label[[i + 1, j]];
            }
        }
    }
    (row_label, col_label)
}

/// Inverse-distance table centred on `(rows/2, cols/2)`; the centre weight
/// is zero so a defect never contributes to itself.
fn inverse_weights_table(rows: usize, cols: usize) -> Tile<f32> {
    let cy = (rows / 2) as f32;
    let cx = (cols / 2) as f32;
    Tile::from_shape_fn((rows, cols), |(i, j)| {
        let d = ((cy - i as f32).powi(2) + (cx - j as f32).powi(2)).sqrt();
        if d == 0.0 {
            0.0
        } else {
            1.0 / d
        }
    })
}

/// Weighted patch estimate. Weights at invalid cells are dropped; when no
/// weight survives there is no information and the patch is zero.
fn patch_value<'a>(
    values: impl Iterator<Item = &'a f32> + Clone,
    weights: impl Iterator<Item = &'a f32> + Clone,
) -> u16 {
    let mut weight_sum = 0f64;
    for (&v, &w) in values.clone().zip(weights.clone()) {
        if is_valid(v) {
            weight_sum += w as f64;
        }
    }
    if weight_sum == 0.0 {
        return 0;
    }
    let mut acc = 0f64;
    for (&v, &w) in values.zip(weights) {
        if is_valid(v) {
            acc += v as f64 * (w as f64 / weight_sum);
        }
    }
    u16::from_f64(acc)
}

/// Centre-column ratio matrix. Division keeps ordinary float semantics,
/// then NaN and +inf collapse to the sentinel; negative ratios are already
/// invalid by sign.
fn ratio_mat(m: &Tile<f32>) -> Tile<f32> {
    let centre_col = m.ncols() / 2;
    Tile::from_shape_fn(m.dim(), |(r, c)| {
        let denom = if is_valid(m[[r, c]]) { m[[r, c]] } else { 0.0 };
        let v = m[[r, centre_col]] / denom;
        if v.is_nan() || v == f32::INFINITY {
            INVALID
        } else {
            v
        }
    })
}

fn global_mean(m: &Tile<f32>) -> f32 {
    let mut sum = 0f64;
    let mut n = 0usize;
    for &v in m.iter() {
        if is_valid(v) {
            sum += v as f64;
            n += 1;
        }
    }
    if n == 0 {
        INVALID
    } else {
        (sum / n as f64) as f32
    }
}

fn column_mean(m: &Tile<f32>) -> Vec<f32> {
    (0..m.ncols())
        .map(|c| {
            let mut sum = 0f64;
            let mut n = 0usize;
            for &v in m.column(c).iter() {
                if is_valid(v) {
                    sum += v as f64;
                    n += 1;
                }
            }
            if n == 0 {
                INVALID
            } else {
                (sum / n as f64) as f32
            }
        })
        .collect()
}

/// Population standard deviation per column over valid cells.
fn column_stddev(m: &Tile<f32>) -> Vec<f32> {
    (0..m.ncols())
        .map(|c| {
            let valid: Vec<f64> = m
                .column(c)
                .iter()
                .copied()
                .filter(|&v| is_valid(v))
                .map(|v| v as f64)
                .collect();
            if valid.is_empty() {
                return INVALID;
            }
            let mean = valid.iter().sum::<f64>() / valid.len() as f64;
            let var =
                valid.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / valid.len() as f64;
            var.sqrt() as f32
        })
        .collect()
}

fn median_of(mut values: Vec<f32>) -> f32 {
    if values.is_empty() {
        return INVALID;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        0.5 * (values[mid - 1] + values[mid])
    }
}

fn column_median(m: &Tile<f32>) -> Vec<f32> {
    (0..m.ncols())
        .map(|c| median_of(m.column(c).iter().copied().filter(|&v| is_valid(v)).collect()))
        .collect()
}

/// Scaled-MAD outlier test over one set of values; invalid cells are never
/// outliers and do not enter the statistics.
fn mad_outliers(values: &[f32]) -> Vec<bool> {
    let valid: Vec<f32> = values.iter().copied().filter(|&v| is_valid(v)).collect();
    if valid.is_empty() {
        return vec![false; values.len()];
    }
    let centre = median_of(valid.clone());
    let mad = median_of(valid.iter().map(|v| (v - centre).abs()).collect());
    let threshold = 3.0 * MAD_SCALE * mad;
    values
        .iter()
        .map(|&v| is_valid(v) && (v - centre).abs() > threshold)
        .collect()
}

fn column_outliers(m: &Tile<f32>) -> Tile<bool> {
    let mut out = Tile::from_elem(m.dim(), false);
    for c in 0..m.ncols() {
        let col: Vec<f32> = m.column(c).to_vec();
        for (r, flag) in mad_outliers(&col).into_iter().enumerate() {
            out[[r, c]] = flag;
        }
    }
    out
}

/// Outlier test over the whole matrix flattened, reshaped back.
fn flat_outliers(m: &Tile<f32>) -> Tile<bool> {
    let flat: Vec<f32> = m.iter().copied().collect();
    let flags = mad_outliers(&flat);
    let mut out = Tile::from_elem(m.dim(), false);
    for (i, flag) in flags.into_iter().enumerate() {
        out[[i / m.ncols(), i % m.ncols()]] = flag;
    }
    out
}
