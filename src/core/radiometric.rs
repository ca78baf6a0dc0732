//! Per-frame radiometric correction operators.
//!
//! Every operator loads its calibration coefficients once at construction
//! and is immutable afterwards, so the same operator can serve a whole
//! batch and be shared across workers.

use std::path::Path;

use crate::core::inpaint::inpaint_telea;
use crate::core::operation::{BandOp, UnaryOp};
use crate::io::coeff;
use crate::types::{HspError, HspResult, Sample, Tile};

/// Row index into a coefficient matrix that may be a row vector virtually
/// tiled over all tile rows.
#[inline]
fn coeff_row(coeff_rows: usize, tile_row: usize) -> usize {
    if coeff_rows == 1 {
        0
    } else {
        tile_row
    }
}

fn check_coeff_shape<T, C>(tile: &Tile<T>, coeff: &Tile<C>, what: &str) -> HspResult<()> {
    let ok = coeff.dim() == tile.dim()
        || (coeff.nrows() == 1 && coeff.ncols() == tile.ncols());
    if ok {
        Ok(())
    } else {
        Err(HspError::TypeMismatch(format!(
            "{} coefficients {:?} do not broadcast against tile {:?}",
            what,
            coeff.dim(),
            tile.dim()
        )))
    }
}

/// Dark-current subtraction: `out = in - dark`, saturating at the type
/// floor.
pub struct DarkBackgroundCorrection<T: Sample> {
    dark: Tile<T>,
}

impl<T: Sample> DarkBackgroundCorrection<T> {
    /// Load the dark level from a raster or text coefficient file.
    pub fn load<P: AsRef<Path>>(path: P) -> HspResult<Self> {
        Ok(Self {
            dark: coeff::load_coeff(path)?,
        })
    }

    pub fn from_tile(dark: Tile<T>) -> Self {
        Self { dark }
    }
}

impl<T: Sample> UnaryOp<T> for DarkBackgroundCorrection<T> {
    fn apply(&self, tile: Tile<T>) -> HspResult<Tile<T>> {
        if tile.dim() != self.dark.dim() {
            return Err(HspError::TypeMismatch(format!(
                "dark level {:?} does not match tile {:?}",
                self.dark.dim(),
                tile.dim()
            )));
        }
        let mut tile = tile;
        tile.zip_mut_with(&self.dark, |v, &d| *v = v.saturating_sub(d));
        Ok(tile)
    }
}

fn linear_correct<T: Sample, C: Sample>(
    tile: Tile<T>,
    gain: &Tile<C>,
    offset: &Tile<C>,
    what: &str,
) -> HspResult<Tile<T>> {
    check_coeff_shape(&tile, gain, what)?;
    check_coeff_shape(&tile, offset, what)?;
    let gain_rows = gain.nrows();
    let offset_rows = offset.nrows();
    Ok(Tile::from_shape_fn(tile.dim(), |(r, c)| {
        let a = gain[[coeff_row(gain_rows, r), c]].to_f64();
        let b = offset[[coeff_row(offset_rows, r), c]].to_f64();
        T::from_f64(tile[[r, c]].to_f64() * a + b)
    }))
}

/// Non-uniformity (relative radiometric) correction:
/// `out = sat(in * a + b)` computed in `C`.
pub struct NonUniformityCorrection<T: Sample, C: Sample = f32> {
    gain: Tile<C>,
    offset: Tile<C>,
    _out: std::marker::PhantomData<T>,
}

impl<T: Sample, C: Sample> NonUniformityCorrection<T, C> {
    pub fn load<P: AsRef<Path>>(coeff_a: P, coeff_b: P) -> HspResult<Self> {
        let gain = coeff::load_coeff(coeff_a)?;
        let offset = coeff::load_coeff(coeff_b)?;
        Self::from_tiles(gain, offset)
    }

    pub fn from_tiles(gain: Tile<C>, offset: Tile<C>) -> HspResult<Self> {
        if gain.dim() != offset.dim() {
            return Err(HspError::TypeMismatch(format!(
                "gain {:?} and offset {:?} differ in shape",
                gain.dim(),
                offset.dim()
            )));
        }
        Ok(Self {
            gain,
            offset,
            _out: std::marker::PhantomData,
        })
    }
}

impl<T: Sample, C: Sample> UnaryOp<T> for NonUniformityCorrection<T, C> {
    fn apply(&self, tile: Tile<T>) -> HspResult<Tile<T>> {
        linear_correct(tile, &self.gain, &self.offset, "non-uniformity")
    }
}

/// Etalon-fringe correction. Algebraically the same gain/offset form as
/// non-uniformity correction but calibrated separately; chain it before
/// the relative correction.
pub struct EtalonCorrection<T: Sample, C: Sample = f32> {
    gain: Tile<C>,
    offset: Tile<C>,
    _out: std::marker::PhantomData<T>,
}

impl<T: Sample, C: Sample> EtalonCorrection<T, C> {
    pub fn load<P: AsRef<Path>>(coeff_a: P, coeff_b: P) -> HspResult<Self> {
        let gain = coeff::load_coeff(coeff_a)?;
        let offset = coeff::load_coeff(coeff_b)?;
        Self::from_tiles(gain, offset)
    }

    pub fn from_tiles(gain: Tile<C>, offset: Tile<C>) -> HspResult<Self> {
        if gain.dim() != offset.dim() {
            return Err(HspError::TypeMismatch(format!(
                "etalon gain {:?} and offset {:?} differ in shape",
                gain.dim(),
                offset.dim()
            )));
        }
        Ok(Self {
            gain,
            offset,
            _out: std::marker::PhantomData,
        })
    }
}

impl<T: Sample, C: Sample> UnaryOp<T> for EtalonCorrection<T, C> {
    fn apply(&self, tile: Tile<T>) -> HspResult<Tile<T>> {
        linear_correct(tile, &self.gain, &self.offset, "etalon")
    }
}

/// Absolute radiometric calibration. The gain tables are not flown yet;
/// this routes through the computation type and casts back.
pub struct AbsoluteRadiometricCorrection<T: Sample, C: Sample = f32> {
    _out: std::marker::PhantomData<T>,
    _compute: std::marker::PhantomData<C>,
}

impl<T: Sample, C: Sample> AbsoluteRadiometricCorrection<T, C> {
    pub fn new() -> Self {
        Self {
            _out: std::marker::PhantomData,
            _compute: std::marker::PhantomData,
        }
    }
}

impl<T: Sample, C: Sample> Default for AbsoluteRadiometricCorrection<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Sample, C: Sample> UnaryOp<T> for AbsoluteRadiometricCorrection<T, C> {
    fn apply(&self, tile: Tile<T>) -> HspResult<Tile<T>> {
        Ok(tile.mapv(|v| T::from_f64(C::from_f64(v.to_f64()).to_f64())))
    }
}

/// 3x3 Gaussian smoothing, sigma 1.0 on both axes, replicate border.
pub struct GaussianFilter;

fn gaussian_taps() -> [f64; 3] {
    let sigma = 1.0f64;
    let raw = [-1.0f64, 0.0, 1.0].map(|i| (-(i * i) / (2.0 * sigma * sigma)).exp());
    let sum: f64 = raw.iter().sum();
    raw.map(|w| w / sum)
}

#[inline]
fn replicate(i: isize, n: usize) -> usize {
    let n = n as isize;
    i.clamp(0, n - 1) as usize
}

impl<T: Sample> UnaryOp<T> for GaussianFilter {
    fn apply(&self, tile: Tile<T>) -> HspResult<Tile<T>> {
        let (rows, cols) = tile.dim();
        let taps = gaussian_taps();

        // Separable pass: rows, then columns.
        let mut horizontal = Tile::from_elem((rows, cols), 0f64);
        for r in 0..rows {
            for c in 0..cols {
                let mut acc = 0f64;
                for (k, w) in taps.iter().enumerate() {
                    let cc = replicate(c as isize + k as isize - 1, cols);
                    acc += tile[[r, cc]].to_f64() * w;
                }
                horizontal[[r, c]] = acc;
            }
        }
        Ok(Tile::from_shape_fn((rows, cols), |(r, c)| {
            let mut acc = 0f64;
            for (k, w) in taps.iter().enumerate() {
                let rr = replicate(r as isize + k as isize - 1, rows);
                acc += horizontal[[rr, c]] * w;
            }
            T::from_f64(acc)
        }))
    }
}

/// Defective-pixel repair method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inpaint {
    /// Telea fast-marching inpainting.
    Telea,
    /// Ring-kernel average `[[1,1,1],[1,0,1],[1,1,1]] / 8`, replacing
    /// masked pixels only.
    NeighborhoodAveraging,
}

/// 8-neighbour average of `tile`, written back only where `masked` holds.
fn neighborhood_averaging(
    tile: &Tile<u16>,
    masked: impl Fn(usize, usize) -> bool,
) -> Tile<u16> {
    let (rows, cols) = tile.dim();
    Tile::from_shape_fn((rows, cols), |(r, c)| {
        if !masked(r, c) {
            return tile[[r, c]];
        }
        let mut acc = 0f64;
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let rr = reflect_101(r as isize + dr, rows);
                let cc = reflect_101(c as isize + dc, cols);
                acc += tile[[rr, cc]].to_f64();
            }
        }
        u16::from_f64(acc / 8.0)
    })
}

#[inline]
fn reflect_101(i: isize, n: usize) -> usize {
    let n = n as isize;
    let i = if i < 0 { -i } else if i >= n { 2 * n - 2 - i } else { i };
    i.clamp(0, n - 1) as usize
}

fn telea_repair(
    tile: &Tile<u16>,
    masked: impl Fn(usize, usize) -> bool,
    radius: f64,
) -> Tile<u16> {
    let as_f32 = tile.mapv(|v| v as f32);
    let mask = Tile::from_shape_fn(tile.dim(), |(r, c)| u8::from(masked(r, c)));
    inpaint_telea(&as_f32, &mask, radius).mapv(|v| u16::from_f64(v as f64))
}

/// Spatial-dimension defective-pixel repair.
///
/// Operates on band tiles (`lines x samples`): row `band` of the
/// `bands x samples` defect map is virtually tiled down all lines, and the
/// flagged columns are inpainted. Band-indexed, so it cannot join a
/// [`crate::core::operation::UnaryOpCombo`]; drive it with
/// [`crate::core::operation::transform2`].
pub struct DefectivePixelCorrectionSpatial {
    defect_map: Tile<u8>,
    inpaint: Inpaint,
    /// Neighbourhood radius for the Telea method.
    pub radius: f64,
}

impl DefectivePixelCorrectionSpatial {
    /// Load the `bands x samples` defect map (1 marks a defective column).
    pub fn load<P: AsRef<Path>>(path: P) -> HspResult<Self> {
        Ok(Self::from_mask(coeff::load_raster(path)?))
    }

    pub fn from_mask(defect_map: Tile<u8>) -> Self {
        Self {
            defect_map,
            inpaint: Inpaint::Telea,
            radius: 3.0,
        }
    }

    pub fn set_inpaint(&mut self, value: Inpaint) {
        self.inpaint = value;
    }
}

impl BandOp<u16> for DefectivePixelCorrectionSpatial {
    fn apply(&self, tile: Tile<u16>, band: usize) -> HspResult<Tile<u16>> {
        if band >= self.defect_map.nrows() {
            return Err(HspError::InvalidArgument(format!(
                "band {} outside defect map with {} bands",
                band,
                self.defect_map.nrows()
            )));
        }
        if tile.ncols() != self.defect_map.ncols() {
            return Err(HspError::TypeMismatch(format!(
                "tile has {} samples, defect map {}",
                tile.ncols(),
                self.defect_map.ncols()
            )));
        }
        let mask_row = self.defect_map.row(band);
        let masked = |_r: usize, c: usize| mask_row[c] != 0;
        Ok(match self.inpaint {
            Inpaint::NeighborhoodAveraging => neighborhood_averaging(&tile, masked),
            Inpaint::Telea => telea_repair(&tile, masked, self.radius),
        })
    }
}

/// Spectral-dimension defective-pixel repair: the full `bands x samples`
/// defect map applied to line tiles of the same shape.
pub struct DefectivePixelCorrectionSpectral {
    defect_map: Tile<u8>,
    inpaint: Inpaint,
    pub radius: f64,
}

impl DefectivePixelCorrectionSpectral {
    pub fn load<P: AsRef<Path>>(path: P) -> HspResult<Self> {
        Ok(Self::from_mask(coeff::load_raster(path)?))
    }

    pub fn from_mask(defect_map: Tile<u8>) -> Self {
        Self {
            defect_map,
            inpaint: Inpaint::Telea,
            radius: 3.0,
        }
    }

    pub fn set_inpaint(&mut self, value: Inpaint) {
        self.inpaint = value;
    }
}

impl UnaryOp<u16> for DefectivePixelCorrectionSpectral {
    fn apply(&self, tile: Tile<u16>) -> HspResult<Tile<u16>> {
        if tile.dim() != self.defect_map.dim() {
            return Err(HspError::TypeMismatch(format!(
                "tile {:?} does not match defect map {:?}",
                tile.dim(),
                self.defect_map.dim()
            )));
        }
        let masked = |r: usize, c: usize| self.defect_map[[r, c]] != 0;
        Ok(match self.inpaint {
            Inpaint::NeighborhoodAveraging => neighborhood_averaging(&tile, masked),
            Inpaint::Telea => telea_repair(&tile, masked, self.radius),
        })
    }
}
