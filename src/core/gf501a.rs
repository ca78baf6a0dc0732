//! GF5-01A specific correction operators.
//!
//! The AHSI dark level drifts with the frame counter, so the dark model is
//! synthesised per frame from the sequence number embedded in the
//! telemetry: `dark = a * idx + b`. These operators consume whole
//! [`AhsiFrame`]s rather than bare tiles.

use std::path::Path;

use crate::io::ahsi::AhsiFrame;
use crate::io::coeff;
use crate::types::{HspError, HspResult, Sample, Tile};

fn check_frame_shape<C>(frame: &AhsiFrame, coeff: &Tile<C>) -> HspResult<()> {
    if frame.data.dim() != coeff.dim() {
        return Err(HspError::TypeMismatch(format!(
            "coefficients {:?} do not match frame {:?}",
            coeff.dim(),
            frame.data.dim()
        )));
    }
    Ok(())
}

/// Index-coupled dark subtraction: `out = DN - sat_u16(a * idx + b)`.
pub struct Gf501aDarkCorrection {
    a: Tile<f32>,
    b: Tile<f32>,
}

impl Gf501aDarkCorrection {
    pub fn load<P: AsRef<Path>>(coeff_a: P, coeff_b: P) -> HspResult<Self> {
        let a = coeff::load_raster(coeff_a)?;
        let b = coeff::load_raster(coeff_b)?;
        if a.dim() != b.dim() {
            return Err(HspError::TypeMismatch(format!(
                "dark slope {:?} and intercept {:?} differ in shape",
                a.dim(),
                b.dim()
            )));
        }
        Ok(Self { a, b })
    }

    pub fn from_tiles(a: Tile<f32>, b: Tile<f32>) -> HspResult<Self> {
        if a.dim() != b.dim() {
            return Err(HspError::TypeMismatch(
                "dark slope and intercept differ in shape".into(),
            ));
        }
        Ok(Self { a, b })
    }

    pub fn apply(&self, frame: &AhsiFrame) -> HspResult<Tile<u16>> {
        check_frame_shape(frame, &self.a)?;
        let idx = frame.index as f32;
        Ok(Tile::from_shape_fn(frame.data.dim(), |rc| {
            let dark = u16::from_f64((self.a[rc] * idx + self.b[rc]) as f64);
            frame.data[rc].saturating_sub(dark)
        }))
    }
}

/// Fused VNIR pipeline: dark, etalon and relative correction collapsed
/// into one gain/offset pass per frame.
///
/// The chain `rel(etalon(DN - (a_d*idx + b_d)))` expands to
/// `DN*img_gain - idx_gain*idx + offset` with
///
/// ```text
/// img_gain = a_e * a_r
/// idx_gain = a_d * a_e * a_r
/// offset   = b_e * a_r + b_r - a_e * a_r * b_d
/// ```
///
/// so the coefficients combine once at load time and each frame costs a
/// single multiply-add sweep.
pub struct Gf501aVnirProcess {
    img_gain: Tile<f64>,
    idx_gain: Tile<f64>,
    offset: Tile<f64>,
}

impl Gf501aVnirProcess {
    pub fn load<P: AsRef<Path>>(
        dark_a: P,
        dark_b: P,
        etalon_a: P,
        etalon_b: P,
        rel_a: P,
        rel_b: P,
    ) -> HspResult<Self> {
        let a_d = coeff::load_raster::<f64, _>(dark_a)?;
        let b_d = coeff::load_raster::<f64, _>(dark_b)?;
        let a_e = coeff::load_raster::<f64, _>(etalon_a)?;
        let b_e = coeff::load_raster::<f64, _>(etalon_b)?;
        let a_r = coeff::load_raster::<f64, _>(rel_a)?;
        let b_r = coeff::load_raster::<f64, _>(rel_b)?;
        Self::from_tiles(a_d, b_d, a_e, b_e, a_r, b_r)
    }

    pub fn from_tiles(
        a_d: Tile<f64>,
        b_d: Tile<f64>,
        a_e: Tile<f64>,
        b_e: Tile<f64>,
        a_r: Tile<f64>,
        b_r: Tile<f64>,
    ) -> HspResult<Self> {
        let dim = a_d.dim();
        for (name, coeff) in [
            ("dark_b", &b_d),
            ("etalon_a", &a_e),
            ("etalon_b", &b_e),
            ("rel_a", &a_r),
            ("rel_b", &b_r),
        ] {
            if coeff.dim() != dim {
                return Err(HspError::TypeMismatch(format!(
                    "{} is {:?}, expected {:?}",
                    name,
                    coeff.dim(),
                    dim
                )));
            }
        }
        let img_gain = &a_e * &a_r;
        let idx_gain = &a_d * &img_gain;
        let offset = &b_e * &a_r + &b_r - &img_gain * &b_d;
        Ok(Self {
            img_gain,
            idx_gain,
            offset,
        })
    }

    pub fn apply(&self, frame: &AhsiFrame) -> HspResult<Tile<u16>> {
        check_frame_shape(frame, &self.img_gain)?;
        let idx = frame.index as f64;
        Ok(Tile::from_shape_fn(frame.data.dim(), |rc| {
            u16::from_f64(
                frame.data[rc] as f64 * self.img_gain[rc] - self.idx_gain[rc] * idx
                    + self.offset[rc],
            )
        }))
    }
}
