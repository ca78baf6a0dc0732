//! Core correction algorithms.

#[cfg(feature = "cuda")]
pub mod cuda;
pub mod gf501a;
pub mod idw;
pub mod inpaint;
pub mod operation;
pub mod radiometric;

pub use gf501a::{Gf501aDarkCorrection, Gf501aVnirProcess};
pub use idw::DefectivePixelCorrectionIdw;
pub use operation::{
    transform, transform2, transform_parallel, BandOp, ReorderingSink, TileSink, UnaryOp,
    UnaryOpCombo,
};
pub use radiometric::{
    AbsoluteRadiometricCorrection, DarkBackgroundCorrection, DefectivePixelCorrectionSpatial,
    DefectivePixelCorrectionSpectral, EtalonCorrection, GaussianFilter, Inpaint,
    NonUniformityCorrection,
};
