//! hypercal: radiometric correction for pushbroom hyperspectral imagers.
//!
//! The pipeline takes sensor output either as a decoded multi-band raster
//! or as framed Level-0 telemetry (GF5-01A AHSI VNIR/SWIR), applies
//! per-frame corrections — dark-current subtraction, etalon and
//! non-uniformity correction, defective-pixel repair — and writes a
//! corrected raster. Frames stream through axis iterators so a product
//! never has to fit in memory.
//!
//! The building blocks compose freely: any [`core::UnaryOp`] chain can run
//! over any frame source through [`core::transform`].
//!
//! # Example
//!
//! Dark-correct a decoded raster line by line:
//!
//! ```no_run
//! use hypercal::core::{transform, DarkBackgroundCorrection, UnaryOpCombo};
//! use hypercal::io::raster::shape_of;
//! use hypercal::io::{create_raster, open_raster, LineInput, LineOutput};
//!
//! # fn main() -> hypercal::HspResult<()> {
//! let src = open_raster("input.tif")?;
//! let shape = shape_of(&src);
//! let dst = create_raster::<u16, _>("corrected.tif", shape.samples, shape.lines, shape.bands)?;
//!
//! let ops = UnaryOpCombo::new().add(DarkBackgroundCorrection::<u16>::load("dark.tif")?);
//! let mut sink = LineOutput::<u16>::new(&dst)?;
//! transform(LineInput::<u16>::new(&src)?, &mut sink, &ops, None)?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod io;
pub mod order;
pub mod types;

// Re-export the main types for easier access
pub use io::{
    AhsiData, AhsiFrame, BandInput, BandOutput, CompressMode, LineInput, LineOutput, SampleInput,
    SampleOutput, SensorType,
};
pub use types::{HspError, HspResult, Sample, Tile};
