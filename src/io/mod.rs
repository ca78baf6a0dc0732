//! Raster and raw-telemetry input/output.

pub mod ahsi;
pub mod coeff;
pub mod iterator;
pub mod raster;

pub use ahsi::{AhsiData, AhsiFrame, CompressMode, SensorType};
pub use iterator::{BandInput, BandOutput, LineInput, LineOutput, SampleInput, SampleOutput};
pub use raster::{create_raster, open_raster, open_raster_update, register_drivers, RasterShape};
