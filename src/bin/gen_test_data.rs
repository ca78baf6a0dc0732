//! Synthetic test-data generator.
//!
//! Produces either a random coefficient raster or a well-formed Level-0
//! telemetry file, both seeded for reproducibility. Useful for exercising
//! the decoder and the correction chain without flight data.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hypercal::io::ahsi::LEADING_BYTES;
use hypercal::io::raster::{create_raster, write_band_window};
use hypercal::types::HspResult;

#[derive(Parser)]
#[command(
    name = "gen_test_data",
    version,
    about = "Generate random coefficient rasters or synthetic Level-0 telemetry"
)]
struct Args {
    /// Output path. The extension picks the raster driver; use .dat
    /// together with --level0 for telemetry.
    out: PathBuf,

    #[arg(long, default_value_t = 1999)]
    samples: usize,

    #[arg(long, default_value_t = 76)]
    lines: usize,

    #[arg(long, default_value_t = 1)]
    bands: usize,

    /// Upper bound of the uniform value range.
    #[arg(long, default_value_t = 1.0)]
    max_value: f64,

    /// Write framed Level-0 telemetry instead of a raster.
    #[arg(long)]
    level0: bool,

    /// Focal plane for --level0: "vnir" (150 bands) or "swir" (180).
    #[arg(long, default_value = "vnir")]
    sensor: String,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let result = if args.level0 {
        write_level0(&args)
    } else {
        write_raster(&args)
    };
    if let Err(e) = result {
        eprintln!("gen_test_data: {e}");
        std::process::exit(-1);
    }
}

fn write_raster(args: &Args) -> HspResult<()> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let dataset = create_raster::<f64, _>(&args.out, args.samples, args.lines, args.bands)?;
    for band in 1..=args.bands {
        let data: Vec<f64> = (0..args.samples * args.lines)
            .map(|_| rng.gen_range(0.0..args.max_value))
            .collect();
        write_band_window(&dataset, band, (0, 0), (args.samples, args.lines), data)?;
    }
    log::info!(
        "wrote {} ({} x {} x {})",
        args.out.display(),
        args.samples,
        args.lines,
        args.bands
    );
    Ok(())
}

fn write_level0(args: &Args) -> HspResult<()> {
    let (sensor_tag, bands) = match args.sensor.to_ascii_lowercase().as_str() {
        "swir" => (1u8, 180usize),
        "vnir" => (2u8, 150usize),
        other => {
            return Err(hypercal::HspError::InvalidArgument(format!(
                "unknown sensor {other:?}, expected vnir or swir"
            )))
        }
    };
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut file = fs::File::create(&args.out)?;

    for frame in 0..args.lines {
        file.write_all(&[0u8; 8])?;
        for band in 0..bands {
            let mut sub = [0u8; 12];
            if band == 0 {
                sub[0..4].copy_from_slice(&LEADING_BYTES);
                sub[4..6].copy_from_slice(&(args.samples as u16).to_be_bytes());
                sub[6] = (sensor_tag << 4) | 0x07;
                sub[7] = 0; // lossless
                let seq = (frame as u32).to_be_bytes();
                sub[9..12].copy_from_slice(&seq[1..4]);
            }
            file.write_all(&sub)?;
            for _ in 0..args.samples {
                file.write_all(&rng.gen_range(0u16..4096).to_le_bytes())?;
            }
        }
    }
    log::info!(
        "wrote {} ({} frames, {} bands, {} samples)",
        args.out.display(),
        args.lines,
        bands,
        args.samples
    );
    Ok(())
}
