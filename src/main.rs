//! Batch driver: decode and correct every input product, carrying on past
//! per-input failures and exiting non-zero if any input failed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use hypercal::core::{
    transform, DarkBackgroundCorrection, DefectivePixelCorrectionSpectral, Gf501aDarkCorrection,
    Gf501aVnirProcess, NonUniformityCorrection, UnaryOp, UnaryOpCombo,
};
use hypercal::io::{create_raster, open_raster, AhsiData, LineInput, LineOutput, SensorType};
use hypercal::order::{CoeffSet, Order, OrderInput};
use hypercal::types::HspResult;

#[derive(Parser)]
#[command(
    name = "hypercal",
    version,
    about = "Radiometric correction for pushbroom hyperspectral imagery"
)]
struct Args {
    /// Input products: Level-0 telemetry (.DAT) or decoded rasters.
    inputs: Vec<PathBuf>,

    /// JSON order file (inputs, coefficient set, outputs).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for outputs when the order gives none.
    #[arg(short, long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Relative coefficient a (gain).
    #[arg(long)]
    gain: Option<PathBuf>,

    /// Relative coefficient b (offset).
    #[arg(long)]
    offset: Option<PathBuf>,

    /// Dark background coefficient.
    #[arg(long)]
    dark: Option<PathBuf>,

    /// Defective pixel list.
    #[arg(long)]
    dp: Option<PathBuf>,

    /// Input files processed concurrently (one worker per file).
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let order = match build_order(&args) {
        Ok(order) => order,
        Err(e) => {
            eprintln!("hypercal: {e}");
            std::process::exit(-1);
        }
    };
    if let Err(e) = order.validate() {
        eprintln!("hypercal: {e}");
        std::process::exit(-1);
    }

    // Cooperative cancellation, observed between frames. Nothing in the
    // CLI sets it today; embedders driving the same functions can.
    let cancel = AtomicBool::new(false);

    let failed = if args.jobs > 1 {
        run_batch_parallel(&order, &args, &cancel)
    } else {
        run_batch(&order, &args, &cancel)
    };

    if failed > 0 {
        eprintln!(
            "hypercal: {failed} of {} inputs failed",
            order.input.len()
        );
        std::process::exit(-1);
    }
}

fn process_one(order: &Order, index: usize, args: &Args, cancel: &AtomicBool) -> usize {
    let input = &order.input[index];
    let output = output_path(order, index, args);
    log::info!("processing {} -> {}", input.filename, output.display());
    let result = if input.raw {
        process_raw(input, &output, &order.coeff, cancel)
    } else {
        process_raster(input, &output, &order.coeff, cancel)
    };
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("hypercal: {}: {e}", input.filename);
            1
        }
    }
}

fn run_batch(order: &Order, args: &Args, cancel: &AtomicBool) -> usize {
    let mut failed = 0;
    for i in 0..order.input.len() {
        failed += process_one(order, i, args, cancel);
        if cancel.load(Ordering::Relaxed) {
            log::warn!(
                "cancelled, {} inputs left unprocessed",
                order.input.len() - i - 1
            );
            break;
        }
    }
    failed
}

/// One worker per input file, capped at `--jobs`.
fn run_batch_parallel(order: &Order, args: &Args, cancel: &AtomicBool) -> usize {
    use rayon::prelude::*;
    let pool = match rayon::ThreadPoolBuilder::new().num_threads(args.jobs).build() {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("hypercal: {e}");
            return order.input.len();
        }
    };
    pool.install(|| {
        (0..order.input.len())
            .into_par_iter()
            .map(|i| process_one(order, i, args, cancel))
            .sum()
    })
}

/// Merge the order file (if given) with command-line inputs and
/// coefficient flags. The command line wins for coefficients it names.
fn build_order(args: &Args) -> HspResult<Order> {
    let mut order = match &args.config {
        Some(path) => hypercal::order::load_order(path)?,
        None => Order::default(),
    };
    for input in &args.inputs {
        order.input.push(OrderInput {
            filename: input.display().to_string(),
            raw: is_raw_input(input),
        });
    }
    if let Some(gain) = &args.gain {
        order.coeff.rel_a = gain.display().to_string();
    }
    if let Some(offset) = &args.offset {
        order.coeff.rel_b = offset.display().to_string();
    }
    if let Some(dark) = &args.dark {
        order.coeff.dark_a = dark.display().to_string();
    }
    if let Some(dp) = &args.dp {
        order.coeff.badpixel = dp.display().to_string();
    }
    Ok(order)
}

/// Level-0 telemetry ships as .DAT; anything else is treated as a raster.
fn is_raw_input(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("dat"))
}

fn output_path(order: &Order, index: usize, args: &Args) -> PathBuf {
    if let Some(output) = order.output.get(index) {
        return PathBuf::from(output);
    }
    let input = Path::new(&order.input[index].filename);
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("output_{index}"));
    let dir = args
        .output_dir
        .clone()
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    dir.join(format!("{stem}_rc.tif"))
}

fn has(path: &str) -> bool {
    !path.is_empty()
}

/// Decode Level-0 telemetry and run the sensor-specific chain.
fn process_raw(
    input: &OrderInput,
    output: &Path,
    coeff: &CoeffSet,
    cancel: &AtomicBool,
) -> HspResult<()> {
    let mut raw = AhsiData::new(&input.filename)?;
    raw.traverse()?;
    let dst = create_raster::<u16, _>(output, raw.samples(), raw.lines(), raw.bands())?;
    let mut sink = LineOutput::<u16>::new(&dst)?;

    let fused = raw.sensor_type() == SensorType::Vnir
        && has(&coeff.dark_a)
        && has(&coeff.dark_b)
        && has(&coeff.etalon_a)
        && has(&coeff.etalon_b)
        && has(&coeff.rel_a)
        && has(&coeff.rel_b);

    let dpc = if has(&coeff.badpixel) {
        Some(DefectivePixelCorrectionSpectral::load(&coeff.badpixel)?)
    } else {
        None
    };

    if fused {
        let proc = Gf501aVnirProcess::load(
            &coeff.dark_a,
            &coeff.dark_b,
            &coeff.etalon_a,
            &coeff.etalon_b,
            &coeff.rel_a,
            &coeff.rel_b,
        )?;
        for frame in raw.frames()? {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let frame = frame?;
            let mut tile = proc.apply(&frame)?;
            if let Some(dpc) = &dpc {
                tile = dpc.apply(tile)?;
            }
            sink.write(&tile)?;
        }
        return Ok(());
    }

    let dbc = if has(&coeff.dark_a) && has(&coeff.dark_b) {
        Some(Gf501aDarkCorrection::load(&coeff.dark_a, &coeff.dark_b)?)
    } else {
        None
    };
    let mut ops = UnaryOpCombo::<u16>::new();
    if has(&coeff.etalon_a) && has(&coeff.etalon_b) {
        ops = ops.add(NonUniformityCorrection::<u16, f64>::load(
            &coeff.etalon_a,
            &coeff.etalon_b,
        )?);
    }
    if has(&coeff.rel_a) && has(&coeff.rel_b) {
        ops = ops.add(NonUniformityCorrection::<u16, f64>::load(
            &coeff.rel_a,
            &coeff.rel_b,
        )?);
    }

    for frame in raw.frames()? {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let frame = frame?;
        let mut tile = match &dbc {
            Some(dbc) => dbc.apply(&frame)?,
            None => frame.data.clone(),
        };
        tile = ops.apply(tile)?;
        if let Some(dpc) = &dpc {
            tile = dpc.apply(tile)?;
        }
        sink.write(&tile)?;
    }
    Ok(())
}

/// Run the generic line-tile chain over an already-decoded raster.
fn process_raster(
    input: &OrderInput,
    output: &Path,
    coeff: &CoeffSet,
    cancel: &AtomicBool,
) -> HspResult<()> {
    let src = open_raster(&input.filename)?;
    let shape = hypercal::io::raster::shape_of(&src);
    let dst = create_raster::<u16, _>(output, shape.samples, shape.lines, shape.bands)?;

    let mut ops = UnaryOpCombo::<u16>::new();
    if has(&coeff.dark_a) {
        ops = ops.add(DarkBackgroundCorrection::<u16>::load(&coeff.dark_a)?);
    }
    if has(&coeff.rel_a) && has(&coeff.rel_b) {
        ops = ops.add(NonUniformityCorrection::<u16, f32>::load(
            &coeff.rel_a,
            &coeff.rel_b,
        )?);
    }
    if has(&coeff.badpixel) {
        ops = ops.add(DefectivePixelCorrectionSpectral::load(&coeff.badpixel)?);
    }

    let tiles = LineInput::<u16>::new(&src)?;
    let mut sink = LineOutput::<u16>::new(&dst)?;
    let written = transform(tiles, &mut sink, &ops, Some(cancel))?;
    log::info!("{}: {written} lines written", input.filename);
    Ok(())
}
