//! CUDA mirrors of the per-frame correction operators.
//!
//! The CPU path stays authoritative; these variants reproduce it for
//! throughput work. Coefficients upload once at load time and stay
//! resident, so the per-frame cost is one host-to-device copy of the DN
//! tile, a kernel launch, and the copy back.
//!
//! Enabled with the `cuda` feature; needs a CUDA driver and NVRTC at
//! runtime.

use std::sync::Arc;

use cudarc::driver::safe::{CudaContext, CudaFunction, CudaSlice, CudaStream, LaunchConfig};
use cudarc::nvrtc::compile_ptx;

use crate::io::ahsi::AhsiFrame;
use crate::io::coeff;
use crate::types::{HspError, HspResult, Tile};
use std::path::Path;

const KERNELS: &str = r#"
extern "C" __global__ void dark_subtract_u16(
    const unsigned short* in, const unsigned short* dark,
    unsigned short* out, int n)
{
    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        int v = (int)in[i] - (int)dark[i];
        out[i] = v < 0 ? 0 : (unsigned short)v;
    }
}

extern "C" __global__ void non_uniformity_u16(
    const unsigned short* in, const float* gain, const float* offset,
    unsigned short* out, int n)
{
    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        float v = nearbyintf(fmaf((float)in[i], gain[i], offset[i]));
        out[i] = v < 0.f ? 0 : (v > 65535.f ? 65535 : (unsigned short)v);
    }
}

extern "C" __global__ void gaussian3x3_u16(
    const unsigned short* in, unsigned short* out,
    int rows, int cols, float w0, float w1)
{
    int x = blockIdx.x * blockDim.x + threadIdx.x;
    int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= cols || y >= rows) return;
    float acc = 0.f;
    float taps[3];
    taps[0] = w0; taps[1] = w1; taps[2] = w0;
    for (int dy = -1; dy <= 1; ++dy) {
        int yy = min(max(y + dy, 0), rows - 1);
        float row = 0.f;
        for (int dx = -1; dx <= 1; ++dx) {
            int xx = min(max(x + dx, 0), cols - 1);
            row += taps[dx + 1] * (float)in[yy * cols + xx];
        }
        acc += taps[dy + 1] * row;
    }
    float v = nearbyintf(acc);
    out[y * cols + x] = v < 0.f ? 0 : (v > 65535.f ? 65535 : (unsigned short)v);
}

extern "C" __global__ void fused_vnir_u16(
    const unsigned short* in, const float* img_gain, const float* idx_gain,
    const float* offset, float idx, unsigned short* out, int n)
{
    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        float v = (float)in[i] * img_gain[i] - idx_gain[i] * idx + offset[i];
        v = nearbyintf(v);
        out[i] = v < 0.f ? 0 : (v > 65535.f ? 65535 : (unsigned short)v);
    }
}
"#;

fn gpu_err(e: impl std::fmt::Display) -> HspError {
    HspError::Gpu(e.to_string())
}

/// Shared CUDA context, stream, and compiled kernels.
pub struct CudaEngine {
    stream: Arc<CudaStream>,
    dark_subtract: CudaFunction,
    non_uniformity: CudaFunction,
    gaussian: CudaFunction,
    fused_vnir: CudaFunction,
}

impl CudaEngine {
    /// Bind device 0 and compile the correction kernels.
    pub fn new() -> HspResult<Arc<Self>> {
        let ctx = CudaContext::new(0).map_err(gpu_err)?;
        let stream = ctx.default_stream();
        let ptx = compile_ptx(KERNELS).map_err(gpu_err)?;
        let module = ctx.load_module(ptx).map_err(gpu_err)?;
        let load = |name: &str| module.load_function(name).map_err(gpu_err);
        Ok(Arc::new(Self {
            stream,
            dark_subtract: load("dark_subtract_u16")?,
            non_uniformity: load("non_uniformity_u16")?,
            gaussian: load("gaussian3x3_u16")?,
            fused_vnir: load("fused_vnir_u16")?,
        }))
    }

    fn upload_f32(&self, tile: &Tile<f32>) -> HspResult<CudaSlice<f32>> {
        let flat: Vec<f32> = tile.iter().copied().collect();
        self.stream.clone_htod(&flat).map_err(gpu_err)
    }

    fn linear_config(n: usize) -> LaunchConfig {
        LaunchConfig {
            grid_dim: (((n + 255) / 256) as u32, 1, 1),
            block_dim: (256, 1, 1),
            shared_mem_bytes: 0,
        }
    }
}

fn download_tile(
    engine: &CudaEngine,
    buffer: &CudaSlice<u16>,
    dim: (usize, usize),
) -> HspResult<Tile<u16>> {
    let host = engine.stream.clone_dtoh(buffer).map_err(gpu_err)?;
    Tile::from_shape_vec(dim, host).map_err(|e| HspError::TypeMismatch(e.to_string()))
}

fn check_dims(tile: &Tile<u16>, coeff_dim: (usize, usize), what: &str) -> HspResult<()> {
    if tile.dim() != coeff_dim {
        return Err(HspError::TypeMismatch(format!(
            "{what} coefficients {coeff_dim:?} do not match tile {:?}",
            tile.dim()
        )));
    }
    Ok(())
}

/// Device-resident dark subtraction.
pub struct CudaDarkCorrection {
    engine: Arc<CudaEngine>,
    dark: CudaSlice<u16>,
    dim: (usize, usize),
}

impl CudaDarkCorrection {
    pub fn load<P: AsRef<Path>>(engine: Arc<CudaEngine>, path: P) -> HspResult<Self> {
        let dark: Tile<u16> = coeff::load_coeff(path)?;
        let dim = dark.dim();
        let flat: Vec<u16> = dark.iter().copied().collect();
        let dark = engine.stream.clone_htod(&flat).map_err(gpu_err)?;
        Ok(Self { engine, dark, dim })
    }

    pub fn apply(&self, tile: &Tile<u16>) -> HspResult<Tile<u16>> {
        check_dims(tile, self.dim, "dark")?;
        let n = tile.len();
        let flat: Vec<u16> = tile.iter().copied().collect();
        let d_in = self.engine.stream.clone_htod(&flat).map_err(gpu_err)?;
        let mut d_out = self.engine.stream.alloc_zeros::<u16>(n).map_err(gpu_err)?;

        let n_arg = n as i32;
        let mut launch = self.engine.stream.launch_builder(&self.engine.dark_subtract);
        launch.arg(&d_in);
        launch.arg(&self.dark);
        launch.arg(&mut d_out);
        launch.arg(&n_arg);
        unsafe { launch.launch(CudaEngine::linear_config(n)).map_err(gpu_err)? };

        download_tile(&self.engine, &d_out, tile.dim())
    }
}

/// Device-resident gain/offset correction (non-uniformity or etalon,
/// depending on which coefficient files are loaded).
pub struct CudaNonUniformityCorrection {
    engine: Arc<CudaEngine>,
    gain: CudaSlice<f32>,
    offset: CudaSlice<f32>,
    dim: (usize, usize),
}

impl CudaNonUniformityCorrection {
    pub fn load<P: AsRef<Path>>(
        engine: Arc<CudaEngine>,
        coeff_a: P,
        coeff_b: P,
    ) -> HspResult<Self> {
        let gain: Tile<f32> = coeff::load_coeff(coeff_a)?;
        let offset: Tile<f32> = coeff::load_coeff(coeff_b)?;
        if gain.dim() != offset.dim() {
            return Err(HspError::TypeMismatch(format!(
                "gain {:?} and offset {:?} differ in shape",
                gain.dim(),
                offset.dim()
            )));
        }
        let dim = gain.dim();
        let gain = engine.upload_f32(&gain)?;
        let offset = engine.upload_f32(&offset)?;
        Ok(Self {
            engine,
            gain,
            offset,
            dim,
        })
    }

    pub fn apply(&self, tile: &Tile<u16>) -> HspResult<Tile<u16>> {
        check_dims(tile, self.dim, "non-uniformity")?;
        let n = tile.len();
        let flat: Vec<u16> = tile.iter().copied().collect();
        let d_in = self.engine.stream.clone_htod(&flat).map_err(gpu_err)?;
        let mut d_out = self.engine.stream.alloc_zeros::<u16>(n).map_err(gpu_err)?;

        let n_arg = n as i32;
        let mut launch = self.engine.stream.launch_builder(&self.engine.non_uniformity);
        launch.arg(&d_in);
        launch.arg(&self.gain);
        launch.arg(&self.offset);
        launch.arg(&mut d_out);
        launch.arg(&n_arg);
        unsafe { launch.launch(CudaEngine::linear_config(n)).map_err(gpu_err)? };

        download_tile(&self.engine, &d_out, tile.dim())
    }
}

/// Device 3x3 Gaussian smoothing, sigma 1.0, replicate border.
pub struct CudaGaussianFilter {
    engine: Arc<CudaEngine>,
}

impl CudaGaussianFilter {
    pub fn new(engine: Arc<CudaEngine>) -> Self {
        Self { engine }
    }

    pub fn apply(&self, tile: &Tile<u16>) -> HspResult<Tile<u16>> {
        let (rows, cols) = tile.dim();
        let n = tile.len();
        let flat: Vec<u16> = tile.iter().copied().collect();
        let d_in = self.engine.stream.clone_htod(&flat).map_err(gpu_err)?;
        let mut d_out = self.engine.stream.alloc_zeros::<u16>(n).map_err(gpu_err)?;

        let side = (-0.5f32).exp();
        let norm = 2.0 * side + 1.0;
        let (w0, w1) = (side / norm, 1.0 / norm);
        let (rows_arg, cols_arg) = (rows as i32, cols as i32);
        let mut launch = self.engine.stream.launch_builder(&self.engine.gaussian);
        launch.arg(&d_in);
        launch.arg(&mut d_out);
        launch.arg(&rows_arg);
        launch.arg(&cols_arg);
        launch.arg(&w0);
        launch.arg(&w1);
        let config = LaunchConfig {
            grid_dim: (
                ((cols + 15) / 16) as u32,
                ((rows + 15) / 16) as u32,
                1,
            ),
            block_dim: (16, 16, 1),
            shared_mem_bytes: 0,
        };
        unsafe { launch.launch(config).map_err(gpu_err)? };

        download_tile(&self.engine, &d_out, tile.dim())
    }
}

/// Device mirror of the fused VNIR pipeline: coefficients combine on the
/// host exactly as in [`crate::core::gf501a::Gf501aVnirProcess`], then stay
/// resident as f32 gain/offset planes.
pub struct CudaVnirProcess {
    engine: Arc<CudaEngine>,
    img_gain: CudaSlice<f32>,
    idx_gain: CudaSlice<f32>,
    offset: CudaSlice<f32>,
    dim: (usize, usize),
}

impl CudaVnirProcess {
    #[allow(clippy::too_many_arguments)]
    pub fn load<P: AsRef<Path>>(
        engine: Arc<CudaEngine>,
        dark_a: P,
        dark_b: P,
        etalon_a: P,
        etalon_b: P,
        rel_a: P,
        rel_b: P,
    ) -> HspResult<Self> {
        let a_d: Tile<f32> = coeff::load_raster(dark_a)?;
        let b_d: Tile<f32> = coeff::load_raster(dark_b)?;
        let a_e: Tile<f32> = coeff::load_raster(etalon_a)?;
        let b_e: Tile<f32> = coeff::load_raster(etalon_b)?;
        let a_r: Tile<f32> = coeff::load_raster(rel_a)?;
        let b_r: Tile<f32> = coeff::load_raster(rel_b)?;
        let dim = a_d.dim();
        for coeff in [&b_d, &a_e, &b_e, &a_r, &b_r] {
            if coeff.dim() != dim {
                return Err(HspError::TypeMismatch(
                    "fused coefficient planes differ in shape".into(),
                ));
            }
        }
        let img_gain = &a_e * &a_r;
        let idx_gain = &a_d * &img_gain;
        let offset = &b_e * &a_r + &b_r - &img_gain * &b_d;
        Ok(Self {
            img_gain: engine.upload_f32(&img_gain)?,
            idx_gain: engine.upload_f32(&idx_gain)?,
            offset: engine.upload_f32(&offset)?,
            engine,
            dim,
        })
    }

    pub fn apply(&self, frame: &AhsiFrame) -> HspResult<Tile<u16>> {
        check_dims(&frame.data, self.dim, "fused")?;
        let n = frame.data.len();
        let flat: Vec<u16> = frame.data.iter().copied().collect();
        let d_in = self.engine.stream.clone_htod(&flat).map_err(gpu_err)?;
        let mut d_out = self.engine.stream.alloc_zeros::<u16>(n).map_err(gpu_err)?;

        let idx = frame.index as f32;
        let n_arg = n as i32;
        let mut launch = self.engine.stream.launch_builder(&self.engine.fused_vnir);
        launch.arg(&d_in);
        launch.arg(&self.img_gain);
        launch.arg(&self.idx_gain);
        launch.arg(&self.offset);
        launch.arg(&idx);
        launch.arg(&mut d_out);
        launch.arg(&n_arg);
        unsafe { launch.launch(CudaEngine::linear_config(n)).map_err(gpu_err)? };

        download_tile(&self.engine, &d_out, frame.data.dim())
    }
}
