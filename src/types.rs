use ndarray::Array2;

/// A value-typed rectangular image tile (rows x cols).
///
/// Axis iterators produce tiles of fixed shape: sample-axis tiles are
/// `bands x lines`, line-axis tiles are `bands x samples`, band-axis tiles
/// are `lines x samples`.
pub type Tile<T> = Array2<T>;

/// Pixel element types a raster can carry through the pipeline.
///
/// Binds the GDAL buffer type to the in-memory representation and provides
/// the saturating conversions the correction operators rely on.
pub trait Sample:
    gdal::raster::GdalType + Copy + PartialOrd + num_traits::Zero + Send + Sync + 'static
{
    /// Widen to f64 for coefficient arithmetic.
    fn to_f64(self) -> f64;

    /// Saturating cast back from coefficient arithmetic. Integer targets
    /// round to nearest and clamp to the type range.
    fn from_f64(v: f64) -> Self;

    /// Subtraction that clamps at the type floor instead of wrapping.
    fn saturating_sub(self, rhs: Self) -> Self;
}

macro_rules! impl_sample_int {
    ($($t:ty),*) => {$(
        impl Sample for $t {
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                let v = v.round();
                if v <= <$t>::MIN as f64 {
                    <$t>::MIN
                } else if v >= <$t>::MAX as f64 {
                    <$t>::MAX
                } else {
                    v as $t
                }
            }

            #[inline]
            fn saturating_sub(self, rhs: Self) -> Self {
                <$t>::saturating_sub(self, rhs)
            }
        }
    )*};
}

macro_rules! impl_sample_float {
    ($($t:ty),*) => {$(
        impl Sample for $t {
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $t
            }

            #[inline]
            fn saturating_sub(self, rhs: Self) -> Self {
                self - rhs
            }
        }
    )*};
}

impl_sample_int!(u8, u16, i16, u32, i32);
impl_sample_float!(f32, f64);

/// Error types for the correction pipeline.
#[derive(Debug, thiserror::Error)]
pub enum HspError {
    #[error("failed to open {0}")]
    OpenFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("raw data must be traversed before frames can be read")]
    NotTraversed,

    #[error("index {index} out of range [0, {max})")]
    OutOfRange { index: usize, max: usize },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("parse error: {0}")]
    ParseFailed(String),

    #[error("unknown raster format: {0}")]
    FormatUnknown(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("GPU error: {0}")]
    Gpu(String),
}

/// Result type for pipeline operations.
pub type HspResult<T> = Result<T, HspError>;
