//! Axis iterators over a raster dataset.
//!
//! An input iterator walks one axis of the cube and yields an owned tile
//! per position; an output iterator writes tiles back position by
//! position. The three axis choices mirror the three natural traversals of
//! a `samples x lines x bands` cube:
//!
//! - [`SampleInput`]: `bands x lines` tile per sample column,
//! - [`LineInput`]: `bands x samples` tile per line,
//! - [`BandInput`]: `lines x samples` tile per band,
//!
//! with [`SampleOutput`], [`LineOutput`], [`BandOutput`] as the write-side
//! counterparts. Input iterators prefetch one position ahead so that
//! working on a tile overlaps the next window read. Both directions cover
//! the half-open range `[start, axis_len)`.

use gdal::Dataset;
use std::marker::PhantomData;

use crate::core::operation::TileSink;
use crate::io::raster::{self, RasterShape};
use crate::types::{HspError, HspResult, Sample, Tile};

/// Traversal axis of a cube iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Sample,
    Line,
    Band,
}

impl Axis {
    fn len(self, shape: RasterShape) -> usize {
        match self {
            Axis::Sample => shape.samples,
            Axis::Line => shape.lines,
            Axis::Band => shape.bands,
        }
    }

    /// Tile shape (rows, cols) for one position on this axis.
    fn tile_dims(self, shape: RasterShape) -> (usize, usize) {
        match self {
            Axis::Sample => (shape.bands, shape.lines),
            Axis::Line => (shape.bands, shape.samples),
            Axis::Band => (shape.lines, shape.samples),
        }
    }
}

fn checked_shape(dataset: &Dataset) -> HspResult<RasterShape> {
    let shape = raster::shape_of(dataset);
    if shape.samples == 0 || shape.lines == 0 || shape.bands == 0 {
        return Err(HspError::InvalidArgument(format!(
            "degenerate raster shape {} x {} x {}",
            shape.samples, shape.lines, shape.bands
        )));
    }
    Ok(shape)
}

/// All-band list and window geometry for one position on `axis`.
fn window_of(
    shape: RasterShape,
    axis: Axis,
    idx: usize,
) -> (Vec<usize>, (isize, isize), (usize, usize)) {
    match axis {
        Axis::Sample => (
            (1..=shape.bands).collect(),
            (idx as isize, 0),
            (1, shape.lines),
        ),
        Axis::Line => (
            (1..=shape.bands).collect(),
            (0, idx as isize),
            (shape.samples, 1),
        ),
        Axis::Band => (vec![idx + 1], (0, 0), (shape.samples, shape.lines)),
    }
}

fn read_tile<T: Sample>(
    dataset: &Dataset,
    shape: RasterShape,
    axis: Axis,
    idx: usize,
) -> HspResult<Tile<T>> {
    let (rows, cols) = axis.tile_dims(shape);
    let (bands, window, size) = window_of(shape, axis, idx);
    let data = raster::read_window::<T>(dataset, &bands, window, size)?;
    Tile::from_shape_vec((rows, cols), data).map_err(|e| HspError::TypeMismatch(e.to_string()))
}

fn write_tile<T: Sample>(
    dataset: &Dataset,
    shape: RasterShape,
    axis: Axis,
    idx: usize,
    tile: &Tile<T>,
) -> HspResult<()> {
    let (bands, window, size) = window_of(shape, axis, idx);
    let data: Vec<T> = tile.iter().copied().collect();
    raster::write_window(dataset, &bands, window, size, &data)
}

/// Shared read-side machinery behind the three input iterator kinds.
struct AxisInput<'d, T: Sample> {
    dataset: &'d Dataset,
    shape: RasterShape,
    axis: Axis,
    cur: usize,
    end: usize,
    prefetched: Option<HspResult<Tile<T>>>,
}

impl<'d, T: Sample> AxisInput<'d, T> {
    /// The tile at `start` is read immediately so the first `next()`
    /// returns without touching the dataset.
    fn new(dataset: &'d Dataset, axis: Axis, start: usize) -> HspResult<Self> {
        raster::register_drivers();
        let shape = checked_shape(dataset)?;
        let end = axis.len(shape);
        if start > end {
            return Err(HspError::OutOfRange {
                index: start,
                max: end,
            });
        }
        let prefetched = if start < end {
            Some(read_tile(dataset, shape, axis, start))
        } else {
            None
        };
        Ok(Self {
            dataset,
            shape,
            axis,
            cur: start,
            end,
            prefetched,
        })
    }

    fn next_tile(&mut self) -> Option<HspResult<Tile<T>>> {
        if self.cur >= self.end {
            return None;
        }
        let tile = self
            .prefetched
            .take()
            .unwrap_or_else(|| read_tile(self.dataset, self.shape, self.axis, self.cur));
        self.cur += 1;
        // Read-ahead: overlap the next window with whatever the consumer
        // does to the tile just handed out.
        if self.cur < self.end {
            self.prefetched = Some(read_tile(self.dataset, self.shape, self.axis, self.cur));
        }
        Some(tile)
    }

    fn remaining(&self) -> usize {
        self.end - self.cur
    }
}

impl<T: Sample> Clone for AxisInput<'_, T> {
    /// A copy restarts at the current position with its own prefetch; no
    /// position state is shared with the original.
    fn clone(&self) -> Self {
        let prefetched = if self.cur < self.end {
            Some(read_tile(self.dataset, self.shape, self.axis, self.cur))
        } else {
            None
        };
        Self {
            dataset: self.dataset,
            shape: self.shape,
            axis: self.axis,
            cur: self.cur,
            end: self.end,
            prefetched,
        }
    }
}

/// Shared write-side machinery behind the three output iterator kinds.
struct AxisOutput<'d, T: Sample> {
    dataset: &'d Dataset,
    shape: RasterShape,
    axis: Axis,
    cur: usize,
    end: usize,
    _element: PhantomData<T>,
}

impl<'d, T: Sample> AxisOutput<'d, T> {
    fn new(dataset: &'d Dataset, axis: Axis, start: usize) -> HspResult<Self> {
        raster::register_drivers();
        let shape = checked_shape(dataset)?;
        let end = axis.len(shape);
        if start > end {
            return Err(HspError::OutOfRange {
                index: start,
                max: end,
            });
        }
        Ok(Self {
            dataset,
            shape,
            axis,
            cur: start,
            end,
            _element: PhantomData,
        })
    }

    /// Commit `tile` at the current position and advance.
    fn write(&mut self, tile: &Tile<T>) -> HspResult<()> {
        if self.cur >= self.end {
            return Err(HspError::OutOfRange {
                index: self.cur,
                max: self.end,
            });
        }
        let expected = self.axis.tile_dims(self.shape);
        if tile.dim() != expected {
            return Err(HspError::TypeMismatch(format!(
                "tile shape {:?} does not match axis window {:?}",
                tile.dim(),
                expected
            )));
        }
        write_tile(self.dataset, self.shape, self.axis, self.cur, tile)?;
        self.cur += 1;
        Ok(())
    }
}

macro_rules! input_iterator {
    ($(#[$doc:meta])* $name:ident, $axis:expr) => {
        $(#[$doc])*
        pub struct $name<'d, T: Sample>(AxisInput<'d, T>);

        impl<'d, T: Sample> $name<'d, T> {
            /// Iterate from position 0.
            pub fn new(dataset: &'d Dataset) -> HspResult<Self> {
                Ok(Self(AxisInput::new(dataset, $axis, 0)?))
            }

            /// Iterate from `start`; the tile there is prefetched at
            /// construction.
            pub fn with_start(dataset: &'d Dataset, start: usize) -> HspResult<Self> {
                Ok(Self(AxisInput::new(dataset, $axis, start)?))
            }

            /// The position the next `next()` call will yield.
            pub fn position(&self) -> usize {
                self.0.cur
            }

            /// Shape of the underlying raster.
            pub fn shape(&self) -> RasterShape {
                self.0.shape
            }
        }

        impl<T: Sample> Clone for $name<'_, T> {
            fn clone(&self) -> Self {
                Self(self.0.clone())
            }
        }

        impl<T: Sample> Iterator for $name<'_, T> {
            type Item = HspResult<Tile<T>>;

            fn next(&mut self) -> Option<Self::Item> {
                self.0.next_tile()
            }

            fn size_hint(&self) -> (usize, Option<usize>) {
                (self.0.remaining(), Some(self.0.remaining()))
            }
        }

        impl<T: Sample> ExactSizeIterator for $name<'_, T> {}
    };
}

input_iterator!(
    /// Walks `x = 0..samples`; each step yields the `bands x lines` tile
    /// read from the window `(x, 0, 1, lines)` across all bands.
    SampleInput,
    Axis::Sample
);
input_iterator!(
    /// Walks `y = 0..lines`; each step yields the `bands x samples` tile
    /// read from the window `(0, y, samples, 1)` across all bands.
    LineInput,
    Axis::Line
);
input_iterator!(
    /// Walks `b = 0..bands`; each step yields the full `lines x samples`
    /// image of band `b`.
    BandInput,
    Axis::Band
);

macro_rules! output_iterator {
    ($(#[$doc:meta])* $name:ident, $axis:expr) => {
        $(#[$doc])*
        pub struct $name<'d, T: Sample>(AxisOutput<'d, T>);

        impl<'d, T: Sample> $name<'d, T> {
            /// Write from position 0.
            pub fn new(dataset: &'d Dataset) -> HspResult<Self> {
                Ok(Self(AxisOutput::new(dataset, $axis, 0)?))
            }

            pub fn with_start(dataset: &'d Dataset, start: usize) -> HspResult<Self> {
                Ok(Self(AxisOutput::new(dataset, $axis, start)?))
            }

            /// The position the next `write` call will fill.
            pub fn position(&self) -> usize {
                self.0.cur
            }

            /// Commit `tile` at the current position, then advance.
            pub fn write(&mut self, tile: &Tile<T>) -> HspResult<()> {
                self.0.write(tile)
            }
        }

        impl<T: Sample> TileSink<T> for $name<'_, T> {
            fn write(&mut self, tile: &Tile<T>) -> HspResult<()> {
                self.0.write(tile)
            }
        }
    };
}

output_iterator!(
    /// Writes one `bands x lines` tile per sample column.
    SampleOutput,
    Axis::Sample
);
output_iterator!(
    /// Writes one `bands x samples` tile per line.
    LineOutput,
    Axis::Line
);
output_iterator!(
    /// Writes one `lines x samples` tile per band.
    BandOutput,
    Axis::Band
);
