//! Image operator algebra.
//!
//! Correction steps are unary operators over an owned tile; a combo chains
//! them left to right. Band-indexed repairs need the band number as a
//! second argument and therefore live behind a separate two-argument
//! trait — the two arities are deliberately not interchangeable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::types::{HspError, HspResult, Tile};

/// A unary image operation with pre-loaded, immutable coefficients.
pub trait UnaryOp<T>: Send + Sync {
    fn apply(&self, tile: Tile<T>) -> HspResult<Tile<T>>;
}

/// A band-indexed image operation. Not composable through
/// [`UnaryOpCombo`]; drive it with [`transform2`].
pub trait BandOp<T>: Send + Sync {
    fn apply(&self, tile: Tile<T>, band: usize) -> HspResult<Tile<T>>;
}

/// An ordered chain of unary operations. The empty combo is the identity.
pub struct UnaryOpCombo<T> {
    ops: Vec<Box<dyn UnaryOp<T>>>,
}

impl<T> Default for UnaryOpCombo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UnaryOpCombo<T> {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Append an operation; runs after everything already added.
    pub fn add(mut self, op: impl UnaryOp<T> + 'static) -> Self {
        self.ops.push(Box::new(op));
        self
    }

    /// Drop the most recently added operation.
    pub fn remove_back(&mut self) {
        self.ops.pop();
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl<T> UnaryOp<T> for UnaryOpCombo<T> {
    fn apply(&self, tile: Tile<T>) -> HspResult<Tile<T>> {
        let mut tile = tile;
        for op in &self.ops {
            tile = op.apply(tile)?;
        }
        Ok(tile)
    }
}

/// A consumer of corrected tiles, written in emission order.
pub trait TileSink<T> {
    fn write(&mut self, tile: &Tile<T>) -> HspResult<()>;
}

/// Drive every tile of `tiles` through `op` into `sink`. Returns the number
/// of tiles written. A set `cancel` flag stops between frames; in-flight
/// frames complete.
pub fn transform<T, I, S>(
    tiles: I,
    sink: &mut S,
    op: &dyn UnaryOp<T>,
    cancel: Option<&AtomicBool>,
) -> HspResult<usize>
where
    I: Iterator<Item = HspResult<Tile<T>>>,
    S: TileSink<T>,
{
    let mut written = 0;
    for tile in tiles {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            log::warn!("transform cancelled after {written} frames");
            break;
        }
        sink.write(&op.apply(tile?)?)?;
        written += 1;
    }
    Ok(written)
}

/// Drive tiles through `op` with frame-level parallelism: frames are read
/// in order, corrected `batch` at a time across the thread pool, and
/// committed in frame order, so the sink sees the same layout as the
/// sequential [`transform`].
pub fn transform_parallel<T, I, S>(
    tiles: I,
    sink: &mut S,
    op: &dyn UnaryOp<T>,
    batch: usize,
    cancel: Option<&AtomicBool>,
) -> HspResult<usize>
where
    T: Send + Sync,
    I: Iterator<Item = HspResult<Tile<T>>>,
    S: TileSink<T>,
{
    let mut tiles = tiles;
    let batch = batch.max(1);
    let mut written = 0;
    loop {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            log::warn!("transform_parallel cancelled after {written} frames");
            break;
        }
        let mut pending = Vec::with_capacity(batch);
        for tile in tiles.by_ref().take(batch) {
            pending.push(tile?);
        }
        if pending.is_empty() {
            break;
        }
        let corrected: Vec<HspResult<Tile<T>>> =
            pending.into_par_iter().map(|tile| op.apply(tile)).collect();
        for tile in corrected {
            sink.write(&tile?)?;
            written += 1;
        }
    }
    Ok(written)
}

/// Sink adapter that accepts frames out of order and commits them to the
/// inner sink strictly by frame index. Needed when a parallel producer
/// finishes frames in completion order.
pub struct ReorderingSink<'s, T, S: TileSink<T>> {
    inner: &'s mut S,
    next: usize,
    pending: BTreeMap<usize, Tile<T>>,
}

impl<'s, T, S: TileSink<T>> ReorderingSink<'s, T, S> {
    pub fn new(inner: &'s mut S) -> Self {
        Self {
            inner,
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Hand over frame `index`. Consecutive frames drain to the inner sink
    /// immediately; gaps are buffered until filled.
    pub fn write_at(&mut self, index: usize, tile: Tile<T>) -> HspResult<()> {
        if index < self.next || self.pending.contains_key(&index) {
            return Err(HspError::InvalidArgument(format!(
                "frame {index} already committed"
            )));
        }
        self.pending.insert(index, tile);
        while let Some(tile) = self.pending.remove(&self.next) {
            self.inner.write(&tile)?;
            self.next += 1;
        }
        Ok(())
    }

    /// Frames buffered while waiting for a gap to fill.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Index of the next frame the inner sink will receive.
    pub fn committed(&self) -> usize {
        self.next
    }
}

/// Like [`transform`] for band-indexed operations: tiles are paired with
/// the indices yielded by `indices` (usually `0..bands`).
pub fn transform2<T, I, X, S>(
    tiles: I,
    indices: X,
    sink: &mut S,
    op: &dyn BandOp<T>,
    cancel: Option<&AtomicBool>,
) -> HspResult<usize>
where
    I: Iterator<Item = HspResult<Tile<T>>>,
    X: Iterator<Item = usize>,
    S: TileSink<T>,
{
    let mut written = 0;
    for (tile, band) in tiles.zip(indices) {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            log::warn!("transform2 cancelled after {written} frames");
            break;
        }
        sink.write(&op.apply(tile?, band)?)?;
        written += 1;
    }
    Ok(written)
}
