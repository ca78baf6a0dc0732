//! Iterator and end-to-end pipeline tests over real GDAL datasets.

use std::path::PathBuf;

use hypercal::core::{
    transform, DarkBackgroundCorrection, NonUniformityCorrection, UnaryOpCombo,
};
use hypercal::io::raster::{create_raster, open_raster, shape_of, write_band_window};
use hypercal::io::{BandInput, BandOutput, LineInput, LineOutput, SampleInput};
use hypercal::types::{HspError, Tile};

const SAMPLES: usize = 4;
const LINES: usize = 4;
const BANDS: usize = 3;

/// Deterministic test cube: v[b, y, x] = 1000*b + 100*y + x.
fn dn(b: usize, y: usize, x: usize) -> u16 {
    (1000 * b + 100 * y + x) as u16
}

/// Create the test cube on disk and return its path.
fn write_cube(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    let dataset = create_raster::<u16, _>(&path, SAMPLES, LINES, BANDS).unwrap();
    for b in 0..BANDS {
        let mut data = Vec::with_capacity(SAMPLES * LINES);
        for y in 0..LINES {
            for x in 0..SAMPLES {
                data.push(dn(b, y, x));
            }
        }
        write_band_window(&dataset, b + 1, (0, 0), (SAMPLES, LINES), data).unwrap();
    }
    path
}

fn read_cube(path: &PathBuf) -> Vec<Tile<u16>> {
    let dataset = open_raster(path).unwrap();
    BandInput::<u16>::new(&dataset)
        .unwrap()
        .map(|t| t.unwrap())
        .collect()
}

#[test]
fn test_axis_iterators_tile_counts_and_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube(&dir, "cube.tif");
    let dataset = open_raster(&path).unwrap();

    let samples: Vec<_> = SampleInput::<u16>::new(&dataset)
        .unwrap()
        .map(|t| t.unwrap())
        .collect();
    assert_eq!(samples.len(), SAMPLES);
    assert!(samples.iter().all(|t| t.dim() == (BANDS, LINES)));

    let lines: Vec<_> = LineInput::<u16>::new(&dataset)
        .unwrap()
        .map(|t| t.unwrap())
        .collect();
    assert_eq!(lines.len(), LINES);
    assert!(lines.iter().all(|t| t.dim() == (BANDS, SAMPLES)));

    let bands: Vec<_> = BandInput::<u16>::new(&dataset)
        .unwrap()
        .map(|t| t.unwrap())
        .collect();
    assert_eq!(bands.len(), BANDS);
    assert!(bands.iter().all(|t| t.dim() == (LINES, SAMPLES)));
}

#[test]
fn test_line_iterator_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube(&dir, "cube.tif");
    let dataset = open_raster(&path).unwrap();

    for (y, tile) in LineInput::<u16>::new(&dataset).unwrap().enumerate() {
        let tile = tile.unwrap();
        for b in 0..BANDS {
            for x in 0..SAMPLES {
                assert_eq!(tile[[b, x]], dn(b, y, x), "line {y} band {b} sample {x}");
            }
        }
    }
}

#[test]
fn test_sample_iterator_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube(&dir, "cube.tif");
    let dataset = open_raster(&path).unwrap();

    for (x, tile) in SampleInput::<u16>::new(&dataset).unwrap().enumerate() {
        let tile = tile.unwrap();
        for b in 0..BANDS {
            for y in 0..LINES {
                assert_eq!(tile[[b, y]], dn(b, y, x), "sample {x} band {b} line {y}");
            }
        }
    }
}

#[test]
fn test_iterator_starts_midway() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube(&dir, "cube.tif");
    let dataset = open_raster(&path).unwrap();

    let mut it = LineInput::<u16>::with_start(&dataset, 2).unwrap();
    assert_eq!(it.position(), 2);
    let tile = it.next().unwrap().unwrap();
    assert_eq!(tile[[0, 0]], dn(0, 2, 0));
    assert_eq!(it.count(), 1);
}

#[test]
fn test_iterator_start_past_end_is_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube(&dir, "cube.tif");
    let dataset = open_raster(&path).unwrap();

    assert!(matches!(
        LineInput::<u16>::with_start(&dataset, LINES + 1),
        Err(HspError::OutOfRange { .. })
    ));
    // The sentinel position itself is fine and yields nothing.
    let mut end = LineInput::<u16>::with_start(&dataset, LINES).unwrap();
    assert!(end.next().is_none());
}

#[test]
fn test_copy_through_line_identity() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = write_cube(&dir, "src.tif");
    let dst_path = dir.path().join("dst.tif");

    let src = open_raster(&src_path).unwrap();
    let dst = create_raster::<u16, _>(&dst_path, SAMPLES, LINES, BANDS).unwrap();
    {
        let mut sink = LineOutput::<u16>::new(&dst).unwrap();
        for tile in LineInput::<u16>::new(&src).unwrap() {
            sink.write(&tile.unwrap()).unwrap();
        }
    }
    drop(dst);

    assert_eq!(read_cube(&src_path), read_cube(&dst_path));
    let reopened = open_raster(&dst_path).unwrap();
    assert_eq!(shape_of(&reopened), shape_of(&src));
}

#[test]
fn test_copy_through_band_identity() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = write_cube(&dir, "src.tif");
    let dst_path = dir.path().join("dst.tif");

    let src = open_raster(&src_path).unwrap();
    let dst = create_raster::<u16, _>(&dst_path, SAMPLES, LINES, BANDS).unwrap();
    {
        let mut sink = BandOutput::<u16>::new(&dst).unwrap();
        for tile in BandInput::<u16>::new(&src).unwrap() {
            sink.write(&tile.unwrap()).unwrap();
        }
    }
    drop(dst);

    assert_eq!(read_cube(&src_path), read_cube(&dst_path));
}

#[test]
fn test_output_iterator_past_end_is_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube(&dir, "cube.tif");
    let dataset = create_raster::<u16, _>(&dir.path().join("o.tif"), SAMPLES, 1, BANDS).unwrap();

    let mut sink = LineOutput::<u16>::new(&dataset).unwrap();
    let src = open_raster(&path).unwrap();
    let tile = LineInput::<u16>::new(&src).unwrap().next().unwrap().unwrap();
    sink.write(&tile).unwrap();
    assert!(matches!(
        sink.write(&tile),
        Err(HspError::OutOfRange { .. })
    ));
}

#[test]
fn test_output_iterator_rejects_wrong_shape() {
    let dir = tempfile::tempdir().unwrap();
    let dataset =
        create_raster::<u16, _>(&dir.path().join("o.tif"), SAMPLES, LINES, BANDS).unwrap();
    let mut sink = LineOutput::<u16>::new(&dataset).unwrap();
    let bad = Tile::from_elem((BANDS, SAMPLES + 1), 0u16);
    assert!(matches!(
        sink.write(&bad),
        Err(HspError::TypeMismatch(_))
    ));
}

#[test]
fn test_read_converts_element_type() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube(&dir, "cube.tif");
    let dataset = open_raster(&path).unwrap();

    let tile = LineInput::<f32>::new(&dataset)
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(tile[[2, 3]], dn(2, 0, 3) as f32);
}

#[test]
fn test_dark_then_nuc_over_line_stream() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = write_cube(&dir, "src.tif");
    let dst_path = dir.path().join("dst.tif");

    // dark = 1 everywhere, then gain 2 / offset 3: out = (v - 1) * 2 + 3.
    let ops = UnaryOpCombo::<u16>::new()
        .add(DarkBackgroundCorrection::from_tile(Tile::from_elem(
            (BANDS, SAMPLES),
            1u16,
        )))
        .add(
            NonUniformityCorrection::<u16, f32>::from_tiles(
                Tile::from_elem((BANDS, SAMPLES), 2.0f32),
                Tile::from_elem((BANDS, SAMPLES), 3.0f32),
            )
            .unwrap(),
        );

    let src = open_raster(&src_path).unwrap();
    let dst = create_raster::<u16, _>(&dst_path, SAMPLES, LINES, BANDS).unwrap();
    let tiles = LineInput::<u16>::new(&src).unwrap();
    let mut sink = LineOutput::<u16>::new(&dst).unwrap();
    let written = transform(tiles, &mut sink, &ops, None).unwrap();
    assert_eq!(written, LINES);
    drop(dst);

    let out = read_cube(&dst_path);
    for b in 0..BANDS {
        for y in 0..LINES {
            for x in 0..SAMPLES {
                let expected = (dn(b, y, x) - 1) * 2 + 3;
                assert_eq!(out[b][[y, x]], expected, "band {b} line {y} sample {x}");
            }
        }
    }
}

#[test]
fn test_degenerate_dataset_rejected() {
    // A raster with zero bands cannot back an iterator.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.tif");
    let dataset = create_raster::<u16, _>(&path, 4, 4, 0);
    // Some drivers refuse zero-band creation outright; either failure mode
    // is acceptable as long as no iterator is ever built.
    if let Ok(dataset) = dataset {
        assert!(matches!(
            LineInput::<u16>::new(&dataset),
            Err(HspError::InvalidArgument(_))
        ));
    }
}
