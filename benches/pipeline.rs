use std::fs;
use std::io::Write;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use hypercal::core::{DefectivePixelCorrectionIdw, GaussianFilter, UnaryOp};
use hypercal::io::ahsi::LEADING_BYTES;
use hypercal::types::Tile;
use hypercal::AhsiData;

const SAMPLES: usize = 2048;
const BANDS: usize = 150;

fn vnir_tile() -> Tile<u16> {
    Tile::from_shape_fn((BANDS, SAMPLES), |(b, x)| ((b * 7 + x * 13) % 4096) as u16)
}

/// Mask with a defect every 97th cell plus one three-long run.
fn sparse_mask() -> Tile<u8> {
    let mut mask = Tile::from_elem((BANDS, SAMPLES), 0u8);
    for i in (0..BANDS * SAMPLES).step_by(97) {
        mask[[i / SAMPLES, i % SAMPLES]] = 1;
    }
    for x in 100..103 {
        mask[[40, x]] = 1;
    }
    mask
}

fn bench_idw_repair(c: &mut Criterion) {
    let idw = DefectivePixelCorrectionIdw::from_mask(sparse_mask());
    let tile = vnir_tile();
    c.bench_function("idw_repair_vnir_line", |b| {
        b.iter(|| idw.apply(black_box(tile.clone())).unwrap())
    });
}

fn bench_gaussian(c: &mut Criterion) {
    let tile = vnir_tile();
    c.bench_function("gaussian_3x3_vnir_line", |b| {
        b.iter(|| GaussianFilter.apply(black_box(tile.clone())).unwrap())
    });
}

fn bench_decode_frame(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.dat");
    let samples = 512usize;
    let mut file = fs::File::create(&path).unwrap();
    for frame in 0..4u32 {
        file.write_all(&[0u8; 8]).unwrap();
        for band in 0..BANDS {
            let mut sub = [0u8; 12];
            if band == 0 {
                sub[0..4].copy_from_slice(&LEADING_BYTES);
                sub[4..6].copy_from_slice(&(samples as u16).to_be_bytes());
                sub[6] = (2 << 4) | 0x07;
                let seq = frame.to_be_bytes();
                sub[9..12].copy_from_slice(&seq[1..4]);
            }
            file.write_all(&sub).unwrap();
            for x in 0..samples {
                file.write_all(&((x % 4096) as u16).to_le_bytes()).unwrap();
            }
        }
    }
    drop(file);

    let mut raw = AhsiData::new(&path).unwrap();
    raw.traverse().unwrap();
    c.bench_function("decode_vnir_frame", |b| {
        b.iter(|| raw.frame(black_box(2)).unwrap())
    });
}

criterion_group!(benches, bench_idw_repair, bench_gaussian, bench_decode_frame);
criterion_main!(benches);
