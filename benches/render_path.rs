//! Benchmarks for the per-rank render path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use volvis_rs::pipeline::CellId;
use volvis_rs::render::extract::footprint;
use volvis_rs::render::{CellList, ImagePartition, Primitive, Volume};
use volvis_rs::types::CellKind;

const IMAGE: usize = 256;
const DEPTH: usize = 64;
const NVARS: usize = 2;

/// Random small tetrahedra scattered over the image.
fn random_cells(count: usize) -> CellList {
    let mut rng = StdRng::seed_from_u64(7);
    let mut list = CellList::with_capacity(NVARS, count);
    let mut i = 0u32;
    while list.len() < count {
        let base = DVec3::new(
            rng.gen_range(0.0..IMAGE as f64 - 16.0),
            rng.gen_range(0.0..IMAGE as f64 - 16.0),
            rng.gen_range(0.0..DEPTH as f64 - 8.0),
        );
        let vertices: Vec<DVec3> = (0..4)
            .map(|_| {
                base + DVec3::new(
                    rng.gen_range(0.0..16.0),
                    rng.gen_range(0.0..16.0),
                    rng.gen_range(0.0..8.0),
                )
            })
            .collect();
        let values: Vec<f64> = (0..4 * NVARS).map(|_| rng.gen_range(0.0..1.0)).collect();
        i += 1;
        let Some(fp) = footprint(CellKind::Tetrahedron, &vertices, IMAGE, IMAGE) else {
            continue;
        };
        let primitive = Primitive::new(CellKind::Tetrahedron, CellId::new(0, i), vertices, values, NVARS);
        if list.store(&primitive, fp.minx, fp.maxx, fp.miny, fp.maxy).is_err() {
            continue;
        }
    }
    list
}

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell_list_wire");

    for size in [1_000, 10_000].iter() {
        let list = random_cells(*size);
        let message = list.serialize();

        group.throughput(Throughput::Bytes(message.len() as u64));
        group.bench_with_input(BenchmarkId::new("serialize", size), &list, |b, list| {
            b.iter(|| black_box(list.serialize()));
        });
        group.bench_with_input(
            BenchmarkId::new("unserialize_restricted", size),
            &message,
            |b, message| {
                let messages = vec![message.clone()];
                b.iter(|| {
                    let mut strip = CellList::new(NVARS);
                    strip.restrict(0, IMAGE as i32 - 1, 64, 127);
                    black_box(strip.unserialize_messages(&messages).ok())
                });
            },
        );
    }

    group.finish();
}

fn bench_rasterize(c: &mut Criterion) {
    let mut group = c.benchmark_group("rasterize");
    group.sample_size(20);

    for size in [500, 5_000].iter() {
        let list = random_cells(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("full_image", size), &list, |b, list| {
            b.iter(|| {
                let mut volume = Volume::new(IMAGE, 0..IMAGE, DEPTH, NVARS);
                let _ = list.rasterize_into(&mut volume);
                black_box(volume.valid_samples())
            });
        });
    }

    group.finish();
}

fn bench_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("image_partition");

    let list = random_cells(10_000);
    let mut per_row = vec![0u64; IMAGE];
    list.estimate_number_of_samples_per_scanline(&mut per_row);

    group.bench_function("estimate_samples_per_scanline", |b| {
        b.iter(|| {
            let mut counts = vec![0u64; IMAGE];
            list.estimate_number_of_samples_per_scanline(&mut counts);
            black_box(counts)
        });
    });

    for ranks in [4, 64].iter() {
        group.bench_with_input(BenchmarkId::new("balanced", ranks), ranks, |b, &ranks| {
            b.iter(|| black_box(ImagePartition::balanced(&per_row, ranks)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_serialize, bench_rasterize, bench_partition);

criterion_main!(benches);
