use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use terratile::raster::Raster;
use terratile::resample::{reduce_2to1, scaled};
use terratile::tiling::TilePlan;

fn plan_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tile_plan");

    for (w, h) in [(1000usize, 1000usize), (4096, 4096), (10_000, 7_500)] {
        group.bench_function(format!("build_{w}x{h}"), |b| {
            b.iter(|| {
                let plan =
                    TilePlan::build(black_box(w), black_box(h), 513, 65, 4097).unwrap();
                black_box(plan.tile_count())
            });
        });
    }

    group.finish();
}

fn resample_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");
    group.sample_size(20);

    let mut src = Raster::<f32>::new(1024, 1024);
    for y in 0..1024 {
        for x in 0..1024 {
            src.set(x, y, (x ^ y) as f32);
        }
    }

    group.bench_function("reduce_2to1_1024", |b| {
        b.iter(|| black_box(reduce_2to1(black_box(&src))));
    });

    group.bench_function("bilinear_up_513_to_1025", |b| {
        let small = src.crop(terratile::raster::Rect::new(0, 0, 513, 513)).unwrap();
        b.iter(|| black_box(scaled(black_box(small.clone()), 1025, 1025)));
    });

    group.bench_function("bilinear_down_1024_to_700", |b| {
        b.iter(|| black_box(scaled(black_box(src.clone()), 700, 700)));
    });

    group.finish();
}

criterion_group!(benches, plan_benchmark, resample_benchmark);
criterion_main!(benches);
