//! Benchmarks for page squeezing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rewiring::{PageSqueezer, SlotSet, SLOTS_PER_PAGE};

fn sparse_input(pages: usize, slots_per_page: usize, seed: u64) -> Vec<(u8, SlotSet)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..pages)
        .map(|p| {
            let set = (0..slots_per_page)
                .map(|_| rng.gen_range(0..SLOTS_PER_PAGE))
                .collect();
            ((p as u8) << 1, set)
        })
        .collect()
}

fn bench_squeeze(c: &mut Criterion) {
    let mut group = c.benchmark_group("squeeze");

    for density in [4, 32, 128] {
        let input = sparse_input(128, density, 42);
        group.bench_with_input(BenchmarkId::new("128_pages", density), &input, |b, input| {
            b.iter(|| {
                let mut sq = PageSqueezer::new();
                sq.squeeze_all(input.iter().map(|(p, s)| (*p, s))).unwrap();
                black_box(sq.finish())
            });
        });
    }

    group.finish();
}

fn bench_rotate(c: &mut Criterion) {
    let set: SlotSet = sparse_input(1, 64, 7)[0].1;
    c.bench_function("rotate_left_1", |b| b.iter(|| black_box(set).rotate_left(1)));
}

criterion_group!(benches, bench_squeeze, bench_rotate);
criterion_main!(benches);
