//! Storage engine micro-benchmarks.
//!
//! Covers the hot paths: attach/detach churn on a flat pool, range growth
//! (one rotate per call regardless of how many ranges follow), range sorting,
//! hierarchy insertion and subtree moves. Workloads are seeded so runs are
//! comparable.
//!
//! Run with: `cargo bench --bench ecs_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

use strata_ecs::element::rotate_block;
use strata_ecs::prelude::*;

#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Quad {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    depth: u32,
    color: u32,
}

fn quad(rng: &mut Pcg64Mcg) -> Quad {
    Quad {
        x: rng.gen_range(0.0..1920.0),
        y: rng.gen_range(0.0..1080.0),
        w: 16.0,
        h: 16.0,
        depth: rng.gen_range(0..1_000),
        color: rng.gen(),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A registry with `canvases` ranges of `per_canvas` quads each.
fn setup_canvases(canvases: usize, per_canvas: usize) -> (Registry, ComponentId, Vec<RangeId>) {
    let mut rng = Pcg64Mcg::seed_from_u64(7);
    let mut reg = Registry::new("bench");
    let c = reg.register_type::<Quad>("quad").unwrap();
    let ranges: Vec<RangeId> = (0..canvases).map(|_| reg.new_range(c).unwrap()).collect();
    for i in 0..canvases * per_canvas {
        let e = reg.create_entity().unwrap();
        reg.attach_to_range(ranges[i % canvases], e)
            .unwrap()
            .copy_from_slice(bytemuck::bytes_of(&quad(&mut rng)));
    }
    (reg, c, ranges)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_rotate_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("rotate_block");
    for &count in &[16usize, 1_024] {
        let mut data: Vec<u64> = (0..16_384).collect();
        group.bench_with_input(BenchmarkId::new("left", count), &count, |b, &count| {
            b.iter(|| rotate_block(black_box(data.as_mut_slice()), 100, 8_000, count));
        });
        group.bench_with_input(BenchmarkId::new("right", count), &count, |b, &count| {
            b.iter(|| rotate_block(black_box(data.as_mut_slice()), 8_000, 100, count));
        });
    }
    group.finish();
}

fn bench_attach_detach(c: &mut Criterion) {
    c.bench_function("attach_detach_10k", |b| {
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        let mut reg = Registry::new("bench");
        let q = reg.register_type::<Quad>("quad").unwrap();
        let entities: Vec<EntityId> = (0..10_000).map(|_| reg.create_entity().unwrap()).collect();
        for &e in &entities {
            reg.set(e, q, quad(&mut rng)).unwrap();
        }
        b.iter(|| {
            let e = entities[rng.gen_range(0..entities.len())];
            reg.detach(e, q).unwrap();
            reg.set(e, q, quad(&mut rng)).unwrap();
        });
    });
}

fn bench_grow_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("grow_first_range");
    for &canvases in &[4usize, 64] {
        group.bench_with_input(
            BenchmarkId::from_parameter(canvases),
            &canvases,
            |b, &canvases| {
                let (mut reg, q, ranges) = setup_canvases(canvases, 256);
                let mut rng = Pcg64Mcg::seed_from_u64(2);
                b.iter(|| {
                    let e = reg.create_entity().unwrap();
                    reg.set(e, q, quad(&mut rng)).unwrap();
                    reg.grow_range(ranges[0], 1).unwrap();
                    reg.shrink_range(ranges[0], 1).unwrap();
                    reg.destroy_entity(e).unwrap();
                });
            },
        );
    }
    group.finish();
}

fn bench_sort_range(c: &mut Criterion) {
    c.bench_function("sort_range_1k_by_depth", |b| {
        let (mut reg, _, ranges) = setup_canvases(8, 1_000);
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        b.iter(|| {
            let seed: u32 = rng.gen();
            reg.sort_range_as::<Quad, _>(ranges[3], |a, b| {
                (a.depth ^ seed).cmp(&(b.depth ^ seed))
            })
            .unwrap();
        });
    });
}

fn bench_hierarchy(c: &mut Criterion) {
    c.bench_function("hierarchy_build_1k", |b| {
        let mut rng = Pcg64Mcg::seed_from_u64(4);
        b.iter(|| {
            let mut reg = Registry::new("bench");
            let root = reg.create_entity().unwrap();
            let h = reg.new_hierarchy(root).unwrap();
            for n in 1..1_000usize {
                let e = reg.create_entity().unwrap();
                reg.insert(h, rng.gen_range(0..n), e).unwrap();
            }
            black_box(reg.hierarchy_store(Registry::DEFAULT_HIERARCHY).unwrap().node_count());
        });
    });

    c.bench_function("hierarchy_split_merge_1k", |b| {
        let mut rng = Pcg64Mcg::seed_from_u64(5);
        let mut reg = Registry::new("bench");
        let root = reg.create_entity().unwrap();
        let h = reg.new_hierarchy(root).unwrap();
        for n in 1..1_000usize {
            let e = reg.create_entity().unwrap();
            reg.insert(h, rng.gen_range(0..n), e).unwrap();
        }
        b.iter(|| {
            let index = rng.gen_range(1..1_000 / 2);
            let (split, _) = reg.reparent(h, index, None).unwrap();
            reg.reparent(split, 0, Some((h, 0))).unwrap();
        });
    });
}

// ---------------------------------------------------------------------------
// Criterion groups and main
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_rotate_block,
    bench_attach_detach,
    bench_grow_range,
    bench_sort_range,
    bench_hierarchy,
);
criterion_main!(benches);
