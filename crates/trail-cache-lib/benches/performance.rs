//! Performance benchmarks for trail-cache-lib
//!
//! Run with: cargo bench --package trail-cache-lib

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use geo::{Coord, Rect};
use std::sync::Arc;
use trail_cache_lib::{
    BoundsQuadtree, CellContent, Path, Trail, decode_cell, encode_cell, scan_entity_ids,
};

/// Small box around a deterministic pseudo-random position in the projected plane
fn generate_bounds(count: usize) -> Vec<Rect<f64>> {
    (0..count)
        .map(|i| {
            let t = i as f64 / count as f64;
            let x = (t * 977.0).sin() * 0.95;
            let y = (t * 613.0).cos() * 0.95;
            let size = 0.0005 + (t * 37.0).sin().abs() * 0.002;
            Rect::new(Coord { x, y }, Coord { x: x + size, y: y + size })
        })
        .collect()
}

/// A cell with `paths` polylines of `vertices` points and one trail per four paths
fn generate_cell(paths: usize, vertices: usize) -> CellContent {
    let paths: Vec<Arc<Path>> = (0..paths)
        .map(|p| {
            let base = p as f32 * 0.001;
            let coordinates = (0..vertices)
                .flat_map(|v| {
                    let t = v as f32 / vertices as f32;
                    [base + t * 0.01, base + (t * 20.0).sin() * 0.001]
                })
                .collect();
            Arc::new(Path::new(p as u64 * 2, 1, coordinates))
        })
        .collect();
    let trails = (0..paths.len() / 4)
        .map(|t| {
            Arc::new(Trail {
                id: t as u64,
                name: format!("Trail {t}"),
                trail_type: 0,
                path_refs: (0..4).map(|k| ((t * 4 + k) * 2) as i64).collect(),
                marker: Coord {
                    x: t as f64 * 0.004,
                    y: 0.0,
                },
                length_meters: 1000.0,
            })
        })
        .collect();
    CellContent { paths, trails }
}

// ============================================================================
// Core Benchmarks - Key performance indicators
// ============================================================================

fn bench_quadtree(c: &mut Criterion) {
    let mut group = c.benchmark_group("quadtree");

    for count in [1_000usize, 10_000] {
        let bounds = generate_bounds(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("insert", count), &bounds, |b, bounds| {
            b.iter(|| {
                let mut tree = BoundsQuadtree::world();
                for (i, bound) in bounds.iter().enumerate() {
                    tree.insert(i, *bound);
                }
                tree
            });
        });

        let mut tree = BoundsQuadtree::world();
        for (i, bound) in bounds.iter().enumerate() {
            tree.insert(i, *bound);
        }

        group.bench_function(BenchmarkId::new("query_circle", count), |b| {
            let mut found = Vec::new();
            b.iter(|| {
                found.clear();
                tree.query_circle(Coord { x: 0.1, y: -0.2 }, 0.05, &mut found);
                found.len()
            });
        });

        group.bench_function(BenchmarkId::new("query_rect", count), |b| {
            let rect = Rect::new(Coord { x: -0.2, y: -0.2 }, Coord { x: 0.2, y: 0.2 });
            let mut found = Vec::new();
            b.iter(|| {
                found.clear();
                tree.query_rect(rect, &mut found);
                found.len()
            });
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let bytes = encode_cell(&generate_cell(400, 200));
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("decode_cell_400x200", |b| {
        b.iter(|| decode_cell(&bytes).unwrap());
    });

    group.bench_function("scan_entity_ids_400x200", |b| {
        b.iter(|| scan_entity_ids(&bytes).unwrap());
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(benches, bench_quadtree, bench_decode);

criterion_main!(benches);
