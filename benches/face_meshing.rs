//! Face meshing benchmarks.
//!
//! 1. Base triangulation of a unit square with random interior points
//! 2. Full pipeline on analytic faces at decreasing deflections
//!
//! Run with `cargo bench --bench face_meshing`.

#![allow(missing_docs)]

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};
use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use facemesh::prelude::*;
use nalgebra::{Point2, Point3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const COUNTS: &[usize] = &[50, 200, 1000];
const DEFLECTIONS: &[f64] = &[0.05, 0.01, 0.002];

fn random_square(count: usize, seed: u64) -> MeshData {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut mesh = MeshData::new([1e-9, 1e-9], [1.4e-8, 1.4e-8]);
    for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
        mesh.add_vertex(MeshVertex::new(Point2::new(u, v), Point3::origin(), Movability::Frontier));
    }
    for _ in 0..count {
        let uv = Point2::new(rng.random_range(0.01..0.99), rng.random_range(0.01..0.99));
        mesh.add_vertex(MeshVertex::new(uv, Point3::origin(), Movability::Free));
    }
    mesh
}

fn bench_base_triangulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("base_triangulation");
    for &count in COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("unit_square", count), &count, |b, &count| {
            b.iter_batched(
                || random_square(count, 0xFACE),
                |mesh| {
                    let outer = mesh.vertex_keys()[..4].to_vec();
                    let mut delaunay = Delaunay::new(mesh);
                    delaunay.build_boundary(&[outer], &[]).ok();
                    black_box(delaunay.triangulate().ok());
                    delaunay
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_faces(c: &mut Criterion) {
    let faces = [
        (
            "cylinder",
            Face::rectangle(Arc::new(Cylinder::new(Frame::default(), 1.0)), [0.0, PI], [0.0, 2.0]),
        ),
        (
            "sphere",
            Face::rectangle(
                Arc::new(Sphere::new(Frame::default(), 1.0)),
                [0.0, FRAC_PI_2],
                [-FRAC_PI_4, FRAC_PI_4],
            ),
        ),
        (
            "torus",
            Face::rectangle(
                Arc::new(Torus::new(Frame::default(), 3.0, 1.0)),
                [0.0, FRAC_PI_2],
                [0.0, PI],
            ),
        ),
    ];

    let mut group = c.benchmark_group("face_meshing");
    group.sample_size(20);
    for (name, face) in &faces {
        for &deflection in DEFLECTIONS {
            let params = MeshParametersBuilder::default()
                .linear_deflection(deflection)
                .build()
                .unwrap_or_default();
            group.bench_with_input(BenchmarkId::new(*name, deflection), &params, |b, params| {
                b.iter(|| black_box(FastDiscretFace::new(params).add(face).ok()));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_base_triangulation, bench_faces);
criterion_main!(benches);
