//! Property-based tests of the constrained Delaunay core.
//!
//! - Empty circumcircle after bulk insertion into a convex domain
//! - Triangle/edge cyclic consistency and frontier incidence
//! - Area conservation through insertion and removal

use approx::assert_relative_eq;
use facemesh::core::algorithms::delaunay::{CANCELLATION_CHUNK, Delaunay, DelaunayState};
use facemesh::core::mesh_data::{MeshData, VertexKey};
use facemesh::core::progress::{Progress, ProgressRange};
use facemesh::core::util::mesh_validation::{
    find_delaunay_violations, is_locally_delaunay, validate_structure,
};
use facemesh::core::vertex::{MeshVertex, Movability};
use facemesh::geometry::predicates::orient2d;
use nalgebra::{Point2, Point3};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// =============================================================================
// HELPERS
// =============================================================================

fn interior_point() -> impl Strategy<Value = (f64, f64)> {
    (0.05..0.95_f64, 0.05..0.95_f64)
}

/// Drops points closer than `min_gap` to an earlier one.
fn spread(points: Vec<(f64, f64)>, min_gap: f64) -> Vec<(f64, f64)> {
    let mut kept: Vec<(f64, f64)> = Vec::with_capacity(points.len());
    for p in points {
        if kept.iter().all(|q| (p.0 - q.0).hypot(p.1 - q.1) >= min_gap) {
            kept.push(p);
        }
    }
    kept
}

fn add(mesh: &mut MeshData, (u, v): (f64, f64), movability: Movability) -> VertexKey {
    mesh.add_vertex(MeshVertex::new(Point2::new(u, v), Point3::origin(), movability))
}

fn unit_square(interior: &[(f64, f64)]) -> Delaunay {
    let mut mesh = MeshData::new([1e-9, 1e-9], [0.125, 0.125]);
    let outer: Vec<_> = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
        .into_iter()
        .map(|p| add(&mut mesh, p, Movability::Frontier))
        .collect();
    for &p in interior {
        add(&mut mesh, p, Movability::Free);
    }
    let mut delaunay = Delaunay::new(mesh);
    delaunay.build_boundary(&[outer], &[]).unwrap();
    delaunay.triangulate().unwrap();
    delaunay
}

fn area(mesh: &MeshData) -> f64 {
    mesh.triangles()
        .map(|(t, _)| {
            let [a, b, c] = mesh.triangle_uv(t).unwrap();
            0.5 * orient2d(&a, &b, &c)
        })
        .sum()
}

// =============================================================================
// FIXED SEED
// =============================================================================

#[test]
fn twenty_random_points_in_unit_square_are_delaunay() {
    let mut rng = StdRng::seed_from_u64(42);
    let points: Vec<_> = (0..20)
        .map(|_| (rng.random_range(0.05..0.95), rng.random_range(0.05..0.95)))
        .collect();
    let delaunay = unit_square(&spread(points, 1e-3));
    let mesh = delaunay.finalize().unwrap();
    assert!(find_delaunay_violations(&mesh).unwrap().is_empty());
    validate_structure(&mesh).unwrap();
    assert_relative_eq!(area(&mesh), 1.0, epsilon = 1e-12);
}

#[test]
fn incremental_insertion_matches_euler_count() {
    let mut delaunay = unit_square(&[]);
    let mut rng = StdRng::seed_from_u64(2024);
    let points = spread(
        (0..40)
            .map(|_| (rng.random_range(0.05..0.95), rng.random_range(0.05..0.95)))
            .collect(),
        1e-3,
    );
    let keys: Vec<_> = points
        .iter()
        .map(|&p| add(delaunay.mesh_mut(), p, Movability::Free))
        .collect();
    let stats = delaunay.add_vertices(&keys, &ProgressRange::new()).unwrap();
    assert_eq!(stats.inserted, keys.len());
    assert_eq!(delaunay.state(), DelaunayState::NodesInserted);

    // A triangulated convex polygon with b boundary and i interior vertices
    // has 2i + b - 2 triangles.
    let mesh = delaunay.mesh();
    assert_eq!(mesh.number_of_triangles(), 2 * keys.len() + 4 - 2);
    is_locally_delaunay(mesh).unwrap();
    validate_structure(mesh).unwrap();
}

#[test]
fn cancellation_stops_at_the_next_chunk_boundary() {
    let mut delaunay = unit_square(&[]);
    let mut rng = StdRng::seed_from_u64(99);
    let points = spread(
        (0..400)
            .map(|_| (rng.random_range(0.05..0.95), rng.random_range(0.05..0.95)))
            .collect(),
        1e-3,
    );
    assert!(points.len() > 3 * CANCELLATION_CHUNK);
    let keys: Vec<_> = points
        .iter()
        .map(|&p| add(delaunay.mesh_mut(), p, Movability::Free))
        .collect();

    // Cancel from the report issued at the first chunk boundary.
    let token = ProgressRange::new();
    let handle = token.clone();
    let progress = token.with_progress(Progress::new(move |current, _, _| {
        if current >= CANCELLATION_CHUNK {
            handle.cancel();
        }
    }));
    let stats = delaunay.add_vertices(&keys, &progress).unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.inserted, 2 * CANCELLATION_CHUNK);
    let mesh = delaunay.mesh();
    assert_eq!(mesh.number_of_vertices(), 4 + 2 * CANCELLATION_CHUNK);
    assert_eq!(mesh.number_of_triangles(), 2 * (2 * CANCELLATION_CHUNK) + 2);
    validate_structure(mesh).unwrap();
    is_locally_delaunay(mesh).unwrap();
    assert_relative_eq!(area(mesh), 1.0, epsilon = 1e-12);
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_base_triangulation_is_delaunay(points in prop::collection::vec(interior_point(), 1..25)) {
        let mesh = unit_square(&spread(points, 1e-3)).finalize().unwrap();
        prop_assert!(find_delaunay_violations(&mesh).unwrap().is_empty());
        prop_assert!(validate_structure(&mesh).is_ok());
        prop_assert!((area(&mesh) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn prop_every_triangle_is_a_cycle(points in prop::collection::vec(interior_point(), 1..25)) {
        let delaunay = unit_square(&spread(points, 1e-3));
        let mesh = delaunay.mesh();
        for (t, triangle) in mesh.triangles() {
            let corners = mesh.triangle_vertices(t).unwrap();
            prop_assert!(corners[0] != corners[1] && corners[1] != corners[2] && corners[0] != corners[2]);
            for e in triangle.edges {
                let edge = mesh.get_edge(e).unwrap();
                prop_assert!(corners.contains(&edge.first) && corners.contains(&edge.last));
                let expected = if edge.is_frontier() { 1 } else { 2 };
                prop_assert_eq!(mesh.triangles_of(e).len(), expected);
            }
        }
    }

    #[test]
    fn prop_removing_free_vertices_conserves_area(
        points in prop::collection::vec(interior_point(), 2..15),
    ) {
        let points = spread(points, 1e-2);
        let mut delaunay = unit_square(&[]);
        let keys: Vec<_> = points
            .iter()
            .map(|&p| add(delaunay.mesh_mut(), p, Movability::Free))
            .collect();
        delaunay.add_vertices(&keys, &ProgressRange::new()).unwrap();
        let half = keys.len() / 2;
        for &key in &keys[..half] {
            prop_assert!(delaunay.remove_vertex(key).unwrap());
        }
        let mesh = delaunay.mesh();
        prop_assert!((area(mesh) - 1.0).abs() < 1e-9);
        prop_assert!(validate_structure(mesh).is_ok());
        prop_assert_eq!(mesh.number_of_triangles(), 2 * (keys.len() - half) + 2);
    }
}
