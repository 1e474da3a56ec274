//! Brute-force checks of the triangulation invariants.
//!
//! These scans are quadratic and meant for tests and debugging, not for the
//! meshing hot path.

use thiserror::Error;

use crate::core::mesh_data::{EdgeKey, MeshData, MeshDataError, TriangleKey, VertexKey};
use crate::geometry::predicates::{InCircle, in_circle, orient2d};

/// Invariant violations found by the validators.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MeshValidationError {
    /// A vertex lies strictly inside the circumcircle of a triangle.
    #[error("Triangle {triangle:?} has vertex {vertex:?} inside its circumcircle")]
    DelaunayViolation {
        /// The offending triangle.
        triangle: TriangleKey,
        /// The vertex inside its circumcircle.
        vertex: VertexKey,
    },
    /// A free interior edge fails the local empty-circle test.
    #[error("Edge {edge:?} is not locally Delaunay")]
    NonDelaunayEdge {
        /// The offending edge.
        edge: EdgeKey,
    },
    /// The edges of a triangle do not chain end to start.
    #[error("Triangle {triangle:?} edges do not form a cycle")]
    BrokenCycle {
        /// The offending triangle.
        triangle: TriangleKey,
    },
    /// A triangle is clockwise or flat in parameter space.
    #[error("Triangle {triangle:?} is not counter-clockwise")]
    InvertedTriangle {
        /// The offending triangle.
        triangle: TriangleKey,
    },
    /// An edge borders the wrong number of triangles.
    #[error("Edge {edge:?} borders {count} triangle(s), expected {expected}")]
    EdgeTriangleCount {
        /// The offending edge.
        edge: EdgeKey,
        /// Triangles found.
        count: usize,
        /// Triangles expected for its movability.
        expected: usize,
    },
    /// Underlying structural error.
    #[error(transparent)]
    Data(#[from] MeshDataError),
}

/// Triangles having some other vertex strictly inside their circumcircle.
///
/// This is the unconstrained criterion, exact for convex domains without
/// interior constraints. Vertices connected to no edge are ignored.
///
/// # Errors
///
/// Fails on stale keys.
pub fn find_delaunay_violations(
    mesh: &MeshData,
) -> Result<Vec<(TriangleKey, VertexKey)>, MeshDataError> {
    let connected: Vec<(VertexKey, _)> = mesh
        .vertices()
        .filter(|(k, _)| !mesh.edges_of(*k).is_empty())
        .map(|(k, v)| (k, v.uv))
        .collect();
    let mut violations = Vec::new();
    for (t, _) in mesh.triangles() {
        let corners = mesh.triangle_vertices(t)?;
        let [a, b, c] = mesh.triangle_uv(t)?;
        for (k, uv) in &connected {
            if corners.contains(k) {
                continue;
            }
            if in_circle(&a, &b, &c, uv) == InCircle::INSIDE {
                violations.push((t, *k));
                break;
            }
        }
    }
    Ok(violations)
}

/// Fails on the first triangle found by [`find_delaunay_violations`].
///
/// # Errors
///
/// Returns [`MeshValidationError::DelaunayViolation`] or a structural error.
pub fn is_delaunay(mesh: &MeshData) -> Result<(), MeshValidationError> {
    match find_delaunay_violations(mesh)?.first() {
        Some(&(triangle, vertex)) => Err(MeshValidationError::DelaunayViolation { triangle, vertex }),
        None => Ok(()),
    }
}

/// Constrained criterion: every free interior edge is locally Delaunay.
///
/// # Errors
///
/// Returns [`MeshValidationError::NonDelaunayEdge`] or a structural error.
pub fn is_locally_delaunay(mesh: &MeshData) -> Result<(), MeshValidationError> {
    for (e, edge) in mesh.edges() {
        let triangles = mesh.triangles_of(e);
        if edge.movability.is_constrained() || triangles.len() != 2 {
            continue;
        }
        let [a, b, c] = mesh.triangle_uv(triangles[0])?;
        let d = mesh.uv(mesh.opposite_vertex(triangles[1], e)?)?;
        if in_circle(&a, &b, &c, &d) == InCircle::INSIDE {
            return Err(MeshValidationError::NonDelaunayEdge { edge: e });
        }
    }
    Ok(())
}

/// Checks triangle cycles, orientation, and edge/triangle incidence.
///
/// Frontier edges must border one triangle and every other edge two.
///
/// # Errors
///
/// Returns the first violation found.
pub fn validate_structure(mesh: &MeshData) -> Result<(), MeshValidationError> {
    for (t, triangle) in mesh.triangles() {
        for i in 0..3 {
            let here = mesh.get_edge(triangle.edges[i])?;
            let next = mesh.get_edge(triangle.edges[(i + 1) % 3])?;
            if here.end(triangle.orientations[i]) != next.start(triangle.orientations[(i + 1) % 3]) {
                return Err(MeshValidationError::BrokenCycle { triangle: t });
            }
        }
        let [a, b, c] = mesh.triangle_uv(t)?;
        if orient2d(&a, &b, &c) <= 0.0 {
            return Err(MeshValidationError::InvertedTriangle { triangle: t });
        }
    }
    for (e, edge) in mesh.edges() {
        let count = mesh.triangles_of(e).len();
        let expected = if edge.is_frontier() { 1 } else { 2 };
        if count != expected {
            return Err(MeshValidationError::EdgeTriangleCount {
                edge: e,
                count,
                expected,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vertex::{MeshVertex, Movability};
    use nalgebra::{Point2, Point3};

    fn kite(diagonal: Movability) -> MeshData {
        let mut mesh = MeshData::default();
        let v = [(0.0, 0.0), (1.0, -0.2), (2.0, 0.0), (1.0, 0.2)].map(|(u, w)| {
            mesh.add_vertex(MeshVertex::new(Point2::new(u, w), Point3::origin(), Movability::Frontier))
        });
        let sides: Vec<_> = (0..4)
            .map(|i| mesh.add_edge(v[i], v[(i + 1) % 4], Movability::Frontier).unwrap())
            .collect();
        let d = mesh.add_edge(v[0], v[2], diagonal).unwrap();
        mesh.add_triangle([sides[0], sides[1], d]).unwrap();
        mesh.add_triangle([d, sides[2], sides[3]]).unwrap();
        mesh
    }

    #[test]
    fn test_long_kite_diagonal_is_reported() {
        let mesh = kite(Movability::Free);
        assert!(validate_structure(&mesh).is_ok());
        assert_eq!(find_delaunay_violations(&mesh).unwrap().len(), 2);
        assert!(matches!(
            is_locally_delaunay(&mesh),
            Err(MeshValidationError::NonDelaunayEdge { .. })
        ));
    }

    #[test]
    fn test_constrained_diagonal_is_locally_fine() {
        let mesh = kite(Movability::Fixed);
        assert!(is_locally_delaunay(&mesh).is_ok());
        assert!(is_delaunay(&mesh).is_err());
    }

    #[test]
    fn test_dangling_edge_is_reported() {
        let mut mesh = kite(Movability::Free);
        let a = mesh.add_vertex(MeshVertex::new(Point2::new(5.0, 5.0), Point3::origin(), Movability::Free));
        let b = mesh.add_vertex(MeshVertex::new(Point2::new(6.0, 5.0), Point3::origin(), Movability::Free));
        mesh.add_edge(a, b, Movability::Free).unwrap();
        assert!(matches!(
            validate_structure(&mesh),
            Err(MeshValidationError::EdgeTriangleCount { count: 0, expected: 2, .. })
        ));
    }
}
