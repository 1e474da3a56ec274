//! Point location in the parametric triangulation.
//!
//! A straight walk starts from a hint triangle (or one incident to the grid
//! neighbour of the query) and repeatedly crosses the first edge that has the
//! query on its outer side. The edge tested first rotates with the step
//! count, which keeps the walk from circling on degenerate configurations.
//! If the walk still fails to settle, or leaves the mesh through a boundary
//! (the meshed domain need not be convex), a linear scan decides.
//!
//! # References
//!
//! - O. Devillers, S. Pion, and M. Teillaud, "Walking in a Triangulation",
//!   International Journal of Foundations of Computer Science, 2001.

use crate::core::mesh_data::{EdgeKey, MeshData, MeshDataError, TriangleKey, VertexKey};
use crate::geometry::predicates::{Orientation, orientation};
use nalgebra::Point2;

/// Result of point location query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateResult {
    /// Point is strictly inside the triangle.
    InsideTriangle(TriangleKey),
    /// Point is on an edge, given with one triangle containing it.
    OnEdge(EdgeKey, TriangleKey),
    /// Point coincides with a vertex.
    OnVertex(VertexKey),
    /// Point is outside every triangle.
    Outside,
}

/// Error during point location.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LocateError {
    /// Mesh has no triangles.
    #[error("Cannot locate in an empty mesh")]
    EmptyMesh,

    /// Triangle reference is invalid.
    #[error("Invalid triangle reference: {triangle:?}")]
    InvalidTriangle {
        /// The invalid triangle key.
        triangle: TriangleKey,
    },

    /// Cycle detected during walking (numerical issues).
    #[error("Cycle detected after {steps} steps - possible numerical degeneracy")]
    CycleDetected {
        /// Number of steps before cycle detection.
        steps: usize,
    },

    /// The mesh structure is inconsistent.
    #[error(transparent)]
    Data(#[from] MeshDataError),
}

/// Where `point` falls relative to a single triangle.
enum Side {
    Inside,
    OnEdge(usize),
    OnCorner(usize),
    /// Outside, with the edges that see the point on their outer side.
    Beyond([bool; 3]),
}

fn classify(corners: &[Point2<f64>; 3], point: &Point2<f64>) -> Side {
    let mut outer = [false; 3];
    let mut degenerate = [false; 3];
    for i in 0..3 {
        match orientation(&corners[i], &corners[(i + 1) % 3], point) {
            Orientation::NEGATIVE => outer[i] = true,
            Orientation::DEGENERATE => degenerate[i] = true,
            Orientation::POSITIVE => {}
        }
    }
    if outer.iter().any(|&o| o) {
        return Side::Beyond(outer);
    }
    match degenerate.iter().filter(|&&d| d).count() {
        0 => Side::Inside,
        1 => Side::OnEdge(degenerate.iter().position(|&d| d).unwrap_or(0)),
        _ => {
            // Two collinear edges meet at their shared corner.
            let i = degenerate.iter().position(|&d| d).unwrap_or(0);
            let j = degenerate.iter().rposition(|&d| d).unwrap_or(0);
            if j == (i + 1) % 3 {
                Side::OnCorner(j)
            } else {
                Side::OnCorner(i)
            }
        }
    }
}

fn resolve(
    mesh: &MeshData,
    triangle: TriangleKey,
    side: &Side,
) -> Result<Option<LocateResult>, MeshDataError> {
    Ok(match *side {
        Side::Inside => Some(LocateResult::InsideTriangle(triangle)),
        Side::OnEdge(i) => Some(LocateResult::OnEdge(
            mesh.get_triangle(triangle)?.edges[i],
            triangle,
        )),
        Side::OnCorner(i) => Some(LocateResult::OnVertex(mesh.triangle_vertices(triangle)?[i])),
        Side::Beyond(_) => None,
    })
}

/// Walks from `start` towards `point`.
///
/// Returns [`LocateResult::Outside`] as soon as the walk would leave the
/// mesh, which for a non-convex mesh is not conclusive.
///
/// # Errors
///
/// Returns [`LocateError::CycleDetected`] if the walk exceeds one step per
/// triangle, and structural errors for stale keys.
pub fn locate_by_walk(
    mesh: &MeshData,
    point: &Point2<f64>,
    start: TriangleKey,
) -> Result<LocateResult, LocateError> {
    if mesh.triangle(start).is_none() {
        return Err(LocateError::InvalidTriangle { triangle: start });
    }
    let max_steps = mesh.number_of_triangles() + 1;
    let mut current = start;
    let mut previous: Option<TriangleKey> = None;
    for step in 0..max_steps {
        let corners = mesh.triangle_uv(current)?;
        let side = classify(&corners, point);
        if let Some(found) = resolve(mesh, current, &side)? {
            return Ok(found);
        }
        let Side::Beyond(outer) = side else {
            continue;
        };
        let triangle = mesh.get_triangle(current)?;
        let mut next = None;
        for k in 0..3 {
            let i = (step + k) % 3;
            if !outer[i] {
                continue;
            }
            match mesh.other_triangle(triangle.edges[i], current) {
                Some(t) if Some(t) != previous => {
                    next = Some(t);
                    break;
                }
                Some(_) => {}
                None => return Ok(LocateResult::Outside),
            }
        }
        // Only the way back crosses an outer edge: take it rather than stall.
        let Some(t) = next.or(previous) else {
            return Ok(LocateResult::Outside);
        };
        previous = Some(current);
        current = t;
    }
    Err(LocateError::CycleDetected { steps: max_steps })
}

/// Checks every triangle.
///
/// # Errors
///
/// Returns structural errors for stale keys.
pub fn locate_by_scan(mesh: &MeshData, point: &Point2<f64>) -> Result<LocateResult, LocateError> {
    for (key, _) in mesh.triangles() {
        let corners = mesh.triangle_uv(key)?;
        if let Some(found) = resolve(mesh, key, &classify(&corners, point))? {
            return Ok(found);
        }
    }
    Ok(LocateResult::Outside)
}

/// Locates `point`, starting from `hint` when given.
///
/// Without a hint the walk starts next to the closest vertex known to the
/// spatial grid, or from an arbitrary triangle.
///
/// # Errors
///
/// Returns [`LocateError::EmptyMesh`] if there are no triangles.
///
/// # Examples
///
/// ```rust
/// use facemesh::core::algorithms::locate::{locate, LocateResult};
/// use facemesh::core::mesh_data::MeshData;
/// use facemesh::core::vertex::{MeshVertex, Movability};
/// use nalgebra::{Point2, Point3};
///
/// let mut mesh = MeshData::default();
/// let mut add = |u, v| mesh.add_vertex(MeshVertex::new(Point2::new(u, v), Point3::origin(), Movability::Free));
/// let (a, b, c) = (add(0.0, 0.0), add(1.0, 0.0), add(0.0, 1.0));
/// let ab = mesh.add_edge(a, b, Movability::Free).unwrap();
/// let bc = mesh.add_edge(b, c, Movability::Free).unwrap();
/// let ca = mesh.add_edge(c, a, Movability::Free).unwrap();
/// let t = mesh.add_triangle([ab, bc, ca]).unwrap();
///
/// assert_eq!(locate(&mesh, &Point2::new(0.2, 0.2), None).unwrap(), LocateResult::InsideTriangle(t));
/// assert_eq!(locate(&mesh, &Point2::new(2.0, 2.0), None).unwrap(), LocateResult::Outside);
/// ```
pub fn locate(
    mesh: &MeshData,
    point: &Point2<f64>,
    hint: Option<TriangleKey>,
) -> Result<LocateResult, LocateError> {
    let start = hint
        .filter(|t| mesh.triangle(*t).is_some())
        .or_else(|| {
            mesh.nearest_vertex(point)
                .and_then(|v| mesh.triangles_around(v).first().copied())
        })
        .or_else(|| mesh.triangles().next().map(|(k, _)| k))
        .ok_or(LocateError::EmptyMesh)?;

    match locate_by_walk(mesh, point, start) {
        Ok(LocateResult::Outside) | Err(LocateError::CycleDetected { .. }) => {
            locate_by_scan(mesh, point)
        }
        other => other,
    }
}
