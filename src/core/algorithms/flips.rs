//! Edge flips: Lawson legalization and constrained edge recovery.
//!
//! A flip replaces the diagonal `a-b` of the convex quadrilateral formed by
//! two adjacent triangles `(a, b, c)` and `(b, a, d)` with the diagonal `c-d`.
//! Only [`Movability::Free`] edges are ever flipped.
//!
//! - [`legalize`] restores the empty-circumcircle property around a set of
//!   seed edges.
//! - [`recover_frontier_edge`] forces a boundary segment into the mesh by
//!   flipping the edges that cross it (Sloan's method).
//!
//! Set `FACEMESH_FLIP_TRACE` to log every flip at debug level.
//!
//! # References
//!
//! - C. L. Lawson, "Software for C1 surface interpolation", 1977.
//! - S. W. Sloan, "A fast algorithm for generating constrained Delaunay
//!   triangulations", Computers & Structures, 1993.

use std::collections::VecDeque;

use thiserror::Error;

use crate::core::collections::FastHashSet;
use crate::core::mesh_data::{EdgeKey, MeshData, MeshDataError, TriangleKey, VertexKey};
use crate::core::vertex::Movability;
use crate::geometry::geom_tool::{IntersectionType, int_seg_seg};
use crate::geometry::predicates::{InCircle, Orientation, in_circle, min_angle, orientation};
use nalgebra::Point2;

/// Minimum gain in smallest angle (radians) for flipping a co-circular pair.
pub const COCIRCULAR_ANGLE_GAIN: f64 = 1e-12;

/// Errors raised by a single flip.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlipError {
    /// The edge is constrained and must not be flipped.
    #[error("Edge {edge:?} is constrained ({movability}) and cannot be flipped")]
    ConstrainedEdge {
        /// Edge key.
        edge: EdgeKey,
        /// Its constraint tag.
        movability: Movability,
    },
    /// The edge does not border two triangles.
    #[error("Edge {edge:?} borders {count} triangle(s); a flip needs two")]
    NotInterior {
        /// Edge key.
        edge: EdgeKey,
        /// Number of bordering triangles.
        count: usize,
    },
    /// The two triangles do not form a strictly convex quadrilateral.
    #[error("Quadrilateral around edge {edge:?} is not strictly convex")]
    NonConvexQuad {
        /// Edge key.
        edge: EdgeKey,
    },
    /// Underlying structural error.
    #[error(transparent)]
    Data(#[from] MeshDataError),
}

/// Statistics from a legalization or recovery run.
///
/// # Examples
///
/// ```rust
/// use facemesh::core::algorithms::flips::LegalizeStats;
///
/// let stats = LegalizeStats::default();
/// assert_eq!(stats.flips_performed, 0);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegalizeStats {
    /// Number of queued edges examined.
    pub edges_checked: usize,
    /// Number of flips performed.
    pub flips_performed: usize,
    /// Maximum queue length observed.
    pub max_queue_len: usize,
}

fn flip_trace_enabled() -> bool {
    std::env::var_os("FACEMESH_FLIP_TRACE").is_some()
}

/// The quadrilateral around an interior edge.
#[derive(Debug, Clone, Copy)]
struct Quad {
    a: VertexKey,
    b: VertexKey,
    /// Apex of the first triangle.
    c: VertexKey,
    /// Apex of the second triangle.
    d: VertexKey,
    t1: TriangleKey,
    t2: TriangleKey,
}

fn quad_of(mesh: &MeshData, edge: EdgeKey) -> Result<Quad, FlipError> {
    let e = *mesh.get_edge(edge)?;
    let tris = mesh.triangles_of(edge);
    if tris.len() != 2 {
        return Err(FlipError::NotInterior {
            edge,
            count: tris.len(),
        });
    }
    let (t1, t2) = (tris[0], tris[1]);
    Ok(Quad {
        a: e.first,
        b: e.last,
        c: mesh.opposite_vertex(t1, edge)?,
        d: mesh.opposite_vertex(t2, edge)?,
        t1,
        t2,
    })
}

fn opposite_sides(first: Orientation, second: Orientation) -> bool {
    matches!(
        (first, second),
        (Orientation::POSITIVE, Orientation::NEGATIVE) | (Orientation::NEGATIVE, Orientation::POSITIVE)
    )
}

/// Diagonals `a-b` and `c-d` cross at an interior point of both.
fn strictly_convex(pa: &Point2<f64>, pb: &Point2<f64>, pc: &Point2<f64>, pd: &Point2<f64>) -> bool {
    opposite_sides(orientation(pc, pd, pa), orientation(pc, pd, pb))
        && opposite_sides(orientation(pa, pb, pc), orientation(pa, pb, pd))
}

/// Replaces `edge` by the other diagonal of its quadrilateral.
///
/// Returns the key of the new diagonal. The structure is untouched on error.
///
/// # Errors
///
/// Fails for constrained edges, boundary edges and non-convex quadrilaterals.
pub fn flip_edge(mesh: &mut MeshData, edge: EdgeKey) -> Result<EdgeKey, FlipError> {
    let movability = mesh.get_edge(edge)?.movability;
    if movability.is_constrained() {
        return Err(FlipError::ConstrainedEdge { edge, movability });
    }
    let q = quad_of(mesh, edge)?;
    let (pa, pb, pc, pd) = (mesh.uv(q.a)?, mesh.uv(q.b)?, mesh.uv(q.c)?, mesh.uv(q.d)?);
    if q.c == q.d || !strictly_convex(&pa, &pb, &pc, &pd) || mesh.find_edge(q.c, q.d).is_some() {
        return Err(FlipError::NonConvexQuad { edge });
    }
    let missing = || MeshDataError::InconsistentDataStructure {
        message: format!("quadrilateral side missing around edge {edge:?}"),
    };
    let ac = mesh.find_edge(q.a, q.c).ok_or_else(missing)?;
    let cb = mesh.find_edge(q.c, q.b).ok_or_else(missing)?;
    let bd = mesh.find_edge(q.b, q.d).ok_or_else(missing)?;
    let da = mesh.find_edge(q.d, q.a).ok_or_else(missing)?;

    mesh.remove_triangle(q.t1)?;
    mesh.remove_triangle(q.t2)?;
    mesh.remove_edge(edge)?;
    let cd = mesh.add_edge(q.c, q.d, Movability::Free)?;
    mesh.add_triangle([ac, cd, da])?;
    mesh.add_triangle([cb, bd, cd])?;

    if flip_trace_enabled() {
        tracing::debug!(
            "[flip] {edge:?} ({:?}-{:?}) -> {cd:?} ({:?}-{:?})",
            q.a,
            q.b,
            q.c,
            q.d
        );
    }
    Ok(cd)
}

/// Whether a free interior edge should be flipped to restore the Delaunay property.
fn should_flip(mesh: &MeshData, edge: EdgeKey) -> Result<bool, FlipError> {
    let e = mesh.get_edge(edge)?;
    if e.movability.is_constrained() || mesh.triangles_of(edge).len() != 2 {
        return Ok(false);
    }
    let q = quad_of(mesh, edge)?;
    let [p0, p1, p2] = mesh.triangle_uv(q.t1)?;
    let pd = mesh.uv(q.d)?;
    match in_circle(&p0, &p1, &p2, &pd) {
        InCircle::OUTSIDE => Ok(false),
        InCircle::INSIDE => {
            let (pa, pb, pc) = (mesh.uv(q.a)?, mesh.uv(q.b)?, mesh.uv(q.c)?);
            Ok(strictly_convex(&pa, &pb, &pc, &pd))
        }
        InCircle::BOUNDARY => {
            let (pa, pb, pc) = (mesh.uv(q.a)?, mesh.uv(q.b)?, mesh.uv(q.c)?);
            if !strictly_convex(&pa, &pb, &pc, &pd) {
                return Ok(false);
            }
            let [r0, r1, r2] = mesh.triangle_uv(q.t2)?;
            let current = min_angle(&p0, &p1, &p2).min(min_angle(&r0, &r1, &r2));
            let flipped = min_angle(&pa, &pc, &pd).min(min_angle(&pb, &pd, &pc));
            Ok(flipped > current + COCIRCULAR_ANGLE_GAIN)
        }
    }
}

/// Upper bound on flips for one legalization run.
fn flip_budget(mesh: &MeshData) -> usize {
    10 * (mesh.number_of_edges() + 16)
}

/// Flips edges reachable from `seeds` until none violates the Delaunay property.
///
/// Constrained and boundary edges are skipped. The run stops with a warning
/// if the flip budget is exhausted, leaving a valid (possibly non-Delaunay)
/// triangulation.
///
/// # Errors
///
/// Propagates structural errors only.
pub fn legalize<I>(mesh: &mut MeshData, seeds: I) -> Result<LegalizeStats, FlipError>
where
    I: IntoIterator<Item = EdgeKey>,
{
    let mut stats = LegalizeStats::default();
    let mut queue: VecDeque<EdgeKey> = VecDeque::new();
    let mut queued: FastHashSet<EdgeKey> = FastHashSet::default();
    for e in seeds {
        if queued.insert(e) {
            queue.push_back(e);
        }
    }
    let budget = flip_budget(mesh);

    while let Some(edge) = queue.pop_front() {
        queued.remove(&edge);
        stats.max_queue_len = stats.max_queue_len.max(queue.len() + 1);
        if mesh.edge(edge).is_none() {
            continue;
        }
        stats.edges_checked += 1;
        if !should_flip(mesh, edge)? {
            continue;
        }
        if stats.flips_performed >= budget {
            tracing::warn!(
                flips = stats.flips_performed,
                "legalization flip budget exhausted"
            );
            break;
        }
        let q = quad_of(mesh, edge)?;
        match flip_edge(mesh, edge) {
            Ok(_) => {
                stats.flips_performed += 1;
                for (x, y) in [(q.a, q.c), (q.c, q.b), (q.b, q.d), (q.d, q.a)] {
                    if let Some(side) = mesh.find_edge(x, y) {
                        if queued.insert(side) {
                            queue.push_back(side);
                        }
                    }
                }
            }
            Err(FlipError::NonConvexQuad { .. } | FlipError::ConstrainedEdge { .. }) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(stats)
}

fn crosses(mesh: &MeshData, edge: EdgeKey, a: VertexKey, b: VertexKey) -> Result<bool, FlipError> {
    let e = mesh.get_edge(edge)?;
    if e.has_vertex(a) || e.has_vertex(b) {
        return Ok(false);
    }
    let hit = int_seg_seg(
        &mesh.uv(a)?,
        &mesh.uv(b)?,
        &mesh.uv(e.first)?,
        &mesh.uv(e.last)?,
        false,
        false,
    );
    Ok(hit.kind == IntersectionType::Cross)
}

/// Outcome of [`recover_frontier_edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The edge was already present.
    Present(EdgeKey),
    /// The edge was created by flipping.
    Recovered(EdgeKey),
    /// The edge could not be recovered (crossed by a constrained edge,
    /// blocked by a collinear vertex, or out of iterations).
    Failed,
}

/// Forces the segment `a-b` into the mesh and tags it with `movability`.
///
/// Edges properly crossing the segment are flipped one at a time; a
/// non-convex quadrilateral is pushed back and retried later. Once the
/// segment exists, the newly created edges are legalized.
///
/// # Errors
///
/// Propagates structural errors only; geometric failure is reported as
/// [`Recovery::Failed`].
pub fn recover_frontier_edge(
    mesh: &mut MeshData,
    a: VertexKey,
    b: VertexKey,
    movability: Movability,
) -> Result<Recovery, FlipError> {
    if let Some(existing) = mesh.find_edge(a, b) {
        let tag = mesh.get_edge(existing)?.movability.strongest(movability);
        mesh.set_edge_movability(existing, tag)?;
        return Ok(Recovery::Present(existing));
    }

    let mut queue: VecDeque<EdgeKey> = VecDeque::new();
    for edge in mesh.edge_keys() {
        if crosses(mesh, edge, a, b)? {
            if mesh.get_edge(edge)?.movability.is_constrained() {
                tracing::debug!(?edge, "frontier segment crossed by a constrained edge");
                return Ok(Recovery::Failed);
            }
            queue.push_back(edge);
        }
    }
    if queue.is_empty() {
        return Ok(Recovery::Failed);
    }

    let mut created: Vec<EdgeKey> = Vec::new();
    let mut budget = 4 * queue.len() * queue.len() + 64;
    while let Some(edge) = queue.pop_front() {
        if budget == 0 {
            return Ok(Recovery::Failed);
        }
        budget -= 1;
        match flip_edge(mesh, edge) {
            Ok(new_edge) => {
                if crosses(mesh, new_edge, a, b)? {
                    queue.push_back(new_edge);
                } else {
                    created.push(new_edge);
                }
            }
            Err(FlipError::NonConvexQuad { .. }) => queue.push_back(edge),
            Err(FlipError::ConstrainedEdge { .. } | FlipError::NotInterior { .. }) => {
                return Ok(Recovery::Failed);
            }
            Err(err) => return Err(err),
        }
    }

    let Some(edge) = mesh.find_edge(a, b) else {
        return Ok(Recovery::Failed);
    };
    mesh.set_edge_movability(edge, movability)?;
    created.retain(|e| *e != edge && mesh.edge(*e).is_some());
    legalize(mesh, created)?;
    Ok(Recovery::Recovered(edge))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vertex::MeshVertex;
    use nalgebra::Point3;

    fn add(mesh: &mut MeshData, u: f64, v: f64) -> VertexKey {
        mesh.add_vertex(MeshVertex::new(Point2::new(u, v), Point3::origin(), Movability::Free))
    }

    /// Two triangles sharing the edge `v[0]-v[2]` of a convex quad.
    fn quad(points: [(f64, f64); 4], diag: Movability) -> (MeshData, [VertexKey; 4], EdgeKey) {
        let mut mesh = MeshData::default();
        let v = points.map(|(u, w)| add(&mut mesh, u, w));
        let e01 = mesh.add_edge(v[0], v[1], Movability::Frontier).unwrap();
        let e12 = mesh.add_edge(v[1], v[2], Movability::Frontier).unwrap();
        let e23 = mesh.add_edge(v[2], v[3], Movability::Frontier).unwrap();
        let e30 = mesh.add_edge(v[3], v[0], Movability::Frontier).unwrap();
        let d = mesh.add_edge(v[0], v[2], diag).unwrap();
        mesh.add_triangle([e01, e12, d]).unwrap();
        mesh.add_triangle([d, e23, e30]).unwrap();
        (mesh, v, d)
    }

    #[test]
    fn test_flip_swaps_diagonal() {
        let (mut mesh, v, d) = quad([(0.0, 0.0), (2.0, 0.0), (2.0, 1.0), (0.0, 1.0)], Movability::Free);
        let new = flip_edge(&mut mesh, d).unwrap();
        assert!(mesh.edge(d).is_none());
        assert_eq!(mesh.find_edge(v[1], v[3]), Some(new));
        assert_eq!(mesh.triangles_of(new).len(), 2);
        assert_eq!(mesh.number_of_triangles(), 2);
        for (t, _) in mesh.triangles() {
            let [p, q, r] = mesh.triangle_uv(t).unwrap();
            assert!(crate::geometry::predicates::orient2d(&p, &q, &r) > 0.0);
        }
    }

    #[test]
    fn test_flip_refuses_constrained_and_concave() {
        let (mut mesh, _, d) = quad([(0.0, 0.0), (2.0, 0.0), (2.0, 1.0), (0.0, 1.0)], Movability::Fixed);
        assert!(matches!(flip_edge(&mut mesh, d), Err(FlipError::ConstrainedEdge { .. })));

        // Reflex corner at v[2]: the other diagonal would leave the quad.
        let (mut mesh, _, d) = quad([(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (3.0, 4.0)], Movability::Free);
        assert!(matches!(flip_edge(&mut mesh, d), Err(FlipError::NonConvexQuad { .. })));
        assert_eq!(mesh.number_of_triangles(), 2);
    }

    #[test]
    fn test_legalize_fixes_thin_diagonal() {
        // The long diagonal of a flat kite is not Delaunay.
        let (mut mesh, v, d) = quad([(0.0, 0.0), (1.0, -0.2), (2.0, 0.0), (1.0, 0.2)], Movability::Free);
        let stats = legalize(&mut mesh, [d]).unwrap();
        assert_eq!(stats.flips_performed, 1);
        assert!(mesh.find_edge(v[1], v[3]).is_some());
        let keys = mesh.edge_keys();
        let again = legalize(&mut mesh, keys).unwrap();
        assert_eq!(again.flips_performed, 0);
    }

    #[test]
    fn test_cocircular_square_is_left_alone() {
        let (mut mesh, v, d) = quad([(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)], Movability::Free);
        let stats = legalize(&mut mesh, [d]).unwrap();
        assert_eq!(stats.flips_performed, 0);
        assert_eq!(mesh.find_edge(v[0], v[2]), Some(d));
    }

    #[test]
    fn test_recover_existing_and_crossed_edge() {
        let (mut mesh, v, d) = quad([(0.0, 0.0), (2.0, 0.0), (2.0, 1.0), (0.0, 1.0)], Movability::Free);
        assert_eq!(
            recover_frontier_edge(&mut mesh, v[0], v[2], Movability::Fixed).unwrap(),
            Recovery::Present(d)
        );
        assert_eq!(mesh.edge(d).unwrap().movability, Movability::Fixed);

        let (mut mesh, v, _) = quad([(0.0, 0.0), (2.0, 0.0), (2.0, 1.0), (0.0, 1.0)], Movability::Free);
        let Recovery::Recovered(e) = recover_frontier_edge(&mut mesh, v[1], v[3], Movability::Frontier).unwrap()
        else {
            panic!("edge should be recovered");
        };
        assert!(mesh.edge(e).unwrap().is_frontier());
    }
}
