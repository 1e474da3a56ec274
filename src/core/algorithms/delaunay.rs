//! Constrained incremental Delaunay triangulation of a face domain.
//!
//! [`Delaunay`] owns the [`MeshData`] of one face and moves it through the
//! states of [`DelaunayState`]:
//!
//! 1. [`Delaunay::build_boundary`] records the boundary loops (and optional
//!    fixed segments) as constraints and checks them for self-intersection.
//! 2. [`Delaunay::triangulate`] inserts every registered vertex into an
//!    enclosing super triangle, recovers the constraints by flipping, and
//!    removes everything outside the boundary.
//! 3. [`Delaunay::add_vertices`] inserts interior nodes, rejecting those
//!    outside the domain or on a frontier edge.
//!
//! Boundary loops must leave the domain on their left: the outer loop runs
//! counter-clockwise and holes run clockwise.

use std::collections::VecDeque;
use std::fmt;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::algorithms::flips::{FlipError, Recovery, legalize, recover_frontier_edge};
use crate::core::algorithms::locate::{LocateError, LocateResult, locate};
use crate::core::collections::{
    FastHashMap, FastHashSet, fast_hash_map_with_capacity, fast_hash_set_with_capacity,
};
use crate::core::edge::canonical_pair;
use crate::core::mesh_data::{EdgeKey, MeshData, MeshDataError, TriangleKey, VertexKey};
use crate::core::progress::ProgressRange;
use crate::core::vertex::{MeshVertex, Movability};
use crate::geometry::classifier::{Classification, Classifier, PolygonClassifier};
use crate::geometry::geom_tool::{
    SegmentIntersectionChecker, TANGENT_ANGLE_DEGREES, int_seg_seg, point_in_triangle,
};
use crate::geometry::predicates::{orient2d, squared_distance_to_segment};

/// Number of insertions between two cancellation checks.
pub const CANCELLATION_CHUNK: usize = 64;

// =============================================================================
// STATE AND ERRORS
// =============================================================================

/// Lifecycle of one face triangulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelaunayState {
    /// Nothing recorded yet.
    #[default]
    Empty,
    /// Boundary constraints recorded.
    BoundaryBuilt,
    /// Boundary triangulated and exterior removed.
    BaseTriangulated,
    /// Interior nodes inserted.
    NodesInserted,
    /// Quality control finished.
    QualityControlled,
    /// Output extracted; no further mutation.
    Finalized,
}

impl fmt::Display for DelaunayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors raised by the Delaunay core.
#[derive(Debug, Clone, Error)]
pub enum DelaunayError {
    /// An operation was called in the wrong lifecycle state.
    #[error("Operation `{operation}` is not allowed in state {state}")]
    WrongState {
        /// Operation name.
        operation: &'static str,
        /// Current state.
        state: DelaunayState,
    },
    /// Fewer than three usable vertices.
    #[error("Triangulation needs at least 3 vertices, got {count}")]
    TooFewVertices {
        /// Number of vertices available.
        count: usize,
    },
    /// Attempt to remove a vertex that is not free.
    #[error("Vertex {vertex:?} is constrained ({movability}) and cannot be removed")]
    ConstrainedVertex {
        /// Vertex key.
        vertex: VertexKey,
        /// Its constraint tag.
        movability: Movability,
    },
    /// Internal consistency violation.
    #[error(transparent)]
    Data(#[from] MeshDataError),
    /// Flip failure that is not a plain geometric refusal.
    #[error(transparent)]
    Flip(#[from] FlipError),
    /// Point location failure.
    #[error(transparent)]
    Locate(#[from] LocateError),
}

// =============================================================================
// REPORTS
// =============================================================================

/// Outcome of [`Delaunay::build_boundary`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryReport {
    /// Number of constraint segments recorded.
    pub segments: usize,
    /// Number of accepted crossings between non-adjacent segments.
    pub crossings: usize,
}

impl BoundaryReport {
    /// `true` when at least one crossing was accepted.
    #[must_use]
    pub const fn is_self_intersecting(&self) -> bool {
        self.crossings > 0
    }
}

/// Outcome of [`Delaunay::triangulate`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BaseMeshReport {
    /// Vertices inserted into the base triangulation.
    pub inserted: usize,
    /// Vertices skipped because they coincided with an existing one.
    pub skipped: usize,
    /// Flips spent on constraint recovery and legalization.
    pub flips: usize,
    /// Constraint segments that could not be recovered.
    pub unrecovered: Vec<(VertexKey, VertexKey)>,
}

/// Counters returned by [`Delaunay::add_vertices`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertionStats {
    /// Vertices inserted.
    pub inserted: usize,
    /// Rejected: outside the triangulated domain.
    pub rejected_outside: usize,
    /// Rejected: on or within tolerance of a constrained edge.
    pub rejected_on_frontier: usize,
    /// Rejected: coincident with an existing vertex.
    pub rejected_duplicate: usize,
    /// The batch stopped early on cancellation.
    pub cancelled: bool,
}

impl InsertionStats {
    /// Total number of rejected candidates.
    #[must_use]
    pub const fn rejected(&self) -> usize {
        self.rejected_outside + self.rejected_on_frontier + self.rejected_duplicate
    }
}

/// A directed constraint segment; the domain lies on its left for frontier segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Constraint {
    from: VertexKey,
    to: VertexKey,
    movability: Movability,
}

/// What happened to a single vertex handed to [`Delaunay::insert_vertex`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placement {
    Inserted,
    Outside,
    OnFrontier,
    Duplicate,
}

// =============================================================================
// DELAUNAY
// =============================================================================

/// Constrained Delaunay triangulation of one face.
///
/// # Examples
///
/// ```rust
/// use facemesh::core::algorithms::delaunay::{Delaunay, DelaunayState};
/// use facemesh::core::mesh_data::MeshData;
/// use facemesh::core::vertex::{MeshVertex, Movability};
/// use nalgebra::{Point2, Point3};
///
/// let mut mesh = MeshData::new([1e-9, 1e-9], [0.25, 0.25]);
/// let square: Vec<_> = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
///     .into_iter()
///     .map(|(u, v)| mesh.add_vertex(MeshVertex::new(Point2::new(u, v), Point3::origin(), Movability::Frontier)))
///     .collect();
///
/// let mut delaunay = Delaunay::new(mesh);
/// delaunay.build_boundary(&[square], &[]).unwrap();
/// let report = delaunay.triangulate().unwrap();
/// assert!(report.unrecovered.is_empty());
/// assert_eq!(delaunay.state(), DelaunayState::BaseTriangulated);
/// assert_eq!(delaunay.mesh().number_of_triangles(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct Delaunay {
    mesh: MeshData,
    state: DelaunayState,
    loops: Vec<Vec<VertexKey>>,
    constraints: Vec<Constraint>,
    checker: SegmentIntersectionChecker,
    boundary: BoundaryReport,
    hint: Option<TriangleKey>,
}

impl Delaunay {
    /// Wraps a data structure whose boundary vertices are already registered.
    #[must_use]
    pub fn new(mesh: MeshData) -> Self {
        let tolerance = mesh.tolerance()[0].max(mesh.tolerance()[1]);
        Self {
            mesh,
            state: DelaunayState::Empty,
            loops: Vec::new(),
            constraints: Vec::new(),
            checker: SegmentIntersectionChecker::new(TANGENT_ANGLE_DEGREES.to_radians(), tolerance),
            boundary: BoundaryReport::default(),
            hint: None,
        }
    }

    /// Replaces the crossing acceptance rules used by [`Self::build_boundary`].
    #[must_use]
    pub fn with_checker(mut self, checker: SegmentIntersectionChecker) -> Self {
        self.checker = checker;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> DelaunayState {
        self.state
    }

    /// The underlying data structure.
    #[must_use]
    pub const fn mesh(&self) -> &MeshData {
        &self.mesh
    }

    /// Mutable access for registering vertices before triangulation.
    pub fn mesh_mut(&mut self) -> &mut MeshData {
        &mut self.mesh
    }

    /// Boundary loops as recorded.
    #[must_use]
    pub fn loops(&self) -> &[Vec<VertexKey>] {
        &self.loops
    }

    /// Report of the last [`Self::build_boundary`].
    #[must_use]
    pub const fn boundary_report(&self) -> BoundaryReport {
        self.boundary
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[DelaunayState],
    ) -> Result<(), DelaunayError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DelaunayError::WrongState {
                operation,
                state: self.state,
            })
        }
    }

    // -------------------------------------------------------------------------
    // Boundary
    // -------------------------------------------------------------------------

    /// Records closed boundary loops and fixed segments as constraints.
    ///
    /// Consecutive duplicates inside a loop are dropped. Every pair of
    /// segments not sharing a vertex is tested for crossings; accepted
    /// crossings are counted but do not stop the build.
    ///
    /// # Errors
    ///
    /// Fails outside [`DelaunayState::Empty`] and for stale vertex keys.
    pub fn build_boundary(
        &mut self,
        loops: &[Vec<VertexKey>],
        fixed: &[(VertexKey, VertexKey)],
    ) -> Result<BoundaryReport, DelaunayError> {
        self.expect_state("build_boundary", &[DelaunayState::Empty])?;

        for keys in loops {
            let mut cleaned: Vec<VertexKey> = Vec::with_capacity(keys.len());
            for &k in keys {
                self.mesh.uv(k)?;
                if cleaned.last() != Some(&k) {
                    cleaned.push(k);
                }
            }
            while cleaned.len() > 1 && cleaned.first() == cleaned.last() {
                cleaned.pop();
            }
            if cleaned.len() < 2 {
                continue;
            }
            for (i, &from) in cleaned.iter().enumerate() {
                let to = cleaned[(i + 1) % cleaned.len()];
                self.push_constraint(from, to, Movability::Frontier);
            }
            self.loops.push(cleaned);
        }
        for &(from, to) in fixed {
            self.mesh.uv(from)?;
            self.mesh.uv(to)?;
            if from != to {
                self.push_constraint(from, to, Movability::Fixed);
            }
        }

        let crossings = self.count_crossings()?;
        if crossings > 0 {
            tracing::warn!(crossings, "boundary is self-intersecting");
        }
        self.state = DelaunayState::BoundaryBuilt;
        self.boundary = BoundaryReport {
            segments: self.constraints.len(),
            crossings,
        };
        Ok(self.boundary)
    }

    fn push_constraint(&mut self, from: VertexKey, to: VertexKey, movability: Movability) {
        let pair = canonical_pair(from, to);
        if let Some(existing) = self
            .constraints
            .iter_mut()
            .find(|c| canonical_pair(c.from, c.to) == pair)
        {
            existing.movability = existing.movability.strongest(movability);
            return;
        }
        self.constraints.push(Constraint {
            from,
            to,
            movability,
        });
    }

    /// Location of a constraint segment inside the recorded loops.
    fn loop_position(&self, c: &Constraint) -> Option<(usize, usize)> {
        self.loops.iter().enumerate().find_map(|(l, keys)| {
            keys.iter()
                .enumerate()
                .find(|&(i, &k)| k == c.from && keys[(i + 1) % keys.len()] == c.to)
                .map(|(i, _)| (l, i))
        })
    }

    /// Boundary stretch between two segments of the same loop, taking the
    /// shorter way around.
    fn loop_polyline(&self, l: usize, i: usize, j: usize) -> Result<Vec<Point2<f64>>, DelaunayError> {
        let keys = &self.loops[l];
        let n = keys.len();
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        let inner = hi - lo;
        let range: Vec<usize> = if inner <= n - inner {
            (lo + 1..=hi).collect()
        } else {
            (hi + 1..=lo + n).map(|k| k % n).collect()
        };
        range
            .into_iter()
            .map(|k| self.mesh.uv(keys[k]).map_err(DelaunayError::from))
            .collect()
    }

    fn count_crossings(&self) -> Result<usize, DelaunayError> {
        let mut segments = Vec::with_capacity(self.constraints.len());
        for c in &self.constraints {
            let (a, b) = (self.mesh.uv(c.from)?, self.mesh.uv(c.to)?);
            let min = Point2::new(a.x.min(b.x), a.y.min(b.y));
            let max = Point2::new(a.x.max(b.x), a.y.max(b.y));
            segments.push((c, a, b, min, max, self.loop_position(c)));
        }

        let mut crossings = 0;
        for (s, first) in segments.iter().enumerate() {
            for second in &segments[s + 1..] {
                let (c1, a1, b1, min1, max1, pos1) = first;
                let (c2, a2, b2, min2, max2, pos2) = second;
                if c1.from == c2.from || c1.from == c2.to || c1.to == c2.from || c1.to == c2.to {
                    continue;
                }
                if max1.x < min2.x || max2.x < min1.x || max1.y < min2.y || max2.y < min1.y {
                    continue;
                }
                let hit = int_seg_seg(a1, b1, a2, b2, false, false);
                let polyline = match (pos1, pos2) {
                    (Some((l1, i1)), Some((l2, i2))) if l1 == l2 => {
                        Some(self.loop_polyline(*l1, *i1, *i2)?)
                    }
                    _ => None,
                };
                if self
                    .checker
                    .accept_intersection(&hit, (a1, b1), (a2, b2), polyline.as_deref())
                {
                    tracing::debug!(kind = %hit.kind, point = ?hit.point, "boundary segments intersect");
                    crossings += 1;
                }
            }
        }
        Ok(crossings)
    }

    // -------------------------------------------------------------------------
    // Base triangulation
    // -------------------------------------------------------------------------

    /// Triangulates every registered vertex and recovers the constraints.
    ///
    /// Vertices are inserted in ascending `u + v` order. Constraint segments
    /// that cannot be recovered are reported, and the exterior is then
    /// identified by parity against the boundary loops instead of by
    /// flooding from the outside.
    ///
    /// # Errors
    ///
    /// Fails outside [`DelaunayState::BoundaryBuilt`], with fewer than three
    /// vertices, and on internal consistency violations.
    pub fn triangulate(&mut self) -> Result<BaseMeshReport, DelaunayError> {
        self.expect_state("triangulate", &[DelaunayState::BoundaryBuilt])?;
        let count = self.mesh.number_of_vertices();
        if count < 3 {
            return Err(DelaunayError::TooFewVertices { count });
        }

        let order = self.insertion_order(self.mesh.vertex_keys())?;
        let super_vertices = self.add_super_triangle()?;
        let mut report = BaseMeshReport::default();
        for v in order {
            match self.insert_vertex(v, false)? {
                Placement::Inserted => report.inserted += 1,
                _ => {
                    tracing::debug!(vertex = ?v, "vertex skipped during base triangulation");
                    report.skipped += 1;
                }
            }
        }

        for c in self.constraints.clone() {
            match recover_frontier_edge(&mut self.mesh, c.from, c.to, c.movability)? {
                Recovery::Present(_) => {}
                Recovery::Recovered(_) => report.flips += 1,
                Recovery::Failed => report.unrecovered.push((c.from, c.to)),
            }
        }
        if !report.unrecovered.is_empty() {
            tracing::warn!(
                count = report.unrecovered.len(),
                "frontier edges could not be recovered"
            );
        }

        self.remove_exterior(&super_vertices, report.unrecovered.is_empty())?;
        self.remove_super_triangle(&super_vertices)?;
        self.hint = None;
        self.state = DelaunayState::BaseTriangulated;
        tracing::debug!(
            triangles = self.mesh.number_of_triangles(),
            inserted = report.inserted,
            skipped = report.skipped,
            "base triangulation built"
        );
        Ok(report)
    }

    fn insertion_order(&self, mut keys: Vec<VertexKey>) -> Result<Vec<VertexKey>, DelaunayError> {
        let mut weighted = Vec::with_capacity(keys.len());
        for k in keys.drain(..) {
            let uv = self.mesh.uv(k)?;
            weighted.push((uv.x + uv.y, k));
        }
        weighted.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        Ok(weighted.into_iter().map(|(_, k)| k).collect())
    }

    /// Adds a triangle enclosing every vertex with a generous margin.
    fn add_super_triangle(&mut self) -> Result<[VertexKey; 3], DelaunayError> {
        let mut min = Point2::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (_, v) in self.mesh.vertices() {
            min = Point2::new(min.x.min(v.uv.x), min.y.min(v.uv.y));
            max = Point2::new(max.x.max(v.uv.x), max.y.max(v.uv.y));
        }
        let (dx, dy) = (max.x - min.x, max.y - min.y);
        let delta_max = dx.max(dy).max(1.0);
        // Keep the base clear of flat point sets.
        let delta_min = dx.min(dy).max(0.1 * delta_max);
        let delta = dx + dy + delta_max;

        let corners = [
            Point2::new(min.x - delta, min.y - delta_min),
            Point2::new(max.x + delta, min.y - delta_min),
            Point2::new(0.5 * (min.x + max.x), max.y + 2.0 * delta_max),
        ];
        let keys = corners.map(|uv| {
            self.mesh.add_vertex(MeshVertex::new(
                uv,
                nalgebra::Point3::origin(),
                Movability::Free,
            ))
        });
        let e0 = self.mesh.add_edge(keys[0], keys[1], Movability::Free)?;
        let e1 = self.mesh.add_edge(keys[1], keys[2], Movability::Free)?;
        let e2 = self.mesh.add_edge(keys[2], keys[0], Movability::Free)?;
        self.hint = Some(self.mesh.add_triangle([e0, e1, e2])?);
        Ok(keys)
    }

    fn remove_exterior(
        &mut self,
        super_vertices: &[VertexKey; 3],
        all_recovered: bool,
    ) -> Result<(), DelaunayError> {
        let exterior = if all_recovered {
            self.flood_exterior(super_vertices)?
        } else {
            self.classify_exterior(super_vertices)?
        };
        for t in exterior {
            self.mesh.remove_triangle(t)?;
        }
        Ok(())
    }

    /// Floods from the super triangle and from the outer side of every
    /// frontier edge, never crossing a frontier edge.
    fn flood_exterior(
        &self,
        super_vertices: &[VertexKey; 3],
    ) -> Result<FastHashSet<TriangleKey>, DelaunayError> {
        let directed: FastHashMap<(VertexKey, VertexKey), VertexKey> = self
            .constraints
            .iter()
            .filter(|c| c.movability == Movability::Frontier)
            .map(|c| (canonical_pair(c.from, c.to), c.from))
            .collect();

        let mut queue: VecDeque<TriangleKey> = VecDeque::new();
        let mut exterior: FastHashSet<TriangleKey> =
            fast_hash_set_with_capacity(self.mesh.number_of_triangles());
        for (key, triangle) in self.mesh.triangles() {
            let corners = self.mesh.triangle_vertices(key)?;
            let mut outside = corners.iter().any(|v| super_vertices.contains(v));
            for (i, &e) in triangle.edges.iter().enumerate() {
                let edge = self.mesh.get_edge(e)?;
                if let Some(&from) = directed.get(&edge.canonical()) {
                    // The domain lies left of `from -> to`, and so does a
                    // counter-clockwise triangle walking the edge that way.
                    outside |= edge.start(triangle.orientations[i]) != from;
                }
            }
            if outside && exterior.insert(key) {
                queue.push_back(key);
            }
        }

        while let Some(t) = queue.pop_front() {
            let triangle = *self.mesh.get_triangle(t)?;
            for e in triangle.edges {
                if self.mesh.get_edge(e)?.is_frontier() {
                    continue;
                }
                if let Some(next) = self.mesh.other_triangle(e, t) {
                    if exterior.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
        Ok(exterior)
    }

    /// Marks triangles whose centroid falls outside the boundary loops.
    fn classify_exterior(
        &self,
        super_vertices: &[VertexKey; 3],
    ) -> Result<FastHashSet<TriangleKey>, DelaunayError> {
        let mut loops = Vec::with_capacity(self.loops.len());
        for keys in &self.loops {
            let mut points = Vec::with_capacity(keys.len());
            for &k in keys {
                points.push(self.mesh.uv(k)?);
            }
            loops.push(points);
        }
        let classifier = PolygonClassifier::new(loops, 0.0);

        let mut exterior = FastHashSet::default();
        for (key, _) in self.mesh.triangles() {
            let corners = self.mesh.triangle_vertices(key)?;
            if corners.iter().any(|v| super_vertices.contains(v)) {
                exterior.insert(key);
                continue;
            }
            let [a, b, c] = self.mesh.triangle_uv(key)?;
            let centroid = Point2::from((a.coords + b.coords + c.coords) / 3.0);
            if classifier.classify(&centroid) == Classification::Out {
                exterior.insert(key);
            }
        }
        Ok(exterior)
    }

    fn remove_super_triangle(&mut self, super_vertices: &[VertexKey; 3]) -> Result<(), DelaunayError> {
        let orphans: Vec<EdgeKey> = self
            .mesh
            .edges()
            .filter(|(e, edge)| {
                self.mesh.triangles_of(*e).is_empty() && !edge.movability.is_constrained()
            })
            .map(|(e, _)| e)
            .collect();
        for e in orphans {
            self.mesh.remove_edge(e)?;
        }
        for &v in super_vertices {
            let leftover: Vec<EdgeKey> = self.mesh.edges_of(v).to_vec();
            for e in leftover {
                self.mesh.remove_edge(e)?;
            }
            self.mesh.remove_vertex(v)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Insertion
    // -------------------------------------------------------------------------

    /// Inserts a batch of already registered vertices.
    ///
    /// Candidates outside the triangulated domain, coincident with an
    /// existing vertex, on a constrained edge, or within tolerance of a
    /// frontier edge are removed from the structure and counted. The
    /// cancellation token is polled every [`CANCELLATION_CHUNK`] insertions;
    /// on cancellation the remaining candidates are dropped and the mesh is
    /// left valid.
    ///
    /// # Errors
    ///
    /// Fails before the base triangulation exists and on internal
    /// consistency violations.
    pub fn add_vertices(
        &mut self,
        vertices: &[VertexKey],
        progress: &ProgressRange,
    ) -> Result<InsertionStats, DelaunayError> {
        self.expect_state(
            "add_vertices",
            &[DelaunayState::BaseTriangulated, DelaunayState::NodesInserted],
        )?;
        let mut stats = InsertionStats::default();
        let order = self.insertion_order(vertices.to_vec())?;
        let total = order.len();

        for (index, &v) in order.iter().enumerate() {
            if index % CANCELLATION_CHUNK == 0 {
                if progress.is_cancelled() {
                    tracing::warn!(inserted = stats.inserted, remaining = total - index, "node insertion cancelled");
                    stats.cancelled = true;
                    for &rest in &order[index..] {
                        self.discard(rest)?;
                    }
                    break;
                }
                progress.report(index, total, "inserting nodes");
            }
            match self.insert_vertex(v, true)? {
                Placement::Inserted => stats.inserted += 1,
                rejected => {
                    match rejected {
                        Placement::Outside => stats.rejected_outside += 1,
                        Placement::OnFrontier => stats.rejected_on_frontier += 1,
                        _ => stats.rejected_duplicate += 1,
                    }
                    self.discard(v)?;
                }
            }
        }
        self.state = DelaunayState::NodesInserted;
        Ok(stats)
    }

    /// Drops a rejected candidate that never got connected.
    fn discard(&mut self, v: VertexKey) -> Result<(), DelaunayError> {
        if self.mesh.vertex(v).is_some() && self.mesh.edges_of(v).is_empty() {
            self.mesh.remove_vertex(v)?;
        }
        Ok(())
    }

    fn near_frontier(&self, triangle: TriangleKey, uv: &Point2<f64>) -> Result<bool, DelaunayError> {
        let [tu, tv] = self.mesh.tolerance();
        let tol = tu.max(tv);
        let tol2 = tol * tol;
        for e in self.mesh.get_triangle(triangle)?.edges {
            let edge = self.mesh.get_edge(e)?;
            if !edge.movability.is_constrained() {
                continue;
            }
            let (a, b) = (self.mesh.uv(edge.first)?, self.mesh.uv(edge.last)?);
            if squared_distance_to_segment(uv, &a, &b) <= tol2 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Inserts one vertex and legalizes around it.
    fn insert_vertex(&mut self, v: VertexKey, guard_frontier: bool) -> Result<Placement, DelaunayError> {
        let uv = self.mesh.uv(v)?;
        if !self.mesh.edges_of(v).is_empty() {
            return Ok(Placement::Duplicate);
        }
        match locate(&self.mesh, &uv, self.hint)? {
            LocateResult::Outside => Ok(Placement::Outside),
            LocateResult::OnVertex(_) => Ok(Placement::Duplicate),
            LocateResult::InsideTriangle(t) => {
                if guard_frontier && self.near_frontier(t, &uv)? {
                    return Ok(Placement::OnFrontier);
                }
                self.split_triangle(t, v)?;
                Ok(Placement::Inserted)
            }
            LocateResult::OnEdge(e, _) => {
                if self.mesh.get_edge(e)?.movability.is_constrained() {
                    return Ok(Placement::OnFrontier);
                }
                if guard_frontier {
                    for &side in self.mesh.triangles_of(e) {
                        if self.near_frontier(side, &uv)? {
                            return Ok(Placement::OnFrontier);
                        }
                    }
                }
                self.split_edge(e, v)?;
                Ok(Placement::Inserted)
            }
        }
    }

    /// Replaces triangle `t` by three triangles around `v`.
    fn split_triangle(&mut self, t: TriangleKey, v: VertexKey) -> Result<(), DelaunayError> {
        let [a, b, c] = self.mesh.triangle_vertices(t)?;
        let sides = self.mesh.get_triangle(t)?.edges;
        self.mesh.remove_triangle(t)?;
        let va = self.mesh.add_edge(v, a, Movability::Free)?;
        let vb = self.mesh.add_edge(v, b, Movability::Free)?;
        let vc = self.mesh.add_edge(v, c, Movability::Free)?;
        let ab = self.find_side(a, b)?;
        let bc = self.find_side(b, c)?;
        let ca = self.find_side(c, a)?;
        self.hint = Some(self.mesh.add_triangle([ab, vb, va])?);
        self.mesh.add_triangle([bc, vc, vb])?;
        self.mesh.add_triangle([ca, va, vc])?;
        legalize(&mut self.mesh, sides)?;
        Ok(())
    }

    /// Splits edge `e` at `v`, replacing each bordering triangle by two.
    fn split_edge(&mut self, e: EdgeKey, v: VertexKey) -> Result<(), DelaunayError> {
        let edge = *self.mesh.get_edge(e)?;
        let (a, b) = (edge.first, edge.last);
        let mut apexes = Vec::with_capacity(2);
        for t in self.mesh.triangles_of(e).to_vec() {
            apexes.push(self.mesh.opposite_vertex(t, e)?);
            self.mesh.remove_triangle(t)?;
        }
        self.mesh.remove_edge(e)?;

        let va = self.mesh.add_edge(v, a, edge.movability)?;
        let vb = self.mesh.add_edge(v, b, edge.movability)?;
        let mut seeds = Vec::with_capacity(4);
        for o in apexes {
            let vo = self.mesh.add_edge(v, o, Movability::Free)?;
            let ao = self.find_side(a, o)?;
            let bo = self.find_side(b, o)?;
            self.hint = Some(self.mesh.add_triangle([va, vo, ao])?);
            self.mesh.add_triangle([vb, bo, vo])?;
            seeds.extend([ao, bo]);
        }
        legalize(&mut self.mesh, seeds)?;
        Ok(())
    }

    fn find_side(&self, a: VertexKey, b: VertexKey) -> Result<EdgeKey, DelaunayError> {
        self.mesh.find_edge(a, b).ok_or_else(|| {
            DelaunayError::Data(MeshDataError::InconsistentDataStructure {
                message: format!("missing side {a:?}-{b:?}"),
            })
        })
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    /// Removes a free interior vertex and re-triangulates the hole.
    ///
    /// Returns `false` (and leaves the mesh untouched) when the vertex star
    /// is not closed, i.e. the vertex lies on the mesh border.
    ///
    /// # Errors
    ///
    /// Fails for constrained vertices, before the base triangulation
    /// exists, and on internal consistency violations.
    pub fn remove_vertex(&mut self, v: VertexKey) -> Result<bool, DelaunayError> {
        self.expect_state(
            "remove_vertex",
            &[
                DelaunayState::BaseTriangulated,
                DelaunayState::NodesInserted,
                DelaunayState::QualityControlled,
            ],
        )?;
        let movability = self
            .mesh
            .vertex(v)
            .ok_or(MeshDataError::MissingVertex { vertex: v })?
            .movability;
        if movability.is_constrained() {
            return Err(DelaunayError::ConstrainedVertex {
                vertex: v,
                movability,
            });
        }

        let Some(ring) = self.star_polygon(v)? else {
            return Ok(false);
        };
        for t in self.mesh.triangles_around(v) {
            self.mesh.remove_triangle(t)?;
        }
        for e in self.mesh.edges_of(v).to_vec() {
            self.mesh.remove_edge(e)?;
        }
        self.mesh.remove_vertex(v)?;
        self.hint = None;

        let mut seeds = Vec::with_capacity(2 * ring.len());
        for (i, &p) in ring.iter().enumerate() {
            seeds.push(self.find_side(p, ring[(i + 1) % ring.len()])?);
        }
        seeds.extend(self.fill_polygon(ring)?);
        legalize(&mut self.mesh, seeds)?;
        Ok(true)
    }

    /// Link of `v` as a counter-clockwise ring, or `None` if it is open.
    fn star_polygon(&self, v: VertexKey) -> Result<Option<Vec<VertexKey>>, DelaunayError> {
        let around = self.mesh.triangles_around(v);
        let mut next: FastHashMap<VertexKey, VertexKey> = fast_hash_map_with_capacity(around.len());
        for &t in &around {
            let corners = self.mesh.triangle_vertices(t)?;
            let Some(i) = corners.iter().position(|&c| c == v) else {
                continue;
            };
            next.insert(corners[(i + 1) % 3], corners[(i + 2) % 3]);
        }
        if next.len() != around.len() || next.len() < 3 {
            return Ok(None);
        }
        let Some((&start, _)) = next.iter().min_by_key(|(k, _)| **k) else {
            return Ok(None);
        };
        let mut ring = vec![start];
        let mut current = start;
        loop {
            let Some(&following) = next.get(&current) else {
                return Ok(None);
            };
            if following == start {
                break;
            }
            if ring.len() > next.len() {
                return Ok(None);
            }
            ring.push(following);
            current = following;
        }
        Ok((ring.len() == next.len()).then_some(ring))
    }

    /// Ear-clips a counter-clockwise polygon whose sides already exist.
    fn fill_polygon(&mut self, mut ring: Vec<VertexKey>) -> Result<Vec<EdgeKey>, DelaunayError> {
        let mut diagonals = Vec::new();
        while ring.len() > 3 {
            let n = ring.len();
            let mut ear = None;
            for i in 0..n {
                let (p, c, q) = (ring[(i + n - 1) % n], ring[i], ring[(i + 1) % n]);
                let (pp, pc, pq) = (self.mesh.uv(p)?, self.mesh.uv(c)?, self.mesh.uv(q)?);
                if orient2d(&pp, &pc, &pq) <= 0.0 {
                    continue;
                }
                let mut blocked = false;
                for &other in &ring {
                    if other == p || other == c || other == q {
                        continue;
                    }
                    if point_in_triangle(&self.mesh.uv(other)?, &pp, &pc, &pq) {
                        blocked = true;
                        break;
                    }
                }
                if !blocked {
                    ear = Some(i);
                    break;
                }
            }
            let Some(i) = ear else {
                return Err(MeshDataError::InconsistentDataStructure {
                    message: "no ear found while filling a vertex star".to_owned(),
                }
                .into());
            };
            let (p, c, q) = (ring[(i + n - 1) % n], ring[i], ring[(i + 1) % n]);
            let pq = self.mesh.add_edge(p, q, Movability::Free)?;
            let pc = self.find_side(p, c)?;
            let cq = self.find_side(c, q)?;
            self.mesh.add_triangle([pc, cq, pq])?;
            diagonals.push(pq);
            ring.remove(i);
        }
        let a = self.find_side(ring[0], ring[1])?;
        let b = self.find_side(ring[1], ring[2])?;
        let c = self.find_side(ring[2], ring[0])?;
        self.mesh.add_triangle([a, b, c])?;
        Ok(diagonals)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Marks quality control as finished.
    ///
    /// # Errors
    ///
    /// Fails before the base triangulation exists or after finalization.
    pub fn mark_quality_controlled(&mut self) -> Result<(), DelaunayError> {
        self.expect_state(
            "mark_quality_controlled",
            &[
                DelaunayState::BaseTriangulated,
                DelaunayState::NodesInserted,
                DelaunayState::QualityControlled,
            ],
        )?;
        self.state = DelaunayState::QualityControlled;
        Ok(())
    }

    /// Ends the lifecycle and hands the data structure over.
    ///
    /// # Errors
    ///
    /// Fails before the base triangulation exists.
    pub fn finalize(mut self) -> Result<MeshData, DelaunayError> {
        self.expect_state(
            "finalize",
            &[
                DelaunayState::BaseTriangulated,
                DelaunayState::NodesInserted,
                DelaunayState::QualityControlled,
            ],
        )?;
        self.state = DelaunayState::Finalized;
        Ok(self.mesh)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn vertex(mesh: &mut MeshData, u: f64, v: f64, movability: Movability) -> VertexKey {
        mesh.add_vertex(MeshVertex::new(Point2::new(u, v), Point3::origin(), movability))
    }

    fn square_loop(mesh: &mut MeshData, min: f64, max: f64, ccw: bool) -> Vec<VertexKey> {
        let mut corners = vec![(min, min), (max, min), (max, max), (min, max)];
        if !ccw {
            corners.reverse();
        }
        corners
            .into_iter()
            .map(|(u, v)| vertex(mesh, u, v, Movability::Frontier))
            .collect()
    }

    fn triangulated_square() -> Delaunay {
        let mut mesh = MeshData::new([1e-9, 1e-9], [0.25, 0.25]);
        let outer = square_loop(&mut mesh, 0.0, 1.0, true);
        let mut d = Delaunay::new(mesh);
        d.build_boundary(&[outer], &[]).unwrap();
        d.triangulate().unwrap();
        d
    }

    fn total_area(mesh: &MeshData) -> f64 {
        mesh.triangles()
            .map(|(t, _)| {
                let [a, b, c] = mesh.triangle_uv(t).unwrap();
                0.5 * orient2d(&a, &b, &c)
            })
            .sum()
    }

    #[test]
    fn test_state_machine_rejects_out_of_order_calls() {
        let mut d = Delaunay::new(MeshData::default());
        assert!(matches!(
            d.triangulate(),
            Err(DelaunayError::WrongState {
                state: DelaunayState::Empty,
                ..
            })
        ));
        assert!(d.add_vertices(&[], &ProgressRange::new()).is_err());
        d.build_boundary(&[], &[]).unwrap();
        assert!(matches!(
            d.triangulate(),
            Err(DelaunayError::TooFewVertices { count: 0 })
        ));
    }

    #[test]
    fn test_square_with_hole() {
        let mut mesh = MeshData::new([1e-9, 1e-9], [0.25, 0.25]);
        let outer = square_loop(&mut mesh, 0.0, 1.0, true);
        let hole = square_loop(&mut mesh, 0.4, 0.6, false);
        let mut d = Delaunay::new(mesh);
        let boundary = d.build_boundary(&[outer, hole], &[]).unwrap();
        assert_eq!(boundary.segments, 8);
        assert!(!boundary.is_self_intersecting());
        let report = d.triangulate().unwrap();
        assert!(report.unrecovered.is_empty());
        assert_eq!(d.mesh().number_of_vertices(), 8);
        assert_eq!(d.mesh().number_of_triangles(), 8);
        approx::assert_relative_eq!(total_area(d.mesh()), 1.0 - 0.04, epsilon = 1e-12);
        let frontier = d.mesh().edges().filter(|(_, e)| e.is_frontier()).count();
        assert_eq!(frontier, 8);
    }

    #[test]
    fn test_bow_tie_is_flagged() {
        let mut mesh = MeshData::new([1e-9, 1e-9], [0.25, 0.25]);
        let bow_tie = [(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0)]
            .map(|(u, v)| vertex(&mut mesh, u, v, Movability::Frontier));
        let mut d = Delaunay::new(mesh);
        let report = d.build_boundary(&[bow_tie.to_vec()], &[]).unwrap();
        assert_eq!(report.crossings, 1);
        assert!(report.is_self_intersecting());
    }

    #[test]
    fn test_add_vertices_inserts_and_rejects() {
        let mut d = triangulated_square();
        let mut rng = StdRng::seed_from_u64(7);
        let mut keys = Vec::new();
        for _ in 0..20 {
            let (u, v) = (rng.random_range(0.05..0.95), rng.random_range(0.05..0.95));
            keys.push(vertex(d.mesh_mut(), u, v, Movability::Free));
        }
        let outside = vertex(d.mesh_mut(), 2.0, 2.0, Movability::Free);
        let on_border = vertex(d.mesh_mut(), 0.5, 0.0, Movability::Free);
        let corner_twin = vertex(d.mesh_mut(), 1.0, 1.0, Movability::Free);
        keys.extend([outside, on_border, corner_twin]);

        let stats = d.add_vertices(&keys, &ProgressRange::new()).unwrap();
        assert_eq!(stats.inserted, 20);
        assert_eq!(stats.rejected_outside, 1);
        assert_eq!(stats.rejected_on_frontier, 1);
        assert_eq!(stats.rejected_duplicate, 1);
        assert!(!stats.cancelled);
        assert_eq!(d.state(), DelaunayState::NodesInserted);
        assert_eq!(d.mesh().number_of_vertices(), 24);
        approx::assert_relative_eq!(total_area(d.mesh()), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cancelled_batch_leaves_valid_mesh() {
        let mut d = triangulated_square();
        let keys: Vec<_> = (1..10)
            .map(|i| vertex(d.mesh_mut(), 0.1 * f64::from(i), 0.5, Movability::Free))
            .collect();
        let progress = ProgressRange::new();
        progress.cancel();
        let stats = d.add_vertices(&keys, &progress).unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.inserted, 0);
        assert_eq!(d.mesh().number_of_vertices(), 4);
        assert_eq!(d.mesh().number_of_triangles(), 2);
    }

    #[test]
    fn test_remove_free_vertex_restores_area() {
        let mut d = triangulated_square();
        let center = vertex(d.mesh_mut(), 0.3, 0.6, Movability::Free);
        d.add_vertices(&[center], &ProgressRange::new()).unwrap();
        assert_eq!(d.mesh().number_of_triangles(), 4);
        assert!(d.remove_vertex(center).unwrap());
        assert_eq!(d.mesh().number_of_triangles(), 2);
        approx::assert_relative_eq!(total_area(d.mesh()), 1.0, epsilon = 1e-12);

        let corner = d.loops()[0][0];
        assert!(matches!(
            d.remove_vertex(corner),
            Err(DelaunayError::ConstrainedVertex { .. })
        ));
    }

    #[test]
    fn test_finalize_hands_over_mesh() {
        let mut d = triangulated_square();
        d.mark_quality_controlled().unwrap();
        let mesh = d.finalize().unwrap();
        assert_eq!(mesh.number_of_triangles(), 2);
    }
}
