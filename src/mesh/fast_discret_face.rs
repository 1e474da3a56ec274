//! Per-face meshing driver.
//!
//! [`FastDiscretFace::add`] runs the whole pipeline for one face:
//!
//! 1. discretize every boundary edge (through the shared-edge cache when
//!    requested) and assemble the loops;
//! 2. normalize the parametric domain and register the boundary;
//! 3. build the base triangulation, retrying with finer edges while the
//!    boundary self-intersects;
//! 4. insert surface nodes and run the deflection control loop;
//! 5. repair null triangles and export a [`Triangulation`].
//!
//! # Examples
//!
//! ```rust
//! use facemesh::geometry::surface::{Frame, Plane};
//! use facemesh::mesh::attribute::MeshParameters;
//! use facemesh::mesh::face::Face;
//! use facemesh::mesh::fast_discret_face::FastDiscretFace;
//! use std::sync::Arc;
//!
//! let face = Face::rectangle(Arc::new(Plane::new(Frame::default())), [0.0, 1.0], [0.0, 1.0]);
//! let params = MeshParameters::default();
//! let result = FastDiscretFace::new(&params).add(&face).unwrap();
//! assert_eq!(result.triangulation.nb_triangles(), 2);
//! assert!(result.status.converged);
//! assert_eq!(result.status.achieved_deflection, 0.0);
//! ```

use std::fmt;

use nalgebra::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::attribute::{FaceAttribute, MeshConstants, MeshParameters, MeshParametersError};
use super::edge_discretizer::{DiscretizedEdge, EdgeDiscretizer};
use super::face::{EdgeOrientation, Face, FaceOrientation, ShapeId};
use super::shared_edges::SharedEdgeProvider;
use super::triangulation::Triangulation;
use crate::core::algorithms::delaunay::{Delaunay, DelaunayError};
use crate::core::algorithms::flips::{FlipError, flip_edge};
use crate::core::algorithms::node_insertion::{NodeContext, NodeInsertionMeshAlgo};
use crate::core::collections::{FastHashSet, fast_hash_set_with_capacity};
use crate::core::mesh_data::{EdgeKey, MeshData, MeshDataError, TriangleKey, VertexKey};
use crate::core::progress::ProgressRange;
use crate::core::vertex::{MeshVertex, Movability};
use crate::geometry::classifier::{Classification, Classifier, PolygonClassifier};
use crate::geometry::geom_tool::{SegmentIntersectionChecker, squared_deflection_of_segment};
use crate::geometry::predicates::orient2d;
use crate::geometry::range_splitter::{ParamDomain, SplitParameters};
use crate::geometry::surface::{SurfaceEvaluator, SurfaceKind};

/// Discretization attempts after the first one when the boundary self-intersects.
pub const MAX_DISCRETIZATION_RETRIES: usize = 5;

/// Edge deflection divisor between two discretization attempts.
const RETRY_DEFLECTION_FACTOR: f64 = 3.0;

// =============================================================================
// ERRORS AND STATUS
// =============================================================================

/// Precondition failures and internal defects of the face driver.
#[derive(Debug, Clone, Error)]
pub enum FaceMeshError {
    /// The face has no geometry to mesh against.
    #[error("Face {face} has no underlying surface")]
    NullSurface {
        /// Face identity.
        face: ShapeId,
    },
    /// The surface collapses over the face domain.
    #[error("Surface of face {face} is degenerate: isoline lengths {lengths:?}")]
    DegenerateSurface {
        /// Face identity.
        face: ShapeId,
        /// Average U and V isoline lengths.
        lengths: [f64; 2],
    },
    /// A boundary curve evaluates to non-finite values.
    #[error("Edge {edge} of face {face} has an inconsistent parametric curve: {detail}")]
    InconsistentCurve {
        /// Face identity.
        face: ShapeId,
        /// Edge identity.
        edge: ShapeId,
        /// What went wrong.
        detail: &'static str,
    },
    /// Invalid configuration.
    #[error(transparent)]
    Parameters(#[from] MeshParametersError),
    /// Internal failure of the triangulation core.
    #[error(transparent)]
    Delaunay(#[from] DelaunayError),
}

impl From<MeshDataError> for FaceMeshError {
    fn from(err: MeshDataError) -> Self {
        Self::Delaunay(DelaunayError::Data(err))
    }
}

impl From<FlipError> for FaceMeshError {
    fn from(err: FlipError) -> Self {
        Self::Delaunay(DelaunayError::Flip(err))
    }
}

/// Progress of the driver through one face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshStage {
    /// Nothing done yet.
    #[default]
    Uninitialized,
    /// Boundary edges sampled.
    EdgesDiscretized,
    /// Boundary loops assembled and registered.
    BoundaryAssembled,
    /// Base triangulation built.
    BaseMeshed,
    /// Inside the deflection control loop.
    ControlPass,
    /// Triangulation exported.
    Done,
}

impl fmt::Display for MeshStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Non-fatal outcome of meshing one face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshStatus {
    /// Last stage reached.
    pub stage: MeshStage,
    /// Deflection the mesh was asked to meet.
    pub target_deflection: f64,
    /// Largest deviation measured by the last control pass.
    pub achieved_deflection: f64,
    /// `achieved_deflection <= target_deflection`.
    pub converged: bool,
    /// Control passes run, not counting the initial trial.
    pub control_passes: usize,
    /// Boundary rediscretizations caused by self-intersection.
    pub discretization_retries: usize,
    /// The final boundary still self-intersects; the mesh is best effort.
    pub self_intersecting_boundary: bool,
    /// Gaps bridged between consecutive boundary edges.
    pub boundary_gaps: usize,
    /// Frontier segments missing from the triangulation.
    pub unrecovered_frontier_edges: usize,
    /// Null triangles left after repair.
    pub null_triangles: usize,
    /// Meshing stopped early on cancellation.
    pub cancelled: bool,
}

/// Triangulation of one face and how it was obtained.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceMeshResult {
    /// Output mesh; empty for empty shapes.
    pub triangulation: Triangulation,
    /// Outcome details.
    pub status: MeshStatus,
}

/// Result of one [`FastDiscretFace::control`] pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControlReport {
    /// Largest deviation found, `-1` when the mesh has no triangle.
    pub deviation: f64,
    /// Triangles whose centroid deviates too much.
    pub bad_triangles: Vec<TriangleKey>,
    /// Free edges whose midpoint deviates too much.
    pub bad_edges: usize,
    /// Degenerate triangles, skipped by the measurement.
    pub null_triangles: Vec<TriangleKey>,
    /// Refinement candidates in face parameters.
    pub nodes: Vec<Point2<f64>>,
}

// =============================================================================
// BOUNDARY
// =============================================================================

#[derive(Clone, Copy, Debug)]
struct BoundaryNode {
    uv: Point2<f64>,
    point: Point3<f64>,
}

#[derive(Debug, Default)]
struct Boundary {
    loops: Vec<Vec<BoundaryNode>>,
    fixed: Vec<Vec<BoundaryNode>>,
    gaps: usize,
}

fn coincident(a: &Point2<f64>, b: &Point2<f64>, tol: [f64; 2]) -> bool {
    (a.x - b.x).abs() <= tol[0] && (a.y - b.y).abs() <= tol[1]
}

fn signed_area(nodes: &[BoundaryNode]) -> f64 {
    let n = nodes.len();
    let mut twice = 0.0;
    for i in 0..n {
        let (a, b) = (&nodes[i].uv, &nodes[(i + 1) % n].uv);
        twice += a.x * b.y - b.x * a.y;
    }
    0.5 * twice
}

fn nodes_of(edge: &DiscretizedEdge) -> impl Iterator<Item = BoundaryNode> + '_ {
    edge.uv
        .iter()
        .zip(&edge.points)
        .map(|(&uv, &point)| BoundaryNode { uv, point })
}

/// Chains edges into loops, merging coincident endpoints and bridging gaps.
///
/// The loop of largest area becomes the counter-clockwise outer loop; the
/// others are made clockwise.
fn assemble_boundary(wires: &[Vec<DiscretizedEdge>], tol: [f64; 2]) -> Boundary {
    let mut boundary = Boundary::default();
    for wire in wires {
        let mut nodes: Vec<BoundaryNode> = Vec::new();
        for edge in wire {
            if edge.orientation == EdgeOrientation::Internal {
                boundary.fixed.push(nodes_of(edge).collect());
                continue;
            }
            let mut incoming = nodes_of(edge).peekable();
            if let (Some(last), Some(first)) = (nodes.last(), incoming.peek()) {
                if coincident(&last.uv, &first.uv, tol) {
                    incoming.next();
                } else {
                    boundary.gaps += 1;
                    tracing::warn!(edge = %edge.id, from = ?last.uv, to = ?first.uv, "gap between consecutive boundary edges");
                }
            }
            nodes.extend(incoming);
        }
        if nodes.len() > 1 {
            let (first, last) = (nodes[0].uv, nodes[nodes.len() - 1].uv);
            if coincident(&first, &last, tol) {
                nodes.pop();
            } else if nodes.len() > 2 {
                boundary.gaps += 1;
                tracing::warn!(from = ?last, to = ?first, "boundary wire is not closed");
            }
        }
        if nodes.len() >= 3 {
            boundary.loops.push(nodes);
        }
    }

    let outer = boundary
        .loops
        .iter()
        .enumerate()
        .max_by(|a, b| signed_area(a.1).abs().total_cmp(&signed_area(b.1).abs()))
        .map(|(i, _)| i);
    for (i, nodes) in boundary.loops.iter_mut().enumerate() {
        let area = signed_area(nodes);
        let ccw = Some(i) == outer;
        if (area < 0.0 && ccw) || (area > 0.0 && !ccw) {
            nodes.reverse();
        }
    }
    boundary
}

fn sorted_params(values: impl Iterator<Item = f64>, tol: f64) -> Vec<f64> {
    let mut params: Vec<f64> = values.collect();
    params.sort_by(f64::total_cmp);
    params.dedup_by(|a, b| (*a - *b).abs() <= tol);
    params
}

// =============================================================================
// DRIVER
// =============================================================================

/// Face after boundary registration, ready for the base triangulation.
struct Prepared {
    attribute: FaceAttribute,
    split: SplitParameters,
    delaunay: Delaunay,
    loops: Vec<Vec<VertexKey>>,
    fixed: Vec<(VertexKey, VertexKey)>,
    gaps: usize,
}

/// Meshes single faces with a fixed configuration.
#[derive(Clone, Copy, Debug)]
pub struct FastDiscretFace<'a> {
    params: &'a MeshParameters,
    provider: Option<&'a SharedEdgeProvider>,
    progress: Option<&'a ProgressRange>,
}

impl<'a> FastDiscretFace<'a> {
    /// Driver without edge sharing or cancellation.
    #[must_use]
    pub const fn new(params: &'a MeshParameters) -> Self {
        Self {
            params,
            provider: None,
            progress: None,
        }
    }

    /// Uses `provider` for edges shared between faces when `with_share` is set.
    #[must_use]
    pub const fn with_shared_edges(mut self, provider: &'a SharedEdgeProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Polls `progress` for cancellation and reports to it.
    #[must_use]
    pub const fn with_progress(mut self, progress: &'a ProgressRange) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Meshes `face`.
    ///
    /// Empty shapes give an empty triangulation. Self-intersecting boundaries,
    /// non-convergence and cancellation are reported in [`MeshStatus`].
    ///
    /// # Errors
    ///
    /// Fails on a missing or degenerate surface, an inconsistent parametric
    /// curve, invalid parameters, and internal defects of the triangulation.
    pub fn add(&self, face: &Face) -> Result<FaceMeshResult, FaceMeshError> {
        let surface = face
            .surface
            .as_deref()
            .ok_or(FaceMeshError::NullSurface { face: face.id })?;
        self.params.validate()?;
        let fallback = ProgressRange::new();
        let progress = self.progress.unwrap_or(&fallback);
        let mut status = MeshStatus {
            target_deflection: self.params.linear_deflection,
            ..MeshStatus::default()
        };

        if face.is_empty_shape() {
            tracing::debug!(face = %face.id, "empty shape");
            return Ok(empty_result(face, status));
        }

        let kind = surface.kind();
        let algo = NodeInsertionMeshAlgo::for_surface(&kind, self.params.node_insertion_mode);
        let mut discretizer = EdgeDiscretizer::new(self.params);
        let mut attempt = 0;
        let prepared = loop {
            if progress.is_cancelled() {
                tracing::warn!(face = %face.id, "meshing cancelled before triangulation");
                status.cancelled = true;
                return Ok(empty_result(face, status));
            }
            progress.report(0, 4, "discretizing edges");
            let wires = self.discretize_edges(face, surface, &discretizer, attempt == 0)?;
            status.stage = MeshStage::EdgesDiscretized;
            let Some(prepared) = self.prepare(face, surface, &wires, &algo)? else {
                tracing::debug!(face = %face.id, "boundary encloses nothing");
                return Ok(empty_result(face, status));
            };
            status.stage = MeshStage::BoundaryAssembled;
            let intersecting = prepared.delaunay.boundary_report().is_self_intersecting();
            if !intersecting || attempt == MAX_DISCRETIZATION_RETRIES {
                break prepared;
            }
            attempt += 1;
            discretizer = discretizer.with_linear_deflection(retry_deflection(
                discretizer.linear_deflection(),
                self.params.constants.confusion,
            ));
            tracing::debug!(
                face = %face.id,
                attempt,
                deflection = discretizer.linear_deflection(),
                "boundary self-intersects, refining edges"
            );
        };

        let Prepared {
            attribute,
            split,
            mut delaunay,
            loops,
            fixed,
            gaps,
        } = prepared;
        status.discretization_retries = attempt;
        status.boundary_gaps = gaps;
        status.target_deflection = attribute.face_deflection;
        status.self_intersecting_boundary = delaunay.boundary_report().is_self_intersecting();
        if status.self_intersecting_boundary {
            tracing::warn!(face = %face.id, "boundary still self-intersects, meshing best effort");
        }

        let ctx = NodeContext {
            surface,
            domain: &attribute.domain,
            classifier: &attribute.classifier,
            params: &split,
        };
        progress.report(1, 4, "base mesh");
        let outcome = algo.build_base_mesh(&mut delaunay, &loops, &fixed, &ctx)?;
        status.unrecovered_frontier_edges = outcome.base.unrecovered.len();
        status.stage = MeshStage::BaseMeshed;
        tracing::debug!(
            face = %face.id,
            splitter = algo.splitter().name(),
            mode = %algo.mode(),
            triangles = delaunay.mesh().number_of_triangles(),
            "base mesh built"
        );

        if progress.is_cancelled() {
            tracing::warn!(face = %face.id, "meshing cancelled after base mesh");
            status.cancelled = true;
        } else {
            progress.report(2, 4, "refining");
            self.refine(&mut delaunay, surface, &kind, &attribute, &algo, &ctx, progress, &mut status)?;
        }

        progress.report(3, 4, "exporting");
        let (repaired, remaining) = self.repair_null_triangles(&mut delaunay, &attribute)?;
        status.null_triangles = remaining;
        if repaired > 0 && status.control_passes > 0 {
            self.measure(&delaunay, surface, &attribute, &mut status)?;
        }
        let triangulation = export(delaunay, &attribute, face, status.achieved_deflection)?;
        status.stage = MeshStage::Done;
        progress.report(4, 4, "done");
        tracing::debug!(
            face = %face.id,
            nodes = triangulation.nb_nodes(),
            triangles = triangulation.nb_triangles(),
            deflection = status.achieved_deflection,
            "face meshed"
        );
        Ok(FaceMeshResult {
            triangulation,
            status,
        })
    }

    /// Discretizes every edge, wire by wire.
    fn discretize_edges(
        &self,
        face: &Face,
        surface: &dyn SurfaceEvaluator,
        discretizer: &EdgeDiscretizer,
        allow_share: bool,
    ) -> Result<Vec<Vec<DiscretizedEdge>>, FaceMeshError> {
        let shared = self.provider.filter(|_| self.params.with_share && allow_share);
        let mut wires = Vec::with_capacity(face.wires.len());
        for wire in &face.wires {
            let mut edges = Vec::with_capacity(wire.edges.len());
            for edge in &wire.edges {
                let inconsistent = |detail| FaceMeshError::InconsistentCurve {
                    face: face.id,
                    edge: edge.id,
                    detail,
                };
                if !edge.range.iter().all(|t| t.is_finite()) {
                    return Err(inconsistent("parameter range is not finite"));
                }
                let discretized = match shared {
                    Some(provider) => {
                        let polygon =
                            provider.get_or_discretize(edge.id, || discretizer.polygon(edge, surface));
                        DiscretizedEdge::realize(edge, surface, &polygon)
                    }
                    None => discretizer.discretize(edge, surface),
                };
                let finite = discretized.uv.iter().all(|p| p.x.is_finite() && p.y.is_finite())
                    && discretized.points.iter().all(|p| p.coords.iter().all(|c| c.is_finite()));
                if !finite {
                    return Err(inconsistent("curve evaluates to non-finite points"));
                }
                edges.push(discretized);
            }
            wires.push(edges);
        }
        Ok(wires)
    }

    /// Builds the face context and registers the boundary.
    ///
    /// Returns `None` when the boundary encloses nothing to mesh.
    fn prepare(
        &self,
        face: &Face,
        surface: &dyn SurfaceEvaluator,
        wires: &[Vec<DiscretizedEdge>],
        algo: &NodeInsertionMeshAlgo,
    ) -> Result<Option<Prepared>, FaceMeshError> {
        let consts = &self.params.constants;
        let mut domain = ParamDomain::default();
        for uv in wires.iter().flatten().flat_map(|e| e.uv.iter()) {
            domain.add_point(uv);
        }
        domain.adjust_range(surface);
        if !domain.has_valid_range() {
            return Ok(None);
        }
        let lengths = domain.compute_lengths(surface);
        if !domain.is_valid() {
            return Err(FaceMeshError::DegenerateSurface {
                face: face.id,
                lengths,
            });
        }

        let tolerance = domain.tolerance(consts.uv_deflection, consts.pconfusion);
        let boundary = assemble_boundary(wires, tolerance);
        let face_deflection = self.face_deflection(face, wires);
        let max_tol = tolerance[0].max(tolerance[1]);
        let split = SplitParameters {
            deflection: face_deflection,
            angle: self.params.angular_deflection,
            min_size: self.params.min_size,
            boundary_u_params: sorted_params(boundary.loops.iter().flatten().map(|n| n.uv.x), tolerance[0]),
            boundary_v_params: sorted_params(boundary.loops.iter().flatten().map(|n| n.uv.y), tolerance[1]),
        };
        domain.set_delta(algo.splitter().compute_delta(surface, &domain, &split));
        let [du, dv] = domain.delta();
        let normalized_tol = [tolerance[0] / du, tolerance[1] / dv];
        let cell_size = normalized_tol.map(|t| t * consts.cell_factor);
        let classifier = PolygonClassifier::new(
            boundary
                .loops
                .iter()
                .map(|nodes| nodes.iter().map(|n| n.uv).collect())
                .collect(),
            max_tol,
        );

        let mut mesh = MeshData::new(normalized_tol, cell_size);
        let mut register = |node: &BoundaryNode, movability: Movability| {
            let uv = domain.scale(&node.uv, true);
            mesh.add_or_find_vertex(MeshVertex::new(uv, node.point, movability)).0
        };
        let loops: Vec<Vec<VertexKey>> = boundary
            .loops
            .iter()
            .map(|nodes| nodes.iter().map(|n| register(n, Movability::Frontier)).collect())
            .collect();
        let mut fixed = Vec::new();
        for polyline in &boundary.fixed {
            let keys: Vec<VertexKey> = polyline.iter().map(|n| register(n, Movability::Fixed)).collect();
            fixed.extend(keys.windows(2).map(|w| (w[0], w[1])));
        }
        if self.params.internal_vertices_mode {
            for uv in &face.internal_vertices {
                if classifier.classify(uv) == Classification::In {
                    let node = BoundaryNode {
                        uv: *uv,
                        point: surface.value(uv),
                    };
                    register(&node, Movability::Fixed);
                } else {
                    tracing::debug!(face = %face.id, uv = ?uv, "internal vertex outside the face ignored");
                }
            }
        }

        let distinct: FastHashSet<VertexKey> = loops.iter().flatten().copied().collect();
        if distinct.len() < 3 {
            return Ok(None);
        }
        let checker = SegmentIntersectionChecker::new(
            consts.tangent_angle,
            normalized_tol[0].max(normalized_tol[1]),
        );
        let mut delaunay = Delaunay::new(mesh).with_checker(checker);
        delaunay.build_boundary(&loops, &fixed)?;

        Ok(Some(Prepared {
            attribute: FaceAttribute {
                face_deflection,
                domain,
                tolerance,
                cell_size,
                classifier,
            },
            split,
            delaunay,
            loops,
            fixed,
            gaps: boundary.gaps,
        }))
    }

    /// Linear deflection, or the floored average of the edge deflections in relative mode.
    fn face_deflection(&self, face: &Face, wires: &[Vec<DiscretizedEdge>]) -> f64 {
        if !self.params.relative {
            return self.params.linear_deflection;
        }
        let edges: Vec<&DiscretizedEdge> = wires.iter().flatten().collect();
        if edges.is_empty() {
            return self.params.linear_deflection;
        }
        let average = edges.iter().map(|e| e.deflection).sum::<f64>() / edges.len() as f64;
        let max_tolerance = face
            .wires
            .iter()
            .flat_map(|w| w.edges.iter().map(|e| e.tolerance))
            .fold(face.tolerance, f64::max);
        average.max(2.0 * max_tolerance)
    }

    /// Surface nodes plus the control loop.
    #[allow(clippy::too_many_arguments)]
    fn refine(
        &self,
        delaunay: &mut Delaunay,
        surface: &dyn SurfaceEvaluator,
        kind: &SurfaceKind,
        attribute: &FaceAttribute,
        algo: &NodeInsertionMeshAlgo,
        ctx: &NodeContext<'_>,
        progress: &ProgressRange,
        status: &mut MeshStatus,
    ) -> Result<(), FaceMeshError> {
        let consts = &self.params.constants;
        let target = attribute.face_deflection;
        let domain = &attribute.domain;
        if domain.u_range() < consts.uv_deflection || domain.v_range() < consts.uv_deflection {
            tracing::debug!("face is a line in parameter space, refinement skipped");
            self.measure(delaunay, surface, attribute, status)?;
            status.control_passes = 1;
            return Ok(());
        }

        let needs_nodes = match kind {
            SurfaceKind::Sphere { .. } | SurfaceKind::Torus { .. } => true,
            _ => {
                let trial = self.control(delaunay, surface, attribute, true)?;
                trial.deviation > target
                    || trial.deviation < 0.0
                    || closed_direction_needs_nodes(surface, kind, ctx.params)
            }
        };
        if needs_nodes {
            let stats = algo.post_process_mesh(delaunay, ctx, progress)?;
            if stats.cancelled {
                status.cancelled = true;
                return self.measure(delaunay, surface, attribute, status);
            }
        }

        status.stage = MeshStage::ControlPass;
        if !self.params.control_surface_deflection {
            self.measure(delaunay, surface, attribute, status)?;
            status.control_passes = 1;
            return Ok(());
        }

        // The last pass only measures, so the recorded deviation is the one
        // of the mesh handed to the caller.
        let passes = self.params.max_control_passes;
        for pass in 1..=passes {
            if progress.is_cancelled() {
                tracing::warn!("control loop cancelled");
                status.cancelled = true;
                return self.measure(delaunay, surface, attribute, status);
            }
            let report = self.control(delaunay, surface, attribute, false)?;
            status.control_passes += 1;
            record(status, &report, target);
            tracing::trace!(
                pass = status.control_passes,
                deviation = report.deviation,
                bad_triangles = report.bad_triangles.len(),
                bad_edges = report.bad_edges,
                "control pass"
            );
            if status.converged || report.nodes.is_empty() || pass == passes {
                break;
            }
            let stats = algo.insert_nodes(delaunay, &report.nodes, ctx, progress)?;
            if stats.cancelled {
                status.cancelled = true;
                return self.measure(delaunay, surface, attribute, status);
            }
            if stats.inserted == 0 {
                break;
            }
        }
        if !status.converged {
            tracing::warn!(
                achieved = status.achieved_deflection,
                target,
                passes = status.control_passes,
                "surface deflection not reached"
            );
        }
        Ok(())
    }

    /// Records the deviation of the mesh as it stands.
    fn measure(
        &self,
        delaunay: &Delaunay,
        surface: &dyn SurfaceEvaluator,
        attribute: &FaceAttribute,
        status: &mut MeshStatus,
    ) -> Result<(), FaceMeshError> {
        let report = self.control(delaunay, surface, attribute, false)?;
        record(status, &report, attribute.face_deflection);
        Ok(())
    }

    /// Measures the chordal deviation of the mesh against the surface.
    ///
    /// Every non-null triangle is checked at its centroid and every free edge
    /// at its midpoint. Offending triangles and edges long enough to be split
    /// contribute their centroid or midpoint to [`ControlReport::nodes`]. On
    /// the first pass the scan stops at the first excess.
    ///
    /// # Errors
    ///
    /// Fails on internal consistency violations.
    pub fn control(
        &self,
        delaunay: &Delaunay,
        surface: &dyn SurfaceEvaluator,
        attribute: &FaceAttribute,
        first_pass: bool,
    ) -> Result<ControlReport, FaceMeshError> {
        let mesh = delaunay.mesh();
        let consts = &self.params.constants;
        let mut report = ControlReport::default();
        if mesh.number_of_triangles() == 0 {
            report.deviation = -1.0;
            return Ok(report);
        }
        let defl2 = attribute.face_deflection * attribute.face_deflection;
        let min_size2 = self.params.min_size * self.params.min_size;
        let mut max_dev2: f64 = 0.0;
        let mut checked: FastHashSet<EdgeKey> = fast_hash_set_with_capacity(mesh.number_of_edges());

        for (t, triangle) in mesh.triangles() {
            let (uv, p) = corners_of(mesh, mesh.triangle_vertices(t)?, attribute)?;
            let Some(normal) = triangle_normal(&uv, &p, consts) else {
                report.null_triangles.push(t);
                continue;
            };

            let centroid = Point2::from((uv[0].coords + uv[1].coords + uv[2].coords) / 3.0);
            let dev = normal.dot(&(surface.value(&centroid) - p[0]));
            let dev2 = dev * dev;
            max_dev2 = max_dev2.max(dev2);
            if dev2 > defl2 {
                report.bad_triangles.push(t);
                if first_pass {
                    report.deviation = max_dev2.sqrt();
                    return Ok(report);
                }
                let longest2 = (0..3)
                    .map(|i| (p[(i + 1) % 3] - p[i]).norm_squared())
                    .fold(0.0, f64::max);
                if longest2 > min_size2 {
                    report.nodes.push(centroid);
                }
            }

            for e in triangle.edges {
                let edge = mesh.get_edge(e)?;
                if edge.movability.is_constrained() || !checked.insert(e) {
                    continue;
                }
                let (a, b) = (
                    mesh.vertex(edge.first).ok_or(MeshDataError::MissingVertex { vertex: edge.first })?,
                    mesh.vertex(edge.last).ok_or(MeshDataError::MissingVertex { vertex: edge.last })?,
                );
                let (ua, ub) = (
                    attribute.domain.scale(&a.uv, false),
                    attribute.domain.scale(&b.uv, false),
                );
                let mid = Point2::from(0.5 * (ua.coords + ub.coords));
                let d2 = squared_deflection_of_segment(&a.point, &b.point, &surface.value(&mid));
                max_dev2 = max_dev2.max(d2);
                if d2 > defl2 {
                    report.bad_edges += 1;
                    if first_pass {
                        report.deviation = max_dev2.sqrt();
                        return Ok(report);
                    }
                    if (b.point - a.point).norm_squared() > min_size2 {
                        report.nodes.push(mid);
                    }
                }
            }
        }
        report.deviation = max_dev2.sqrt();
        Ok(report)
    }

    /// Flips the longest free edge of each null triangle when that yields two
    /// valid triangles; flags the triangles that stay null.
    ///
    /// Returns the number of flips and of triangles still null.
    fn repair_null_triangles(
        &self,
        delaunay: &mut Delaunay,
        attribute: &FaceAttribute,
    ) -> Result<(usize, usize), FaceMeshError> {
        let consts = &self.params.constants;
        let mesh = delaunay.mesh_mut();
        let candidates: Vec<TriangleKey> = mesh
            .triangle_keys()
            .into_iter()
            .filter(|&t| matches!(is_null_triangle(mesh, t, attribute, consts), Ok(true)))
            .collect();

        let mut repaired = 0;
        for t in candidates {
            if mesh.triangle(t).is_none() || !is_null_triangle(mesh, t, attribute, consts)? {
                continue;
            }
            let mut edges: Vec<(f64, EdgeKey)> = Vec::with_capacity(3);
            for e in mesh.get_triangle(t)?.edges {
                let edge = mesh.get_edge(e)?;
                if edge.movability.is_constrained() || mesh.triangles_of(e).len() != 2 {
                    continue;
                }
                let length = (mesh.uv(edge.last)? - mesh.uv(edge.first)?).norm_squared();
                edges.push((length, e));
            }
            edges.sort_by(|a, b| b.0.total_cmp(&a.0));
            for (_, e) in edges {
                if !flip_is_valid(mesh, e, attribute, consts)? {
                    continue;
                }
                match flip_edge(mesh, e) {
                    Ok(_) => {
                        repaired += 1;
                        break;
                    }
                    Err(FlipError::NonConvexQuad { .. }) => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        let mut remaining = 0;
        for t in mesh.triangle_keys() {
            let null = is_null_triangle(mesh, t, attribute, consts)?;
            mesh.set_null(t, null)?;
            remaining += usize::from(null);
        }
        if repaired > 0 || remaining > 0 {
            tracing::debug!(repaired, remaining, "null triangles");
        }
        Ok((repaired, remaining))
    }
}

/// Unit normal of a triangle, `None` when it is null.
fn triangle_normal(uv: &[Point2<f64>; 3], p: &[Point3<f64>; 3], consts: &MeshConstants) -> Option<Vector3<f64>> {
    for i in 0..3 {
        if (p[(i + 1) % 3] - p[i]).norm_squared() < consts.min_sq_length_3d {
            return None;
        }
    }
    if orient2d(&uv[0], &uv[1], &uv[2]).abs() < consts.min_area_2d {
        return None;
    }
    let n = (p[1] - p[0]).cross(&(p[2] - p[0]));
    let length = n.norm();
    (length >= consts.confusion).then(|| n / length)
}

fn corners_of(
    mesh: &MeshData,
    keys: [VertexKey; 3],
    attribute: &FaceAttribute,
) -> Result<([Point2<f64>; 3], [Point3<f64>; 3]), MeshDataError> {
    let mut uv = [Point2::origin(); 3];
    let mut p = [Point3::origin(); 3];
    for (i, &v) in keys.iter().enumerate() {
        let vertex = mesh.vertex(v).ok_or(MeshDataError::MissingVertex { vertex: v })?;
        uv[i] = attribute.domain.scale(&vertex.uv, false);
        p[i] = vertex.point;
    }
    Ok((uv, p))
}

fn is_null_triangle(
    mesh: &MeshData,
    t: TriangleKey,
    attribute: &FaceAttribute,
    consts: &MeshConstants,
) -> Result<bool, MeshDataError> {
    let (uv, p) = corners_of(mesh, mesh.triangle_vertices(t)?, attribute)?;
    Ok(triangle_normal(&uv, &p, consts).is_none())
}

/// Both triangles produced by flipping `e` would be valid.
fn flip_is_valid(
    mesh: &MeshData,
    e: EdgeKey,
    attribute: &FaceAttribute,
    consts: &MeshConstants,
) -> Result<bool, MeshDataError> {
    let edge = *mesh.get_edge(e)?;
    let sides = mesh.triangles_of(e);
    let (c, d) = (mesh.opposite_vertex(sides[0], e)?, mesh.opposite_vertex(sides[1], e)?);
    for keys in [[edge.first, d, c], [edge.last, c, d]] {
        let (uv, p) = corners_of(mesh, keys, attribute)?;
        if triangle_normal(&uv, &p, consts).is_none() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn closed_direction_needs_nodes(
    surface: &dyn SurfaceEvaluator,
    kind: &SurfaceKind,
    split: &SplitParameters,
) -> bool {
    if !kind.is_free_form() {
        return false;
    }
    (surface.is_u_closed() && split.boundary_v_params.len() > 2)
        || (surface.is_v_closed() && split.boundary_u_params.len() > 2)
}

/// Edge deflection for the next discretization attempt, floored at `confusion`.
fn retry_deflection(current: f64, confusion: f64) -> f64 {
    (current / RETRY_DEFLECTION_FACTOR).max(confusion)
}

fn record(status: &mut MeshStatus, report: &ControlReport, target: f64) {
    status.achieved_deflection = report.deviation.max(0.0);
    status.converged = report.deviation <= target;
}

fn empty_result(face: &Face, mut status: MeshStatus) -> FaceMeshResult {
    status.converged = !status.cancelled;
    status.stage = if status.cancelled {
        status.stage
    } else {
        MeshStage::Done
    };
    FaceMeshResult {
        triangulation: Triangulation::new(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            0.0,
            face.orientation == FaceOrientation::Reversed,
        ),
        status,
    }
}

/// Compacts the mesh into the flat output product.
fn export(
    mut delaunay: Delaunay,
    attribute: &FaceAttribute,
    face: &Face,
    deflection: f64,
) -> Result<Triangulation, FaceMeshError> {
    delaunay.mark_quality_controlled()?;
    let mesh = delaunay.finalize()?;
    let compaction = mesh.compaction();
    let missing = |vertex| MeshDataError::MissingVertex { vertex };

    let mut nodes = Vec::with_capacity(compaction.len());
    let mut uv_nodes = Vec::with_capacity(compaction.len());
    for &key in compaction.order() {
        let vertex = mesh.vertex(key).ok_or_else(|| missing(key))?;
        nodes.push(vertex.point);
        uv_nodes.push(attribute.domain.scale(&vertex.uv, false));
    }
    let index = |key: VertexKey| compaction.index_of(key).ok_or_else(|| missing(key));

    let reversed = face.orientation == FaceOrientation::Reversed;
    let mut triangles = Vec::with_capacity(mesh.number_of_triangles());
    for (t, _) in mesh.triangles() {
        let [a, b, c] = mesh.triangle_vertices(t)?;
        let (a, b, c) = (index(a)?, index(b)?, index(c)?);
        triangles.push(if reversed { [a, c, b] } else { [a, b, c] });
    }
    let mut edges = Vec::with_capacity(mesh.number_of_edges());
    for (e, edge) in mesh.edges() {
        if mesh.triangles_of(e).is_empty() {
            continue;
        }
        edges.push(([index(edge.first)?, index(edge.last)?], edge.is_frontier()));
    }
    Ok(Triangulation::new(nodes, uv_nodes, triangles, edges, deflection, reversed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::surface::{Cylinder, Frame, Plane};
    use crate::mesh::attribute::MeshParametersBuilder;
    use crate::mesh::face::{FaceEdge, Wire};
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::Arc;

    fn plane() -> Arc<dyn SurfaceEvaluator> {
        Arc::new(Plane::new(Frame::default()))
    }

    fn uv_area(t: &Triangulation) -> f64 {
        t.triangles()
            .iter()
            .map(|&[a, b, c]| {
                let (pa, pb, pc) = (t.uv_nodes()[a], t.uv_nodes()[b], t.uv_nodes()[c]);
                0.5 * orient2d(&pa, &pb, &pc)
            })
            .sum()
    }

    #[test]
    fn test_null_surface_is_a_precondition_failure() {
        let params = MeshParameters::default();
        let face = Face::without_surface().with_wire(Wire::polygon(&[
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(0.0, 1.0),
        ]));
        assert!(matches!(
            FastDiscretFace::new(&params).add(&face),
            Err(FaceMeshError::NullSurface { .. })
        ));
    }

    #[test]
    fn test_empty_shape_gives_empty_triangulation() {
        let params = MeshParameters::default();
        let result = FastDiscretFace::new(&params).add(&Face::new(plane())).unwrap();
        assert!(result.triangulation.is_empty());
        assert_eq!(result.status.stage, MeshStage::Done);
    }

    #[test]
    fn test_clockwise_outer_wire_is_reoriented() {
        let params = MeshParameters::default();
        let face = Face::new(plane()).with_wire(Wire::polygon(&[
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 2.0),
            Point2::new(3.0, 2.0),
            Point2::new(3.0, 0.0),
        ]));
        let result = FastDiscretFace::new(&params).add(&face).unwrap();
        assert_relative_eq!(uv_area(&result.triangulation), 6.0, epsilon = 1e-9);
        assert_eq!(result.status.boundary_gaps, 0);
    }

    #[test]
    fn test_reversed_face_flips_triangles() {
        let params = MeshParameters::default();
        let face = Face::rectangle(plane(), [0.0, 1.0], [0.0, 1.0]).reversed();
        let result = FastDiscretFace::new(&params).add(&face).unwrap();
        assert!(result.triangulation.is_reversed());
        assert_relative_eq!(uv_area(&result.triangulation), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_internal_vertex_is_kept() {
        let params = MeshParameters::default();
        let face = Face::rectangle(plane(), [0.0, 1.0], [0.0, 1.0])
            .with_internal_vertex(Point2::new(0.3, 0.4))
            .with_internal_vertex(Point2::new(5.0, 5.0));
        let result = FastDiscretFace::new(&params).add(&face).unwrap();
        assert_eq!(result.triangulation.nb_nodes(), 5);
        assert_eq!(result.triangulation.nb_triangles(), 4);
        let skipped = MeshParametersBuilder::default()
            .internal_vertices_mode(false)
            .build()
            .unwrap();
        let result = FastDiscretFace::new(&skipped).add(&face).unwrap();
        assert_eq!(result.triangulation.nb_nodes(), 4);
    }

    #[test]
    fn test_gap_between_edges_is_bridged() {
        let params = MeshParameters::default();
        let face = Face::new(plane()).with_wire(Wire::new(vec![
            FaceEdge::segment(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)),
            FaceEdge::segment(Point2::new(1.0, 0.1), Point2::new(1.0, 1.0)),
            FaceEdge::segment(Point2::new(1.0, 1.0), Point2::new(0.0, 1.0)),
            FaceEdge::segment(Point2::new(0.0, 1.0), Point2::new(0.0, 0.0)),
        ]));
        let result = FastDiscretFace::new(&params).add(&face).unwrap();
        assert_eq!(result.status.boundary_gaps, 1);
        assert_relative_eq!(uv_area(&result.triangulation), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cylinder_patch_meets_deflection() {
        let params = MeshParameters::default();
        let cylinder: Arc<dyn SurfaceEvaluator> = Arc::new(Cylinder::new(Frame::default(), 1.0));
        let face = Face::rectangle(cylinder, [0.0, FRAC_PI_2], [0.0, 1.0]);
        let result = FastDiscretFace::new(&params).add(&face).unwrap();
        let t = &result.triangulation;
        assert!(t.nb_triangles() > 2);
        assert!(result.status.converged);
        assert!(result.status.achieved_deflection <= 0.01);
        // Chords lie inside the cylinder.
        assert!(t.area() < FRAC_PI_2);
        assert!(t.area() > 0.98 * FRAC_PI_2);
        for p in t.nodes() {
            assert_relative_eq!(p.x.hypot(p.y), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_control_reports_no_triangles() {
        let params = MeshParameters::default();
        let driver = FastDiscretFace::new(&params);
        let attribute = FaceAttribute {
            face_deflection: 0.01,
            domain: ParamDomain::from_parts([0.0, 1.0], [0.0, 1.0], [1.0, 1.0]),
            tolerance: [1e-9, 1e-9],
            cell_size: [0.1, 0.1],
            classifier: PolygonClassifier::default(),
        };
        let report = driver
            .control(&Delaunay::new(MeshData::default()), &Plane::default(), &attribute, false)
            .unwrap();
        assert_relative_eq!(report.deviation, -1.0);
    }

    #[test]
    fn test_retry_deflection_is_floored_at_confusion() {
        let confusion = MeshConstants::default().confusion;
        assert_relative_eq!(retry_deflection(0.03, confusion), 0.01);
        let mut deflection = 0.01;
        for _ in 0..MAX_DISCRETIZATION_RETRIES * 4 {
            deflection = retry_deflection(deflection, confusion);
        }
        assert_relative_eq!(deflection, confusion);
        assert_relative_eq!(retry_deflection(confusion, confusion), confusion);
    }
}
