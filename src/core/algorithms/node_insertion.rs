//! Interior node insertion on top of a base triangulation.
//!
//! [`NodeInsertionMeshAlgo`] pairs a [`RangeSplitter`], which knows where a
//! surface family needs interior samples, with a [`BaseMeshAlgo`], which
//! knows how to triangulate the boundary and insert vertices. Nodes are
//! either registered before the base triangulation
//! ([`NodeInsertionMode::PreProcess`]) or inserted into it afterwards
//! ([`NodeInsertionMode::PostProcess`]).

use std::fmt::{self, Debug};

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::core::algorithms::delaunay::{
    BaseMeshReport, BoundaryReport, Delaunay, DelaunayError, DelaunayState, InsertionStats,
};
use crate::core::mesh_data::{MeshData, VertexKey};
use crate::core::progress::ProgressRange;
use crate::core::vertex::{MeshVertex, Movability};
use crate::geometry::classifier::{Classification, Classifier};
use crate::geometry::geom_tool;
use crate::geometry::range_splitter::{
    ParamDomain, RangeSplitter, SplitParameters, range_splitter_for,
};
use crate::geometry::surface::{SurfaceEvaluator, SurfaceKind};

/// When interior nodes enter the triangulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeInsertionMode {
    /// Registered before the base triangulation and triangulated with the boundary.
    PreProcess,
    /// Inserted into the finished base triangulation.
    #[default]
    PostProcess,
}

impl fmt::Display for NodeInsertionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreProcess => write!(f, "pre-process"),
            Self::PostProcess => write!(f, "post-process"),
        }
    }
}

/// Reports of the boundary build and the base triangulation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BaseMeshOutcome {
    /// Constraint bookkeeping.
    pub boundary: BoundaryReport,
    /// Triangulation counters.
    pub base: BaseMeshReport,
}

/// Builds and refines the triangulation of one face.
pub trait BaseMeshAlgo: Send + Sync + Debug {
    /// Short identifier for logs.
    fn name(&self) -> &'static str;

    /// Records the boundary, unless the caller already did, and triangulates
    /// every registered vertex.
    ///
    /// # Errors
    ///
    /// Propagates [`DelaunayError`].
    fn init_data_structure(
        &self,
        delaunay: &mut Delaunay,
        loops: &[Vec<VertexKey>],
        fixed: &[(VertexKey, VertexKey)],
    ) -> Result<BaseMeshOutcome, DelaunayError>;

    /// Inserts registered vertices into the finished base triangulation.
    ///
    /// # Errors
    ///
    /// Propagates [`DelaunayError`].
    fn post_process_mesh(
        &self,
        delaunay: &mut Delaunay,
        nodes: &[VertexKey],
        progress: &ProgressRange,
    ) -> Result<InsertionStats, DelaunayError>;
}

/// Incremental constrained Delaunay base algorithm.
#[derive(Clone, Copy, Debug, Default)]
pub struct DelaunayBaseMeshAlgo;

impl BaseMeshAlgo for DelaunayBaseMeshAlgo {
    fn name(&self) -> &'static str {
        "delaunay"
    }

    fn init_data_structure(
        &self,
        delaunay: &mut Delaunay,
        loops: &[Vec<VertexKey>],
        fixed: &[(VertexKey, VertexKey)],
    ) -> Result<BaseMeshOutcome, DelaunayError> {
        let boundary = if delaunay.state() == DelaunayState::BoundaryBuilt {
            delaunay.boundary_report()
        } else {
            delaunay.build_boundary(loops, fixed)?
        };
        let base = delaunay.triangulate()?;
        Ok(BaseMeshOutcome { boundary, base })
    }

    fn post_process_mesh(
        &self,
        delaunay: &mut Delaunay,
        nodes: &[VertexKey],
        progress: &ProgressRange,
    ) -> Result<InsertionStats, DelaunayError> {
        delaunay.add_vertices(nodes, progress)
    }
}

/// Face data needed to turn candidate parameters into mesh vertices.
#[derive(Clone, Copy, Debug)]
pub struct NodeContext<'a> {
    /// Surface of the face.
    pub surface: &'a dyn SurfaceEvaluator,
    /// Parametric extent and normalization.
    pub domain: &'a ParamDomain,
    /// Trimmed-domain classifier, in face parameters.
    pub classifier: &'a dyn Classifier,
    /// Node generation inputs.
    pub params: &'a SplitParameters,
}

/// Range splitter plus base algorithm.
#[derive(Debug)]
pub struct NodeInsertionMeshAlgo {
    splitter: Box<dyn RangeSplitter>,
    base: Box<dyn BaseMeshAlgo>,
    mode: NodeInsertionMode,
}

impl NodeInsertionMeshAlgo {
    /// Composes a splitter and a base algorithm.
    #[must_use]
    pub fn new(
        splitter: Box<dyn RangeSplitter>,
        base: Box<dyn BaseMeshAlgo>,
        mode: NodeInsertionMode,
    ) -> Self {
        Self {
            splitter,
            base,
            mode,
        }
    }

    /// The splitter matching `kind` over the Delaunay base algorithm.
    #[must_use]
    pub fn for_surface(kind: &SurfaceKind, mode: NodeInsertionMode) -> Self {
        Self::new(range_splitter_for(kind), Box::new(DelaunayBaseMeshAlgo), mode)
    }

    /// Node strategy in use.
    #[must_use]
    pub fn splitter(&self) -> &dyn RangeSplitter {
        self.splitter.as_ref()
    }

    /// Insertion mode in use.
    #[must_use]
    pub const fn mode(&self) -> NodeInsertionMode {
        self.mode
    }

    /// Grid resolution advised for a face with `vertices_nb` boundary vertices.
    #[must_use]
    pub fn cells_count(
        &self,
        kind: &SurfaceKind,
        vertices_nb: usize,
        deflection: f64,
        domain: &ParamDomain,
    ) -> (usize, usize) {
        geom_tool::cells_count(kind, vertices_nb, deflection, domain)
    }

    /// Registers the candidates classified inside the face.
    ///
    /// Candidates are given in face parameters. Accepted ones are stored in
    /// normalized coordinates as free vertices; candidates coinciding with
    /// an existing vertex are dropped. Returns the keys of the new vertices,
    /// which is empty when nothing was accepted.
    pub fn register_nodes(
        &self,
        mesh: &mut MeshData,
        candidates: &[Point2<f64>],
        ctx: &NodeContext<'_>,
    ) -> Vec<VertexKey> {
        let mut keys = Vec::new();
        for uv in candidates {
            if ctx.classifier.classify(uv) != Classification::In {
                continue;
            }
            let point = ctx.surface.value(uv);
            let normalized = ctx.domain.scale(uv, true);
            let (key, created) =
                mesh.add_or_find_vertex(MeshVertex::new(normalized, point, Movability::Free));
            if created {
                keys.push(key);
            }
        }
        keys
    }

    /// Registers the candidates and inserts them into the triangulation.
    ///
    /// `stats.inserted > 0` tells whether the mesh changed.
    ///
    /// # Errors
    ///
    /// Propagates [`DelaunayError`].
    pub fn insert_nodes(
        &self,
        delaunay: &mut Delaunay,
        candidates: &[Point2<f64>],
        ctx: &NodeContext<'_>,
        progress: &ProgressRange,
    ) -> Result<InsertionStats, DelaunayError> {
        let keys = self.register_nodes(delaunay.mesh_mut(), candidates, ctx);
        if keys.is_empty() {
            return Ok(InsertionStats::default());
        }
        self.base.post_process_mesh(delaunay, &keys, progress)
    }

    /// Builds the base triangulation, registering the surface nodes first in
    /// [`NodeInsertionMode::PreProcess`].
    ///
    /// # Errors
    ///
    /// Propagates [`DelaunayError`].
    pub fn build_base_mesh(
        &self,
        delaunay: &mut Delaunay,
        loops: &[Vec<VertexKey>],
        fixed: &[(VertexKey, VertexKey)],
        ctx: &NodeContext<'_>,
    ) -> Result<BaseMeshOutcome, DelaunayError> {
        if self.mode == NodeInsertionMode::PreProcess {
            let candidates =
                self.splitter
                    .generate_surface_nodes(ctx.surface, ctx.domain, ctx.params);
            let registered = self.register_nodes(delaunay.mesh_mut(), &candidates, ctx);
            tracing::debug!(
                splitter = self.splitter.name(),
                candidates = candidates.len(),
                registered = registered.len(),
                "surface nodes registered before triangulation"
            );
        }
        self.base.init_data_structure(delaunay, loops, fixed)
    }

    /// Generates and inserts the surface nodes in
    /// [`NodeInsertionMode::PostProcess`]; a no-op otherwise.
    ///
    /// # Errors
    ///
    /// Propagates [`DelaunayError`].
    pub fn post_process_mesh(
        &self,
        delaunay: &mut Delaunay,
        ctx: &NodeContext<'_>,
        progress: &ProgressRange,
    ) -> Result<InsertionStats, DelaunayError> {
        if self.mode != NodeInsertionMode::PostProcess {
            return Ok(InsertionStats::default());
        }
        let candidates = self
            .splitter
            .generate_surface_nodes(ctx.surface, ctx.domain, ctx.params);
        let stats = self.insert_nodes(delaunay, &candidates, ctx, progress)?;
        tracing::debug!(
            splitter = self.splitter.name(),
            base = self.base.name(),
            candidates = candidates.len(),
            inserted = stats.inserted,
            rejected = stats.rejected(),
            "surface nodes inserted"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::classifier::PolygonClassifier;
    use crate::geometry::surface::{Cylinder, Frame};
    use std::f64::consts::FRAC_PI_2;

    fn rectangle(u: f64, v: f64) -> Vec<Point2<f64>> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(u, 0.0),
            Point2::new(u, v),
            Point2::new(0.0, v),
        ]
    }

    struct Fixture {
        surface: Cylinder,
        domain: ParamDomain,
        classifier: PolygonClassifier,
        params: SplitParameters,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                surface: Cylinder::new(Frame::default(), 1.0),
                domain: ParamDomain::from_parts([0.0, FRAC_PI_2], [0.0, 1.0], [1.0, 1.0]),
                classifier: PolygonClassifier::new(vec![rectangle(FRAC_PI_2, 1.0)], 1e-9),
                params: SplitParameters {
                    deflection: 0.01,
                    angle: 0.5,
                    ..SplitParameters::default()
                },
            }
        }

        fn ctx(&self) -> NodeContext<'_> {
            NodeContext {
                surface: &self.surface,
                domain: &self.domain,
                classifier: &self.classifier,
                params: &self.params,
            }
        }

        fn delaunay(&self) -> (Delaunay, Vec<VertexKey>) {
            let mut mesh = MeshData::new([1e-9, 1e-9], [0.1, 0.1]);
            let corners = rectangle(FRAC_PI_2, 1.0)
                .into_iter()
                .map(|uv| {
                    mesh.add_vertex(MeshVertex::new(
                        uv,
                        self.surface.value(&uv),
                        Movability::Frontier,
                    ))
                })
                .collect();
            (Delaunay::new(mesh), corners)
        }
    }

    #[test]
    fn test_post_process_inserts_cylinder_grid() {
        let fx = Fixture::new();
        let algo = NodeInsertionMeshAlgo::for_surface(&fx.surface.kind(), NodeInsertionMode::PostProcess);
        assert_eq!(algo.splitter().name(), "cylinder");
        let (mut delaunay, corners) = fx.delaunay();
        let outcome = algo.build_base_mesh(&mut delaunay, &[corners], &[], &fx.ctx()).unwrap();
        assert_eq!(outcome.base.inserted, 4);
        assert_eq!(delaunay.mesh().number_of_triangles(), 2);

        let stats = algo.post_process_mesh(&mut delaunay, &fx.ctx(), &ProgressRange::new()).unwrap();
        assert_eq!(stats.inserted, 15);
        assert_eq!(stats.rejected(), 0);
        // 19 vertices with 4 on the hull.
        assert_eq!(delaunay.mesh().number_of_triangles(), 2 * 19 - 4 - 2);
    }

    #[test]
    fn test_pre_process_triangulates_nodes_with_boundary() {
        let fx = Fixture::new();
        let algo = NodeInsertionMeshAlgo::for_surface(&fx.surface.kind(), NodeInsertionMode::PreProcess);
        let (mut delaunay, corners) = fx.delaunay();
        let outcome = algo.build_base_mesh(&mut delaunay, &[corners], &[], &fx.ctx()).unwrap();
        assert_eq!(outcome.base.inserted, 19);
        assert!(outcome.base.unrecovered.is_empty());
        let stats = algo.post_process_mesh(&mut delaunay, &fx.ctx(), &ProgressRange::new()).unwrap();
        assert_eq!(stats, InsertionStats::default());
    }

    #[test]
    fn test_register_nodes_filters_candidates() {
        let fx = Fixture::new();
        let algo = NodeInsertionMeshAlgo::for_surface(&fx.surface.kind(), NodeInsertionMode::PostProcess);
        let (mut delaunay, _) = fx.delaunay();
        let candidates = [
            Point2::new(0.5, 0.5),
            Point2::new(0.5, 0.5),
            Point2::new(0.0, 0.5),
            Point2::new(3.0, 0.5),
        ];
        let keys = algo.register_nodes(delaunay.mesh_mut(), &candidates, &fx.ctx());
        assert_eq!(keys.len(), 1);
        let cells = algo.cells_count(&fx.surface.kind(), 4, 0.01, &fx.domain);
        assert!(cells.0 >= 2 && cells.1 >= 2);
    }
}
