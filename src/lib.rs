//! # facemesh
//!
//! Triangulation of trimmed parametric surface faces, as found in CAD
//! boundary representations, into meshes that stay within a chordal
//! deflection of the surface.
//!
//! Each face is processed in its 2D parameter space:
//!
//! - boundary edges are discretized against angular and linear deflection
//!   limits, sharing the discretization of edges common to several faces;
//! - the boundary loops become the frontier of a constrained Delaunay
//!   triangulation over a normalized parameter domain;
//! - surface nodes chosen per surface kind are inserted, then the mesh is
//!   refined until every triangle and free edge stays within the deflection.
//!
//! # Basic Usage
//!
//! ```rust
//! use facemesh::prelude::*;
//! use std::f64::consts::FRAC_PI_2;
//! use std::sync::Arc;
//!
//! // A quarter of a unit cylinder, one unit high.
//! let cylinder = Arc::new(Cylinder::new(Frame::default(), 1.0));
//! let face = Face::rectangle(cylinder, [0.0, FRAC_PI_2], [0.0, 1.0]);
//!
//! let params = MeshParametersBuilder::default()
//!     .linear_deflection(0.01)
//!     .angular_deflection(0.5)
//!     .build()
//!     .unwrap();
//! let result = FastDiscretFace::new(&params).add(&face).unwrap();
//!
//! assert!(result.status.converged);
//! assert!(result.triangulation.deflection() <= 0.01);
//! assert!(result.triangulation.nb_triangles() > 2);
//! ```
//!
//! Several faces are meshed with [`mesh::batch::mesh_faces`], which runs on
//! the rayon pool when the `parallel` feature is enabled.
//!
//! # Mesh Invariants
//!
//! [`core::mesh_data::MeshData`] maintains these invariants between public
//! operations, checked by the helpers of [`core::util::mesh_validation`]:
//!
//! | Invariant | Helper | Notes |
//! |---|---|---|
//! | Edge incidence | [`validate_structure`](core::util::mesh_validation::validate_structure) | Frontier edges border one triangle, all other edges two. |
//! | Triangle cycles | [`validate_structure`](core::util::mesh_validation::validate_structure) | The three edges of a triangle chain end to start. |
//! | Orientation | [`validate_structure`](core::util::mesh_validation::validate_structure) | Triangles are counter-clockwise in normalized UV. |
//! | Local Delaunay | [`is_locally_delaunay`](core::util::mesh_validation::is_locally_delaunay) | Free edges pass the in-circle test. |
//! | Delaunay property | [`is_delaunay`](core::util::mesh_validation::is_delaunay) | Expensive global empty-circle check. |
//!
//! Constraints win over the Delaunay property: triangles adjacent to
//! frontier edges may have other vertices in their circumcircle.
//!
//! # Outcomes
//!
//! [`mesh::fast_discret_face::FastDiscretFace::add`] returns an error only
//! for broken input (no surface, degenerate surface, non-finite curves) or an
//! internal defect. Everything else is reported in
//! [`MeshStatus`](mesh::fast_discret_face::MeshStatus): unrecovered frontier
//! edges, self-intersecting boundaries, null triangles, cancellation and
//! whether the deflection was reached.
//!
//! # Logging
//!
//! Stages are traced with [`tracing`]. Set `FACEMESH_FLIP_TRACE=1` to log
//! every edge flip at `debug` level.

#![forbid(unsafe_code)]

#[macro_use]
extern crate derive_builder;

/// Mesh data structure and the triangulation algorithms working on it.
pub mod core {
    /// Triangulation algorithms over [`mesh_data::MeshData`].
    pub mod algorithms {
        /// Constrained Delaunay triangulation driver.
        pub mod delaunay;
        /// Edge flips, legalization and frontier recovery.
        pub mod flips;
        /// Point location by walking.
        pub mod locate;
        /// Surface node generation and insertion.
        pub mod node_insertion;
    }
    /// Collection types used throughout the crate.
    pub mod collections;
    pub mod edge;
    pub mod mesh_data;
    pub mod progress;
    pub mod triangle;
    /// Mesh validation helpers.
    pub mod util {
        pub mod mesh_validation;
    }
    pub mod vertex;
}

/// Planar predicates, surfaces and parameter-space tools.
pub mod geometry {
    pub mod classifier;
    pub mod geom_tool;
    pub mod predicates;
    pub mod range_splitter;
    pub mod surface;
}

/// Face model, meshing parameters and the face driver.
pub mod mesh {
    pub mod attribute;
    pub mod batch;
    pub mod edge_discretizer;
    pub mod face;
    pub mod fast_discret_face;
    pub mod shared_edges;
    pub mod triangulation;
}

/// Re-exports of the types needed to mesh faces.
pub mod prelude {
    pub use crate::core::algorithms::delaunay::{Delaunay, DelaunayError, DelaunayState};
    pub use crate::core::algorithms::node_insertion::{NodeInsertionMeshAlgo, NodeInsertionMode};
    pub use crate::core::collections::{FastHashMap, FastHashSet, SmallBuffer};
    pub use crate::core::mesh_data::{EdgeKey, MeshData, MeshDataError, TriangleKey, VertexKey};
    pub use crate::core::progress::{Progress, ProgressRange};
    pub use crate::core::vertex::{MeshVertex, Movability};

    pub use crate::geometry::classifier::{Classification, Classifier, PolygonClassifier};
    pub use crate::geometry::surface::{
        Cone, Cylinder, FnSurface, Frame, ParamBounds, Plane, Sphere, SurfaceEvaluator,
        SurfaceKind, Torus,
    };

    pub use crate::mesh::attribute::{
        MeshConstants, MeshParameters, MeshParametersBuilder, MeshParametersError,
    };
    pub use crate::mesh::batch::mesh_faces;
    pub use crate::mesh::face::{
        Circle2d, EdgeOrientation, Face, FaceEdge, FaceOrientation, Line2d, ParametricCurve2d,
        ShapeId, Wire,
    };
    pub use crate::mesh::fast_discret_face::{
        FaceMeshError, FaceMeshResult, FastDiscretFace, MeshStage, MeshStatus,
    };
    pub use crate::mesh::shared_edges::SharedEdgeProvider;
    pub use crate::mesh::triangulation::Triangulation;
}

/// The function `is_normal` checks that structs implement `auto` traits.
/// Traits are checked at compile time, so this function is only used for
/// testing.
#[must_use]
pub const fn is_normal<T: Sized + Send + Sync + Unpin>() -> bool {
    true
}

// =============================================================================
// TESTS
// =============================================================================
