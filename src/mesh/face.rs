//! Face input model: a surface, its boundary wires and isolated vertices.
//!
//! Each boundary edge is given by a 2D curve in the parametric space of the
//! face surface plus a parameter range. The edge's 3D shape is `S(c(t))`.
//!
//! # Examples
//!
//! ```rust
//! use facemesh::geometry::surface::{Frame, Plane};
//! use facemesh::mesh::face::Face;
//! use std::sync::Arc;
//!
//! let face = Face::rectangle(Arc::new(Plane::new(Frame::default())), [0.0, 2.0], [0.0, 1.0]);
//! assert_eq!(face.wires.len(), 1);
//! assert_eq!(face.wires[0].edges.len(), 4);
//! assert!(!face.is_empty_shape());
//! ```

use std::fmt;
use std::sync::Arc;

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::surface::{CurveKind, SurfaceEvaluator};

/// Default 3D tolerance of edges and faces.
pub const DEFAULT_TOLERANCE: f64 = 1e-7;

/// Identity of a shape shared between faces (edges, mostly).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeId(Uuid);

impl ShapeId {
    /// Fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing identifier.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying identifier.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ShapeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How an edge takes part in its face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeOrientation {
    /// Traversed along increasing parameter.
    #[default]
    Forward,
    /// Traversed along decreasing parameter.
    Reversed,
    /// Lies inside the face; becomes a fixed constraint, not a boundary.
    Internal,
}

/// Orientation of the face relative to its surface normal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaceOrientation {
    /// Same as the surface.
    #[default]
    Forward,
    /// Opposite to the surface; output triangles are flipped.
    Reversed,
}

// =============================================================================
// PARAMETRIC CURVES
// =============================================================================

/// A curve in the parametric space of a surface.
pub trait ParametricCurve2d: Send + Sync + fmt::Debug {
    /// `c(t)`.
    fn value(&self, t: f64) -> Point2<f64>;

    /// Coarse classification.
    fn kind(&self) -> CurveKind {
        CurveKind::Other
    }
}

/// `c(t) = origin + t·direction`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Line2d {
    /// Point at `t = 0`.
    pub origin: Point2<f64>,
    /// Derivative.
    pub direction: Vector2<f64>,
}

impl Line2d {
    /// Line with `c(0) = a` and `c(1) = b`.
    #[must_use]
    pub fn through(a: Point2<f64>, b: Point2<f64>) -> Self {
        Self {
            origin: a,
            direction: b - a,
        }
    }
}

impl ParametricCurve2d for Line2d {
    fn value(&self, t: f64) -> Point2<f64> {
        self.origin + self.direction * t
    }

    fn kind(&self) -> CurveKind {
        CurveKind::Line
    }
}

/// `c(t) = center + radius·(cos t, sin t)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Circle2d {
    /// Center.
    pub center: Point2<f64>,
    /// Radius.
    pub radius: f64,
}

impl ParametricCurve2d for Circle2d {
    fn value(&self, t: f64) -> Point2<f64> {
        self.center + Vector2::new(t.cos(), t.sin()) * self.radius
    }

    fn kind(&self) -> CurveKind {
        CurveKind::Circle
    }
}

// =============================================================================
// TOPOLOGY
// =============================================================================

/// One edge of a face boundary.
#[derive(Clone, Debug)]
pub struct FaceEdge {
    /// Identity, shared by the faces bordering this edge.
    pub id: ShapeId,
    /// Curve in the face parametric space.
    pub pcurve: Arc<dyn ParametricCurve2d>,
    /// Parameter range `[first, last]`.
    pub range: [f64; 2],
    /// Role in the face.
    pub orientation: EdgeOrientation,
    /// Collapsed in 3D (e.g. the pole of a sphere).
    pub degenerated: bool,
    /// 3D tolerance.
    pub tolerance: f64,
}

impl FaceEdge {
    /// Forward edge over `[first, last]` with a fresh identity.
    #[must_use]
    pub fn new(pcurve: Arc<dyn ParametricCurve2d>, first: f64, last: f64) -> Self {
        Self {
            id: ShapeId::new(),
            pcurve,
            range: [first, last],
            orientation: EdgeOrientation::Forward,
            degenerated: false,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Straight segment from `a` to `b` in parameter space.
    #[must_use]
    pub fn segment(a: Point2<f64>, b: Point2<f64>) -> Self {
        Self::new(Arc::new(Line2d::through(a, b)), 0.0, 1.0)
    }

    /// Shares the identity of another edge.
    #[must_use]
    pub fn with_id(mut self, id: ShapeId) -> Self {
        self.id = id;
        self
    }

    /// Sets the orientation.
    #[must_use]
    pub fn with_orientation(mut self, orientation: EdgeOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Marks the edge as collapsed in 3D.
    #[must_use]
    pub fn degenerated(mut self) -> Self {
        self.degenerated = true;
        self
    }

    /// Sets the 3D tolerance.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Whether the parameter curve returns to its start.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        let [first, last] = self.range;
        (self.pcurve.value(first) - self.pcurve.value(last)).norm() <= self.tolerance
    }

    /// Start point in traversal order.
    #[must_use]
    pub fn start_uv(&self) -> Point2<f64> {
        match self.orientation {
            EdgeOrientation::Reversed => self.pcurve.value(self.range[1]),
            _ => self.pcurve.value(self.range[0]),
        }
    }

    /// End point in traversal order.
    #[must_use]
    pub fn end_uv(&self) -> Point2<f64> {
        match self.orientation {
            EdgeOrientation::Reversed => self.pcurve.value(self.range[0]),
            _ => self.pcurve.value(self.range[1]),
        }
    }
}

/// A chain of edges; closed for boundaries.
#[derive(Clone, Debug, Default)]
pub struct Wire {
    /// Edges in traversal order.
    pub edges: Vec<FaceEdge>,
}

impl Wire {
    /// Wire from its edges.
    #[must_use]
    pub const fn new(edges: Vec<FaceEdge>) -> Self {
        Self { edges }
    }

    /// Closed polygon through `corners`.
    #[must_use]
    pub fn polygon(corners: &[Point2<f64>]) -> Self {
        let n = corners.len();
        Self::new(
            (0..n)
                .map(|i| FaceEdge::segment(corners[i], corners[(i + 1) % n]))
                .collect(),
        )
    }
}

/// A trimmed surface patch to be meshed.
#[derive(Clone, Debug)]
pub struct Face {
    /// Identity.
    pub id: ShapeId,
    /// Underlying surface; `None` for a tessellation-only shape.
    pub surface: Option<Arc<dyn SurfaceEvaluator>>,
    /// Outer boundary and holes, in any order and orientation.
    pub wires: Vec<Wire>,
    /// Orientation relative to the surface.
    pub orientation: FaceOrientation,
    /// Isolated vertices inside the face, in parameters.
    pub internal_vertices: Vec<Point2<f64>>,
    /// 3D tolerance.
    pub tolerance: f64,
}

impl Face {
    /// Face without boundary on `surface`.
    #[must_use]
    pub fn new(surface: Arc<dyn SurfaceEvaluator>) -> Self {
        Self {
            id: ShapeId::new(),
            surface: Some(surface),
            wires: Vec::new(),
            orientation: FaceOrientation::Forward,
            internal_vertices: Vec::new(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Face with no underlying surface.
    #[must_use]
    pub fn without_surface() -> Self {
        Self {
            surface: None,
            ..Self::new(Arc::new(crate::geometry::surface::Plane::default()))
        }
    }

    /// The patch `[u0, u1] x [v0, v1]` of `surface`.
    #[must_use]
    pub fn rectangle(surface: Arc<dyn SurfaceEvaluator>, u: [f64; 2], v: [f64; 2]) -> Self {
        Self::new(surface).with_wire(Wire::polygon(&[
            Point2::new(u[0], v[0]),
            Point2::new(u[1], v[0]),
            Point2::new(u[1], v[1]),
            Point2::new(u[0], v[1]),
        ]))
    }

    /// Adds a wire.
    #[must_use]
    pub fn with_wire(mut self, wire: Wire) -> Self {
        self.wires.push(wire);
        self
    }

    /// Adds an isolated vertex.
    #[must_use]
    pub fn with_internal_vertex(mut self, uv: Point2<f64>) -> Self {
        self.internal_vertices.push(uv);
        self
    }

    /// Flips the orientation.
    #[must_use]
    pub fn reversed(mut self) -> Self {
        self.orientation = match self.orientation {
            FaceOrientation::Forward => FaceOrientation::Reversed,
            FaceOrientation::Reversed => FaceOrientation::Forward,
        };
        self
    }

    /// Sets the 3D tolerance.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// No boundary edge at all.
    #[must_use]
    pub fn is_empty_shape(&self) -> bool {
        self.wires.iter().all(|w| w.edges.is_empty())
    }

    /// Edges that are not internal, over all wires.
    pub fn boundary_edges(&self) -> impl Iterator<Item = &FaceEdge> {
        self.wires
            .iter()
            .flat_map(|w| w.edges.iter())
            .filter(|e| e.orientation != EdgeOrientation::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::surface::{Frame, Plane};
    use approx::assert_relative_eq;
    use std::f64::consts::TAU;

    #[test]
    fn test_edge_traversal_follows_orientation() {
        let e = FaceEdge::segment(Point2::new(0.0, 0.0), Point2::new(1.0, 2.0));
        assert_relative_eq!(e.end_uv(), Point2::new(1.0, 2.0));
        let r = e.clone().with_orientation(EdgeOrientation::Reversed);
        assert_relative_eq!(r.start_uv(), Point2::new(1.0, 2.0));
        assert_relative_eq!(r.end_uv(), Point2::new(0.0, 0.0));
        assert!(!e.is_closed());
    }

    #[test]
    fn test_full_circle_is_closed() {
        let circle = FaceEdge::new(
            Arc::new(Circle2d {
                center: Point2::new(0.5, 0.5),
                radius: 0.25,
            }),
            0.0,
            TAU,
        );
        assert!(circle.is_closed());
        assert_eq!(circle.pcurve.kind(), CurveKind::Circle);
    }

    #[test]
    fn test_face_builders() {
        let plane: Arc<dyn SurfaceEvaluator> = Arc::new(Plane::new(Frame::default()));
        let face = Face::rectangle(plane, [0.0, 1.0], [0.0, 1.0])
            .with_internal_vertex(Point2::new(0.5, 0.5))
            .reversed();
        assert_eq!(face.orientation, FaceOrientation::Reversed);
        assert_eq!(face.boundary_edges().count(), 4);
        assert!(Face::without_surface().surface.is_none());
        assert!(Face::without_surface().is_empty_shape());
        assert_ne!(ShapeId::new(), ShapeId::new());
    }
}
