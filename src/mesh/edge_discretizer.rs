//! Discretization of boundary edges into 2D/3D polylines.
//!
//! Parameters are chosen on the 3D image `S(c(t))` of each edge, then refined
//! until the chord midpoint stays close to the surface point at the UV midpoint.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

use super::attribute::MeshParameters;
use super::face::{EdgeOrientation, FaceEdge, ShapeId};
use crate::geometry::geom_tool::{squared_deflection_of_segment, tangential_deflection_params};
use crate::geometry::surface::SurfaceEvaluator;

/// Bisection depth of the tangential deflection sampling.
const MAX_DEPTH: u32 = 10;

/// Parameters of a discretized edge, increasing along its curve.
///
/// This is the part of a discretization shared between the faces bordering
/// the same edge; each face maps it through its own parametric curve.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgePolygon {
    /// Curve parameters, first and last included.
    pub params: Vec<f64>,
    /// Deflection the parameters were computed for.
    pub deflection: f64,
}

/// An edge realized on one face, in traversal order.
#[derive(Clone, Debug)]
pub struct DiscretizedEdge {
    /// Edge identity.
    pub id: ShapeId,
    /// Role in the face.
    pub orientation: EdgeOrientation,
    /// Collapsed in 3D.
    pub degenerated: bool,
    /// Points in face parameters.
    pub uv: Vec<Point2<f64>>,
    /// Points in 3D.
    pub points: Vec<Point3<f64>>,
    /// Deflection used.
    pub deflection: f64,
}

impl DiscretizedEdge {
    /// Maps a shared polygon through the edge's own curve.
    #[must_use]
    pub fn realize(edge: &FaceEdge, surface: &dyn SurfaceEvaluator, polygon: &EdgePolygon) -> Self {
        let mut uv: Vec<Point2<f64>> = polygon.params.iter().map(|&t| edge.pcurve.value(t)).collect();
        if edge.orientation == EdgeOrientation::Reversed {
            uv.reverse();
        }
        let points = uv.iter().map(|p| surface.value(p)).collect();
        Self {
            id: edge.id,
            orientation: edge.orientation,
            degenerated: edge.degenerated,
            uv,
            points,
            deflection: polygon.deflection,
        }
    }

    /// First point in traversal order.
    #[must_use]
    pub fn first_uv(&self) -> Option<&Point2<f64>> {
        self.uv.first()
    }

    /// Last point in traversal order.
    #[must_use]
    pub fn last_uv(&self) -> Option<&Point2<f64>> {
        self.uv.last()
    }
}

/// Samples boundary edges for a given face.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeDiscretizer {
    linear: f64,
    angle: f64,
    relative: bool,
    min_size: f64,
}

impl EdgeDiscretizer {
    /// Discretizer using half the angular and half the linear deflection.
    #[must_use]
    pub fn new(params: &MeshParameters) -> Self {
        Self {
            linear: params.linear_deflection,
            angle: 0.5 * params.angular_deflection,
            relative: params.relative,
            min_size: params.min_size,
        }
    }

    /// Same discretizer with a different linear deflection.
    #[must_use]
    pub const fn with_linear_deflection(mut self, linear: f64) -> Self {
        self.linear = linear;
        self
    }

    /// Linear deflection in use.
    #[must_use]
    pub const fn linear_deflection(&self) -> f64 {
        self.linear
    }

    /// Deflection for `edge`: absolute, or scaled by its 3D box in relative mode.
    #[must_use]
    pub fn edge_deflection(&self, edge: &FaceEdge, surface: &dyn SurfaceEvaluator) -> f64 {
        if !self.relative {
            return self.linear;
        }
        let [first, last] = edge.range;
        let mut lo = Point3::from([f64::INFINITY; 3]);
        let mut hi = Point3::from([f64::NEG_INFINITY; 3]);
        for i in 0..=8 {
            let t = first + (last - first) * f64::from(i) / 8.0;
            let p = surface.value(&edge.pcurve.value(t));
            lo = lo.inf(&p);
            hi = hi.sup(&p);
        }
        let size = (hi - lo).amax();
        if size > edge.tolerance {
            self.linear * size
        } else {
            self.linear
        }
    }

    /// Parameters of `edge` meeting the deflection limits.
    #[must_use]
    pub fn polygon(&self, edge: &FaceEdge, surface: &dyn SurfaceEvaluator) -> EdgePolygon {
        let deflection = self.edge_deflection(edge, surface);
        let [first, last] = edge.range;
        let eval = |t: f64| surface.value(&edge.pcurve.value(t));
        if edge.degenerated || is_collapsed(&eval, first, last, edge.tolerance) {
            return EdgePolygon {
                params: vec![first, last],
                deflection,
            };
        }
        let min_points = if edge.is_closed() { 4 } else { 2 };
        let half = 0.5 * deflection;
        let params = tangential_deflection_params(eval, first, last, half, self.angle, min_points, MAX_DEPTH);
        EdgePolygon {
            params: self.refine_sag(edge, surface, params, half),
            deflection,
        }
    }

    /// Discretizes `edge` on `surface`.
    #[must_use]
    pub fn discretize(&self, edge: &FaceEdge, surface: &dyn SurfaceEvaluator) -> DiscretizedEdge {
        DiscretizedEdge::realize(edge, surface, &self.polygon(edge, surface))
    }

    /// Splits spans whose 3D chord midpoint strays from `S` at the UV midpoint.
    fn refine_sag(
        &self,
        edge: &FaceEdge,
        surface: &dyn SurfaceEvaluator,
        params: Vec<f64>,
        deflection: f64,
    ) -> Vec<f64> {
        let defl2 = deflection * deflection;
        let min_size2 = self.min_size * self.min_size;
        let mut out = Vec::with_capacity(params.len());
        let Some(&start) = params.first() else {
            return out;
        };
        out.push(start);
        for w in params.windows(2) {
            let mut stack = vec![(w[0], w[1], 0_u32)];
            while let Some((a, b, depth)) = stack.pop() {
                let uv_a = edge.pcurve.value(a);
                let uv_b = edge.pcurve.value(b);
                let pa = surface.value(&uv_a);
                let pb = surface.value(&uv_b);
                let on_surface = surface.value(&Point2::from(0.5 * (uv_a.coords + uv_b.coords)));
                let chord_mid = Point3::from(0.5 * (pa.coords + pb.coords));
                let split = depth < MAX_DEPTH
                    && (pb - pa).norm_squared() > min_size2
                    && (on_surface - chord_mid).norm_squared() > defl2
                    && squared_deflection_of_segment(&pa, &pb, &on_surface) > defl2;
                if split {
                    let mid = 0.5 * (a + b);
                    stack.push((mid, b, depth + 1));
                    stack.push((a, mid, depth + 1));
                } else {
                    out.push(b);
                }
            }
        }
        out
    }
}

fn is_collapsed<F>(eval: &F, first: f64, last: f64, tolerance: f64) -> bool
where
    F: Fn(f64) -> Point3<f64>,
{
    let mut length = 0.0;
    let mut prev = eval(first);
    for i in 1..=8 {
        let next = eval(first + (last - first) * f64::from(i) / 8.0);
        length += (next - prev).norm();
        prev = next;
    }
    length < tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::surface::{Cylinder, Frame, Plane, Sphere};
    use crate::mesh::face::Circle2d;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, TAU};
    use std::sync::Arc;

    fn discretizer() -> EdgeDiscretizer {
        EdgeDiscretizer::new(&MeshParameters::default())
    }

    #[test]
    fn test_straight_edge_on_plane_has_two_points() {
        let plane = Plane::new(Frame::default());
        let edge = FaceEdge::segment(Point2::new(0.0, 0.0), Point2::new(3.0, 0.0));
        let d = discretizer().discretize(&edge, &plane);
        assert_eq!(d.uv.len(), 2);
        assert_relative_eq!(d.points[1], Point3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn test_arc_on_cylinder_respects_deflection() {
        let cyl = Cylinder::new(Frame::default(), 1.0);
        let edge = FaceEdge::segment(Point2::new(0.0, 0.0), Point2::new(FRAC_PI_2, 0.0));
        let d = discretizer().discretize(&edge, &cyl);
        assert!(d.uv.len() > 2);
        for w in d.points.windows(2) {
            let chord = (w[1] - w[0]).norm();
            // Sagitta of a unit circle chord.
            let sag = 1.0 - (1.0 - 0.25 * chord * chord).sqrt();
            assert!(sag <= 0.01 + 1e-12);
        }
    }

    #[test]
    fn test_reversed_edge_is_traversed_backwards() {
        let plane = Plane::new(Frame::default());
        let edge = FaceEdge::segment(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0))
            .with_orientation(EdgeOrientation::Reversed);
        let d = discretizer().discretize(&edge, &plane);
        assert_relative_eq!(*d.first_uv().unwrap(), Point2::new(1.0, 0.0));
        assert_relative_eq!(*d.last_uv().unwrap(), Point2::new(0.0, 0.0));
    }

    #[test]
    fn test_closed_curve_has_at_least_four_points() {
        let plane = Plane::new(Frame::default());
        let edge = FaceEdge::new(
            Arc::new(Circle2d {
                center: Point2::new(0.0, 0.0),
                radius: 1.0,
            }),
            0.0,
            TAU,
        );
        let coarse = EdgeDiscretizer::new(
            &crate::mesh::attribute::MeshParametersBuilder::default()
                .linear_deflection(10.0)
                .angular_deflection(10.0)
                .build()
                .unwrap(),
        );
        assert!(coarse.discretize(&edge, &plane).uv.len() >= 4);
    }

    #[test]
    fn test_degenerated_edge_keeps_end_points() {
        let sphere = Sphere::new(Frame::default(), 1.0);
        // The north pole line v = π/2 collapses to one point.
        let edge = FaceEdge::segment(Point2::new(0.0, FRAC_PI_2), Point2::new(TAU, FRAC_PI_2));
        let polygon = discretizer().polygon(&edge, &sphere);
        assert_eq!(polygon.params, vec![0.0, 1.0]);
    }

    #[test]
    fn test_relative_deflection_scales_with_size() {
        let plane = Plane::new(Frame::default());
        let params = crate::mesh::attribute::MeshParametersBuilder::default()
            .linear_deflection(0.1)
            .relative(true)
            .build()
            .unwrap();
        let edge = FaceEdge::segment(Point2::new(0.0, 0.0), Point2::new(5.0, 0.0));
        assert_relative_eq!(EdgeDiscretizer::new(&params).edge_deflection(&edge, &plane), 0.5);
    }
}
