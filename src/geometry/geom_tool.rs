//! Side-effect-free numeric helpers shared by every meshing layer.
//!
//! - [`int_seg_seg`]: classified intersection of two 2D segments
//! - [`SegmentIntersectionChecker`]: decides whether a crossing is real or noise
//! - [`cells_count`]: grid resolution heuristic for the parametric domain
//! - [`squared_deflection_of_segment`]: chord sag of a 3D segment
//!
//! None of these fail; degenerate input is reported through the returned
//! classification.

use super::predicates::orient2d;
use super::range_splitter::ParamDomain;
use super::surface::{CurveKind, SurfaceKind};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative tolerance on segment parameters.
const PARAM_EPS: f64 = 1e-10;

/// Relative threshold of the direction cross product below which segments are parallel.
const PARALLEL_EPS: f64 = 1e-12;

/// Upper bound on grid cells per direction.
const MAX_CELLS: usize = 4096;

/// Crossings between segments closer than this angle (degrees) are treated as tangential.
pub const TANGENT_ANGLE_DEGREES: f64 = 5.0;

// =============================================================================
// SEGMENT INTERSECTION
// =============================================================================

/// Kind of contact between two segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntersectionType {
    /// Disjoint, parallel without contact, or a zero-length input.
    NoIntersection,
    /// Proper crossing at an interior point of both segments.
    Cross,
    /// Contact at an end point of at least one segment.
    EndPointTouch,
    /// Collinear segments sharing a stretch of positive length.
    Overlap,
}

impl fmt::Display for IntersectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoIntersection => write!(f, "NoIntersection"),
            Self::Cross => write!(f, "Cross"),
            Self::EndPointTouch => write!(f, "EndPointTouch"),
            Self::Overlap => write!(f, "Overlap"),
        }
    }
}

/// Result of [`int_seg_seg`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentIntersection {
    /// Classification.
    pub kind: IntersectionType,
    /// Contact point; the middle of the shared stretch for overlaps.
    pub point: Option<Point2<f64>>,
}

impl SegmentIntersection {
    const fn none() -> Self {
        Self {
            kind: IntersectionType::NoIntersection,
            point: None,
        }
    }

    const fn at(kind: IntersectionType, point: Point2<f64>) -> Self {
        Self {
            kind,
            point: Some(point),
        }
    }
}

fn cross(a: &nalgebra::Vector2<f64>, b: &nalgebra::Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Intersects segment `[p1, p2]` with segment `[p3, p4]`.
///
/// `extend1`/`extend2` treat the corresponding segment as an infinite line.
/// The result does not depend on which segment is given first.
///
/// # Example
///
/// ```
/// use facemesh::geometry::geom_tool::{int_seg_seg, IntersectionType};
/// use nalgebra::Point2;
///
/// let hit = int_seg_seg(
///     &Point2::new(-1.0, 0.0), &Point2::new(1.0, 0.0),
///     &Point2::new(0.0, -1.0), &Point2::new(0.0, 1.0),
///     false, false,
/// );
/// assert_eq!(hit.kind, IntersectionType::Cross);
/// assert_eq!(hit.point, Some(Point2::new(0.0, 0.0)));
/// ```
#[must_use]
pub fn int_seg_seg(
    p1: &Point2<f64>,
    p2: &Point2<f64>,
    p3: &Point2<f64>,
    p4: &Point2<f64>,
    extend1: bool,
    extend2: bool,
) -> SegmentIntersection {
    let d1 = p2 - p1;
    let d2 = p4 - p3;
    let len1 = d1.norm();
    let len2 = d2.norm();
    let scale = [p1, p2, p3, p4]
        .iter()
        .map(|p| p.x.abs().max(p.y.abs()))
        .fold(1.0_f64, f64::max);
    let min_len = PARAM_EPS * scale;
    if !(len1 > min_len && len2 > min_len) {
        return SegmentIntersection::none();
    }

    let denom = cross(&d1, &d2);
    if denom.abs() <= PARALLEL_EPS * len1 * len2 {
        return parallel_contact(p1, p3, &d1, &d2, len1, len2, extend1 || extend2, min_len);
    }

    let w = p3 - p1;
    let t = cross(&w, &d2) / denom;
    let s = cross(&w, &d1) / denom;
    let inside = |param: f64, extended: bool| extended || (-PARAM_EPS..=1.0 + PARAM_EPS).contains(&param);
    if !inside(t, extend1) || !inside(s, extend2) {
        return SegmentIntersection::none();
    }

    let point = Point2::from(((p1.coords + d1 * t) + (p3.coords + d2 * s)) * 0.5);
    let at_end = |param: f64, extended: bool| {
        !extended && (param.abs() <= PARAM_EPS || (param - 1.0).abs() <= PARAM_EPS)
    };
    if at_end(t, extend1) || at_end(s, extend2) {
        SegmentIntersection::at(IntersectionType::EndPointTouch, point)
    } else {
        SegmentIntersection::at(IntersectionType::Cross, point)
    }
}

#[allow(clippy::too_many_arguments)]
fn parallel_contact(
    p1: &Point2<f64>,
    p3: &Point2<f64>,
    d1: &nalgebra::Vector2<f64>,
    d2: &nalgebra::Vector2<f64>,
    len1: f64,
    len2: f64,
    extended: bool,
    min_len: f64,
) -> SegmentIntersection {
    // Distance of the second segment's origin from the first line.
    let offset = cross(&(p3 - p1), d1).abs() / len1;
    if offset > min_len || extended {
        // Distinct parallel lines, or a line overlapping a segment: no single contact.
        return SegmentIntersection::none();
    }

    // Project both segments on the longer one so the interval is computed the
    // same way regardless of argument order.
    let (origin, dir, len, other_a, other_b) = if len1 >= len2 {
        (p1, d1, len1, *p3, p3 + d2)
    } else {
        (p3, d2, len2, *p1, p1 + d1)
    };
    let unit = dir / len;
    let ta = (other_a - origin).dot(&unit);
    let tb = (other_b - origin).dot(&unit);
    let lo = ta.min(tb).max(0.0);
    let hi = ta.max(tb).min(len);
    if hi < lo - min_len {
        return SegmentIntersection::none();
    }
    let mid = origin + unit * (0.5 * (lo + hi));
    if hi - lo <= min_len {
        SegmentIntersection::at(IntersectionType::EndPointTouch, mid)
    } else {
        SegmentIntersection::at(IntersectionType::Overlap, mid)
    }
}

/// Whether `p` lies inside or on the triangle `(a, b, c)` of either orientation.
#[must_use]
pub fn point_in_triangle(p: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> bool {
    let d1 = orient2d(a, b, p);
    let d2 = orient2d(b, c, p);
    let d3 = orient2d(c, a, p);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Area enclosed by `polyline` closed through `apex`, by the fan (shoelace) formula.
#[must_use]
pub fn fan_area(apex: &Point2<f64>, polyline: &[Point2<f64>]) -> f64 {
    let mut twice = 0.0;
    for w in polyline.windows(2) {
        twice += orient2d(apex, &w[0], &w[1]);
    }
    0.5 * twice.abs()
}

// =============================================================================
// ACCEPTANCE RULES
// =============================================================================

/// Filters raw crossings found between boundary segments.
///
/// A crossing counts only when the segments meet at a real angle and, if a
/// closing loop is known, when that loop is not a tolerance-sized artefact.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentIntersectionChecker {
    /// Minimum non-oriented angle between crossing segments, radians.
    pub tangent_angle: f64,
    /// Working 2D tolerance.
    pub tolerance: f64,
}

impl Default for SegmentIntersectionChecker {
    fn default() -> Self {
        Self {
            tangent_angle: TANGENT_ANGLE_DEGREES.to_radians(),
            tolerance: 1e-9,
        }
    }
}

impl SegmentIntersectionChecker {
    /// Creates a checker.
    #[must_use]
    pub const fn new(tangent_angle: f64, tolerance: f64) -> Self {
        Self {
            tangent_angle,
            tolerance,
        }
    }

    /// Runs [`int_seg_seg`] on the two segments and applies the acceptance rules.
    ///
    /// `loop_polyline` is the boundary stretch running from the reference
    /// segment to the candidate, when both belong to the same loop; the area
    /// it encloses with the crossing point must reach `π·tol²`.
    #[must_use]
    pub fn accept(
        &self,
        reference: (&Point2<f64>, &Point2<f64>),
        candidate: (&Point2<f64>, &Point2<f64>),
        loop_polyline: Option<&[Point2<f64>]>,
    ) -> bool {
        let hit = int_seg_seg(reference.0, reference.1, candidate.0, candidate.1, false, false);
        self.accept_intersection(&hit, reference, candidate, loop_polyline)
    }

    /// Applies the acceptance rules to an already computed intersection.
    ///
    /// Only proper crossings count. End point touches (wire T-junctions) and
    /// collinear overlaps are left to frontier recovery, which reports the
    /// segments it cannot restore.
    #[must_use]
    pub fn accept_intersection(
        &self,
        hit: &SegmentIntersection,
        reference: (&Point2<f64>, &Point2<f64>),
        candidate: (&Point2<f64>, &Point2<f64>),
        loop_polyline: Option<&[Point2<f64>]>,
    ) -> bool {
        match hit.kind {
            IntersectionType::NoIntersection
            | IntersectionType::EndPointTouch
            | IntersectionType::Overlap => false,
            IntersectionType::Cross => {
                let d1 = reference.1 - reference.0;
                let d2 = candidate.1 - candidate.0;
                let cos = (d1.dot(&d2) / (d1.norm() * d2.norm())).abs().min(1.0);
                if cos.acos() < self.tangent_angle {
                    return false;
                }
                match (loop_polyline, hit.point) {
                    (Some(polyline), Some(point)) => {
                        let min_area = std::f64::consts::PI * self.tolerance * self.tolerance;
                        fan_area(&point, polyline) >= min_area
                    }
                    _ => true,
                }
            }
        }
    }
}

// =============================================================================
// GRID HEURISTICS
// =============================================================================

fn pow2_log10(x: f64) -> usize {
    let v = 2.0_f64.powf(x.log10()).ceil();
    if v.is_nan() || v < 2.0 {
        2
    } else if v >= MAX_CELLS as f64 {
        MAX_CELLS
    } else {
        // Bounded by MAX_CELLS above.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = v as usize;
        n
    }
}

fn err_factors(kind: &SurfaceKind, deflection: f64) -> (f64, f64) {
    const MAX_FACTOR: f64 = 100.0;
    let base = deflection * 10.0;
    let divide = |degree: usize, knots: usize| {
        if degree > 2 {
            #[allow(clippy::cast_precision_loss)]
            let factor = (degree * knots.max(1)) as f64;
            base / factor.min(MAX_FACTOR)
        } else {
            base
        }
    };
    match *kind {
        SurfaceKind::Bezier { u_degree, v_degree } => (divide(u_degree, 1), divide(v_degree, 1)),
        SurfaceKind::BSpline {
            u_degree,
            v_degree,
            nb_u_knots,
            nb_v_knots,
        } => (divide(u_degree, nb_u_knots), divide(v_degree, nb_v_knots)),
        _ => (base, base),
    }
}

/// Number of grid cells in U and V for a face with `vertices_nb` boundary vertices.
///
/// Advisory only; both counts are at least 2.
#[must_use]
pub fn cells_count(
    kind: &SurfaceKind,
    vertices_nb: usize,
    deflection: f64,
    domain: &ParamDomain,
) -> (usize, usize) {
    let (err_u, err_v) = err_factors(kind, deflection);
    let [delta_u, delta_v] = domain.delta();
    let range_u = domain.u_range();
    let range_v = domain.v_range();

    let (mut nb_u, mut nb_v) = match kind {
        SurfaceKind::Torus { .. } => (pow2_log10(range_u / delta_u), pow2_log10(range_v / delta_v)),
        SurfaceKind::Cylinder { .. } => (
            pow2_log10(range_u / delta_u / range_v),
            pow2_log10(range_v / err_v),
        ),
        _ => (
            pow2_log10(range_u / delta_u / err_u),
            pow2_log10(range_v / delta_v / err_v),
        ),
    };

    #[allow(clippy::cast_precision_loss)]
    let by_vertices = pow2_log10(vertices_nb as f64);
    let linear = |c: &CurveKind| matches!(c, CurveKind::Line | CurveKind::BSpline { degree: 0 | 1 });
    match kind {
        SurfaceKind::Plane => {
            nb_u = by_vertices;
            nb_v = by_vertices;
        }
        SurfaceKind::Cylinder { .. } | SurfaceKind::Cone { .. } => nb_v = by_vertices,
        SurfaceKind::Extrusion { basis } => {
            if linear(basis) {
                nb_u = by_vertices;
            }
            nb_v = by_vertices;
        }
        SurfaceKind::Revolution { basis } => {
            if linear(basis) {
                nb_v = by_vertices;
            }
        }
        SurfaceKind::Bezier { u_degree, v_degree }
        | SurfaceKind::BSpline {
            u_degree, v_degree, ..
        } => {
            if *u_degree < 2 {
                nb_u = by_vertices;
            }
            if *v_degree < 2 {
                nb_v = by_vertices;
            }
        }
        _ => {}
    }
    (nb_u.max(2), nb_v.max(2))
}

// =============================================================================
// TANGENTIAL DEFLECTION
// =============================================================================

/// Angle between two successive chord directions, `0` if either is null.
fn turning_angle(a: &Point3<f64>, m: &Point3<f64>, b: &Point3<f64>) -> f64 {
    let d1 = m - a;
    let d2 = b - m;
    let n = d1.norm() * d2.norm();
    if n <= f64::MIN_POSITIVE {
        return 0.0;
    }
    (d1.dot(&d2) / n).clamp(-1.0, 1.0).acos()
}

/// Parameters sampling a 3D curve so that every chord stays within
/// `deflection` of the curve and consecutive chords turn by at most `angle`.
///
/// Starts from `min_points` uniform samples and bisects offending spans up to
/// `max_depth` times. The mid and quarter points of a span are both checked,
/// which catches inflections a single midpoint would miss. The returned
/// parameters are increasing and always include `first` and `last`.
#[must_use]
pub fn tangential_deflection_params<F>(
    eval: F,
    first: f64,
    last: f64,
    deflection: f64,
    angle: f64,
    min_points: usize,
    max_depth: u32,
) -> Vec<f64>
where
    F: Fn(f64) -> Point3<f64>,
{
    let segments = min_points.max(2) - 1;
    let mut params = Vec::with_capacity(segments + 1);
    params.push(first);
    #[allow(clippy::cast_precision_loss)]
    let step = (last - first) / segments as f64;
    let mut stack: Vec<(f64, f64, u32)> = Vec::new();
    for i in (0..segments).rev() {
        #[allow(clippy::cast_precision_loss)]
        let a = first + step * i as f64;
        let b = if i + 1 == segments { last } else { a + step };
        stack.push((a, b, 0));
    }
    let defl2 = deflection * deflection;
    while let Some((a, b, depth)) = stack.pop() {
        let split = depth < max_depth && {
            let pa = eval(a);
            let pb = eval(b);
            let mid = 0.5 * (a + b);
            let pm = eval(mid);
            let q1 = eval(0.5 * (a + mid));
            let q3 = eval(0.5 * (mid + b));
            let sag = squared_deflection_of_segment(&pa, &pb, &pm)
                .max(squared_deflection_of_segment(&pa, &pb, &q1))
                .max(squared_deflection_of_segment(&pa, &pb, &q3));
            sag > defl2 || turning_angle(&pa, &pm, &pb) > angle
        };
        if split {
            let mid = 0.5 * (a + b);
            stack.push((mid, b, depth + 1));
            stack.push((a, mid, depth + 1));
        } else {
            params.push(b);
        }
    }
    params
}

/// Squared distance from `mid` to the line through `p1` and `p2`.
#[must_use]
pub fn squared_deflection_of_segment(p1: &Point3<f64>, p2: &Point3<f64>, mid: &Point3<f64>) -> f64 {
    let chord = p2 - p1;
    let len2 = chord.norm_squared();
    let rel = mid - p1;
    if len2 <= f64::MIN_POSITIVE {
        return rel.norm_squared();
    }
    (rel.cross(&chord)).norm_squared() / len2
}
