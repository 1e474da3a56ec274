//! Geometric predicates on the parameter plane.
//!
//! The Delaunay core only ever asks two questions: on which side of a line a
//! point lies ([`orientation`]) and whether a point lies inside the
//! circumcircle of a triangle ([`in_circle`]). Both are evaluated in double
//! precision with a forward error bound; results inside the bound are
//! reported as degenerate/boundary instead of guessing a sign.
//!
//! # References
//!
//! - J. R. Shewchuk, "Adaptive Precision Floating-Point Arithmetic and Fast
//!   Robust Geometric Predicates", Discrete & Computational Geometry, 1997.

use nalgebra::Point2;
use std::fmt;

/// Relative error bound of the 2x2 orientation determinant.
const CCW_ERROR_BOUND: f64 = 3.330_669_073_875_471_6e-16;

/// Relative error bound of the lifted 3x3 in-circle determinant.
const IN_CIRCLE_ERROR_BOUND: f64 = 1.110_223_024_625_157_7e-15;

/// Position of a point relative to the circumcircle of a triangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InCircle {
    /// The point is strictly outside the circumcircle.
    OUTSIDE,
    /// The point is on the circumcircle, within the error bound.
    BOUNDARY,
    /// The point is strictly inside the circumcircle.
    INSIDE,
}

impl fmt::Display for InCircle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OUTSIDE => write!(f, "OUTSIDE"),
            Self::BOUNDARY => write!(f, "BOUNDARY"),
            Self::INSIDE => write!(f, "INSIDE"),
        }
    }
}

/// Orientation of an ordered point triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    /// Clockwise.
    NEGATIVE,
    /// Collinear, within the error bound.
    DEGENERATE,
    /// Counter-clockwise.
    POSITIVE,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NEGATIVE => write!(f, "NEGATIVE"),
            Self::DEGENERATE => write!(f, "DEGENERATE"),
            Self::POSITIVE => write!(f, "POSITIVE"),
        }
    }
}

/// Twice the signed area of triangle `(a, b, c)`; positive when counter-clockwise.
#[inline]
#[must_use]
pub fn orient2d(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Signed area of triangle `(a, b, c)`.
#[inline]
#[must_use]
pub fn signed_area(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    0.5 * orient2d(a, b, c)
}

/// Orientation of `(a, b, c)` with a floating-point error filter.
///
/// # Example
///
/// ```
/// use facemesh::geometry::predicates::{orientation, Orientation};
/// use nalgebra::Point2;
///
/// let a = Point2::new(0.0, 0.0);
/// let b = Point2::new(1.0, 0.0);
/// assert_eq!(orientation(&a, &b, &Point2::new(0.0, 1.0)), Orientation::POSITIVE);
/// assert_eq!(orientation(&a, &b, &Point2::new(2.0, 0.0)), Orientation::DEGENERATE);
/// ```
#[must_use]
pub fn orientation(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> Orientation {
    let left = (b.x - a.x) * (c.y - a.y);
    let right = (b.y - a.y) * (c.x - a.x);
    let det = left - right;
    let bound = CCW_ERROR_BOUND * (left.abs() + right.abs());
    if det > bound {
        Orientation::POSITIVE
    } else if det < -bound {
        Orientation::NEGATIVE
    } else {
        Orientation::DEGENERATE
    }
}

/// Classifies `d` against the circumcircle of the counter-clockwise triangle `(a, b, c)`.
///
/// For a clockwise triangle the INSIDE/OUTSIDE answers are swapped; callers
/// always pass triangles in mesh orientation, which is counter-clockwise.
///
/// # Algorithm
///
/// Sign of the lifted determinant
///
/// ```text
/// | ax-dx  ay-dy  (ax-dx)²+(ay-dy)² |
/// | bx-dx  by-dy  (bx-dx)²+(by-dy)² |
/// | cx-dx  cy-dy  (cx-dx)²+(cy-dy)² |
/// ```
#[must_use]
pub fn in_circle(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>, d: &Point2<f64>) -> InCircle {
    let (adx, ady) = (a.x - d.x, a.y - d.y);
    let (bdx, bdy) = (b.x - d.x, b.y - d.y);
    let (cdx, cdy) = (c.x - d.x, c.y - d.y);

    let bdxcdy = bdx * cdy;
    let cdxbdy = cdx * bdy;
    let alift = adx * adx + ady * ady;

    let cdxady = cdx * ady;
    let adxcdy = adx * cdy;
    let blift = bdx * bdx + bdy * bdy;

    let adxbdy = adx * bdy;
    let bdxady = bdx * ady;
    let clift = cdx * cdx + cdy * cdy;

    let det = alift * (bdxcdy - cdxbdy) + blift * (cdxady - adxcdy) + clift * (adxbdy - bdxady);
    let permanent = (bdxcdy.abs() + cdxbdy.abs()) * alift
        + (cdxady.abs() + adxcdy.abs()) * blift
        + (adxbdy.abs() + bdxady.abs()) * clift;
    let bound = IN_CIRCLE_ERROR_BOUND * permanent;

    if det > bound {
        InCircle::INSIDE
    } else if det < -bound {
        InCircle::OUTSIDE
    } else {
        InCircle::BOUNDARY
    }
}

/// Smallest interior angle of triangle `(a, b, c)` in radians.
///
/// Degenerate triangles (a zero-length side) report `0.0`.
#[must_use]
pub fn min_angle(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    let corner = |p: &Point2<f64>, q: &Point2<f64>, r: &Point2<f64>| {
        let u = q - p;
        let v = r - p;
        let (nu, nv) = (u.norm(), v.norm());
        if nu <= 0.0 || nv <= 0.0 {
            return 0.0;
        }
        (u.dot(&v) / (nu * nv)).clamp(-1.0, 1.0).acos()
    };
    corner(a, b, c).min(corner(b, c, a)).min(corner(c, a, b))
}

/// Circumcenter of triangle `(a, b, c)`, or `None` when it is collinear.
#[must_use]
pub fn circumcenter(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> Option<Point2<f64>> {
    let d = 2.0 * orient2d(a, b, c);
    if d == 0.0 || !d.is_finite() {
        return None;
    }
    let b_rel = b - a;
    let c_rel = c - a;
    let bl = b_rel.norm_squared();
    let cl = c_rel.norm_squared();
    let ux = (c_rel.y * bl - b_rel.y * cl) / d;
    let uy = (b_rel.x * cl - c_rel.x * bl) / d;
    Some(Point2::new(a.x + ux, a.y + uy))
}

/// Squared distance from `p` to the segment `[a, b]`.
#[must_use]
pub fn squared_distance_to_segment(p: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= 0.0 {
        return (p - a).norm_squared();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm_squared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_orientation_signs() {
        let a = Point2::new(0.0, 0.0);
        let b = Point2::new(1.0, 0.0);
        assert_eq!(orientation(&a, &b, &Point2::new(0.3, 1.0)), Orientation::POSITIVE);
        assert_eq!(orientation(&a, &b, &Point2::new(0.3, -1.0)), Orientation::NEGATIVE);
        assert_eq!(orientation(&a, &b, &Point2::new(0.3, 0.0)), Orientation::DEGENERATE);
        assert_eq!(Orientation::POSITIVE.to_string(), "POSITIVE");
    }

    #[test]
    fn test_in_circle_classification() {
        let a = Point2::new(0.0, 0.0);
        let b = Point2::new(1.0, 0.0);
        let c = Point2::new(0.0, 1.0);
        assert_eq!(in_circle(&a, &b, &c, &Point2::new(0.5, 0.5)), InCircle::INSIDE);
        assert_eq!(in_circle(&a, &b, &c, &Point2::new(2.0, 2.0)), InCircle::OUTSIDE);
        // The fourth corner of the unit square is co-circular.
        assert_eq!(in_circle(&a, &b, &c, &Point2::new(1.0, 1.0)), InCircle::BOUNDARY);
        assert_eq!(InCircle::BOUNDARY.to_string(), "BOUNDARY");
    }

    #[test]
    fn test_min_angle_and_circumcenter() {
        let a = Point2::new(0.0, 0.0);
        let b = Point2::new(1.0, 0.0);
        let c = Point2::new(0.0, 1.0);
        assert_relative_eq!(min_angle(&a, &b, &c), std::f64::consts::FRAC_PI_4, epsilon = 1e-12);
        let cc = circumcenter(&a, &b, &c).unwrap();
        assert_relative_eq!(cc.x, 0.5, epsilon = 1e-12);
        assert_relative_eq!(cc.y, 0.5, epsilon = 1e-12);
        assert!(circumcenter(&a, &b, &Point2::new(2.0, 0.0)).is_none());
        assert_relative_eq!(min_angle(&a, &a, &c), 0.0);
    }

    #[test]
    fn test_squared_distance_to_segment() {
        let a = Point2::new(0.0, 0.0);
        let b = Point2::new(2.0, 0.0);
        assert_relative_eq!(squared_distance_to_segment(&Point2::new(1.0, 1.0), &a, &b), 1.0);
        assert_relative_eq!(squared_distance_to_segment(&Point2::new(3.0, 0.0), &a, &b), 1.0);
        assert_relative_eq!(squared_distance_to_segment(&Point2::new(1.0, 0.0), &a, &a), 1.0);
    }
}
