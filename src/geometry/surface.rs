//! Surface evaluator capability and the analytic surfaces used by the mesher.
//!
//! The mesher only needs point/derivative evaluation, the parametric domain,
//! periodicity, and a coarse [`SurfaceKind`] that selects the interior node
//! strategy. Anything else about the surface stays with the caller.

use nalgebra::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, TAU};
use std::fmt::Debug;

/// Type of the basis curve of swept surfaces.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum CurveKind {
    /// Straight line.
    Line,
    /// Circle.
    Circle,
    /// Ellipse.
    Ellipse,
    /// B-spline curve.
    BSpline {
        /// Polynomial degree.
        degree: usize,
    },
    /// Anything else.
    Other,
}

/// Coarse surface classification.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SurfaceKind {
    /// Plane.
    Plane,
    /// Circular cylinder.
    Cylinder {
        /// Radius.
        radius: f64,
    },
    /// Circular cone.
    Cone {
        /// Radius at `v = 0`.
        ref_radius: f64,
        /// Half angle at the apex, in radians.
        semi_angle: f64,
    },
    /// Sphere.
    Sphere {
        /// Radius.
        radius: f64,
    },
    /// Torus.
    Torus {
        /// Distance from the axis to the tube center.
        major_radius: f64,
        /// Tube radius.
        minor_radius: f64,
    },
    /// Bezier patch.
    Bezier {
        /// Degree in U.
        u_degree: usize,
        /// Degree in V.
        v_degree: usize,
    },
    /// B-spline patch.
    BSpline {
        /// Degree in U.
        u_degree: usize,
        /// Degree in V.
        v_degree: usize,
        /// Number of distinct knots in U.
        nb_u_knots: usize,
        /// Number of distinct knots in V.
        nb_v_knots: usize,
    },
    /// Linear extrusion of a basis curve (U along the curve, V along the direction).
    Extrusion {
        /// Basis curve.
        basis: CurveKind,
    },
    /// Revolution of a basis curve (U around the axis, V along the curve).
    Revolution {
        /// Basis curve.
        basis: CurveKind,
    },
    /// Offset, trimmed or otherwise unclassified surface.
    Other,
}

impl SurfaceKind {
    /// Bezier and B-spline patches.
    #[must_use]
    pub const fn is_free_form(&self) -> bool {
        matches!(self, Self::Bezier { .. } | Self::BSpline { .. })
    }
}

/// Rectangular parametric domain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    /// Lower U bound.
    pub u_min: f64,
    /// Upper U bound.
    pub u_max: f64,
    /// Lower V bound.
    pub v_min: f64,
    /// Upper V bound.
    pub v_max: f64,
}

impl ParamBounds {
    /// Creates bounds.
    #[must_use]
    pub const fn new(u_min: f64, u_max: f64, v_min: f64, v_max: f64) -> Self {
        Self {
            u_min,
            u_max,
            v_min,
            v_max,
        }
    }

    /// Unbounded in both directions.
    #[must_use]
    pub const fn infinite() -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY)
    }

    /// Width in U.
    #[must_use]
    pub fn u_range(&self) -> f64 {
        self.u_max - self.u_min
    }

    /// Width in V.
    #[must_use]
    pub fn v_range(&self) -> f64 {
        self.v_max - self.v_min
    }
}

/// Point and first derivatives at one parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceDerivatives {
    /// `S(u, v)`.
    pub point: Point3<f64>,
    /// `dS/du`.
    pub du: Vector3<f64>,
    /// `dS/dv`.
    pub dv: Vector3<f64>,
}

/// Evaluation capability of a parametric surface.
///
/// Implementations must be callable from several threads at once; the batch
/// driver shares surfaces between faces.
pub trait SurfaceEvaluator: Send + Sync + Debug {
    /// `S(u, v)`.
    fn value(&self, uv: &Point2<f64>) -> Point3<f64>;

    /// Point and first derivatives.
    fn derivatives(&self, uv: &Point2<f64>) -> SurfaceDerivatives;

    /// Natural parametric domain.
    fn bounds(&self) -> ParamBounds;

    /// Whether U wraps around with period [`SurfaceEvaluator::u_period`].
    fn is_u_periodic(&self) -> bool {
        false
    }

    /// Whether V wraps around with period [`SurfaceEvaluator::v_period`].
    fn is_v_periodic(&self) -> bool {
        false
    }

    /// Period in U; meaningful only when periodic.
    fn u_period(&self) -> f64 {
        self.bounds().u_range()
    }

    /// Period in V; meaningful only when periodic.
    fn v_period(&self) -> f64 {
        self.bounds().v_range()
    }

    /// Whether the U isolines close on themselves.
    fn is_u_closed(&self) -> bool {
        self.is_u_periodic()
    }

    /// Whether the V isolines close on themselves.
    fn is_v_closed(&self) -> bool {
        self.is_v_periodic()
    }

    /// Coarse classification.
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Other
    }

    /// Unit normal, or `None` at a singular point.
    fn normal(&self, uv: &Point2<f64>) -> Option<Vector3<f64>> {
        let d = self.derivatives(uv);
        let n = d.du.cross(&d.dv);
        let len = n.norm();
        (len > f64::EPSILON && len.is_finite()).then(|| n / len)
    }
}

// =============================================================================
// ANALYTIC SURFACES
// =============================================================================

/// Right-handed orthonormal placement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Origin.
    pub origin: Point3<f64>,
    /// First in-plane axis.
    pub x_dir: Vector3<f64>,
    /// Second in-plane axis.
    pub y_dir: Vector3<f64>,
    /// Main axis.
    pub z_dir: Vector3<f64>,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            origin: Point3::origin(),
            x_dir: Vector3::x(),
            y_dir: Vector3::y(),
            z_dir: Vector3::z(),
        }
    }
}

impl Frame {
    /// Builds a frame from a main axis and a reference X direction.
    ///
    /// Returns `None` if the axis is null or parallel to `x_ref`.
    #[must_use]
    pub fn new(origin: Point3<f64>, axis: Vector3<f64>, x_ref: Vector3<f64>) -> Option<Self> {
        let z_dir = axis.try_normalize(f64::EPSILON)?;
        let x_dir = (x_ref - z_dir * x_ref.dot(&z_dir)).try_normalize(f64::EPSILON)?;
        let y_dir = z_dir.cross(&x_dir);
        Some(Self {
            origin,
            x_dir,
            y_dir,
            z_dir,
        })
    }

    fn radial(&self, u: f64) -> Vector3<f64> {
        self.x_dir * u.cos() + self.y_dir * u.sin()
    }

    fn radial_du(&self, u: f64) -> Vector3<f64> {
        self.y_dir * u.cos() - self.x_dir * u.sin()
    }
}

/// `S(u, v) = O + u·X + v·Y`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    /// Placement.
    pub frame: Frame,
}

impl Plane {
    /// Plane through the frame origin spanned by its X and Y axes.
    #[must_use]
    pub const fn new(frame: Frame) -> Self {
        Self { frame }
    }
}

impl SurfaceEvaluator for Plane {
    fn value(&self, uv: &Point2<f64>) -> Point3<f64> {
        self.frame.origin + self.frame.x_dir * uv.x + self.frame.y_dir * uv.y
    }

    fn derivatives(&self, uv: &Point2<f64>) -> SurfaceDerivatives {
        SurfaceDerivatives {
            point: self.value(uv),
            du: self.frame.x_dir,
            dv: self.frame.y_dir,
        }
    }

    fn bounds(&self) -> ParamBounds {
        ParamBounds::infinite()
    }

    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Plane
    }
}

/// `S(u, v) = O + R·(cos u·X + sin u·Y) + v·Z`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cylinder {
    /// Placement; Z is the axis.
    pub frame: Frame,
    /// Radius.
    pub radius: f64,
}

impl Cylinder {
    /// Creates a cylinder.
    #[must_use]
    pub const fn new(frame: Frame, radius: f64) -> Self {
        Self { frame, radius }
    }
}

impl SurfaceEvaluator for Cylinder {
    fn value(&self, uv: &Point2<f64>) -> Point3<f64> {
        self.frame.origin + self.frame.radial(uv.x) * self.radius + self.frame.z_dir * uv.y
    }

    fn derivatives(&self, uv: &Point2<f64>) -> SurfaceDerivatives {
        SurfaceDerivatives {
            point: self.value(uv),
            du: self.frame.radial_du(uv.x) * self.radius,
            dv: self.frame.z_dir,
        }
    }

    fn bounds(&self) -> ParamBounds {
        ParamBounds::new(0.0, TAU, f64::NEG_INFINITY, f64::INFINITY)
    }

    fn is_u_periodic(&self) -> bool {
        true
    }

    fn u_period(&self) -> f64 {
        TAU
    }

    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Cylinder {
            radius: self.radius,
        }
    }
}

/// `S(u, v) = O + (R + v·sin a)·(cos u·X + sin u·Y) + v·cos a·Z`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cone {
    /// Placement; Z is the axis.
    pub frame: Frame,
    /// Radius at `v = 0`.
    pub ref_radius: f64,
    /// Half angle, radians.
    pub semi_angle: f64,
}

impl Cone {
    /// Creates a cone.
    #[must_use]
    pub const fn new(frame: Frame, ref_radius: f64, semi_angle: f64) -> Self {
        Self {
            frame,
            ref_radius,
            semi_angle,
        }
    }
}

impl SurfaceEvaluator for Cone {
    fn value(&self, uv: &Point2<f64>) -> Point3<f64> {
        let (sin_a, cos_a) = self.semi_angle.sin_cos();
        let r = self.ref_radius + uv.y * sin_a;
        self.frame.origin + self.frame.radial(uv.x) * r + self.frame.z_dir * (uv.y * cos_a)
    }

    fn derivatives(&self, uv: &Point2<f64>) -> SurfaceDerivatives {
        let (sin_a, cos_a) = self.semi_angle.sin_cos();
        let r = self.ref_radius + uv.y * sin_a;
        SurfaceDerivatives {
            point: self.value(uv),
            du: self.frame.radial_du(uv.x) * r,
            dv: self.frame.radial(uv.x) * sin_a + self.frame.z_dir * cos_a,
        }
    }

    fn bounds(&self) -> ParamBounds {
        ParamBounds::new(0.0, TAU, f64::NEG_INFINITY, f64::INFINITY)
    }

    fn is_u_periodic(&self) -> bool {
        true
    }

    fn u_period(&self) -> f64 {
        TAU
    }

    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Cone {
            ref_radius: self.ref_radius,
            semi_angle: self.semi_angle,
        }
    }
}

/// `S(u, v) = O + R·cos v·(cos u·X + sin u·Y) + R·sin v·Z`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    /// Placement; Z points to the north pole.
    pub frame: Frame,
    /// Radius.
    pub radius: f64,
}

impl Sphere {
    /// Creates a sphere.
    #[must_use]
    pub const fn new(frame: Frame, radius: f64) -> Self {
        Self { frame, radius }
    }
}

impl SurfaceEvaluator for Sphere {
    fn value(&self, uv: &Point2<f64>) -> Point3<f64> {
        let (sin_v, cos_v) = uv.y.sin_cos();
        self.frame.origin
            + self.frame.radial(uv.x) * (self.radius * cos_v)
            + self.frame.z_dir * (self.radius * sin_v)
    }

    fn derivatives(&self, uv: &Point2<f64>) -> SurfaceDerivatives {
        let (sin_v, cos_v) = uv.y.sin_cos();
        SurfaceDerivatives {
            point: self.value(uv),
            du: self.frame.radial_du(uv.x) * (self.radius * cos_v),
            dv: self.frame.radial(uv.x) * (-self.radius * sin_v)
                + self.frame.z_dir * (self.radius * cos_v),
        }
    }

    fn bounds(&self) -> ParamBounds {
        ParamBounds::new(0.0, TAU, -FRAC_PI_2, FRAC_PI_2)
    }

    fn is_u_periodic(&self) -> bool {
        true
    }

    fn u_period(&self) -> f64 {
        TAU
    }

    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Sphere {
            radius: self.radius,
        }
    }
}

/// `S(u, v) = O + (R + r·cos v)·(cos u·X + sin u·Y) + r·sin v·Z`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Torus {
    /// Placement; Z is the axis of revolution.
    pub frame: Frame,
    /// Major radius `R`.
    pub major_radius: f64,
    /// Minor radius `r`.
    pub minor_radius: f64,
}

impl Torus {
    /// Creates a torus.
    #[must_use]
    pub const fn new(frame: Frame, major_radius: f64, minor_radius: f64) -> Self {
        Self {
            frame,
            major_radius,
            minor_radius,
        }
    }
}

impl SurfaceEvaluator for Torus {
    fn value(&self, uv: &Point2<f64>) -> Point3<f64> {
        let (sin_v, cos_v) = uv.y.sin_cos();
        self.frame.origin
            + self.frame.radial(uv.x) * (self.major_radius + self.minor_radius * cos_v)
            + self.frame.z_dir * (self.minor_radius * sin_v)
    }

    fn derivatives(&self, uv: &Point2<f64>) -> SurfaceDerivatives {
        let (sin_v, cos_v) = uv.y.sin_cos();
        SurfaceDerivatives {
            point: self.value(uv),
            du: self.frame.radial_du(uv.x) * (self.major_radius + self.minor_radius * cos_v),
            dv: self.frame.radial(uv.x) * (-self.minor_radius * sin_v)
                + self.frame.z_dir * (self.minor_radius * cos_v),
        }
    }

    fn bounds(&self) -> ParamBounds {
        ParamBounds::new(0.0, TAU, 0.0, TAU)
    }

    fn is_u_periodic(&self) -> bool {
        true
    }

    fn is_v_periodic(&self) -> bool {
        true
    }

    fn u_period(&self) -> f64 {
        TAU
    }

    fn v_period(&self) -> f64 {
        TAU
    }

    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Torus {
            major_radius: self.major_radius,
            minor_radius: self.minor_radius,
        }
    }
}

// =============================================================================
// CLOSURE SURFACE
// =============================================================================

type SurfaceFn = dyn Fn(f64, f64) -> Point3<f64> + Send + Sync;

/// Surface given by a closure, with derivatives by central differences.
///
/// Useful for free-form patches whose evaluation lives elsewhere; the
/// declared [`SurfaceKind`] drives node generation.
pub struct FnSurface {
    eval: Box<SurfaceFn>,
    bounds: ParamBounds,
    kind: SurfaceKind,
    periodic: [bool; 2],
}

impl FnSurface {
    /// Wraps `eval` over `bounds`.
    pub fn new<F>(eval: F, bounds: ParamBounds, kind: SurfaceKind) -> Self
    where
        F: Fn(f64, f64) -> Point3<f64> + Send + Sync + 'static,
    {
        Self {
            eval: Box::new(eval),
            bounds,
            kind,
            periodic: [false, false],
        }
    }

    /// Declares periodicity in U and V.
    #[must_use]
    pub const fn with_periodicity(mut self, u: bool, v: bool) -> Self {
        self.periodic = [u, v];
        self
    }

    fn step(min: f64, max: f64) -> f64 {
        let range = max - min;
        if range.is_finite() && range > 0.0 {
            range * 1e-6
        } else {
            1e-6
        }
    }
}

impl Debug for FnSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSurface")
            .field("bounds", &self.bounds)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl SurfaceEvaluator for FnSurface {
    fn value(&self, uv: &Point2<f64>) -> Point3<f64> {
        (self.eval)(uv.x, uv.y)
    }

    fn derivatives(&self, uv: &Point2<f64>) -> SurfaceDerivatives {
        let hu = Self::step(self.bounds.u_min, self.bounds.u_max);
        let hv = Self::step(self.bounds.v_min, self.bounds.v_max);
        let du = ((self.eval)(uv.x + hu, uv.y) - (self.eval)(uv.x - hu, uv.y)) / (2.0 * hu);
        let dv = ((self.eval)(uv.x, uv.y + hv) - (self.eval)(uv.x, uv.y - hv)) / (2.0 * hv);
        SurfaceDerivatives {
            point: self.value(uv),
            du,
            dv,
        }
    }

    fn bounds(&self) -> ParamBounds {
        self.bounds
    }

    fn is_u_periodic(&self) -> bool {
        self.periodic[0]
    }

    fn is_v_periodic(&self) -> bool {
        self.periodic[1]
    }

    fn kind(&self) -> SurfaceKind {
        self.kind
    }
}
