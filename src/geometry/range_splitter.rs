//! Parametric domain of a face and the strategies that seed interior nodes.
//!
//! [`ParamDomain`] tracks the UV box covered by the boundary, the average 3D
//! isoline lengths and the normalization deltas used while triangulating.
//! A [`RangeSplitter`] knows one family of surfaces and proposes interior
//! sample points for it; the node-insertion layer classifies and inserts them.

use super::geom_tool::{squared_deflection_of_segment, tangential_deflection_params};
use super::surface::{SurfaceEvaluator, SurfaceKind};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Smallest parametric extent considered non-degenerate.
const PARAM_CONFUSION: f64 = 1e-9;

/// Smallest average isoline length considered non-degenerate.
const MIN_LENGTH: f64 = 1e-16;

/// Samples per isoline when estimating lengths.
const LENGTH_STEPS: usize = 20;

/// Upper bound on grid steps per direction.
const MAX_STEPS: usize = 1024;

// =============================================================================
// DOMAIN
// =============================================================================

/// UV extent of a face plus its normalization.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamDomain {
    u: [f64; 2],
    v: [f64; 2],
    lengths: [f64; 2],
    delta: [f64; 2],
}

impl Default for ParamDomain {
    fn default() -> Self {
        Self {
            u: [f64::INFINITY, f64::NEG_INFINITY],
            v: [f64::INFINITY, f64::NEG_INFINITY],
            lengths: [0.0, 0.0],
            delta: [1.0, 1.0],
        }
    }
}

fn clamp_range(bounds: [f64; 2], periodic: bool, period: f64, range: &mut [f64; 2]) {
    if range[0] >= bounds[0] && range[1] <= bounds[1] {
        return;
    }
    if periodic {
        if range[1] - range[0] > period {
            range[1] = range[0] + period;
        }
    } else if range[0] < bounds[1] && range[1] > bounds[0] {
        // Parametric curves slightly outside the surface domain.
        range[0] = range[0].max(bounds[0]);
        range[1] = range[1].min(bounds[1]);
    }
}

impl ParamDomain {
    /// Domain with explicit ranges and deltas; lengths are left unset.
    #[must_use]
    pub const fn from_parts(u: [f64; 2], v: [f64; 2], delta: [f64; 2]) -> Self {
        Self {
            u,
            v,
            lengths: [0.0, 0.0],
            delta,
        }
    }

    /// Grows the box to include `uv`.
    pub fn add_point(&mut self, uv: &Point2<f64>) {
        self.u = [self.u[0].min(uv.x), self.u[1].max(uv.x)];
        self.v = [self.v[0].min(uv.y), self.v[1].max(uv.y)];
    }

    /// Clamps the box to the surface domain, except along periodic
    /// directions where it is only limited to one period.
    pub fn adjust_range(&mut self, surface: &dyn SurfaceEvaluator) {
        let b = surface.bounds();
        clamp_range(
            [b.u_min, b.u_max],
            surface.is_u_periodic(),
            surface.u_period(),
            &mut self.u,
        );
        clamp_range(
            [b.v_min, b.v_max],
            surface.is_v_periodic(),
            surface.v_period(),
            &mut self.v,
        );
    }

    /// Estimates the average 3D lengths of U and V isolines.
    ///
    /// Each direction is sampled with [`LENGTH_STEPS`] chords on three
    /// isolines (both borders and the middle).
    pub fn compute_lengths(&mut self, surface: &dyn SurfaceEvaluator) -> [f64; 2] {
        let isoline_length = |along_u: bool| {
            let (a, b) = if along_u { (self.u, self.v) } else { (self.v, self.u) };
            #[allow(clippy::cast_precision_loss)]
            let step = (a[1] - a[0]) / LENGTH_STEPS as f64;
            let fixed = [b[0], 0.5 * (b[0] + b[1]), b[1]];
            let at = |t: f64, s: f64| {
                if along_u {
                    surface.value(&Point2::new(t, s))
                } else {
                    surface.value(&Point2::new(s, t))
                }
            };
            let mut total = 0.0;
            for s in fixed {
                let mut prev = at(a[0], s);
                for i in 1..=LENGTH_STEPS {
                    #[allow(clippy::cast_precision_loss)]
                    let next = at(a[0] + step * i as f64, s);
                    total += (next - prev).norm();
                    prev = next;
                }
            }
            total / 3.0
        };
        self.lengths = [isoline_length(true), isoline_length(false)];
        self.lengths
    }

    /// Whether the box is non-empty and not degenerate.
    #[must_use]
    pub fn has_valid_range(&self) -> bool {
        let ok = |r: [f64; 2]| r[0].is_finite() && r[1].is_finite() && r[1] - r[0] > PARAM_CONFUSION;
        ok(self.u) && ok(self.v)
    }

    /// Whether both the box and the isoline lengths are usable.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.has_valid_range() && self.lengths[0] > MIN_LENGTH && self.lengths[1] > MIN_LENGTH
    }

    /// Maps between face parameters and normalized coordinates.
    #[must_use]
    pub fn scale(&self, uv: &Point2<f64>, to_normalized: bool) -> Point2<f64> {
        if to_normalized {
            Point2::new(
                (uv.x - self.u[0]) / self.delta[0],
                (uv.y - self.v[0]) / self.delta[1],
            )
        } else {
            Point2::new(
                uv.x * self.delta[0] + self.u[0],
                uv.y * self.delta[1] + self.v[0],
            )
        }
    }

    /// UV tolerance per direction in face parameters: `max(floor, range·relative)`.
    #[must_use]
    pub fn tolerance(&self, relative: f64, floor: f64) -> [f64; 2] {
        [
            (self.u_range() * relative).max(floor),
            (self.v_range() * relative).max(floor),
        ]
    }

    /// Sets the normalization deltas; non-positive or non-finite values fall back to 1.
    pub fn set_delta(&mut self, delta: [f64; 2]) {
        let sane = |d: f64| if d.is_finite() && d > 0.0 { d } else { 1.0 };
        self.delta = [sane(delta[0]), sane(delta[1])];
    }

    /// Normalization deltas.
    #[must_use]
    pub const fn delta(&self) -> [f64; 2] {
        self.delta
    }

    /// Average isoline lengths from the last [`ParamDomain::compute_lengths`].
    #[must_use]
    pub const fn lengths(&self) -> [f64; 2] {
        self.lengths
    }

    /// `[u_min, u_max]`.
    #[must_use]
    pub const fn u_bounds(&self) -> [f64; 2] {
        self.u
    }

    /// `[v_min, v_max]`.
    #[must_use]
    pub const fn v_bounds(&self) -> [f64; 2] {
        self.v
    }

    /// Width in U.
    #[must_use]
    pub fn u_range(&self) -> f64 {
        self.u[1] - self.u[0]
    }

    /// Width in V.
    #[must_use]
    pub fn v_range(&self) -> f64 {
        self.v[1] - self.v[0]
    }
}

// =============================================================================
// SPLITTERS
// =============================================================================

/// Inputs of interior node generation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitParameters {
    /// Face deflection.
    pub deflection: f64,
    /// Angular deflection, radians.
    pub angle: f64,
    /// Minimum element size; `0` disables it.
    pub min_size: f64,
    /// U parameters of the boundary vertices.
    pub boundary_u_params: Vec<f64>,
    /// V parameters of the boundary vertices.
    pub boundary_v_params: Vec<f64>,
}

/// Strategy proposing interior sample points for one surface family.
pub trait RangeSplitter: Send + Sync + Debug {
    /// Short identifier for logs.
    fn name(&self) -> &'static str;

    /// Normalization deltas for `domain`. Defaults to `range / length`.
    fn compute_delta(
        &self,
        _surface: &dyn SurfaceEvaluator,
        domain: &ParamDomain,
        _params: &SplitParameters,
    ) -> [f64; 2] {
        let [lu, lv] = domain.lengths();
        [domain.u_range() / lu, domain.v_range() / lv]
    }

    /// Candidate interior points in face parameters. Classification is left to the caller.
    fn generate_surface_nodes(
        &self,
        _surface: &dyn SurfaceEvaluator,
        _domain: &ParamDomain,
        _params: &SplitParameters,
    ) -> Vec<Point2<f64>> {
        Vec::new()
    }
}

/// Angular step of a circle of `radius` meeting the deflection and angle limits.
#[must_use]
pub fn arc_angular_step(radius: f64, deflection: f64, angle: f64, min_size: f64) -> f64 {
    let mut du = if radius > deflection {
        2.0 * (1.0 - deflection / radius).max(0.0).acos()
    } else {
        0.0
    };
    du = du.min(angle);
    if min_size > 1e-7 && radius > 0.0 {
        du = du.max(min_size / radius);
    }
    if du > 0.0 { du } else { angle }
}

/// Number of whole steps of size `step` in `range`, at most [`MAX_STEPS`].
fn steps(range: f64, step: f64) -> usize {
    let n = (range / step).floor();
    if !(n.is_finite() && n > 0.0) {
        0
    } else if n >= MAX_STEPS as f64 {
        MAX_STEPS
    } else {
        // Bounded by MAX_STEPS above.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = n as usize;
        n
    }
}

#[allow(clippy::cast_precision_loss)]
fn uniform(first: f64, step: f64, count: usize) -> impl Iterator<Item = f64> {
    (1..=count).map(move |i| first + step * i as f64)
}

fn grid(us: &[f64], vs: &[f64]) -> Vec<Point2<f64>> {
    us.iter()
        .flat_map(|&u| vs.iter().map(move |&v| Point2::new(u, v)))
        .collect()
}

/// Planes and any surface needing no interior nodes.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRangeSplitter;

impl RangeSplitter for DefaultRangeSplitter {
    fn name(&self) -> &'static str {
        "default"
    }
}

/// Staggered rows of nodes with a latitude-dependent U step.
#[derive(Clone, Copy, Debug, Default)]
pub struct SphereRangeSplitter;

impl RangeSplitter for SphereRangeSplitter {
    fn name(&self) -> &'static str {
        "sphere"
    }

    fn generate_surface_nodes(
        &self,
        surface: &dyn SurfaceEvaluator,
        domain: &ParamDomain,
        params: &SplitParameters,
    ) -> Vec<Point2<f64>> {
        let SurfaceKind::Sphere { radius } = surface.kind() else {
            return Vec::new();
        };
        let [u_min, u_max] = domain.u_bounds();
        let [v_min, _] = domain.v_bounds();
        let (su, sv) = (domain.u_range(), domain.v_range());

        let step = 0.7 * arc_angular_step(radius, params.deflection, params.angle, params.min_size);
        let nb_v = steps(sv, step);
        let dv = sv / (nb_v + 1) as f64;

        let mut nodes = Vec::new();
        for (row, v) in uniform(v_min, dv, nb_v).enumerate() {
            let du = dv / (1.0 - 0.365 * v * v);
            let nb_u = steps(su, du);
            let du = su / (nb_u + 1) as f64;
            let shift = if row % 2 == 1 { 0.5 * du } else { 0.0 };
            for u in uniform(u_min, du, nb_u) {
                let u = u - shift;
                if u > u_min && u < u_max {
                    nodes.push(Point2::new(u, v));
                }
            }
        }
        nodes
    }
}

fn circular_grid(
    radius: f64,
    domain: &ParamDomain,
    params: &SplitParameters,
) -> Vec<Point2<f64>> {
    let (su, sv) = (domain.u_range(), domain.v_range());
    if su * radius <= params.deflection {
        return Vec::new();
    }
    let du = arc_angular_step(radius, params.deflection, params.angle, params.min_size);
    let nb_u = steps(su, du);
    let du = su / (nb_u + 1) as f64;
    let nb_v = steps(nb_u as f64 * sv, su * radius).min(100 * nb_u);
    let dv = sv / (nb_v + 1) as f64;

    let us: Vec<f64> = uniform(domain.u_bounds()[0], du, nb_u).collect();
    let vs: Vec<f64> = uniform(domain.v_bounds()[0], dv, nb_v).collect();
    grid(&us, &vs)
}

/// Regular grid from the angular step of the radius.
#[derive(Clone, Copy, Debug, Default)]
pub struct CylinderRangeSplitter;

impl RangeSplitter for CylinderRangeSplitter {
    fn name(&self) -> &'static str {
        "cylinder"
    }

    fn compute_delta(
        &self,
        surface: &dyn SurfaceEvaluator,
        domain: &ParamDomain,
        params: &SplitParameters,
    ) -> [f64; 2] {
        let SurfaceKind::Cylinder { radius } = surface.kind() else {
            return DefaultRangeSplitter.compute_delta(surface, domain, params);
        };
        let du = (2.0 * (1.0 - params.deflection / radius).max(0.0).acos()).min(params.angle);
        let lv = domain.lengths()[1];
        if du > 0.0 && lv > MIN_LENGTH {
            [du / lv, 1.0]
        } else {
            DefaultRangeSplitter.compute_delta(surface, domain, params)
        }
    }

    fn generate_surface_nodes(
        &self,
        surface: &dyn SurfaceEvaluator,
        domain: &ParamDomain,
        params: &SplitParameters,
    ) -> Vec<Point2<f64>> {
        match surface.kind() {
            SurfaceKind::Cylinder { radius } => circular_grid(radius, domain, params),
            _ => Vec::new(),
        }
    }
}

/// Cylinder-like grid using the largest section radius over the V range.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConeRangeSplitter;

impl RangeSplitter for ConeRangeSplitter {
    fn name(&self) -> &'static str {
        "cone"
    }

    fn generate_surface_nodes(
        &self,
        surface: &dyn SurfaceEvaluator,
        domain: &ParamDomain,
        params: &SplitParameters,
    ) -> Vec<Point2<f64>> {
        let SurfaceKind::Cone {
            ref_radius,
            semi_angle,
        } = surface.kind()
        else {
            return Vec::new();
        };
        let [v_min, v_max] = domain.v_bounds();
        let sin_a = semi_angle.sin();
        let radius = (ref_radius + v_min * sin_a)
            .abs()
            .max((ref_radius + v_max * sin_a).abs());
        circular_grid(radius, domain, params)
    }
}

/// Steps of the torus grid: `(du, dv, nb_u, nb_v)`.
fn torus_steps(
    major: f64,
    minor: f64,
    domain: &ParamDomain,
    params: &SplitParameters,
) -> Option<(f64, f64, usize, usize)> {
    let (su, sv) = (domain.u_range(), domain.v_range());
    let old_dv = arc_angular_step(minor, params.deflection, params.angle, params.min_size);
    let nb_v = steps(sv, old_dv).max(2);
    let dv = sv / (nb_v + 1) as f64;

    let ru = major + minor;
    let du = if ru > MIN_LENGTH {
        let du = arc_angular_step(ru, params.deflection, params.angle, params.min_size);
        let aa = du.hypot(old_dv);
        if aa < f64::EPSILON {
            return None;
        }
        du * old_dv.min(du) / aa
    } else {
        dv
    };
    let nb_u = steps(su, du)
        .max(2)
        .max(steps(nb_v as f64 * su * major, sv * minor * 5.0));
    let du = su / (nb_u + 1) as f64;
    Some((du, dv, nb_u, nb_v))
}

/// Keeps boundary parameters that are at least `scale` steps apart; falls
/// back to a uniform subdivision when too few survive.
fn fill_params(boundary: &[f64], range: [f64; 2], nb_steps: usize, scale: f64) -> Vec<f64> {
    let step = (range[1] - range[0]) / (nb_steps + 1) as f64;
    let tol = scale * step;
    let mut sorted: Vec<f64> = boundary
        .iter()
        .copied()
        .filter(|p| p.is_finite() && *p > range[0] && *p < range[1])
        .collect();
    sorted.sort_by(f64::total_cmp);

    let mut kept = vec![range[0]];
    for p in sorted {
        if kept.last().is_some_and(|last| p - last > tol) && range[1] - p > tol {
            kept.push(p);
        }
    }
    if kept.len() - 1 < nb_steps / 2 {
        return uniform(range[0], step, nb_steps).collect();
    }
    kept.remove(0);
    kept
}

/// Grid in both angular directions of a torus.
#[derive(Clone, Copy, Debug, Default)]
pub struct TorusRangeSplitter;

impl RangeSplitter for TorusRangeSplitter {
    fn name(&self) -> &'static str {
        "torus"
    }

    fn compute_delta(
        &self,
        surface: &dyn SurfaceEvaluator,
        domain: &ParamDomain,
        params: &SplitParameters,
    ) -> [f64; 2] {
        if let SurfaceKind::Torus {
            major_radius,
            minor_radius,
        } = surface.kind()
        {
            if let Some((du, dv, _, _)) = torus_steps(major_radius, minor_radius, domain, params) {
                // One grid step in each direction maps to the 3D length of a minor step.
                let length = dv * minor_radius;
                if length > MIN_LENGTH {
                    return [du / length, dv / length];
                }
            }
        }
        DefaultRangeSplitter.compute_delta(surface, domain, params)
    }

    fn generate_surface_nodes(
        &self,
        surface: &dyn SurfaceEvaluator,
        domain: &ParamDomain,
        params: &SplitParameters,
    ) -> Vec<Point2<f64>> {
        let SurfaceKind::Torus {
            major_radius,
            minor_radius,
        } = surface.kind()
        else {
            return Vec::new();
        };
        let Some((du, dv, nb_u, nb_v)) = torus_steps(major_radius, minor_radius, domain, params)
        else {
            return Vec::new();
        };
        let [u_min, u_max] = domain.u_bounds();
        let [v_min, v_max] = domain.v_bounds();

        let us: Vec<f64> = if major_radius < minor_radius {
            uniform(u_min, du, nb_u).collect()
        } else {
            fill_params(&params.boundary_u_params, [u_min, u_max], nb_u, 0.5)
        };
        let vs = fill_params(&params.boundary_v_params, [v_min, v_max], nb_v, 2.0 / 3.0);

        let inside_u = |u: &&f64| **u >= u_min + 0.1 * du && **u < u_max - 0.1 * du;
        let inside_v = |v: &&f64| **v >= v_min + 0.1 * dv && **v < v_max - 0.1 * dv;
        let us: Vec<f64> = us.iter().filter(inside_u).copied().collect();
        let vs: Vec<f64> = vs.iter().filter(inside_v).copied().collect();
        grid(&us, &vs)
    }
}

/// Bezier and B-spline patches: boundary parameters refined by isoline
/// deflection and normal deviation.
#[derive(Clone, Copy, Debug, Default)]
pub struct FreeFormRangeSplitter;

/// Minimum parameter spacing as a fraction of the range.
const FREE_FORM_GRAIN: f64 = 0.01;

/// Bound on refinement rounds per direction.
const FREE_FORM_ROUNDS: usize = 8;

fn filter_parameters(source: &[f64], range: [f64; 2], min_dist: f64) -> Vec<f64> {
    let mut all: Vec<f64> = source
        .iter()
        .copied()
        .filter(|p| p.is_finite() && *p >= range[0] && *p <= range[1])
        .chain([range[0], range[1]])
        .collect();
    all.sort_by(f64::total_cmp);
    let mut kept: Vec<f64> = Vec::with_capacity(all.len());
    for p in all {
        if kept.last().is_none_or(|last| p - last >= min_dist) {
            kept.push(p);
        }
    }
    if let Some(last) = kept.last_mut() {
        *last = range[1];
    }
    kept
}

impl FreeFormRangeSplitter {
    /// Inserts midpoints into `params` (along one direction) wherever an
    /// isoline at one of `across` deviates from its chord or turns its normal.
    fn refine<F>(
        surface: &dyn SurfaceEvaluator,
        params: &mut Vec<f64>,
        across: &[f64],
        split: &SplitParameters,
        min_dist: f64,
        at: F,
    ) where
        F: Fn(f64, f64) -> Point2<f64>,
    {
        let defl2 = split.deflection * split.deflection;
        for _ in 0..FREE_FORM_ROUNDS {
            let mut inserted = Vec::new();
            for w in params.windows(2) {
                let (a, b) = (w[0], w[1]);
                if b - a < 2.0 * min_dist {
                    continue;
                }
                let mid = 0.5 * (a + b);
                let needs_split = across.iter().any(|&s| {
                    let (pa, pb, pm) = (at(a, s), at(b, s), at(mid, s));
                    let sag = squared_deflection_of_segment(
                        &surface.value(&pa),
                        &surface.value(&pb),
                        &surface.value(&pm),
                    );
                    let turn = match (surface.normal(&pa), surface.normal(&pb)) {
                        (Some(na), Some(nb)) => na.angle(&nb),
                        _ => 0.0,
                    };
                    sag > defl2 || turn > split.angle
                });
                if needs_split {
                    inserted.push(mid);
                }
            }
            if inserted.is_empty() {
                break;
            }
            params.extend(inserted);
            params.sort_by(f64::total_cmp);
        }
    }
}

impl RangeSplitter for FreeFormRangeSplitter {
    fn name(&self) -> &'static str {
        "free-form"
    }

    fn generate_surface_nodes(
        &self,
        surface: &dyn SurfaceEvaluator,
        domain: &ParamDomain,
        params: &SplitParameters,
    ) -> Vec<Point2<f64>> {
        let (ru, rv) = (domain.u_bounds(), domain.v_bounds());
        let min_u = domain.u_range() * FREE_FORM_GRAIN;
        let min_v = domain.v_range() * FREE_FORM_GRAIN;
        let mut us = filter_parameters(&params.boundary_u_params, ru, min_u);
        let mut vs = filter_parameters(&params.boundary_v_params, rv, min_v);

        let across_v = vs.clone();
        Self::refine(surface, &mut us, &across_v, params, min_u, |u, v| Point2::new(u, v));
        let across_u = us.clone();
        Self::refine(surface, &mut vs, &across_u, params, min_v, |v, u| Point2::new(u, v));

        let inner = |p: &[f64]| -> Vec<f64> {
            if p.len() > 2 {
                p[1..p.len() - 1].to_vec()
            } else {
                Vec::new()
            }
        };
        grid(&inner(&us), &inner(&vs))
    }
}

/// Surfaces without a dedicated strategy: tangential sampling of an 11x11
/// family of isolines.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenericRangeSplitter;

const GENERIC_SAMPLES: usize = 11;
const GENERIC_ANGLE: f64 = 0.35;

impl GenericRangeSplitter {
    /// Parameters along one direction taken from the most densely sampled isoline.
    fn densest_isoline<F>(
        surface: &dyn SurfaceEvaluator,
        along: [f64; 2],
        across: [f64; 2],
        deflection: f64,
        at: F,
    ) -> Vec<f64>
    where
        F: Fn(f64, f64) -> Point2<f64>,
    {
        let mut best: Vec<f64> = Vec::new();
        for i in 0..GENERIC_SAMPLES {
            #[allow(clippy::cast_precision_loss)]
            let s = across[0] + (across[1] - across[0]) * i as f64 / (GENERIC_SAMPLES - 1) as f64;
            let params = tangential_deflection_params(
                |t| surface.value(&at(t, s)),
                along[0],
                along[1],
                0.7 * deflection,
                GENERIC_ANGLE,
                2,
                10,
            );
            if params.len() > best.len() {
                best = params;
            }
        }
        best
    }
}

impl RangeSplitter for GenericRangeSplitter {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn generate_surface_nodes(
        &self,
        surface: &dyn SurfaceEvaluator,
        domain: &ParamDomain,
        params: &SplitParameters,
    ) -> Vec<Point2<f64>> {
        let (ru, rv) = (domain.u_bounds(), domain.v_bounds());
        let us = Self::densest_isoline(surface, ru, rv, params.deflection, |u, v| Point2::new(u, v));
        let vs = Self::densest_isoline(surface, rv, ru, params.deflection, |v, u| Point2::new(u, v));
        if us.len() < 3 || vs.len() < 3 {
            return Vec::new();
        }
        grid(&us[1..us.len() - 1], &vs[1..vs.len() - 1])
    }
}

/// Picks the node strategy for a surface family.
#[must_use]
pub fn range_splitter_for(kind: &SurfaceKind) -> Box<dyn RangeSplitter> {
    match kind {
        SurfaceKind::Plane => Box::new(DefaultRangeSplitter),
        SurfaceKind::Sphere { .. } => Box::new(SphereRangeSplitter),
        SurfaceKind::Cylinder { .. } => Box::new(CylinderRangeSplitter),
        SurfaceKind::Cone { .. } => Box::new(ConeRangeSplitter),
        SurfaceKind::Torus { .. } => Box::new(TorusRangeSplitter),
        SurfaceKind::Bezier { .. } | SurfaceKind::BSpline { .. } => Box::new(FreeFormRangeSplitter),
        SurfaceKind::Extrusion { .. } | SurfaceKind::Revolution { .. } | SurfaceKind::Other => {
            Box::new(GenericRangeSplitter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::surface::{Cylinder, FnSurface, Frame, ParamBounds, Plane, Sphere, Torus};
    use approx::assert_relative_eq;
    use nalgebra::Point3;
    use std::f64::consts::{FRAC_PI_2, PI, TAU};

    fn domain_of(surface: &dyn SurfaceEvaluator, u: [f64; 2], v: [f64; 2]) -> ParamDomain {
        let mut d = ParamDomain::default();
        d.add_point(&Point2::new(u[0], v[0]));
        d.add_point(&Point2::new(u[1], v[1]));
        d.adjust_range(surface);
        d.compute_lengths(surface);
        d
    }

    fn split(deflection: f64, angle: f64) -> SplitParameters {
        SplitParameters {
            deflection,
            angle,
            ..SplitParameters::default()
        }
    }

    #[test]
    fn test_plane_lengths_and_normalization() {
        let plane = Plane::default();
        let mut d = domain_of(&plane, [0.0, 2.0], [0.0, 4.0]);
        assert!(d.is_valid());
        assert_relative_eq!(d.lengths()[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(d.lengths()[1], 4.0, epsilon = 1e-12);
        let delta = DefaultRangeSplitter.compute_delta(&plane, &d, &split(0.01, 0.5));
        d.set_delta(delta);
        let p = Point2::new(1.5, 3.0);
        let n = d.scale(&p, true);
        assert_relative_eq!(d.scale(&n, false), p, epsilon = 1e-12);
        assert!(DefaultRangeSplitter
            .generate_surface_nodes(&plane, &d, &split(0.01, 0.5))
            .is_empty());
    }

    #[test]
    fn test_adjust_range_limits_periodic_direction_to_one_period() {
        let cyl = Cylinder::new(Frame::default(), 1.0);
        let mut d = ParamDomain::default();
        d.add_point(&Point2::new(-1.0, 0.0));
        d.add_point(&Point2::new(7.0, 1.0));
        d.adjust_range(&cyl);
        assert_relative_eq!(d.u_range(), TAU, epsilon = 1e-12);

        let patch = FnSurface::new(
            |u, v| Point3::new(u, v, 0.0),
            ParamBounds::new(0.0, 1.0, 0.0, 1.0),
            SurfaceKind::Other,
        );
        let mut d = ParamDomain::default();
        d.add_point(&Point2::new(-0.1, 0.0));
        d.add_point(&Point2::new(1.1, 1.0));
        d.adjust_range(&patch);
        assert_eq!(d.u_bounds(), [0.0, 1.0]);
    }

    #[test]
    fn test_cylinder_grid_is_interior() {
        let cyl = Cylinder::new(Frame::default(), 1.0);
        let d = domain_of(&cyl, [0.0, PI], [0.0, 2.0]);
        let nodes = CylinderRangeSplitter.generate_surface_nodes(&cyl, &d, &split(0.01, 0.5));
        assert!(!nodes.is_empty());
        assert!(nodes.iter().all(|p| p.x > 0.0 && p.x < PI && p.y > 0.0 && p.y < 2.0));
        let delta = CylinderRangeSplitter.compute_delta(&cyl, &d, &split(0.01, 0.5));
        assert_relative_eq!(delta[1], 1.0);
    }

    #[test]
    fn test_tiny_deflection_grid_is_capped() {
        assert_eq!(steps(1.0, 1e-300), MAX_STEPS);
        assert_eq!(steps(1.0, 0.0), 0);
        assert_eq!(steps(10.0, 3.0), 3);

        let cyl = Cylinder::new(Frame::default(), 1.0);
        let d = domain_of(&cyl, [0.0, FRAC_PI_2], [0.0, 0.01]);
        let nodes = CylinderRangeSplitter.generate_surface_nodes(&cyl, &d, &split(1e-12, 0.5));
        let mut us: Vec<f64> = nodes.iter().map(|p| p.x).collect();
        us.sort_by(f64::total_cmp);
        us.dedup();
        assert_eq!(us.len(), MAX_STEPS);
        assert!(nodes.len() <= MAX_STEPS * MAX_STEPS);

        let sphere = Sphere::new(Frame::default(), 1.0);
        let d = domain_of(&sphere, [0.0, FRAC_PI_2], [-0.01, 0.01]);
        let nodes = SphereRangeSplitter.generate_surface_nodes(&sphere, &d, &split(1e-12, 0.5));
        assert!(!nodes.is_empty());
        assert!(nodes.len() <= MAX_STEPS * MAX_STEPS);
    }

    #[test]
    fn test_sphere_rows_are_staggered() {
        let sphere = Sphere::new(Frame::default(), 1.0);
        let d = domain_of(&sphere, [0.0, TAU], [-FRAC_PI_2, FRAC_PI_2]);
        let nodes = SphereRangeSplitter.generate_surface_nodes(&sphere, &d, &split(0.05, 0.5));
        assert!(nodes.len() > 10);
        let mut rows: Vec<f64> = nodes.iter().map(|p| p.y).collect();
        rows.dedup();
        assert!(rows.len() >= 2);
        let first_u = |v: f64| {
            nodes
                .iter()
                .filter(|p| p.y == v)
                .map(|p| p.x)
                .fold(f64::INFINITY, f64::min)
        };
        assert!((first_u(rows[0]) - first_u(rows[1])).abs() > 1e-6);
    }

    #[test]
    fn test_torus_and_generic_produce_interior_nodes() {
        let torus = Torus::new(Frame::default(), 3.0, 1.0);
        let d = domain_of(&torus, [0.0, TAU], [0.0, TAU]);
        let nodes = TorusRangeSplitter.generate_surface_nodes(&torus, &d, &split(0.05, 0.5));
        assert!(!nodes.is_empty());
        assert!(nodes.iter().all(|p| p.x > 0.0 && p.x < TAU && p.y > 0.0 && p.y < TAU));

        let bump = FnSurface::new(
            |u, v| Point3::new(u, v, (u * PI).sin() * (v * PI).sin()),
            ParamBounds::new(0.0, 1.0, 0.0, 1.0),
            SurfaceKind::Other,
        );
        let d = domain_of(&bump, [0.0, 1.0], [0.0, 1.0]);
        let nodes = range_splitter_for(&bump.kind()).generate_surface_nodes(&bump, &d, &split(0.01, 0.5));
        assert!(!nodes.is_empty());
        assert!(nodes.iter().all(|p| p.x > 0.0 && p.x < 1.0 && p.y > 0.0 && p.y < 1.0));
    }

    #[test]
    fn test_free_form_refines_curved_patch() {
        let patch = FnSurface::new(
            |u, v| Point3::new(u, v, u * u + v * v),
            ParamBounds::new(0.0, 1.0, 0.0, 1.0),
            SurfaceKind::BSpline {
                u_degree: 2,
                v_degree: 2,
                nb_u_knots: 2,
                nb_v_knots: 2,
            },
        );
        let d = domain_of(&patch, [0.0, 1.0], [0.0, 1.0]);
        let nodes = FreeFormRangeSplitter.generate_surface_nodes(&patch, &d, &split(0.01, 0.5));
        assert!(!nodes.is_empty());
        assert_eq!(range_splitter_for(&patch.kind()).name(), "free-form");
    }

    #[test]
    fn test_arc_angular_step_limits() {
        assert_relative_eq!(arc_angular_step(1.0, 2.0, 0.5, 0.0), 0.5);
        let step = arc_angular_step(1.0, 0.01, 0.5, 0.0);
        assert_relative_eq!(step, 2.0 * 0.99_f64.acos(), epsilon = 1e-12);
    }
}
