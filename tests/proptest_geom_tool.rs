//! Properties of the segment intersection predicate and its acceptance rules.

use approx::assert_relative_eq;
use facemesh::geometry::geom_tool::{
    IntersectionType, SegmentIntersectionChecker, fan_area, int_seg_seg,
};
use facemesh::mesh::attribute::MeshConstants;
use nalgebra::Point2;
use proptest::prelude::*;

fn coordinate() -> impl Strategy<Value = f64> {
    -100.0..100.0_f64
}

fn point() -> impl Strategy<Value = Point2<f64>> {
    (coordinate(), coordinate()).prop_map(|(x, y)| Point2::new(x, y))
}

fn checker() -> SegmentIntersectionChecker {
    SegmentIntersectionChecker::new(MeshConstants::default().tangent_angle, 1e-3)
}

proptest! {
    #[test]
    fn prop_int_seg_seg_is_symmetric(a in point(), b in point(), c in point(), d in point()) {
        let ab_cd = int_seg_seg(&a, &b, &c, &d, false, false);
        let cd_ab = int_seg_seg(&c, &d, &a, &b, false, false);
        prop_assert_eq!(ab_cd.kind, cd_ab.kind);
        match (ab_cd.point, cd_ab.point) {
            (Some(p), Some(q)) => prop_assert!((p - q).norm() <= 1e-9 * (1.0 + p.coords.norm())),
            (None, None) => {}
            _ => prop_assert!(false, "only one side found a contact point"),
        }
    }

    #[test]
    fn prop_zero_length_candidate_is_rejected(a in point(), b in point(), c in point()) {
        let hit = int_seg_seg(&a, &b, &c, &c, false, false);
        prop_assert_eq!(hit.kind, IntersectionType::NoIntersection);
        prop_assert!(!checker().accept((&a, &b), (&c, &c), None));
    }
}

#[test]
fn near_tangent_crossing_is_rejected() {
    let reference = (Point2::new(-10.0, 0.0), Point2::new(10.0, 0.0));
    let candidate = (Point2::new(-10.0, -0.1), Point2::new(10.0, 0.1));
    let hit = int_seg_seg(&reference.0, &reference.1, &candidate.0, &candidate.1, false, false);
    assert_eq!(hit.kind, IntersectionType::Cross);
    assert!(!checker().accept((&reference.0, &reference.1), (&candidate.0, &candidate.1), None));
}

#[test]
fn proper_crossing_is_accepted() {
    let reference = (Point2::new(-10.0, 0.0), Point2::new(10.0, 0.0));
    let candidate = (Point2::new(-10.0, -10.0), Point2::new(10.0, 10.0));
    assert!(checker().accept((&reference.0, &reference.1), (&candidate.0, &candidate.1), None));
}

#[test]
fn self_loop_smaller_than_tolerance_disk_is_rejected() {
    let tol = 1e-3;
    let min_area = MeshConstants::self_loop_area(tol);
    let reference = (Point2::new(-1.0, 0.0), Point2::new(1.0, 0.0));
    let candidate = (Point2::new(0.0, -1.0), Point2::new(0.0, 1.0));
    let origin = Point2::origin();

    // Square loop of side s around the crossing point: area s².
    let loop_of = |s: f64| {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(s, 0.0),
            Point2::new(s, s),
            Point2::new(0.0, s),
        ]
    };
    let small = loop_of(0.5 * min_area.sqrt());
    let large = loop_of(2.0 * min_area.sqrt());
    assert!(fan_area(&origin, &small) < min_area);
    assert!(fan_area(&origin, &large) >= min_area);

    let checker = SegmentIntersectionChecker::new(MeshConstants::default().tangent_angle, tol);
    let r = (&reference.0, &reference.1);
    let c = (&candidate.0, &candidate.1);
    assert!(!checker.accept(r, c, Some(&small)));
    assert!(checker.accept(r, c, Some(&large)));
    assert_relative_eq!(fan_area(&origin, &large), 4.0 * min_area, max_relative = 1e-12);
}
