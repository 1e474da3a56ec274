//! Point classification against the trimmed parametric domain of a face.

use super::predicates::squared_distance_to_segment;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a parametric point relative to the face domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    /// Strictly inside the trimmed domain.
    In,
    /// Outside the domain or inside a hole.
    Out,
    /// On a boundary loop, within tolerance.
    On,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => write!(f, "IN"),
            Self::Out => write!(f, "OUT"),
            Self::On => write!(f, "ON"),
        }
    }
}

/// Capability answering where a parametric point lies.
pub trait Classifier: Send + Sync + fmt::Debug {
    /// Classifies `uv`.
    fn classify(&self, uv: &Point2<f64>) -> Classification;
}

/// Even-odd classifier over closed polygonal loops.
///
/// The first loop is the outer boundary, the others are holes; with the
/// parity rule the distinction does not matter.
#[derive(Clone, Debug, Default)]
pub struct PolygonClassifier {
    loops: Vec<Vec<Point2<f64>>>,
    tolerance: f64,
    min: Point2<f64>,
    max: Point2<f64>,
}

impl PolygonClassifier {
    /// Builds a classifier from closed loops (last point implicitly joins the first).
    #[must_use]
    pub fn new(loops: Vec<Vec<Point2<f64>>>, tolerance: f64) -> Self {
        let mut min = Point2::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in loops.iter().flatten() {
            min = Point2::new(min.x.min(p.x), min.y.min(p.y));
            max = Point2::new(max.x.max(p.x), max.y.max(p.y));
        }
        Self {
            loops,
            tolerance,
            min,
            max,
        }
    }

    /// Boundary loops.
    #[must_use]
    pub fn loops(&self) -> &[Vec<Point2<f64>>] {
        &self.loops
    }

    fn segments(&self) -> impl Iterator<Item = (&Point2<f64>, &Point2<f64>)> {
        self.loops.iter().filter(|l| l.len() >= 2).flat_map(|l| {
            l.iter()
                .zip(l.iter().skip(1).chain(std::iter::once(&l[0])))
        })
    }
}

impl Classifier for PolygonClassifier {
    fn classify(&self, uv: &Point2<f64>) -> Classification {
        let tol = self.tolerance;
        if uv.x < self.min.x - tol
            || uv.x > self.max.x + tol
            || uv.y < self.min.y - tol
            || uv.y > self.max.y + tol
        {
            return Classification::Out;
        }

        let tol2 = tol * tol;
        let mut inside = false;
        for (a, b) in self.segments() {
            if squared_distance_to_segment(uv, a, b) <= tol2 {
                return Classification::On;
            }
            if (a.y > uv.y) != (b.y > uv.y) {
                let x = a.x + (uv.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if uv.x < x {
                    inside = !inside;
                }
            }
        }
        if inside {
            Classification::In
        } else {
            Classification::Out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min: f64, max: f64) -> Vec<Point2<f64>> {
        vec![
            Point2::new(min, min),
            Point2::new(max, min),
            Point2::new(max, max),
            Point2::new(min, max),
        ]
    }

    #[test]
    fn test_square_with_hole() {
        let mut hole = square(0.4, 0.6);
        hole.reverse();
        let c = PolygonClassifier::new(vec![square(0.0, 1.0), hole], 1e-9);
        assert_eq!(c.classify(&Point2::new(0.2, 0.2)), Classification::In);
        assert_eq!(c.classify(&Point2::new(0.5, 0.5)), Classification::Out);
        assert_eq!(c.classify(&Point2::new(1.5, 0.5)), Classification::Out);
        assert_eq!(c.classify(&Point2::new(1.0, 0.5)), Classification::On);
        assert_eq!(c.classify(&Point2::new(0.4, 0.5)), Classification::On);
    }

    #[test]
    fn test_empty_classifier_rejects_everything() {
        let c = PolygonClassifier::new(Vec::new(), 1e-9);
        assert_eq!(c.classify(&Point2::new(0.0, 0.0)), Classification::Out);
        assert_eq!(Classification::In.to_string(), "IN");
    }
}
