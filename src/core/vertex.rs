//! Mesh vertices: a parametric (U, V) position plus its 3D location.
//!
//! # Examples
//!
//! ```rust
//! use facemesh::core::vertex::{MeshVertex, MeshVertexBuilder, Movability};
//! use nalgebra::{Point2, Point3};
//!
//! let v = MeshVertex::new(Point2::new(0.5, 0.25), Point3::new(1.0, 2.0, 3.0), Movability::Frontier);
//! assert!(v.is_constrained());
//!
//! let free = MeshVertexBuilder::default()
//!     .uv(Point2::new(0.1, 0.1))
//!     .build()
//!     .unwrap();
//! assert_eq!(free.movability, Movability::Free);
//! ```

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Constraint tag shared by vertices and edges.
///
/// Legalization may only alter [`Movability::Free`] edges; vertices that are
/// not free can never be removed from the mesh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Movability {
    /// Interior element, subject to flips and removal.
    #[default]
    Free,
    /// Lies on the face boundary (discretized wire edges).
    Frontier,
    /// Constrained element inside the face (internal edges and isolated vertices).
    Fixed,
}

impl Movability {
    /// `true` for anything but [`Movability::Free`].
    #[inline]
    #[must_use]
    pub const fn is_constrained(self) -> bool {
        !matches!(self, Self::Free)
    }

    /// The more constrained of two tags; `Frontier` wins over `Fixed`.
    #[must_use]
    pub const fn strongest(self, other: Self) -> Self {
        match (self, other) {
            (Self::Frontier, _) | (_, Self::Frontier) => Self::Frontier,
            (Self::Fixed, _) | (_, Self::Fixed) => Self::Fixed,
            _ => Self::Free,
        }
    }
}

impl fmt::Display for Movability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "Free"),
            Self::Frontier => write!(f, "Frontier"),
            Self::Fixed => write!(f, "Fixed"),
        }
    }
}

/// A vertex of the mesh being built.
///
/// `uv` lives in whatever parametrization the owning
/// [`MeshData`](crate::core::mesh_data::MeshData) currently uses (the face
/// parameters, or their normalized image during triangulation).
#[derive(Builder, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshVertex {
    /// Parametric position.
    pub uv: Point2<f64>,
    /// Location on the surface.
    #[builder(default = "Point3::origin()")]
    pub point: Point3<f64>,
    /// Constraint tag.
    #[builder(default)]
    pub movability: Movability,
}

impl MeshVertex {
    /// Creates a vertex.
    #[must_use]
    pub const fn new(uv: Point2<f64>, point: Point3<f64>, movability: Movability) -> Self {
        Self {
            uv,
            point,
            movability,
        }
    }

    /// Whether the vertex is pinned by a boundary or internal constraint.
    #[inline]
    #[must_use]
    pub const fn is_constrained(&self) -> bool {
        self.movability.is_constrained()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_normal;

    #[test]
    fn test_vertex_is_normal() {
        assert!(is_normal::<MeshVertex>());
        assert!(is_normal::<Movability>());
    }

    #[test]
    fn test_movability_strongest() {
        assert_eq!(Movability::Free.strongest(Movability::Fixed), Movability::Fixed);
        assert_eq!(Movability::Fixed.strongest(Movability::Frontier), Movability::Frontier);
        assert_eq!(Movability::Free.strongest(Movability::Free), Movability::Free);
        assert!(!Movability::Free.is_constrained());
        assert_eq!(Movability::Frontier.to_string(), "Frontier");
    }

    #[test]
    fn test_builder_defaults() {
        let v = MeshVertexBuilder::default()
            .uv(Point2::new(1.0, 2.0))
            .build()
            .unwrap();
        assert_eq!(v.point, Point3::origin());
        assert_eq!(v.movability, Movability::Free);
        assert!(MeshVertexBuilder::default().build().is_err());
    }

    #[test]
    fn test_vertex_serde_roundtrip() {
        let v = MeshVertex::new(Point2::new(0.5, 0.5), Point3::new(1.0, 0.0, -1.0), Movability::Fixed);
        let json = serde_json::to_string(&v).unwrap();
        let back: MeshVertex = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
