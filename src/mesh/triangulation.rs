//! Flat triangulation attached to a meshed face.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Indexed mesh of one face.
///
/// Triangles are counter-clockwise in UV for forward faces and clockwise
/// when [`Triangulation::is_reversed`] is set. Indices are stable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Triangulation {
    nodes: Vec<Point3<f64>>,
    uv_nodes: Vec<Point2<f64>>,
    triangles: Vec<[usize; 3]>,
    edges: Vec<([usize; 2], bool)>,
    deflection: f64,
    is_reversed: bool,
}

impl Triangulation {
    /// Assembles a triangulation.
    #[must_use]
    pub const fn new(
        nodes: Vec<Point3<f64>>,
        uv_nodes: Vec<Point2<f64>>,
        triangles: Vec<[usize; 3]>,
        edges: Vec<([usize; 2], bool)>,
        deflection: f64,
        is_reversed: bool,
    ) -> Self {
        Self {
            nodes,
            uv_nodes,
            triangles,
            edges,
            deflection,
            is_reversed,
        }
    }

    /// Node indices of triangle `i`.
    #[must_use]
    pub fn triangle(&self, i: usize) -> Option<[usize; 3]> {
        self.triangles.get(i).copied()
    }

    /// Node indices of edge `i` and whether it lies on the face boundary.
    #[must_use]
    pub fn edge(&self, i: usize) -> Option<([usize; 2], bool)> {
        self.edges.get(i).copied()
    }

    /// Parametric position of node `i`.
    #[must_use]
    pub fn vertex(&self, i: usize) -> Option<Point2<f64>> {
        self.uv_nodes.get(i).copied()
    }

    /// 3D position of node `i`.
    #[must_use]
    pub fn pnt(&self, i: usize) -> Option<Point3<f64>> {
        self.nodes.get(i).copied()
    }

    /// Number of nodes.
    #[must_use]
    pub fn nb_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of triangles.
    #[must_use]
    pub fn nb_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn nb_edges(&self) -> usize {
        self.edges.len()
    }

    /// Whether there is no triangle.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// All 3D nodes.
    #[must_use]
    pub fn nodes(&self) -> &[Point3<f64>] {
        &self.nodes
    }

    /// All parametric nodes.
    #[must_use]
    pub fn uv_nodes(&self) -> &[Point2<f64>] {
        &self.uv_nodes
    }

    /// All triangles.
    #[must_use]
    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// All edges with their boundary flag.
    #[must_use]
    pub fn edges(&self) -> &[([usize; 2], bool)] {
        &self.edges
    }

    /// Deflection achieved by the mesh.
    #[must_use]
    pub const fn deflection(&self) -> f64 {
        self.deflection
    }

    /// Whether triangles were flipped for a reversed face.
    #[must_use]
    pub const fn is_reversed(&self) -> bool {
        self.is_reversed
    }

    /// Sum of the 3D triangle areas.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.triangles
            .iter()
            .map(|&[a, b, c]| {
                let (pa, pb, pc) = (self.nodes[a], self.nodes[b], self.nodes[c]);
                0.5 * (pb - pa).cross(&(pc - pa)).norm()
            })
            .sum()
    }
}
