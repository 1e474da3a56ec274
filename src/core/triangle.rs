//! Mesh triangles, stored as three oriented edges.

use super::mesh_data::EdgeKey;
use serde::{Deserialize, Serialize};

/// A triangle referencing its three edges.
///
/// Edge `i` is traversed `first -> last` when `orientations[i]` is `true`
/// and `last -> first` otherwise. Traversing the edges in order walks the
/// three corners counter-clockwise in parameter space; corner `i` is the
/// start of oriented edge `i`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshTriangle {
    /// The three edges in cyclic order.
    pub edges: [EdgeKey; 3],
    /// Traversal direction of each edge.
    pub orientations: [bool; 3],
    /// Set by quality control for triangles with (near) zero area.
    pub is_null: bool,
}

impl MeshTriangle {
    /// Creates a triangle; validity of the cycle is checked by
    /// [`MeshData::add_triangle`](crate::core::mesh_data::MeshData::add_triangle).
    #[must_use]
    pub const fn new(edges: [EdgeKey; 3], orientations: [bool; 3]) -> Self {
        Self {
            edges,
            orientations,
            is_null: false,
        }
    }

    /// Position of `edge` in the cycle.
    #[must_use]
    pub fn edge_index(&self, edge: EdgeKey) -> Option<usize> {
        self.edges.iter().position(|&e| e == edge)
    }

    /// Orientation bit of `edge`, if it belongs to the triangle.
    #[must_use]
    pub fn orientation_of(&self, edge: EdgeKey) -> Option<bool> {
        self.edge_index(edge).map(|i| self.orientations[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_edge_lookup() {
        let mut keys: SlotMap<EdgeKey, ()> = SlotMap::default();
        let e = [keys.insert(()), keys.insert(()), keys.insert(())];
        let other = keys.insert(());
        let t = MeshTriangle::new(e, [true, false, true]);
        assert_eq!(t.edge_index(e[1]), Some(1));
        assert_eq!(t.orientation_of(e[1]), Some(false));
        assert_eq!(t.orientation_of(other), None);
        assert!(!t.is_null);
    }
}
