//! Mesh edges (links between two vertices).

use super::mesh_data::VertexKey;
use super::vertex::Movability;
use serde::{Deserialize, Serialize};

/// An undirected link with a reference direction `first -> last`.
///
/// Triangles reference edges together with an orientation bit telling
/// whether they traverse the edge along or against this direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshEdge {
    /// Start vertex of the reference direction.
    pub first: VertexKey,
    /// End vertex of the reference direction.
    pub last: VertexKey,
    /// Constraint tag; only `Free` edges may be flipped.
    pub movability: Movability,
}

impl MeshEdge {
    /// Creates an edge. Callers go through
    /// [`MeshData::add_edge`](crate::core::mesh_data::MeshData::add_edge), which
    /// rejects `first == last`.
    #[must_use]
    pub const fn new(first: VertexKey, last: VertexKey, movability: Movability) -> Self {
        Self {
            first,
            last,
            movability,
        }
    }

    /// Start vertex when traversed with the given orientation.
    #[inline]
    #[must_use]
    pub const fn start(&self, forward: bool) -> VertexKey {
        if forward { self.first } else { self.last }
    }

    /// End vertex when traversed with the given orientation.
    #[inline]
    #[must_use]
    pub const fn end(&self, forward: bool) -> VertexKey {
        if forward { self.last } else { self.first }
    }

    /// Whether `v` is one of the two endpoints.
    #[inline]
    #[must_use]
    pub fn has_vertex(&self, v: VertexKey) -> bool {
        self.first == v || self.last == v
    }

    /// The endpoint that is not `v`, if `v` is an endpoint.
    #[must_use]
    pub fn other(&self, v: VertexKey) -> Option<VertexKey> {
        if self.first == v {
            Some(self.last)
        } else if self.last == v {
            Some(self.first)
        } else {
            None
        }
    }

    /// Order-independent identity of the link.
    #[must_use]
    pub fn canonical(&self) -> (VertexKey, VertexKey) {
        canonical_pair(self.first, self.last)
    }

    /// `true` for boundary edges, which must survive into the final mesh.
    #[inline]
    #[must_use]
    pub fn is_frontier(&self) -> bool {
        self.movability == Movability::Frontier
    }
}

/// Sorted pair used to look links up regardless of direction.
#[inline]
#[must_use]
pub fn canonical_pair(a: VertexKey, b: VertexKey) -> (VertexKey, VertexKey) {
    if a <= b { (a, b) } else { (b, a) }
}
