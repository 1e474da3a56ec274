//! Index-based storage for the triangulation being built.
//!
//! [`MeshData`] owns three arenas (vertices, edges, triangles) addressed by
//! slot map keys, plus the adjacency needed by the Delaunay algorithms:
//!
//! - vertex -> incident edges
//! - edge -> bordering triangles (at most two)
//! - unordered vertex pair -> edge
//!
//! Removing an entry invalidates its key and nothing else, so callers may hold
//! keys across unrelated mutations. Contiguous numbering is only produced once,
//! by [`MeshData::compaction`], when the final triangulation is extracted.
//!
//! # Examples
//!
//! ```rust
//! use facemesh::core::mesh_data::MeshData;
//! use facemesh::core::vertex::{MeshVertex, Movability};
//! use nalgebra::{Point2, Point3};
//!
//! let mut mesh = MeshData::default();
//! let a = mesh.add_vertex(MeshVertex::new(Point2::new(0.0, 0.0), Point3::origin(), Movability::Free));
//! let b = mesh.add_vertex(MeshVertex::new(Point2::new(1.0, 0.0), Point3::origin(), Movability::Free));
//! let c = mesh.add_vertex(MeshVertex::new(Point2::new(0.0, 1.0), Point3::origin(), Movability::Free));
//!
//! let ab = mesh.add_edge(a, b, Movability::Free).unwrap();
//! let bc = mesh.add_edge(b, c, Movability::Free).unwrap();
//! let ca = mesh.add_edge(c, a, Movability::Free).unwrap();
//! let t = mesh.add_triangle([ab, bc, ca]).unwrap();
//!
//! assert_eq!(mesh.triangles_of(ab), &[t]);
//! assert_eq!(mesh.triangle_vertices(t).unwrap(), [a, b, c]);
//! ```

use super::collections::spatial_hash_grid::HashGridIndex;
use super::collections::{FastHashMap, SmallBuffer, StorageMap, VERTEX_DEGREE_INLINE};
use super::edge::{MeshEdge, canonical_pair};
use super::triangle::MeshTriangle;
use super::vertex::{MeshVertex, Movability};
use crate::geometry::predicates::orient2d;
use nalgebra::Point2;
use slotmap::{SecondaryMap, new_key_type};
use thiserror::Error;

new_key_type! {
    /// Key of a vertex in [`MeshData`].
    pub struct VertexKey;
}

new_key_type! {
    /// Key of an edge in [`MeshData`].
    pub struct EdgeKey;
}

new_key_type! {
    /// Key of a triangle in [`MeshData`].
    pub struct TriangleKey;
}

/// Triangles bordering one edge.
pub type EdgeTriangles = SmallBuffer<TriangleKey, 2>;

/// Edges incident to one vertex.
pub type VertexEdges = SmallBuffer<EdgeKey, VERTEX_DEGREE_INLINE>;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Structural violations of the mesh data structure.
///
/// These are internal-consistency defects, never the result of ordinary
/// numerical degeneracy; callers surface them instead of recovering.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MeshDataError {
    /// A vertex key does not resolve.
    #[error("Vertex {vertex:?} does not exist")]
    MissingVertex {
        /// The stale key.
        vertex: VertexKey,
    },
    /// An edge key does not resolve.
    #[error("Edge {edge:?} does not exist")]
    MissingEdge {
        /// The stale key.
        edge: EdgeKey,
    },
    /// A triangle key does not resolve.
    #[error("Triangle {triangle:?} does not exist")]
    MissingTriangle {
        /// The stale key.
        triangle: TriangleKey,
    },
    /// An edge was requested between a vertex and itself.
    #[error("Cannot create an edge from vertex {vertex:?} to itself")]
    DegenerateEdge {
        /// The repeated vertex.
        vertex: VertexKey,
    },
    /// Three edges that do not close a 3-cycle of vertices.
    #[error("Edges {edges:?} do not form a closed triangle")]
    NonCyclicTriangle {
        /// The offending edges.
        edges: [EdgeKey; 3],
    },
    /// An edge would border more than two triangles.
    #[error("Edge {edge:?} already borders {count} triangles")]
    NonManifoldEdge {
        /// The saturated edge.
        edge: EdgeKey,
        /// Number of triangles already attached.
        count: usize,
    },
    /// An edge cannot be removed while triangles still reference it.
    #[error("Edge {edge:?} is still used by {count} triangle(s)")]
    EdgeInUse {
        /// The edge.
        edge: EdgeKey,
        /// Number of referencing triangles.
        count: usize,
    },
    /// A vertex cannot be removed while edges still reference it.
    #[error("Vertex {vertex:?} is still used by {count} edge(s)")]
    VertexInUse {
        /// The vertex.
        vertex: VertexKey,
        /// Number of referencing edges.
        count: usize,
    },
    /// Adjacency information disagrees with the stored elements.
    #[error("Inconsistent data structure: {message}")]
    InconsistentDataStructure {
        /// Description of the inconsistency.
        message: String,
    },
}

// =============================================================================
// MESH DATA
// =============================================================================

/// Vertex, edge and triangle storage with adjacency.
#[derive(Clone, Debug)]
pub struct MeshData {
    vertices: StorageMap<VertexKey, MeshVertex>,
    edges: StorageMap<EdgeKey, MeshEdge>,
    triangles: StorageMap<TriangleKey, MeshTriangle>,
    vertex_edges: SecondaryMap<VertexKey, VertexEdges>,
    edge_triangles: SecondaryMap<EdgeKey, EdgeTriangles>,
    edge_lookup: FastHashMap<(VertexKey, VertexKey), EdgeKey>,
    grid: HashGridIndex<VertexKey>,
    cell_size: [f64; 2],
    tolerance: [f64; 2],
}

impl Default for MeshData {
    fn default() -> Self {
        Self::new([f64::EPSILON, f64::EPSILON], [0.1, 0.1])
    }
}

impl MeshData {
    /// Creates an empty structure.
    ///
    /// `tolerance` is the per-direction distance under which two vertices are
    /// considered coincident; `cell_size` sizes the spatial grid.
    #[must_use]
    pub fn new(tolerance: [f64; 2], cell_size: [f64; 2]) -> Self {
        Self {
            vertices: StorageMap::with_key(),
            edges: StorageMap::with_key(),
            triangles: StorageMap::with_key(),
            vertex_edges: SecondaryMap::new(),
            edge_triangles: SecondaryMap::new(),
            edge_lookup: FastHashMap::default(),
            grid: HashGridIndex::new(cell_size[0], cell_size[1]),
            cell_size,
            tolerance,
        }
    }

    /// Coincidence tolerance per parametric direction.
    #[must_use]
    pub const fn tolerance(&self) -> [f64; 2] {
        self.tolerance
    }

    // -------------------------------------------------------------------------
    // Vertices
    // -------------------------------------------------------------------------

    /// Adds a vertex unconditionally.
    pub fn add_vertex(&mut self, vertex: MeshVertex) -> VertexKey {
        let key = self.vertices.insert(vertex);
        self.vertex_edges.insert(key, VertexEdges::new());
        self.grid.insert(key, vertex.uv);
        key
    }

    /// Returns an existing vertex within tolerance of `uv`, if any.
    #[must_use]
    pub fn find_coincident_vertex(&self, uv: &Point2<f64>) -> Option<VertexKey> {
        let [tu, tv] = self.tolerance;
        if self.grid.is_usable() && tu <= self.cell_size[0] && tv <= self.cell_size[1] {
            return self.grid.find_coincident(uv, tu, tv);
        }
        self.vertices
            .iter()
            .find(|(_, v)| (v.uv.x - uv.x).abs() <= tu && (v.uv.y - uv.y).abs() <= tv)
            .map(|(k, _)| k)
    }

    /// A vertex near `uv`, used to seed point location. `None` when the
    /// neighbouring grid cells are empty.
    #[must_use]
    pub fn nearest_vertex(&self, uv: &Point2<f64>) -> Option<VertexKey> {
        self.grid.nearest(uv)
    }

    /// Adds `vertex` unless a vertex already sits within tolerance.
    ///
    /// Returns the key and whether a new vertex was created. When an existing
    /// vertex is reused its movability is raised to the stronger of the two.
    pub fn add_or_find_vertex(&mut self, vertex: MeshVertex) -> (VertexKey, bool) {
        if let Some(existing) = self.find_coincident_vertex(&vertex.uv) {
            if let Some(v) = self.vertices.get_mut(existing) {
                v.movability = v.movability.strongest(vertex.movability);
            }
            return (existing, false);
        }
        (self.add_vertex(vertex), true)
    }

    /// Vertex at `key`.
    #[must_use]
    pub fn vertex(&self, key: VertexKey) -> Option<&MeshVertex> {
        self.vertices.get(key)
    }

    /// Mutable vertex at `key`. Moving `uv` here bypasses the spatial grid;
    /// use [`MeshData::transform_uv`] for coordinate changes.
    pub fn vertex_mut(&mut self, key: VertexKey) -> Option<&mut MeshVertex> {
        self.vertices.get_mut(key)
    }

    /// Parametric position of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshDataError::MissingVertex`] for a stale key.
    pub fn uv(&self, key: VertexKey) -> Result<Point2<f64>, MeshDataError> {
        self.vertices
            .get(key)
            .map(|v| v.uv)
            .ok_or(MeshDataError::MissingVertex { vertex: key })
    }

    /// Removes an isolated vertex.
    ///
    /// # Errors
    ///
    /// Fails if the vertex does not exist or still has incident edges.
    pub fn remove_vertex(&mut self, key: VertexKey) -> Result<MeshVertex, MeshDataError> {
        let count = self.edges_of(key).len();
        if count > 0 {
            return Err(MeshDataError::VertexInUse { vertex: key, count });
        }
        let vertex = self
            .vertices
            .remove(key)
            .ok_or(MeshDataError::MissingVertex { vertex: key })?;
        self.vertex_edges.remove(key);
        self.grid.remove(key, vertex.uv);
        Ok(vertex)
    }

    /// Rewrites every parametric position and rebuilds the spatial grid.
    pub fn transform_uv<F>(&mut self, mut f: F, tolerance: [f64; 2], cell_size: [f64; 2])
    where
        F: FnMut(Point2<f64>) -> Point2<f64>,
    {
        self.grid = HashGridIndex::new(cell_size[0], cell_size[1]);
        self.cell_size = cell_size;
        self.tolerance = tolerance;
        for (key, vertex) in &mut self.vertices {
            vertex.uv = f(vertex.uv);
            self.grid.insert(key, vertex.uv);
        }
    }

    /// Number of live vertices.
    #[must_use]
    pub fn number_of_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Iterator over live vertices.
    pub fn vertices(&self) -> impl Iterator<Item = (VertexKey, &MeshVertex)> {
        self.vertices.iter()
    }

    /// Keys of live vertices, collected so the structure can be mutated while iterating.
    #[must_use]
    pub fn vertex_keys(&self) -> Vec<VertexKey> {
        self.vertices.keys().collect()
    }

    // -------------------------------------------------------------------------
    // Edges
    // -------------------------------------------------------------------------

    /// Adds the link `v1 -> v2`, or returns the existing link between them.
    ///
    /// An existing link keeps its reference direction; its movability is
    /// raised to the stronger of the stored and requested tags.
    ///
    /// # Errors
    ///
    /// Fails for `v1 == v2` and for stale vertex keys.
    pub fn add_edge(
        &mut self,
        v1: VertexKey,
        v2: VertexKey,
        movability: Movability,
    ) -> Result<EdgeKey, MeshDataError> {
        if v1 == v2 {
            return Err(MeshDataError::DegenerateEdge { vertex: v1 });
        }
        for v in [v1, v2] {
            if !self.vertices.contains_key(v) {
                return Err(MeshDataError::MissingVertex { vertex: v });
            }
        }
        let pair = canonical_pair(v1, v2);
        if let Some(&existing) = self.edge_lookup.get(&pair) {
            if let Some(edge) = self.edges.get_mut(existing) {
                edge.movability = edge.movability.strongest(movability);
            }
            return Ok(existing);
        }
        let key = self.edges.insert(MeshEdge::new(v1, v2, movability));
        self.edge_triangles.insert(key, EdgeTriangles::new());
        self.edge_lookup.insert(pair, key);
        for v in [v1, v2] {
            if let Some(list) = self.vertex_edges.get_mut(v) {
                list.push(key);
            }
        }
        Ok(key)
    }

    /// Link between `a` and `b` in either direction.
    #[must_use]
    pub fn find_edge(&self, a: VertexKey, b: VertexKey) -> Option<EdgeKey> {
        self.edge_lookup.get(&canonical_pair(a, b)).copied()
    }

    /// Edge at `key`.
    #[must_use]
    pub fn edge(&self, key: EdgeKey) -> Option<&MeshEdge> {
        self.edges.get(key)
    }

    /// Edge at `key`, as a result.
    ///
    /// # Errors
    ///
    /// Returns [`MeshDataError::MissingEdge`] for a stale key.
    pub fn get_edge(&self, key: EdgeKey) -> Result<&MeshEdge, MeshDataError> {
        self.edges
            .get(key)
            .ok_or(MeshDataError::MissingEdge { edge: key })
    }

    /// Overrides the movability of an edge.
    ///
    /// # Errors
    ///
    /// Returns [`MeshDataError::MissingEdge`] for a stale key.
    pub fn set_edge_movability(
        &mut self,
        key: EdgeKey,
        movability: Movability,
    ) -> Result<(), MeshDataError> {
        let edge = self
            .edges
            .get_mut(key)
            .ok_or(MeshDataError::MissingEdge { edge: key })?;
        edge.movability = movability;
        Ok(())
    }

    /// Removes an edge that no triangle references.
    ///
    /// # Errors
    ///
    /// Fails if the edge does not exist or still borders a triangle.
    pub fn remove_edge(&mut self, key: EdgeKey) -> Result<MeshEdge, MeshDataError> {
        let count = self.triangles_of(key).len();
        if count > 0 {
            return Err(MeshDataError::EdgeInUse { edge: key, count });
        }
        let edge = self
            .edges
            .remove(key)
            .ok_or(MeshDataError::MissingEdge { edge: key })?;
        self.edge_triangles.remove(key);
        self.edge_lookup.remove(&edge.canonical());
        for v in [edge.first, edge.last] {
            if let Some(list) = self.vertex_edges.get_mut(v) {
                list.retain(|e| *e != key);
            }
        }
        Ok(edge)
    }

    /// Edges incident to `vertex` (empty for a stale key).
    #[must_use]
    pub fn edges_of(&self, vertex: VertexKey) -> &[EdgeKey] {
        self.vertex_edges.get(vertex).map(|list| list.as_slice()).unwrap_or_default()
    }

    /// Triangles bordering `edge`: zero, one or two.
    #[must_use]
    pub fn triangles_of(&self, edge: EdgeKey) -> &[TriangleKey] {
        self.edge_triangles.get(edge).map(|list| list.as_slice()).unwrap_or_default()
    }

    /// The triangle across `edge` from `triangle`.
    #[must_use]
    pub fn other_triangle(&self, edge: EdgeKey, triangle: TriangleKey) -> Option<TriangleKey> {
        self.triangles_of(edge).iter().copied().find(|&t| t != triangle)
    }

    /// Number of live edges.
    #[must_use]
    pub fn number_of_edges(&self) -> usize {
        self.edges.len()
    }

    /// Iterator over live edges.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeKey, &MeshEdge)> {
        self.edges.iter()
    }

    /// Keys of live edges.
    #[must_use]
    pub fn edge_keys(&self) -> Vec<EdgeKey> {
        self.edges.keys().collect()
    }

    // -------------------------------------------------------------------------
    // Triangles
    // -------------------------------------------------------------------------

    /// Adds a triangle bounded by three existing edges.
    ///
    /// The edges may be given in any order and direction as long as they close
    /// a cycle over three distinct vertices. The stored cycle is arranged so
    /// that its corners run counter-clockwise in parameter space.
    ///
    /// # Errors
    ///
    /// - [`MeshDataError::MissingEdge`] for stale keys
    /// - [`MeshDataError::NonCyclicTriangle`] if the edges do not close a 3-cycle
    /// - [`MeshDataError::NonManifoldEdge`] if an edge already borders two triangles
    pub fn add_triangle(&mut self, edges: [EdgeKey; 3]) -> Result<TriangleKey, MeshDataError> {
        let non_cyclic = MeshDataError::NonCyclicTriangle { edges };
        if edges[0] == edges[1] || edges[1] == edges[2] || edges[0] == edges[2] {
            return Err(non_cyclic);
        }
        let e0 = *self.get_edge(edges[0])?;
        let e1 = *self.get_edge(edges[1])?;
        let e2 = *self.get_edge(edges[2])?;

        let (a, b) = (e0.first, e0.last);
        // Pick whichever remaining edge continues from `b`.
        let (next_key, next, close_key, close) = if e1.has_vertex(b) {
            (edges[1], e1, edges[2], e2)
        } else if e2.has_vertex(b) {
            (edges[2], e2, edges[1], e1)
        } else {
            return Err(non_cyclic);
        };
        let next_forward = next.first == b;
        let c = next.end(next_forward);
        if c == a || c == b {
            return Err(non_cyclic);
        }
        let close_forward = if close.first == c && close.last == a {
            true
        } else if close.last == c && close.first == a {
            false
        } else {
            return Err(non_cyclic);
        };

        for key in edges {
            let count = self.triangles_of(key).len();
            if count >= 2 {
                return Err(MeshDataError::NonManifoldEdge { edge: key, count });
            }
        }

        let area = orient2d(&self.uv(a)?, &self.uv(b)?, &self.uv(c)?);
        let triangle = if area < 0.0 {
            MeshTriangle::new(
                [edges[0], close_key, next_key],
                [false, !close_forward, !next_forward],
            )
        } else {
            MeshTriangle::new(
                [edges[0], next_key, close_key],
                [true, next_forward, close_forward],
            )
        };

        let key = self.triangles.insert(triangle);
        for e in edges {
            if let Some(list) = self.edge_triangles.get_mut(e) {
                list.push(key);
            }
        }
        Ok(key)
    }

    /// Triangle at `key`.
    #[must_use]
    pub fn triangle(&self, key: TriangleKey) -> Option<&MeshTriangle> {
        self.triangles.get(key)
    }

    /// Triangle at `key`, as a result.
    ///
    /// # Errors
    ///
    /// Returns [`MeshDataError::MissingTriangle`] for a stale key.
    pub fn get_triangle(&self, key: TriangleKey) -> Result<&MeshTriangle, MeshDataError> {
        self.triangles
            .get(key)
            .ok_or(MeshDataError::MissingTriangle { triangle: key })
    }

    /// Flags or clears the null marker of a triangle.
    ///
    /// # Errors
    ///
    /// Returns [`MeshDataError::MissingTriangle`] for a stale key.
    pub fn set_null(&mut self, key: TriangleKey, is_null: bool) -> Result<(), MeshDataError> {
        let triangle = self
            .triangles
            .get_mut(key)
            .ok_or(MeshDataError::MissingTriangle { triangle: key })?;
        triangle.is_null = is_null;
        Ok(())
    }

    /// Removes a triangle, leaving its edges in place.
    ///
    /// # Errors
    ///
    /// Returns [`MeshDataError::MissingTriangle`] for a stale key.
    pub fn remove_triangle(&mut self, key: TriangleKey) -> Result<MeshTriangle, MeshDataError> {
        let triangle = self
            .triangles
            .remove(key)
            .ok_or(MeshDataError::MissingTriangle { triangle: key })?;
        for e in triangle.edges {
            if let Some(list) = self.edge_triangles.get_mut(e) {
                list.retain(|t| *t != key);
            }
        }
        Ok(triangle)
    }

    /// Corners of `key` in counter-clockwise order.
    ///
    /// # Errors
    ///
    /// Fails for a stale triangle or edge key.
    pub fn triangle_vertices(&self, key: TriangleKey) -> Result<[VertexKey; 3], MeshDataError> {
        let triangle = self.get_triangle(key)?;
        let mut corners = [VertexKey::default(); 3];
        for (i, corner) in corners.iter_mut().enumerate() {
            *corner = self
                .get_edge(triangle.edges[i])?
                .start(triangle.orientations[i]);
        }
        Ok(corners)
    }

    /// Parametric positions of the corners of `key`.
    ///
    /// # Errors
    ///
    /// Fails for stale keys.
    pub fn triangle_uv(&self, key: TriangleKey) -> Result<[Point2<f64>; 3], MeshDataError> {
        let [a, b, c] = self.triangle_vertices(key)?;
        Ok([self.uv(a)?, self.uv(b)?, self.uv(c)?])
    }

    /// Corner of `triangle` not on `edge`.
    ///
    /// # Errors
    ///
    /// Fails if the edge does not belong to the triangle.
    pub fn opposite_vertex(
        &self,
        triangle: TriangleKey,
        edge: EdgeKey,
    ) -> Result<VertexKey, MeshDataError> {
        let e = self.get_edge(edge)?;
        self.triangle_vertices(triangle)?
            .into_iter()
            .find(|v| !e.has_vertex(*v))
            .ok_or_else(|| MeshDataError::InconsistentDataStructure {
                message: format!("edge {edge:?} is not a side of triangle {triangle:?}"),
            })
    }

    /// Distinct triangles having `vertex` as a corner.
    #[must_use]
    pub fn triangles_around(&self, vertex: VertexKey) -> SmallBuffer<TriangleKey, 8> {
        let mut out: SmallBuffer<TriangleKey, 8> = SmallBuffer::new();
        for &e in self.edges_of(vertex) {
            for &t in self.triangles_of(e) {
                if !out.contains(&t) {
                    out.push(t);
                }
            }
        }
        out
    }

    /// Number of live triangles.
    #[must_use]
    pub fn number_of_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// Iterator over live triangles.
    pub fn triangles(&self) -> impl Iterator<Item = (TriangleKey, &MeshTriangle)> {
        self.triangles.iter()
    }

    /// Keys of live triangles.
    #[must_use]
    pub fn triangle_keys(&self) -> Vec<TriangleKey> {
        self.triangles.keys().collect()
    }

    // -------------------------------------------------------------------------
    // Compaction
    // -------------------------------------------------------------------------

    /// Contiguous numbering of the vertices referenced by at least one triangle.
    ///
    /// Indices follow storage iteration order, so the numbering is
    /// reproducible for a fixed sequence of operations.
    #[must_use]
    pub fn compaction(&self) -> Compaction {
        let mut index = SecondaryMap::new();
        let mut order = Vec::new();
        for (key, _) in &self.vertices {
            let used = self
                .edges_of(key)
                .iter()
                .any(|&e| !self.triangles_of(e).is_empty());
            if used {
                index.insert(key, order.len());
                order.push(key);
            }
        }
        Compaction { order, index }
    }
}

/// Result of [`MeshData::compaction`].
#[derive(Clone, Debug, Default)]
pub struct Compaction {
    order: Vec<VertexKey>,
    index: SecondaryMap<VertexKey, usize>,
}

impl Compaction {
    /// Vertex keys in output order.
    #[must_use]
    pub fn order(&self) -> &[VertexKey] {
        &self.order
    }

    /// Output index of `key`, if the vertex survives compaction.
    #[must_use]
    pub fn index_of(&self, key: VertexKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Number of surviving vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no vertex survived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn free(mesh: &mut MeshData, u: f64, v: f64) -> VertexKey {
        mesh.add_vertex(MeshVertex::new(Point2::new(u, v), Point3::origin(), Movability::Free))
    }

    #[test]
    fn test_add_edge_rejects_self_loop_and_reuses_links() {
        let mut mesh = MeshData::default();
        let a = free(&mut mesh, 0.0, 0.0);
        let b = free(&mut mesh, 1.0, 0.0);

        assert_eq!(
            mesh.add_edge(a, a, Movability::Free),
            Err(MeshDataError::DegenerateEdge { vertex: a })
        );
        let ab = mesh.add_edge(a, b, Movability::Free).unwrap();
        let ba = mesh.add_edge(b, a, Movability::Frontier).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(mesh.number_of_edges(), 1);
        // Reference direction is kept, movability upgraded.
        let edge = mesh.edge(ab).unwrap();
        assert_eq!((edge.first, edge.last), (a, b));
        assert_eq!(edge.movability, Movability::Frontier);
        assert_eq!(mesh.edges_of(a), &[ab]);
    }

    #[test]
    fn test_add_triangle_orders_corners_counter_clockwise() {
        let mut mesh = MeshData::default();
        let a = free(&mut mesh, 0.0, 0.0);
        let b = free(&mut mesh, 1.0, 0.0);
        let c = free(&mut mesh, 0.0, 1.0);
        // Clockwise input cycle a -> c -> b.
        let ac = mesh.add_edge(a, c, Movability::Free).unwrap();
        let cb = mesh.add_edge(c, b, Movability::Free).unwrap();
        let ba = mesh.add_edge(b, a, Movability::Free).unwrap();
        let t = mesh.add_triangle([ac, cb, ba]).unwrap();

        let [p, q, r] = mesh.triangle_uv(t).unwrap();
        assert!(orient2d(&p, &q, &r) > 0.0);
        let corners = mesh.triangle_vertices(t).unwrap();
        assert!(corners.contains(&a) && corners.contains(&b) && corners.contains(&c));
        assert_eq!(mesh.opposite_vertex(t, ba).unwrap(), c);
    }

    #[test]
    fn test_add_triangle_rejects_open_cycle() {
        let mut mesh = MeshData::default();
        let a = free(&mut mesh, 0.0, 0.0);
        let b = free(&mut mesh, 1.0, 0.0);
        let c = free(&mut mesh, 0.0, 1.0);
        let d = free(&mut mesh, 1.0, 1.0);
        let ab = mesh.add_edge(a, b, Movability::Free).unwrap();
        let bc = mesh.add_edge(b, c, Movability::Free).unwrap();
        let cd = mesh.add_edge(c, d, Movability::Free).unwrap();
        assert!(matches!(
            mesh.add_triangle([ab, bc, cd]),
            Err(MeshDataError::NonCyclicTriangle { .. })
        ));
        assert!(matches!(
            mesh.add_triangle([ab, ab, bc]),
            Err(MeshDataError::NonCyclicTriangle { .. })
        ));
    }

    #[test]
    fn test_third_triangle_on_edge_is_a_consistency_error() {
        let mut mesh = MeshData::default();
        let a = free(&mut mesh, 0.0, 0.0);
        let b = free(&mut mesh, 1.0, 0.0);
        let tops = [(0.5, 1.0), (0.5, -1.0), (0.5, 2.0)];
        let ab = mesh.add_edge(a, b, Movability::Free).unwrap();
        let mut results = Vec::new();
        for (u, v) in tops {
            let c = free(&mut mesh, u, v);
            let bc = mesh.add_edge(b, c, Movability::Free).unwrap();
            let ca = mesh.add_edge(c, a, Movability::Free).unwrap();
            results.push(mesh.add_triangle([ab, bc, ca]));
        }
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert_eq!(
            results[2],
            Err(MeshDataError::NonManifoldEdge { edge: ab, count: 2 })
        );
    }

    #[test]
    fn test_removal_keeps_other_keys_valid_and_compaction_renumbers() {
        let mut mesh = MeshData::default();
        let a = free(&mut mesh, 0.0, 0.0);
        let b = free(&mut mesh, 1.0, 0.0);
        let c = free(&mut mesh, 0.0, 1.0);
        let d = free(&mut mesh, 1.0, 1.0);
        let ab = mesh.add_edge(a, b, Movability::Free).unwrap();
        let bd = mesh.add_edge(b, d, Movability::Free).unwrap();
        let da = mesh.add_edge(d, a, Movability::Free).unwrap();
        let dc = mesh.add_edge(d, c, Movability::Free).unwrap();
        let ca = mesh.add_edge(c, a, Movability::Free).unwrap();
        let t1 = mesh.add_triangle([ab, bd, da]).unwrap();
        let t2 = mesh.add_triangle([da, dc, ca]).unwrap();
        assert_eq!(mesh.triangles_of(da).len(), 2);
        assert_eq!(mesh.other_triangle(da, t1), Some(t2));

        assert!(matches!(mesh.remove_edge(da), Err(MeshDataError::EdgeInUse { count: 2, .. })));
        mesh.remove_triangle(t1).unwrap();
        assert!(mesh.triangle(t1).is_none());
        assert!(mesh.triangle(t2).is_some());
        assert_eq!(mesh.triangles_of(da), &[t2]);

        mesh.remove_edge(ab).unwrap();
        mesh.remove_edge(bd).unwrap();
        assert!(matches!(mesh.remove_vertex(a), Err(MeshDataError::VertexInUse { .. })));
        mesh.remove_vertex(b).unwrap();
        assert!(mesh.vertex(b).is_none());

        let compaction = mesh.compaction();
        assert_eq!(compaction.len(), 3);
        assert!(compaction.index_of(b).is_none());
        let mut indices: Vec<usize> = [a, c, d]
            .iter()
            .map(|&v| compaction.index_of(v).unwrap())
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_coincident_vertices_are_merged() {
        let mut mesh = MeshData::new([1e-6, 1e-6], [1e-3, 1e-3]);
        let (a, created) = mesh.add_or_find_vertex(MeshVertex::new(
            Point2::new(0.5, 0.5),
            Point3::origin(),
            Movability::Free,
        ));
        assert!(created);
        let (b, created) = mesh.add_or_find_vertex(MeshVertex::new(
            Point2::new(0.5 + 1e-7, 0.5),
            Point3::origin(),
            Movability::Frontier,
        ));
        assert!(!created);
        assert_eq!(a, b);
        assert_eq!(mesh.vertex(a).unwrap().movability, Movability::Frontier);

        mesh.transform_uv(|p| Point2::new(p.x * 2.0, p.y), [1e-6, 1e-6], [1e-3, 1e-3]);
        assert_eq!(mesh.uv(a).unwrap(), Point2::new(1.0, 0.5));
        assert_eq!(mesh.find_coincident_vertex(&Point2::new(1.0, 0.5)), Some(a));
    }
}
