//! Per-edge discretization cache shared by faces meshed concurrently.
//!
//! Two faces bordering the same edge must use the same discretization, or
//! the meshes would not match along it. The first face to ask for an edge
//! discretizes it under the edge's lock; the others wait on that lock and
//! then read the published polygon.
//!
//! # Examples
//!
//! ```rust
//! use facemesh::mesh::edge_discretizer::EdgePolygon;
//! use facemesh::mesh::face::ShapeId;
//! use facemesh::mesh::shared_edges::SharedEdgeProvider;
//!
//! let provider = SharedEdgeProvider::new();
//! let id = ShapeId::new();
//! let first = provider.get_or_discretize(id, || EdgePolygon { params: vec![0.0, 0.5, 1.0], deflection: 0.1 });
//! let second = provider.get_or_discretize(id, || unreachable!());
//! assert_eq!(first, second);
//! assert_eq!(provider.len(), 1);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;

use super::edge_discretizer::EdgePolygon;
use super::face::ShapeId;
use crate::core::collections::FastHashMap;

#[derive(Debug, Default)]
struct EdgeSlot {
    lock: Mutex<()>,
    polygon: ArcSwapOption<EdgePolygon>,
}

/// Map from edge identity to its lock and cached polygon.
///
/// Owned by the caller and handed to each face driver; nothing here is global.
#[derive(Debug, Default)]
pub struct SharedEdgeProvider {
    slots: Mutex<FastHashMap<ShapeId, Arc<EdgeSlot>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Discretization never leaves the map half-updated.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SharedEdgeProvider {
    /// Empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: ShapeId) -> Arc<EdgeSlot> {
        Arc::clone(lock(&self.slots).entry(id).or_default())
    }

    /// Cached polygon of `id`, without waiting.
    #[must_use]
    pub fn get(&self, id: ShapeId) -> Option<Arc<EdgePolygon>> {
        let slot = lock(&self.slots).get(&id).cloned()?;
        slot.polygon.load_full()
    }

    /// Cached polygon of `id`, running `discretize` if no face did yet.
    ///
    /// Exactly one caller runs `discretize` per edge; concurrent callers
    /// block until it finishes.
    pub fn get_or_discretize<F>(&self, id: ShapeId, discretize: F) -> Arc<EdgePolygon>
    where
        F: FnOnce() -> EdgePolygon,
    {
        let slot = self.slot(id);
        if let Some(polygon) = slot.polygon.load_full() {
            return polygon;
        }
        let _guard = lock(&slot.lock);
        if let Some(polygon) = slot.polygon.load_full() {
            return polygon;
        }
        let polygon = Arc::new(discretize());
        slot.polygon.store(Some(Arc::clone(&polygon)));
        tracing::trace!(edge = %id, points = polygon.params.len(), "shared edge discretized");
        polygon
    }

    /// Drops the cached polygon of `id` so the next face recomputes it.
    pub fn invalidate(&self, id: ShapeId) {
        if let Some(slot) = lock(&self.slots).get(&id) {
            let _guard = lock(&slot.lock);
            slot.polygon.store(None);
        }
    }

    /// Number of known edges.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Whether no edge is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every edge.
    pub fn clear(&self) {
        lock(&self.slots).clear();
    }
}
