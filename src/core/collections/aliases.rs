use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use smallvec::SmallVec;

#[cfg(not(feature = "dense-slotmap"))]
use slotmap::SlotMap;

#[cfg(feature = "dense-slotmap")]
use slotmap::DenseSlotMap;

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Arena backing the vertices, edges and triangles of a mesh.
///
/// - **default**: `DenseSlotMap` (the `dense-slotmap` feature)
/// - **--no-default-features**: `SlotMap`
///
/// Keys stay valid until their entry is removed, and a removed key never
/// resolves again, which is what the tombstoning contract of
/// [`MeshData`](crate::core::mesh_data::MeshData) relies on.
#[cfg(not(feature = "dense-slotmap"))]
pub type StorageMap<K, V> = SlotMap<K, V>;

/// Arena backing the vertices, edges and triangles of a mesh (`DenseSlotMap`).
#[cfg(feature = "dense-slotmap")]
pub type StorageMap<K, V> = DenseSlotMap<K, V>;

// =============================================================================
// HASHED COLLECTIONS
// =============================================================================

/// `HashMap` keyed with the non-cryptographic `FxHasher`.
///
/// Only ever used with internal keys (slot map keys, grid cells), never with
/// caller-controlled data.
///
/// # Examples
///
/// ```rust
/// use facemesh::core::collections::FastHashMap;
///
/// let mut map: FastHashMap<u64, usize> = FastHashMap::default();
/// map.insert(123, 456);
/// assert_eq!(map.get(&123), Some(&456));
/// ```
pub type FastHashMap<K, V> = FxHashMap<K, V>;

/// `HashSet` counterpart of [`FastHashMap`].
pub type FastHashSet<T> = FxHashSet<T>;

/// Small-optimized vector: inline storage for up to `N` elements, heap beyond.
///
/// # Size Guidelines
///
/// - **N=2**: triangles sharing an edge
/// - **N=3**: corners of a triangle
/// - **N=8**: typical vertex degree in a planar Delaunay mesh (average 6)
///
/// # Examples
///
/// ```rust
/// use facemesh::core::collections::SmallBuffer;
///
/// let mut buffer: SmallBuffer<i32, 8> = SmallBuffer::new();
/// buffer.extend(0..5);
/// assert!(!buffer.spilled());
/// ```
pub type SmallBuffer<T, const N: usize> = SmallVec<[T; N]>;

/// Inline capacity for the per-vertex edge lists.
pub const VERTEX_DEGREE_INLINE: usize = 8;

/// Creates a [`FastHashMap`] with pre-allocated capacity.
#[inline]
#[must_use]
pub fn fast_hash_map_with_capacity<K, V>(capacity: usize) -> FastHashMap<K, V> {
    FastHashMap::with_capacity_and_hasher(capacity, FxBuildHasher)
}

/// Creates a [`FastHashSet`] with pre-allocated capacity.
#[inline]
#[must_use]
pub fn fast_hash_set_with_capacity<T>(capacity: usize) -> FastHashSet<T> {
    FastHashSet::with_capacity_and_hasher(capacity, FxBuildHasher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_collections_basic_operations() {
        let mut map: FastHashMap<u64, usize> = fast_hash_map_with_capacity(4);
        assert!(map.is_empty());
        map.insert(7, 8);
        map.insert(9, 10);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&9), Some(&10));

        let mut set: FastHashSet<(u32, u32)> = fast_hash_set_with_capacity(4);
        assert!(set.insert((1, 2)));
        assert!(!set.insert((1, 2)));
        assert!(set.contains(&(1, 2)));
    }

    #[test]
    fn test_small_buffer_spills_past_inline_capacity() {
        let mut buffer: SmallBuffer<usize, 2> = SmallBuffer::new();
        buffer.push(0);
        buffer.push(1);
        assert!(!buffer.spilled());
        buffer.push(2);
        assert!(buffer.spilled());
        assert_eq!(buffer.as_slice(), &[0, 1, 2]);
    }
}
