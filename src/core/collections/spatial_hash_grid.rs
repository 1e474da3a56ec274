//! Spatial hash grid over the (normalized) parameter plane.
//!
//! The grid serves two purposes during meshing:
//! - near-duplicate detection when a node is registered, using the working
//!   UV tolerance
//! - a starting hint for point location, by looking up an already inserted
//!   vertex close to the query
//!
//! Cells are anisotropic: the U and V cell sizes are set independently, the
//! same way the UV tolerances are.

use super::{FastHashMap, SmallBuffer};
use nalgebra::Point2;

const BUCKET_INLINE_CAPACITY: usize = 8;

/// Beyond 2^52 a floored cell coordinate loses unit resolution.
const CELL_LIMIT: f64 = 4_503_599_627_370_496.0;

type GridKey = (i64, i64);

/// A hash grid mapping integer cells to the keys stored in them.
#[derive(Clone, Debug)]
pub(crate) struct HashGridIndex<K> {
    cell_size: [f64; 2],
    usable: bool,
    cells: FastHashMap<GridKey, SmallBuffer<(K, Point2<f64>), BUCKET_INLINE_CAPACITY>>,
}

impl<K> HashGridIndex<K>
where
    K: Copy + PartialEq,
{
    /// Create a grid with the given U and V cell sizes.
    ///
    /// A non-finite or non-positive size yields an unusable grid; every query
    /// then reports `false` so callers fall back to a linear scan.
    pub(crate) fn new(cell_u: f64, cell_v: f64) -> Self {
        let usable = cell_u.is_finite() && cell_v.is_finite() && cell_u > 0.0 && cell_v > 0.0;
        Self {
            cell_size: [cell_u, cell_v],
            usable,
            cells: FastHashMap::default(),
        }
    }

    pub(crate) const fn is_usable(&self) -> bool {
        self.usable
    }

    /// Register `key` at `uv`. Points that cannot be keyed disable the grid.
    pub(crate) fn insert(&mut self, key: K, uv: Point2<f64>) {
        let Some(cell) = self.key_for(&uv) else {
            self.usable = false;
            return;
        };
        self.cells.entry(cell).or_default().push((key, uv));
    }

    /// Forget `key` previously registered at `uv`.
    pub(crate) fn remove(&mut self, key: K, uv: Point2<f64>) {
        let Some(cell) = self.key_for(&uv) else {
            return;
        };
        if let Some(bucket) = self.cells.get_mut(&cell) {
            bucket.retain(|(k, _)| *k != key);
            if bucket.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    /// Visit every entry in the 3x3 cell neighbourhood around `uv`.
    ///
    /// The visitor returns `false` to stop early. Returns `false` if the grid
    /// could not answer the query.
    pub(crate) fn for_each_candidate<F>(&self, uv: &Point2<f64>, mut f: F) -> bool
    where
        F: FnMut(K, &Point2<f64>) -> bool,
    {
        let Some((cu, cv)) = self.key_for(uv) else {
            return false;
        };
        for du in -1..=1 {
            for dv in -1..=1 {
                if let Some(bucket) = self.cells.get(&(cu + du, cv + dv)) {
                    for (key, point) in bucket {
                        if !f(*key, point) {
                            return true;
                        }
                    }
                }
            }
        }
        true
    }

    /// First stored key within `tol_u`/`tol_v` of `uv` (box test).
    pub(crate) fn find_coincident(&self, uv: &Point2<f64>, tol_u: f64, tol_v: f64) -> Option<K> {
        let mut found = None;
        self.for_each_candidate(uv, |key, point| {
            if (point.x - uv.x).abs() <= tol_u && (point.y - uv.y).abs() <= tol_v {
                found = Some(key);
                return false;
            }
            true
        });
        found
    }

    /// Closest stored key to `uv` within the 3x3 neighbourhood.
    pub(crate) fn nearest(&self, uv: &Point2<f64>) -> Option<K> {
        let mut best: Option<(K, f64)> = None;
        self.for_each_candidate(uv, |key, point| {
            let d2 = (point - uv).norm_squared();
            if best.is_none_or(|(_, b)| d2 < b) {
                best = Some((key, d2));
            }
            true
        });
        best.map(|(key, _)| key)
    }

    fn key_for(&self, uv: &Point2<f64>) -> Option<GridKey> {
        if !self.usable {
            return None;
        }
        let cu = (uv.x / self.cell_size[0]).floor();
        let cv = (uv.y / self.cell_size[1]).floor();
        if !cu.is_finite() || !cv.is_finite() || cu.abs() >= CELL_LIMIT || cv.abs() >= CELL_LIMIT {
            return None;
        }
        Some((cu as i64, cv as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_cover_neighbouring_cells() {
        let mut grid: HashGridIndex<u32> = HashGridIndex::new(1.0, 1.0);
        grid.insert(1, Point2::new(0.2, 0.2));
        grid.insert(2, Point2::new(-0.2, 0.2));
        grid.insert(3, Point2::new(5.0, 5.0));

        let mut found = Vec::new();
        let used = grid.for_each_candidate(&Point2::new(0.9, 0.1), |k, _| {
            found.push(k);
            true
        });
        assert!(used);
        found.sort_unstable();
        assert_eq!(found, vec![1, 2]);
    }

    #[test]
    fn test_find_coincident_uses_anisotropic_tolerance() {
        let mut grid: HashGridIndex<u32> = HashGridIndex::new(0.1, 10.0);
        grid.insert(7, Point2::new(1.0, 1.0));
        assert_eq!(grid.find_coincident(&Point2::new(1.001, 1.5), 0.01, 1.0), Some(7));
        assert_eq!(grid.find_coincident(&Point2::new(1.05, 1.0), 0.01, 1.0), None);
    }

    #[test]
    fn test_remove_and_nearest() {
        let mut grid: HashGridIndex<u32> = HashGridIndex::new(1.0, 1.0);
        grid.insert(1, Point2::new(0.1, 0.1));
        grid.insert(2, Point2::new(0.6, 0.6));
        assert_eq!(grid.nearest(&Point2::new(0.5, 0.5)), Some(2));
        grid.remove(2, Point2::new(0.6, 0.6));
        assert_eq!(grid.nearest(&Point2::new(0.5, 0.5)), Some(1));
    }

    #[test]
    fn test_unusable_grid_reports_unanswered_queries() {
        let grid: HashGridIndex<u32> = HashGridIndex::new(0.0, 1.0);
        assert!(!grid.is_usable());
        assert!(!grid.for_each_candidate(&Point2::new(0.0, 0.0), |_, _| true));
    }
}
