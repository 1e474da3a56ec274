//! Collection types used throughout the mesh data structure.
//!
//! All internal maps hash with `rustc_hash`, small adjacency lists live inline
//! in [`SmallBuffer`], and arena storage goes through [`StorageMap`] so that the
//! slot map flavour can be switched with a cargo feature.

mod aliases;
pub(crate) mod spatial_hash_grid;

pub use aliases::*;
