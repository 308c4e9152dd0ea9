//! Spatial partitioning data structures
//!
//! Supporting structures for proximity queries and future visibility culling.

mod aabb;
mod octree;

pub use aabb::AABB;
pub use octree::{CellKey, Octree, OctreeConfig, MAX_SUPPORTED_DEPTH};
