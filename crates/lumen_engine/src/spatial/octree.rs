//! Loose octree over a hash map
//!
//! Cells are addressed by `(depth, x, y, z)` and only materialized when they
//! hold something, so the tree is as sparse as the scene. A cell splits into
//! eight children once it holds more than `cell_capacity` objects and folds
//! its subtree back when the subtree population drops to `merge_threshold`.
//!
//! Cells are loose: an object is filed by its center, and a cell accepts it
//! only if the object's radius is at most half the cell size. Queries pad
//! their search range by that half size, so every object whose sphere touches
//! the query volume is found. Positions outside the world bounds are filed in
//! the nearest border cell.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Serialize, Deserialize};

use super::AABB;
use crate::foundation::math::Vec3;

/// Deepest level the integer cell coordinates can address
pub const MAX_SUPPORTED_DEPTH: u32 = 20;

/// Configuration for octree behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OctreeConfig {
    /// Center of the indexed world volume
    pub world_center: [f32; 3],
    /// Half edge length of the (cubic) indexed world volume
    pub world_half_size: f32,
    /// Depth of the coarsest cells; queries start here
    pub min_depth: u32,
    /// Depth cells never split beyond
    pub max_depth: u32,
    /// Objects a cell holds before splitting
    pub cell_capacity: usize,
    /// Subtree population at or below which children merge back
    pub merge_threshold: usize,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            world_center: [0.0, 0.0, 0.0],
            world_half_size: 512.0,
            min_depth: 2,
            max_depth: 8,
            cell_capacity: 8,
            merge_threshold: 4,
        }
    }
}

/// Address of one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub depth: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl CellKey {
    fn parent(&self) -> CellKey {
        CellKey {
            depth: self.depth - 1,
            x: self.x >> 1,
            y: self.y >> 1,
            z: self.z >> 1,
        }
    }

    fn child(&self, octant: u32) -> CellKey {
        CellKey {
            depth: self.depth + 1,
            x: (self.x << 1) | (octant & 1),
            y: (self.y << 1) | ((octant >> 1) & 1),
            z: (self.z << 1) | ((octant >> 2) & 1),
        }
    }
}

#[derive(Debug)]
struct Cell<T> {
    items: Vec<T>,
    subdivided: bool,
    /// Objects in this cell and all of its descendants
    population: usize,
}

impl<T> Default for Cell<T> {
    fn default() -> Self {
        Self { items: Vec::new(), subdivided: false, population: 0 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    position: Vec3,
    radius: f32,
    /// `None` for objects too large for even the coarsest cells
    cell: Option<CellKey>,
}

/// Sparse loose octree indexing values of `T` by position and radius
#[derive(Debug)]
pub struct Octree<T> {
    config: OctreeConfig,
    bounds: AABB,
    cells: HashMap<CellKey, Cell<T>>,
    placements: HashMap<T, Placement>,
    oversized: Vec<T>,
}

impl<T: Copy + Eq + Hash> Octree<T> {
    pub fn new(mut config: OctreeConfig) -> Self {
        if config.max_depth > MAX_SUPPORTED_DEPTH {
            log::warn!(
                "Octree max depth {} exceeds supported {}, clamping",
                config.max_depth, MAX_SUPPORTED_DEPTH
            );
            config.max_depth = MAX_SUPPORTED_DEPTH;
        }
        config.min_depth = config.min_depth.min(config.max_depth);
        config.cell_capacity = config.cell_capacity.max(1);
        config.merge_threshold = config.merge_threshold.min(config.cell_capacity);

        let center = Vec3::from(config.world_center);
        let half = config.world_half_size.max(f32::EPSILON);
        Self {
            bounds: AABB::from_center_extents(center, Vec3::repeat(half)),
            config,
            cells: HashMap::new(),
            placements: HashMap::new(),
            oversized: Vec::new(),
        }
    }

    pub fn config(&self) -> &OctreeConfig {
        &self.config
    }

    pub fn bounds(&self) -> &AABB {
        &self.bounds
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn contains(&self, value: &T) -> bool {
        self.placements.contains_key(value)
    }

    /// Registered position of a value
    pub fn position(&self, value: &T) -> Option<Vec3> {
        self.placements.get(value).map(|p| p.position)
    }

    /// Number of materialized cells
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Deepest level currently holding a cell
    pub fn max_depth_in_use(&self) -> u32 {
        self.cells.keys().map(|k| k.depth).max().unwrap_or(self.config.min_depth)
    }

    /// Key of the cell currently holding `value`
    pub fn cell_of(&self, value: &T) -> Option<CellKey> {
        self.placements.get(value).and_then(|p| p.cell)
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.placements.clear();
        self.oversized.clear();
    }

    /// Insert a value. Returns false if it is already present.
    pub fn insert(&mut self, value: T, position: Vec3, radius: f32) -> bool {
        if self.placements.contains_key(&value) {
            return false;
        }
        let radius = radius.max(0.0);
        self.placements.insert(value, Placement { position, radius, cell: None });
        self.place(value);
        true
    }

    /// Remove a value, returning its registered position
    pub fn remove(&mut self, value: &T) -> Option<Vec3> {
        let placement = self.placements.remove(value)?;
        match placement.cell {
            None => self.oversized.retain(|v| v != value),
            Some(key) => {
                if let Some(cell) = self.cells.get_mut(&key) {
                    cell.items.retain(|v| v != value);
                }
                self.release_path(key);
            }
        }
        Some(placement.position)
    }

    /// Move a value to a new position. Returns false if it is not present.
    pub fn update(&mut self, value: T, position: Vec3) -> bool {
        let Some(placement) = self.placements.get(&value).copied() else {
            return false;
        };
        if let Some(key) = placement.cell {
            if self.key_for(position, key.depth) == key {
                if let Some(p) = self.placements.get_mut(&value) {
                    p.position = position;
                }
                return true;
            }
        }
        self.remove(&value);
        self.insert(value, position, placement.radius)
    }

    /// Values whose sphere contains `point`
    pub fn query_point(&self, point: Vec3) -> Vec<T> {
        self.query_aabb(&AABB::from_point(point))
    }

    /// Values whose sphere overlaps `volume`
    pub fn query_aabb(&self, volume: &AABB) -> Vec<T> {
        let mut results = Vec::new();
        self.collect(volume, |p| volume.intersects_sphere(p.position, p.radius), &mut results);
        results
    }

    /// Values whose sphere overlaps the sphere at `center` with `radius`
    pub fn query_radius(&self, center: Vec3, radius: f32) -> Vec<T> {
        let volume = AABB::from_center_extents(center, Vec3::repeat(radius.max(0.0)));
        let mut results = Vec::new();
        self.collect(
            &volume,
            |p| {
                let reach = radius + p.radius;
                (p.position - center).norm_squared() <= reach * reach
            },
            &mut results,
        );
        results
    }

    fn cells_per_axis(depth: u32) -> u32 {
        1u32 << depth
    }

    fn cell_size(&self, depth: u32) -> f32 {
        (self.bounds.max.x - self.bounds.min.x) / Self::cells_per_axis(depth) as f32
    }

    fn fits(&self, radius: f32, depth: u32) -> bool {
        radius <= self.cell_size(depth) * 0.5
    }

    fn coords(&self, point: Vec3, depth: u32) -> [u32; 3] {
        let size = self.cell_size(depth);
        let last = (Self::cells_per_axis(depth) - 1) as f32;
        let mut out = [0u32; 3];
        for (axis, slot) in out.iter_mut().enumerate() {
            let cell = ((point[axis] - self.bounds.min[axis]) / size).floor();
            *slot = cell.clamp(0.0, last) as u32;
        }
        out
    }

    fn key_for(&self, point: Vec3, depth: u32) -> CellKey {
        let [x, y, z] = self.coords(point, depth);
        CellKey { depth, x, y, z }
    }

    /// Inclusive coordinate range of cells at `depth` whose loose bounds touch `volume`
    fn key_range(&self, volume: &AABB, depth: u32) -> ([u32; 3], [u32; 3]) {
        let padded = volume.expanded(self.cell_size(depth) * 0.5);
        (self.coords(padded.min, depth), self.coords(padded.max, depth))
    }

    fn in_range(key: &CellKey, range: &([u32; 3], [u32; 3])) -> bool {
        let (lo, hi) = range;
        key.x >= lo[0] && key.x <= hi[0] &&
        key.y >= lo[1] && key.y <= hi[1] &&
        key.z >= lo[2] && key.z <= hi[2]
    }

    fn set_cell(&mut self, value: &T, key: Option<CellKey>) {
        if let Some(p) = self.placements.get_mut(value) {
            p.cell = key;
        }
    }

    fn place(&mut self, value: T) {
        let Some(placement) = self.placements.get(&value).copied() else {
            return;
        };
        if !self.fits(placement.radius, self.config.min_depth) {
            self.oversized.push(value);
            return;
        }

        let mut depth = self.config.min_depth;
        loop {
            let key = self.key_for(placement.position, depth);
            let descend = depth < self.config.max_depth && self.fits(placement.radius, depth + 1);
            let cell = self.cells.entry(key).or_default();
            cell.population += 1;
            if cell.subdivided && descend {
                depth += 1;
                continue;
            }
            cell.items.push(value);
            let overfull = !cell.subdivided && cell.items.len() > self.config.cell_capacity;
            self.set_cell(&value, Some(key));
            if overfull && depth < self.config.max_depth {
                self.subdivide(key);
            }
            return;
        }
    }

    fn subdivide(&mut self, key: CellKey) {
        let child_depth = key.depth + 1;
        let items = match self.cells.get_mut(&key) {
            Some(cell) => {
                cell.subdivided = true;
                std::mem::take(&mut cell.items)
            }
            None => return,
        };

        let mut stay = Vec::new();
        let mut touched = Vec::new();
        for value in items {
            let Some(placement) = self.placements.get(&value).copied() else {
                continue;
            };
            if !self.fits(placement.radius, child_depth) {
                stay.push(value);
                continue;
            }
            let child_key = self.key_for(placement.position, child_depth);
            let child = self.cells.entry(child_key).or_default();
            child.items.push(value);
            child.population += 1;
            self.set_cell(&value, Some(child_key));
            if !touched.contains(&child_key) {
                touched.push(child_key);
            }
        }
        if let Some(cell) = self.cells.get_mut(&key) {
            cell.items = stay;
        }

        log::trace!("Octree cell {:?} split into {} children", key, touched.len());
        for child_key in touched {
            let overfull = self.cells.get(&child_key)
                .map(|c| c.items.len() > self.config.cell_capacity)
                .unwrap_or(false);
            if overfull && child_depth < self.config.max_depth {
                self.subdivide(child_key);
            }
        }
    }

    /// Decrement populations from `key` up to the coarsest level, then merge
    /// or drop cells that became sparse.
    fn release_path(&mut self, key: CellKey) {
        let mut path = vec![key];
        let mut current = key;
        while current.depth > self.config.min_depth {
            current = current.parent();
            path.push(current);
        }
        for k in &path {
            if let Some(cell) = self.cells.get_mut(k) {
                cell.population = cell.population.saturating_sub(1);
            }
        }

        // Merge the coarsest qualifying ancestor; it absorbs everything below.
        for k in path.iter().rev() {
            let merge = match self.cells.get(k) {
                Some(cell) => cell.subdivided && cell.population <= self.config.merge_threshold,
                None => false,
            };
            if merge {
                self.merge(*k);
                break;
            }
        }

        for k in &path {
            let empty = self.cells.get(k)
                .map(|c| c.population == 0 && !c.subdivided)
                .unwrap_or(false);
            if empty {
                self.cells.remove(k);
            }
        }
    }

    fn merge(&mut self, key: CellKey) {
        let mut gathered = Vec::new();
        let mut stack: Vec<CellKey> = (0..8).map(|o| key.child(o)).collect();
        while let Some(k) = stack.pop() {
            if let Some(cell) = self.cells.remove(&k) {
                if cell.subdivided {
                    stack.extend((0..8).map(|o| k.child(o)));
                }
                gathered.extend(cell.items);
            }
        }
        for value in &gathered {
            self.set_cell(value, Some(key));
        }
        if let Some(cell) = self.cells.get_mut(&key) {
            log::trace!("Octree cell {:?} merged {} objects", key, gathered.len());
            cell.items.extend(gathered);
            cell.subdivided = false;
        }
    }

    fn collect(&self, volume: &AABB, accept: impl Fn(&Placement) -> bool, out: &mut Vec<T>) {
        let test = |value: &T, out: &mut Vec<T>| {
            if let Some(p) = self.placements.get(value) {
                if accept(p) {
                    out.push(*value);
                }
            }
        };

        for value in &self.oversized {
            test(value, out);
        }

        let depth = self.config.min_depth;
        let (lo, hi) = self.key_range(volume, depth);
        let mut stack = Vec::new();
        for x in lo[0]..=hi[0] {
            for y in lo[1]..=hi[1] {
                for z in lo[2]..=hi[2] {
                    stack.push(CellKey { depth, x, y, z });
                }
            }
        }

        while let Some(key) = stack.pop() {
            let Some(cell) = self.cells.get(&key) else {
                continue;
            };
            for value in &cell.items {
                test(value, out);
            }
            if cell.subdivided {
                let range = self.key_range(volume, key.depth + 1);
                stack.extend((0..8).map(|o| key.child(o)).filter(|c| Self::in_range(c, &range)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> OctreeConfig {
        OctreeConfig {
            world_center: [0.0, 0.0, 0.0],
            world_half_size: 64.0,
            min_depth: 1,
            max_depth: 5,
            cell_capacity: 2,
            merge_threshold: 1,
        }
    }

    #[test]
    fn test_octree_basic_insertion() {
        let mut tree = Octree::new(small_config());
        assert!(tree.insert(1u32, Vec3::new(1.0, 2.0, 3.0), 0.0));
        assert!(!tree.insert(1u32, Vec3::zeros(), 0.0));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.query_point(Vec3::new(1.0, 2.0, 3.0)), vec![1]);
    }

    #[test]
    fn test_octree_subdivides_and_respects_max_depth() {
        let mut tree = Octree::new(small_config());
        for i in 0..40u32 {
            tree.insert(i, Vec3::new(10.0 + i as f32 * 0.01, 10.0, 10.0), 0.0);
        }
        assert!(tree.max_depth_in_use() > 1);
        assert!(tree.max_depth_in_use() <= 5);
        for i in 0..40u32 {
            let p = tree.position(&i).unwrap();
            assert!(tree.query_point(p).contains(&i));
        }
    }

    #[test]
    fn test_octree_merges_after_removal() {
        let mut tree = Octree::new(small_config());
        for i in 0..6u32 {
            tree.insert(i, Vec3::new(20.0 + i as f32, 20.0, 20.0), 0.0);
        }
        let depth_full = tree.max_depth_in_use();
        assert!(depth_full > 1);
        for i in 0..5u32 {
            assert!(tree.remove(&i).is_some());
        }
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.max_depth_in_use(), 1);
        assert_eq!(tree.query_point(Vec3::new(25.0, 20.0, 20.0)), vec![5]);
    }

    #[test]
    fn test_octree_radius_query() {
        let mut tree = Octree::new(small_config());
        tree.insert(1u32, Vec3::new(0.0, 0.0, 0.0), 0.0);
        tree.insert(2u32, Vec3::new(5.0, 0.0, 0.0), 0.0);
        tree.insert(3u32, Vec3::new(50.0, 0.0, 0.0), 0.0);
        let mut found = tree.query_radius(Vec3::new(1.0, 0.0, 0.0), 4.5);
        found.sort();
        assert_eq!(found, vec![1, 2]);
    }

    #[test]
    fn test_loose_objects_found_across_cell_borders() {
        let mut tree = Octree::new(small_config());
        // Center sits just inside one cell, sphere reaches into its neighbour.
        tree.insert(7u32, Vec3::new(0.3, 0.3, 0.3), 1.0);
        let hits = tree.query_aabb(&AABB::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(-0.2, -0.2, -0.2)));
        assert_eq!(hits, vec![7]);
    }

    #[test]
    fn test_out_of_bounds_positions_are_clamped() {
        let mut tree = Octree::new(small_config());
        tree.insert(9u32, Vec3::new(500.0, -500.0, 0.0), 0.0);
        assert_eq!(tree.query_point(Vec3::new(500.0, -500.0, 0.0)), vec![9]);
    }

    #[test]
    fn test_oversized_objects_always_visible() {
        let mut tree = Octree::new(small_config());
        tree.insert(4u32, Vec3::zeros(), 1000.0);
        assert!(tree.cell_of(&4).is_none());
        assert_eq!(tree.query_point(Vec3::new(60.0, 60.0, 60.0)), vec![4]);
    }

    #[test]
    fn test_update_moves_object() {
        let mut tree = Octree::new(small_config());
        tree.insert(1u32, Vec3::new(-30.0, 0.0, 0.0), 0.0);
        assert!(tree.update(1, Vec3::new(30.0, 0.0, 0.0)));
        assert!(tree.query_point(Vec3::new(-30.0, 0.0, 0.0)).is_empty());
        assert_eq!(tree.query_point(Vec3::new(30.0, 0.0, 0.0)), vec![1]);
        assert!(!tree.update(2, Vec3::zeros()));
    }
}
