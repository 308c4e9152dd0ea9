//! Entity identifiers and the entity manager
//!
//! Entities are raw slot indices plus a generation. Destroying an entity
//! returns its index to a free list and bumps the slot's generation, so an old
//! handle never aliases the entity that later reuses the index.

/// Entity identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    id: u32,
    generation: u32,
}

impl Entity {
    pub(crate) fn new(id: u32, generation: u32) -> Self {
        Self { id, generation }
    }

    /// Raw slot index, reused after destruction
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Slot index as a `usize` for component array access
    pub fn index(&self) -> usize {
        self.id as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Allocates entity ids, recycles destroyed ones and tracks liveness
#[derive(Debug)]
pub struct EntityManager {
    alive: Vec<bool>,
    generations: Vec<u32>,
    free_ids: Vec<u32>,
    /// One past the highest id ever handed out
    high_water: u32,
    live_count: usize,
}

impl EntityManager {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            alive: vec![false; capacity],
            generations: vec![0; capacity],
            free_ids: Vec::new(),
            high_water: 0,
            live_count: 0,
        }
    }

    /// Number of id slots currently backed by storage
    pub fn capacity(&self) -> usize {
        self.alive.len()
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Allocate an entity. Returns the new capacity when the id space had to
    /// grow, so the caller can resize every component array to match.
    pub fn create(&mut self) -> (Entity, Option<usize>) {
        if let Some(id) = self.free_ids.pop() {
            let slot = id as usize;
            self.alive[slot] = true;
            self.live_count += 1;
            return (Entity::new(id, self.generations[slot]), None);
        }

        let mut grown = None;
        let id = self.high_water;
        if id as usize >= self.capacity() {
            let new_capacity = self.capacity() * 2;
            self.alive.resize(new_capacity, false);
            self.generations.resize(new_capacity, 0);
            log::debug!("Entity capacity grown to {}", new_capacity);
            grown = Some(new_capacity);
        }

        self.high_water += 1;
        self.alive[id as usize] = true;
        self.live_count += 1;
        (Entity::new(id, self.generations[id as usize]), grown)
    }

    /// Mark an entity dead and return its id to the free pool.
    /// Returns false for stale or unknown handles.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = entity.index();
        self.alive[slot] = false;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free_ids.push(entity.id);
        self.live_count -= 1;
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        let slot = entity.index();
        slot < self.alive.len() && self.alive[slot] && self.generations[slot] == entity.generation
    }

    /// Current live handle for a slot index
    pub fn entity_at(&self, index: usize) -> Option<Entity> {
        if index < self.alive.len() && self.alive[index] {
            Some(Entity::new(index as u32, self.generations[index]))
        } else {
            None
        }
    }

    /// All live entities in id order
    pub fn iter_alive(&self) -> impl Iterator<Item = Entity> + '_ {
        (0..self.high_water as usize).filter_map(move |i| self.entity_at(i))
    }
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::with_capacity(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_recycled_with_new_generation() {
        let mut manager = EntityManager::with_capacity(4);
        let (a, _) = manager.create();
        let (b, _) = manager.create();
        assert!(manager.destroy(a));
        assert!(!manager.destroy(a));

        let (c, _) = manager.create();
        assert_eq!(c.id(), a.id());
        assert_ne!(c.generation(), a.generation());
        assert!(!manager.is_alive(a));
        assert!(manager.is_alive(b));
        assert!(manager.is_alive(c));
        assert_eq!(manager.live_count(), 2);
    }

    #[test]
    fn test_capacity_doubles_when_exhausted() {
        let mut manager = EntityManager::with_capacity(2);
        assert_eq!(manager.create().1, None);
        assert_eq!(manager.create().1, None);
        let (e, grown) = manager.create();
        assert_eq!(grown, Some(4));
        assert_eq!(e.id(), 2);
        assert_eq!(manager.capacity(), 4);
    }

    #[test]
    fn test_iter_alive_skips_destroyed() {
        let mut manager = EntityManager::with_capacity(8);
        let ids: Vec<_> = (0..4).map(|_| manager.create().0).collect();
        manager.destroy(ids[1]);
        let alive: Vec<_> = manager.iter_alive().collect();
        assert_eq!(alive, vec![ids[0], ids[2], ids[3]]);
    }
}
