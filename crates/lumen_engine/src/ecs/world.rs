//! ECS World implementation

use std::any::TypeId;
use std::collections::HashMap;

use super::{Component, ComponentArray, ComponentStorage, ComponentTypeId, EcsError, EcsResult, Entity};
use super::entity::EntityManager;

/// ECS World containing all entities and components
///
/// Component types are assigned a dense index the first time they are seen;
/// lookups go through that index into a vector of type-erased arrays.
pub struct World {
    entities: EntityManager,
    type_indices: HashMap<TypeId, ComponentTypeId>,
    storages: Vec<Box<dyn ComponentStorage>>,
}

impl World {
    /// Create a new world
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Create a world with `capacity` entity slots reserved
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entities: EntityManager::with_capacity(capacity),
            type_indices: HashMap::new(),
            storages: Vec::new(),
        }
    }

    /// Register a component type, returning its dense index. Idempotent.
    pub fn register_component<T: Component>(&mut self) -> ComponentTypeId {
        if let Some(&index) = self.type_indices.get(&TypeId::of::<T>()) {
            return index;
        }
        let index = self.storages.len();
        self.storages.push(Box::new(ComponentArray::<T>::with_capacity(self.entities.capacity())));
        self.type_indices.insert(TypeId::of::<T>(), index);
        log::trace!("Registered component {} as #{}", std::any::type_name::<T>(), index);
        index
    }

    /// Create a new entity, recycling a destroyed id when one is free
    pub fn create_entity(&mut self) -> Entity {
        let (entity, grown) = self.entities.create();
        if let Some(capacity) = grown {
            for storage in &mut self.storages {
                storage.resize(capacity);
            }
        }
        entity
    }

    /// Destroy an entity and drop all of its components.
    /// Returns false for stale handles.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        if !self.entities.is_alive(entity) {
            log::warn!("destroy_entity on dead entity {:?}", entity);
            return false;
        }
        for storage in &mut self.storages {
            storage.remove_index(entity.index());
        }
        self.entities.destroy(entity)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.live_count()
    }

    /// Entity slots currently backed by every component array
    pub fn capacity(&self) -> usize {
        self.entities.capacity()
    }

    /// All live entities in id order
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter_alive()
    }

    /// Add a component to an entity, replacing any previous value
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> EcsResult<()> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::DeadEntity(entity));
        }
        let index = self.register_component::<T>();
        if let Some(array) = self.storages[index].as_any_mut().downcast_mut::<ComponentArray<T>>() {
            array.insert(entity.index(), component);
        }
        Ok(())
    }

    /// Get a component from an entity
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        if !self.check_alive(entity) {
            return None;
        }
        self.storage::<T>()?.get(entity.index())
    }

    /// Get a mutable component from an entity
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        if !self.check_alive(entity) {
            return None;
        }
        self.storage_mut::<T>()?.get_mut(entity.index())
    }

    /// Remove a component from an entity, returning it
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if !self.check_alive(entity) {
            return None;
        }
        self.storage_mut::<T>()?.remove(entity.index())
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
            && self.storage::<T>().map(|s| s.contains(entity.index())).unwrap_or(false)
    }

    /// Typed array for `T`, if the type has been registered
    pub fn storage<T: Component>(&self) -> Option<&ComponentArray<T>> {
        let index = *self.type_indices.get(&TypeId::of::<T>())?;
        self.storages[index].as_any().downcast_ref::<ComponentArray<T>>()
    }

    fn storage_mut<T: Component>(&mut self) -> Option<&mut ComponentArray<T>> {
        let index = *self.type_indices.get(&TypeId::of::<T>())?;
        self.storages[index].as_any_mut().downcast_mut::<ComponentArray<T>>()
    }

    /// Iterate every entity holding `T`
    pub fn query<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        self.storage::<T>()
            .into_iter()
            .flat_map(|s| s.iter())
            .filter_map(move |(index, c)| Some((self.entities.entity_at(index)?, c)))
    }

    /// Iterate every entity holding both `A` and `B`
    pub fn query2<A: Component, B: Component>(&self) -> impl Iterator<Item = (Entity, &A, &B)> + '_ {
        let second = self.storage::<B>();
        self.storage::<A>()
            .into_iter()
            .flat_map(|s| s.iter())
            .filter_map(move |(index, a)| {
                let b = second?.get(index)?;
                Some((self.entities.entity_at(index)?, a, b))
            })
    }

    /// Snapshot of the entities holding `T`, safe to hold across mutation
    pub fn entities_with<T: Component>(&self) -> Vec<Entity> {
        self.query::<T>().map(|(e, _)| e).collect()
    }

    /// Slot count of every registered array, in registration order
    pub fn storage_sizes(&self) -> Vec<(&'static str, usize)> {
        self.storages.iter().map(|s| (s.component_name(), s.slot_count())).collect()
    }

    fn check_alive(&self, entity: Entity) -> bool {
        let alive = self.entities.is_alive(entity);
        if !alive {
            log::warn!("Component access on dead entity {:?}", entity);
        }
        alive
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
