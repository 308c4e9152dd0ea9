//! Per-type component storage
//!
//! Each component type owns one [`ComponentArray`]: a slot per entity id,
//! indexed directly by the raw id. Storage is never packed, so insertion and
//! removal are O(1) and nothing moves when other entities change. The world
//! keeps every array at least as long as the entity capacity by broadcasting
//! [`ComponentStorage::resize`] whenever the id space grows.

use std::any::Any;

use super::Component;

/// Type-erased view of a component array
pub trait ComponentStorage: Any + Send + Sync {
    /// Grow to at least `capacity` slots
    fn resize(&mut self, capacity: usize);

    /// Drop whatever component sits in `index`
    fn remove_index(&mut self, index: usize);

    fn slot_count(&self) -> usize;

    fn component_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Dense slot array for one component type
#[derive(Debug)]
pub struct ComponentArray<T> {
    slots: Vec<Option<T>>,
    count: usize,
}

impl<T: Component> ComponentArray<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, count: 0 }
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn insert(&mut self, index: usize, value: T) -> Option<T> {
        debug_assert!(
            index < self.slots.len(),
            "{} storage has {} slots, index {} out of range",
            std::any::type_name::<T>(), self.slots.len(), index
        );
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        let previous = self.slots[index].replace(value);
        if previous.is_none() {
            self.count += 1;
        }
        previous
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        let removed = self.slots.get_mut(index).and_then(Option::take);
        if removed.is_some() {
            self.count -= 1;
        }
        removed
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Occupied slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| slot.as_ref().map(|c| (i, c)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| slot.as_mut().map(|c| (i, c)))
    }
}

impl<T: Component> ComponentStorage for ComponentArray<T> {
    fn resize(&mut self, capacity: usize) {
        if capacity > self.slots.len() {
            self.slots.resize_with(capacity, || None);
        }
    }

    fn remove_index(&mut self, index: usize) {
        self.remove(index);
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn component_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Health(i32);
    impl Component for Health {}

    #[test]
    fn test_insert_replace_remove() {
        let mut array = ComponentArray::<Health>::with_capacity(4);
        assert!(array.insert(2, Health(10)).is_none());
        assert_eq!(array.insert(2, Health(5)), Some(Health(10)));
        assert_eq!(array.len(), 1);
        assert_eq!(array.get(2), Some(&Health(5)));
        assert_eq!(array.remove(2), Some(Health(5)));
        assert!(array.is_empty());
        assert!(array.remove(2).is_none());
    }

    #[test]
    fn test_resize_never_shrinks() {
        let mut array = ComponentArray::<Health>::with_capacity(4);
        array.insert(3, Health(1));
        array.resize(16);
        assert_eq!(array.slot_count(), 16);
        array.resize(2);
        assert_eq!(array.slot_count(), 16);
        assert_eq!(array.get(3), Some(&Health(1)));
    }
}
