//! Entity-Component-System implementation
//!
//! Sparse per-type component arrays indexed directly by entity id, with id
//! recycling and capacity growth broadcast to every array.

pub mod entity;
pub mod component;
pub mod storage;
pub mod world;
pub mod error;
pub mod components;
pub mod systems;

#[cfg(test)]
mod tests;

pub use entity::{Entity, EntityManager};
pub use component::{Component, ComponentTypeId};
pub use storage::{ComponentArray, ComponentStorage};
pub use world::World;
pub use error::{EcsError, EcsResult};
