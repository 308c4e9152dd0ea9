//! Scripted per-entity behaviour

use crate::ecs::{Entity, World};

/// Registration tag identifying a script on its game object
///
/// Lookups go through this key rather than through runtime type
/// information, so two scripts of the same type can coexist under
/// different keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptKey(pub &'static str);

impl ScriptKey {
    pub fn name(&self) -> &'static str {
        self.0
    }
}

/// What a script may touch while it runs
///
/// Destruction requested here is only recorded; the scene applies it after
/// every script of the current tick has run.
pub struct ScriptContext<'a> {
    entity: Entity,
    world: &'a mut World,
    destroy_requests: &'a mut Vec<Entity>,
}

impl<'a> ScriptContext<'a> {
    pub(crate) fn new(entity: Entity, world: &'a mut World, destroy_requests: &'a mut Vec<Entity>) -> Self {
        Self { entity, world, destroy_requests }
    }

    /// Entity owning the running script
    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn world(&self) -> &World {
        self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        self.world
    }

    /// Queue `entity` and its descendants for destruction
    pub fn destroy(&mut self, entity: Entity) {
        if !self.destroy_requests.contains(&entity) {
            self.destroy_requests.push(entity);
        }
    }

    /// Queue the owning entity for destruction
    pub fn destroy_self(&mut self) {
        let entity = self.entity;
        self.destroy(entity);
    }
}

/// Behaviour attached to a game object
///
/// `start` runs once, on the first tick the script is active. `update` runs
/// every tick while [`Script::is_active`] returns true. `on_destroy` runs
/// once when the owning entity is torn down.
pub trait Script: 'static {
    fn start(&mut self, _ctx: &mut ScriptContext<'_>) {}

    fn update(&mut self, _ctx: &mut ScriptContext<'_>, _delta_time: f32) {}

    fn on_destroy(&mut self, _ctx: &mut ScriptContext<'_>) {}

    fn is_active(&self) -> bool {
        true
    }
}
