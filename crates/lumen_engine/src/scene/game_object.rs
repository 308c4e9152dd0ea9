//! Per-entity script owner

use smallvec::SmallVec;

use super::script::{Script, ScriptContext, ScriptKey};
use crate::ecs::Entity;

pub(crate) struct ScriptSlot {
    key: ScriptKey,
    script: Box<dyn Script>,
    started: bool,
}

/// Façade over one entity holding its scripts and destroy marker
pub struct GameObject {
    entity: Entity,
    scripts: SmallVec<[ScriptSlot; 2]>,
    pending_destroy: bool,
}

impl GameObject {
    pub(crate) fn new(entity: Entity) -> Self {
        Self { entity, scripts: SmallVec::new(), pending_destroy: false }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Attach `script` under `key`. Returns false if the key is taken.
    pub fn add_script(&mut self, key: ScriptKey, script: Box<dyn Script>) -> bool {
        if self.has_script(key) {
            log::warn!("{:?} already has a script named '{}'", self.entity, key.name());
            return false;
        }
        self.scripts.push(ScriptSlot { key, script, started: false });
        true
    }

    pub fn has_script(&self, key: ScriptKey) -> bool {
        self.scripts.iter().any(|slot| slot.key == key)
    }

    pub fn script(&self, key: ScriptKey) -> Option<&dyn Script> {
        self.scripts.iter().find(|slot| slot.key == key).map(|slot| slot.script.as_ref())
    }

    pub fn script_mut(&mut self, key: ScriptKey) -> Option<&mut (dyn Script + 'static)> {
        self.scripts.iter_mut().find(|slot| slot.key == key).map(|slot| slot.script.as_mut())
    }

    /// Detach a script without running its `on_destroy`
    pub fn remove_script(&mut self, key: ScriptKey) -> Option<Box<dyn Script>> {
        let index = self.scripts.iter().position(|slot| slot.key == key)?;
        Some(self.scripts.remove(index).script)
    }

    pub fn script_keys(&self) -> impl Iterator<Item = ScriptKey> + '_ {
        self.scripts.iter().map(|slot| slot.key)
    }

    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    pub fn mark_for_destroy(&mut self) {
        self.pending_destroy = true;
    }

    pub fn is_pending_destroy(&self) -> bool {
        self.pending_destroy
    }

    /// Start scripts that have not started yet, then update the active ones
    pub(crate) fn tick(&mut self, ctx: &mut ScriptContext<'_>, delta_time: f32) {
        for slot in self.scripts.iter_mut() {
            if !slot.script.is_active() {
                continue;
            }
            if !slot.started {
                slot.started = true;
                slot.script.start(ctx);
            }
            slot.script.update(ctx, delta_time);
        }
    }

    pub(crate) fn run_on_destroy(&mut self, ctx: &mut ScriptContext<'_>) {
        for slot in self.scripts.iter_mut() {
            slot.script.on_destroy(ctx);
        }
    }
}

impl std::fmt::Debug for GameObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameObject")
            .field("entity", &self.entity)
            .field("scripts", &self.script_keys().map(|k| k.name()).collect::<Vec<_>>())
            .field("pending_destroy", &self.pending_destroy)
            .finish()
    }
}
