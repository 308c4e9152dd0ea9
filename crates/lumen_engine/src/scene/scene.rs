//! Scene: the world plus its game objects

use std::collections::{BTreeMap, HashSet};

use super::game_object::GameObject;
use super::script::{Script, ScriptContext, ScriptKey};
use crate::config::SceneConfig;
use crate::ecs::systems::TransformSystem;
use crate::ecs::{EcsError, EcsResult, Entity, World};
use crate::foundation::math::Transform;

/// Owns the entity store and the game objects layered over it
///
/// Destruction is mark-then-sweep: [`Scene::destroy`] and script requests
/// only set a pending marker, and [`Scene::flush_destroyed`] tears entities
/// down at a point in the frame where nothing is iterating them.
pub struct Scene {
    world: World,
    objects: BTreeMap<Entity, GameObject>,
    destroy_requests: Vec<Entity>,
}

impl Scene {
    pub fn new(config: &SceneConfig) -> Self {
        Self {
            world: World::with_capacity(config.initial_entity_capacity),
            objects: BTreeMap::new(),
            destroy_requests: Vec::new(),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Create a root entity with the transform components attached
    pub fn create_entity(&mut self, transform: &Transform) -> EcsResult<Entity> {
        let entity = self.world.create_entity();
        TransformSystem::attach(&mut self.world, entity, transform)?;
        Ok(entity)
    }

    /// Create an entity under `parent`. `transform` is the child's world pose.
    pub fn create_child(&mut self, parent: Entity, transform: &Transform) -> EcsResult<Entity> {
        if !self.world.is_alive(parent) {
            return Err(EcsError::DeadEntity(parent));
        }
        let entity = self.create_entity(transform)?;
        TransformSystem::set_parent(&mut self.world, entity, parent)?;
        Ok(entity)
    }

    pub fn game_object(&self, entity: Entity) -> Option<&GameObject> {
        self.objects.get(&entity)
    }

    /// Game object of `entity`, created on first access
    pub fn game_object_mut(&mut self, entity: Entity) -> Option<&mut GameObject> {
        if !self.world.is_alive(entity) {
            log::warn!("No game object for dead entity {:?}", entity);
            return None;
        }
        Some(self.objects.entry(entity).or_insert_with(|| GameObject::new(entity)))
    }

    /// Attach `script` to `entity` under `key`
    pub fn add_script(&mut self, entity: Entity, key: ScriptKey, script: Box<dyn Script>) -> EcsResult<bool> {
        let object = self.game_object_mut(entity).ok_or(EcsError::DeadEntity(entity))?;
        Ok(object.add_script(key, script))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Mark `entity` and, at the next sweep, all of its descendants for destruction
    pub fn destroy(&mut self, entity: Entity) {
        if let Some(object) = self.game_object_mut(entity) {
            object.mark_for_destroy();
        }
    }

    pub fn is_pending_destroy(&self, entity: Entity) -> bool {
        self.objects.get(&entity).is_some_and(GameObject::is_pending_destroy)
    }

    /// Run one tick of every script
    ///
    /// Objects already pending destruction are skipped. Destroy requests made
    /// by scripts become pending markers once every script has run.
    pub fn update_scripts(&mut self, delta_time: f32) {
        for (entity, object) in self.objects.iter_mut() {
            if object.is_pending_destroy() || !self.world.is_alive(*entity) {
                continue;
            }
            let mut ctx = ScriptContext::new(*entity, &mut self.world, &mut self.destroy_requests);
            object.tick(&mut ctx, delta_time);
        }
        self.apply_destroy_requests();
    }

    fn apply_destroy_requests(&mut self) {
        for entity in std::mem::take(&mut self.destroy_requests) {
            self.destroy(entity);
        }
    }

    /// Tear down every pending entity together with its descendants
    ///
    /// Only the topmost pending entities are walked: each subtree is
    /// collected breadth-first, then the whole list is destroyed back to
    /// front so children go before their parents. Game objects whose entity
    /// was destroyed directly through the world are dropped without their
    /// `on_destroy` hook. Returns how many entities were destroyed.
    pub fn flush_destroyed(&mut self) -> usize {
        self.apply_destroy_requests();
        let world = &self.world;
        self.objects.retain(|entity, _| world.is_alive(*entity));

        let pending: HashSet<Entity> =
            self.objects.values().filter(|o| o.is_pending_destroy()).map(GameObject::entity).collect();
        if pending.is_empty() {
            return 0;
        }
        let roots: Vec<Entity> = self
            .objects
            .keys()
            .copied()
            .filter(|e| pending.contains(e) && !self.has_pending_ancestor(*e, &pending))
            .collect();

        let mut seen = HashSet::new();
        let mut order = Vec::new();
        for root in roots {
            for entity in TransformSystem::descendants_breadth_first(&self.world, root) {
                if seen.insert(entity) {
                    order.push(entity);
                }
            }
        }

        for &entity in order.iter().rev() {
            if let Some(mut object) = self.objects.remove(&entity) {
                let mut ctx = ScriptContext::new(entity, &mut self.world, &mut self.destroy_requests);
                object.run_on_destroy(&mut ctx);
            }
            TransformSystem::unlink(&mut self.world, entity);
            self.world.destroy_entity(entity);
        }
        // Requests made from on_destroy that point at already destroyed entities
        self.destroy_requests.retain(|e| self.world.is_alive(*e));
        log::debug!("Destroyed {} entities", order.len());
        order.len()
    }

    fn has_pending_ancestor(&self, entity: Entity, pending: &HashSet<Entity>) -> bool {
        let mut current = TransformSystem::parent(&self.world, entity);
        while let Some(parent) = current {
            if pending.contains(&parent) {
                return true;
            }
            current = TransformSystem::parent(&self.world, parent);
        }
        false
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("entities", &self.world.entity_count())
            .field("objects", &self.objects.len())
            .field("destroy_requests", &self.destroy_requests)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::ecs::components::Position;
    use crate::foundation::math::{Quat, Vec3};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
        active: bool,
    }

    impl Recorder {
        fn boxed(name: &'static str, log: &Log) -> Box<Self> {
            Box::new(Self { name, log: log.clone(), active: true })
        }

        fn push(&self, event: &str) {
            self.log.lock().unwrap().push(format!("{}:{}", self.name, event));
        }
    }

    impl Script for Recorder {
        fn start(&mut self, _ctx: &mut ScriptContext<'_>) {
            self.push("start");
        }

        fn update(&mut self, _ctx: &mut ScriptContext<'_>, _delta_time: f32) {
            self.push("update");
        }

        fn on_destroy(&mut self, _ctx: &mut ScriptContext<'_>) {
            self.push("destroy");
        }

        fn is_active(&self) -> bool {
            self.active
        }
    }

    struct SelfDestruct {
        after: u32,
    }

    impl Script for SelfDestruct {
        fn update(&mut self, ctx: &mut ScriptContext<'_>, _delta_time: f32) {
            if self.after == 0 {
                ctx.destroy_self();
            } else {
                self.after -= 1;
            }
        }
    }

    struct Mover;

    impl Script for Mover {
        fn update(&mut self, ctx: &mut ScriptContext<'_>, delta_time: f32) {
            let entity = ctx.entity();
            TransformSystem::translate(ctx.world_mut(), entity, Vec3::new(delta_time, 0.0, 0.0)).unwrap();
        }
    }

    const RECORDER: ScriptKey = ScriptKey("recorder");

    fn at(x: f32) -> Transform {
        Transform::new(Vec3::new(x, 0.0, 0.0), Quat::identity(), Vec3::new(1.0, 1.0, 1.0))
    }

    fn events(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_start_runs_once_before_updates() {
        let mut scene = Scene::new(&SceneConfig::default());
        let log = Log::default();
        let entity = scene.create_entity(&at(0.0)).unwrap();
        scene.add_script(entity, RECORDER, Recorder::boxed("a", &log)).unwrap();

        scene.update_scripts(0.1);
        scene.update_scripts(0.1);
        assert_eq!(events(&log), vec!["a:start", "a:update", "a:update"]);
    }

    #[test]
    fn test_inactive_script_is_not_started_or_updated() {
        let mut scene = Scene::new(&SceneConfig::default());
        let log = Log::default();
        let entity = scene.create_entity(&at(0.0)).unwrap();
        let mut script = Recorder::boxed("a", &log);
        script.active = false;
        scene.add_script(entity, RECORDER, script).unwrap();

        scene.update_scripts(0.1);
        assert!(events(&log).is_empty());
    }

    #[test]
    fn test_scripts_can_mutate_world() {
        let mut scene = Scene::new(&SceneConfig::default());
        let entity = scene.create_entity(&at(0.0)).unwrap();
        scene.add_script(entity, ScriptKey("mover"), Box::new(Mover)).unwrap();
        scene.update_scripts(0.5);
        scene.update_scripts(0.25);
        let position = scene.world().get_component::<Position>(entity).unwrap();
        assert!((position.0.x - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_game_object_created_lazily() {
        let mut scene = Scene::new(&SceneConfig::default());
        let entity = scene.create_entity(&at(0.0)).unwrap();
        assert!(scene.game_object(entity).is_none());
        assert!(scene.game_object_mut(entity).is_some());
        assert_eq!(scene.object_count(), 1);

        scene.world_mut().destroy_entity(entity);
        assert!(scene.game_object_mut(entity).is_none());
        assert!(scene.add_script(entity, RECORDER, Box::new(Mover)).is_err());
    }

    #[test]
    fn test_destroy_is_deferred_until_flush() {
        let mut scene = Scene::new(&SceneConfig::default());
        let log = Log::default();
        let entity = scene.create_entity(&at(0.0)).unwrap();
        scene.add_script(entity, RECORDER, Recorder::boxed("a", &log)).unwrap();
        scene.update_scripts(0.1);

        scene.destroy(entity);
        assert!(scene.world().is_alive(entity));
        assert!(scene.is_pending_destroy(entity));

        // Pending objects no longer update
        scene.update_scripts(0.1);
        assert_eq!(events(&log), vec!["a:start", "a:update"]);

        assert_eq!(scene.flush_destroyed(), 1);
        assert!(!scene.world().is_alive(entity));
        assert!(scene.game_object(entity).is_none());
        assert_eq!(events(&log).last().map(String::as_str), Some("a:destroy"));
    }

    #[test]
    fn test_destroy_cascades_children_before_parents() {
        let mut scene = Scene::new(&SceneConfig::default());
        let log = Log::default();
        let root = scene.create_entity(&at(0.0)).unwrap();
        let left = scene.create_child(root, &at(1.0)).unwrap();
        let right = scene.create_child(root, &at(2.0)).unwrap();
        let leaf = scene.create_child(left, &at(3.0)).unwrap();
        let bystander = scene.create_entity(&at(9.0)).unwrap();
        for (entity, name) in [(root, "root"), (left, "left"), (right, "right"), (leaf, "leaf")] {
            scene.add_script(entity, RECORDER, Recorder::boxed(name, &log)).unwrap();
        }

        scene.destroy(root);
        assert_eq!(scene.flush_destroyed(), 4);

        // Breadth-first collect is root, left, right, leaf; teardown runs in reverse
        assert_eq!(events(&log), vec!["leaf:destroy", "right:destroy", "left:destroy", "root:destroy"]);
        for entity in [root, left, right, leaf] {
            assert!(!scene.world().is_alive(entity));
        }
        assert!(scene.world().is_alive(bystander));
        assert_eq!(scene.world().entity_count(), 1);
    }

    #[test]
    fn test_destroying_child_detaches_it_from_parent() {
        let mut scene = Scene::new(&SceneConfig::default());
        let parent = scene.create_entity(&at(0.0)).unwrap();
        let child = scene.create_child(parent, &at(1.0)).unwrap();

        scene.destroy(child);
        assert_eq!(scene.flush_destroyed(), 1);
        assert!(scene.world().is_alive(parent));
        assert!(TransformSystem::children(scene.world(), parent).is_empty());
    }

    #[test]
    fn test_overlapping_destroys_tear_down_once() {
        let mut scene = Scene::new(&SceneConfig::default());
        let root = scene.create_entity(&at(0.0)).unwrap();
        let child = scene.create_child(root, &at(1.0)).unwrap();
        scene.destroy(child);
        scene.destroy(root);
        assert_eq!(scene.flush_destroyed(), 2);
        assert_eq!(scene.flush_destroyed(), 0);
    }

    #[test]
    fn test_children_destroyed_first_regardless_of_creation_order() {
        let mut scene = Scene::new(&SceneConfig::default());
        let log = Log::default();
        let child = scene.create_entity(&at(1.0)).unwrap();
        let parent = scene.create_entity(&at(0.0)).unwrap();
        TransformSystem::set_parent(scene.world_mut(), child, parent).unwrap();
        scene.add_script(child, RECORDER, Recorder::boxed("child", &log)).unwrap();
        scene.add_script(parent, RECORDER, Recorder::boxed("parent", &log)).unwrap();

        scene.destroy(child);
        scene.destroy(parent);
        assert_eq!(scene.flush_destroyed(), 2);
        assert_eq!(events(&log), vec!["child:destroy", "parent:destroy"]);
        assert_eq!(scene.world().entity_count(), 0);
    }

    #[test]
    fn test_objects_of_externally_destroyed_entities_are_pruned() {
        let mut scene = Scene::new(&SceneConfig::default());
        let log = Log::default();
        let entity = scene.create_entity(&at(0.0)).unwrap();
        scene.add_script(entity, RECORDER, Recorder::boxed("gone", &log)).unwrap();
        assert_eq!(scene.object_count(), 1);

        scene.world_mut().destroy_entity(entity);
        assert_eq!(scene.flush_destroyed(), 0);
        assert_eq!(scene.object_count(), 0);
        assert!(events(&log).is_empty());
    }

    #[test]
    fn test_script_requested_destroy_applies_after_tick() {
        let mut scene = Scene::new(&SceneConfig::default());
        let entity = scene.create_entity(&at(0.0)).unwrap();
        scene.add_script(entity, ScriptKey("fuse"), Box::new(SelfDestruct { after: 1 })).unwrap();

        scene.update_scripts(0.1);
        assert_eq!(scene.flush_destroyed(), 0);
        scene.update_scripts(0.1);
        assert!(scene.is_pending_destroy(entity));
        assert!(scene.world().is_alive(entity));
        assert_eq!(scene.flush_destroyed(), 1);

        // The freed id is handed out again
        let recycled = scene.create_entity(&at(0.0)).unwrap();
        assert_eq!(recycled.id(), entity.id());
        assert_ne!(recycled, entity);
        assert!(scene.game_object(recycled).is_none());
    }
}
