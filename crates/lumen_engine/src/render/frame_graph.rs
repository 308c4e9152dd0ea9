//! Frame graph: the fixed pass pipeline and its shared instance map
//!
//! Passes run in a fixed order every frame: shadow, geometry, light, forward,
//! skybox, debug. Each pass is set up once (programs, persistent buffers) and
//! executed once per frame against a [`FrameContext`].
//!
//! The frame graph owns the [`InstanceMap`], the per-frame grouping of world
//! matrices by `(mesh, material)`. It is rebuilt at most once per frame, after
//! the transform update and before the first pass runs, so every pass sees the
//! same snapshot.

use std::any::Any;
use std::collections::BTreeMap;

use super::camera::Camera;
use super::material::MaterialManager;
use super::mesh::MeshRegistry;
use super::passes::{DebugPass, ForwardPass, GeometryPass, LightPass, ShadowPass, SkyboxPass};
use super::renderer::{FrameStats, Renderer};
use super::RenderResult;
use crate::ecs::components::{DrawMode, Mesh, MeshInstance, ModelMatrix};
use crate::ecs::World;
use crate::foundation::math::Mat4;

/// Grouping key of the instance map
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceKey {
    pub mesh_id: u32,
    pub material_index: u32,
}

/// All world matrices drawn with one mesh and material
#[derive(Debug, Clone)]
pub struct InstanceGroup {
    pub mesh: Mesh,
    pub mode: DrawMode,
    pub deferred: bool,
    pub worlds: Vec<Mat4>,
}

/// Per-frame instancing snapshot
#[derive(Debug, Default)]
pub struct InstanceMap {
    groups: BTreeMap<InstanceKey, InstanceGroup>,
}

impl InstanceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Regroup every entity that has a world matrix and either a `Mesh` or a
    /// `MeshInstance`
    pub fn rebuild(&mut self, world: &World, meshes: &mut MeshRegistry, materials: &MaterialManager) {
        self.groups.clear();
        meshes.refresh_instance_counts(world);

        for (_, instance, model) in world.query2::<MeshInstance, ModelMatrix>() {
            match meshes.definition(instance.definition) {
                Some(mesh) => {
                    let mesh = *mesh;
                    self.push(mesh, meshes.draw_mode(mesh.id()), model.matrix, materials);
                }
                None => log::warn!("Skipping instance of unknown mesh definition {}", instance.definition),
            }
        }
        for (_, mesh, model) in world.query2::<Mesh, ModelMatrix>() {
            self.push(*mesh, meshes.draw_mode(mesh.id()), model.matrix, materials);
        }
        log::trace!("Instance map rebuilt: {} groups, {} instances", self.groups.len(), self.instance_count());
    }

    fn push(&mut self, mesh: Mesh, mode: DrawMode, world: Mat4, materials: &MaterialManager) {
        let key = InstanceKey { mesh_id: mesh.id(), material_index: mesh.material_index };
        self.groups
            .entry(key)
            .or_insert_with(|| InstanceGroup {
                mesh,
                mode,
                deferred: materials.is_deferred(mesh.material_index),
                worlds: Vec::new(),
            })
            .worlds
            .push(world);
    }

    pub fn groups(&self) -> impl Iterator<Item = (&InstanceKey, &InstanceGroup)> {
        self.groups.iter()
    }

    pub fn group(&self, key: &InstanceKey) -> Option<&InstanceGroup> {
        self.groups.get(key)
    }

    /// Groups routed to the geometry pass (`true`) or the forward pass (`false`)
    pub fn with_deferred(&self, deferred: bool) -> impl Iterator<Item = &InstanceGroup> {
        self.groups.values().filter(move |g| g.deferred == deferred)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn instance_count(&self) -> usize {
        self.groups.values().map(|g| g.worlds.len()).sum()
    }
}

/// Everything a pass may touch while executing
pub struct FrameContext<'a> {
    pub world: &'a mut World,
    pub camera: &'a Camera,
    pub renderer: &'a mut Renderer,
    pub instances: &'a InstanceMap,
}

/// One stage of the frame
pub trait RenderPass {
    fn name(&self) -> &'static str;

    /// Compile programs and allocate persistent objects. Called once.
    fn setup(&mut self, renderer: &mut Renderer) -> RenderResult<()>;

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> RenderResult<()>;

    fn is_enabled(&self, _renderer: &Renderer) -> bool {
        true
    }

    /// Free the pass's GPU objects
    fn release(&mut self, _renderer: &mut Renderer) {}

    fn as_any(&self) -> &dyn Any;
}

pub struct FrameGraph {
    passes: Vec<Box<dyn RenderPass>>,
    instance_map: InstanceMap,
    instances_updated: bool,
    instance_rebuilds: usize,
    is_setup: bool,
}

impl FrameGraph {
    /// The standard pipeline
    pub fn new() -> Self {
        let mut graph = Self::empty();
        graph.add_pass(Box::new(ShadowPass::new()));
        graph.add_pass(Box::new(GeometryPass::new()));
        graph.add_pass(Box::new(LightPass::new()));
        graph.add_pass(Box::new(ForwardPass::new()));
        graph.add_pass(Box::new(SkyboxPass::new()));
        graph.add_pass(Box::new(DebugPass::new()));
        graph
    }

    pub fn empty() -> Self {
        Self {
            passes: Vec::new(),
            instance_map: InstanceMap::new(),
            instances_updated: false,
            instance_rebuilds: 0,
            is_setup: false,
        }
    }

    /// Append a pass. Passes added after setup are set up on the next frame.
    pub fn add_pass(&mut self, pass: Box<dyn RenderPass>) {
        self.passes.push(pass);
        self.is_setup = false;
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// First pass of type `T`
    pub fn pass<T: RenderPass + 'static>(&self) -> Option<&T> {
        self.passes.iter().find_map(|p| p.as_any().downcast_ref::<T>())
    }

    /// Set up every pass. Calling again without new passes does nothing.
    pub fn setup(&mut self, renderer: &mut Renderer) -> RenderResult<()> {
        if self.is_setup {
            return Ok(());
        }
        for pass in &mut self.passes {
            log::debug!("Setting up {} pass", pass.name());
            pass.setup(renderer)?;
        }
        self.is_setup = true;
        Ok(())
    }

    /// Allow the next [`Self::update_instance_map`] to rebuild
    pub fn begin_frame(&mut self) {
        self.instances_updated = false;
    }

    /// Rebuild the instance map unless it was already rebuilt this frame.
    /// Returns whether a rebuild happened.
    pub fn update_instance_map(&mut self, world: &World, renderer: &mut Renderer) -> bool {
        if self.instances_updated {
            return false;
        }
        let parts = renderer.parts();
        self.instance_map.rebuild(world, parts.meshes, parts.materials);
        self.instances_updated = true;
        self.instance_rebuilds += 1;
        true
    }

    pub fn instance_map(&self) -> &InstanceMap {
        &self.instance_map
    }

    /// Instance map rebuilds over the graph's lifetime
    pub fn instance_rebuild_count(&self) -> usize {
        self.instance_rebuilds
    }

    /// Run one frame. Transforms must already be up to date.
    pub fn execute(&mut self, world: &mut World, camera: &Camera, renderer: &mut Renderer) -> RenderResult<FrameStats> {
        self.setup(renderer)?;
        self.begin_frame();
        renderer.begin_frame()?;
        self.update_instance_map(world, renderer);
        renderer.parts().stats.instances = self.instance_map.instance_count();

        let Self { passes, instance_map, .. } = self;
        for pass in passes.iter_mut() {
            if !pass.is_enabled(renderer) {
                continue;
            }
            log::trace!("Executing {} pass", pass.name());
            let mut ctx = FrameContext {
                world: &mut *world,
                camera,
                renderer: &mut *renderer,
                instances: &*instance_map,
            };
            pass.execute(&mut ctx)?;
            renderer.parts().stats.passes_run += 1;
        }
        Ok(renderer.stats())
    }

    /// Release every pass's GPU objects
    pub fn release(&mut self, renderer: &mut Renderer) {
        for pass in &mut self.passes {
            pass.release(renderer);
        }
        self.is_setup = false;
    }
}

impl Default for FrameGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGraph")
            .field("passes", &self.pass_names())
            .field("instance_groups", &self.instance_map.len())
            .finish()
    }
}
