//! Indirect draw batching
//!
//! A [`RenderBatch`] collects mesh instances for one scope (a shadow view, the
//! deferred geometry, the forward set) and turns them into two GPU buffers:
//! a flat array of [`InstanceData`] and a list of indirect draw commands. Each
//! command's `base_instance` is the number of instance records written before
//! it, so the vertex shader finds its record at
//! `instances[gl_BaseInstance + gl_InstanceID]` with no extra indirection.

use bytemuck::{Pod, Zeroable};

use super::bindings;
use super::device::{BufferId, BufferKind, GraphicsDevice};
use super::mesh::grown_capacity;
use super::RenderResult;
use crate::ecs::components::{DrawMode, Mesh};
use crate::foundation::math::Mat4;

/// Per-instance record read by `instanced.vert`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub model: [[f32; 4]; 4],
    pub uv_scale: [f32; 2],
    pub material_index: u32,
    pub _pad: u32,
}

impl InstanceData {
    pub fn new(model: &Mat4, uv_scale: [f32; 2], material_index: u32) -> Self {
        Self { model: (*model).into(), uv_scale, material_index, _pad: 0 }
    }
}

/// `glDrawElementsIndirect` command
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawElementsIndirectCommand {
    pub count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub base_instance: u32,
}

/// `glDrawArraysIndirect` command
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawArraysIndirectCommand {
    pub count: u32,
    pub instance_count: u32,
    pub first: u32,
    pub base_instance: u32,
}

/// Byte stride of one command in the indirect buffer; both shapes share it
pub const COMMAND_STRIDE: usize = std::mem::size_of::<DrawElementsIndirectCommand>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectCommand {
    Elements(DrawElementsIndirectCommand),
    Arrays(DrawArraysIndirectCommand),
}

/// One indirect draw plus the CPU-side bookkeeping that built it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCommand {
    pub mesh_id: u32,
    pub use_indices: bool,
    pub mode: DrawMode,
    pub command: IndirectCommand,
}

impl DrawCommand {
    pub fn instance_count(&self) -> u32 {
        match self.command {
            IndirectCommand::Elements(c) => c.instance_count,
            IndirectCommand::Arrays(c) => c.instance_count,
        }
    }

    pub fn base_instance(&self) -> u32 {
        match self.command {
            IndirectCommand::Elements(c) => c.base_instance,
            IndirectCommand::Arrays(c) => c.base_instance,
        }
    }

    /// GPU words, zero-padded to [`COMMAND_STRIDE`]
    fn encode(&self) -> [u32; 5] {
        match self.command {
            IndirectCommand::Elements(c) => bytemuck::cast(c),
            IndirectCommand::Arrays(c) => {
                let [count, instance_count, first, base_instance]: [u32; 4] = bytemuck::cast(c);
                [count, instance_count, first, base_instance, 0]
            }
        }
    }
}

#[derive(Debug, Clone)]
struct BatchEntry {
    mesh: Mesh,
    mode: DrawMode,
    uv_scale: [f32; 2],
    models: Vec<Mat4>,
}

/// Instance and indirect command builder for one draw scope
#[derive(Debug)]
pub struct RenderBatch {
    label: String,
    entries: Vec<BatchEntry>,
    commands: Vec<DrawCommand>,
    instance_data: Vec<InstanceData>,
    command_buffer: Option<BufferId>,
    instance_buffer: Option<BufferId>,
    command_capacity: usize,
    instance_capacity: usize,
    reallocations: usize,
}

impl RenderBatch {
    pub fn new(label: impl Into<String>, initial_capacity: usize) -> Self {
        Self {
            label: label.into(),
            entries: Vec::new(),
            commands: Vec::new(),
            instance_data: Vec::new(),
            command_buffer: None,
            instance_buffer: None,
            command_capacity: initial_capacity.max(1),
            instance_capacity: initial_capacity.max(1),
            reallocations: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue one instance of `mesh`
    pub fn add(&mut self, mesh: &Mesh, mode: DrawMode, world: &Mat4, uv_scale: [f32; 2]) {
        self.add_instances(mesh, mode, std::slice::from_ref(world), uv_scale);
    }

    /// Queue several instances of `mesh` drawn by a single command
    pub fn add_instances(&mut self, mesh: &Mesh, mode: DrawMode, worlds: &[Mat4], uv_scale: [f32; 2]) {
        if worlds.is_empty() {
            return;
        }
        self.entries.push(BatchEntry { mesh: *mesh, mode, uv_scale, models: worlds.to_vec() });
    }

    /// Forget queued instances. Prepared buffers stay allocated.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build commands and instance records from the queue and upload them
    pub fn prepare(&mut self, device: &mut dyn GraphicsDevice) -> RenderResult<()> {
        self.commands.clear();
        self.instance_data.clear();

        for entry in &self.entries {
            let base_instance = self.instance_data.len() as u32;
            let instance_count = entry.models.len() as u32;
            let mesh = &entry.mesh;
            let command = if mesh.is_indexed() {
                IndirectCommand::Elements(DrawElementsIndirectCommand {
                    count: mesh.count,
                    instance_count,
                    first_index: mesh.first_index,
                    base_vertex: mesh.base_vertex,
                    base_instance,
                })
            } else {
                IndirectCommand::Arrays(DrawArraysIndirectCommand {
                    count: mesh.count,
                    instance_count,
                    first: mesh.first_index,
                    base_instance,
                })
            };
            let command = DrawCommand { mesh_id: mesh.id(), use_indices: mesh.is_indexed(), mode: entry.mode, command };
            debug_assert_eq!(command.base_instance() as usize, self.instance_data.len());
            self.commands.push(command);
            self.instance_data.extend(
                entry.models.iter().map(|m| InstanceData::new(m, entry.uv_scale, mesh.material_index)),
            );
        }

        if self.commands.is_empty() {
            return Ok(());
        }
        self.ensure_capacity(device)?;

        let words: Vec<[u32; 5]> = self.commands.iter().map(DrawCommand::encode).collect();
        if let (Some(commands), Some(instances)) = (self.command_buffer, self.instance_buffer) {
            device.write_buffer(commands, 0, bytemuck::cast_slice(&words))?;
            device.write_buffer(instances, 0, bytemuck::cast_slice(&self.instance_data))?;
        }
        log::trace!(
            "Batch '{}' prepared: {} commands, {} instances",
            self.label, self.commands.len(), self.instance_data.len()
        );
        Ok(())
    }

    fn ensure_capacity(&mut self, device: &mut dyn GraphicsDevice) -> RenderResult<()> {
        if self.command_buffer.is_none() || self.commands.len() > self.command_capacity {
            self.command_capacity = grown_capacity(self.command_capacity, self.commands.len());
            if let Some(old) = self.command_buffer.take() {
                device.delete_buffer(old);
                self.reallocations += 1;
            }
            self.command_buffer = Some(device.create_buffer(
                BufferKind::Indirect,
                self.command_capacity * COMMAND_STRIDE,
                &format!("{}_commands", self.label),
            )?);
        }
        if self.instance_buffer.is_none() || self.instance_data.len() > self.instance_capacity {
            self.instance_capacity = grown_capacity(self.instance_capacity, self.instance_data.len());
            if let Some(old) = self.instance_buffer.take() {
                device.delete_buffer(old);
                self.reallocations += 1;
            }
            self.instance_buffer = Some(device.create_buffer(
                BufferKind::Storage,
                self.instance_capacity * std::mem::size_of::<InstanceData>(),
                &format!("{}_instances", self.label),
            )?);
        }
        Ok(())
    }

    /// Issue the prepared commands. Consecutive commands with the same mode
    /// and index usage share one multi-draw. Returns the number of multi-draws.
    pub fn render(&self, device: &mut dyn GraphicsDevice) -> usize {
        if self.commands.is_empty() {
            return 0;
        }
        let (Some(commands), Some(instances)) = (self.command_buffer, self.instance_buffer) else {
            log::error!("Batch '{}' rendered before prepare", self.label);
            return 0;
        };
        device.bind_storage_buffer(bindings::INSTANCES, instances);
        device.bind_indirect_buffer(commands);

        let mut draws = 0;
        let mut start = 0;
        while start < self.commands.len() {
            let key = (self.commands[start].mode, self.commands[start].use_indices);
            let run = self.commands[start..]
                .iter()
                .take_while(|c| (c.mode, c.use_indices) == key)
                .count();
            device.multi_draw_indirect(key.0, key.1, start * COMMAND_STRIDE, run, COMMAND_STRIDE);
            draws += 1;
            start += run;
        }
        draws
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn instance_data(&self) -> &[InstanceData] {
        &self.instance_data
    }

    pub fn command_capacity(&self) -> usize {
        self.command_capacity
    }

    pub fn instance_capacity(&self) -> usize {
        self.instance_capacity
    }

    /// Buffer reallocations caused by growth
    pub fn reallocation_count(&self) -> usize {
        self.reallocations
    }

    pub fn instance_buffer(&self) -> Option<BufferId> {
        self.instance_buffer
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for buffer in [self.command_buffer.take(), self.instance_buffer.take()].into_iter().flatten() {
            device.delete_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::render::headless::{DrawCall, HeadlessDevice};

    fn indexed_mesh(id: u32) -> Mesh {
        Mesh::new(id, true, 36, id * 36, 0, 0)
    }

    fn translation(x: f32) -> Mat4 {
        Mat4::new_translation(&Vec3::new(x, 0.0, 0.0))
    }

    #[test]
    fn test_command_layouts() {
        assert_eq!(COMMAND_STRIDE, 20);
        assert_eq!(std::mem::size_of::<DrawArraysIndirectCommand>(), 16);
        assert_eq!(std::mem::size_of::<InstanceData>(), 80);
    }

    #[test]
    fn test_base_instance_is_running_count() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut batch = RenderBatch::new("test", 4);
        batch.add_instances(&indexed_mesh(0), DrawMode::Triangles, &[translation(0.0), translation(1.0), translation(2.0)], [1.0, 1.0]);
        batch.add(&Mesh::new(1, false, 6, 100, 0, 2), DrawMode::Triangles, &translation(3.0), [2.0, 2.0]);
        batch.add_instances(&indexed_mesh(2), DrawMode::Triangles, &[translation(4.0), translation(5.0)], [1.0, 1.0]);
        batch.prepare(&mut device).unwrap();

        let mut expected = 0;
        for command in batch.commands() {
            assert_eq!(command.base_instance(), expected);
            expected += command.instance_count();
        }
        assert_eq!(expected as usize, batch.instance_data().len());
        assert_eq!(batch.instance_data()[3].material_index, 2);
        assert_eq!(batch.instance_data()[3].uv_scale, [2.0, 2.0]);
    }

    #[test]
    fn test_empty_batch_issues_nothing() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut batch = RenderBatch::new("empty", 4);
        batch.prepare(&mut device).unwrap();
        assert_eq!(batch.render(&mut device), 0);
        assert!(device.draws().is_empty());
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_growth_reallocates_by_half() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut batch = RenderBatch::new("grow", 16);
        let worlds: Vec<Mat4> = (0..17).map(|i| translation(i as f32)).collect();
        batch.add_instances(&indexed_mesh(0), DrawMode::Triangles, &worlds[..16], [1.0, 1.0]);
        batch.prepare(&mut device).unwrap();
        let first = batch.instance_buffer();
        assert_eq!(batch.reallocation_count(), 0);

        batch.clear();
        batch.add_instances(&indexed_mesh(0), DrawMode::Triangles, &worlds, [1.0, 1.0]);
        batch.prepare(&mut device).unwrap();
        assert_eq!(batch.instance_capacity(), 24);
        assert_eq!(batch.reallocation_count(), 1);
        assert_ne!(batch.instance_buffer(), first);
        assert_eq!(device.live_buffer_count(), 2);
    }

    #[test]
    fn test_render_groups_runs() {
        let mut device = HeadlessDevice::new(8, 8);
        let vb = device.create_buffer(BufferKind::Vertex, 64, "vb").unwrap();
        let ib = device.create_buffer(BufferKind::Index, 64, "ib").unwrap();
        let vao = device.create_vertex_array(vb, Some(ib)).unwrap();
        device.bind_vertex_array(Some(vao));

        let mut batch = RenderBatch::new("runs", 4);
        batch.add(&indexed_mesh(0), DrawMode::Triangles, &translation(0.0), [1.0, 1.0]);
        batch.add_instances(&indexed_mesh(1), DrawMode::Triangles, &[translation(1.0), translation(2.0)], [1.0, 1.0]);
        batch.add(&Mesh::new(2, false, 3, 0, 0, 0), DrawMode::Triangles, &translation(3.0), [1.0, 1.0]);
        batch.prepare(&mut device).unwrap();
        assert_eq!(batch.render(&mut device), 2);

        let draws = device.draws();
        assert_eq!(draws.len(), 2);
        match &draws[0].call {
            DrawCall::Indirect { indexed, commands } => {
                assert!(indexed);
                assert_eq!(commands.len(), 2);
                assert_eq!(commands[1].base_instance, 1);
                assert_eq!(commands[1].first, 36);
            }
            other => panic!("unexpected call {:?}", other),
        }
        match &draws[1].call {
            DrawCall::Indirect { indexed, commands } => {
                assert!(!indexed);
                assert_eq!(commands[0].base_instance, 3);
            }
            other => panic!("unexpected call {:?}", other),
        }
        assert_eq!(device.storage_binding(bindings::INSTANCES), batch.instance_buffer());
    }
}
