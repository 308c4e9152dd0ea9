//! Recording graphics device
//!
//! `HeadlessDevice` implements [`GraphicsDevice`] without a GPU. It keeps the
//! bytes of every buffer, tracks bindless residency, validates framebuffers,
//! serves uniform locations parsed from `uniform` declarations and records
//! each draw, decoding indirect command buffers, so the whole frame graph can
//! run and be inspected in tests and offline tools.

use std::any::Any;
use std::collections::{HashMap, HashSet};

use slotmap::SlotMap;

use super::device::*;
use super::shader::ShaderSource;
use super::{RenderError, RenderResult};
use crate::ecs::components::DrawMode;

/// One decoded indirect draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectDraw {
    pub count: u32,
    pub instance_count: u32,
    /// First index (indexed) or first vertex (arrays)
    pub first: u32,
    pub base_vertex: i32,
    pub base_instance: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawCall {
    Arrays { first: u32, count: u32 },
    Indirect { indexed: bool, commands: Vec<IndirectDraw> },
}

/// Snapshot of the state a draw was issued under
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: Option<ProgramId>,
    pub program_label: Option<String>,
    pub target: FramebufferTarget,
    pub mode: DrawMode,
    pub viewport: Viewport,
    pub depth: DepthState,
    pub blend: BlendState,
    pub call: DrawCall,
}

impl DrawRecord {
    /// Instances drawn by this record
    pub fn instance_total(&self) -> u32 {
        match &self.call {
            DrawCall::Arrays { .. } => 1,
            DrawCall::Indirect { commands, .. } => commands.iter().map(|c| c.instance_count).sum(),
        }
    }
}

#[derive(Debug)]
struct HeadlessBuffer {
    kind: BufferKind,
    label: String,
    data: Vec<u8>,
    writes: usize,
}

#[derive(Debug)]
struct HeadlessTexture {
    desc: TextureDesc,
    handle: Option<BindlessHandle>,
}

#[derive(Debug)]
struct HeadlessProgram {
    label: String,
    locations: HashMap<String, i32>,
    values: HashMap<i32, UniformValue>,
}

/// GPU-less [`GraphicsDevice`]
#[derive(Debug)]
pub struct HeadlessDevice {
    capabilities: DeviceCapabilities,
    buffers: SlotMap<BufferId, HeadlessBuffer>,
    vertex_arrays: SlotMap<VertexArrayId, (BufferId, Option<BufferId>)>,
    textures: SlotMap<TextureId, HeadlessTexture>,
    framebuffers: SlotMap<FramebufferId, FramebufferDesc>,
    programs: SlotMap<ProgramId, HeadlessProgram>,
    resident: HashSet<BindlessHandle>,
    next_handle: u64,
    textures_created: usize,
    storage_bindings: HashMap<u32, BufferId>,
    indirect_buffer: Option<BufferId>,
    vertex_array: Option<VertexArrayId>,
    texture_units: HashMap<u32, TextureId>,
    target: FramebufferTarget,
    viewport: Viewport,
    depth: DepthState,
    blend: BlendState,
    program: Option<ProgramId>,
    draws: Vec<DrawRecord>,
    clears: Vec<(FramebufferTarget, ClearMask)>,
    depth_blits: usize,
}

impl HeadlessDevice {
    /// Device with every optional feature, sized for a `width` x `height` window
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            capabilities: DeviceCapabilities {
                bindless_textures: true,
                multi_draw_indirect: true,
                max_texture_size: 16384,
            },
            buffers: SlotMap::with_key(),
            vertex_arrays: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            resident: HashSet::new(),
            next_handle: 1 << 32,
            textures_created: 0,
            storage_bindings: HashMap::new(),
            indirect_buffer: None,
            vertex_array: None,
            texture_units: HashMap::new(),
            target: FramebufferTarget::Default,
            viewport: Viewport::new(0, 0, width, height),
            depth: DepthState::default(),
            blend: BlendState::DISABLED,
            program: None,
            draws: Vec::new(),
            clears: Vec::new(),
            depth_blits: 0,
        }
    }

    /// Device reporting no bindless texture support
    pub fn without_bindless(width: u32, height: u32) -> Self {
        let mut device = Self::new(width, height);
        device.capabilities.bindless_textures = false;
        device
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }

    /// Draws issued with the program of the given label
    pub fn draws_with_program(&self, label: &str) -> Vec<&DrawRecord> {
        self.draws.iter().filter(|d| d.program_label.as_deref() == Some(label)).collect()
    }

    pub fn clears(&self) -> &[(FramebufferTarget, ClearMask)] {
        &self.clears
    }

    pub fn depth_blit_count(&self) -> usize {
        self.depth_blits
    }

    pub fn buffer_data(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(buffer).map(|b| b.data.as_slice())
    }

    pub fn buffer_label(&self, buffer: BufferId) -> Option<&str> {
        self.buffers.get(buffer).map(|b| b.label.as_str())
    }

    /// Number of `write_buffer` calls a buffer received
    pub fn buffer_write_count(&self, buffer: BufferId) -> usize {
        self.buffers.get(buffer).map(|b| b.writes).unwrap_or(0)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_vertex_array_count(&self) -> usize {
        self.vertex_arrays.len()
    }

    pub fn storage_binding(&self, binding: u32) -> Option<BufferId> {
        self.storage_bindings.get(&binding).copied()
    }

    pub fn is_resident(&self, handle: BindlessHandle) -> bool {
        self.resident.contains(&handle)
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Textures created over the device's lifetime
    pub fn textures_created(&self) -> usize {
        self.textures_created
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc> {
        self.textures.get(texture).map(|t| &t.desc)
    }

    pub fn framebuffer_desc(&self, framebuffer: FramebufferId) -> Option<&FramebufferDesc> {
        self.framebuffers.get(framebuffer)
    }

    /// Last value written to a named uniform of a program
    pub fn uniform(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let program = self.programs.get(program)?;
        let location = program.locations.get(name)?;
        program.values.get(location).copied()
    }

    pub fn program_label(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(program).map(|p| p.label.as_str())
    }

    fn record(&mut self, mode: DrawMode, call: DrawCall) {
        let program_label = self.program.and_then(|p| self.programs.get(p)).map(|p| p.label.clone());
        self.draws.push(DrawRecord {
            program: self.program,
            program_label,
            target: self.target,
            mode,
            viewport: self.viewport,
            depth: self.depth,
            blend: self.blend,
            call,
        });
    }

    fn check_attachments(&self, desc: &FramebufferDesc) -> Result<(), String> {
        if desc.color_attachments.is_empty() && desc.depth_attachment.is_none() {
            return Err("no attachments".to_string());
        }
        for (i, id) in desc.color_attachments.iter().enumerate() {
            let texture = self.textures.get(*id).ok_or_else(|| format!("color attachment {} missing", i))?;
            if texture.desc.format.is_depth() {
                return Err(format!("color attachment {} has a depth format", i));
            }
            if texture.desc.width != desc.width || texture.desc.height != desc.height {
                return Err(format!("color attachment {} size mismatch", i));
            }
        }
        if let Some(id) = desc.depth_attachment {
            let texture = self.textures.get(id).ok_or("depth attachment missing")?;
            if !texture.desc.format.is_depth() {
                return Err("depth attachment has a color format".to_string());
            }
            if texture.desc.width != desc.width || texture.desc.height != desc.height {
                return Err("depth attachment size mismatch".to_string());
            }
        }
        Ok(())
    }
}

/// Collect `uniform <type> <name>[N];` declarations in declaration order
fn parse_uniforms(source: &str) -> Vec<(String, usize)> {
    let mut uniforms = Vec::new();
    for line in source.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("uniform ") else {
            continue;
        };
        if rest.contains('{') {
            continue;
        }
        let declaration = rest.trim_end_matches(';').trim();
        let Some(name) = declaration.split_whitespace().last() else {
            continue;
        };
        match name.split_once('[') {
            Some((base, len)) => {
                let count = len.trim_end_matches(']').parse().unwrap_or(1);
                uniforms.push((base.to_string(), count));
            }
            None => uniforms.push((name.to_string(), 0)),
        }
    }
    uniforms
}

fn read_words(data: &[u8], offset: usize, count: usize) -> Option<Vec<u32>> {
    let bytes = data.get(offset..offset + count * 4)?;
    Some(bytes.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}

impl GraphicsDevice for HeadlessDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_buffer(&mut self, kind: BufferKind, size: usize, label: &str) -> RenderResult<BufferId> {
        let id = self.buffers.insert(HeadlessBuffer {
            kind,
            label: label.to_string(),
            data: vec![0; size],
            writes: 0,
        });
        log::trace!("Created {:?} buffer '{}' ({} bytes)", kind, label, size);
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> RenderResult<()> {
        let target = self.buffers.get_mut(buffer)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("buffer {:?}", buffer)))?;
        let end = offset + data.len();
        if end > target.data.len() {
            return Err(RenderError::Backend(format!(
                "write of {} bytes at {} overruns '{}' ({} bytes)",
                data.len(), offset, target.label, target.data.len()
            )));
        }
        target.data[offset..end].copy_from_slice(data);
        target.writes += 1;
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(buffer);
        self.storage_bindings.retain(|_, b| *b != buffer);
        if self.indirect_buffer == Some(buffer) {
            self.indirect_buffer = None;
        }
    }

    fn bind_storage_buffer(&mut self, binding: u32, buffer: BufferId) {
        match self.buffers.get(buffer) {
            Some(b) if b.kind == BufferKind::Storage => {
                self.storage_bindings.insert(binding, buffer);
            }
            Some(b) => log::error!("Buffer '{}' bound as storage but created as {:?}", b.label, b.kind),
            None => log::error!("bind_storage_buffer with unknown buffer {:?}", buffer),
        }
    }

    fn bind_indirect_buffer(&mut self, buffer: BufferId) {
        self.indirect_buffer = Some(buffer);
    }

    fn create_vertex_array(&mut self, vertex_buffer: BufferId, index_buffer: Option<BufferId>) -> RenderResult<VertexArrayId> {
        if !self.buffers.contains_key(vertex_buffer) {
            return Err(RenderError::ResourceNotFound("vertex buffer".to_string()));
        }
        Ok(self.vertex_arrays.insert((vertex_buffer, index_buffer)))
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        self.vertex_array = vertex_array;
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        if self.vertex_arrays.remove(vertex_array).is_none() {
            log::warn!("delete_vertex_array with unknown id {:?}", vertex_array);
        }
        if self.vertex_array == Some(vertex_array) {
            self.vertex_array = None;
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> RenderResult<TextureId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::Backend(format!("texture '{}' has zero size", desc.label)));
        }
        let max = self.capabilities.max_texture_size;
        if desc.width > max || desc.height > max {
            return Err(RenderError::Backend(format!(
                "texture '{}' ({}x{}) exceeds {}", desc.label, desc.width, desc.height, max
            )));
        }
        if let Some(bytes) = data {
            if bytes.len() != desc.byte_len() {
                return Err(RenderError::Backend(format!(
                    "texture '{}' expects {} bytes, got {}", desc.label, desc.byte_len(), bytes.len()
                )));
            }
        }
        self.textures_created += 1;
        Ok(self.textures.insert(HeadlessTexture { desc: desc.clone(), handle: None }))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(removed) = self.textures.remove(texture) {
            if let Some(handle) = removed.handle {
                if self.resident.remove(&handle) {
                    log::warn!("Texture '{}' deleted while its handle was resident", removed.desc.label);
                }
            }
        }
        self.texture_units.retain(|_, t| *t != texture);
    }

    fn texture_handle(&mut self, texture: TextureId) -> RenderResult<BindlessHandle> {
        if !self.capabilities.bindless_textures {
            return Err(RenderError::MissingFeature("bindless textures"));
        }
        let next = self.next_handle;
        let entry = self.textures.get_mut(texture)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("texture {:?}", texture)))?;
        match entry.handle {
            Some(handle) => Ok(handle),
            None => {
                let handle = BindlessHandle(next);
                entry.handle = Some(handle);
                self.next_handle += 1;
                Ok(handle)
            }
        }
    }

    fn make_handle_resident(&mut self, handle: BindlessHandle) {
        if !self.resident.insert(handle) {
            log::warn!("Handle {:#x} made resident twice", handle.0);
        }
    }

    fn make_handle_non_resident(&mut self, handle: BindlessHandle) {
        if !self.resident.remove(&handle) {
            log::warn!("Handle {:#x} was not resident", handle.0);
        }
    }

    fn bind_texture_unit(&mut self, unit: u32, texture: Option<TextureId>) {
        match texture {
            Some(t) => {
                self.texture_units.insert(unit, t);
            }
            None => {
                self.texture_units.remove(&unit);
            }
        }
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> RenderResult<FramebufferId> {
        if let Err(reason) = self.check_attachments(desc) {
            log::error!("Framebuffer '{}' incomplete: {}", desc.label, reason);
            return Err(RenderError::FramebufferIncomplete(desc.label.clone()));
        }
        Ok(self.framebuffers.insert(desc.clone()))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer);
        if self.target == FramebufferTarget::Offscreen(framebuffer) {
            self.target = FramebufferTarget::Default;
        }
    }

    fn set_depth_attachment(&mut self, framebuffer: FramebufferId, texture: TextureId) -> RenderResult<()> {
        let mut desc = self.framebuffers.get(framebuffer)
            .cloned()
            .ok_or_else(|| RenderError::ResourceNotFound(format!("framebuffer {:?}", framebuffer)))?;
        let size = self.textures.get(texture)
            .map(|t| (t.desc.width, t.desc.height))
            .ok_or_else(|| RenderError::ResourceNotFound(format!("texture {:?}", texture)))?;
        desc.depth_attachment = Some(texture);
        desc.width = size.0;
        desc.height = size.1;
        if let Err(reason) = self.check_attachments(&desc) {
            log::error!("Framebuffer '{}' incomplete: {}", desc.label, reason);
            return Err(RenderError::FramebufferIncomplete(desc.label));
        }
        self.framebuffers[framebuffer] = desc;
        Ok(())
    }

    fn bind_framebuffer(&mut self, target: FramebufferTarget) {
        self.target = target;
    }

    fn clear(&mut self, mask: ClearMask, _color: [f32; 4]) {
        self.clears.push((self.target, mask));
    }

    fn blit_depth(&mut self, source: FramebufferId, _destination: FramebufferTarget, _width: u32, _height: u32) {
        match self.framebuffers.get(source) {
            Some(desc) if desc.depth_attachment.is_some() => self.depth_blits += 1,
            _ => log::error!("blit_depth from framebuffer without depth {:?}", source),
        }
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn depth_state(&self) -> DepthState {
        self.depth
    }

    fn set_depth_state(&mut self, state: DepthState) {
        self.depth = state;
    }

    fn blend_state(&self) -> BlendState {
        self.blend
    }

    fn set_blend_state(&mut self, state: BlendState) {
        self.blend = state;
    }

    fn compile_program(&mut self, source: &ShaderSource) -> Result<ProgramId, String> {
        let mut locations = HashMap::new();
        for (stage, text) in source.stage_sources() {
            if text.trim().is_empty() {
                return Err(format!("{} stage: empty source", stage));
            }
            if !text.contains("void main") {
                return Err(format!("{} stage: 0:1: error: missing entry point 'main'", stage));
            }
            if let Some(line) = text.lines().position(|l| l.trim_start().starts_with("#error")) {
                return Err(format!("{} stage: 0:{}: error: #error directive", stage, line + 1));
            }
            for (name, count) in parse_uniforms(text) {
                let next = locations.len() as i32;
                locations.entry(name.clone()).or_insert(next);
                for i in 0..count {
                    let next = locations.len() as i32;
                    locations.entry(format!("{}[{}]", name, i)).or_insert(next);
                }
            }
        }
        Ok(self.programs.insert(HeadlessProgram {
            label: source.label.clone(),
            locations,
            values: HashMap::new(),
        }))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.program = program;
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<i32> {
        self.programs.get(program)?.locations.get(name).copied()
    }

    fn set_uniform(&mut self, location: i32, value: UniformValue) {
        match self.program.and_then(|p| self.programs.get_mut(p)) {
            Some(program) => {
                program.values.insert(location, value);
            }
            None => log::error!("set_uniform with no program in use"),
        }
    }

    fn draw_arrays(&mut self, mode: DrawMode, first: u32, count: u32) {
        self.record(mode, DrawCall::Arrays { first, count });
    }

    fn multi_draw_indirect(&mut self, mode: DrawMode, indexed: bool, offset: usize, draw_count: usize, stride: usize) {
        let Some(buffer) = self.indirect_buffer.and_then(|b| self.buffers.get(b)) else {
            log::error!("multi_draw_indirect with no indirect buffer bound");
            return;
        };
        if indexed && self.vertex_array.and_then(|v| self.vertex_arrays.get(v)).and_then(|v| v.1).is_none() {
            log::error!("indexed indirect draw with no index buffer bound");
            return;
        }

        let words = if indexed { 5 } else { 4 };
        let mut commands = Vec::with_capacity(draw_count);
        for i in 0..draw_count {
            let Some(w) = read_words(&buffer.data, offset + i * stride, words) else {
                log::error!("indirect command {} reads past '{}'", i, buffer.label);
                return;
            };
            commands.push(if indexed {
                IndirectDraw { count: w[0], instance_count: w[1], first: w[2], base_vertex: w[3] as i32, base_instance: w[4] }
            } else {
                IndirectDraw { count: w[0], instance_count: w[1], first: w[2], base_vertex: 0, base_instance: w[3] }
            });
        }
        self.record(mode, DrawCall::Indirect { indexed, commands });
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

    #[test]
    fn test_parse_uniform_arrays() {
        let uniforms = parse_uniforms("uniform mat4 u_view;\nuniform vec3 u_dir[4];\nuniform Block { int x; };\n");
        assert_eq!(uniforms, vec![("u_view".to_string(), 0), ("u_dir".to_string(), 4)]);
    }

    #[test]
    fn test_compile_failure_reports_log() {
        let mut device = HeadlessDevice::new(64, 64);
        let bad = ShaderSource::graphics("bad", "void main() {}", "#error nope\nvoid main() {}");
        let log = device.compile_program(&bad).unwrap_err();
        assert!(log.contains("fragment"));
    }

    #[test]
    fn test_incomplete_framebuffer_rejected() {
        let mut device = HeadlessDevice::new(64, 64);
        let color = device.create_texture(&TextureDesc::texture_2d(TextureFormat::Rgba8, 32, 32, "c"), None).unwrap();
        let desc = FramebufferDesc {
            label: "mismatch".to_string(),
            width: 64,
            height: 64,
            color_attachments: vec![color],
            depth_attachment: None,
        };
        assert!(matches!(device.create_framebuffer(&desc), Err(RenderError::FramebufferIncomplete(_))));
    }

    #[test]
    fn test_texture_handles_are_stable() {
        let mut device = HeadlessDevice::new(64, 64);
        let t = device.create_texture(&TextureDesc::texture_2d(TextureFormat::Rgba8, 4, 4, "t"), None).unwrap();
        let a = device.texture_handle(t).unwrap();
        let b = device.texture_handle(t).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.split()[1], 0);
    }
}
