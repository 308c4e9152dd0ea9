//! Graphics device abstraction
//!
//! The renderer never talks to a graphics API directly. Everything it needs
//! from the context (buffers, bindless textures, framebuffers, fixed-function
//! state, programs and draws) goes through [`GraphicsDevice`]. The context is
//! single-threaded: one device, one logical thread, every call in frame order.
//!
//! Conventions follow OpenGL 4.6 with `ARB_bindless_texture`: indirect draws
//! read tightly specified command structs from the bound indirect buffer,
//! storage buffers are bound to indexed binding points, and clip space depth
//! runs from -1 to 1.

use std::any::Any;

use bitflags::bitflags;
use slotmap::new_key_type;

use super::RenderResult;
use super::shader::ShaderSource;
use crate::ecs::components::DrawMode;

new_key_type! {
    /// GPU buffer object
    pub struct BufferId;
    /// Texture object
    pub struct TextureId;
    /// Framebuffer object
    pub struct FramebufferId;
    /// Linked shader program
    pub struct ProgramId;
    /// Vertex array object
    pub struct VertexArrayId;
}

/// 64-bit bindless texture handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BindlessHandle(pub u64);

impl BindlessHandle {
    /// `[lo, hi]` 32-bit halves as stored in shader-visible tables
    pub fn split(self) -> [u32; 2] {
        [self.0 as u32, (self.0 >> 32) as u32]
    }

    pub fn from_parts(lo: u32, hi: u32) -> Self {
        Self(((hi as u64) << 32) | lo as u64)
    }
}

/// Optional features reported by the context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub bindless_textures: bool,
    pub multi_draw_indirect: bool,
    pub max_texture_size: u32,
}

/// Intended binding of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Storage,
    Indirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Rgba16F,
    Rgba32F,
    Depth32F,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            TextureFormat::Rgba8 | TextureFormat::Depth32F => 4,
            TextureFormat::Rgba16F => 8,
            TextureFormat::Rgba32F => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32F)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Texture2D,
    /// Six square faces, uploaded +X, -X, +Y, -Y, +Z, -Z
    CubeMap,
}

/// Texture creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub label: String,
}

impl TextureDesc {
    pub fn texture_2d(format: TextureFormat, width: u32, height: u32, label: impl Into<String>) -> Self {
        Self { kind: TextureKind::Texture2D, format, width, height, label: label.into() }
    }

    /// Expected byte length of initial data
    pub fn byte_len(&self) -> usize {
        let faces = match self.kind {
            TextureKind::Texture2D => 1,
            TextureKind::CubeMap => 6,
        };
        self.width as usize * self.height as usize * self.format.bytes_per_texel() * faces
    }
}

/// Framebuffer creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub color_attachments: Vec<TextureId>,
    pub depth_attachment: Option<TextureId>,
}

/// Render target selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferTarget {
    /// The window's framebuffer
    Default,
    Offscreen(FramebufferId),
}

bitflags! {
    /// Buffers touched by a clear
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearMask: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub func: CompareFunc,
}

impl Default for DepthState {
    fn default() -> Self {
        Self { test: true, write: true, func: CompareFunc::Less }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendState {
    pub const DISABLED: BlendState = BlendState {
        enabled: false,
        src: BlendFactor::One,
        dst: BlendFactor::Zero,
    };

    pub const ADDITIVE: BlendState = BlendState {
        enabled: true,
        src: BlendFactor::One,
        dst: BlendFactor::One,
    };
}

impl Default for BlendState {
    fn default() -> Self {
        Self::DISABLED
    }
}

/// Value accepted by [`GraphicsDevice::set_uniform`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([[f32; 4]; 4]),
}

/// Interface to the graphics context
pub trait GraphicsDevice {
    fn capabilities(&self) -> DeviceCapabilities;

    // Buffers

    fn create_buffer(&mut self, kind: BufferKind, size: usize, label: &str) -> RenderResult<BufferId>;

    /// Replace `data.len()` bytes starting at `offset`
    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> RenderResult<()>;

    fn delete_buffer(&mut self, buffer: BufferId);

    /// Bind a storage buffer to an indexed binding point
    fn bind_storage_buffer(&mut self, binding: u32, buffer: BufferId);

    fn bind_indirect_buffer(&mut self, buffer: BufferId);

    /// Create a vertex array sourcing `vertex_buffer` and, optionally, `index_buffer`
    fn create_vertex_array(&mut self, vertex_buffer: BufferId, index_buffer: Option<BufferId>) -> RenderResult<VertexArrayId>;

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>);

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId);

    // Textures

    fn create_texture(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> RenderResult<TextureId>;

    fn delete_texture(&mut self, texture: TextureId);

    /// Bindless handle of a texture (stable for the texture's lifetime)
    fn texture_handle(&mut self, texture: TextureId) -> RenderResult<BindlessHandle>;

    fn make_handle_resident(&mut self, handle: BindlessHandle);

    fn make_handle_non_resident(&mut self, handle: BindlessHandle);

    fn bind_texture_unit(&mut self, unit: u32, texture: Option<TextureId>);

    // Framebuffers

    /// Create a framebuffer. Fails with `FramebufferIncomplete` when the
    /// attachments do not form a complete framebuffer.
    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> RenderResult<FramebufferId>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Swap the depth attachment of an existing framebuffer
    fn set_depth_attachment(&mut self, framebuffer: FramebufferId, texture: TextureId) -> RenderResult<()>;

    fn bind_framebuffer(&mut self, target: FramebufferTarget);

    fn clear(&mut self, mask: ClearMask, color: [f32; 4]);

    /// Copy the depth buffer of `source` into `destination`
    fn blit_depth(&mut self, source: FramebufferId, destination: FramebufferTarget, width: u32, height: u32);

    // Fixed-function state

    fn viewport(&self) -> Viewport;

    fn set_viewport(&mut self, viewport: Viewport);

    fn depth_state(&self) -> DepthState;

    fn set_depth_state(&mut self, state: DepthState);

    fn blend_state(&self) -> BlendState;

    fn set_blend_state(&mut self, state: BlendState);

    // Programs

    /// Compile and link a program. The error string is the compiler log.
    fn compile_program(&mut self, source: &ShaderSource) -> Result<ProgramId, String>;

    fn delete_program(&mut self, program: ProgramId);

    fn use_program(&mut self, program: Option<ProgramId>);

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<i32>;

    /// Set a uniform of the program in use
    fn set_uniform(&mut self, location: i32, value: UniformValue);

    // Draws

    fn draw_arrays(&mut self, mode: DrawMode, first: u32, count: u32);

    /// Issue `draw_count` indirect draws from the bound indirect buffer
    fn multi_draw_indirect(&mut self, mode: DrawMode, indexed: bool, offset: usize, draw_count: usize, stride: usize);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
