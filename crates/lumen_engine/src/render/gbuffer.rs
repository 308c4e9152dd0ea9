//! G-buffer: the geometry pass's multi-target framebuffer
//!
//! Attachments, in shader output order: world position, normal, albedo,
//! PBR parameters (metallic, roughness, occlusion) and emissive color, plus a
//! depth texture that the geometry pass blits into the default framebuffer.

use super::device::{FramebufferDesc, FramebufferId, GraphicsDevice, TextureDesc, TextureFormat, TextureId};
use super::RenderResult;

/// Color attachment slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GBufferChannel {
    Position = 0,
    Normal = 1,
    Albedo = 2,
    Pbr = 3,
    Emissive = 4,
}

impl GBufferChannel {
    pub const ALL: [GBufferChannel; 5] = [
        GBufferChannel::Position,
        GBufferChannel::Normal,
        GBufferChannel::Albedo,
        GBufferChannel::Pbr,
        GBufferChannel::Emissive,
    ];

    /// Sampler uniform reading this channel
    pub fn sampler_name(self) -> &'static str {
        match self {
            GBufferChannel::Position => "u_gPosition",
            GBufferChannel::Normal => "u_gNormal",
            GBufferChannel::Albedo => "u_gAlbedo",
            GBufferChannel::Pbr => "u_gPbr",
            GBufferChannel::Emissive => "u_gEmissive",
        }
    }

    fn format(self) -> TextureFormat {
        match self {
            GBufferChannel::Position | GBufferChannel::Normal => TextureFormat::Rgba32F,
            GBufferChannel::Albedo => TextureFormat::Rgba8,
            GBufferChannel::Pbr | GBufferChannel::Emissive => TextureFormat::Rgba16F,
        }
    }
}

#[derive(Debug)]
pub struct GBuffer {
    framebuffer: FramebufferId,
    colors: [TextureId; 5],
    depth: TextureId,
    width: u32,
    height: u32,
}

impl GBuffer {
    /// Allocate all attachments. An incomplete framebuffer is an error.
    pub fn new(device: &mut dyn GraphicsDevice, width: u32, height: u32) -> RenderResult<Self> {
        let mut colors = Vec::with_capacity(GBufferChannel::ALL.len());
        for channel in GBufferChannel::ALL {
            let desc = TextureDesc::texture_2d(channel.format(), width, height, format!("gbuffer_{:?}", channel));
            match device.create_texture(&desc, None) {
                Ok(texture) => colors.push(texture),
                Err(e) => {
                    colors.into_iter().for_each(|t| device.delete_texture(t));
                    return Err(e);
                }
            }
        }
        let depth = match device.create_texture(
            &TextureDesc::texture_2d(TextureFormat::Depth32F, width, height, "gbuffer_depth"),
            None,
        ) {
            Ok(depth) => depth,
            Err(e) => {
                colors.into_iter().for_each(|t| device.delete_texture(t));
                return Err(e);
            }
        };

        let desc = FramebufferDesc {
            label: "gbuffer".to_string(),
            width,
            height,
            color_attachments: colors.clone(),
            depth_attachment: Some(depth),
        };
        let framebuffer = match device.create_framebuffer(&desc) {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                colors.into_iter().chain(Some(depth)).for_each(|t| device.delete_texture(t));
                log::error!("G-buffer incomplete: {}", e);
                return Err(e);
            }
        };

        let colors = [colors[0], colors[1], colors[2], colors[3], colors[4]];
        log::debug!("G-buffer created at {}x{}", width, height);
        Ok(Self { framebuffer, colors, depth, width, height })
    }

    /// Recreate at a new size. No-op if the size is unchanged.
    pub fn resize(&mut self, device: &mut dyn GraphicsDevice, width: u32, height: u32) -> RenderResult<()> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        let replacement = GBuffer::new(device, width, height)?;
        let old = std::mem::replace(self, replacement);
        old.release(device);
        Ok(())
    }

    pub fn release(&self, device: &mut dyn GraphicsDevice) {
        device.delete_framebuffer(self.framebuffer);
        for texture in self.colors.iter().copied().chain(Some(self.depth)) {
            device.delete_texture(texture);
        }
    }

    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    pub fn texture(&self, channel: GBufferChannel) -> TextureId {
        self.colors[channel as usize]
    }

    pub fn depth_texture(&self) -> TextureId {
        self.depth
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bind every channel to consecutive texture units starting at 0.
    /// Returns the next free unit.
    pub fn bind_textures(&self, device: &mut dyn GraphicsDevice) -> u32 {
        for (unit, texture) in self.colors.iter().enumerate() {
            device.bind_texture_unit(unit as u32, Some(*texture));
        }
        self.colors.len() as u32
    }
}
