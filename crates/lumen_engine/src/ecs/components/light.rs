//! Light components

use crate::foundation::math::Mat4;
use crate::foundation::math::Vec3;
use crate::render::BindlessHandle;

/// Slots in a [`LightSpaceMatrixArray`]: six cube faces or up to six cascades
pub const LIGHT_SPACE_ARRAY_SIZE: usize = 6;

/// Variant-specific light parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Point {
        radius: f32,
    },
    Spot {
        /// Full-intensity cone half angle in degrees
        inner_cutoff: f32,
        /// Falloff cone half angle in degrees
        outer_cutoff: f32,
        range: f32,
    },
    Directional {
        /// Half extent of the single-map orthographic projection
        ortho_size: f32,
    },
}

/// Light source. Position comes from the entity's world matrix and the
/// direction from its rotation (forward is -Z).
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub active: bool,
    pub cast_shadows: bool,
    /// Bindless handle of the shadow map, written by the shadow pass
    pub depth_handle: Option<BindlessHandle>,
}

impl Light {
    pub fn point(color: Vec3, intensity: f32, radius: f32) -> Self {
        Self::with_kind(LightKind::Point { radius }, color, intensity)
    }

    pub fn spot(color: Vec3, intensity: f32, inner_cutoff: f32, outer_cutoff: f32, range: f32) -> Self {
        Self::with_kind(LightKind::Spot { inner_cutoff, outer_cutoff, range }, color, intensity)
    }

    pub fn directional(color: Vec3, intensity: f32, ortho_size: f32) -> Self {
        Self::with_kind(LightKind::Directional { ortho_size }, color, intensity)
    }

    fn with_kind(kind: LightKind, color: Vec3, intensity: f32) -> Self {
        Self {
            kind,
            color,
            intensity,
            active: true,
            cast_shadows: false,
            depth_handle: None,
        }
    }

    pub fn with_shadows(mut self) -> Self {
        self.cast_shadows = true;
        self
    }

    pub fn is_point(&self) -> bool {
        matches!(self.kind, LightKind::Point { .. })
    }

    pub fn is_spot(&self) -> bool {
        matches!(self.kind, LightKind::Spot { .. })
    }

    pub fn is_directional(&self) -> bool {
        matches!(self.kind, LightKind::Directional { .. })
    }
}

/// Single light-space transform (spot lights, single-map directional lights)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSpaceMatrix {
    pub matrix: Mat4,
}

/// Fixed array of light-space transforms (point light faces, cascades)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSpaceMatrixArray {
    pub matrices: [Mat4; LIGHT_SPACE_ARRAY_SIZE],
    /// Far view depth of each cascade; unused for point lights
    pub split_depths: [f32; LIGHT_SPACE_ARRAY_SIZE],
    pub count: usize,
}

impl Default for LightSpaceMatrixArray {
    fn default() -> Self {
        Self {
            matrices: [Mat4::identity(); LIGHT_SPACE_ARRAY_SIZE],
            split_depths: [0.0; LIGHT_SPACE_ARRAY_SIZE],
            count: 0,
        }
    }
}

impl LightSpaceMatrixArray {
    /// Filled entries only
    pub fn active(&self) -> &[Mat4] {
        &self.matrices[..self.count]
    }

    pub fn active_splits(&self) -> &[f32] {
        &self.split_depths[..self.count]
    }
}
