//! GPU-visible light records
//!
//! Layouts match the std430 structs in `deferred_light.frag`. Every record is
//! a multiple of 16 bytes and fields are grouped into `vec4`-sized runs.
//! Shadow and matrix indices are `-1` for lights without a shadow map.

use bytemuck::{Pod, Zeroable};

use super::device::BindlessHandle;
use crate::foundation::math::Vec3;

/// Sentinel for "no shadow map" / "no light-space matrix"
pub const NO_SHADOW: i32 = -1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointLightData {
    /// xyz position, w radius
    pub position_radius: [f32; 4],
    /// rgb color, w intensity
    pub color_intensity: [f32; 4],
    pub shadow_index: i32,
    /// First of six consecutive face matrices
    pub matrix_index: i32,
    pub far_plane: f32,
    pub _pad: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SpotLightData {
    /// xyz position, w range
    pub position_range: [f32; 4],
    /// xyz direction, w cosine of the outer cutoff
    pub direction_outer_cos: [f32; 4],
    pub color_intensity: [f32; 4],
    pub inner_cos: f32,
    pub shadow_index: i32,
    pub matrix_index: i32,
    pub _pad: f32,
}

/// Directional light record. The light pass mirrors these into uniforms.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DirectionalLightData {
    pub direction: [f32; 4],
    pub color_intensity: [f32; 4],
    pub shadow_index: i32,
    pub matrix_index: i32,
    pub cascade_count: i32,
    pub _pad: i32,
}

/// Bindless handle as the `uvec2` the shaders read
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ShadowHandle {
    pub lo: u32,
    pub hi: u32,
}

impl From<BindlessHandle> for ShadowHandle {
    fn from(handle: BindlessHandle) -> Self {
        let [lo, hi] = handle.split();
        Self { lo, hi }
    }
}

impl PointLightData {
    pub fn new(position: &Vec3, radius: f32, color: &Vec3, intensity: f32) -> Self {
        Self {
            position_radius: [position.x, position.y, position.z, radius],
            color_intensity: [color.x, color.y, color.z, intensity],
            shadow_index: NO_SHADOW,
            matrix_index: NO_SHADOW,
            far_plane: radius,
            _pad: 0.0,
        }
    }
}

impl SpotLightData {
    /// Cutoff angles are in degrees and stored as cosines
    pub fn new(
        position: &Vec3,
        direction: &Vec3,
        range: f32,
        inner_cutoff_degrees: f32,
        outer_cutoff_degrees: f32,
        color: &Vec3,
        intensity: f32,
    ) -> Self {
        Self {
            position_range: [position.x, position.y, position.z, range],
            direction_outer_cos: [
                direction.x,
                direction.y,
                direction.z,
                outer_cutoff_degrees.to_radians().cos(),
            ],
            color_intensity: [color.x, color.y, color.z, intensity],
            inner_cos: inner_cutoff_degrees.to_radians().cos(),
            shadow_index: NO_SHADOW,
            matrix_index: NO_SHADOW,
            _pad: 0.0,
        }
    }
}

impl DirectionalLightData {
    pub fn new(direction: &Vec3, color: &Vec3, intensity: f32) -> Self {
        Self {
            direction: [direction.x, direction.y, direction.z, 0.0],
            color_intensity: [color.x, color.y, color.z, intensity],
            shadow_index: NO_SHADOW,
            matrix_index: NO_SHADOW,
            cascade_count: 0,
            _pad: 0,
        }
    }

    pub fn direction(&self) -> Vec3 {
        Vec3::new(self.direction[0], self.direction[1], self.direction[2])
    }

    pub fn color(&self) -> Vec3 {
        Vec3::new(self.color_intensity[0], self.color_intensity[1], self.color_intensity[2])
    }
}
