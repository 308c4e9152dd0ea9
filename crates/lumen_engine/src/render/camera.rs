//! Perspective camera
//!
//! Right-handed, Y-up, looking down its local -Z axis (OpenGL convention).
//! Matrices are computed on demand.

use crate::foundation::math::{utils, Mat4, Quat, Vec3};

/// Perspective camera
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Quat,
    /// Vertical field of view in degrees
    pub fov_y_degrees: f32,
    /// Width over height
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            fov_y_degrees: 60.0,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn perspective(position: Vec3, fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self { position, rotation: Quat::identity(), fov_y_degrees, aspect, near, far }
    }

    /// Orient the camera so it looks at `target`
    ///
    /// Does nothing if `target` coincides with the camera position.
    pub fn look_at(mut self, target: Vec3) -> Self {
        self.set_target(&target);
        self
    }

    pub fn set_target(&mut self, target: &Vec3) {
        let back = self.position - target;
        if back.norm_squared() < f32::EPSILON {
            return;
        }
        let up = utils::stable_up(&back);
        self.rotation = Quat::face_towards(&back, &up);
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::z()
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::y()
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::x()
    }

    pub fn view_matrix(&self) -> Mat4 {
        let rotation = self.rotation.inverse().to_homogeneous();
        rotation * Mat4::new_translation(&-self.position)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        utils::perspective(utils::deg_to_rad(self.fov_y_degrees), self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Projection over a sub-range of the view depth, used for cascade slices
    pub fn projection_for_range(&self, near: f32, far: f32) -> Mat4 {
        utils::perspective(utils::deg_to_rad(self.fov_y_degrees), self.aspect, near, far)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::foundation::math::Vec4;

    #[test]
    fn test_default_looks_down_negative_z() {
        let camera = Camera::default();
        assert_relative_eq!(camera.forward(), -Vec3::z());
        assert_relative_eq!(camera.view_matrix(), Mat4::identity());
    }

    #[test]
    fn test_look_at_centers_target() {
        let camera = Camera::perspective(Vec3::new(3.0, 4.0, 5.0), 60.0, 1.0, 0.1, 50.0)
            .look_at(Vec3::new(-1.0, 0.0, 2.0));
        let expected = (Vec3::new(-1.0, 0.0, 2.0) - camera.position).normalize();
        assert_relative_eq!(camera.forward(), expected, epsilon = 1e-5);

        let clip = camera.view_projection() * Vec4::new(-1.0, 0.0, 2.0, 1.0);
        assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_view_matrix_inverts_pose() {
        let camera = Camera::perspective(Vec3::new(1.0, 2.0, 3.0), 45.0, 1.5, 0.1, 10.0)
            .look_at(Vec3::zeros());
        let world = Mat4::new_translation(&camera.position) * camera.rotation.to_homogeneous();
        assert_relative_eq!(camera.view_matrix() * world, Mat4::identity(), epsilon = 1e-5);
    }
}
