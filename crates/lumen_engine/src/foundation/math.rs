//! Linear algebra aliases and the TRS transform
//!
//! Everything is `f32` on top of nalgebra. Projection helpers produce
//! OpenGL clip space: right-handed view space, NDC depth in [-1, 1].

use nalgebra::{Matrix3, Matrix4, UnitQuaternion, Vector2, Vector3, Vector4};

pub type Vec2 = Vector2<f32>;
pub type Vec3 = Vector3<f32>;
pub type Vec4 = Vector4<f32>;
pub type Mat3 = Matrix3<f32>;
pub type Mat4 = Matrix4<f32>;
pub type Point3 = nalgebra::Point3<f32>;
/// Always normalized; build with `from_axis_angle` or `from_euler_angles`
pub type Quat = UnitQuaternion<f32>;

/// Position, rotation and per-axis scale, applied as `T * R * S`
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::new(Vec3::zeros(), Quat::identity(), Vec3::repeat(1.0))
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self { position, rotation, scale }
    }

    pub fn to_matrix(&self) -> Mat4 {
        trs_matrix(&self.position, &self.rotation, &self.scale)
    }

    /// Decompose an affine matrix without shear
    pub fn from_matrix(matrix: &Mat4) -> Self {
        let linear: Mat3 = matrix.fixed_view::<3, 3>(0, 0).into_owned();
        let scale = Vec3::new(
            linear.column(0).norm(),
            linear.column(1).norm(),
            linear.column(2).norm(),
        );
        let mut basis = linear;
        for (i, s) in scale.iter().enumerate() {
            if *s > f32::EPSILON {
                basis.column_mut(i).unscale_mut(*s);
            }
        }
        Self {
            position: matrix.fixed_view::<3, 1>(0, 3).into_owned(),
            rotation: Quat::from_matrix(&basis),
            scale,
        }
    }

    /// Parent-child composition: `self` is the parent
    pub fn combine(&self, child: &Transform) -> Transform {
        Transform {
            position: self.position + self.rotation * self.scale.component_mul(&child.position),
            rotation: self.rotation * child.rotation,
            scale: self.scale.component_mul(&child.scale),
        }
    }

    pub fn inverse(&self) -> Transform {
        let scale = self.scale.map(|s| 1.0 / s);
        let rotation = self.rotation.inverse();
        Transform {
            position: scale.component_mul(&(rotation * -self.position)),
            rotation,
            scale,
        }
    }

    /// Express `world` in the local space of `self`
    ///
    /// Exact for uniform scales; with non-uniform parent scale the rotation
    /// and scale are only approximated.
    pub fn to_local(&self, world: &Transform) -> Transform {
        let inv_rotation = self.rotation.inverse();
        let delta = inv_rotation * (world.position - self.position);
        Transform {
            position: delta.component_div(&self.scale),
            rotation: inv_rotation * world.rotation,
            scale: world.scale.component_div(&self.scale),
        }
    }
}

pub fn trs_matrix(position: &Vec3, rotation: &Quat, scale: &Vec3) -> Mat4 {
    Mat4::new_translation(position) * rotation.to_homogeneous() * Mat4::new_nonuniform_scaling(scale)
}

/// Free helpers for angles, projections and view matrices
pub mod utils {
    use super::{Mat4, Point3, Quat, Vec3};

    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees.to_radians()
    }

    /// Extrinsic X, Y, Z rotation from degrees
    pub fn quat_from_euler_degrees(euler: &Vec3) -> Quat {
        let r = euler.map(f32::to_radians);
        Quat::from_euler_angles(r.x, r.y, r.z)
    }

    /// Inverse of [`quat_from_euler_degrees`]
    pub fn euler_degrees_from_quat(rotation: &Quat) -> Vec3 {
        let (x, y, z) = rotation.euler_angles();
        Vec3::new(x, y, z).map(f32::to_degrees)
    }

    /// `fov_y` is in radians
    pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        Mat4::new_perspective(aspect, fov_y, near, far)
    }

    pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
        Mat4::new_orthographic(left, right, bottom, top, near, far)
    }

    pub fn look_at(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4 {
        Mat4::look_at_rh(&Point3::from(*eye), &Point3::from(*target), up)
    }

    /// World up, or +Z when `direction` is nearly vertical
    pub fn stable_up(direction: &Vec3) -> Vec3 {
        if direction.normalize().y.abs() > 0.99 {
            Vec3::z()
        } else {
            Vec3::y()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_to_local_undoes_combine() {
        let parent = Transform::new(
            Vec3::new(3.0, -1.0, 2.0),
            Quat::from_axis_angle(&Vec3::y_axis(), 0.7),
            Vec3::new(2.0, 2.0, 2.0),
        );
        let world = Transform::new(
            Vec3::new(-4.0, 5.0, 1.0),
            Quat::from_axis_angle(&Vec3::x_axis(), -0.3),
            Vec3::new(1.0, 3.0, 0.5),
        );

        let local = parent.to_local(&world);
        let recombined = parent.combine(&local);

        assert_relative_eq!(recombined.position, world.position, epsilon = 1e-5);
        assert_relative_eq!(recombined.scale, world.scale, epsilon = 1e-5);
        assert!(recombined.rotation.angle_to(&world.rotation) < 1e-4);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Transform::new(
            Vec3::new(2.0, 3.0, 1.0),
            Quat::from_axis_angle(&Vec3::y_axis(), 0.785),
            Vec3::new(2.0, 2.0, 2.0),
        );
        let identity = t.combine(&t.inverse());
        assert_relative_eq!(identity.position, Vec3::zeros(), epsilon = 1e-5);
        assert_relative_eq!(identity.scale, Vec3::new(1.0, 1.0, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_matrix_roundtrip() {
        let t = Transform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_axis_angle(&nalgebra::Unit::new_normalize(Vec3::new(1.0, 1.0, 1.0)), 0.5),
            Vec3::new(2.0, 1.5, 0.8),
        );
        let back = Transform::from_matrix(&t.to_matrix());
        assert_relative_eq!(back.position, t.position, epsilon = 1e-5);
        assert_relative_eq!(back.scale, t.scale, epsilon = 1e-5);
        assert!(back.rotation.coords.dot(&t.rotation.coords).abs() > 0.999);
    }

    #[test]
    fn test_euler_quaternion_sync() {
        let euler = Vec3::new(10.0, 45.0, -30.0);
        let q = utils::quat_from_euler_degrees(&euler);
        let back = utils::euler_degrees_from_quat(&q);
        assert_relative_eq!(back, euler, epsilon = 1e-3);
    }
}
