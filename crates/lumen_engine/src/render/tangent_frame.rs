//! Packed tangent-frame quaternions
//!
//! A vertex's normal, tangent and handedness are stored as one quaternion `q`
//! that rotates the canonical basis onto `[tangent, normal x tangent, normal]`
//! (the columns of the frame matrix). Shaders recover
//!
//! - `tangent = q * +X`
//! - `normal = q * +Z`
//! - `bitangent = sign(q.w) * cross(tangent, normal)`
//!
//! `q` is normalized to `w >= 0` and then `w` is kept at least [`QUAT_BIAS`]
//! so that its sign survives 16-bit snorm quantization. The sign of `w` then
//! carries handedness: the quaternion is negated when
//! `dot(cross(tangent, normal), bitangent) < 0`.

use nalgebra::{Quaternion, Rotation3, UnitQuaternion};

use crate::foundation::math::{Mat3, Vec3};

/// Smallest `|w|` kept by the encoding, one step of a 16-bit snorm
pub const QUAT_BIAS: f32 = 1.0 / 32767.0;

/// Pack a frame into a quaternion
///
/// `tangent` is orthogonalized against `normal` first. `bitangent` is only
/// used for its handedness.
pub fn pack(normal: &Vec3, tangent: &Vec3, bitangent: &Vec3) -> Quaternion<f32> {
    let n = normal.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::z);
    let t = orthogonal_tangent(&n, tangent);

    let frame = Mat3::from_columns(&[t, n.cross(&t), n]);
    let mut q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(frame)).into_inner();

    if q.w < 0.0 {
        q = -q;
    }

    if q.w < QUAT_BIAS {
        let xyz = q.imag();
        let scale = (1.0 - QUAT_BIAS * QUAT_BIAS).sqrt() / xyz.norm();
        q = Quaternion::new(QUAT_BIAS, xyz.x * scale, xyz.y * scale, xyz.z * scale);
    }

    if t.cross(&n).dot(bitangent) < 0.0 {
        q = -q;
    }
    q
}

/// Recover `(normal, tangent, bitangent)` from a packed quaternion
pub fn unpack(q: &Quaternion<f32>) -> (Vec3, Vec3, Vec3) {
    let handedness = if q.w < 0.0 { -1.0 } else { 1.0 };
    let rotation = UnitQuaternion::from_quaternion(*q);
    let tangent = rotation * Vec3::x();
    let normal = rotation * Vec3::z();
    let bitangent = tangent.cross(&normal) * handedness;
    (normal, tangent, bitangent)
}

/// Quantize to four 16-bit snorm components in `x, y, z, w` order
pub fn to_snorm16(q: &Quaternion<f32>) -> [i16; 4] {
    let encode = |v: f32| (v.clamp(-1.0, 1.0) * 32767.0).round() as i16;
    [encode(q.i), encode(q.j), encode(q.k), encode(q.w)]
}

pub fn from_snorm16(packed: [i16; 4]) -> Quaternion<f32> {
    let decode = |v: i16| (v as f32 / 32767.0).max(-1.0);
    Quaternion::new(decode(packed[3]), decode(packed[0]), decode(packed[1]), decode(packed[2]))
}

/// `tangent` with its `normal` component removed; any perpendicular if degenerate
fn orthogonal_tangent(normal: &Vec3, tangent: &Vec3) -> Vec3 {
    let projected = tangent - normal * normal.dot(tangent);
    projected.try_normalize(1e-6).unwrap_or_else(|| {
        let axis = if normal.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
        (axis - normal * normal.dot(&axis)).normalize()
    })
}
