//! Core components
//!
//! Plain data only; the systems and the renderer own the logic that reads
//! and writes them.

pub mod transform;
pub mod mesh;
pub mod light;

pub use transform::{Position, Rotation, EulerAngles, Scale, ModelMatrix, Parent, Children};
pub use mesh::{Mesh, MeshInstance, DrawMode};
pub use light::{Light, LightKind, LightSpaceMatrix, LightSpaceMatrixArray, LIGHT_SPACE_ARRAY_SIZE};
