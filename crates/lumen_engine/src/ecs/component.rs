//! Component trait

/// Marker trait for components
pub trait Component: 'static + Send + Sync {}

/// Dense index assigned to a component type on first registration
pub type ComponentTypeId = usize;

// Engine components
impl Component for crate::ecs::components::Position {}
impl Component for crate::ecs::components::Rotation {}
impl Component for crate::ecs::components::EulerAngles {}
impl Component for crate::ecs::components::Scale {}
impl Component for crate::ecs::components::ModelMatrix {}
impl Component for crate::ecs::components::Parent {}
impl Component for crate::ecs::components::Children {}
impl Component for crate::ecs::components::Mesh {}
impl Component for crate::ecs::components::MeshInstance {}
impl Component for crate::ecs::components::Light {}
impl Component for crate::ecs::components::LightSpaceMatrix {}
impl Component for crate::ecs::components::LightSpaceMatrixArray {}
