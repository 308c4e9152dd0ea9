//! ECS error types

use thiserror::Error;

use super::Entity;

/// Errors raised by structural ECS operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EcsError {
    #[error("Entity {0:?} is not alive")]
    DeadEntity(Entity),

    #[error("Entity {0:?} cannot be its own parent")]
    SelfParent(Entity),

    #[error("Parenting {child:?} under {parent:?} would create a cycle")]
    HierarchyCycle { child: Entity, parent: Entity },

    #[error("Entity {entity:?} has no {component} component")]
    MissingComponent { entity: Entity, component: &'static str },
}

/// Result type for ECS operations
pub type EcsResult<T> = Result<T, EcsError>;
