//! Rendering error types

use thiserror::Error;

/// Rendering system errors
#[derive(Error, Debug)]
pub enum RenderError {
    /// Renderer initialization failed during setup
    #[error("Renderer initialization failed: {0}")]
    InitializationFailed(String),

    /// A hardware feature the component cannot work without is absent
    #[error("Required device feature missing: {0}")]
    MissingFeature(&'static str),

    /// A fixed-size GPU table is full
    #[error("{resource} capacity of {capacity} exceeded")]
    CapacityExceeded { resource: &'static str, capacity: usize },

    /// Shader compilation or linking failed; `log` carries the compiler output
    #[error("Shader '{label}' failed to compile: {log}")]
    ShaderCompilation { label: String, log: String },

    /// Framebuffer attachments do not form a complete framebuffer
    #[error("Framebuffer '{0}' is incomplete")]
    FramebufferIncomplete(String),

    /// A handle or id did not resolve to a live resource
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// A texture could not be loaded or decoded
    #[error("Failed to load texture '{path}': {reason}")]
    TextureLoad { path: String, reason: String },

    /// Mesh data failed validation
    #[error("Invalid mesh data: {0}")]
    InvalidMesh(String),

    /// A pass was executed before its setup completed
    #[error("Render pass '{0}' executed before setup")]
    PassNotReady(&'static str),

    /// Backend-specific error occurred
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
