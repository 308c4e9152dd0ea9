//! Shader sources and programs
//!
//! A [`ShaderProgram`] that failed to compile stays around as an invalid
//! program: binding it reports the problem instead of issuing calls against a
//! dead id, and uniform setters become no-ops. Uniform locations are looked up
//! once per name and cached; names the program does not declare are logged the
//! first time they are set.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::device::{GraphicsDevice, ProgramId, UniformValue};
use super::{RenderError, RenderResult};
use crate::foundation::math::{Mat4, Vec2, Vec3, Vec4};

/// Stage sources of a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderStages {
    Graphics { vertex: String, fragment: String },
    Compute { compute: String },
}

/// Labelled program source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub label: String,
    pub stages: ShaderStages,
}

impl ShaderSource {
    pub fn graphics(label: impl Into<String>, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stages: ShaderStages::Graphics { vertex: vertex.into(), fragment: fragment.into() },
        }
    }

    pub fn compute(label: impl Into<String>, compute: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stages: ShaderStages::Compute { compute: compute.into() },
        }
    }

    /// Read a vertex/fragment pair from disk
    pub fn from_files(label: impl Into<String>, vertex: impl AsRef<Path>, fragment: impl AsRef<Path>) -> RenderResult<Self> {
        let read = |path: &Path| {
            std::fs::read_to_string(path)
                .map_err(|e| RenderError::ResourceNotFound(format!("{}: {}", path.display(), e)))
        };
        Ok(Self::graphics(label, read(vertex.as_ref())?, read(fragment.as_ref())?))
    }

    /// `(stage name, source)` pairs
    pub fn stage_sources(&self) -> Vec<(&'static str, &str)> {
        match &self.stages {
            ShaderStages::Graphics { vertex, fragment } => vec![("vertex", vertex.as_str()), ("fragment", fragment.as_str())],
            ShaderStages::Compute { compute } => vec![("compute", compute.as_str())],
        }
    }
}

/// Sources of the built-in passes, embedded at compile time
pub mod builtin {
    use super::ShaderSource;

    const INSTANCED_VERT: &str = include_str!("../../shaders/instanced.vert");
    const FULLSCREEN_VERT: &str = include_str!("../../shaders/fullscreen.vert");

    pub fn geometry() -> ShaderSource {
        ShaderSource::graphics("geometry", INSTANCED_VERT, include_str!("../../shaders/gbuffer.frag"))
    }

    pub fn forward() -> ShaderSource {
        ShaderSource::graphics("forward", INSTANCED_VERT, include_str!("../../shaders/forward.frag"))
    }

    pub fn shadow_depth() -> ShaderSource {
        ShaderSource::graphics("shadow_depth", INSTANCED_VERT, include_str!("../../shaders/shadow_depth.frag"))
    }

    pub fn deferred_light() -> ShaderSource {
        ShaderSource::graphics("deferred_light", FULLSCREEN_VERT, include_str!("../../shaders/deferred_light.frag"))
    }

    pub fn skybox() -> ShaderSource {
        ShaderSource::graphics(
            "skybox",
            include_str!("../../shaders/skybox.vert"),
            include_str!("../../shaders/skybox.frag"),
        )
    }

    pub fn debug_view() -> ShaderSource {
        ShaderSource::graphics("debug_view", FULLSCREEN_VERT, include_str!("../../shaders/debug_view.frag"))
    }
}

/// Compiled program with a uniform location cache
#[derive(Debug)]
pub struct ShaderProgram {
    label: String,
    id: Option<ProgramId>,
    locations: HashMap<String, Option<i32>>,
    reported_missing: HashSet<String>,
}

impl ShaderProgram {
    /// Compile, logging failures and returning an invalid program
    pub fn compile(device: &mut dyn GraphicsDevice, source: &ShaderSource) -> Self {
        match Self::try_compile(device, source) {
            Ok(program) => program,
            Err(e) => {
                log::error!("{}", e);
                Self::invalid(source.label.clone())
            }
        }
    }

    /// Compile, returning the compiler log as an error
    pub fn try_compile(device: &mut dyn GraphicsDevice, source: &ShaderSource) -> RenderResult<Self> {
        let id = device.compile_program(source).map_err(|log| RenderError::ShaderCompilation {
            label: source.label.clone(),
            log,
        })?;
        log::debug!("Compiled shader program '{}'", source.label);
        Ok(Self {
            label: source.label.clone(),
            id: Some(id),
            locations: HashMap::new(),
            reported_missing: HashSet::new(),
        })
    }

    /// Placeholder for a program that failed to build
    pub fn invalid(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            id: None,
            locations: HashMap::new(),
            reported_missing: HashSet::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn id(&self) -> Option<ProgramId> {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_some()
    }

    /// Make this program current. Returns false (and reports) if it is invalid.
    pub fn bind(&self, device: &mut dyn GraphicsDevice) -> bool {
        match self.id {
            Some(id) => {
                device.use_program(Some(id));
                true
            }
            None => {
                log::error!("Attempted to use invalid shader program '{}'", self.label);
                false
            }
        }
    }

    pub fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(id) = self.id.take() {
            device.delete_program(id);
        }
        self.locations.clear();
    }

    fn location(&mut self, device: &mut dyn GraphicsDevice, name: &str) -> Option<i32> {
        let id = self.id?;
        let location = match self.locations.get(name) {
            Some(cached) => *cached,
            None => {
                let found = device.uniform_location(id, name);
                self.locations.insert(name.to_string(), found);
                found
            }
        };
        if location.is_none() && self.reported_missing.insert(name.to_string()) {
            log::warn!("Uniform '{}' not found in shader '{}'", name, self.label);
        }
        location
    }

    /// Set a uniform of this program. The program must be bound.
    pub fn set(&mut self, device: &mut dyn GraphicsDevice, name: &str, value: UniformValue) {
        if let Some(location) = self.location(device, name) {
            device.set_uniform(location, value);
        }
    }

    pub fn set_bool(&mut self, device: &mut dyn GraphicsDevice, name: &str, value: bool) {
        self.set(device, name, UniformValue::Bool(value));
    }

    pub fn set_int(&mut self, device: &mut dyn GraphicsDevice, name: &str, value: i32) {
        self.set(device, name, UniformValue::Int(value));
    }

    pub fn set_float(&mut self, device: &mut dyn GraphicsDevice, name: &str, value: f32) {
        self.set(device, name, UniformValue::Float(value));
    }

    pub fn set_vec2(&mut self, device: &mut dyn GraphicsDevice, name: &str, value: &Vec2) {
        self.set(device, name, UniformValue::Vec2([value.x, value.y]));
    }

    pub fn set_vec3(&mut self, device: &mut dyn GraphicsDevice, name: &str, value: &Vec3) {
        self.set(device, name, UniformValue::Vec3([value.x, value.y, value.z]));
    }

    pub fn set_vec4(&mut self, device: &mut dyn GraphicsDevice, name: &str, value: &Vec4) {
        self.set(device, name, UniformValue::Vec4([value.x, value.y, value.z, value.w]));
    }

    pub fn set_mat4(&mut self, device: &mut dyn GraphicsDevice, name: &str, value: &Mat4) {
        self.set(device, name, UniformValue::Mat4((*value).into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HeadlessDevice;

    #[test]
    fn test_builtin_shaders_compile() {
        let mut device = HeadlessDevice::new(64, 64);
        for source in [
            builtin::geometry(),
            builtin::forward(),
            builtin::shadow_depth(),
            builtin::deferred_light(),
            builtin::skybox(),
            builtin::debug_view(),
        ] {
            assert!(ShaderProgram::compile(&mut device, &source).is_valid(), "{}", source.label);
        }
    }

    #[test]
    fn test_uv_scale_applied_in_vertex_stage_only() {
        for source in [builtin::geometry(), builtin::forward()] {
            let stages = source.stage_sources();
            let (_, vertex) = stages[0];
            let (_, fragment) = stages[1];
            assert!(vertex.contains("aUv * inst.uvScale"), "{}", source.label);
            assert!(!fragment.contains("* m.uvScale"), "{}", source.label);
        }
    }

    #[test]
    fn test_invalid_program_refuses_bind() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut program = ShaderProgram::compile(&mut device, &ShaderSource::graphics("broken", "", "void main() {}"));
        assert!(!program.is_valid());
        assert!(!program.bind(&mut device));
        program.set_float(&mut device, "u_anything", 1.0);
    }

    #[test]
    fn test_uniforms_resolve_and_cache() {
        let mut device = HeadlessDevice::new(64, 64);
        let source = ShaderSource::graphics(
            "test",
            "uniform mat4 u_mvp;\nvoid main() {}",
            "uniform vec3 u_color[2];\nvoid main() {}",
        );
        let mut program = ShaderProgram::compile(&mut device, &source);
        assert!(program.bind(&mut device));
        program.set_vec3(&mut device, "u_color[1]", &Vec3::new(1.0, 0.5, 0.0));
        program.set_int(&mut device, "u_missing", 3);

        let id = program.id().unwrap();
        assert_eq!(device.uniform(id, "u_color[1]"), Some(UniformValue::Vec3([1.0, 0.5, 0.0])));
        assert_eq!(device.uniform(id, "u_missing"), None);
    }
}
