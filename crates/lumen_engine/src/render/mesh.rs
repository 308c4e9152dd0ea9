//! Mesh data and the shared geometry pool
//!
//! Loaders and generators hand the renderer a [`RawMeshData`]: positions,
//! UVs, packed tangent frames, optional indices and a draw mode.
//! [`RawMeshData::from_geometry`] fills in whatever a source lacks (normals,
//! planar UVs, tangents) before packing.
//!
//! [`MeshRegistry`] appends every registered mesh into one vertex buffer and
//! one index buffer so a whole pass can be drawn from a single vertex array
//! with indirect commands. It also stores the mesh definitions shared by
//! [`MeshInstance`] entities and keeps their instance counts, recomputed
//! lazily when the instance population changes.

use bytemuck::{Pod, Zeroable};

use super::device::{BufferId, BufferKind, GraphicsDevice, VertexArrayId};
use super::tangent_frame;
use super::{RenderError, RenderResult};
use crate::ecs::components::{DrawMode, Mesh, MeshInstance};
use crate::ecs::{EcsResult, Entity, World};
use crate::foundation::math::{Vec2, Vec3};
use crate::spatial::AABB;

/// Interleaved vertex layout shared by every mesh
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    /// snorm16 quaternion, see [`tangent_frame`]
    pub tangent_frame: [i16; 4],
}

/// CPU-side mesh ready for registration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawMeshData {
    pub positions: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub tangent_frames: Vec<[i16; 4]>,
    /// Empty for non-indexed meshes
    pub indices: Vec<u32>,
    pub draw_mode: DrawMode,
}

impl RawMeshData {
    /// Build a mesh from loose geometry, generating missing attributes
    ///
    /// Missing normals are area-weighted face normals; missing UVs are a planar
    /// projection onto the two largest bounding-box axes. Tangents always come
    /// from UV derivatives, with handedness taken from the UV winding.
    pub fn from_geometry(
        positions: Vec<Vec3>,
        normals: Option<Vec<Vec3>>,
        uvs: Option<Vec<Vec2>>,
        indices: Vec<u32>,
        draw_mode: DrawMode,
    ) -> RenderResult<Self> {
        if positions.is_empty() {
            return Err(RenderError::InvalidMesh("no vertices".to_string()));
        }
        let vertex_count = positions.len();
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(RenderError::InvalidMesh(format!(
                "index {} out of range for {} vertices", bad, vertex_count
            )));
        }
        if draw_mode == DrawMode::Triangles {
            let element_count = if indices.is_empty() { vertex_count } else { indices.len() };
            if element_count % 3 != 0 {
                return Err(RenderError::InvalidMesh(format!(
                    "{} elements do not form whole triangles", element_count
                )));
            }
        }

        let triangles = triangle_list(vertex_count, &indices, draw_mode);

        let normals = match normals {
            Some(n) if n.len() == vertex_count => n,
            Some(n) => {
                return Err(RenderError::InvalidMesh(format!(
                    "{} normals for {} vertices", n.len(), vertex_count
                )))
            }
            None => generate_normals(&positions, &triangles),
        };
        let uvs = match uvs {
            Some(uv) if uv.len() == vertex_count => uv,
            Some(uv) => {
                return Err(RenderError::InvalidMesh(format!(
                    "{} uvs for {} vertices", uv.len(), vertex_count
                )))
            }
            None => planar_uvs(&positions),
        };

        let (tangents, bitangents) = generate_tangents(&positions, &normals, &uvs, &triangles);
        let tangent_frames = normals
            .iter()
            .zip(tangents.iter().zip(bitangents.iter()))
            .map(|(n, (t, b))| tangent_frame::to_snorm16(&tangent_frame::pack(n, t, b)))
            .collect();

        Ok(Self { positions, uvs, tangent_frames, indices, draw_mode })
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }

    pub fn bounds(&self) -> Option<AABB> {
        AABB::from_points(&self.positions)
    }

    fn validate(&self) -> RenderResult<()> {
        let n = self.positions.len();
        if n == 0 {
            return Err(RenderError::InvalidMesh("no vertices".to_string()));
        }
        if self.uvs.len() != n || self.tangent_frames.len() != n {
            return Err(RenderError::InvalidMesh(format!(
                "attribute counts differ: {} positions, {} uvs, {} tangent frames",
                n, self.uvs.len(), self.tangent_frames.len()
            )));
        }
        if self.indices.iter().any(|&i| i as usize >= n) {
            return Err(RenderError::InvalidMesh("index out of range".to_string()));
        }
        Ok(())
    }

    fn vertices(&self) -> impl Iterator<Item = Vertex> + '_ {
        self.positions
            .iter()
            .zip(self.uvs.iter())
            .zip(self.tangent_frames.iter())
            .map(|((p, uv), frame)| Vertex {
                position: [p.x, p.y, p.z],
                uv: [uv.x, uv.y],
                tangent_frame: *frame,
            })
    }
}

fn triangle_list(vertex_count: usize, indices: &[u32], mode: DrawMode) -> Vec<[usize; 3]> {
    let elements: Vec<usize> = if indices.is_empty() {
        (0..vertex_count).collect()
    } else {
        indices.iter().map(|&i| i as usize).collect()
    };
    match mode {
        DrawMode::Triangles => elements.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect(),
        DrawMode::TriangleStrip => elements
            .windows(3)
            .enumerate()
            .map(|(i, w)| if i % 2 == 0 { [w[0], w[1], w[2]] } else { [w[1], w[0], w[2]] })
            .collect(),
        DrawMode::Lines | DrawMode::Points => Vec::new(),
    }
}

fn generate_normals(positions: &[Vec3], triangles: &[[usize; 3]]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::zeros(); positions.len()];
    for &[a, b, c] in triangles {
        // Unnormalized cross product weights by triangle area.
        let face = (positions[b] - positions[a]).cross(&(positions[c] - positions[a]));
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }
    normals
        .into_iter()
        .map(|n| n.try_normalize(1e-12).unwrap_or_else(Vec3::y))
        .collect()
}

fn planar_uvs(positions: &[Vec3]) -> Vec<Vec2> {
    let Some(bounds) = AABB::from_points(positions) else {
        return Vec::new();
    };
    let size = bounds.max - bounds.min;
    let flat = if size.x <= size.y && size.x <= size.z {
        0
    } else if size.y <= size.z {
        1
    } else {
        2
    };
    let (u, v) = match flat {
        0 => (2, 1),
        1 => (0, 2),
        _ => (0, 1),
    };
    let span = |axis: usize| if size[axis] > f32::EPSILON { size[axis] } else { 1.0 };
    positions
        .iter()
        .map(|p| Vec2::new((p[u] - bounds.min[u]) / span(u), (p[v] - bounds.min[v]) / span(v)))
        .collect()
}

fn generate_tangents(
    positions: &[Vec3],
    normals: &[Vec3],
    uvs: &[Vec2],
    triangles: &[[usize; 3]],
) -> (Vec<Vec3>, Vec<Vec3>) {
    let mut tangents = vec![Vec3::zeros(); positions.len()];
    let mut bitangents = vec![Vec3::zeros(); positions.len()];

    for &[a, b, c] in triangles {
        let e1 = positions[b] - positions[a];
        let e2 = positions[c] - positions[a];
        let d1 = uvs[b] - uvs[a];
        let d2 = uvs[c] - uvs[a];
        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() < 1e-12 {
            continue;
        }
        let r = 1.0 / det;
        let t = (e1 * d2.y - e2 * d1.y) * r;
        let bt = (e2 * d1.x - e1 * d2.x) * r;
        for i in [a, b, c] {
            tangents[i] += t;
            bitangents[i] += bt;
        }
    }

    for i in 0..positions.len() {
        let n = normals[i];
        let fallback = if n.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
        let t = tangents[i] - n * n.dot(&tangents[i]);
        let t = t.try_normalize(1e-12).unwrap_or_else(|| (fallback - n * n.dot(&fallback)).normalize());
        // Keep the accumulated bitangent's side; fall back to a right-handed frame.
        let b = if bitangents[i].norm_squared() > 1e-24 { bitangents[i] } else { n.cross(&t) };
        tangents[i] = t;
        bitangents[i] = b;
    }
    (tangents, bitangents)
}

#[derive(Debug, Clone)]
struct MeshRecord {
    mesh: Mesh,
    draw_mode: DrawMode,
    bounds: AABB,
    label: String,
}

/// Shared geometry pool and mesh definition table
#[derive(Debug)]
pub struct MeshRegistry {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    vertex_buffer: Option<BufferId>,
    index_buffer: Option<BufferId>,
    vertex_array: Option<VertexArrayId>,
    vertex_capacity: usize,
    index_capacity: usize,
    gpu_dirty: bool,
    meshes: Vec<MeshRecord>,
    definitions: Vec<Mesh>,
    instance_counts: Vec<u32>,
    counted_instances: usize,
    counts_dirty: bool,
}

impl MeshRegistry {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            vertex_buffer: None,
            index_buffer: None,
            vertex_array: None,
            vertex_capacity: 0,
            index_capacity: 0,
            gpu_dirty: false,
            meshes: Vec::new(),
            definitions: Vec::new(),
            instance_counts: Vec::new(),
            counted_instances: 0,
            counts_dirty: false,
        }
    }

    /// Append a mesh to the pool and return its engine-assigned component
    pub fn register(&mut self, raw: &RawMeshData, material_index: u32, label: &str) -> RenderResult<Mesh> {
        raw.validate()?;
        let id = self.meshes.len() as u32;
        let base_vertex = self.vertices.len() as i32;
        let first_index = self.indices.len() as u32;
        let indexed = raw.is_indexed();
        let count = if indexed { raw.indices.len() } else { raw.vertex_count() } as u32;

        self.vertices.extend(raw.vertices());
        self.indices.extend_from_slice(&raw.indices);
        self.gpu_dirty = true;

        // Arrays draws address vertices directly, so they start at the pool offset.
        let (first, base) = if indexed { (first_index, base_vertex) } else { (base_vertex as u32, 0) };
        let mesh = Mesh::new(id, indexed, count, first, base, material_index);
        self.meshes.push(MeshRecord {
            mesh,
            draw_mode: raw.draw_mode,
            bounds: raw.bounds().unwrap_or(AABB::from_point(Vec3::zeros())),
            label: label.to_string(),
        });
        log::debug!(
            "Registered mesh '{}' as #{} ({} vertices, {} indices)",
            label, id, raw.vertex_count(), raw.indices.len()
        );
        Ok(mesh)
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Registered component of a mesh id
    pub fn mesh(&self, id: u32) -> Option<&Mesh> {
        self.meshes.get(id as usize).map(|r| &r.mesh)
    }

    pub fn draw_mode(&self, id: u32) -> DrawMode {
        self.meshes.get(id as usize).map(|r| r.draw_mode).unwrap_or_default()
    }

    pub fn bounds(&self, id: u32) -> Option<&AABB> {
        self.meshes.get(id as usize).map(|r| &r.bounds)
    }

    pub fn label(&self, id: u32) -> Option<&str> {
        self.meshes.get(id as usize).map(|r| r.label.as_str())
    }

    /// Add a shared mesh definition for [`MeshInstance`] entities
    pub fn define(&mut self, mesh: Mesh) -> u32 {
        self.definitions.push(mesh);
        self.instance_counts.push(0);
        self.counts_dirty = true;
        (self.definitions.len() - 1) as u32
    }

    pub fn definition(&self, index: u32) -> Option<&Mesh> {
        self.definitions.get(index as usize)
    }

    /// Tag an entity as an instance of a definition
    pub fn attach_instance(&mut self, world: &mut World, entity: Entity, definition: u32) -> EcsResult<()> {
        world.add_component(entity, MeshInstance { definition })?;
        self.counts_dirty = true;
        Ok(())
    }

    pub fn detach_instance(&mut self, world: &mut World, entity: Entity) -> Option<MeshInstance> {
        let removed = world.remove_component::<MeshInstance>(entity);
        if removed.is_some() {
            self.counts_dirty = true;
        }
        removed
    }

    /// Force the next count query to rescan the world
    pub fn mark_instances_dirty(&mut self) {
        self.counts_dirty = true;
    }

    /// Per-definition instance count, rescanned only when the population changed
    pub fn instance_count(&mut self, world: &World, definition: u32) -> u32 {
        self.refresh_instance_counts(world);
        self.instance_counts.get(definition as usize).copied().unwrap_or(0)
    }

    /// Recount instances if flagged or if the tag population changed size.
    /// Returns true when a rescan happened.
    pub fn refresh_instance_counts(&mut self, world: &World) -> bool {
        let population = world.storage::<MeshInstance>().map(|s| s.len()).unwrap_or(0);
        if !self.counts_dirty && population == self.counted_instances {
            return false;
        }
        self.instance_counts.iter_mut().for_each(|c| *c = 0);
        for (_, instance) in world.query::<MeshInstance>() {
            match self.instance_counts.get_mut(instance.definition as usize) {
                Some(count) => *count += 1,
                None => log::warn!("MeshInstance references unknown definition {}", instance.definition),
            }
        }
        for (definition, count) in self.definitions.iter_mut().zip(&self.instance_counts) {
            definition.instance_count = *count;
        }
        self.counted_instances = population;
        self.counts_dirty = false;
        true
    }

    /// Push pending geometry to the device, reallocating buffers that are too small
    pub fn upload(&mut self, device: &mut dyn GraphicsDevice) -> RenderResult<()> {
        if !self.gpu_dirty {
            return Ok(());
        }

        let mut recreated = false;
        if self.vertex_buffer.is_none() || self.vertices.len() > self.vertex_capacity {
            let capacity = grown_capacity(self.vertex_capacity, self.vertices.len());
            if let Some(old) = self.vertex_buffer.take() {
                device.delete_buffer(old);
            }
            self.vertex_buffer = Some(device.create_buffer(
                BufferKind::Vertex,
                capacity * std::mem::size_of::<Vertex>(),
                "mesh_vertices",
            )?);
            self.vertex_capacity = capacity;
            recreated = true;
        }
        if self.index_buffer.is_none() || self.indices.len() > self.index_capacity {
            let capacity = grown_capacity(self.index_capacity, self.indices.len());
            if let Some(old) = self.index_buffer.take() {
                device.delete_buffer(old);
            }
            self.index_buffer = Some(device.create_buffer(
                BufferKind::Index,
                capacity * std::mem::size_of::<u32>(),
                "mesh_indices",
            )?);
            self.index_capacity = capacity;
            recreated = true;
        }

        let (Some(vertex_buffer), Some(index_buffer)) = (self.vertex_buffer, self.index_buffer) else {
            return Err(RenderError::Backend("geometry buffers missing after allocation".to_string()));
        };
        if recreated || self.vertex_array.is_none() {
            if let Some(old) = self.vertex_array.take() {
                device.delete_vertex_array(old);
            }
            self.vertex_array = Some(device.create_vertex_array(vertex_buffer, Some(index_buffer))?);
        }

        device.write_buffer(vertex_buffer, 0, bytemuck::cast_slice(&self.vertices))?;
        device.write_buffer(index_buffer, 0, bytemuck::cast_slice(&self.indices))?;
        self.gpu_dirty = false;
        log::debug!(
            "Uploaded geometry pool: {} vertices, {} indices",
            self.vertices.len(), self.indices.len()
        );
        Ok(())
    }

    pub fn bind(&self, device: &mut dyn GraphicsDevice) {
        device.bind_vertex_array(self.vertex_array);
    }

    pub fn vertex_array(&self) -> Option<VertexArrayId> {
        self.vertex_array
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for buffer in [self.vertex_buffer.take(), self.index_buffer.take()].into_iter().flatten() {
            device.delete_buffer(buffer);
        }
        if let Some(vertex_array) = self.vertex_array.take() {
            device.delete_vertex_array(vertex_array);
        }
        self.vertex_capacity = 0;
        self.index_capacity = 0;
        self.gpu_dirty = !self.vertices.is_empty();
    }
}

impl Default for MeshRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Next capacity at least `required`, growing by half each step
pub(crate) fn grown_capacity(current: usize, required: usize) -> usize {
    let mut capacity = current.max(16);
    while capacity < required {
        capacity += capacity / 2;
    }
    capacity
}
