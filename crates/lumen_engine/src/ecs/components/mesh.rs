//! Mesh components

/// Primitive topology of a mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawMode {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    Points,
}

/// GPU-side mesh reference with draw range overrides
///
/// Created only by [`MeshRegistry::register`](crate::render::MeshRegistry::register);
/// the id and index flag are engine-assigned and read-only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mesh {
    id: u32,
    indexed: bool,
    /// Vertex count, or index count for indexed meshes
    pub count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub instance_count: u32,
    pub material_index: u32,
}

impl Mesh {
    pub(crate) fn new(id: u32, indexed: bool, count: u32, first_index: u32, base_vertex: i32, material_index: u32) -> Self {
        Self {
            id,
            indexed,
            count,
            first_index,
            base_vertex,
            instance_count: 1,
            material_index,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether the mesh draws through the shared index buffer
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }
}

/// Tag sharing one registered mesh definition across many entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshInstance {
    pub definition: u32,
}
