use gpgpu_core::EngineError;

use crate::gpu::{BufferId, BufferTarget, BufferUsage, Gpu, Primitive, VertexArrayId};

pub const POSITION_ATTRIB: &str = "a_pos";
pub const TEXCOORD_ATTRIB: &str = "a_uv";

/// Vertex positions (clip space unless a transform uniform says otherwise)
/// and matching texture coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub coords: Vec<[f32; 2]>,
    pub primitive: Primitive,
}

impl Geometry {
    /// Full-screen quad as a triangle strip, texture row 0 at the bottom.
    pub fn quad() -> Self {
        Self {
            positions: vec![
                [-1.0, -1.0, 0.0],
                [1.0, -1.0, 0.0],
                [-1.0, 1.0, 0.0],
                [1.0, 1.0, 0.0],
            ],
            coords: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
            primitive: Primitive::TriangleStrip,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.positions.len() != self.coords.len() {
            return Err(EngineError::precondition(format!(
                "mesh has {} positions but {} texture coordinates",
                self.positions.len(),
                self.coords.len()
            )));
        }
        let min = match self.primitive {
            Primitive::Triangles => 3,
            Primitive::TriangleStrip => 3,
        };
        if self.positions.len() < min {
            return Err(EngineError::precondition("mesh needs at least 3 vertices"));
        }
        if self.primitive == Primitive::Triangles && self.positions.len() % 3 != 0 {
            return Err(EngineError::precondition(
                "triangle list vertex count must be a multiple of 3",
            ));
        }
        Ok(())
    }

    /// Positions block followed by coords block.
    fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.vertex_count() * 5 * 4);
        out.extend_from_slice(bytemuck::cast_slice(&self.positions));
        out.extend_from_slice(bytemuck::cast_slice(&self.coords));
        out
    }
}

/// Vertex array + buffer holding one uploaded [`Geometry`].
#[derive(Debug)]
pub struct GeometryBuffer {
    vao: Option<VertexArrayId>,
    vbo: Option<BufferId>,
    uploaded: Option<Geometry>,
}

impl GeometryBuffer {
    pub fn new(gpu: &dyn Gpu) -> Result<Self, EngineError> {
        let vao = gpu
            .create_vertex_array()
            .map_err(|e| EngineError::resource("vertex array", e))?;
        let vbo = match gpu.create_buffer() {
            Ok(b) => b,
            Err(e) => {
                gpu.delete_vertex_array(vao);
                return Err(EngineError::resource("vertex buffer", e));
            }
        };
        Ok(Self {
            vao: Some(vao),
            vbo: Some(vbo),
            uploaded: None,
        })
    }

    /// Upload `geom` unless it is already resident, and point the attributes at it.
    pub fn upload(
        &mut self,
        gpu: &dyn Gpu,
        geom: &Geometry,
        pos_attrib: Option<u32>,
        uv_attrib: Option<u32>,
    ) -> Result<(), EngineError> {
        if self.uploaded.as_ref() == Some(geom) {
            return Ok(());
        }
        geom.validate()?;
        let (vao, vbo) = match (self.vao, self.vbo) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(EngineError::precondition("geometry buffer used after release")),
        };

        gpu.bind_vertex_array(Some(vao));
        gpu.bind_buffer(BufferTarget::Array, Some(vbo));
        gpu.buffer_data(BufferTarget::Array, &geom.bytes(), BufferUsage::StaticDraw);
        if let Some(i) = pos_attrib {
            gpu.enable_vertex_attrib(i);
            gpu.vertex_attrib_pointer(i, 3, 3 * 4, 0);
        }
        if let Some(i) = uv_attrib {
            gpu.enable_vertex_attrib(i);
            gpu.vertex_attrib_pointer(i, 2, 2 * 4, geom.vertex_count() * 3 * 4);
        }
        gpu.bind_buffer(BufferTarget::Array, None);
        gpu.bind_vertex_array(None);

        self.uploaded = Some(geom.clone());
        Ok(())
    }

    pub fn bind(&self, gpu: &dyn Gpu) {
        gpu.bind_vertex_array(self.vao);
    }

    /// Draw everything uploaded. No-op before the first upload.
    pub fn draw(&self, gpu: &dyn Gpu) {
        if let Some(g) = &self.uploaded {
            gpu.draw_arrays(g.primitive, 0, g.vertex_count() as u32);
        }
    }

    pub fn release(&mut self, gpu: &dyn Gpu) {
        if let Some(vao) = self.vao.take() {
            gpu.delete_vertex_array(vao);
        }
        if let Some(vbo) = self.vbo.take() {
            gpu.delete_buffer(vbo);
        }
        self.uploaded = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_is_a_valid_strip() {
        let q = Geometry::quad();
        q.validate().unwrap();
        assert_eq!(q.bytes().len(), 4 * 5 * 4);
    }

    #[test]
    fn mismatched_mesh_rejected() {
        let g = Geometry {
            positions: vec![[0.0; 3]; 6],
            coords: vec![[0.0; 2]; 5],
            primitive: Primitive::Triangles,
        };
        assert!(matches!(g.validate(), Err(EngineError::Precondition(_))));

        let g = Geometry {
            positions: vec![[0.0; 3]; 4],
            coords: vec![[0.0; 2]; 4],
            primitive: Primitive::Triangles,
        };
        assert!(g.validate().is_err());
    }
}
