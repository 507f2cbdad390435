use gpgpu_core::EngineError;

use super::PASSTHROUGH_FRAG;
use crate::geometry::Geometry;
use crate::gpu::UniformValue;
use crate::proc::{Filter, FilterProc};
use crate::shader::Shader;

pub const MESH_VERT: &str = r#"
in vec4 a_pos;
in vec2 a_uv;
uniform mat4 u_transform;
out vec2 v_uv;
void main() {
    gl_Position = u_transform * a_pos;
    v_uv = a_uv;
}
"#;

pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Draws its input through an arbitrary vertex/UV mesh and a 4x4 transform.
///
/// Areas the mesh does not cover are cleared to opaque black.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    geometry: Geometry,
    transform: [f32; 16],
}

/// Quad + transform matrix (rotation, scale, translation of the whole image).
pub type TransformProc = FilterProc<Mesh>;

impl Default for Mesh {
    fn default() -> Self {
        Self::quad()
    }
}

impl Mesh {
    pub fn new(geometry: Geometry) -> Result<Self, EngineError> {
        geometry.validate()?;
        Ok(Self {
            geometry,
            transform: IDENTITY,
        })
    }

    pub fn quad() -> Self {
        Self {
            geometry: Geometry::quad(),
            transform: IDENTITY,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn set_geometry(&mut self, geometry: Geometry) -> Result<(), EngineError> {
        geometry.validate()?;
        self.geometry = geometry;
        Ok(())
    }

    /// Column-major.
    pub fn transform(&self) -> [f32; 16] {
        self.transform
    }

    pub fn set_transform(&mut self, m: [f32; 16]) {
        self.transform = m;
    }
}

impl Filter for Mesh {
    fn name(&self) -> &'static str {
        "mesh"
    }

    fn vertex_source(&self) -> &'static str {
        MESH_VERT
    }

    fn fragment_source(&self) -> &'static str {
        PASSTHROUGH_FRAG
    }

    fn stage_uniforms(&self, shader: &mut Shader) {
        shader.set("u_transform", UniformValue::Mat4(self.transform));
    }

    fn geometry(&self) -> Option<&Geometry> {
        Some(&self.geometry)
    }
}

impl FilterProc<Mesh> {
    pub fn transform(m: [f32; 16]) -> Self {
        let mut mesh = Mesh::quad();
        mesh.set_transform(m);
        FilterProc::new(mesh)
    }

    pub fn set_transform(&mut self, m: [f32; 16]) {
        self.filter_mut().set_transform(m);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::Primitive;

    #[test]
    fn rejects_mismatched_mesh() {
        let bad = Geometry {
            positions: vec![[0.0; 3]; 3],
            coords: vec![[0.0; 2]; 2],
            primitive: Primitive::Triangles,
        };
        assert!(Mesh::new(bad).is_err());
        let mut m = Mesh::quad();
        assert_eq!(m.transform(), IDENTITY);
        m.set_transform([2.0; 16]);
        assert_eq!(m.transform()[5], 2.0);
    }
}
