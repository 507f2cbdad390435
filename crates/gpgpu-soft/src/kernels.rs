//! Reference kernels: CPU stand-ins for shader programs, keyed by shader source.

use std::collections::HashMap;

use gpgpu_runtime::filters::{
    SwizzleKind, BLEND_FRAG, DIFF_FRAG, GAIN_FRAG, MESH_VERT, PASSTHROUGH_FRAG, YUV2RGB_LA_FRAG,
    YUV2RGB_PLANAR_FRAG, YUV2RGB_RG_FRAG,
};
use gpgpu_runtime::proc::DEFAULT_VERT;
use gpgpu_runtime::UniformValue;

use crate::surface::Surface;

/// Vertex shader output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipVertex {
    pub position: [f32; 4],
    pub uv: [f32; 2],
}

pub type VertexKernel = fn(&VertexInput<'_>) -> ClipVertex;
pub type FragmentKernel = fn(&Fragment<'_>) -> [f32; 4];

type Uniforms = HashMap<String, UniformValue>;

fn float(u: &Uniforms, name: &str) -> f32 {
    match u.get(name) {
        Some(UniformValue::Float(v)) => *v,
        Some(UniformValue::Int(v)) => *v as f32,
        _ => 0.0,
    }
}

fn mat3(u: &Uniforms, name: &str) -> [f32; 9] {
    match u.get(name) {
        Some(UniformValue::Mat3(m)) => *m,
        _ => [0.0; 9],
    }
}

fn mat4(u: &Uniforms, name: &str) -> [f32; 16] {
    match u.get(name) {
        Some(UniformValue::Mat4(m)) => *m,
        _ => [0.0; 16],
    }
}

/// Attributes of one vertex plus the program's uniforms.
#[derive(Debug)]
pub struct VertexInput<'a> {
    pub(crate) attribs: &'a [(&'a str, [f32; 4])],
    pub(crate) uniforms: &'a Uniforms,
}

impl VertexInput<'_> {
    /// Missing attributes read as `(0, 0, 0, 1)`.
    pub fn attrib(&self, name: &str) -> [f32; 4] {
        self.attribs
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .unwrap_or([0.0, 0.0, 0.0, 1.0])
    }

    pub fn mat4(&self, name: &str) -> [f32; 16] {
        mat4(self.uniforms, name)
    }
}

/// One fragment: interpolated texture coordinate plus uniform and sampler access.
#[derive(Debug)]
pub struct Fragment<'a> {
    pub(crate) uv: [f32; 2],
    pub(crate) uniforms: &'a Uniforms,
    pub(crate) units: &'a [Option<&'a Surface>],
}

impl Fragment<'_> {
    pub fn uv(&self) -> [f32; 2] {
        self.uv
    }

    /// Sample the texture bound to the unit named by sampler uniform `sampler`.
    /// Unbound units read as opaque black.
    pub fn sample(&self, sampler: &str) -> [f32; 4] {
        let unit = match self.uniforms.get(sampler) {
            Some(UniformValue::Int(u)) => *u as usize,
            _ => 0,
        };
        match self.units.get(unit).copied().flatten() {
            Some(s) => s.sample(self.uv),
            None => [0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn float(&self, name: &str) -> f32 {
        float(self.uniforms, name)
    }

    pub fn mat3(&self, name: &str) -> [f32; 9] {
        mat3(self.uniforms, name)
    }
}

/// Source-keyed kernel table. Program creation fails for unknown sources,
/// like a compile error would.
#[derive(Debug, Clone, Default)]
pub struct KernelRegistry {
    vertex: HashMap<String, VertexKernel>,
    fragment: HashMap<String, FragmentKernel>,
}

impl KernelRegistry {
    /// Registry with a kernel for every shader the runtime ships.
    pub fn builtin() -> Self {
        let mut r = Self::default();
        r.register_vertex(DEFAULT_VERT, quad_vertex);
        r.register_vertex(MESH_VERT, mesh_vertex);
        r.register_fragment(PASSTHROUGH_FRAG, passthrough);
        r.register_fragment(GAIN_FRAG, gain);
        r.register_fragment(BLEND_FRAG, blend);
        r.register_fragment(DIFF_FRAG, diff);
        r.register_fragment(YUV2RGB_LA_FRAG, yuv_la);
        r.register_fragment(YUV2RGB_RG_FRAG, yuv_rg);
        r.register_fragment(YUV2RGB_PLANAR_FRAG, yuv_planar);
        for kind in SwizzleKind::ALL {
            r.register_fragment(kind.fragment_source(), swizzle_kernel(kind));
        }
        r
    }

    pub fn register_vertex(&mut self, src: &str, k: VertexKernel) {
        self.vertex.insert(src.trim().to_string(), k);
    }

    pub fn register_fragment(&mut self, src: &str, k: FragmentKernel) {
        self.fragment.insert(src.trim().to_string(), k);
    }

    pub fn vertex(&self, src: &str) -> Option<VertexKernel> {
        self.vertex.get(src.trim()).copied()
    }

    pub fn fragment(&self, src: &str) -> Option<FragmentKernel> {
        self.fragment.get(src.trim()).copied()
    }
}

// ---- vertex kernels ----

fn quad_vertex(v: &VertexInput<'_>) -> ClipVertex {
    let uv = v.attrib("a_uv");
    ClipVertex {
        position: v.attrib("a_pos"),
        uv: [uv[0], uv[1]],
    }
}

fn mesh_vertex(v: &VertexInput<'_>) -> ClipVertex {
    let m = v.mat4("u_transform");
    let p = v.attrib("a_pos");
    let mut out = [0.0; 4];
    for (row, o) in out.iter_mut().enumerate() {
        *o = (0..4).map(|col| m[col * 4 + row] * p[col]).sum();
    }
    let uv = v.attrib("a_uv");
    ClipVertex {
        position: out,
        uv: [uv[0], uv[1]],
    }
}

// ---- fragment kernels ----

fn passthrough(f: &Fragment<'_>) -> [f32; 4] {
    f.sample("u_input")
}

fn gain(f: &Fragment<'_>) -> [f32; 4] {
    let [r, g, b, a] = f.sample("u_input");
    let k = f.float("u_gain");
    [
        (r * k).clamp(0.0, 1.0),
        (g * k).clamp(0.0, 1.0),
        (b * k).clamp(0.0, 1.0),
        a,
    ]
}

fn blend(f: &Fragment<'_>) -> [f32; 4] {
    let a = f.sample("u_input");
    let b = f.sample("u_input2");
    let t = f.float("u_alpha");
    let mut out = [0.0; 4];
    for i in 0..4 {
        out[i] = b[i] + (a[i] - b[i]) * t;
    }
    out
}

fn diff(f: &Fragment<'_>) -> [f32; 4] {
    let a = f.sample("u_input");
    let b = f.sample("u_input2");
    let s = f.float("u_strength");
    let d = |i: usize| ((a[i] - b[i]) * s).clamp(0.0, 1.0);
    [d(0), d(1), d(2), 1.0]
}

fn swizzle_kernel(kind: SwizzleKind) -> FragmentKernel {
    fn permute<const P0: usize, const P1: usize, const P2: usize, const P3: usize>(
        f: &Fragment<'_>,
    ) -> [f32; 4] {
        let c = f.sample("u_input");
        [c[P0], c[P1], c[P2], c[P3]]
    }
    match kind {
        SwizzleKind::Rgba => permute::<0, 1, 2, 3>,
        SwizzleKind::Bgra => permute::<2, 1, 0, 3>,
        SwizzleKind::Argb => permute::<3, 0, 1, 2>,
        SwizzleKind::Abgr => permute::<3, 2, 1, 0>,
        SwizzleKind::Grab => permute::<1, 0, 3, 2>,
    }
}

fn yuv_to_rgb(f: &Fragment<'_>, y: f32, u: f32, v: f32) -> [f32; 4] {
    let m = f.mat3("u_conversion");
    let yuv = [y - f.float("u_luma_offset"), u - 0.5, v - 0.5];
    let mut rgb = [0.0; 3];
    for (row, o) in rgb.iter_mut().enumerate() {
        *o = (0..3).map(|col| m[col * 3 + row] * yuv[col]).sum::<f32>().clamp(0.0, 1.0);
    }
    [rgb[0], rgb[1], rgb[2], 1.0]
}

fn yuv_la(f: &Fragment<'_>) -> [f32; 4] {
    let y = f.sample("u_luma")[0];
    let c = f.sample("u_chroma");
    yuv_to_rgb(f, y, c[0], c[3])
}

fn yuv_rg(f: &Fragment<'_>) -> [f32; 4] {
    let y = f.sample("u_luma")[0];
    let c = f.sample("u_chroma");
    yuv_to_rgb(f, y, c[0], c[1])
}

fn yuv_planar(f: &Fragment<'_>) -> [f32; 4] {
    let y = f.sample("u_luma")[0];
    let u = f.sample("u_chroma_u")[0];
    let v = f.sample("u_chroma_v")[0];
    yuv_to_rgb(f, y, u, v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_source_resolves() {
        let r = KernelRegistry::builtin();
        assert!(r.vertex(DEFAULT_VERT).is_some());
        assert!(r.vertex(MESH_VERT).is_some());
        for src in [PASSTHROUGH_FRAG, GAIN_FRAG, BLEND_FRAG, DIFF_FRAG, YUV2RGB_RG_FRAG] {
            assert!(r.fragment(src).is_some());
        }
        for k in SwizzleKind::ALL {
            assert!(r.fragment(k.fragment_source()).is_some(), "{k:?}");
        }
        assert!(r.fragment("void main() {}").is_none());
    }

    #[test]
    fn mesh_vertex_applies_column_major_transform() {
        let mut u = Uniforms::new();
        let mut m = [0.0; 16];
        m[0] = 2.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        m[12] = 0.5; // x translation
        u.insert("u_transform".into(), UniformValue::Mat4(m));
        let attribs = [("a_pos", [1.0, 1.0, 0.0, 1.0]), ("a_uv", [0.25, 0.75, 0.0, 1.0])];
        let out = mesh_vertex(&VertexInput {
            attribs: &attribs,
            uniforms: &u,
        });
        assert_eq!(out.position, [2.5, 1.0, 0.0, 1.0]);
        assert_eq!(out.uv, [0.25, 0.75]);
    }
}
