use gpgpu_core::{ChromaChannels, TextureFormat, YuvStandard};

use crate::gpu::UniformValue;
use crate::proc::Filter;
use crate::shader::Shader;
use crate::transfer::{ChromaTextures, YuvTextures};

pub const YUV2RGB_LA_FRAG: &str = r#"
in vec2 v_uv;
uniform sampler2D u_luma;
uniform sampler2D u_chroma;
uniform mat3 u_conversion;
uniform float u_luma_offset;
out vec4 frag_color;
void main() {
    vec3 yuv;
    yuv.x = texture(u_luma, v_uv).r - u_luma_offset;
    yuv.yz = texture(u_chroma, v_uv).ra - vec2(0.5, 0.5);
    frag_color = vec4(clamp(u_conversion * yuv, 0.0, 1.0), 1.0);
}
"#;

pub const YUV2RGB_RG_FRAG: &str = r#"
in vec2 v_uv;
uniform sampler2D u_luma;
uniform sampler2D u_chroma;
uniform mat3 u_conversion;
uniform float u_luma_offset;
out vec4 frag_color;
void main() {
    vec3 yuv;
    yuv.x = texture(u_luma, v_uv).r - u_luma_offset;
    yuv.yz = texture(u_chroma, v_uv).rg - vec2(0.5, 0.5);
    frag_color = vec4(clamp(u_conversion * yuv, 0.0, 1.0), 1.0);
}
"#;

pub const YUV2RGB_PLANAR_FRAG: &str = r#"
in vec2 v_uv;
uniform sampler2D u_luma;
uniform sampler2D u_chroma_u;
uniform sampler2D u_chroma_v;
uniform mat3 u_conversion;
uniform float u_luma_offset;
out vec4 frag_color;
void main() {
    vec3 yuv;
    yuv.x = texture(u_luma, v_uv).r - u_luma_offset;
    yuv.y = texture(u_chroma_u, v_uv).r - 0.5;
    yuv.z = texture(u_chroma_v, v_uv).r - 0.5;
    frag_color = vec4(clamp(u_conversion * yuv, 0.0, 1.0), 1.0);
}
"#;

/// YUV planes to RGBA. Slot 0 is luma; slot 1 (and 2 for planar input) chroma.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Yuv2Rgb {
    pub standard: YuvStandard,
    chroma: ChromaChannels,
}

impl Yuv2Rgb {
    pub fn new(standard: YuvStandard, chroma: ChromaChannels) -> Self {
        Self { standard, chroma }
    }

    /// Conversion matching the plane textures a transfer produced.
    pub fn for_textures(standard: YuvStandard, planes: &YuvTextures) -> Self {
        Self::new(standard, Self::chroma_of(planes))
    }

    /// How the shader must read the chroma textures of `planes`.
    pub fn chroma_of(planes: &YuvTextures) -> ChromaChannels {
        match planes.chroma {
            ChromaTextures::Planar { .. } => ChromaChannels::Planar,
            ChromaTextures::Interleaved {
                format: TextureFormat::LuminanceAlpha,
                ..
            } => ChromaChannels::LuminanceAlpha,
            ChromaTextures::Interleaved { .. } => ChromaChannels::RedGreen,
        }
    }

    pub fn chroma(&self) -> ChromaChannels {
        self.chroma
    }
}

impl Filter for Yuv2Rgb {
    fn name(&self) -> &'static str {
        "yuv2rgb"
    }

    fn fragment_source(&self) -> &'static str {
        match self.chroma {
            ChromaChannels::LuminanceAlpha => YUV2RGB_LA_FRAG,
            ChromaChannels::RedGreen => YUV2RGB_RG_FRAG,
            ChromaChannels::Planar => YUV2RGB_PLANAR_FRAG,
        }
    }

    fn input_slots(&self) -> usize {
        match self.chroma {
            ChromaChannels::Planar => 3,
            _ => 2,
        }
    }

    fn sampler(&self, slot: usize) -> &'static str {
        match (slot, self.chroma) {
            (0, _) => "u_luma",
            (1, ChromaChannels::Planar) => "u_chroma_u",
            (_, ChromaChannels::Planar) => "u_chroma_v",
            _ => "u_chroma",
        }
    }

    fn stage_uniforms(&self, shader: &mut Shader) {
        shader.set("u_conversion", UniformValue::Mat3(self.standard.matrix()));
        shader.set("u_luma_offset", UniformValue::Float(self.standard.luma_offset()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::TextureId;
    use std::num::NonZeroU32;

    fn id(n: u32) -> TextureId {
        TextureId(NonZeroU32::new(n).unwrap())
    }

    #[test]
    fn chroma_kind_follows_plane_textures() {
        let la = YuvTextures {
            luma: id(1),
            chroma: ChromaTextures::Interleaved {
                tex: id(2),
                format: TextureFormat::LuminanceAlpha,
            },
        };
        let f = Yuv2Rgb::for_textures(YuvStandard::Bt709, &la);
        assert_eq!(f.fragment_source(), YUV2RGB_LA_FRAG);
        assert_eq!(f.input_slots(), 2);

        let planar = YuvTextures {
            luma: id(1),
            chroma: ChromaTextures::Planar { u: id(2), v: id(3) },
        };
        let f = Yuv2Rgb::for_textures(YuvStandard::default(), &planar);
        assert_eq!(f.input_slots(), 3);
        assert_eq!(f.sampler(2), "u_chroma_v");
    }
}
