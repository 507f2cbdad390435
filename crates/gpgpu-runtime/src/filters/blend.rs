use crate::gpu::UniformValue;
use crate::proc::Filter;
use crate::shader::Shader;

pub const BLEND_FRAG: &str = r#"
in vec2 v_uv;
uniform sampler2D u_input;
uniform sampler2D u_input2;
uniform float u_alpha;
out vec4 frag_color;
void main() {
    frag_color = mix(texture(u_input2, v_uv), texture(u_input, v_uv), u_alpha);
}
"#;

/// Two-input weighted blend: `alpha * slot0 + (1 - alpha) * slot1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blend {
    pub alpha: f32,
}

impl Default for Blend {
    fn default() -> Self {
        Self { alpha: 0.5 }
    }
}

impl Blend {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
        }
    }
}

impl Filter for Blend {
    fn name(&self) -> &'static str {
        "blend"
    }

    fn fragment_source(&self) -> &'static str {
        BLEND_FRAG
    }

    fn input_slots(&self) -> usize {
        2
    }

    fn stage_uniforms(&self, shader: &mut Shader) {
        shader.set("u_alpha", UniformValue::Float(self.alpha));
    }
}
